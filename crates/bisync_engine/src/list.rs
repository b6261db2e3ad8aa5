//! Paginated listings.

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::fanout::fan_out;
use crate::observer::SyncEvent;
use crate::transport::{Request, Scope};
use bisync_schema::{Endpoint, ServerVersion};
use serde_json::{Map, Value as Json};

/// A listing of one entity type.
///
/// Pages are requested with `offset`/`limit` query parameters. The first
/// page is fetched alone to learn the total from the
/// [`TOTAL_COUNT_HEADER`](crate::TOTAL_COUNT_HEADER); the remaining pages
/// are requested concurrently. Without the header, pages are requested one
/// after another until a short page arrives. Filters are matched locally against the
/// records' REST keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ListRequest {
    endpoint: Endpoint,
    items_key: Option<&'static str>,
    limit: Option<usize>,
    page_size: Option<usize>,
    query: Vec<(String, String)>,
    filters: Vec<(String, Json)>,
    paginated: bool,
    min_version: Option<ServerVersion>,
    feature: String,
}

impl ListRequest {
    /// Lists everything at `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            feature: endpoint.path.to_string(),
            endpoint,
            items_key: None,
            limit: None,
            page_size: None,
            query: Vec::new(),
            filters: Vec::new(),
            paginated: true,
            min_version: None,
        }
    }

    /// Unpacks records from this key of an object response.
    pub fn items_key(mut self, key: &'static str) -> Self {
        self.items_key = Some(key);
        self
    }

    /// Returns at most `limit` records.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Overrides the engine's page size.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    /// Adds a query parameter sent with every page.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Keeps only records whose `key` equals `value`.
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    /// The endpoint returns everything in one response.
    pub fn unpaginated(mut self) -> Self {
        self.paginated = false;
        self
    }

    /// Requires a minimum server version.
    pub fn since(mut self, feature: impl Into<String>, version: ServerVersion) -> Self {
        self.feature = feature.into();
        self.min_version = Some(version);
        self
    }

    fn request(&self, scope: &Scope, page: Option<(usize, usize)>) -> Request {
        let mut request = Request::new(self.endpoint.method, self.endpoint.path);
        for (k, v) in self.endpoint.query {
            request = request.with_query(*k, *v);
        }
        for (k, v) in &self.query {
            request = request.with_query(k.clone(), v.clone());
        }
        if let Some((offset, limit)) = page {
            request = request
                .with_query("offset", offset.to_string())
                .with_query("limit", limit.to_string());
        }
        request.scoped(scope)
    }

    fn matches(&self, record: &Map<String, Json>) -> bool {
        self.filters
            .iter()
            .all(|(key, expected)| record.get(key) == Some(expected))
    }

    fn unpack(&self, body: Option<Json>) -> SyncResult<Vec<Map<String, Json>>> {
        let items = match (body, self.items_key) {
            (None, _) | (Some(Json::Null), _) => return Ok(Vec::new()),
            (Some(Json::Array(items)), _) => items,
            (Some(Json::Object(mut obj)), Some(key)) => match obj.remove(key) {
                Some(Json::Array(items)) => items,
                Some(Json::Null) | None => Vec::new(),
                Some(other) => {
                    return Err(SyncError::Protocol(format!(
                        "`{key}` of {} is not an array: {other}",
                        self.endpoint.path
                    )))
                }
            },
            (Some(other), _) => {
                return Err(SyncError::Protocol(format!(
                    "unexpected listing body from {}: {other}",
                    self.endpoint.path
                )))
            }
        };
        items
            .into_iter()
            .map(|item| match item {
                Json::Object(obj) => Ok(obj),
                other => Err(SyncError::Protocol(format!(
                    "listing record from {} is not an object: {other}",
                    self.endpoint.path
                ))),
            })
            .collect()
    }
}

impl SyncEngine {
    /// Runs a listing and returns the raw records.
    pub fn list(&self, listing: &ListRequest, scope: &Scope) -> SyncResult<Vec<Map<String, Json>>> {
        if !self.gate().check(&listing.feature, listing.min_version)? {
            return Ok(Vec::new());
        }
        let limit = listing.limit.unwrap_or(usize::MAX);
        if limit == 0 {
            return Ok(Vec::new());
        }

        if !listing.paginated {
            let response = self.send(listing.request(scope, None))?;
            self.bump(|s| s.pages_fetched += 1);
            let (mut records, _) = self.filter_page(listing, response.body, 0)?;
            records.truncate(limit);
            return Ok(records);
        }

        let chunk = listing
            .page_size
            .unwrap_or(self.config().page_size)
            .max(1)
            .min(limit);
        let first = self.send(listing.request(scope, Some((0, chunk))))?;
        self.bump(|s| s.pages_fetched += 1);
        let total = first.total_count();
        let (mut records, received) = self.filter_page(listing, first.body, 0)?;

        let Some(total) = total.map(|t| t.min(limit)) else {
            // No total: walk pages until one comes back short.
            let (mut offset, mut last) = (received, received);
            while last == chunk && offset < limit {
                let size = chunk.min(limit - offset);
                let response = self.send(listing.request(scope, Some((offset, size))))?;
                self.bump(|s| s.pages_fetched += 1);
                let (page, count) = self.filter_page(listing, response.body, offset)?;
                records.extend(page);
                offset += count;
                last = count;
            }
            records.truncate(limit);
            return Ok(records);
        };
        let offsets: Vec<usize> = (chunk..total).step_by(chunk).collect();
        let pages = fan_out(self.config().max_concurrency, &offsets, |offset| {
            let size = chunk.min(total - offset);
            let response = self.send(listing.request(scope, Some((*offset, size))))?;
            self.bump(|s| s.pages_fetched += 1);
            self.filter_page(listing, response.body, *offset)
        });
        for page in pages {
            records.extend(page?.0);
        }
        records.truncate(limit);
        Ok(records)
    }

    /// Unpacks and filters one page; also returns the unfiltered count.
    fn filter_page(
        &self,
        listing: &ListRequest,
        body: Option<Json>,
        offset: usize,
    ) -> SyncResult<(Vec<Map<String, Json>>, usize)> {
        let mut records = listing.unpack(body)?;
        let received = records.len();
        self.emit(SyncEvent::PageFetched {
            path: listing.endpoint.path.to_string(),
            offset,
            count: received,
        });
        records.retain(|r| listing.matches(r));
        Ok((records, received))
    }
}
