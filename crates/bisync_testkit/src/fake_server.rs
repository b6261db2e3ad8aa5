//! An in-memory REST server for end-to-end tests.
//!
//! Documents are JSON values stored by path. The server understands the
//! request shapes the engine sends: object GETs, paginated listings,
//! partial PUTs, `operationList` PATCHes (including collection operations),
//! creation and deletion.

use bisync_engine::{
    HttpMethod, Request, Response, Session, SyncError, SyncResult, TOTAL_COUNT_HEADER,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Builds the stored element for a collection member id.
pub type MemberTemplate = fn(&str) -> Json;

#[derive(Debug, Clone)]
struct Failure {
    method: HttpMethod,
    path: String,
    status: u16,
    remaining: Option<usize>,
}

/// A fake REST server implementing [`Session`].
///
/// Every request is recorded, including injected failures.
pub struct FakeServer {
    documents: Mutex<BTreeMap<String, Json>>,
    listings: Mutex<BTreeMap<String, Option<String>>>,
    aliases: Mutex<BTreeMap<String, String>>,
    templates: Mutex<BTreeMap<String, MemberTemplate>>,
    failures: Mutex<Vec<Failure>>,
    requests: Mutex<Vec<Request>>,
    connected: AtomicBool,
}

impl FakeServer {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(BTreeMap::new()),
            listings: Mutex::new(BTreeMap::new()),
            aliases: Mutex::new(BTreeMap::new()),
            templates: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Stores a document, replacing any previous one.
    pub fn insert(&self, path: &str, document: Json) {
        self.documents.lock().insert(path.to_string(), document);
    }

    /// Current document at `path`.
    pub fn document(&self, path: &str) -> Option<Json> {
        self.documents.lock().get(path).cloned()
    }

    /// Serves the direct children of `path` as a listing, optionally
    /// wrapped in an object under `items_key`.
    pub fn serve_listing(&self, path: &str, items_key: Option<&str>) {
        self.listings
            .lock()
            .insert(path.to_string(), items_key.map(str::to_string));
    }

    /// Routes requests for `from` to the document at `to`.
    pub fn alias(&self, from: &str, to: &str) {
        self.aliases.lock().insert(from.to_string(), to.to_string());
    }

    /// Stores members added to the `key` sub-resource using `template`.
    ///
    /// Other members are stored as `{"id": …}`.
    pub fn member_template(&self, key: &str, template: MemberTemplate) {
        self.templates.lock().insert(key.to_string(), template);
    }

    /// Answers every matching request with `status`.
    pub fn fail(&self, method: HttpMethod, path: &str, status: u16) {
        self.push_failure(method, path, status, None);
    }

    /// Answers the next matching request with `status`.
    pub fn fail_once(&self, method: HttpMethod, path: &str, status: u16) {
        self.push_failure(method, path, status, Some(1));
    }

    fn push_failure(&self, method: HttpMethod, path: &str, status: u16, remaining: Option<usize>) {
        self.failures.lock().push(Failure {
            method,
            path: path.to_string(),
            status,
            remaining,
        });
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// All recorded requests.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Number of recorded requests.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Recorded requests matching method and path.
    pub fn requests_to(&self, method: HttpMethod, path: &str) -> Vec<Request> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .cloned()
            .collect()
    }

    /// Number of recorded requests with `method`.
    pub fn count(&self, method: HttpMethod) -> usize {
        self.requests.lock().iter().filter(|r| r.method == method).count()
    }

    /// Forgets recorded requests.
    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    fn injected(&self, request: &Request) -> Option<u16> {
        let mut failures = self.failures.lock();
        let index = failures
            .iter()
            .position(|f| f.method == request.method && f.path == request.path)?;
        let status = failures[index].status;
        if let Some(remaining) = failures[index].remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                failures.remove(index);
            }
        }
        Some(status)
    }

    fn resolve(&self, path: &str) -> String {
        self.aliases
            .lock()
            .get(path)
            .cloned()
            .unwrap_or_else(|| path.to_string())
    }

    fn handle_get(&self, path: &str, request: &Request) -> Response {
        if let Some(document) = self.document(path) {
            return Response::json(200, document);
        }
        let Some(items_key) = self.listings.lock().get(path).cloned() else {
            return not_found(path);
        };

        let prefix = format!("{path}/");
        let children: Vec<Json> = self
            .documents
            .lock()
            .iter()
            .filter(|(key, _)| {
                key.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(|(_, doc)| doc.clone())
            .collect();
        let total = children.len();
        let offset = query_usize(request, "offset").unwrap_or(0);
        let limit = query_usize(request, "limit").unwrap_or(total);
        let page: Vec<Json> = children.into_iter().skip(offset).take(limit).collect();

        let body = match items_key {
            Some(key) => json!({ key: page }),
            None => Json::Array(page),
        };
        Response::json(200, body).with_header(TOTAL_COUNT_HEADER, total.to_string())
    }

    fn handle_post(&self, path: &str, request: &Request) -> Response {
        let mut document = match &request.body {
            Some(Json::Object(obj)) => obj.clone(),
            _ => return bad_request("creation body must be an object"),
        };
        let id = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
        document.insert("id".into(), Json::String(id.clone()));
        let document = Json::Object(document);
        self.insert(&format!("{path}/{id}"), document.clone());
        Response::json(201, document)
    }

    fn handle_put(&self, path: &str, request: &Request) -> Response {
        let Some(Json::Object(changes)) = &request.body else {
            return bad_request("PUT body must be an object");
        };
        let mut documents = self.documents.lock();
        let document = documents
            .entry(path.to_string())
            .or_insert_with(|| Json::Object(Map::new()));
        if let Some(obj) = document.as_object_mut() {
            for (key, value) in changes {
                obj.insert(key.clone(), value.clone());
            }
        }
        Response::json(200, document.clone())
    }

    fn handle_patch(&self, path: &str, request: &Request) -> Response {
        let Some(operations) = request
            .body
            .as_ref()
            .and_then(|b| b.get("operationList"))
            .and_then(Json::as_array)
        else {
            return bad_request("PATCH body must carry an operationList");
        };
        if self.document(path).is_none() {
            return not_found(path);
        }

        for operation in operations {
            let op = operation.get("op").and_then(Json::as_str).unwrap_or_default();
            let key = operation
                .get("path")
                .and_then(Json::as_str)
                .unwrap_or_default()
                .trim_start_matches('/');
            let value = operation.get("value").cloned().unwrap_or(Json::Null);
            let applied = match op {
                "replace" => self.replace(path, key, value),
                "add" | "addElement" => self.change_members(path, key, &value, true),
                "remove" | "removeElement" => self.change_members(path, key, &value, false),
                _ => false,
            };
            if !applied {
                return bad_request(&format!("cannot apply `{op}` to `{key}`"));
            }
        }
        match self.document(path) {
            Some(document) => Response::json(200, document),
            None => not_found(path),
        }
    }

    fn replace(&self, path: &str, key: &str, value: Json) -> bool {
        let mut documents = self.documents.lock();
        match documents.get_mut(path) {
            Some(Json::Object(obj)) => {
                obj.insert(key.to_string(), value);
                true
            }
            _ => false,
        }
    }

    fn change_members(&self, path: &str, key: &str, value: &Json, add: bool) -> bool {
        let (target, inline, ids) = match value {
            Json::Object(obj) => {
                let (Some(project), Some(Json::Array(members))) =
                    (obj.get("projectId").and_then(Json::as_str), obj.get("memberIds"))
                else {
                    return false;
                };
                (format!("{path}/projects/{project}/{key}"), false, member_ids(members))
            }
            Json::Array(items) => {
                let sub = format!("{path}/{key}");
                let inline = self.document(&sub).is_none();
                (if inline { path.to_string() } else { sub }, inline, member_ids(items))
            }
            _ => return false,
        };
        let template = if inline {
            None
        } else {
            self.templates.lock().get(key).copied()
        };

        let mut documents = self.documents.lock();
        let document = documents
            .entry(target)
            .or_insert_with(|| Json::Array(Vec::new()));
        let Some(members) = member_array(document, key, inline) else {
            return false;
        };
        for id in ids {
            let present = members.iter().any(|m| element_id(m) == Some(id.as_str()));
            if add && !present {
                members.push(template.map_or_else(|| json!({ "id": id }), |t| t(&id)));
            } else if !add {
                members.retain(|m| element_id(m) != Some(id.as_str()));
            }
        }
        true
    }

    fn handle_delete(&self, path: &str) -> Response {
        let mut documents = self.documents.lock();
        if documents.remove(path).is_none() {
            return not_found(path);
        }
        let prefix = format!("{path}/");
        documents.retain(|key, _| !key.starts_with(&prefix));
        Response::empty(204)
    }
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for FakeServer {
    fn send(&self, request: &Request) -> SyncResult<Response> {
        self.requests.lock().push(request.clone());
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        if let Some(status) = self.injected(request) {
            return Ok(Response::json(status, json!({"message": "injected failure"})));
        }

        let path = self.resolve(&request.path);
        Ok(match request.method {
            HttpMethod::Get => self.handle_get(&path, request),
            HttpMethod::Post => self.handle_post(&path, request),
            HttpMethod::Put => self.handle_put(&path, request),
            HttpMethod::Patch => self.handle_patch(&path, request),
            HttpMethod::Delete => self.handle_delete(&path),
        })
    }
}

fn member_ids(items: &[Json]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| element_id(item).map(str::to_string))
        .collect()
}

/// Id of a stored collection element: a bare string, `{"id"}` or
/// `{"privilege": {"id"}}`.
fn element_id(element: &Json) -> Option<&str> {
    match element {
        Json::String(id) => Some(id),
        Json::Object(obj) => obj
            .get("id")
            .or_else(|| obj.get("privilege").and_then(|p| p.get("id")))
            .and_then(Json::as_str),
        _ => None,
    }
}

fn member_array<'a>(document: &'a mut Json, key: &str, inline: bool) -> Option<&'a mut Vec<Json>> {
    match document {
        Json::Array(items) if !inline => Some(items),
        Json::Object(obj) => obj
            .entry(key.to_string())
            .or_insert_with(|| Json::Array(Vec::new()))
            .as_array_mut(),
        _ => None,
    }
}

fn query_usize(request: &Request, name: &str) -> Option<usize> {
    request.query_param(name)?.parse().ok()
}

fn not_found(path: &str) -> Response {
    Response::json(404, json!({"message": format!("{path} not found")}))
}

fn bad_request(message: &str) -> Response {
    Response::json(400, json!({ "message": message }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bisync_engine::Scope;
    use pretty_assertions::assert_eq;

    #[test]
    fn lists_children_with_pages() {
        let server = FakeServer::new();
        server.serve_listing("/api/users", None);
        for i in 0..5 {
            server.insert(&format!("/api/users/U{i}"), json!({"id": format!("U{i}")}));
        }
        server.insert("/api/users/U0/addresses", json!([]));

        let request = Request::new(HttpMethod::Get, "/api/users")
            .with_query("offset", "3")
            .with_query("limit", "10");
        let response = server.send(&request).unwrap();

        assert_eq!(response.total_count(), Some(5));
        assert_eq!(response.body, Some(json!([{"id": "U3"}, {"id": "U4"}])));
    }

    #[test]
    fn patch_adds_inline_members() {
        let server = FakeServer::new();
        server.insert("/api/usergroups/G1", json!({"id": "G1", "members": [{"id": "U1"}]}));
        let body = json!({"operationList": [
            {"op": "add", "path": "/members", "value": ["U1", "U2"]},
            {"op": "replace", "path": "/name", "value": "Ops"},
        ]});

        let response = server
            .patch("/api/usergroups/G1", body, &Scope::global())
            .unwrap();

        assert_eq!(
            response.body,
            Some(json!({"id": "G1", "name": "Ops", "members": [{"id": "U1"}, {"id": "U2"}]}))
        );
    }

    #[test]
    fn patch_targets_sub_resource_with_template() {
        let server = FakeServer::new();
        server.insert("/api/users/U1", json!({"id": "U1"}));
        server.insert("/api/users/U1/privileges", json!([]));
        server.member_template("privileges", |id| {
            json!({"privilege": {"id": id}, "sources": [{"direct": true}]})
        });
        let body = json!({"operationList": [{"op": "add", "path": "/privileges", "value": ["P1"]}]});

        let response = server.patch("/api/users/U1", body, &Scope::global()).unwrap();

        assert_eq!(response.body, Some(json!({"id": "U1"})));
        assert_eq!(
            server.document("/api/users/U1/privileges"),
            Some(json!([{"privilege": {"id": "P1"}, "sources": [{"direct": true}]}]))
        );
    }

    #[test]
    fn project_scoped_members_live_per_project() {
        let server = FakeServer::new();
        server.insert("/api/securityRoles/R1", json!({"id": "R1"}));
        let body = json!({"operationList": [{
            "op": "add",
            "path": "/members",
            "value": {"projectId": "PR1", "memberIds": ["U1"]},
        }]});
        server.patch("/api/securityRoles/R1", body, &Scope::global()).unwrap();

        assert_eq!(
            server.document("/api/securityRoles/R1/projects/PR1/members"),
            Some(json!([{"id": "U1"}]))
        );
    }

    #[test]
    fn create_and_delete() {
        let server = FakeServer::new();
        let created = server
            .post("/api/usergroups", json!({"name": "Ops"}), &Scope::global())
            .unwrap();
        assert_eq!(created.status, 201);
        let id = created.body.unwrap()["id"].as_str().unwrap().to_string();
        assert_eq!(id.len(), 32);

        let path = format!("/api/usergroups/{id}");
        assert_eq!(server.delete(&path, &Scope::global()).unwrap().status, 204);
        assert_eq!(server.get(&path, &Scope::global()).unwrap().status, 404);
    }

    #[test]
    fn injected_failure_fires_once() {
        let server = FakeServer::new();
        server.insert("/api/users/U1", json!({"id": "U1"}));
        server.fail_once(HttpMethod::Get, "/api/users/U1", 503);

        assert_eq!(server.get("/api/users/U1", &Scope::global()).unwrap().status, 503);
        assert_eq!(server.get("/api/users/U1", &Scope::global()).unwrap().status, 200);
        assert_eq!(server.request_count(), 2);
    }

    #[test]
    fn alias_routes_to_document() {
        let server = FakeServer::new();
        server.insert("/api/usergroups/G1", json!({"id": "G1"}));
        server.alias("/api/objects/G1", "/api/usergroups/G1");
        server
            .put("/api/objects/G1", json!({"abbreviation": "OPS"}), &Scope::global())
            .unwrap();
        assert_eq!(
            server.document("/api/usergroups/G1"),
            Some(json!({"id": "G1", "abbreviation": "OPS"}))
        );
    }
}
