//! Session abstraction between the engine and the REST server.

use crate::error::{SyncError, SyncResult};
use bisync_schema::HttpMethod;
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Header carrying the project scope of a call.
pub const PROJECT_HEADER: &str = "X-MSTR-ProjectID";

/// Response header carrying the total number of records of a listing.
pub const TOTAL_COUNT_HEADER: &str = "x-mstr-total-count";

/// Project context of a call, supplied by the caller per request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    project_id: Option<String>,
}

impl Scope {
    /// No project context.
    pub fn global() -> Self {
        Self::default()
    }

    /// Calls scoped to a project.
    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
        }
    }

    /// Project id, if any.
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }
}

/// A REST request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// HTTP method.
    pub method: HttpMethod,
    /// Path relative to the session's base URL.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Json>,
}

impl Request {
    /// Creates a request without query, headers or body.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Adds a query parameter.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the JSON body.
    pub fn with_json(mut self, body: Json) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds the project header when the scope has a project.
    pub fn scoped(self, scope: &Scope) -> Self {
        match scope.project_id() {
            Some(project) => self.with_header(PROJECT_HEADER, project),
            None => self,
        }
    }

    /// Value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A REST response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Headers with lower-case names.
    pub headers: BTreeMap<String, String>,
    /// JSON body, `None` when empty.
    pub body: Option<Json>,
}

impl Response {
    /// A response with no body.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// A response with a JSON body.
    pub fn json(status: u16, body: Json) -> Self {
        Self {
            body: Some(body),
            ..Self::empty(status)
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Total record count of a paginated listing.
    pub fn total_count(&self) -> Option<usize> {
        self.header(TOTAL_COUNT_HEADER)?.trim().parse().ok()
    }

    /// Message from an error body, if present.
    pub fn error_message(&self) -> String {
        self.body
            .as_ref()
            .and_then(|b| b.get("message"))
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

/// A session handles network communication with the REST server.
///
/// Implementations must be safe for concurrent use: the engine issues
/// independent requests from several threads during fan-out.
/// Non-success statuses are returned as [`Response`] values; only failures
/// to get any response are errors.
pub trait Session: Send + Sync {
    /// Sends a request.
    fn send(&self, request: &Request) -> SyncResult<Response>;

    /// GET `path`.
    fn get(&self, path: &str, scope: &Scope) -> SyncResult<Response> {
        self.send(&Request::new(HttpMethod::Get, path).scoped(scope))
    }

    /// POST a JSON body to `path`.
    fn post(&self, path: &str, body: Json, scope: &Scope) -> SyncResult<Response> {
        self.send(&Request::new(HttpMethod::Post, path).with_json(body).scoped(scope))
    }

    /// PUT a JSON body to `path`.
    fn put(&self, path: &str, body: Json, scope: &Scope) -> SyncResult<Response> {
        self.send(&Request::new(HttpMethod::Put, path).with_json(body).scoped(scope))
    }

    /// PATCH `path` with a JSON body.
    fn patch(&self, path: &str, body: Json, scope: &Scope) -> SyncResult<Response> {
        self.send(&Request::new(HttpMethod::Patch, path).with_json(body).scoped(scope))
    }

    /// DELETE `path`.
    fn delete(&self, path: &str, scope: &Scope) -> SyncResult<Response> {
        self.send(&Request::new(HttpMethod::Delete, path).scoped(scope))
    }
}

impl<S: Session + ?Sized> Session for Arc<S> {
    fn send(&self, request: &Request) -> SyncResult<Response> {
        (**self).send(request)
    }
}

type Handler = Box<dyn Fn(&Request) -> SyncResult<Response> + Send + Sync>;

struct Route {
    method: HttpMethod,
    path: String,
    handler: Handler,
}

/// A mock session for testing.
///
/// Requests are matched on method and exact path; the most recently
/// registered route wins. Unmatched requests get a 404. Every request is
/// recorded, including those that fail.
pub struct MockSession {
    connected: AtomicBool,
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<Request>>,
}

impl MockSession {
    /// Creates a new mock session.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            routes: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Routes requests to a handler.
    pub fn on<F>(&self, method: HttpMethod, path: &str, handler: F)
    where
        F: Fn(&Request) -> SyncResult<Response> + Send + Sync + 'static,
    {
        self.routes.lock().push(Route {
            method,
            path: path.to_string(),
            handler: Box::new(handler),
        });
    }

    /// Answers with a fixed response.
    pub fn respond(&self, method: HttpMethod, path: &str, response: Response) {
        self.on(method, path, move |_| Ok(response.clone()));
    }

    /// Answers with a fixed JSON body.
    pub fn respond_json(&self, method: HttpMethod, path: &str, status: u16, body: Json) {
        self.respond(method, path, Response::json(status, body));
    }

    /// Fails with a transport error.
    pub fn fail(&self, method: HttpMethod, path: &str, message: &str) {
        let message = message.to_string();
        self.on(method, path, move |_| Err(SyncError::transport_retryable(message.clone())));
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns all recorded requests.
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

    /// Forgets recorded requests.
    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for MockSession {
    fn send(&self, request: &Request) -> SyncResult<Response> {
        self.requests.lock().push(request.clone());
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }

        let routes = self.routes.lock();
        match routes
            .iter()
            .rev()
            .find(|r| r.method == request.method && r.path == request.path)
        {
            Some(route) => (route.handler)(request),
            None => Ok(Response::json(
                404,
                serde_json::json!({"message": format!("no route for {} {}", request.method, request.path)}),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scope_adds_project_header() {
        let request = Request::new(HttpMethod::Get, "/api/users/U1").scoped(&Scope::project("P1"));
        assert_eq!(request.header("x-mstr-projectid"), Some("P1"));

        let request = Request::new(HttpMethod::Get, "/api/users/U1").scoped(&Scope::global());
        assert!(request.headers.is_empty());
    }

    #[test]
    fn response_total_count() {
        let response = Response::json(200, json!([])).with_header("X-MSTR-Total-Count", "2500");
        assert_eq!(response.total_count(), Some(2500));
        assert!(response.is_success());
        assert!(!Response::empty(500).is_success());
    }

    #[test]
    fn mock_routes_and_records() {
        let session = MockSession::new();
        session.respond_json(HttpMethod::Get, "/api/users/U1", 200, json!({"id": "U1"}));

        let ok = session.get("/api/users/U1", &Scope::global()).unwrap();
        assert_eq!(ok.body, Some(json!({"id": "U1"})));

        let missing = session.get("/api/users/U2", &Scope::global()).unwrap();
        assert_eq!(missing.status, 404);

        assert_eq!(session.request_count(), 2);
        assert_eq!(session.requests_to(HttpMethod::Get, "/api/users/U1").len(), 1);
    }

    #[test]
    fn latest_route_wins() {
        let session = MockSession::new();
        session.respond(HttpMethod::Delete, "/x", Response::empty(500));
        session.respond(HttpMethod::Delete, "/x", Response::empty(204));
        assert_eq!(session.delete("/x", &Scope::global()).unwrap().status, 204);
    }

    #[test]
    fn mock_not_connected_error() {
        let session = MockSession::new();
        session.set_connected(false);
        let result = session.get("/api/users/U1", &Scope::global());
        assert!(matches!(result, Err(SyncError::NotConnected)));
        assert_eq!(session.request_count(), 1);
    }

    #[test]
    fn mock_transport_failure() {
        let session = Arc::new(MockSession::new());
        session.fail(HttpMethod::Get, "/api/users/U1", "connection reset");
        let err = session.get("/api/users/U1", &Scope::global()).unwrap_err();
        assert!(err.is_retryable());
    }
}
