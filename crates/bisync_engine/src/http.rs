//! HTTP session implementation.
//!
//! This module provides an HTTP-based [`Session`]. The actual HTTP client is
//! abstracted via a trait so different libraries can be plugged in; the
//! `reqwest` feature provides one.

use crate::config::HttpSessionConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{Request, Response, Session};
use bisync_schema::HttpMethod;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A byte-level HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL including the query string.
    pub url: String,
    /// Headers.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Option<Vec<u8>>,
    /// Upper bound for the whole exchange.
    pub timeout: Duration,
}

/// A byte-level HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Headers.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. Errors are
/// failures to obtain any response (DNS, TLS, connection reset, timeout).
pub trait HttpClient: Send + Sync {
    /// Executes a request.
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String>;

    /// Checks if the client is healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// JSON-over-HTTP session.
pub struct HttpSession<C: HttpClient> {
    config: HttpSessionConfig,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpSession<C> {
    /// Creates a new HTTP session.
    pub fn new(config: HttpSessionConfig, client: C) -> Self {
        Self {
            config,
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &HttpSessionConfig {
        &self.config
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns true while the session is open and the client healthy.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    /// Closes the session; later requests fail with `NotConnected`.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn url_for(&self, request: &Request) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let mut url = format!("{base}{}", request.path);
        for (i, (name, value)) in request.query.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(&urlencoding::encode(name));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    fn to_http(&self, request: &Request) -> SyncResult<HttpRequest> {
        let mut headers = self.config.default_headers.clone();
        headers.push(("Accept".into(), "application/json".into()));
        let body = match &request.body {
            Some(json) => {
                headers.push(("Content-Type".into(), "application/json".into()));
                Some(serde_json::to_vec(json)?)
            }
            None => None,
        };
        headers.extend(request.headers.iter().cloned());
        Ok(HttpRequest {
            method: request.method,
            url: self.url_for(request),
            headers,
            body,
            timeout: self.config.timeout,
        })
    }
}

impl<C: HttpClient> Session for HttpSession<C> {
    fn send(&self, request: &Request) -> SyncResult<Response> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let http_request = self.to_http(request)?;

        let retry = &self.config.retry;
        let max_attempts = if request.method.is_idempotent() || retry.retry_non_idempotent {
            retry.max_attempts
        } else {
            1
        };
        let mut attempt = 0;
        let http_response = loop {
            let delay = retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            match self.client.execute(http_request.clone()) {
                Ok(response) => break response,
                Err(e) => {
                    *self.last_error.write() = Some(e.clone());
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(SyncError::transport_retryable(e));
                    }
                    tracing::debug!(attempt, error = %e, "retrying request");
                }
            }
        };
        *self.last_error.write() = None;

        let headers: BTreeMap<String, String> = http_response
            .headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        let body = if http_response.body.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            match serde_json::from_slice(&http_response.body) {
                Ok(json) => Some(json),
                // Error pages are not always JSON; keep the status meaningful.
                Err(_) if !(200..300).contains(&http_response.status) => None,
                Err(e) => {
                    return Err(SyncError::Protocol(format!(
                        "invalid JSON from {} {}: {e}",
                        request.method, request.path
                    )))
                }
            }
        };

        Ok(Response {
            status: http_response.status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::Scope;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct TestClient {
        failures_before_success: AtomicUsize,
        seen: Mutex<Vec<HttpRequest>>,
        response: HttpResponse,
    }

    impl TestClient {
        fn new(response: HttpResponse) -> Self {
            Self {
                failures_before_success: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                response,
            }
        }

        fn failing(self, times: usize) -> Self {
            self.failures_before_success.store(times, Ordering::SeqCst);
            self
        }
    }

    impl HttpClient for TestClient {
        fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.seen.lock().push(request);
            let left = self.failures_before_success.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_before_success.store(left - 1, Ordering::SeqCst);
                return Err("connection reset".into());
            }
            Ok(self.response.clone())
        }
    }

    fn ok_json(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: vec![("X-MSTR-Total-Count".into(), "3".into())],
            body: body.as_bytes().to_vec(),
        }
    }

    fn config() -> HttpSessionConfig {
        HttpSessionConfig::new("https://bi.example.com/Library/")
            .with_header("X-MSTR-AuthToken", "abc")
            .with_retry(RetryConfig::new(3).with_initial_delay(Duration::ZERO))
    }

    #[test]
    fn builds_url_headers_and_body() {
        let session = HttpSession::new(config(), TestClient::new(ok_json(r#"{"id":"U1"}"#)));
        let request = Request::new(HttpMethod::Patch, "/api/users/U1")
            .with_query("fields", "id,name")
            .with_json(json!({"operationList": []}))
            .scoped(&Scope::project("P1"));

        let response = session.send(&request).unwrap();
        assert_eq!(response.body, Some(json!({"id": "U1"})));
        assert_eq!(response.total_count(), Some(3));

        let seen = session.client.seen.lock();
        let sent = &seen[0];
        assert_eq!(
            sent.url,
            "https://bi.example.com/Library/api/users/U1?fields=id%2Cname"
        );
        assert!(sent.headers.iter().any(|(k, v)| k == "X-MSTR-AuthToken" && v == "abc"));
        assert!(sent.headers.iter().any(|(k, v)| k == "X-MSTR-ProjectID" && v == "P1"));
        assert_eq!(sent.body.as_deref(), Some(br#"{"operationList":[]}"#.as_slice()));
    }

    #[test]
    fn retries_transport_failures() {
        let session = HttpSession::new(config(), TestClient::new(ok_json("{}")).failing(2));
        let response = session.send(&Request::new(HttpMethod::Get, "/api/users/U1")).unwrap();
        assert!(response.is_success());
        assert_eq!(session.client.seen.lock().len(), 3);
        assert_eq!(session.last_error(), None);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let session = HttpSession::new(config(), TestClient::new(ok_json("{}")).failing(5));
        let err = session.send(&Request::new(HttpMethod::Get, "/x")).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(session.last_error().as_deref(), Some("connection reset"));
    }

    #[test]
    fn empty_and_non_json_error_bodies() {
        let empty = HttpResponse {
            status: 204,
            headers: vec![],
            body: vec![],
        };
        let session = HttpSession::new(config(), TestClient::new(empty));
        assert_eq!(session.send(&Request::new(HttpMethod::Delete, "/x")).unwrap().body, None);

        let html = HttpResponse {
            status: 502,
            headers: vec![],
            body: b"<html>bad gateway</html>".to_vec(),
        };
        let session = HttpSession::new(config(), TestClient::new(html));
        let response = session.send(&Request::new(HttpMethod::Get, "/x")).unwrap();
        assert_eq!(response.status, 502);
        assert_eq!(response.body, None);
    }

    #[test]
    fn query_values_are_escaped() {
        let session = HttpSession::new(config(), TestClient::new(ok_json("{}")));
        let request = Request::new(HttpMethod::Get, "/api/users").with_query("nameBegins", "a b&c=d");

        session.send(&request).unwrap();
        assert_eq!(
            session.client.seen.lock()[0].url,
            "https://bi.example.com/Library/api/users?nameBegins=a%20b%26c%3Dd"
        );
    }

    #[test]
    fn configured_timeout_reaches_the_client() {
        let config = config().with_timeout(Duration::from_secs(5));
        let session = HttpSession::new(config, TestClient::new(ok_json("{}")));

        session.send(&Request::new(HttpMethod::Get, "/x")).unwrap();
        assert_eq!(session.client.seen.lock()[0].timeout, Duration::from_secs(5));
    }

    #[test]
    fn non_idempotent_methods_are_sent_once() {
        for method in [HttpMethod::Post, HttpMethod::Patch] {
            let session = HttpSession::new(config(), TestClient::new(ok_json("{}")).failing(1));
            let err = session.send(&Request::new(method, "/api/users")).unwrap_err();
            assert!(err.is_retryable());
            assert_eq!(session.client.seen.lock().len(), 1);
        }
    }

    #[test]
    fn non_idempotent_retry_can_be_enabled() {
        let config = config().with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::ZERO)
                .with_non_idempotent_retry(true),
        );
        let session = HttpSession::new(config, TestClient::new(ok_json("{}")).failing(1));

        session.send(&Request::new(HttpMethod::Post, "/api/users")).unwrap();
        assert_eq!(session.client.seen.lock().len(), 2);
    }

    #[test]
    fn closed_session_rejects_requests() {
        let session = HttpSession::new(config(), TestClient::new(ok_json("{}")));
        session.close();
        assert!(matches!(
            session.send(&Request::new(HttpMethod::Get, "/x")),
            Err(SyncError::NotConnected)
        ));
    }
}
