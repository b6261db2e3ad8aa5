//! Blocking reqwest implementation of [`HttpClient`].

use crate::error::{SyncError, SyncResult};
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use std::time::Duration;

/// [`HttpClient`] backed by `reqwest::blocking`.
///
/// Keeps a cookie-less connection pool; authentication headers are added by
/// [`HttpSessionConfig::default_headers`](crate::HttpSessionConfig).
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    inner: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Builds a client with the given request timeout.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let inner = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Wraps an existing client.
    pub fn from_client(inner: reqwest::blocking::Client) -> Self {
        Self { inner }
    }
}

impl HttpClient for ReqwestClient {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| e.to_string())?;
        let mut builder = self
            .inner
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.bytes().map_err(|e| e.to_string())?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
