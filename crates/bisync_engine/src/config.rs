//! Configuration for the sync engine and the HTTP session.

use bisync_schema::{GatePolicy, ServerVersion};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for sync operations.
///
/// Deserializes from JSON with every key optional, e.g.
/// `{"server_version": "11.3.0800", "gate_policy": "Warn"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Version of the connected server. `None` means unknown; gates pass.
    pub server_version: Option<ServerVersion>,
    /// What to do when a feature needs a newer server.
    pub gate_policy: GatePolicy,
    /// Maximum concurrent requests within one fetch or listing.
    pub max_concurrency: usize,
    /// Records requested per page when listing.
    pub page_size: usize,
}

impl SyncConfig {
    /// Creates a configuration for a server of the given version.
    pub fn new(server_version: ServerVersion) -> Self {
        Self {
            server_version: Some(server_version),
            ..Self::default()
        }
    }

    /// Sets the gate policy.
    pub fn with_gate_policy(mut self, policy: GatePolicy) -> Self {
        self.gate_policy = policy;
        self
    }

    /// Sets the concurrency limit (at least one).
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    /// Sets the listing page size (at least one).
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_version: None,
            gate_policy: GatePolicy::Raise,
            max_concurrency: 8,
            page_size: 1000,
        }
    }
}

/// Configuration for [`HttpSession`](crate::HttpSession).
#[derive(Debug, Clone)]
pub struct HttpSessionConfig {
    /// Base URL, e.g. `https://bi.example.com/MicroStrategyLibrary`.
    pub base_url: String,
    /// Per-request timeout handed to the client.
    pub timeout: Duration,
    /// Headers added to every request (auth token, cookies).
    pub default_headers: Vec<(String, String)>,
    /// Retry behavior for transport failures.
    pub retry: RetryConfig,
}

impl HttpSessionConfig {
    /// Creates a configuration for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            default_headers: Vec::new(),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Also retry POST and PATCH. Off by default since a lost response may
    /// hide a write that already happened.
    pub retry_non_idempotent: bool,
}

impl RetryConfig {
    /// Creates a retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            retry_non_idempotent: false,
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            retry_non_idempotent: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Allows retrying POST and PATCH requests.
    pub fn with_non_idempotent_retry(mut self, enabled: bool) -> Self {
        self.retry_non_idempotent = enabled;
        self
    }

    /// Delay before the given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new(ServerVersion::new(11, 3, 800, 0))
            .with_gate_policy(GatePolicy::Warn)
            .with_max_concurrency(0)
            .with_page_size(250);

        assert_eq!(config.server_version, Some(ServerVersion::new(11, 3, 800, 0)));
        assert_eq!(config.gate_policy, GatePolicy::Warn);
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.page_size, 250);
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.server_version, None);
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.gate_policy, GatePolicy::Raise);
    }

    #[test]
    fn sync_config_from_json() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"server_version": "11.3.0800", "gate_policy": "Warn"}"#).unwrap();
        assert_eq!(config.server_version, Some(ServerVersion::new(11, 3, 800, 0)));
        assert_eq!(config.gate_policy, GatePolicy::Warn);
        assert_eq!(config.page_size, 1000);
    }

    #[test]
    fn http_config_builder() {
        let config = HttpSessionConfig::new("https://bi.example.com/Library")
            .with_timeout(Duration::from_secs(5))
            .with_header("X-MSTR-AuthToken", "t0k")
            .with_retry(RetryConfig::no_retry());
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.default_headers.len(), 1);
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }
}
