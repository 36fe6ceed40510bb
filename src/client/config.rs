use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://api.tzstats.com";
pub const DEFAULT_IPFS_URL: &str = "https://ipfs.tzstats.com";
pub const DEFAULT_LIMIT: u32 = 50_000;
pub const DEFAULT_CACHE_SIZE: u64 = 2048;
pub const MIN_CACHE_SIZE: u64 = 2;
pub const USER_AGENT: &str = concat!("tzstats-client/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Number of retries after the first attempt.
///
/// In configuration files a negative number means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "i64")]
pub enum Retries {
    Limited(u32),
    Unbounded,
}

impl Default for Retries {
    fn default() -> Self {
        Retries::Limited(0)
    }
}

impl From<i64> for Retries {
    fn from(n: i64) -> Self {
        if n < 0 {
            Retries::Unbounded
        } else {
            Retries::Limited(u32::try_from(n).unwrap_or(u32::MAX))
        }
    }
}

impl Retries {
    /// Whether another attempt is allowed after `retries_done` retries.
    pub fn allows(&self, retries_done: u32) -> bool {
        match self {
            Retries::Limited(max) => retries_done < *max,
            Retries::Unbounded => true,
        }
    }
}

/// Retry behavior for transient network failures.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(rename = "max_retries")]
    pub retries: Retries,
    /// Fixed delay between attempts
    pub delay_ms: u64,
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            retries: Retries::Limited(max_retries),
            ..Default::default()
        }
    }

    pub fn unbounded() -> Self {
        Self {
            retries: Retries::Unbounded,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_ms: u64,
    /// Budget for the TLS handshake. reqwest has no separate handshake
    /// timeout, so this is added to `connect_ms` and enforced as one limit.
    pub tls_handshake_ms: u64,
    pub response_header_ms: u64,
    /// Whole request including the body. Zero disables the limit.
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 10_000,
            tls_handshake_ms: 5_000,
            response_header_ms: 10_000,
            request_ms: 60_000,
        }
    }
}

impl TimeoutConfig {
    /// Combined TCP connect and TLS handshake limit. A slow connect may use
    /// part of the handshake budget and vice versa.
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms + self.tls_handshake_ms)
    }

    pub fn response_header(&self) -> Duration {
        Duration::from_millis(self.response_header_ms)
    }

    pub fn request(&self) -> Option<Duration> {
        (self.request_ms > 0).then(|| Duration::from_millis(self.request_ms))
    }
}

/// Client-side request pacing.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: NonZeroU32,
    #[serde(default)]
    pub jitter_min_ms: u64,
    #[serde(default)]
    pub jitter_max_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
            jitter_min_ms: 5,
            jitter_max_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub user_agent: String,
    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
    pub rate_limit: Option<RateLimitConfig>,
    /// Wait applied when a 429 response carries no retry hint.
    pub rate_limit_wait_ms: u64,
    /// Capacity of the contract type cache.
    pub cache_size: u64,
    /// Row limit for table queries that do not set one.
    pub default_limit: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            user_agent: USER_AGENT.to_string(),
            headers: BTreeMap::new(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            rate_limit: None,
            rate_limit_wait_ms: 5_000,
            cache_size: DEFAULT_CACHE_SIZE,
            default_limit: DEFAULT_LIMIT,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Loads a JSON configuration file; absent fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    pub fn with_timeouts(mut self, config: TimeoutConfig) -> Self {
        self.timeouts = config;
        self
    }

    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    pub fn with_rate_limit_wait(mut self, wait: Duration) -> Self {
        self.rate_limit_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    pub fn with_default_limit(mut self, limit: u32) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_millis(self.rate_limit_wait_ms)
    }

    pub fn cache_capacity(&self) -> u64 {
        self.cache_size.max(MIN_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, DEFAULT_API_URL);
        assert_eq!(config.default_limit, 50_000);
        assert_eq!(config.cache_capacity(), 2048);
        assert_eq!(config.retry.retries, Retries::Limited(0));
        assert_eq!(config.rate_limit_wait(), Duration::from_secs(5));
        assert_eq!(config.timeouts.connect(), Duration::from_secs(15));
        assert!(config.user_agent.starts_with("tzstats-client/"));
    }

    #[test]
    fn test_cache_size_floor() {
        assert_eq!(ClientConfig::default().with_cache_size(0).cache_capacity(), 2);
    }

    #[test]
    fn test_parse_json() {
        let config: ClientConfig = serde_json::from_str(
            r#"{
                "base_url": "http://localhost:8000",
                "api_key": "secret",
                "retry": {"max_retries": -1, "delay_ms": 250},
                "rate_limit": {"requests_per_second": 4},
                "timeouts": {"request_ms": 0}
            }"#,
        )
        .unwrap();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.retry.retries, Retries::Unbounded);
        assert_eq!(config.retry.delay(), Duration::from_millis(250));
        assert_eq!(config.rate_limit.unwrap().requests_per_second.get(), 4);
        assert_eq!(config.timeouts.request(), None);
        assert_eq!(config.timeouts.response_header_ms, 10_000);
        assert_eq!(config.default_limit, DEFAULT_LIMIT);
    }

    #[test]
    fn test_connect_budget_includes_handshake() {
        let timeouts: TimeoutConfig =
            serde_json::from_str(r#"{"connect_ms": 2000, "tls_handshake_ms": 500}"#).unwrap();
        assert_eq!(timeouts.connect(), Duration::from_millis(2_500));

        let no_tls: TimeoutConfig = serde_json::from_str(r#"{"tls_handshake_ms": 0}"#).unwrap();
        assert_eq!(no_tls.connect(), Duration::from_millis(10_000));
    }

    #[test]
    fn test_retries_allow() {
        assert!(!Retries::Limited(0).allows(0));
        assert!(Retries::Limited(2).allows(1));
        assert!(!Retries::Limited(2).allows(2));
        assert!(Retries::Unbounded.allows(1_000_000));
    }

    #[test]
    fn test_load_from_file() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("tzstats-client-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"base_url": "https://api.ghostnet.tzstats.com", "cache_size": 16}"#)?;
        let config = ClientConfig::load(&path)?;
        std::fs::remove_file(&path)?;
        assert_eq!(config.base_url, "https://api.ghostnet.tzstats.com");
        assert_eq!(config.cache_capacity(), 16);
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        let err = ClientConfig::load("/nonexistent/tzstats.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
