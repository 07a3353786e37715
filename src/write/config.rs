//! Configuration for Write-Stream Sessions
//!
//! Loaded from TOML (file or string) with `WRITE_STREAM_*` environment
//! overrides layered on top. Every field has a default, so a partial TOML
//! document is valid.

use crate::write::client::StatusCode;
use crate::write::retry::{RetrySettings, StatusCodeClassifier};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Transport maximum for one append request
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10_000_000;
/// Share of the transport maximum usable for row payloads; the rest is
/// left for the request envelope
pub const DEFAULT_REQUEST_SIZE_RATIO: f64 = 0.95;
/// Pause between the last append and the finalize request
pub const DEFAULT_FINALIZE_QUIESCENCE: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "config parse error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteStreamConfig {
    /// Transport's maximum request size in bytes
    pub max_message_bytes: usize,
    /// Fraction of `max_message_bytes` a batch of rows may occupy
    pub request_size_ratio: f64,
    /// Wait before requesting finalization
    #[serde(with = "duration_millis")]
    pub finalize_quiescence: Duration,
    /// Retry schedule for stream creation and finalization
    pub retry: RetrySettings,
    /// Status codes treated as transient
    pub retryable_codes: Vec<StatusCode>,
}

impl Default for WriteStreamConfig {
    fn default() -> Self {
        WriteStreamConfig {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            request_size_ratio: DEFAULT_REQUEST_SIZE_RATIO,
            finalize_quiescence: DEFAULT_FINALIZE_QUIESCENCE,
            retry: RetrySettings::default(),
            retryable_codes: StatusCodeClassifier::DEFAULT_RETRYABLE.to_vec(),
        }
    }
}

impl WriteStreamConfig {
    /// Configuration for tests (small requests, no jitter)
    pub fn test() -> Self {
        WriteStreamConfig {
            max_message_bytes: 64 * 1024,
            retry: RetrySettings::test(),
            ..Default::default()
        }
    }

    /// Config whose request ceiling is exactly `max_request_bytes`
    pub fn with_request_ceiling(max_request_bytes: usize) -> Self {
        WriteStreamConfig {
            max_message_bytes: max_request_bytes,
            request_size_ratio: 1.0,
            ..Self::test()
        }
    }

    /// Per-request byte ceiling for buffered rows
    pub fn max_request_bytes(&self) -> usize {
        (self.max_message_bytes as f64 * self.request_size_ratio) as usize
    }

    pub fn classifier(&self) -> StatusCodeClassifier {
        StatusCodeClassifier::new(self.retryable_codes.iter().copied())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_message_bytes must be positive".to_string(),
            ));
        }
        if !(self.request_size_ratio > 0.0 && self.request_size_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "request_size_ratio must be in (0, 1], got {}",
                self.request_size_ratio
            )));
        }
        if self.max_request_bytes() == 0 {
            return Err(ConfigError::Invalid(
                "request ceiling rounds down to zero bytes".to_string(),
            ));
        }
        if self.retry.retry_delay_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry_delay_multiplier must be >= 1.0, got {}",
                self.retry.retry_delay_multiplier
            )));
        }
        if self.retry.max_retry_delay < self.retry.initial_retry_delay {
            return Err(ConfigError::Invalid(
                "max_retry_delay must not be shorter than initial_retry_delay".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: WriteStreamConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Apply `WRITE_STREAM_*` overrides. Unparseable values are ignored.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string());

        if let Some(v) = var("WRITE_STREAM_MAX_MESSAGE_BYTES").and_then(|s| s.parse().ok()) {
            self.max_message_bytes = v;
        }
        if let Some(v) = var("WRITE_STREAM_REQUEST_SIZE_RATIO").and_then(|s| s.parse().ok()) {
            self.request_size_ratio = v;
        }
        if let Some(v) = var("WRITE_STREAM_FINALIZE_QUIESCENCE_MS").and_then(|s| s.parse().ok()) {
            self.finalize_quiescence = Duration::from_millis(v);
        }
        if let Some(v) = var("WRITE_STREAM_RETRY_MAX_ATTEMPTS").and_then(|s| s.parse().ok()) {
            self.retry.max_attempts = v;
        }
        if let Some(v) = var("WRITE_STREAM_RETRY_INITIAL_DELAY_MS").and_then(|s| s.parse().ok()) {
            self.retry.initial_retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = var("WRITE_STREAM_RETRY_MAX_DELAY_MS").and_then(|s| s.parse().ok()) {
            self.retry.max_retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = var("WRITE_STREAM_RETRY_TOTAL_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
            self.retry.total_timeout = Duration::from_millis(v);
        }
        self
    }
}

/// Serde helper for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
