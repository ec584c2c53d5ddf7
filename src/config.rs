use std::time::Duration;

use crate::error::{EnhanceError, Result};

/// Environment variable holding the enhancement service base URL.
pub const ENV_BACKEND_URL: &str = "ENHANCE_BACKEND_URL";
/// Environment variable overriding the request timeout, in whole seconds.
pub const ENV_TIMEOUT_SECS: &str = "ENHANCE_TIMEOUT_SECS";
/// Environment variable selecting the pairing policy (`strict` or `lenient`).
pub const ENV_PAIRING: &str = "ENHANCE_PAIRING";

/// How to treat an archive with fewer results than inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingPolicy {
    /// Succeed and leave trailing inputs unpaired. A warning is logged.
    #[default]
    Lenient,
    /// Fail the batch.
    Strict,
}

impl std::str::FromStr for PairingPolicy {
    type Err = EnhanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(PairingPolicy::Lenient),
            "strict" => Ok(PairingPolicy::Strict),
            other => Err(EnhanceError::Configuration(format!(
                "unknown pairing policy '{}' (expected 'strict' or 'lenient')",
                other
            ))),
        }
    }
}

/// Settings for the fake progress signal shown while a request is in flight.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Interval between progress ticks.
    pub tick: Duration,
    /// Smallest random increment per tick.
    pub min_step: f64,
    /// Largest random increment per tick (exclusive).
    pub max_step: f64,
    /// Value the estimate never exceeds. Clamped below 100.
    pub ceiling: f64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(200),
            min_step: 1.0,
            max_step: 15.0,
            ceiling: 90.0,
        }
    }
}

/// Configuration for the enhancement client.
///
/// Use [`EnhanceConfig::builder()`] for ergonomic construction,
/// [`EnhanceConfig::from_env()`] to read the service URL from the
/// environment, or [`EnhanceConfig::default()`] for in-process transports
/// that need no endpoint.
#[derive(Debug, Clone)]
pub struct EnhanceConfig {
    /// Base URL of the enhancement service. Required by [`HttpTransport`](crate::HttpTransport).
    pub endpoint: Option<String>,

    /// Request path appended to the endpoint.
    pub path: String,

    /// Multipart field name each image is attached under.
    pub field_name: String,

    /// Upper bound on a single enhancement request. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,

    /// Fake progress settings.
    pub progress: ProgressConfig,

    /// Policy for archives with fewer results than inputs.
    pub pairing: PairingPolicy,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            path: "/enhance-image/".to_string(),
            field_name: "file".to_string(),
            request_timeout: Some(Duration::from_secs(120)),
            progress: ProgressConfig::default(),
            pairing: PairingPolicy::default(),
            event_capacity: 64,
        }
    }
}

impl EnhanceConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> EnhanceConfigBuilder {
        EnhanceConfigBuilder::default()
    }

    /// Build a config from `ENHANCE_BACKEND_URL`, `ENHANCE_TIMEOUT_SECS` and
    /// `ENHANCE_PAIRING`.
    ///
    /// A missing or empty backend URL is a configuration error: it is not
    /// recoverable per request, so it is reported here rather than when a
    /// batch is submitted.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup(ENV_BACKEND_URL)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                EnhanceError::Configuration(format!("{} is not set", ENV_BACKEND_URL))
            })?;

        let mut builder = Self::builder().with_endpoint(endpoint);

        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                EnhanceError::Configuration(format!(
                    "{} must be a whole number of seconds, got '{}'",
                    ENV_TIMEOUT_SECS, raw
                ))
            })?;
            builder = if secs == 0 {
                builder.without_timeout()
            } else {
                builder.with_timeout(Duration::from_secs(secs))
            };
        }

        if let Some(raw) = lookup(ENV_PAIRING) {
            builder = builder.with_pairing(raw.parse()?);
        }

        Ok(builder.build())
    }
}

/// Builder for [`EnhanceConfig`].
#[derive(Default)]
pub struct EnhanceConfigBuilder {
    config: EnhanceConfig,
}

impl EnhanceConfigBuilder {
    /// Set the enhancement service base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = Some(endpoint.into());
        self
    }

    /// Set the request path appended to the endpoint.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the multipart field name used for each image.
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.config.field_name = name.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Disable the request timeout.
    pub fn without_timeout(mut self) -> Self {
        self.config.request_timeout = None;
        self
    }

    /// Replace the progress estimator settings.
    pub fn with_progress(mut self, progress: ProgressConfig) -> Self {
        self.config.progress = progress;
        self
    }

    /// Set the pairing policy for short archives.
    pub fn with_pairing(mut self, pairing: PairingPolicy) -> Self {
        self.config.pairing = pairing;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    /// Build the final [`EnhanceConfig`].
    pub fn build(self) -> EnhanceConfig {
        self.config
    }
}
