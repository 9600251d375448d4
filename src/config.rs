//! Limiter configuration and validation.
//!
//! ```
//! use callgate::LimiterConfig;
//! use std::time::Duration;
//!
//! let config = LimiterConfig::builder()
//!     .call_limit(50)
//!     .refresh_period(Duration::from_secs(5))
//!     .min_interval(Duration::from_secs(1))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.max_concurrency(), 10);
//! ```

use std::time::Duration;

/// Calls allowed per window unless overridden.
pub const DEFAULT_CALL_LIMIT: u32 = 1000;
/// One hour.
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;
/// Largest worker count the executor can track.
pub const MAX_CONCURRENCY_LIMIT: usize = 1 << 24;

/// Errors produced when validating limiter configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("call_limit must be > 0 (got {0})")]
    InvalidCallLimit(u32),
    #[error("refresh_period must be > 0 (got {0:?})")]
    InvalidRefreshPeriod(Duration),
    #[error("max_concurrency must be between 1 and 16777216 (got {0})")]
    InvalidMaxConcurrency(usize),
    #[error("max_queue must be > 0 when set (got {0})")]
    InvalidMaxQueue(usize),
    #[error("call_timeout must be > 0 when set (got {0:?})")]
    InvalidCallTimeout(Duration),
}

/// The three quota knobs that may change while a controller is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuotaLimits {
    /// Maximum admissions per window.
    pub call_limit: u32,
    /// Window length.
    pub refresh_period: Duration,
    /// Minimum spacing between two admissions; zero disables spacing.
    pub min_interval: Duration,
}

impl QuotaLimits {
    pub fn new(call_limit: u32, refresh_period: Duration, min_interval: Duration) -> Self {
        Self { call_limit, refresh_period, min_interval }
    }

    /// Validate the limits; `min_interval` may be zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_limit == 0 {
            return Err(ConfigError::InvalidCallLimit(0));
        }
        if self.refresh_period == Duration::ZERO {
            return Err(ConfigError::InvalidRefreshPeriod(self.refresh_period));
        }
        Ok(())
    }
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            call_limit: DEFAULT_CALL_LIMIT,
            refresh_period: DEFAULT_REFRESH_PERIOD,
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

/// Validated configuration for an [`AdmissionController`](crate::AdmissionController).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LimiterConfig {
    limits: QuotaLimits,
    max_concurrency: usize,
    max_queue: Option<usize>,
    call_timeout: Option<Duration>,
}

impl LimiterConfig {
    /// Create a config with validation. Queue is unbounded and calls have no timeout.
    pub fn new(
        call_limit: u32,
        refresh_period: Duration,
        min_interval: Duration,
        max_concurrency: usize,
    ) -> Result<Self, ConfigError> {
        Self::builder()
            .call_limit(call_limit)
            .refresh_period(refresh_period)
            .min_interval(min_interval)
            .max_concurrency(max_concurrency)
            .build()
    }

    pub fn builder() -> LimiterConfigBuilder {
        LimiterConfigBuilder::new()
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    pub fn call_limit(&self) -> u32 {
        self.limits.call_limit
    }

    pub fn refresh_period(&self) -> Duration {
        self.limits.refresh_period
    }

    pub fn min_interval(&self) -> Duration {
        self.limits.min_interval
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Maximum number of admitted calls waiting for a worker slot; `None` is unbounded.
    pub fn max_queue(&self) -> Option<usize> {
        self.max_queue
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// Assemble a config from values already known to be valid.
    pub(crate) fn from_parts(
        limits: QuotaLimits,
        max_concurrency: usize,
        max_queue: Option<usize>,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self { limits, max_concurrency, max_queue, call_timeout }
    }

    /// Re-run validation, e.g. after deserializing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        if self.max_concurrency == 0 || self.max_concurrency > MAX_CONCURRENCY_LIMIT {
            return Err(ConfigError::InvalidMaxConcurrency(self.max_concurrency));
        }
        if let Some(0) = self.max_queue {
            return Err(ConfigError::InvalidMaxQueue(0));
        }
        if let Some(timeout) = self.call_timeout {
            if timeout == Duration::ZERO {
                return Err(ConfigError::InvalidCallTimeout(timeout));
            }
        }
        Ok(())
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            limits: QuotaLimits::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_queue: None,
            call_timeout: None,
        }
    }
}

/// Builder for [`LimiterConfig`].
#[derive(Debug, Clone, Default)]
pub struct LimiterConfigBuilder {
    config: LimiterConfig,
}

impl LimiterConfigBuilder {
    /// Start from the defaults: 1000 calls per hour, 500ms spacing, 10 workers.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_limit(mut self, call_limit: u32) -> Self {
        self.config.limits.call_limit = call_limit;
        self
    }

    pub fn refresh_period(mut self, refresh_period: Duration) -> Self {
        self.config.limits.refresh_period = refresh_period;
        self
    }

    /// Set the minimum spacing between admissions. `Duration::ZERO` disables spacing.
    pub fn min_interval(mut self, min_interval: Duration) -> Self {
        self.config.limits.min_interval = min_interval;
        self
    }

    pub fn limits(mut self, limits: QuotaLimits) -> Self {
        self.config.limits = limits;
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.max_concurrency = max_concurrency;
        self
    }

    /// Bound the queue of admitted calls waiting for a worker.
    pub fn max_queue(mut self, max_queue: usize) -> Self {
        self.config.max_queue = Some(max_queue);
        self
    }

    pub fn unbounded_queue(mut self) -> Self {
        self.config.max_queue = None;
        self
    }

    /// Fail a running call with [`LimiterError::Timeout`](crate::LimiterError::Timeout) once it exceeds `timeout`.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    /// Build the config, validating inputs.
    pub fn build(self) -> Result<LimiterConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
