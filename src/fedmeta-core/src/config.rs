//! Configuration for a metadata resolver.
//!
//! A [`ResolverConfig`] is produced once by [`ResolverConfigBuilder::build`]
//! and never changes afterwards; a running resolver has no setters.

use std::time::Duration;

use crate::error::MetadataError;
use crate::source::MetadataSource;

/// Default lower bound on the refresh delay.
pub const DEFAULT_MIN_REFRESH_DELAY: Duration = Duration::from_secs(5 * 60);

/// Default upper bound on the refresh delay.
pub const DEFAULT_MAX_REFRESH_DELAY: Duration = Duration::from_secs(4 * 60 * 60);

/// Default fraction of the remaining validity to wait before refreshing.
pub const DEFAULT_REFRESH_DELAY_FACTOR: f64 = 0.75;

/// Default per-request fetch timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a metadata resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Identifier used in logs and error messages.
    pub id: String,
    /// Where metadata is read from.
    pub source: MetadataSource,
    /// Fail initialization if the first refresh fails.
    pub fail_fast_initialization: bool,
    /// Exclude entities whose validity window does not contain now.
    pub require_valid_metadata: bool,
    /// Lower bound on the delay between refreshes.
    pub min_refresh_delay: Duration,
    /// Upper bound on the delay between refreshes.
    pub max_refresh_delay: Duration,
    /// Fraction of the time remaining until the earliest expiration to wait.
    pub refresh_delay_factor: f64,
    /// Delay after a failed refresh.
    pub failure_refresh_delay: Duration,
    /// Maximum random amount subtracted from each success delay.
    pub refresh_jitter: Duration,
    /// Timeout applied to each fetch.
    pub request_timeout: Duration,
    /// Run the scheduled background refresh task.
    pub background_refresh: bool,
}

impl ResolverConfig {
    /// Start building a configuration.
    #[must_use]
    pub fn builder(id: impl Into<String>, source: MetadataSource) -> ResolverConfigBuilder {
        ResolverConfigBuilder::new(id, source)
    }
}

/// Builder for [`ResolverConfig`].
#[derive(Debug, Clone)]
pub struct ResolverConfigBuilder {
    config: ResolverConfig,
    failure_delay_set: bool,
}

impl ResolverConfigBuilder {
    /// Create a builder with default values.
    #[must_use]
    pub fn new(id: impl Into<String>, source: MetadataSource) -> Self {
        Self {
            config: ResolverConfig {
                id: id.into(),
                source,
                fail_fast_initialization: true,
                require_valid_metadata: false,
                min_refresh_delay: DEFAULT_MIN_REFRESH_DELAY,
                max_refresh_delay: DEFAULT_MAX_REFRESH_DELAY,
                refresh_delay_factor: DEFAULT_REFRESH_DELAY_FACTOR,
                failure_refresh_delay: DEFAULT_MIN_REFRESH_DELAY,
                refresh_jitter: Duration::ZERO,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
                background_refresh: true,
            },
            failure_delay_set: false,
        }
    }

    /// Set whether a failed first refresh aborts initialization.
    #[must_use]
    pub fn fail_fast_initialization(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast_initialization = fail_fast;
        self
    }

    /// Set whether expired or not-yet-valid entities are excluded.
    #[must_use]
    pub fn require_valid_metadata(mut self, require: bool) -> Self {
        self.config.require_valid_metadata = require;
        self
    }

    /// Set the minimum refresh delay.
    ///
    /// Unless set explicitly, the failure delay follows this value.
    #[must_use]
    pub fn min_refresh_delay(mut self, delay: Duration) -> Self {
        self.config.min_refresh_delay = delay;
        self
    }

    /// Set the maximum refresh delay.
    #[must_use]
    pub fn max_refresh_delay(mut self, delay: Duration) -> Self {
        self.config.max_refresh_delay = delay;
        self
    }

    /// Set the refresh delay factor, in (0, 1).
    #[must_use]
    pub fn refresh_delay_factor(mut self, factor: f64) -> Self {
        self.config.refresh_delay_factor = factor;
        self
    }

    /// Set the delay after a failed refresh.
    #[must_use]
    pub fn failure_refresh_delay(mut self, delay: Duration) -> Self {
        self.config.failure_refresh_delay = delay;
        self.failure_delay_set = true;
        self
    }

    /// Set the maximum random jitter subtracted from success delays.
    #[must_use]
    pub fn refresh_jitter(mut self, jitter: Duration) -> Self {
        self.config.refresh_jitter = jitter;
        self
    }

    /// Set the per-fetch timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Enable or disable the scheduled background refresh.
    #[must_use]
    pub fn background_refresh(mut self, enabled: bool) -> Self {
        self.config.background_refresh = enabled;
        self
    }

    /// Validate and produce the configuration.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::Configuration` if any value is out of range.
    pub fn build(self) -> Result<ResolverConfig, MetadataError> {
        let mut config = self.config;
        if !self.failure_delay_set {
            config.failure_refresh_delay = config.min_refresh_delay;
        }

        if config.id.trim().is_empty() {
            return Err(MetadataError::configuration("Resolver id must not be empty"));
        }
        if config.min_refresh_delay.is_zero() {
            return Err(MetadataError::configuration(
                "Minimum refresh delay must be greater than zero",
            ));
        }
        if config.min_refresh_delay > config.max_refresh_delay {
            return Err(MetadataError::configuration(format!(
                "Minimum refresh delay {:?} exceeds maximum {:?}",
                config.min_refresh_delay, config.max_refresh_delay
            )));
        }
        if !(config.refresh_delay_factor > 0.0 && config.refresh_delay_factor < 1.0) {
            return Err(MetadataError::configuration(format!(
                "Refresh delay factor must be between 0 and 1 exclusive, got {}",
                config.refresh_delay_factor
            )));
        }
        if config.failure_refresh_delay.is_zero()
            || config.failure_refresh_delay > config.max_refresh_delay
        {
            return Err(MetadataError::configuration(format!(
                "Failure refresh delay {:?} must be non-zero and at most {:?}",
                config.failure_refresh_delay, config.max_refresh_delay
            )));
        }
        if config.request_timeout.is_zero() {
            return Err(MetadataError::configuration(
                "Request timeout must be greater than zero",
            ));
        }

        Ok(config)
    }
}
