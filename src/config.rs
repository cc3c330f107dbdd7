//! Configuration and limits for WebSocket connections.

use std::time::Duration;

use thiserror::Error;

/// Default maximum size of a message, fragmented or not: 1 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1 << 20;

/// Versions of the WebSocket protocol accepted during the handshake.
pub const SUPPORTED_VERSIONS: &[&str] = &["13"];

/// Errors raised while loading configuration from the environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be parsed.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },
}

/// Resource limits for incoming data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a message in bytes, whether it is sent as one frame
    /// or many fragmented ones.
    ///
    /// Default: 1 MiB
    pub max_message_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Validate a declared frame payload length before reading the body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`](crate::Error::PayloadTooLarge) if `size` exceeds the maximum.
    pub const fn check_payload_size(&self, size: u64) -> Result<(), crate::Error> {
        if size > self.max_message_size as u64 {
            Err(crate::Error::PayloadTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a reassembled message is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if `size` exceeds the maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Sliding-window rate limit applied to incoming frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// How many frames can be received in excess of the average rate.
    ///
    /// Default: 10. Zero disables rate limiting.
    pub burst: usize,

    /// Minimum average delay between two frames.
    ///
    /// Default: 200 ms
    pub delay: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            burst: 10,
            delay: Duration::from_millis(200),
        }
    }
}

impl RateLimit {
    /// Largest burst accepted from the environment.
    pub const MAX_BURST: usize = 10_000;

    /// Create a new rate limit.
    #[must_use]
    pub const fn new(burst: usize, delay: Duration) -> Self {
        Self { burst, delay }
    }
}

/// Bounded retry policy for acquiring pooled resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolRetry {
    /// Number of attempts before giving up.
    ///
    /// Default: 10
    pub attempts: usize,

    /// Base delay; attempt `n` waits a random duration in `[base, base * n]`.
    ///
    /// Default: 30 ms
    pub base_delay: Duration,
}

impl Default for PoolRetry {
    fn default() -> Self {
        Self {
            attempts: 10,
            base_delay: Duration::from_millis(30),
        }
    }
}

/// Notification bus configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Incoming frame rate limit.
    pub rate_limit: RateLimit,

    /// Base lifetime of a connection. Each connection adds a random jitter of
    /// up to half this value so that idle connections do not expire together.
    ///
    /// Default: 3600 seconds
    pub keep_alive_timeout: Duration,

    /// Idle time after which intermediaries are expected to drop the
    /// connection. A PING is sent if nothing happened for 15 seconds less.
    ///
    /// Default: 60 seconds
    pub connection_timeout: Duration,

    /// How long to wait for the answer to a PING or CLOSE frame.
    ///
    /// Default: 15 seconds
    pub response_timeout: Duration,

    /// How long delivered notification ids are remembered for deduplication.
    ///
    /// Default: 10 seconds
    pub notification_history: Duration,

    /// Version of the client worker bundle. Clients reporting another version
    /// are closed right after the upgrade.
    pub worker_version: String,

    /// Downgrade cross-site WebSocket sessions to fresh anonymous sessions.
    ///
    /// Default: false
    pub same_site_only: bool,

    /// Retry policy used when the notification store's pool is exhausted.
    pub pool_retry: PoolRetry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            rate_limit: RateLimit::default(),
            keep_alive_timeout: Duration::from_secs(3600),
            connection_timeout: Duration::from_secs(60),
            response_timeout: Duration::from_secs(15),
            notification_history: Duration::from_secs(10),
            worker_version: "1".to_string(),
            same_site_only: false,
            pool_retry: PoolRetry::default(),
        }
    }
}

impl Config {
    /// Create a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the default configuration overlaid with `WSBUS_*` environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parse<T: std::str::FromStr>(
            name: &'static str,
            value: String,
        ) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { name, value })
        }

        let mut config = Self::default();
        if let Some(value) = lookup("WSBUS_KEEP_ALIVE_TIMEOUT") {
            config.keep_alive_timeout =
                Duration::from_secs(parse("WSBUS_KEEP_ALIVE_TIMEOUT", value)?);
        }
        if let Some(value) = lookup("WSBUS_RATE_LIMIT_BURST") {
            let burst: usize = parse("WSBUS_RATE_LIMIT_BURST", value.clone())?;
            if burst > RateLimit::MAX_BURST {
                return Err(ConfigError::InvalidValue {
                    name: "WSBUS_RATE_LIMIT_BURST",
                    value,
                });
            }
            config.rate_limit.burst = burst;
        }
        if let Some(value) = lookup("WSBUS_RATE_LIMIT_DELAY") {
            let secs: f64 = parse("WSBUS_RATE_LIMIT_DELAY", value.clone())?;
            config.rate_limit.delay = Duration::try_from_secs_f64(secs).map_err(|_| {
                ConfigError::InvalidValue {
                    name: "WSBUS_RATE_LIMIT_DELAY",
                    value,
                }
            })?;
        }
        if let Some(value) = lookup("WSBUS_PUBLIC_SAMESITE_WS") {
            config.same_site_only = !value.is_empty();
        }
        if let Some(value) = lookup("WSBUS_WORKER_VERSION") {
            config.worker_version = value;
        }
        Ok(config)
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the incoming frame rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Set the base keep-alive timeout.
    #[must_use]
    pub fn with_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// Set the intermediary idle timeout.
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the PING/CLOSE response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the notification deduplication window.
    #[must_use]
    pub fn with_notification_history(mut self, window: Duration) -> Self {
        self.notification_history = window;
        self
    }

    /// Set the expected client worker version.
    #[must_use]
    pub fn with_worker_version(mut self, version: impl Into<String>) -> Self {
        self.worker_version = version.into();
        self
    }

    /// Enable or disable cross-site session downgrade.
    #[must_use]
    pub fn with_same_site_only(mut self, enabled: bool) -> Self {
        self.same_site_only = enabled;
        self
    }

    /// Set the pool retry policy.
    #[must_use]
    pub fn with_pool_retry(mut self, retry: PoolRetry) -> Self {
        self.pool_retry = retry;
        self
    }

    /// Time without any traffic after which an unsolicited PING is sent.
    #[must_use]
    pub fn inactivity_timeout(&self) -> Duration {
        self.connection_timeout
            .saturating_sub(Duration::from_secs(15))
            .max(Duration::from_secs(1))
    }
}
