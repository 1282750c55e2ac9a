//! Engine configuration
//!
//! Loaded from environment variables, with builder methods for overrides.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Smallest capacity a pool may have
pub const MIN_CAPACITY: usize = 1;

/// Absolute ceiling on pool capacity
pub const MAX_CAPACITY: usize = 50;

/// Configuration shared by the pool manager, its pools and the resize engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Capacity used when a pool is created without one
    pub default_capacity: usize,

    /// Global bound on resizes running at the same time (across all pools)
    pub max_concurrent_resizes: usize,

    /// How long a resize waits for a global permit before failing with `Busy`
    #[serde(with = "duration_millis")]
    pub acquire_timeout: Duration,

    /// How long a resize waits for the old pool's running tasks before
    /// leaving its retirement to a background task
    #[serde(with = "duration_millis")]
    pub retire_timeout: Duration,

    /// Graceful pool shutdown timeout
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,

    /// Bound on pending tasks per pool (None = unbounded)
    pub max_queue_depth: Option<usize>,

    /// Interval of the background cleanup of terminal tasks
    #[serde(with = "duration_millis")]
    pub cleanup_interval: Duration,

    /// How long a submission keeps retrying while its pool is being replaced
    #[serde(with = "duration_millis")]
    pub redirect_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_capacity: 5,
            max_concurrent_resizes: 1,
            acquire_timeout: Duration::from_secs(5),
            retire_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_queue_depth: None,
            cleanup_interval: Duration::from_secs(300),
            redirect_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `POOLSHIFT_DEFAULT_CAPACITY`: capacity for new pools (default: 5)
    /// - `POOLSHIFT_MAX_CONCURRENT_RESIZES`: global resize permits (default: 1)
    /// - `POOLSHIFT_ACQUIRE_TIMEOUT_MS`: resize permit wait (default: 5000)
    /// - `POOLSHIFT_RETIRE_TIMEOUT_MS`: wait for the old pool to go idle (default: 30000)
    /// - `POOLSHIFT_SHUTDOWN_TIMEOUT_MS`: graceful shutdown wait (default: 30000)
    /// - `POOLSHIFT_MAX_QUEUE_DEPTH`: pending task bound per pool (default: unbounded)
    /// - `POOLSHIFT_CLEANUP_INTERVAL_MS`: terminal task cleanup interval (default: 300000)
    /// - `POOLSHIFT_REDIRECT_TIMEOUT_MS`: submission retry window during a resize (default: 5000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            default_capacity: env_parse("POOLSHIFT_DEFAULT_CAPACITY")
                .unwrap_or(defaults.default_capacity)
                .clamp(MIN_CAPACITY, MAX_CAPACITY),
            max_concurrent_resizes: env_parse("POOLSHIFT_MAX_CONCURRENT_RESIZES")
                .unwrap_or(defaults.max_concurrent_resizes)
                .max(1),
            acquire_timeout: env_millis("POOLSHIFT_ACQUIRE_TIMEOUT_MS")
                .unwrap_or(defaults.acquire_timeout),
            retire_timeout: env_millis("POOLSHIFT_RETIRE_TIMEOUT_MS")
                .unwrap_or(defaults.retire_timeout),
            shutdown_timeout: env_millis("POOLSHIFT_SHUTDOWN_TIMEOUT_MS")
                .unwrap_or(defaults.shutdown_timeout),
            max_queue_depth: env_parse("POOLSHIFT_MAX_QUEUE_DEPTH"),
            cleanup_interval: env_millis("POOLSHIFT_CLEANUP_INTERVAL_MS")
                .unwrap_or(defaults.cleanup_interval),
            redirect_timeout: env_millis("POOLSHIFT_REDIRECT_TIMEOUT_MS")
                .unwrap_or(defaults.redirect_timeout),
        }
    }

    /// Set the default pool capacity
    pub fn with_default_capacity(mut self, capacity: usize) -> Self {
        self.default_capacity = capacity.clamp(MIN_CAPACITY, MAX_CAPACITY);
        self
    }

    /// Set the global resize permit count
    pub fn with_max_concurrent_resizes(mut self, max: usize) -> Self {
        self.max_concurrent_resizes = max.max(1);
        self
    }

    /// Set the resize permit wait
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the wait for the old pool to go idle during a resize
    pub fn with_retire_timeout(mut self, timeout: Duration) -> Self {
        self.retire_timeout = timeout;
        self
    }

    /// Set the graceful shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Bound the pending queue of every pool
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = Some(depth);
        self
    }

    /// Set the background cleanup interval
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the submission retry window used while a pool is replaced
    pub fn with_redirect_timeout(mut self, timeout: Duration) -> Self {
        self.redirect_timeout = timeout;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = env::var(key).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %value, "ignoring unparseable configuration value");
            None
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

/// Serde support for Duration as milliseconds
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
