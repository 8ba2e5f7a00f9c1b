/**
 * Configuration constants for the fleet watch-resource cache
 */
use std::time::Duration;

/// How long an entry without a live socket stays valid, in seconds
pub const CACHE_TTL_SECONDS: u64 = 30;

/// Extra time after the last watcher detaches before the entry is evicted, in seconds
pub const EVICTION_GRACE_SECONDS: u64 = 10;

/// Hub passthrough watch timeout in seconds (294 vs 300 to allow 6 seconds for graceful shutdown)
pub const WATCH_TIMEOUT_SECONDS: u32 = 294;

/// Maximum number of restart attempts for hub watch streams
pub const MAX_WATCH_RESTARTS: u32 = 50;

/// Maximum backoff time in seconds between restart attempts
pub const MAX_BACKOFF_SECONDS: u64 = 60;

/// Initial backoff time in seconds
pub const INITIAL_BACKOFF_SECONDS: u64 = 1;

/// Buffer of each subscriber's update channel
pub const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 16;

/// Interval between fleet configuration polls in seconds
pub const HUB_POLL_INTERVAL_SECONDS: u64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub grace: Duration,
}

impl CacheConfig {
    /// Delay between the last release of a socket and eviction of its data.
    #[must_use]
    pub fn eviction_delay(&self) -> Duration {
        self.ttl + self.grace
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(CACHE_TTL_SECONDS),
            grace: Duration::from_secs(EVICTION_GRACE_SECONDS),
        }
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(CACHE_TTL_SECONDS > 0, "CACHE_TTL_SECONDS must be greater than 0");
    assert!(WATCH_TIMEOUT_SECONDS > 0, "WATCH_TIMEOUT_SECONDS must be greater than 0");
    assert!(MAX_WATCH_RESTARTS > 0, "MAX_WATCH_RESTARTS must be greater than 0");
    assert!(MAX_BACKOFF_SECONDS > 0, "MAX_BACKOFF_SECONDS must be greater than 0");
    assert!(INITIAL_BACKOFF_SECONDS > 0, "INITIAL_BACKOFF_SECONDS must be greater than 0");
    assert!(
        INITIAL_BACKOFF_SECONDS <= MAX_BACKOFF_SECONDS,
        "INITIAL_BACKOFF_SECONDS must not exceed MAX_BACKOFF_SECONDS"
    );
    assert!(SUBSCRIPTION_CHANNEL_CAPACITY > 0, "SUBSCRIPTION_CHANNEL_CAPACITY must be greater than 0");
    assert!(HUB_POLL_INTERVAL_SECONDS > 0, "HUB_POLL_INTERVAL_SECONDS must be greater than 0");
};
