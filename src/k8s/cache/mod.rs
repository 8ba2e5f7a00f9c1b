pub mod cached_data;
pub mod config;
pub mod data_cache;
pub mod events;
pub mod subscription;
pub mod watch_manager;

pub use cached_data::{CachedData, CachedResult, FetchStatus};
pub use config::CacheConfig;
pub use data_cache::{CacheStats, FetchedData, FleetResourceCache, WatchFingerprint};
pub use events::{FleetData, WatchEvent, apply_watch_event};
pub use subscription::{DataUpdate, Subscription, SubscriptionManager};
pub use watch_manager::{FleetWatchHandle, FleetWatchSet, FleetWatcher, WatchResource};
