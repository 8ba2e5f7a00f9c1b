use super::events::FleetData;
use crate::k8s::resource_error::ResourceError;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CachedData<T> {
    pub data: T,
    pub last_updated: Instant,
    pub ttl: Duration,
    pub fetch_status: FetchStatus,
    pub resource_version: Option<String>,
    pub version: u64, // bumped by every watch event applied
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Fresh,
    Stale,
}

impl<T> CachedData<T> {
    pub fn new(data: T, ttl: Duration) -> Self {
        Self {
            data,
            last_updated: Instant::now(),
            ttl,
            fetch_status: FetchStatus::Fresh,
            resource_version: None,
            version: 0,
        }
    }

    #[must_use]
    pub fn with_resource_version(mut self, resource_version: Option<String>) -> Self {
        self.resource_version = resource_version;
        self
    }

    pub fn is_expired(&self) -> bool {
        self.last_updated.elapsed() > self.ttl
    }

    pub fn is_fresh(&self) -> bool {
        !self.is_expired() && matches!(self.fetch_status, FetchStatus::Fresh)
    }

    pub fn age(&self) -> Duration {
        self.last_updated.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_updated = Instant::now();
    }

    pub fn update(&mut self, data: T) {
        self.data = data;
        self.last_updated = Instant::now();
        self.fetch_status = FetchStatus::Fresh;
        self.version += 1;
    }

    pub fn mark_stale(&mut self) {
        self.fetch_status = FetchStatus::Stale;
    }
}

/// What a watcher sees: `[data, loaded, loadError]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    pub data: FleetData,
    pub loaded: bool,
    pub load_error: Option<ResourceError>,
}

impl CachedResult {
    #[must_use]
    pub const fn loading(is_list: bool) -> Self {
        Self {
            data: FleetData::empty(is_list),
            loaded: false,
            load_error: None,
        }
    }

    #[must_use]
    pub const fn loaded(data: FleetData) -> Self {
        Self {
            data,
            loaded: true,
            load_error: None,
        }
    }

    #[must_use]
    pub const fn failed(is_list: bool, error: ResourceError) -> Self {
        Self {
            data: FleetData::empty(is_list),
            loaded: false,
            load_error: Some(error),
        }
    }
}
