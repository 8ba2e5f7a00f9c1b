use super::cached_data::{CachedData, CachedResult, FetchStatus};
use super::config::CacheConfig;
use super::events::{FleetData, WatchEvent, apply_watch_event};
use super::subscription::{DataUpdate, SubscriptionManager};
use crate::k8s::model::ResourceModel;
use crate::k8s::resource_error::ResourceError;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of the initial GET for a watch target.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedData {
    pub data: FleetData,
    pub resource_version: Option<String>,
}

type SharedFetch = Shared<BoxFuture<'static, Result<FetchedData, ResourceError>>>;

/// Identity of a watch socket: one socket per fingerprint, shared by every watcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchFingerprint {
    pub cluster: String,
    pub api_group: Option<String>,
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub selector: Option<String>,
}

impl WatchFingerprint {
    #[must_use]
    pub fn new(cluster: &str, model: &ResourceModel, namespace: Option<&str>, name: Option<&str>) -> Self {
        Self {
            cluster: cluster.to_string(),
            api_group: model.api_group.clone(),
            api_version: model.api_version.clone(),
            kind: model.kind.clone(),
            namespace: namespace.map(str::to_string),
            name: name.map(str::to_string),
            selector: None,
        }
    }

    /// Distinguish list watches over the same collection by their selectors.
    #[must_use]
    pub fn with_selector(mut self, selector: Option<String>) -> Self {
        self.selector = selector.filter(|s| !s.is_empty());
        self
    }
}

#[derive(Debug)]
struct SocketEntry {
    refs: usize,
    data_key: String,
    opening: bool,
    task: Option<JoinHandle<()>>,
}

/// Process-wide store of fleet watch data and the sockets feeding it.
///
/// Slots are keyed by request URL. Only the in-flight GET that owns a key
/// moves its slot from absent to populated; watch events only mutate slots
/// that already exist.
pub struct FleetResourceCache {
    slots: Arc<RwLock<HashMap<String, CachedData<FleetData>>>>,
    in_flight: Arc<AsyncMutex<HashMap<String, SharedFetch>>>,
    sockets: Arc<Mutex<HashMap<WatchFingerprint, SocketEntry>>>,
    evictions: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    pub subscription_manager: Arc<SubscriptionManager>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for FleetResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetResourceCache")
            .field("config", &self.config)
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish_non_exhaustive()
    }
}

impl Default for FleetResourceCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FleetResourceCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(AsyncMutex::new(HashMap::new())),
            sockets: Arc::new(Mutex::new(HashMap::new())),
            evictions: Arc::new(Mutex::new(HashMap::new())),
            subscription_manager: Arc::new(SubscriptionManager::new()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn config(&self) -> CacheConfig {
        self.config
    }

    fn has_live_socket(&self, key: &str) -> bool {
        lock(&self.sockets)
            .values()
            .any(|entry| entry.data_key == key && entry.task.as_ref().is_some_and(|t| !t.is_finished()))
    }

    fn is_valid(&self, key: &str, slot: &CachedData<FleetData>) -> bool {
        slot.fetch_status == FetchStatus::Fresh && (self.has_live_socket(key) || !slot.is_expired())
    }

    pub async fn get(&self, key: &str) -> Option<CachedResult> {
        let slots = self.slots.read().await;

        match slots.get(key) {
            Some(slot) if self.is_valid(key, slot) => {
                debug!("🎯 Cache HIT: {}", key);
                Some(CachedResult::loaded(slot.data.clone()))
            }
            Some(_) => {
                debug!("🔄 Cache STALE: {}", key);
                None
            }
            None => {
                debug!("❌ Cache MISS: {}", key);
                None
            }
        }
    }

    /// Current data for `key`, however old.
    pub async fn snapshot(&self, key: &str) -> Option<CachedResult> {
        self.slots
            .read()
            .await
            .get(key)
            .map(|slot| CachedResult::loaded(slot.data.clone()))
    }

    pub async fn resource_version(&self, key: &str) -> Option<String> {
        self.slots.read().await.get(key).and_then(|s| s.resource_version.clone())
    }

    pub async fn put(&self, key: &str, fetched: FetchedData) {
        store(&self.slots, &self.subscription_manager, self.config, key, fetched).await;
    }

    /// Value for `key`, fetched at most once no matter how many callers race for it.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; failures are not cached so the next call retries.
    pub async fn get_or_fetch<F>(&self, key: &str, fetch: F) -> Result<FetchedData, ResourceError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<FetchedData, ResourceError>>,
    {
        let shared = {
            let mut in_flight = self.in_flight.lock().await;

            if let Some(slot) = self.slots.read().await.get(key) {
                if self.is_valid(key, slot) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("🎯 Cache HIT: {}", key);
                    return Ok(FetchedData {
                        data: slot.data.clone(),
                        resource_version: slot.resource_version.clone(),
                    });
                }
            }

            if let Some(existing) = in_flight.get(key) {
                debug!("⏳ Joining in-flight fetch: {}", key);
                existing.clone()
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("❌ Cache MISS: {}", key);

                let slots = Arc::clone(&self.slots);
                let subscriptions = Arc::clone(&self.subscription_manager);
                let in_flight_map = Arc::clone(&self.in_flight);
                let config = self.config;
                let owned_key = key.to_string();
                let request = fetch();

                let shared = async move {
                    let result = request.await;
                    match &result {
                        Ok(fetched) => store(&slots, &subscriptions, config, &owned_key, fetched.clone()).await,
                        Err(e) => warn!("❌ Fetch failed for {}: {}", owned_key, e),
                    }
                    in_flight_map.lock().await.remove(&owned_key);
                    result
                }
                .boxed()
                .shared();

                in_flight.insert(key.to_string(), shared.clone());
                shared
            }
        };

        shared.await
    }

    /// Apply a watch event to an existing slot; events for absent slots are dropped.
    pub async fn apply_event(&self, key: &str, cluster: Option<&str>, event: &WatchEvent) -> bool {
        let result = {
            let mut slots = self.slots.write().await;
            let Some(slot) = slots.get_mut(key) else {
                debug!("⏭️ Dropping {} for unloaded {}", event.event_type(), key);
                return false;
            };
            if !apply_watch_event(&mut slot.data, cluster, event) {
                return false;
            }
            if slot.data.is_list() {
                if let Some(rv) = event
                    .object()
                    .get("metadata")
                    .and_then(|m| m.get("resourceVersion"))
                    .and_then(serde_json::Value::as_str)
                {
                    slot.resource_version = Some(rv.to_string());
                }
            }
            slot.version += 1;
            slot.touch();
            CachedResult::loaded(slot.data.clone())
        };

        debug!("⚡ WATCH UPDATE: {}", key);
        self.subscription_manager.notify(key, &result).await;
        true
    }

    pub async fn subscribe(&self, key: &str) -> (String, mpsc::Receiver<DataUpdate>) {
        self.subscription_manager.subscribe(key.to_string()).await
    }

    pub async fn unsubscribe(&self, subscription_id: &str) {
        self.subscription_manager.unsubscribe(subscription_id).await;
    }

    pub async fn invalidate(&self, key: &str) {
        let mut slots = self.slots.write().await;

        if let Some(slot) = slots.get_mut(key) {
            slot.mark_stale();
        }
    }

    pub async fn remove(&self, key: &str) {
        if self.slots.write().await.remove(key).is_some() {
            debug!("🗑️ Cache REMOVE: {}", key);
        }
    }

    pub async fn clear(&self) {
        self.slots.write().await.clear();
        for (_, entry) in lock(&self.sockets).drain() {
            if let Some(task) = entry.task {
                task.abort();
            }
        }
        for (_, eviction) in lock(&self.evictions).drain() {
            eviction.abort();
        }
    }

    /// Drop expired slots that no live socket keeps current.
    pub async fn clear_expired(&self) -> usize {
        let live: Vec<String> = lock(&self.sockets)
            .values()
            .filter(|e| e.task.as_ref().is_some_and(|t| !t.is_finished()))
            .map(|e| e.data_key.clone())
            .collect();

        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|key, slot| live.contains(key) || !slot.is_expired());
        let removed = before - slots.len();
        if removed > 0 {
            info!("🧹 Cleared {} expired cache entries", removed);
        }
        removed
    }

    /// Register interest in `fingerprint`'s socket and cancel any pending eviction of `data_key`.
    pub fn acquire_socket(&self, fingerprint: &WatchFingerprint, data_key: &str) {
        if let Some(eviction) = lock(&self.evictions).remove(data_key) {
            debug!("♻️ Cancelled eviction of {}", data_key);
            eviction.abort();
        }

        let mut sockets = lock(&self.sockets);
        let entry = sockets.entry(fingerprint.clone()).or_insert_with(|| SocketEntry {
            refs: 0,
            data_key: data_key.to_string(),
            opening: false,
            task: None,
        });
        entry.refs += 1;
        debug!("🔗 Watching {:?} (refs: {})", fingerprint, entry.refs);
    }

    /// Claim the job of opening `fingerprint`'s socket. `true` only while the
    /// fingerprint is referenced and no socket is live or being opened; the
    /// winner hands the socket over with [`Self::attach_socket`].
    pub fn claim_socket(&self, fingerprint: &WatchFingerprint) -> bool {
        let mut sockets = lock(&self.sockets);
        let Some(entry) = sockets.get_mut(fingerprint) else {
            return false;
        };
        let alive = entry.task.as_ref().is_some_and(|t| !t.is_finished());
        if alive || entry.opening {
            debug!("🔗 Reusing socket for {:?}", fingerprint);
            return false;
        }
        entry.opening = true;
        true
    }

    pub fn attach_socket(&self, fingerprint: &WatchFingerprint, task: JoinHandle<()>) {
        let mut sockets = lock(&self.sockets);
        match sockets.get_mut(fingerprint) {
            Some(entry) => {
                entry.opening = false;
                entry.task = Some(task);
            }
            None => task.abort(),
        }
    }

    /// The socket closed: forget it so the next activation reopens it. Data stays cached.
    pub fn socket_closed(&self, fingerprint: &WatchFingerprint) {
        if let Some(entry) = lock(&self.sockets).get_mut(fingerprint) {
            info!("🔌 Watch socket closed for {:?}", fingerprint);
            entry.opening = false;
            entry.task = None;
        }
    }

    /// Opening failed; let a later activation try again.
    pub fn socket_failed(&self, fingerprint: &WatchFingerprint) {
        self.socket_closed(fingerprint);
    }

    /// Drop one reference. The last one closes the socket and schedules eviction
    /// of its data after TTL plus grace.
    pub fn release_socket(&self, fingerprint: &WatchFingerprint) {
        let released = {
            let mut sockets = lock(&self.sockets);
            let Some(entry) = sockets.get_mut(fingerprint) else {
                return;
            };
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs > 0 {
                return;
            }
            sockets.remove(fingerprint)
        };

        let Some(entry) = released else { return };
        if let Some(task) = entry.task {
            info!("🔌 Closing watch socket for {:?}", fingerprint);
            task.abort();
        }
        self.schedule_eviction(entry.data_key);
    }

    fn schedule_eviction(&self, data_key: String) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("⚠️ No runtime to schedule eviction of {}", data_key);
            return;
        };

        let slots = Arc::clone(&self.slots);
        let evictions = Arc::clone(&self.evictions);
        let delay = self.config.eviction_delay();
        let key = data_key.clone();

        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            slots.write().await.remove(&key);
            lock(&evictions).remove(&key);
            debug!("🧹 Evicted {}", key);
        });

        if let Some(previous) = lock(&self.evictions).insert(data_key, task) {
            previous.abort();
        }
    }

    #[must_use]
    pub fn ref_count(&self, fingerprint: &WatchFingerprint) -> usize {
        lock(&self.sockets).get(fingerprint).map_or(0, |e| e.refs)
    }

    #[must_use]
    pub fn has_socket(&self, fingerprint: &WatchFingerprint) -> bool {
        lock(&self.sockets)
            .get(fingerprint)
            .is_some_and(|e| e.task.as_ref().is_some_and(|t| !t.is_finished()))
    }

    #[allow(clippy::significant_drop_tightening)]
    pub async fn stats(&self) -> CacheStats {
        let open_sockets = lock(&self.sockets).values().filter(|e| e.task.is_some()).count();
        let in_flight = self.in_flight.lock().await.len();
        let slots = self.slots.read().await;

        CacheStats {
            total_entries: slots.len(),
            fresh_entries: slots.values().filter(|s| s.is_fresh()).count(),
            stale_entries: slots
                .values()
                .filter(|s| matches!(s.fetch_status, FetchStatus::Stale))
                .count(),
            in_flight,
            open_sockets,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

async fn store(
    slots: &RwLock<HashMap<String, CachedData<FleetData>>>,
    subscriptions: &SubscriptionManager,
    config: CacheConfig,
    key: &str,
    fetched: FetchedData,
) {
    info!("💾 Cache STORE: {} ({} items, TTL: {}s)", key, fetched.data.len(), config.ttl.as_secs());
    let result = CachedResult::loaded(fetched.data.clone());
    slots.write().await.insert(
        key.to_string(),
        CachedData::new(fetched.data, config.ttl).with_resource_version(fetched.resource_version),
    );
    subscriptions.notify(key, &result).await;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub fresh_entries: usize,
    pub stale_entries: usize,
    pub in_flight: usize,
    pub open_sockets: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}
