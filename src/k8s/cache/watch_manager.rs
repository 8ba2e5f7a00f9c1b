/**
 * Fleet Watch Manager
 *
 * Binds watch targets to the shared cache: the first activation of a target
 * issues the GET, later ones reuse the slot, and one socket per fingerprint
 * folds live events into it. Hub targets are handed to the native watcher.
 */
use super::cached_data::CachedResult;
use super::data_cache::{FetchedData, FleetResourceCache, WatchFingerprint};
use super::events::{FleetData, WatchEvent};
use super::subscription::DataUpdate;
use crate::k8s::HUB_API_PATH;
use crate::k8s::fleet_config::FleetConfigService;
use crate::k8s::hub::{HubClient, HubWatch};
use crate::k8s::model::ResourceModel;
use crate::k8s::request::FetchClient;
use crate::k8s::resource_error::ResourceError;
use crate::k8s::selector::{LabelSelector, selector_to_string};
use crate::k8s::url::{PathOptions, build_resource_url, fleet_api_path, is_remote_cluster};
use crate::k8s::watch::{WatchQuery, WatchSocket, WatchSocketFactory};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to watch: a collection (`is_list`) or one named object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchResource {
    pub model: ResourceModel,
    pub is_list: bool,
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub selector: Option<LabelSelector>,
    pub field_selector: Option<String>,
}

impl WatchResource {
    #[must_use]
    pub const fn list(model: ResourceModel) -> Self {
        Self {
            model,
            is_list: true,
            cluster: None,
            namespace: None,
            name: None,
            selector: None,
            field_selector: None,
        }
    }

    #[must_use]
    pub fn single(model: ResourceModel, name: &str) -> Self {
        Self {
            is_list: false,
            name: Some(name.to_string()),
            ..Self::list(model)
        }
    }

    #[must_use]
    pub fn cluster(mut self, cluster: &str) -> Self {
        self.cluster = Some(cluster.to_string());
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    #[must_use]
    pub fn selector(mut self, selector: LabelSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    #[must_use]
    pub fn field_selector(mut self, field_selector: &str) -> Self {
        self.field_selector = Some(field_selector.to_string());
        self
    }

    fn label_selector(&self) -> Option<String> {
        self.selector
            .as_ref()
            .filter(|s| self.is_list && !s.is_empty())
            .map(selector_to_string)
    }

    /// URL of the initial GET, which is also the cache key. Lists ignore `name`.
    #[must_use]
    pub fn request_path(&self, base: &str) -> String {
        let mut options = PathOptions::namespaced(self.namespace.as_deref());
        if self.is_list {
            if let Some(selector) = self.label_selector() {
                options.query_params.push(("labelSelector".to_string(), selector));
            }
            if let Some(fields) = self.field_selector.as_ref().filter(|f| !f.is_empty()) {
                options.query_params.push(("fieldSelector".to_string(), fields.clone()));
            }
        } else {
            options.name = self.name.clone();
        }
        build_resource_url(base, &self.model, &options)
    }

    /// Lists resume from `resource_version`; single objects are pinned by name.
    #[must_use]
    pub fn watch_query(&self, resource_version: Option<String>) -> WatchQuery {
        let mut query = WatchQuery {
            ns: self.namespace.clone(),
            name: self.name.clone(),
            cluster: self.cluster.clone(),
            ..WatchQuery::default()
        };
        if self.is_list {
            query.label_selector = self.selector.clone();
            query.field_selector = self.field_selector.clone();
            query.resource_version = resource_version;
        } else if let Some(name) = &self.name {
            query.field_selector = Some(format!("metadata.name={name}"));
        }
        query
    }

    #[must_use]
    pub fn fingerprint(&self, hub: &str) -> WatchFingerprint {
        let cluster = self.cluster.as_deref().unwrap_or(hub);
        let name = if self.is_list { None } else { self.name.as_deref() };
        let selector = if self.is_list {
            let fields = self.field_selector.clone().filter(|f| !f.is_empty());
            match (self.label_selector(), fields) {
                (Some(labels), Some(fields)) => Some(format!("{labels};{fields}")),
                (labels, fields) => labels.or(fields),
            }
        } else {
            None
        };
        WatchFingerprint::new(cluster, &self.model, self.namespace.as_deref(), name).with_selector(selector)
    }
}

/// Drops one socket reference when the watcher goes away.
struct SocketLease {
    cache: Arc<FleetResourceCache>,
    fingerprint: WatchFingerprint,
}

impl Drop for SocketLease {
    fn drop(&mut self) {
        self.cache.release_socket(&self.fingerprint);
    }
}

enum Driver {
    Idle,
    Hub(JoinHandle<()>),
    Fleet {
        cancel: CancellationToken,
        _lease: SocketLease,
    },
}

/// A running watch. Dropping it (or calling [`Self::stop`]) detaches it.
pub struct FleetWatchHandle {
    state: watch::Receiver<CachedResult>,
    driver: Driver,
}

impl FleetWatchHandle {
    fn idle() -> Self {
        let (_, state) = watch::channel(CachedResult::loading(false));
        Self {
            state,
            driver: Driver::Idle,
        }
    }

    /// Current `[data, loaded, loadError]`.
    #[must_use]
    pub fn state(&self) -> CachedResult {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn receiver(&self) -> watch::Receiver<CachedResult> {
        self.state.clone()
    }

    /// Wait for the next state change. `false` once no more changes can come.
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }

    /// Wait until the initial load either succeeded or failed.
    pub async fn settled(&mut self) -> CachedResult {
        let settled = self
            .state
            .wait_for(|s| s.loaded || s.load_error.is_some())
            .await
            .map(|state| CachedResult::clone(&state));
        match settled {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.driver, Driver::Idle)
    }

    #[must_use]
    pub const fn is_passthrough(&self) -> bool {
        matches!(self.driver, Driver::Hub(_))
    }

    pub fn stop(self) {}
}

impl Drop for FleetWatchHandle {
    fn drop(&mut self) {
        match &self.driver {
            Driver::Idle => {}
            Driver::Hub(task) => task.abort(),
            Driver::Fleet { cancel, .. } => cancel.cancel(),
        }
    }
}

impl std::fmt::Debug for FleetWatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.driver {
            Driver::Idle => "idle",
            Driver::Hub(_) => "hub",
            Driver::Fleet { .. } => "fleet",
        };
        f.debug_struct("FleetWatchHandle")
            .field("mode", &mode)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// Starts fleet watches against a shared [`FleetResourceCache`].
#[derive(Clone)]
pub struct FleetWatcher {
    cache: Arc<FleetResourceCache>,
    fetch: FetchClient,
    sockets: WatchSocketFactory,
    hub: Arc<dyn HubClient>,
    fleet_config: Arc<FleetConfigService>,
    backend_path: String,
}

impl std::fmt::Debug for FleetWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetWatcher")
            .field("backend_path", &self.backend_path)
            .finish_non_exhaustive()
    }
}

impl FleetWatcher {
    #[must_use]
    pub fn new(
        cache: Arc<FleetResourceCache>,
        fetch: FetchClient,
        sockets: WatchSocketFactory,
        hub: Arc<dyn HubClient>,
        fleet_config: Arc<FleetConfigService>,
        backend_path: &str,
    ) -> Self {
        Self {
            cache,
            fetch,
            sockets,
            hub,
            fleet_config,
            backend_path: backend_path.to_string(),
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<FleetResourceCache> {
        &self.cache
    }

    /// Watch one target. `None` yields an idle handle that never loads.
    pub async fn watch(&self, resource: Option<WatchResource>) -> FleetWatchHandle {
        let Some(resource) = resource else {
            return FleetWatchHandle::idle();
        };

        let hub = self.fleet_config.hub_cluster_name().await;
        match resource.cluster.as_deref() {
            Some(cluster) if is_remote_cluster(Some(cluster), Some(hub.as_str())) => {
                let base = fleet_api_path(&self.backend_path, cluster);
                self.watch_fleet(resource, base, &hub).await
            }
            _ => self.watch_hub(&resource),
        }
    }

    /// Watch a keyed set of targets. If any target is remote, every target
    /// (hub ones included) goes through the fleet cache.
    pub async fn watch_many(&self, resources: HashMap<String, WatchResource>) -> FleetWatchSet {
        let mut set = FleetWatchSet {
            watcher: self.clone(),
            resources: HashMap::new(),
            handles: HashMap::new(),
        };
        set.update(resources).await;
        set
    }

    fn watch_hub(&self, resource: &WatchResource) -> FleetWatchHandle {
        debug!("🏠 Hub passthrough watch for {}", resource.model.kind);
        let mut native = resource.clone();
        native.cluster = None;
        let HubWatch { state, task } = self.hub.watch_resource(&native);
        FleetWatchHandle {
            state,
            driver: Driver::Hub(task),
        }
    }

    async fn watch_fleet(&self, resource: WatchResource, base: String, hub: &str) -> FleetWatchHandle {
        let key = resource.request_path(&base);
        let fingerprint = resource.fingerprint(hub);
        let (tx, state) = watch::channel(CachedResult::loading(resource.is_list));

        // Subscribe before the GET so the store notification cannot be missed.
        let (subscription_id, updates) = self.cache.subscribe(&key).await;
        self.cache.acquire_socket(&fingerprint, &key);
        let cancel = CancellationToken::new();

        let lease = SocketLease {
            cache: Arc::clone(&self.cache),
            fingerprint: fingerprint.clone(),
        };
        let session = WatchSession {
            watcher: self.clone(),
            resource,
            base,
            key,
            fingerprint,
            subscription_id,
        };
        tokio::spawn(session.run(tx, updates, cancel.clone()));

        FleetWatchHandle {
            state,
            driver: Driver::Fleet { cancel, _lease: lease },
        }
    }

    async fn start_many(&self, resources: &HashMap<String, WatchResource>) -> HashMap<String, FleetWatchHandle> {
        let mut handles = HashMap::with_capacity(resources.len());
        if resources.is_empty() {
            return handles;
        }

        let hub = self.fleet_config.hub_cluster_name().await;
        let fleet_mode = resources
            .values()
            .any(|r| is_remote_cluster(r.cluster.as_deref(), Some(hub.as_str())));

        for (key, resource) in resources {
            let handle = if fleet_mode {
                let base = match resource.cluster.as_deref() {
                    Some(cluster) if is_remote_cluster(Some(cluster), Some(hub.as_str())) => {
                        fleet_api_path(&self.backend_path, cluster)
                    }
                    _ => HUB_API_PATH.to_string(),
                };
                self.watch_fleet(resource.clone(), base, &hub).await
            } else {
                self.watch_hub(resource)
            };
            handles.insert(key.clone(), handle);
        }

        info!(
            "🔍 Started {} watches ({} mode)",
            handles.len(),
            if fleet_mode { "fleet" } else { "hub" }
        );
        handles
    }
}

/// The driving task behind one fleet watch handle.
struct WatchSession {
    watcher: FleetWatcher,
    resource: WatchResource,
    base: String,
    key: String,
    fingerprint: WatchFingerprint,
    subscription_id: String,
}

impl WatchSession {
    async fn run(
        self,
        tx: watch::Sender<CachedResult>,
        mut updates: mpsc::Receiver<DataUpdate>,
        cancel: CancellationToken,
    ) {
        let loaded = tokio::select! {
            () = cancel.cancelled() => None,
            result = self.load() => Some(result),
        };

        match loaded {
            Some(Ok(fetched)) => {
                tx.send_replace(CachedResult::loaded(fetched.data));
                // Opening runs to completion even if this handle is dropped:
                // co-watchers of the fingerprint rely on the socket.
                if self.watcher.cache.claim_socket(&self.fingerprint) {
                    self.open_socket(fetched.resource_version).await;
                }

                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        update = updates.recv() => match update {
                            Some(update) => {
                                while updates.try_recv().is_ok() {}
                                let latest = self.watcher.cache.snapshot(&self.key).await;
                                tx.send_replace(latest.unwrap_or(update.result));
                            }
                            None => break,
                        },
                    }
                }
            }
            Some(Err(e)) => {
                warn!("❌ Initial load failed for {}: {}", self.key, e);
                tx.send_replace(CachedResult::failed(self.resource.is_list, e));
            }
            None => {}
        }

        self.watcher.cache.unsubscribe(&self.subscription_id).await;
        debug!("👋 Watch detached from {}", self.key);
    }

    async fn load(&self) -> Result<FetchedData, ResourceError> {
        let fetch = self.watcher.fetch.clone();
        let url = self.key.clone();
        let is_list = self.resource.is_list;
        let cluster = self.resource.cluster.clone();

        self.watcher
            .cache
            .get_or_fetch(&self.key, move || {
                async move {
                    let body = fetch.get_json(&url, None).await?.unwrap_or(Value::Null);
                    let resource_version = body
                        .get("metadata")
                        .and_then(|m| m.get("resourceVersion"))
                        .and_then(Value::as_str)
                        .filter(|_| is_list)
                        .map(str::to_string);
                    Ok(FetchedData {
                        data: FleetData::from_response(&body, is_list, cluster.as_deref()),
                        resource_version,
                    })
                }
                .boxed()
            })
            .await
    }

    async fn open_socket(&self, resource_version: Option<String>) {
        let query = self.resource.watch_query(resource_version);
        match self
            .watcher
            .sockets
            .open_watch(&self.resource.model, &query, Some(&self.base))
            .await
        {
            Ok(socket) => {
                let task = tokio::spawn(pump(
                    socket,
                    Arc::clone(&self.watcher.cache),
                    self.key.clone(),
                    self.resource.cluster.clone(),
                    self.fingerprint.clone(),
                ));
                self.watcher.cache.attach_socket(&self.fingerprint, task);
            }
            Err(e) => {
                warn!("⚠️ Could not open watch socket for {}: {}", self.key, e);
                self.watcher.cache.socket_failed(&self.fingerprint);
            }
        }
    }
}

/// Fold every frame of `socket` into the cache until the socket closes.
async fn pump(
    mut socket: WatchSocket,
    cache: Arc<FleetResourceCache>,
    key: String,
    cluster: Option<String>,
    fingerprint: WatchFingerprint,
) {
    while let Some(frame) = socket.next_frame().await {
        let text = match frame {
            Ok(text) => text,
            Err(e) => {
                warn!("⚠️ Watch socket error on {}: {}", key, e);
                continue;
            }
        };
        match WatchEvent::parse(&text) {
            Ok(Some(event)) => {
                cache.apply_event(&key, cluster.as_deref(), &event).await;
            }
            Ok(None) => debug!("⏭️ Dropping watch frame without object on {}", key),
            Err(e) => warn!("⚠️ Could not parse watch frame on {}: {}", key, e),
        }
    }
    cache.socket_closed(&fingerprint);
}

/// A keyed group of watches, restarted together whenever the set changes.
pub struct FleetWatchSet {
    watcher: FleetWatcher,
    resources: HashMap<String, WatchResource>,
    handles: HashMap<String, FleetWatchHandle>,
}

impl FleetWatchSet {
    /// Replace the watched set. Returns `false` (and keeps every watch
    /// running) when `resources` equals the current set.
    pub async fn update(&mut self, resources: HashMap<String, WatchResource>) -> bool {
        if resources == self.resources {
            debug!("⏭️ Watch set unchanged, keeping {} watches", self.handles.len());
            return false;
        }
        self.handles.clear();
        self.handles = self.watcher.start_many(&resources).await;
        self.resources = resources;
        true
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<CachedResult> {
        self.handles.get(key).map(FleetWatchHandle::state)
    }

    #[must_use]
    pub fn states(&self) -> HashMap<String, CachedResult> {
        self.handles.iter().map(|(k, h)| (k.clone(), h.state())).collect()
    }

    pub fn handle_mut(&mut self, key: &str) -> Option<&mut FleetWatchHandle> {
        self.handles.get_mut(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait until any member changes. `false` when nothing is being watched.
    pub async fn changed(&mut self) -> bool {
        if self.handles.is_empty() {
            return false;
        }
        let pending: Vec<_> = self.handles.values_mut().map(|h| Box::pin(h.changed())).collect();
        futures::future::select_all(pending).await.0
    }

    pub fn stop(self) {}
}

impl std::fmt::Debug for FleetWatchSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetWatchSet")
            .field("keys", &self.handles.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::BACKEND_PATH;

    fn spoke_pods() -> WatchResource {
        WatchResource::list(ResourceModel::pod())
            .cluster("spoke-1")
            .namespace("default")
    }

    #[test]
    fn list_request_path_ignores_name_and_keeps_selector() {
        let base = fleet_api_path(BACKEND_PATH, "spoke-1");
        let mut resource = spoke_pods().selector(LabelSelector::from_labels([("app", "web")]));
        resource.name = Some("ignored".to_string());

        assert_eq!(
            resource.request_path(&base),
            "/api/proxy/plugin/acm/console/multicloud/managedclusterproxy/spoke-1/api/v1/namespaces/default/pods?labelSelector=app%3Dweb"
        );
    }

    #[test]
    fn single_request_path_names_the_object() {
        let resource = WatchResource::single(ResourceModel::pod(), "p").namespace("ns1");
        assert_eq!(resource.request_path(HUB_API_PATH), "/api/kubernetes/api/v1/namespaces/ns1/pods/p");
    }

    #[test]
    fn list_watch_resumes_from_resource_version() {
        let query = spoke_pods().watch_query(Some("12345".to_string()));
        assert_eq!(query.ns.as_deref(), Some("default"));
        assert_eq!(query.cluster.as_deref(), Some("spoke-1"));
        assert_eq!(query.resource_version.as_deref(), Some("12345"));
        assert_eq!(query.field_selector, None);
    }

    #[test]
    fn single_watch_is_pinned_by_name() {
        let resource = WatchResource::single(ResourceModel::pod(), "specific-pod").cluster("spoke-1");
        let query = resource.watch_query(Some("7".to_string()));
        assert_eq!(query.field_selector.as_deref(), Some("metadata.name=specific-pod"));
        assert_eq!(query.resource_version, None);
    }

    #[test]
    fn fingerprints_separate_selectors_and_default_to_hub() {
        let web = spoke_pods().selector(LabelSelector::from_labels([("app", "web")]));
        let db = spoke_pods().selector(LabelSelector::from_labels([("app", "db")]));
        assert_ne!(web.fingerprint("hub"), db.fingerprint("hub"));
        assert_eq!(spoke_pods().fingerprint("hub"), spoke_pods().fingerprint("other"));

        let local = WatchResource::list(ResourceModel::pod());
        assert_eq!(local.fingerprint("hub").cluster, "hub");
    }
}
