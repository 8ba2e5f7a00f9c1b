//! Fleet CRUD: hub requests go to the native client, everything else through
//! the cluster proxy.

use super::fleet_config::FleetConfigService;
use super::hub::HubClient;
use super::model::FleetRequest;
use super::request::{FetchClient, FetchRequest, Method};
use super::SEARCH_API_PATH;
use super::resource_error::ResourceError;
use super::url::{PathOptions, build_resource_url, fleet_api_path, is_remote_cluster, observability_url};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

const JSON_PATCH: &str = "application/json-patch+json";
const MERGE_PATCH: &str = "application/merge-patch+json";

/// `Content-Type` for a PATCH body: JSON-Patch for operation arrays, merge patch otherwise.
#[must_use]
pub fn patch_content_type(patch: &Value) -> &'static str {
    if patch.is_array() { JSON_PATCH } else { MERGE_PATCH }
}

/// `DeleteOptions` body carrying the model's propagation policy.
#[must_use]
pub fn delete_options(request: &FleetRequest) -> Value {
    let mut options = Map::new();
    options.insert("kind".to_string(), Value::String("DeleteOptions".to_string()));
    options.insert("apiVersion".to_string(), Value::String("v1".to_string()));
    if let Some(policy) = request.model.propagation_policy {
        options.insert("propagationPolicy".to_string(), Value::String(policy.as_str().to_string()));
    }
    Value::Object(options)
}

#[derive(Clone)]
pub struct FleetClient {
    fetch: FetchClient,
    hub: Arc<dyn HubClient>,
    fleet_config: Arc<FleetConfigService>,
    backend_path: String,
}

impl std::fmt::Debug for FleetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetClient")
            .field("backend_path", &self.backend_path)
            .finish_non_exhaustive()
    }
}

impl FleetClient {
    #[must_use]
    pub fn new(
        fetch: FetchClient,
        hub: Arc<dyn HubClient>,
        fleet_config: Arc<FleetConfigService>,
        backend_path: &str,
    ) -> Self {
        Self {
            fetch,
            hub,
            fleet_config,
            backend_path: backend_path.to_string(),
        }
    }

    #[must_use]
    pub const fn fleet_config(&self) -> &Arc<FleetConfigService> {
        &self.fleet_config
    }

    /// The remote cluster `request` targets, or `None` when it belongs to the hub.
    async fn remote_cluster(&self, request: &FleetRequest) -> Option<String> {
        let cluster = request.cluster_from_options()?;
        let hub = self.fleet_config.hub_cluster_name().await;
        is_remote_cluster(Some(cluster.as_str()), Some(hub.as_str())).then_some(cluster)
    }

    /// Proxied URL for `request`; `collection` drops the object name.
    #[must_use]
    pub fn proxied_url(&self, request: &FleetRequest, cluster: &str, collection: bool) -> String {
        let options = PathOptions {
            ns: request.namespace_from_options(),
            name: if collection { None } else { request.name_from_options() },
            path: request.path.clone(),
            query_params: request.query_params.clone(),
        };
        build_resource_url(&fleet_api_path(&self.backend_path, cluster), &request.model, &options)
    }

    async fn proxied(&self, request: FetchRequest) -> Result<Value, ResourceError> {
        let response = self.fetch.request(request.disable_redirect_unauthorized()).await?;
        Ok(response.data.unwrap_or(Value::Null))
    }

    fn body(request: &FleetRequest) -> Option<Value> {
        request.without_cluster().data
    }

    /// # Errors
    ///
    /// Returns the [`ResourceError`] of the hub call or the proxied request.
    pub async fn fleet_get(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        let Some(cluster) = self.remote_cluster(request).await else {
            return self.hub.get(&request.without_cluster()).await;
        };
        let url = self.proxied_url(request, &cluster, false);
        debug!("📡 Fleet GET {}", url);
        self.proxied(FetchRequest::get(url)).await
    }

    /// # Errors
    ///
    /// Returns the [`ResourceError`] of the hub call or the proxied request.
    pub async fn fleet_create(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        let Some(cluster) = self.remote_cluster(request).await else {
            return self.hub.create(&request.without_cluster()).await;
        };
        let url = self.proxied_url(request, &cluster, true);
        debug!("📡 Fleet POST {}", url);
        let mut fetch = FetchRequest::new(Method::Post, url);
        fetch.data = Self::body(request);
        self.proxied(fetch).await
    }

    /// # Errors
    ///
    /// Returns the [`ResourceError`] of the hub call or the proxied request.
    pub async fn fleet_update(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        let Some(cluster) = self.remote_cluster(request).await else {
            return self.hub.update(&request.without_cluster()).await;
        };
        let url = self.proxied_url(request, &cluster, false);
        debug!("📡 Fleet PUT {}", url);
        let mut fetch = FetchRequest::new(Method::Put, url);
        fetch.data = Self::body(request);
        self.proxied(fetch).await
    }

    /// # Errors
    ///
    /// Returns the [`ResourceError`] of the hub call or the proxied request.
    pub async fn fleet_patch(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        let Some(cluster) = self.remote_cluster(request).await else {
            return self.hub.patch(&request.without_cluster()).await;
        };
        let url = self.proxied_url(request, &cluster, false);
        let patch = Self::body(request).unwrap_or(Value::Null);
        let content_type = patch_content_type(&patch);
        debug!("📡 Fleet PATCH {} ({})", url, content_type);

        let fetch = FetchRequest::new(Method::Patch, url).data(patch).headers(vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), content_type.to_string()),
        ]);
        self.proxied(fetch).await
    }

    /// # Errors
    ///
    /// Returns the [`ResourceError`] of the hub call or the proxied request.
    pub async fn fleet_delete(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        let Some(cluster) = self.remote_cluster(request).await else {
            return self.hub.delete(&request.without_cluster()).await;
        };
        let url = self.proxied_url(request, &cluster, false);
        debug!("📡 Fleet DELETE {}", url);
        let body = Self::body(request).unwrap_or_else(|| delete_options(request));
        self.proxied(FetchRequest::new(Method::Delete, url).data(body)).await
    }

    /// Prometheus-style query through the observability proxy.
    ///
    /// # Errors
    ///
    /// Returns the [`ResourceError`] of the proxied request.
    pub async fn observability_query(
        &self,
        endpoint: &str,
        query_params: &[(String, String)],
    ) -> Result<Value, ResourceError> {
        let url = observability_url(&self.backend_path, endpoint, query_params);
        debug!("📈 Observability query {}", url);
        self.proxied(FetchRequest::get(url)).await
    }

    /// POST a GraphQL `query` body to the search API.
    ///
    /// # Errors
    ///
    /// Returns the [`ResourceError`] of the proxied request.
    pub async fn search(&self, query: Value) -> Result<Value, ResourceError> {
        let url = format!("{}{SEARCH_API_PATH}", self.backend_path);
        debug!("🔎 Fleet search {}", url);
        self.proxied(FetchRequest::new(Method::Post, url).data(query)).await
    }
}
