//! Native single-cluster access to the hub, used whenever a request carries no
//! remote cluster.

use super::cache::cached_data::CachedResult;
use super::cache::config::{INITIAL_BACKOFF_SECONDS, MAX_BACKOFF_SECONDS, MAX_WATCH_RESTARTS, WATCH_TIMEOUT_SECONDS};
use super::cache::events::{FleetData, WatchEvent, apply_watch_event};
use super::cache::watch_manager::WatchResource;
use super::model::{FleetRequest, PropagationPolicy, ResourceModel};
use super::resource_error::{ResourceError, ResourceErrorCode};
use super::selector::selector_to_string;
use super::url::{PathOptions, resource_path};
use async_trait::async_trait;
use hyper::http::{Request, header::CONTENT_TYPE};
use kube::Client;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams, WatchParams};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// A live hub watch: the current state plus the task feeding it.
#[derive(Debug)]
pub struct HubWatch {
    pub state: watch::Receiver<CachedResult>,
    pub task: JoinHandle<()>,
}

/// The native SDK surface the dispatch layer delegates to for the hub.
#[async_trait]
pub trait HubClient: Send + Sync {
    async fn get(&self, request: &FleetRequest) -> Result<Value, ResourceError>;
    async fn create(&self, request: &FleetRequest) -> Result<Value, ResourceError>;
    async fn update(&self, request: &FleetRequest) -> Result<Value, ResourceError>;
    async fn patch(&self, request: &FleetRequest) -> Result<Value, ResourceError>;
    async fn delete(&self, request: &FleetRequest) -> Result<Value, ResourceError>;

    /// Start watching `resource` on the hub. Initial state is "not loaded".
    fn watch_resource(&self, resource: &WatchResource) -> HubWatch;
}

#[must_use]
pub fn api_resource(model: &ResourceModel) -> ApiResource {
    let group = model.group().to_string();
    let version = model.version().to_string();
    let api_version = if group.is_empty() {
        version.clone()
    } else {
        format!("{group}/{version}")
    };
    ApiResource {
        group,
        version,
        api_version,
        kind: model.kind.clone(),
        plural: model.plural.clone(),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ResourceError> {
    serde_json::to_value(value).map_err(|e| ResourceError::with_message(ResourceErrorCode::Unknown, e.to_string()))
}

fn require_name(request: &FleetRequest) -> Result<String, ResourceError> {
    request
        .name_from_options()
        .ok_or_else(|| ResourceError::with_message(ResourceErrorCode::BadRequest, "resource name is required"))
}

fn require_body(request: &FleetRequest) -> Result<&Value, ResourceError> {
    request
        .data
        .as_ref()
        .ok_or_else(|| ResourceError::with_message(ResourceErrorCode::BadRequest, "request body is required"))
}

fn list_params(query: &[(String, String)]) -> ListParams {
    let mut params = ListParams::default();
    for (key, value) in query {
        match key.as_str() {
            "labelSelector" => params = params.labels(value),
            "fieldSelector" => params = params.fields(value),
            "limit" => {
                if let Ok(limit) = value.parse() {
                    params = params.limit(limit);
                }
            }
            _ => {}
        }
    }
    params
}

fn delete_params(request: &FleetRequest) -> DeleteParams {
    let policy = request
        .data
        .as_ref()
        .and_then(|d| d.get("propagationPolicy"))
        .and_then(Value::as_str)
        .and_then(|p| match p {
            "Foreground" => Some(PropagationPolicy::Foreground),
            "Background" => Some(PropagationPolicy::Background),
            "Orphan" => Some(PropagationPolicy::Orphan),
            _ => None,
        })
        .or(request.model.propagation_policy);

    let mut params = DeleteParams::default();
    params.propagation_policy = policy.map(|p| match p {
        PropagationPolicy::Foreground => kube::api::PropagationPolicy::Foreground,
        PropagationPolicy::Background => kube::api::PropagationPolicy::Background,
        PropagationPolicy::Orphan => kube::api::PropagationPolicy::Orphan,
    });
    params
}

/// `HubClient` over a kube-rs client.
#[derive(Clone)]
pub struct KubeHubClient {
    client: Client,
}

/// API server path for `request` built from the bare group and version, so
/// `apps/v1` with group `apps` addresses `/apis/apps/v1`.
fn native_path(request: &FleetRequest) -> String {
    let model = &request.model;
    let native = ResourceModel {
        api_version: model.version().to_string(),
        api_group: Some(model.group()).filter(|g| !g.is_empty()).map(str::to_string),
        ..model.clone()
    };
    let options = PathOptions {
        ns: request.namespace_from_options(),
        name: request.name_from_options(),
        path: request.path.clone(),
        query_params: request.query_params.clone(),
    };
    resource_path(&native, &options)
}

impl KubeHubClient {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, model: &ResourceModel, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = api_resource(model);
        match namespace.filter(|_| model.namespaced) {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }

    /// Requests the typed API cannot express: subresources and JSON patches.
    async fn raw(
        &self,
        method: &str,
        request: &FleetRequest,
        body: Option<&Value>,
        content_type: &str,
    ) -> Result<Value, ResourceError> {
        let path = native_path(request);
        let body = body.map(serde_json::to_vec).transpose()?.unwrap_or_default();

        debug!("📡 Hub {} {}", method, path);
        let http_request = Request::builder()
            .method(method)
            .uri(path)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .map_err(|e| ResourceError::with_message(ResourceErrorCode::BadRequest, e.to_string()))?;
        Ok(self.client.request::<Value>(http_request).await?)
    }

    async fn list(api: &Api<DynamicObject>, model: &ResourceModel, query: &[(String, String)]) -> Result<(Value, Option<String>), ResourceError> {
        let list = api.list(&list_params(query)).await?;
        let resource_version = list.metadata.resource_version.clone();
        let resource = api_resource(model);

        let mut body = Map::new();
        body.insert("apiVersion".to_string(), Value::String(resource.api_version));
        body.insert("kind".to_string(), Value::String(format!("{}List", model.kind)));
        body.insert("metadata".to_string(), to_json(&list.metadata)?);
        body.insert("items".to_string(), to_json(&list.items)?);
        Ok((Value::Object(body), resource_version))
    }
}

impl std::fmt::Debug for KubeHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeHubClient").finish_non_exhaustive()
    }
}

#[async_trait]
impl HubClient for KubeHubClient {
    async fn get(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        if request.path.is_some() {
            return self.raw("GET", request, None, "application/json").await;
        }
        let ns = request.namespace_from_options();
        let api = self.api(&request.model, ns.as_deref());
        match request.name.as_deref() {
            Some(name) => to_json(&api.get(name).await?),
            None => Ok(Self::list(&api, &request.model, &request.query_params).await?.0),
        }
    }

    async fn create(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        let body = require_body(request)?;
        if request.path.is_some() {
            return self.raw("POST", request, Some(body), "application/json").await;
        }
        let object: DynamicObject = serde_json::from_value(body.clone())?;
        let ns = request.namespace_from_options();
        let created = self.api(&request.model, ns.as_deref()).create(&PostParams::default(), &object).await?;
        info!("➕ Hub created {} {}", request.model.kind, created.metadata.name.as_deref().unwrap_or_default());
        to_json(&created)
    }

    async fn update(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        let body = require_body(request)?;
        let name = require_name(request)?;
        if request.path.is_some() {
            return self.raw("PUT", request, Some(body), "application/json").await;
        }
        let object: DynamicObject = serde_json::from_value(body.clone())?;
        let ns = request.namespace_from_options();
        let replaced = self
            .api(&request.model, ns.as_deref())
            .replace(&name, &PostParams::default(), &object)
            .await?;
        to_json(&replaced)
    }

    async fn patch(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        let body = require_body(request)?;
        let name = require_name(request)?;
        if body.is_array() || request.path.is_some() {
            let content_type = if body.is_array() {
                "application/json-patch+json"
            } else {
                "application/merge-patch+json"
            };
            return self.raw("PATCH", request, Some(body), content_type).await;
        }
        let ns = request.namespace_from_options();
        let patched = self
            .api(&request.model, ns.as_deref())
            .patch(&name, &PatchParams::default(), &Patch::Merge(body))
            .await?;
        to_json(&patched)
    }

    async fn delete(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        let name = require_name(request)?;
        let ns = request.namespace_from_options();
        let result = self
            .api(&request.model, ns.as_deref())
            .delete(&name, &delete_params(request))
            .await?;
        info!("🗑️ Hub deleted {} {}", request.model.kind, name);
        result.either(|object| to_json(&object), |status| to_json(&status))
    }

    fn watch_resource(&self, resource: &WatchResource) -> HubWatch {
        let (tx, rx) = watch::channel(CachedResult::loading(resource.is_list));
        let api = self.api(&resource.model, resource.namespace.as_deref());
        let resource = resource.clone();

        let task = tokio::spawn(async move {
            info!("🔍 Starting hub watcher for {}", resource.model.kind);

            let mut backoff_seconds = INITIAL_BACKOFF_SECONDS;
            let mut restart_count = 0;

            loop {
                if restart_count >= MAX_WATCH_RESTARTS {
                    error!(
                        "❌ Hub watcher for {} exceeded maximum restart attempts ({}), stopping",
                        resource.model.kind, MAX_WATCH_RESTARTS
                    );
                    break;
                }

                match watch_hub(&api, &resource, &tx).await {
                    Ok(()) => {
                        debug!("🔍 Hub watch for {} ended normally, restarting...", resource.model.kind);
                        backoff_seconds = INITIAL_BACKOFF_SECONDS;
                        restart_count = 0;
                    }
                    Err(e) => {
                        restart_count += 1;
                        if !tx.borrow().loaded {
                            tx.send_replace(CachedResult::failed(resource.is_list, e.clone()));
                        }
                        error!(
                            "❌ Hub watcher failed (attempt {}/{}): {}, restarting in {}s",
                            restart_count, MAX_WATCH_RESTARTS, e, backoff_seconds
                        );
                        sleep(Duration::from_secs(backoff_seconds)).await;
                        backoff_seconds = (backoff_seconds * 2).min(MAX_BACKOFF_SECONDS);
                    }
                }

                if tx.is_closed() {
                    debug!("🔍 Hub watcher for {} has no receivers, stopping", resource.model.kind);
                    break;
                }
                sleep(Duration::from_secs(1)).await;
            }
        });

        HubWatch { state: rx, task }
    }
}

/// One list-then-watch cycle. Returns when the server closes the stream.
async fn watch_hub(
    api: &Api<DynamicObject>,
    resource: &WatchResource,
    tx: &watch::Sender<CachedResult>,
) -> Result<(), ResourceError> {
    use futures::{TryStreamExt, pin_mut};

    let label_selector = resource
        .selector
        .as_ref()
        .filter(|s| !s.is_empty())
        .map(selector_to_string);
    let field_selector = match (resource.is_list, resource.name.as_deref()) {
        (false, Some(name)) => Some(format!("metadata.name={name}")),
        _ => resource.field_selector.clone(),
    };

    let (mut data, mut resource_version) = if resource.is_list {
        let mut query = Vec::new();
        if let Some(selector) = &label_selector {
            query.push(("labelSelector".to_string(), selector.clone()));
        }
        if let Some(fields) = &field_selector {
            query.push(("fieldSelector".to_string(), fields.clone()));
        }
        let (body, rv) = KubeHubClient::list(api, &resource.model, &query).await?;
        (FleetData::from_response(&body, true, None), rv.unwrap_or_else(|| "0".to_string()))
    } else {
        let name = resource.name.as_deref().unwrap_or_default();
        let object = api.get_opt(name).await?;
        let rv = object
            .as_ref()
            .and_then(|o| o.metadata.resource_version.clone())
            .unwrap_or_else(|| "0".to_string());
        (FleetData::Single(object.as_ref().map(to_json).transpose()?), rv)
    };
    tx.send_replace(CachedResult::loaded(data.clone()));

    let mut params = WatchParams::default().timeout(WATCH_TIMEOUT_SECONDS);
    if let Some(selector) = &label_selector {
        params = params.labels(selector);
    }
    if let Some(fields) = &field_selector {
        params = params.fields(fields);
    }

    let stream = api.watch(&params, &resource_version).await?;
    pin_mut!(stream);

    while let Some(event) = stream.try_next().await? {
        let event = match event {
            kube::api::WatchEvent::Added(object) => WatchEvent::Added(to_json(&object)?),
            kube::api::WatchEvent::Modified(object) => WatchEvent::Modified(to_json(&object)?),
            kube::api::WatchEvent::Deleted(object) => WatchEvent::Deleted(to_json(&object)?),
            kube::api::WatchEvent::Bookmark(bookmark) => {
                resource_version = bookmark.metadata.resource_version;
                continue;
            }
            kube::api::WatchEvent::Error(status) => {
                warn!("⚠️ Hub watch error for {}: {}", resource.model.kind, status.message);
                return Err(ResourceError::from_status(status.code, Some(&status.message), Some(status.reason)));
            }
        };

        if let Some(rv) = event
            .object()
            .get("metadata")
            .and_then(|m| m.get("resourceVersion"))
            .and_then(Value::as_str)
        {
            resource_version = rv.to_string();
        }
        if apply_watch_event(&mut data, None, &event) {
            tx.send_replace(CachedResult::loaded(data.clone()));
        }
    }

    debug!("🔍 Hub watch for {} closed at resourceVersion {}", resource.model.kind, resource_version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_resource_for_core_and_grouped_models() {
        let pod = api_resource(&ResourceModel::pod());
        assert_eq!(pod.group, "");
        assert_eq!(pod.api_version, "v1");
        assert_eq!(pod.plural, "pods");

        let clusters = api_resource(&ResourceModel::managed_cluster());
        assert_eq!(clusters.group, "cluster.open-cluster-management.io");
        assert_eq!(clusters.version, "v1");
        assert_eq!(clusters.api_version, "cluster.open-cluster-management.io/v1");
    }

    #[test]
    fn raw_paths_use_the_bare_version() {
        let apps = ResourceModel::new("apps/v1", "Deployment", "deployments", true).with_group("apps");
        let request = FleetRequest::new(apps).ns("default").name("web").path("scale");
        assert_eq!(native_path(&request), "/apis/apps/v1/namespaces/default/deployments/web/scale");

        let ungrouped = ResourceModel::new("batch/v1", "Job", "jobs", true);
        assert_eq!(native_path(&FleetRequest::new(ungrouped).ns("ns1")), "/apis/batch/v1/namespaces/ns1/jobs");

        let pods = FleetRequest::new(ResourceModel::pod()).ns("ns1").name("p").path("log").query("container", "c");
        assert_eq!(native_path(&pods), "/api/v1/namespaces/ns1/pods/p/log?container=c");
    }

    #[test]
    fn list_params_from_query() {
        let params = list_params(&[
            ("labelSelector".to_string(), "app=web".to_string()),
            ("fieldSelector".to_string(), "metadata.name=a".to_string()),
            ("limit".to_string(), "5".to_string()),
            ("ignored".to_string(), "x".to_string()),
        ]);
        assert_eq!(params.label_selector.as_deref(), Some("app=web"));
        assert_eq!(params.field_selector.as_deref(), Some("metadata.name=a"));
        assert_eq!(params.limit, Some(5));
    }

    #[test]
    fn delete_params_prefer_body_policy() {
        let model = ResourceModel::pod().with_propagation_policy(PropagationPolicy::Foreground);
        let from_model = delete_params(&FleetRequest::new(model.clone()).name("p"));
        assert_eq!(from_model.propagation_policy, Some(kube::api::PropagationPolicy::Foreground));

        let request = FleetRequest::new(model)
            .name("p")
            .data(json!({"kind": "DeleteOptions", "propagationPolicy": "Orphan"}));
        assert_eq!(delete_params(&request).propagation_policy, Some(kube::api::PropagationPolicy::Orphan));

        assert_eq!(delete_params(&FleetRequest::new(ResourceModel::pod()).name("p")).propagation_policy, None);
    }

    #[test]
    fn name_and_body_are_required() {
        let request = FleetRequest::new(ResourceModel::pod());
        assert_eq!(require_name(&request).unwrap_err().code, ResourceErrorCode::BadRequest);
        assert_eq!(require_body(&request).unwrap_err().code, ResourceErrorCode::BadRequest);
    }
}
