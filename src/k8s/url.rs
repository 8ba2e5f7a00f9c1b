//! Kubernetes REST path construction for hub and proxied cluster requests.

use super::model::ResourceModel;
use url::form_urlencoded;

/// Path pieces combined with a [`ResourceModel`] to address a resource or collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathOptions {
    pub ns: Option<String>,
    pub name: Option<String>,
    pub path: Option<String>,
    pub query_params: Vec<(String, String)>,
}

impl PathOptions {
    #[must_use]
    pub fn namespaced(ns: Option<&str>) -> Self {
        Self {
            ns: ns.map(str::to_string),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn named(ns: Option<&str>, name: &str) -> Self {
        Self {
            ns: ns.map(str::to_string),
            name: Some(name.to_string()),
            ..Self::default()
        }
    }
}

/// `/api/v1` for the legacy core group, `/apis/{group}/{apiVersion}` otherwise.
///
/// `apiVersion` is appended as given, so a model carrying both `apiGroup: apps`
/// and `apiVersion: apps/v1` yields `/apis/apps/apps/v1`.
#[must_use]
pub fn api_path_for(model: &ResourceModel) -> String {
    let group = model.api_group.as_deref().unwrap_or("core");
    if group == "core" && model.api_version == "v1" {
        return format!("/api/{}", model.api_version);
    }
    match model.api_group.as_deref() {
        Some(group) if !group.is_empty() => format!("/apis/{group}/{}", model.api_version),
        _ => format!("/apis/{}", model.api_version),
    }
}

/// Form-urlencoded query string, keys in the order given.
#[must_use]
pub fn encode_query(params: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

#[must_use]
pub fn resource_path(model: &ResourceModel, options: &PathOptions) -> String {
    let mut path = api_path_for(model);

    if model.namespaced {
        if let Some(ns) = options.ns.as_deref().filter(|ns| !ns.is_empty()) {
            path.push_str("/namespaces/");
            path.push_str(ns);
        }
    }

    path.push('/');
    path.push_str(&model.plural);

    if let Some(name) = options.name.as_deref().filter(|n| !n.is_empty()) {
        path.push('/');
        path.push_str(&urlencoding::encode(name));
    }

    if let Some(sub) = options.path.as_deref().filter(|p| !p.is_empty()) {
        path.push('/');
        path.push_str(sub);
    }

    if !options.query_params.is_empty() {
        path.push('?');
        path.push_str(&encode_query(&options.query_params));
    }

    path
}

#[must_use]
pub fn build_resource_url(base_path: &str, model: &ResourceModel, options: &PathOptions) -> String {
    format!("{base_path}{}", resource_path(model, options))
}

/// Proxy prefix for requests addressed to a managed cluster.
#[must_use]
pub fn fleet_api_path(backend_path: &str, cluster: &str) -> String {
    format!("{backend_path}/managedclusterproxy/{cluster}")
}

/// `true` when `cluster` names a cluster other than the hub.
#[must_use]
pub fn is_remote_cluster(cluster: Option<&str>, hub: Option<&str>) -> bool {
    match cluster {
        None | Some("") => false,
        Some(cluster) => hub != Some(cluster),
    }
}

/// Resource URL, proxied through the backend when `cluster` is a non-hub cluster.
#[must_use]
pub fn resource_url(
    model: &ResourceModel,
    options: &PathOptions,
    cluster: Option<&str>,
    hub: Option<&str>,
    backend_path: &str,
) -> String {
    match cluster {
        Some(cluster) if is_remote_cluster(Some(cluster), hub) => {
            build_resource_url(&fleet_api_path(backend_path, cluster), model, options)
        }
        _ => resource_path(model, options),
    }
}

#[must_use]
pub fn observability_url(backend_path: &str, endpoint: &str, query_params: &[(String, String)]) -> String {
    let endpoint = endpoint.trim_start_matches('/');
    if query_params.is_empty() {
        format!("{backend_path}/observability/{endpoint}")
    } else {
        format!("{backend_path}/observability/{endpoint}?{}", encode_query(query_params))
    }
}
