//! Resource descriptors and per-call request options.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Static descriptor of a Kubernetes resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceModel {
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    pub kind: String,
    pub plural: String,
    #[serde(default)]
    pub namespaced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagation_policy: Option<PropagationPolicy>,
}

impl ResourceModel {
    #[must_use]
    pub fn new(api_version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        Self {
            api_version: api_version.to_string(),
            api_group: None,
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced,
            propagation_policy: None,
        }
    }

    #[must_use]
    pub fn with_group(mut self, group: &str) -> Self {
        self.api_group = Some(group.to_string());
        self
    }

    #[must_use]
    pub const fn with_propagation_policy(mut self, policy: PropagationPolicy) -> Self {
        self.propagation_policy = Some(policy);
        self
    }

    /// Group used for API discovery, `""` for the legacy core group. Without
    /// an explicit `api_group` the `group/` prefix of `api_version` is used.
    #[must_use]
    pub fn group(&self) -> &str {
        match self.api_group.as_deref() {
            Some("core") => "",
            Some(group) => group,
            None => self.api_version.split_once('/').map_or("", |(group, _)| group),
        }
    }

    /// Bare version, with any `group/` prefix of `api_version` removed.
    #[must_use]
    pub fn version(&self) -> &str {
        self.api_version
            .rsplit_once('/')
            .map_or(self.api_version.as_str(), |(_, version)| version)
    }

    #[must_use]
    pub fn pod() -> Self {
        Self::new("v1", "Pod", "pods", true)
    }

    #[must_use]
    pub fn managed_cluster() -> Self {
        Self::new("cluster.open-cluster-management.io/v1", "ManagedCluster", "managedclusters", false)
            .with_group("cluster.open-cluster-management.io")
    }

    #[must_use]
    pub fn self_subject_access_review() -> Self {
        Self::new("v1", "SelfSubjectAccessReview", "selfsubjectaccessreviews", false)
            .with_group("authorization.k8s.io")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropagationPolicy {
    Orphan,
    Background,
    Foreground,
}

impl PropagationPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Orphan => "Orphan",
            Self::Background => "Background",
            Self::Foreground => "Foreground",
        }
    }
}

/// Options for one fleet CRUD call.
///
/// `data` is the request body (create/update/patch payload or delete options);
/// `resource` is the existing object a patch or delete targets.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetRequest {
    pub model: ResourceModel,
    pub cluster: Option<String>,
    pub ns: Option<String>,
    pub name: Option<String>,
    pub path: Option<String>,
    pub query_params: Vec<(String, String)>,
    pub data: Option<Value>,
    pub resource: Option<Value>,
}

impl FleetRequest {
    #[must_use]
    pub const fn new(model: ResourceModel) -> Self {
        Self {
            model,
            cluster: None,
            ns: None,
            name: None,
            path: None,
            query_params: Vec::new(),
            data: None,
            resource: None,
        }
    }

    #[must_use]
    pub fn cluster(mut self, cluster: &str) -> Self {
        self.cluster = Some(cluster.to_string());
        self
    }

    #[must_use]
    pub fn ns(mut self, ns: &str) -> Self {
        self.ns = Some(ns.to_string());
        self
    }

    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    #[must_use]
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query_params.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn resource(mut self, resource: Value) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Target cluster: explicit option, then the body's `cluster`, then the
    /// targeted resource's `cluster`.
    #[must_use]
    pub fn cluster_from_options(&self) -> Option<String> {
        self.cluster
            .clone()
            .or_else(|| self.data.as_ref().and_then(cluster_of))
            .or_else(|| self.resource.as_ref().and_then(cluster_of))
    }

    #[must_use]
    pub fn namespace_from_options(&self) -> Option<String> {
        self.ns
            .clone()
            .or_else(|| self.data.as_ref().and_then(|d| metadata_str(d, "namespace")))
            .or_else(|| self.resource.as_ref().and_then(|r| metadata_str(r, "namespace")))
            .or_else(|| {
                self.query_params
                    .iter()
                    .find(|(k, _)| k == "ns")
                    .map(|(_, v)| v.clone())
            })
    }

    #[must_use]
    pub fn name_from_options(&self) -> Option<String> {
        self.name
            .clone()
            .or_else(|| self.data.as_ref().and_then(|d| metadata_str(d, "name")))
            .or_else(|| self.resource.as_ref().and_then(|r| metadata_str(r, "name")))
    }

    /// Copy of these options with every `cluster` annotation removed, suitable
    /// for handing to the single-cluster client.
    #[must_use]
    pub fn without_cluster(&self) -> Self {
        let mut stripped = self.clone();
        stripped.cluster = None;
        if let Some(data) = stripped.data.as_mut() {
            strip_cluster(data);
        }
        if let Some(resource) = stripped.resource.as_mut() {
            strip_cluster(resource);
        }
        stripped
    }
}

fn cluster_of(value: &Value) -> Option<String> {
    value.get("cluster").and_then(Value::as_str).map(str::to_string)
}

fn metadata_str(value: &Value, field: &str) -> Option<String> {
    value
        .get("metadata")
        .and_then(|m| m.get(field))
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub(crate) fn strip_cluster(value: &mut Value) {
    if let Some(object) = value.as_object_mut() {
        object.remove("cluster");
    }
}

/// `{cluster, ...resource}`: the resource annotated with the cluster it came from.
#[must_use]
pub fn with_cluster(resource: &Value, cluster: &str) -> Value {
    let mut annotated = resource.clone();
    if let Some(object) = annotated.as_object_mut() {
        object.insert("cluster".to_string(), Value::String(cluster.to_string()));
    }
    annotated
}

#[must_use]
pub fn uid_of(resource: &Value) -> Option<&str> {
    resource
        .get("metadata")
        .and_then(|m| m.get("uid"))
        .and_then(Value::as_str)
}
