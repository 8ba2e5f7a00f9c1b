//! Which managed clusters can be reached through the cluster proxy.

use super::dispatch::FleetClient;
use super::model::{FleetRequest, ResourceModel};
use super::resource_error::ResourceError;
use serde_json::Value;
use std::collections::BTreeMap;

pub const CLUSTER_PROXY_LABEL: &str = "feature.open-cluster-management.io/addon-cluster-proxy";
pub const CLUSTER_SET_LABEL: &str = "cluster.open-cluster-management.io/clusterset";
const AVAILABLE_CONDITION: &str = "ManagedClusterConditionAvailable";

pub const DEFAULT_CLUSTER_SET: &str = "default";
pub const GLOBAL_CLUSTER_SET: &str = "global";

fn cluster_name(cluster: &Value) -> Option<&str> {
    cluster
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
}

fn label<'a>(cluster: &'a Value, key: &str) -> Option<&'a str> {
    cluster
        .pointer("/metadata/labels")
        .and_then(|labels| labels.get(key))
        .and_then(Value::as_str)
}

/// Proxy addon available and the cluster reporting `ManagedClusterConditionAvailable=True`.
/// Both comparisons are case-sensitive.
#[must_use]
pub fn is_proxy_available(cluster: &Value) -> bool {
    let proxied = label(cluster, CLUSTER_PROXY_LABEL) == Some("available");
    let available = cluster
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some(AVAILABLE_CONDITION)
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        });
    proxied && available
}

fn eligible(clusters: &[Value], return_all: bool) -> impl Iterator<Item = &Value> {
    clusters
        .iter()
        .filter(move |cluster| cluster_name(cluster).is_some() && (return_all || is_proxy_available(cluster)))
}

/// Names of the clusters a fleet request can target, in input order.
/// Unnamed clusters are always skipped.
#[must_use]
pub fn fleet_cluster_names(clusters: &[Value], return_all: bool) -> Vec<String> {
    eligible(clusters, return_all)
        .filter_map(cluster_name)
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSetOptions {
    /// Keep only these sets. Empty keeps every set that has a member.
    pub cluster_sets: Vec<String>,
    /// Add a `global` entry holding every eligible cluster.
    pub include_global: bool,
    pub return_all: bool,
}

/// Eligible cluster names grouped by the `clusterset` label; unlabelled clusters land in `default`.
#[must_use]
pub fn fleet_cluster_sets(clusters: &[Value], options: &ClusterSetOptions) -> BTreeMap<String, Vec<String>> {
    let mut sets: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut global = Vec::new();

    for cluster in eligible(clusters, options.return_all) {
        let Some(name) = cluster_name(cluster) else { continue };
        global.push(name.to_string());

        let set = label(cluster, CLUSTER_SET_LABEL).unwrap_or(DEFAULT_CLUSTER_SET);
        if options.cluster_sets.is_empty() || options.cluster_sets.iter().any(|s| s == set) {
            sets.entry(set.to_string()).or_default().push(name.to_string());
        }
    }

    if options.include_global {
        sets.insert(GLOBAL_CLUSTER_SET.to_string(), global);
    }
    sets
}

/// List `ManagedCluster`s on the hub and return the eligible names.
///
/// # Errors
///
/// Returns the [`ResourceError`] of the hub list.
pub async fn list_fleet_cluster_names(client: &FleetClient, return_all: bool) -> Result<Vec<String>, ResourceError> {
    let list = client.fleet_get(&FleetRequest::new(ResourceModel::managed_cluster())).await?;
    let items = list.get("items").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    Ok(fleet_cluster_names(items, return_all))
}
