//! Fleet-wide search through the console search API.
//!
//! The search collector flattens every resource into a single-level item
//! (`cluster`, `kind`, `apigroup`, `label: "a=b;c=d"`, ...). This module builds
//! the query for a watch target and rebuilds structured resources from the
//! items that come back.

use super::cache::{FleetData, WatchResource};
use super::dispatch::FleetClient;
use super::resource_error::{ResourceError, ResourceErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

pub const DEFAULT_SEARCH_LIMIT: i64 = -1;

const SEARCH_RESULT_ITEMS: &str =
    "query searchResultItems($input: [SearchInput]) {\n  searchResult: search(input: $input) {\n    items\n  }\n}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub property: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl SearchFilter {
    #[must_use]
    pub fn new<I, S>(property: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            property: property.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchInput {
    pub filters: Vec<SearchFilter>,
    pub limit: i64,
}

/// Search input for `resource`. Filters derived from the target come first;
/// `advanced` filters are appended unless they are empty or name a property
/// the target already set.
#[must_use]
pub fn search_input(resource: &WatchResource, advanced: &[SearchFilter], limit: Option<i64>) -> SearchInput {
    let mut filters = Vec::new();
    let mut push = |property: &str, value: Option<&str>| {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            filters.push(SearchFilter::new(property, [value]));
        }
    };

    push("cluster", resource.cluster.as_deref());
    push("apigroup", Some(resource.model.group()));
    push("apiversion", Some(resource.model.version()));
    push("kind", Some(resource.model.kind.as_str()));
    if resource.model.namespaced {
        push("namespace", resource.namespace.as_deref());
    }
    push("name", resource.name.as_deref());

    for filter in advanced {
        let taken = filters.iter().any(|f| f.property == filter.property);
        if filter.property.is_empty() || filter.values.is_empty() || taken {
            continue;
        }
        filters.push(filter.clone());
    }

    SearchInput {
        filters,
        limit: limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
    }
}

/// GraphQL request body for the `searchResultItems` query.
#[must_use]
pub fn search_query(inputs: &[SearchInput]) -> Value {
    json!({
        "operationName": "searchResultItems",
        "variables": {"input": inputs},
        "query": SEARCH_RESULT_ITEMS,
    })
}

/// Items of the first search result. GraphQL errors fail the whole response.
///
/// # Errors
///
/// Returns a `BadRequest` [`ResourceError`] carrying the first GraphQL error message.
pub fn search_items(body: &Value) -> Result<Vec<Value>, ResourceError> {
    if let Some(error) = body.get("errors").and_then(Value::as_array).and_then(|e| e.first()) {
        let message = error.get("message").and_then(Value::as_str).unwrap_or_default();
        return Err(ResourceError::with_message(ResourceErrorCode::BadRequest, message));
    }

    let items = body
        .pointer("/data/searchResult/0/items")
        .or_else(|| body.pointer("/searchResult/0/items"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok(items)
}

/// Converted search results: every item for lists, the first one otherwise.
///
/// # Errors
///
/// See [`search_items`].
pub fn search_results(body: &Value, is_list: bool) -> Result<FleetData, ResourceError> {
    let mut resources = search_items(body)?.iter().map(convert_search_item).collect::<Vec<_>>();
    if is_list {
        Ok(FleetData::List(resources))
    } else {
        Ok(FleetData::Single((!resources.is_empty()).then(|| resources.swap_remove(0))))
    }
}

/// Search `resource` across the fleet. `None` skips the query.
///
/// # Errors
///
/// Returns the [`ResourceError`] of the search request or its GraphQL errors.
pub async fn fleet_search(
    client: &FleetClient,
    resource: Option<&WatchResource>,
    advanced: &[SearchFilter],
    limit: Option<i64>,
) -> Result<Option<FleetData>, ResourceError> {
    let Some(resource) = resource else {
        return Ok(None);
    };

    let input = search_input(resource, advanced, limit);
    debug!("🔎 Fleet search for {} ({} filters)", resource.model.kind, input.filters.len());
    let body = client.search(search_query(&[input])).await?;
    search_results(&body, resource.is_list).map(Some)
}

fn set_path(target: &mut Value, path: &[&str], value: Value) {
    match path {
        [] => *target = value,
        [head, rest @ ..] => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                let child = map.entry((*head).to_string()).or_insert(Value::Null);
                set_path(child, rest, value);
            }
        }
    }
}

fn number(value: &Value) -> Value {
    match value {
        Value::Number(_) => value.clone(),
        Value::Bool(flag) => Value::from(u8::from(*flag)),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Value::from(0);
            }
            text.parse::<i64>().map(Value::from).unwrap_or_else(|_| {
                text.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(Value::Null, Value::Number)
            })
        }
        _ => Value::Null,
    }
}

fn flag(value: &Value) -> Value {
    match value.as_str() {
        Some(text) if text.eq_ignore_ascii_case("true") => Value::Bool(true),
        Some(text) if text.eq_ignore_ascii_case("false") => Value::Bool(false),
        _ => value.clone(),
    }
}

/// `"a=b; c=d"` to `{"a": "b", "c": "d"}`; `None` when no pair parses.
fn key_values(raw: &str) -> Option<Value> {
    let map: Map<String, Value> = raw
        .split(';')
        .filter_map(|pair| pair.trim_start().split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
        .collect();
    (!map.is_empty()).then_some(Value::Object(map))
}

fn names(raw: &str) -> Vec<&str> {
    raw.split(';').map(str::trim).filter(|name| !name.is_empty()).collect()
}

/// `"Ready=True;Available=False"` to condition objects.
fn conditions(raw: &str) -> Option<Value> {
    let parsed: Vec<Value> = raw
        .split(';')
        .filter(|condition| condition.contains('='))
        .filter_map(|condition| {
            let mut parts = condition.split('=');
            let kind = parts.next()?.trim();
            let status = parts.next()?.trim();
            (!kind.is_empty() && !status.is_empty()).then(|| json!({"type": kind, "status": status}))
        })
        .collect();
    (!parsed.is_empty()).then_some(Value::Array(parsed))
}

/// `<cluster>/<uid>` or a bare uid.
fn uid_tail(raw: &str) -> Option<&str> {
    raw.rsplit('/').next().filter(|uid| !uid.is_empty())
}

/// `name/interfaceName[index]=ip` entries grouped per interface.
fn interfaces(raw: &str) -> Vec<Value> {
    let mut groups: Vec<(&str, &str, Vec<&str>)> = Vec::new();
    for entry in raw.split(';') {
        let Some((target, ip)) = entry.trim().split_once('=') else {
            continue;
        };
        let ip = ip.trim();
        if ip.is_empty() {
            continue;
        }
        let target = target.split_once('[').map_or(target, |(head, _)| head);
        let (name, interface) = target.split_once('/').unwrap_or(("", target));
        let (name, interface) = (name.trim(), interface.trim());

        match groups.iter_mut().find(|(n, i, _)| *n == name && *i == interface) {
            Some((_, _, ips)) => ips.push(ip),
            None => groups.push((name, interface, vec![ip])),
        }
    }

    groups
        .into_iter()
        .map(|(name, interface, ips)| {
            let mut out = Map::new();
            if !name.is_empty() {
                out.insert("name".to_string(), json!(name));
            }
            if !interface.is_empty() {
                out.insert("interfaceName".to_string(), json!(interface));
            }
            out.insert("ipAddress".to_string(), json!(ips[0]));
            out.insert("ipAddresses".to_string(), json!(ips));
            Value::Object(out)
        })
        .collect()
}

struct Rebuild<'a> {
    item: &'a Value,
    resource: Value,
}

impl<'a> Rebuild<'a> {
    fn field(&self, field: &str) -> Option<&'a Value> {
        self.item.get(field).filter(|v| !v.is_null())
    }

    fn text(&self, field: &str) -> Option<&'a str> {
        self.field(field).and_then(Value::as_str)
    }

    fn put(&mut self, path: &[&str], value: Value) {
        set_path(&mut self.resource, path, value);
    }

    fn set(&mut self, field: &str, path: &[&str]) {
        self.set_with(field, path, Value::clone);
    }

    fn set_with(&mut self, field: &str, path: &[&str], convert: impl FnOnce(&Value) -> Value) {
        if let Some(value) = self.field(field) {
            let converted = convert(value);
            self.put(path, converted);
        }
    }

    /// `"a;b"` to `[{key: "a"}, {key: "b"}]`.
    fn named_list(&mut self, field: &str, path: &[&str], key: &str) {
        let entries: Vec<Value> = self
            .text(field)
            .map(names)
            .unwrap_or_default()
            .into_iter()
            .map(|name| {
                let mut entry = Map::new();
                entry.insert(key.to_string(), json!(name));
                Value::Object(entry)
            })
            .collect();
        if !entries.is_empty() {
            self.put(path, Value::Array(entries));
        }
    }

    fn has_conditions(&self) -> bool {
        self.resource.pointer("/status/conditions").is_some()
    }

    /// Conditions from individual fields, only if the `condition` string gave none.
    fn fallback_conditions(&mut self, fields: &[(&str, &str)]) {
        if self.has_conditions() {
            return;
        }
        let found: Vec<Value> = fields
            .iter()
            .filter_map(|(field, kind)| self.field(field).map(|status| json!({"type": kind, "status": status})))
            .collect();
        if !found.is_empty() {
            self.put(&["status", "conditions"], Value::Array(found));
        }
    }
}

/// Rebuild the structured resource behind one flattened search item.
#[must_use]
pub fn convert_search_item(item: &Value) -> Value {
    let mut rebuild = Rebuild {
        item,
        resource: Value::Object(Map::new()),
    };

    rebuild.set("cluster", &["cluster"]);
    let group = rebuild.text("apigroup").filter(|g| !g.is_empty());
    let version = rebuild.text("apiversion").unwrap_or_default();
    match group {
        Some(group) => rebuild.put(&["apiVersion"], json!(format!("{group}/{version}"))),
        None => rebuild.set("apiversion", &["apiVersion"]),
    }
    rebuild.set("kind", &["kind"]);
    rebuild.put(&["metadata"], Value::Object(Map::new()));
    rebuild.set("created", &["metadata", "creationTimestamp"]);
    rebuild.set("name", &["metadata", "name"]);
    rebuild.set("namespace", &["metadata", "namespace"]);
    if let Some(labels) = rebuild.text("label").and_then(key_values) {
        rebuild.put(&["metadata", "labels"], labels);
    }
    if let Some(annotations) = rebuild.text("annotation").and_then(key_values) {
        rebuild.put(&["metadata", "annotations"], annotations);
    }
    if let Some(uid) = rebuild.text("_uid").and_then(uid_tail) {
        rebuild.put(&["metadata", "uid"], json!(uid));
    }
    if let Some(owner) = rebuild.text("_ownerUID").and_then(uid_tail) {
        rebuild.put(&["metadata", "ownerReferences"], json!([{"uid": owner}]));
    }
    if let Some(parsed) = rebuild.text("condition").and_then(conditions) {
        rebuild.put(&["status", "conditions"], parsed);
    }

    let kind = rebuild.text("kind").unwrap_or_default();
    let key = group.map_or_else(|| kind.to_string(), |group| format!("{kind}.{group}"));
    unflatten(&mut rebuild, &key);
    rebuild.resource
}

#[allow(clippy::too_many_lines)]
fn unflatten(r: &mut Rebuild<'_>, key: &str) {
    match key {
        "ClusterServiceVersion.operators.coreos.com" => {
            r.set("version", &["spec", "version"]);
            r.set("display", &["spec", "displayName"]);
            r.set("phase", &["status", "phase"]);
        }
        "ClusterOperator.config.openshift.io" => {
            r.set_with("version", &["status", "versions"], |v| json!([{"name": "operator", "version": v}]));
            r.fallback_conditions(&[
                ("available", "Available"),
                ("progressing", "Progressing"),
                ("degraded", "Degraded"),
            ]);
        }
        "ConfigMap" => {
            for (field, leaf) in [
                ("configParamMaxDesiredLatency", "maxDesiredLatencyMilliseconds"),
                ("configParamNADNamespace", "networkAttachmentDefinitionNamespace"),
                ("configParamNADName", "networkAttachmentDefinitionName"),
                ("configParamTargetNode", "targetNode"),
                ("configParamSourceNode", "sourceNode"),
                ("configParamSampleDuration", "sampleDurationSeconds"),
            ] {
                r.set(field, &["data", "spec", "param", leaf]);
            }
            r.set("configTimeout", &["data", "spec", "timeout"]);
            for (field, leaf) in [
                ("configCompletionTimestamp", "completionTimestamp"),
                ("configStartTimestamp", "startTimestamp"),
                ("configSucceeded", "succeeded"),
                ("configFailureReason", "failureReason"),
            ] {
                r.set(field, &["data", "status", leaf]);
            }
            for (field, leaf) in [
                ("configStatusAVGLatencyNano", "avgLatencyNanoSec"),
                ("configStatusMaxLatencyNano", "maxLatencyNanoSec"),
                ("configStatusMinLatencyNano", "minLatencyNanoSec"),
                ("configStatusMeasurementDuration", "measurementDurationSec"),
                ("configStatusTargetNode", "targetNode"),
                ("configStatusSourceNode", "sourceNode"),
            ] {
                r.set(field, &["data", "status", "result", leaf]);
            }
        }
        "DataImportCron.cdi.kubevirt.io" => r.set("managedDataSource", &["spec", "managedDataSource"]),
        "DataSource.cdi.kubevirt.io" => data_source(r),
        "DataVolume.cdi.kubevirt.io" => {
            data_source(r);
            r.set("size", &["spec", "storage", "resources", "requests", "storage"]);
            r.set("storageClassName", &["spec", "storage", "storageClassName"]);
            r.set("phase", &["status", "phase"]);
        }
        "MigrationPolicy.migrations.kubevirt.io" => {
            r.set_with("allowAutoConverge", &["spec", "allowAutoConverge"], flag);
            r.set_with("allowPostCopy", &["spec", "allowPostCopy"], flag);
            r.set_with("bandwidthPerMigration", &["spec", "bandwidthPerMigration"], number);
            r.set_with("completionTimeoutPerGiB", &["spec", "completionTimeoutPerGiB"], number);
            for (field, leaf) in [
                ("_namespaceSelector", "namespaceSelector"),
                ("_virtualMachineInstanceSelector", "virtualMachineInstanceSelector"),
            ] {
                if let Some(selector) = r.text(field).and_then(key_values) {
                    r.put(&["spec", "selectors", leaf], selector);
                }
            }
        }
        "Namespace" => r.set("status", &["status", "phase"]),
        "Node" => {
            r.set_with("ipAddress", &["status", "addresses"], |v| {
                json!([{"type": "InternalIP", "address": v}])
            });
            r.set("memoryAllocatable", &["status", "allocatable", "memory"]);
            r.set("memoryCapacity", &["status", "capacity", "memory"]);
            r.set("architecture", &["status", "nodeInfo", "architecture"]);
        }
        "PersistentVolumeClaim" => {
            r.set("requestedStorage", &["spec", "resources", "requests", "storage"]);
            r.set("storageClassName", &["spec", "storageClassName"]);
            r.set("volumeMode", &["spec", "volumeMode"]);
            r.set("status", &["status", "phase"]);
            r.set("capacity", &["status", "capacity", "storage"]);
        }
        "Pod" => r.named_list("initContainer", &["spec", "initContainers"], "name"),
        "StorageClass.storage.k8s.io" => {
            for field in ["allowVolumeExpansion", "provisioner", "reclaimPolicy", "volumeBindingMode"] {
                r.set(field, &[field]);
            }
        }
        "Subscription.operators.coreos.com" => {
            r.set("source", &["spec", "source"]);
            r.set("package", &["spec", "name"]);
            r.set("channel", &["spec", "channel"]);
            r.set("installplan", &["status", "installedCSV"]);
            r.set("phase", &["status", "state"]);
        }
        "VirtualMachine.kubevirt.io" => virtual_machine(r),
        "VirtualMachineClone.clone.kubevirt.io" => {
            r.set("sourceKind", &["spec", "source", "kind"]);
            r.set("sourceName", &["spec", "source", "name"]);
            r.set("targetKind", &["spec", "target", "kind"]);
            r.set("targetName", &["spec", "target", "name"]);
            r.set("phase", &["status", "phase"]);
        }
        "VirtualMachineInstance.kubevirt.io" => virtual_machine_instance(r),
        "VirtualMachineInstanceMigration.kubevirt.io" => {
            r.set("deleted", &["metadata", "deletionTimestamp"]);
            for (field, leaf) in [
                ("endTime", "endTimestamp"),
                ("migrationPolicyName", "migrationPolicyName"),
                ("sourceNode", "sourceNode"),
                ("sourcePod", "sourcePod"),
                ("targetNode", "targetNode"),
            ] {
                r.set(field, &["status", "migrationState", leaf]);
            }
            r.set("phase", &["status", "phase"]);
            r.set("vmiName", &["spec", "vmiName"]);
        }
        "VirtualMachineInstancetype.instancetype.kubevirt.io"
        | "VirtualMachineClusterInstancetype.instancetype.kubevirt.io" => {
            r.set_with("cpuGuest", &["spec", "cpu", "guest"], number);
            r.set_with("memoryGuest", &["spec", "memory", "guest"], number);
        }
        "VirtualMachineSnapshot.snapshot.kubevirt.io" => {
            r.fallback_conditions(&[("ready", "Ready")]);
            r.set("phase", &["status", "phase"]);
            if let Some(indications) = r.text("indications").filter(|i| !i.is_empty()) {
                r.put(&["status", "indications"], json!(indications.split(';').collect::<Vec<_>>()));
            }
            r.set("sourceKind", &["spec", "source", "kind"]);
            r.set("sourceName", &["spec", "source", "name"]);
            r.set_with("readyToUse", &["status", "readyToUse"], flag);
        }
        "VirtualMachineRestore.snapshot.kubevirt.io" => {
            r.fallback_conditions(&[("ready", "Ready")]);
            r.set("restoreTime", &["status", "restoreTime"]);
            r.set_with("complete", &["status", "complete"], flag);
            r.set("targetApiGroup", &["spec", "target", "apiGroup"]);
            r.set("targetKind", &["spec", "target", "kind"]);
            r.set("targetName", &["spec", "target", "name"]);
            r.set("virtualMachineSnapshotName", &["spec", "virtualMachineSnapshotName"]);
        }
        "VolumeSnapshot.snapshot.storage.k8s.io" => {
            r.set("volumeSnapshotClassName", &["spec", "volumeSnapshotClassName"]);
            r.set("persistentVolumeClaimName", &["spec", "source", "persistentVolumeClaimName"]);
            r.set("restoreSize", &["status", "restoreSize"]);
        }
        _ => {}
    }
}

fn data_source(r: &mut Rebuild<'_>) {
    r.set("pvcName", &["spec", "source", "pvc", "name"]);
    r.set("pvcNamespace", &["spec", "source", "pvc", "namespace"]);
    r.set("snapshotName", &["spec", "source", "snapshot", "name"]);
    r.set("snapshotNamespace", &["spec", "source", "snapshot", "namespace"]);
}

fn virtual_machine(r: &mut Rebuild<'_>) {
    r.set_with("instancetype", &["spec", "instancetype"], |v| json!({"name": v}));
    r.set_with("preference", &["spec", "preference"], |v| json!({"name": v}));
    r.set("runStrategy", &["spec", "runStrategy"]);
    r.set("architecture", &["spec", "template", "spec", "architecture"]);
    r.set_with("cpu", &["spec", "template", "spec", "domain", "cpu", "cores"], number);
    r.set("memory", &["spec", "template", "spec", "domain", "memory", "guest"]);
    for (field, annotation) in [
        ("flavor", "vm.kubevirt.io/flavor"),
        ("osName", "vm.kubevirt.io/os"),
        ("workload", "vm.kubevirt.io/workload"),
    ] {
        r.set(field, &["spec", "template", "metadata", "annotations", annotation]);
    }

    let data_volumes = r.text("dataVolumeNames").map(names).unwrap_or_default();
    let claims = r.text("pvcClaimNames").map(names).unwrap_or_default();
    let volumes: Vec<Value> = data_volumes
        .into_iter()
        .map(|name| json!({"dataVolume": {"name": name}}))
        .chain(claims.into_iter().map(|claim| json!({"persistentVolumeClaim": {"claimName": claim}})))
        .collect();
    if !volumes.is_empty() {
        r.put(&["spec", "template", "spec", "volumes"], Value::Array(volumes));
    }

    r.fallback_conditions(&[("ready", "Ready"), ("agentConnected", "AgentConnected")]);
    r.set("status", &["status", "printableStatus"]);
}

fn virtual_machine_instance(r: &mut Rebuild<'_>) {
    r.set_with("cpu", &["spec", "domain", "cpu", "cores"], number);
    r.set_with("cpuSockets", &["spec", "domain", "cpu", "sockets"], number);
    r.set_with("cpuThreads", &["spec", "domain", "cpu", "threads"], number);
    r.set("memory", &["spec", "domain", "memory", "guest"]);
    r.named_list("gpuName", &["spec", "domain", "devices", "gpus"], "name");
    r.named_list("hostDeviceName", &["spec", "domain", "devices", "hostDevices"], "name");
    r.named_list("interfaceName", &["spec", "domain", "devices", "interfaces"], "name");

    r.fallback_conditions(&[("liveMigratable", "LiveMigratable"), ("ready", "Ready")]);

    let parsed = r.text("_interface").map(interfaces).unwrap_or_default();
    if parsed.is_empty() {
        r.set_with("ipaddress", &["status", "interfaces"], |v| {
            json!([{"ipAddress": v, "name": "default"}])
        });
    } else {
        r.put(&["status", "interfaces"], Value::Array(parsed));
    }
    r.set("node", &["status", "nodeName"]);
    r.set("phase", &["status", "phase"]);
    r.set("osVersion", &["status", "guestOSInfo", "version"]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::model::ResourceModel;

    fn base(extra: Value) -> Value {
        let mut item = json!({
            "cluster": "test-cluster",
            "apigroup": "",
            "apiversion": "v1",
            "kind": "Pod",
            "name": "test-pod",
            "namespace": "default",
            "created": "2023-01-01T00:00:00Z",
            "label": "app=test;version=1.0",
        });
        if let (Value::Object(item), Value::Object(extra)) = (&mut item, extra) {
            item.extend(extra);
        }
        item
    }

    #[test]
    fn basic_item_becomes_a_resource() {
        assert_eq!(
            convert_search_item(&base(json!({}))),
            json!({
                "cluster": "test-cluster",
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {
                    "creationTimestamp": "2023-01-01T00:00:00Z",
                    "name": "test-pod",
                    "namespace": "default",
                    "labels": {"app": "test", "version": "1.0"},
                },
            })
        );

        let deployment = convert_search_item(&base(json!({"apigroup": "apps", "kind": "Deployment"})));
        assert_eq!(deployment["apiVersion"], "apps/v1");
    }

    #[test]
    fn labels_annotations_and_uids() {
        let item = base(json!({
            "label": " app=test; version=1.0",
            "annotation": " description=Test annotation; owner=team-b",
            "_uid": "test-cluster/abc-123",
        }));
        let resource = convert_search_item(&item);
        assert_eq!(resource["metadata"]["labels"], json!({"app": "test", "version": "1.0"}));
        assert_eq!(
            resource["metadata"]["annotations"],
            json!({"description": "Test annotation", "owner": "team-b"})
        );
        assert_eq!(resource["metadata"]["uid"], "abc-123");

        let empty = convert_search_item(&base(json!({"label": "", "annotation": "", "_uid": ""})));
        assert!(empty["metadata"].get("labels").is_none());
        assert!(empty["metadata"].get("annotations").is_none());
        assert!(empty["metadata"].get("uid").is_none());

        let direct = convert_search_item(&base(json!({"_uid": "xyz-789"})));
        assert_eq!(direct["metadata"]["uid"], "xyz-789");
    }

    #[test]
    fn condition_strings_skip_malformed_entries() {
        let resource = convert_search_item(&base(json!({"condition": "Ready=True;invalid;Available=False"})));
        assert_eq!(
            resource["status"]["conditions"],
            json!([{"type": "Ready", "status": "True"}, {"type": "Available", "status": "False"}])
        );

        let malformed = convert_search_item(&base(json!({"condition": "invalid;also-invalid"})));
        assert!(malformed.get("status").is_none());
    }

    #[test]
    fn cluster_operator_conditions_yield_to_the_condition_string() {
        let fields = json!({
            "kind": "ClusterOperator",
            "apigroup": "config.openshift.io",
            "version": "4.12.0",
            "available": "True",
            "progressing": "False",
            "degraded": "False",
        });
        let resource = convert_search_item(&base(fields.clone()));
        assert_eq!(resource["status"]["versions"], json!([{"name": "operator", "version": "4.12.0"}]));
        assert_eq!(
            resource["status"]["conditions"],
            json!([
                {"type": "Available", "status": "True"},
                {"type": "Progressing", "status": "False"},
                {"type": "Degraded", "status": "False"},
            ])
        );

        let mut with_string = fields;
        with_string["condition"] = json!("Available=False;Degraded=True");
        let resource = convert_search_item(&base(with_string));
        assert_eq!(
            resource["status"]["conditions"],
            json!([{"type": "Available", "status": "False"}, {"type": "Degraded", "status": "True"}])
        );
    }

    #[test]
    fn pvc_and_pod_fields() {
        let pvc = convert_search_item(&base(json!({
            "kind": "PersistentVolumeClaim",
            "requestedStorage": "5Gi",
            "storageClassName": "gp3-csi",
            "volumeMode": "Filesystem",
            "status": "Bound",
            "capacity": "5Gi",
        })));
        assert_eq!(
            pvc["spec"],
            json!({"resources": {"requests": {"storage": "5Gi"}}, "storageClassName": "gp3-csi", "volumeMode": "Filesystem"})
        );
        assert_eq!(pvc["status"], json!({"phase": "Bound", "capacity": {"storage": "5Gi"}}));

        let pod = convert_search_item(&base(json!({
            "_ownerUID": "test-cluster/abc-123",
            "initContainer": "init-db;init-config",
        })));
        assert_eq!(pod["metadata"]["ownerReferences"], json!([{"uid": "abc-123"}]));
        assert_eq!(pod["spec"]["initContainers"], json!([{"name": "init-db"}, {"name": "init-config"}]));

        let bare = convert_search_item(&base(json!({"initContainer": ""})));
        assert!(bare.get("spec").is_none());
    }

    #[test]
    fn migration_policy_converts_types_and_selectors() {
        let resource = convert_search_item(&base(json!({
            "kind": "MigrationPolicy",
            "apigroup": "migrations.kubevirt.io",
            "allowAutoConverge": "true",
            "allowPostCopy": "false",
            "bandwidthPerMigration": "1073741824",
            "completionTimeoutPerGiB": "800",
            "_namespaceSelector": "environment=production;team=backend",
            "_virtualMachineInstanceSelector": "",
        })));
        assert_eq!(resource["spec"]["allowAutoConverge"], true);
        assert_eq!(resource["spec"]["allowPostCopy"], false);
        assert_eq!(resource["spec"]["bandwidthPerMigration"], 1_073_741_824_i64);
        assert_eq!(resource["spec"]["completionTimeoutPerGiB"], 800);
        assert_eq!(
            resource["spec"]["selectors"],
            json!({"namespaceSelector": {"environment": "production", "team": "backend"}})
        );
    }

    #[test]
    fn virtual_machine_spec_is_rebuilt() {
        let resource = convert_search_item(&base(json!({
            "kind": "VirtualMachine",
            "apigroup": "kubevirt.io",
            "cpu": "4",
            "memory": "8Gi",
            "ready": "True",
            "status": "Running",
            "flavor": "large",
            "osName": "rhel8",
            "workload": "server",
            "runStrategy": "Always",
            "architecture": "amd64",
            "instancetype": "u1.medium",
            "preference": "rhel.9",
            "dataVolumeNames": " dv1 ; dv2 ",
            "pvcClaimNames": "pvc1",
        })));

        assert_eq!(
            resource["spec"],
            json!({
                "instancetype": {"name": "u1.medium"},
                "preference": {"name": "rhel.9"},
                "runStrategy": "Always",
                "template": {
                    "spec": {
                        "architecture": "amd64",
                        "domain": {"cpu": {"cores": 4}, "memory": {"guest": "8Gi"}},
                        "volumes": [
                            {"dataVolume": {"name": "dv1"}},
                            {"dataVolume": {"name": "dv2"}},
                            {"persistentVolumeClaim": {"claimName": "pvc1"}},
                        ],
                    },
                    "metadata": {
                        "annotations": {
                            "vm.kubevirt.io/flavor": "large",
                            "vm.kubevirt.io/os": "rhel8",
                            "vm.kubevirt.io/workload": "server",
                        },
                    },
                },
            })
        );
        assert_eq!(resource["status"]["printableStatus"], "Running");
        assert_eq!(resource["status"]["conditions"], json!([{"type": "Ready", "status": "True"}]));
    }

    #[test]
    fn virtual_machine_instance_status_and_interfaces() {
        let resource = convert_search_item(&base(json!({
            "kind": "VirtualMachineInstance",
            "apigroup": "kubevirt.io",
            "cpu": "4",
            "cpuSockets": "2",
            "cpuThreads": "2",
            "memory": "8Gi",
            "liveMigratable": "True",
            "ready": "True",
            "ipaddress": "10.128.0.50",
            "node": "worker-1",
            "phase": "Running",
            "osVersion": "Red Hat Enterprise Linux 8.6",
        })));
        assert_eq!(
            resource["spec"],
            json!({"domain": {"cpu": {"cores": 4, "sockets": 2, "threads": 2}, "memory": {"guest": "8Gi"}}})
        );
        assert_eq!(
            resource["status"],
            json!({
                "conditions": [{"type": "LiveMigratable", "status": "True"}, {"type": "Ready", "status": "True"}],
                "interfaces": [{"ipAddress": "10.128.0.50", "name": "default"}],
                "nodeName": "worker-1",
                "phase": "Running",
                "guestOSInfo": {"version": "Red Hat Enterprise Linux 8.6"},
            })
        );

        let grouped = convert_search_item(&base(json!({
            "kind": "VirtualMachineInstance",
            "apigroup": "kubevirt.io",
            "_interface": "default/eth0[0]=10.0.0.1; default/eth0[1]=10.0.0.3; /[0]=10.0.0.2",
            "gpuName": "nvidia.com/GPU",
        })));
        assert_eq!(
            grouped["status"]["interfaces"],
            json!([
                {"name": "default", "interfaceName": "eth0", "ipAddress": "10.0.0.1", "ipAddresses": ["10.0.0.1", "10.0.0.3"]},
                {"ipAddress": "10.0.0.2", "ipAddresses": ["10.0.0.2"]},
            ])
        );
        assert_eq!(grouped["spec"]["domain"]["devices"]["gpus"], json!([{"name": "nvidia.com/GPU"}]));
    }

    #[test]
    fn snapshots_and_restores() {
        let snapshot = convert_search_item(&base(json!({
            "kind": "VirtualMachineSnapshot",
            "apigroup": "snapshot.kubevirt.io",
            "ready": "False",
            "indications": "Online;NoGuestAgent",
            "readyToUse": "false",
        })));
        assert_eq!(snapshot["status"]["conditions"], json!([{"type": "Ready", "status": "False"}]));
        assert_eq!(snapshot["status"]["indications"], json!(["Online", "NoGuestAgent"]));
        assert_eq!(snapshot["status"]["readyToUse"], false);

        let restore = convert_search_item(&base(json!({
            "kind": "VirtualMachineRestore",
            "apigroup": "snapshot.kubevirt.io",
            "ready": "True",
            "condition": "Ready=False;Failed=True",
            "complete": true,
            "targetKind": "VirtualMachine",
        })));
        assert_eq!(
            restore["status"]["conditions"],
            json!([{"type": "Ready", "status": "False"}, {"type": "Failed", "status": "True"}])
        );
        assert_eq!(restore["status"]["complete"], true);
        assert_eq!(restore["spec"]["target"]["kind"], "VirtualMachine");
    }

    #[test]
    fn unknown_kinds_keep_only_the_common_fields() {
        let resource = convert_search_item(&base(json!({
            "kind": "CustomResource",
            "apigroup": "example.com",
            "customField": "customValue",
        })));
        assert_eq!(resource["apiVersion"], "example.com/v1");
        assert_eq!(resource["cluster"], "test-cluster");
        assert!(resource.get("customField").is_none());
        assert!(resource.get("spec").is_none());
    }

    #[test]
    fn search_input_orders_filters_and_skips_taken_properties() {
        let resource = WatchResource::list(ResourceModel::pod())
            .namespace("default")
            .cluster("managed-cluster-1");
        let advanced = [
            SearchFilter::new("kind", ["Service"]),
            SearchFilter::new("cluster", ["different-cluster"]),
            SearchFilter::new("label", ["app=test"]),
            SearchFilter::new("status", Vec::<String>::new()),
            SearchFilter::new("", ["ignored"]),
        ];

        assert_eq!(
            search_input(&resource, &advanced, None),
            SearchInput {
                filters: vec![
                    SearchFilter::new("cluster", ["managed-cluster-1"]),
                    SearchFilter::new("apiversion", ["v1"]),
                    SearchFilter::new("kind", ["Pod"]),
                    SearchFilter::new("namespace", ["default"]),
                    SearchFilter::new("label", ["app=test"]),
                ],
                limit: -1,
            }
        );
    }

    #[test]
    fn search_input_for_grouped_and_cluster_scoped_models() {
        let deployments = ResourceModel::new("apps/v1", "Deployment", "deployments", true).with_group("apps");
        let single = WatchResource::single(deployments, "web").namespace("default");
        let filters: Vec<_> = search_input(&single, &[], Some(10))
            .filters
            .into_iter()
            .map(|f| f.property)
            .collect();
        assert_eq!(filters, ["apigroup", "apiversion", "kind", "namespace", "name"]);

        let mut scoped = WatchResource::list(ResourceModel::pod()).namespace("default");
        scoped.model.namespaced = false;
        let input = search_input(&scoped, &[], Some(10));
        assert_eq!(input.limit, 10);
        assert!(input.filters.iter().all(|f| f.property != "namespace"));
    }

    #[test]
    fn search_results_unwrap_the_graphql_envelope() {
        let body = json!({"data": {"searchResult": [{"items": [base(json!({})), base(json!({"name": "other"}))]}]}});
        assert_eq!(search_results(&body, true).unwrap().len(), 2);
        match search_results(&body, false).unwrap() {
            FleetData::Single(Some(first)) => assert_eq!(first["metadata"]["name"], "test-pod"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(search_results(&json!({}), false).unwrap(), FleetData::Single(None));

        let failed = json!({"errors": [{"message": "bad filter"}]});
        let err = search_results(&failed, true).unwrap_err();
        assert_eq!(err.code, ResourceErrorCode::BadRequest);
        assert_eq!(err.message, "bad filter");
    }
}
