mod common;

use common::{Harness, MockHub, MockHttp, pod, spoke_base};
use fleet_sdk::k8s::BACKEND_PATH;
use fleet_sdk::k8s::cache::{FleetData, WatchResource};
use fleet_sdk::k8s::search::{SearchFilter, fleet_search};
use fleet_sdk::k8s::dispatch::FleetClient;
use fleet_sdk::k8s::fleet_config::FleetConfigService;
use fleet_sdk::k8s::model::{FleetRequest, PropagationPolicy, ResourceModel};
use fleet_sdk::k8s::request::{FetchClient, HttpResponse, Method};
use fleet_sdk::k8s::resource_error::ResourceErrorCode;
use fleet_sdk::k8s::session::SessionExpiryNotifier;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn test_remote_get_goes_through_the_proxy() {
    let harness = Harness::new();
    let url = format!("{}/api/v1/namespaces/ns1/pods/p", spoke_base("spoke-1"));
    assert_eq!(
        url,
        "/api/proxy/plugin/acm/console/multicloud/managedclusterproxy/spoke-1/api/v1/namespaces/ns1/pods/p"
    );
    harness.http.respond_json(&url, &pod("p", "u1"));

    let request = FleetRequest::new(ResourceModel::pod()).cluster("spoke-1").ns("ns1").name("p");
    let body = harness.client.fleet_get(&request).await.unwrap();

    assert_eq!(body, pod("p", "u1"));
    let calls = harness.http.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, Method::Get);
    assert!(harness.hub.calls().is_empty());
}

#[tokio::test]
async fn test_hub_requests_use_the_native_client() {
    let harness = Harness::new();

    let named_hub = FleetRequest::new(ResourceModel::pod())
        .cluster("local-cluster")
        .ns("ns1")
        .name("p");
    let body = harness.client.fleet_get(&named_hub).await.unwrap();
    assert_eq!(body["source"], "hub");

    let no_cluster = FleetRequest::new(ResourceModel::pod()).ns("ns1").name("q");
    harness.client.fleet_get(&no_cluster).await.unwrap();

    let calls = harness.hub.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|(op, request)| *op == "get" && request.cluster.is_none()));
    assert!(harness.http.calls().is_empty());
}

#[tokio::test]
async fn test_hub_create_strips_the_cluster_annotation() {
    let harness = Harness::new();
    let mut object = pod("p", "u1");
    object["cluster"] = json!("local-cluster");

    harness
        .client
        .fleet_create(&FleetRequest::new(ResourceModel::pod()).data(object))
        .await
        .unwrap();

    let calls = harness.hub.calls();
    assert_eq!(calls[0].0, "create");
    assert!(calls[0].1.data.as_ref().unwrap().get("cluster").is_none());
}

#[tokio::test]
async fn test_remote_create_posts_to_the_collection() {
    let harness = Harness::new();
    let url = format!("{}/api/v1/namespaces/ns1/pods", spoke_base("spoke-1"));
    harness.http.respond(&url, HttpResponse::json(201, &pod("p", "u1")));

    let mut object = pod("p", "u1");
    object["cluster"] = json!("spoke-1");
    let created = harness
        .client
        .fleet_create(&FleetRequest::new(ResourceModel::pod()).data(object))
        .await
        .unwrap();
    assert_eq!(created, pod("p", "u1"));

    let calls = harness.http.calls();
    assert_eq!(calls[0].method, Method::Post);
    assert_eq!(calls[0].url, url);
    let sent: Value = serde_json::from_slice(calls[0].body.as_ref().unwrap()).unwrap();
    assert!(sent.get("cluster").is_none());
    assert_eq!(sent["metadata"]["name"], "p");
}

#[tokio::test]
async fn test_remote_patch_content_type_follows_the_payload() {
    let harness = Harness::new();
    let url = format!("{}/api/v1/namespaces/ns1/pods/p", spoke_base("spoke-1"));
    harness.http.respond_json(&url, &pod("p", "u1"));

    let target = {
        let mut target = pod("p", "u1");
        target["cluster"] = json!("spoke-1");
        target
    };
    let json_patch = FleetRequest::new(ResourceModel::pod())
        .resource(target.clone())
        .data(json!([{"op": "add", "path": "/metadata/labels/a", "value": "b"}]));
    harness.client.fleet_patch(&json_patch).await.unwrap();

    let merge_patch = FleetRequest::new(ResourceModel::pod())
        .resource(target)
        .data(json!({"metadata": {"labels": {"a": "b"}}}));
    harness.client.fleet_patch(&merge_patch).await.unwrap();

    let calls = harness.http.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.method == Method::Patch && c.url == url));
    assert_eq!(calls[0].header("content-type"), Some("application/json-patch+json"));
    assert_eq!(calls[1].header("content-type"), Some("application/merge-patch+json"));
    assert_eq!(calls[0].header("accept"), Some("application/json"));
}

#[tokio::test]
async fn test_remote_delete_sends_delete_options() {
    let harness = Harness::new();
    let url = format!("{}/apis/apps/v1/namespaces/ns1/deployments/web", spoke_base("spoke-1"));
    harness.http.respond_json(&url, &json!({"kind": "Status", "status": "Success"}));

    let model = ResourceModel::new("v1", "Deployment", "deployments", true)
        .with_group("apps")
        .with_propagation_policy(PropagationPolicy::Foreground);
    let request = FleetRequest::new(model).cluster("spoke-1").ns("ns1").name("web");
    harness.client.fleet_delete(&request).await.unwrap();

    let calls = harness.http.calls();
    assert_eq!(calls[0].method, Method::Delete);
    let sent: Value = serde_json::from_slice(calls[0].body.as_ref().unwrap()).unwrap();
    assert_eq!(
        sent,
        json!({"kind": "DeleteOptions", "apiVersion": "v1", "propagationPolicy": "Foreground"})
    );
}

#[tokio::test]
async fn test_remote_errors_propagate_unchanged() {
    let harness = Harness::new();
    let url = format!("{}/api/v1/namespaces/ns1/pods/missing", spoke_base("spoke-1"));
    harness.http.respond(
        &url,
        HttpResponse::json(403, &json!({"kind": "Status", "status": "Failure", "code": 403, "message": "denied"})),
    );

    let request = FleetRequest::new(ResourceModel::pod()).cluster("spoke-1").ns("ns1").name("missing");
    let err = harness.client.fleet_get(&request).await.unwrap_err();

    assert_eq!(err.code, ResourceErrorCode::Forbidden);
    assert_eq!(err.message, "denied");
}

#[derive(Default)]
struct CountingSession(AtomicUsize);

impl SessionExpiryNotifier for CountingSession {
    fn session_expired(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_fleet_calls_never_force_a_logout() {
    let http = MockHttp::new();
    let session = Arc::new(CountingSession::default());
    let fetch = FetchClient::new(http.clone()).with_session_notifier(session.clone());
    let fleet_config =
        Arc::new(FleetConfigService::new(fetch.clone(), BACKEND_PATH).with_hub_override(Some("local-cluster".to_string())));
    let client = FleetClient::new(fetch.clone(), MockHub::new(), fleet_config, BACKEND_PATH);

    let url = format!("{}/api/v1/namespaces/ns1/pods/p", spoke_base("spoke-1"));
    http.respond(&url, HttpResponse::new(401, ""));

    let request = FleetRequest::new(ResourceModel::pod()).cluster("spoke-1").ns("ns1").name("p");
    let err = client.fleet_get(&request).await.unwrap_err();
    assert_eq!(err.code, ResourceErrorCode::Unauthorized);
    assert_eq!(session.0.load(Ordering::SeqCst), 0);

    // A plain fetch of the same URL does trigger the session handler.
    assert!(fetch.get_json(&url, None).await.is_err());
    assert_eq!(session.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fleet_search_posts_the_query_and_rebuilds_items() {
    let harness = Harness::new();
    let url = format!("{BACKEND_PATH}/proxy/search");
    harness.http.respond_json(
        &url,
        &json!({"data": {"searchResult": [{"items": [{
            "cluster": "spoke-1",
            "kind": "Pod",
            "apiversion": "v1",
            "name": "p",
            "namespace": "ns1",
            "label": "app=web",
            "_uid": "spoke-1/u1",
        }]}]}}),
    );

    let resource = WatchResource::list(ResourceModel::pod()).namespace("ns1").cluster("spoke-1");
    let advanced = [SearchFilter::new("label", ["app=web"])];
    let found = fleet_search(&harness.client, Some(&resource), &advanced, None)
        .await
        .unwrap()
        .unwrap();

    let FleetData::List(items) = found else { panic!("list expected") };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["cluster"], "spoke-1");
    assert_eq!(items[0]["metadata"]["uid"], "u1");
    assert_eq!(items[0]["metadata"]["labels"]["app"], "web");

    let calls = harness.http.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, Method::Post);
    let sent: Value = serde_json::from_slice(calls[0].body.as_ref().unwrap()).unwrap();
    assert_eq!(sent["operationName"], "searchResultItems");
    let filters = sent["variables"]["input"][0]["filters"].as_array().unwrap();
    let properties: Vec<_> = filters.iter().map(|f| f["property"].as_str().unwrap()).collect();
    assert_eq!(properties, ["cluster", "apiversion", "kind", "namespace", "label"]);
    assert!(harness.hub.calls().is_empty());

    assert!(fleet_search(&harness.client, None, &[], None).await.unwrap().is_none());
    assert_eq!(harness.http.calls().len(), 1);
}
