#![allow(dead_code)]

use async_trait::async_trait;
use fleet_sdk::k8s::DEFAULT_HUB_NAME;
use fleet_sdk::k8s::cache::{CacheConfig, CachedResult, FleetData, FleetResourceCache, FleetWatcher, WatchResource};
use fleet_sdk::k8s::dispatch::FleetClient;
use fleet_sdk::k8s::fleet_config::FleetConfigService;
use fleet_sdk::k8s::hub::{HubClient, HubWatch};
use fleet_sdk::k8s::model::FleetRequest;
use fleet_sdk::k8s::request::{FetchClient, HttpRequest, HttpResponse, HttpTransport, TransportError};
use fleet_sdk::k8s::resource_error::{ResourceError, ResourceErrorCode};
use fleet_sdk::k8s::watch::{FrameStream, PageLocation, WatchSocketFactory, WatchTransport};
use fleet_sdk::k8s::BACKEND_PATH;
use futures::StreamExt;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

pub const ORIGIN: &str = "http://localhost:9000";

pub fn spoke_base(cluster: &str) -> String {
    format!("{BACKEND_PATH}/managedclusterproxy/{cluster}")
}

/// HTTP transport answering from a per-URL table and recording every request.
#[derive(Default)]
pub struct MockHttp {
    responses: Mutex<HashMap<String, HttpResponse>>,
    calls: Mutex<Vec<HttpRequest>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, response: HttpResponse) {
        self.responses.lock().unwrap().insert(url.to_string(), response);
    }

    pub fn respond_json(&self, url: &str, body: &Value) {
        self.respond(url, HttpResponse::json(200, body));
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|r| r.url == url).count()
    }

    /// Park every request after it is recorded until [`Self::release`].
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.close();
        }
    }

    /// Wait until `url` has been requested `count` times.
    pub async fn wait_for_calls(&self, url: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls_to(url) < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("request not made in time");
    }
}

#[async_trait]
impl HttpTransport for MockHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.clone();
        self.calls.lock().unwrap().push(request);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }
        let response = self.responses.lock().unwrap().get(&url).cloned();
        Ok(response.unwrap_or_else(|| {
            HttpResponse::json(404, &json!({"kind": "Status", "code": 404, "message": "not found"}))
        }))
    }
}

/// A socket the test can push frames into.
pub struct OpenedSocket {
    pub url: String,
    pub frames: mpsc::UnboundedSender<Result<String, TransportError>>,
}

impl OpenedSocket {
    pub fn push(&self, event_type: &str, object: &Value) {
        let frame = json!({"type": event_type, "object": object}).to_string();
        self.frames.send(Ok(frame)).unwrap();
    }

    pub fn push_raw(&self, frame: &str) {
        self.frames.send(Ok(frame.to_string())).unwrap();
    }
}

pub struct MockSockets {
    opened: mpsc::UnboundedSender<OpenedSocket>,
}

impl MockSockets {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<OpenedSocket>) {
        let (opened, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { opened }), rx)
    }
}

#[async_trait]
impl WatchTransport for MockSockets {
    async fn connect(&self, url: &str) -> Result<FrameStream, TransportError> {
        let (frames, rx) = mpsc::unbounded_channel();
        self.opened
            .send(OpenedSocket {
                url: url.to_string(),
                frames,
            })
            .map_err(|_| TransportError::ConnectionReset)?;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// Native hub client that answers every call with the request echoed back.
#[derive(Default)]
pub struct MockHub {
    calls: Mutex<Vec<(&'static str, FleetRequest)>>,
    watches: Mutex<Vec<WatchResource>>,
    pub list_items: Mutex<Vec<Value>>,
    pub fail_creates: Mutex<bool>,
    pub allowed: Mutex<bool>,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            allowed: Mutex::new(true),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<(&'static str, FleetRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn watches(&self) -> Vec<WatchResource> {
        self.watches.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str, request: &FleetRequest) {
        self.calls.lock().unwrap().push((op, request.clone()));
    }
}

#[async_trait]
impl HubClient for MockHub {
    async fn get(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        self.record("get", request);
        match &request.name {
            Some(name) => Ok(json!({"metadata": {"name": name}, "source": "hub"})),
            None => Ok(json!({"items": self.list_items.lock().unwrap().clone()})),
        }
    }

    async fn create(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        self.record("create", request);
        if *self.fail_creates.lock().unwrap() {
            return Err(ResourceError::new(ResourceErrorCode::ServiceUnavailable));
        }
        if request.model.kind == "SelfSubjectAccessReview" {
            let mut review = request.data.clone().unwrap_or(Value::Null);
            review["status"] = json!({"allowed": *self.allowed.lock().unwrap()});
            return Ok(review);
        }
        Ok(request.data.clone().unwrap_or(Value::Null))
    }

    async fn update(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        self.record("update", request);
        Ok(request.data.clone().unwrap_or(Value::Null))
    }

    async fn patch(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        self.record("patch", request);
        Ok(request.data.clone().unwrap_or(Value::Null))
    }

    async fn delete(&self, request: &FleetRequest) -> Result<Value, ResourceError> {
        self.record("delete", request);
        Ok(json!({"kind": "Status", "status": "Success"}))
    }

    fn watch_resource(&self, resource: &WatchResource) -> HubWatch {
        self.watches.lock().unwrap().push(resource.clone());
        let data = if resource.is_list {
            FleetData::List(vec![json!({"metadata": {"name": "hub-object", "uid": "hub-1"}})])
        } else {
            FleetData::Single(Some(json!({"metadata": {"name": resource.name.clone()}})))
        };
        let (tx, state) = watch::channel(CachedResult::loading(resource.is_list));
        let task = tokio::spawn(async move {
            tx.send_replace(CachedResult::loaded(data));
            tx.closed().await;
        });
        HubWatch { state, task }
    }
}

pub struct Harness {
    pub http: Arc<MockHttp>,
    pub hub: Arc<MockHub>,
    pub opened: mpsc::UnboundedReceiver<OpenedSocket>,
    pub cache: Arc<FleetResourceCache>,
    pub client: FleetClient,
    pub watcher: FleetWatcher,
}

impl Harness {
    pub fn new() -> Self {
        let http = MockHttp::new();
        let hub = MockHub::new();
        let (sockets, opened) = MockSockets::new();

        let fetch = FetchClient::new(http.clone());
        let fleet_config = Arc::new(
            FleetConfigService::new(fetch.clone(), BACKEND_PATH).with_hub_override(Some(DEFAULT_HUB_NAME.to_string())),
        );
        let factory = WatchSocketFactory::new(sockets, PageLocation::from_url(ORIGIN).unwrap(), BACKEND_PATH)
            .with_hub(Some(DEFAULT_HUB_NAME.to_string()));
        let cache = Arc::new(FleetResourceCache::new(CacheConfig::default()));

        let client = FleetClient::new(fetch.clone(), hub.clone(), Arc::clone(&fleet_config), BACKEND_PATH);
        let watcher = FleetWatcher::new(
            Arc::clone(&cache),
            fetch,
            factory,
            hub.clone(),
            fleet_config,
            BACKEND_PATH,
        );

        Self {
            http,
            hub,
            opened,
            cache,
            client,
            watcher,
        }
    }

    /// Next socket the watcher opened.
    pub async fn next_socket(&mut self) -> OpenedSocket {
        tokio::time::timeout(Duration::from_secs(5), self.opened.recv())
            .await
            .expect("no socket opened in time")
            .expect("socket transport dropped")
    }

    /// `true` if no further socket was opened within a short grace period.
    pub async fn no_more_sockets(&mut self) -> bool {
        tokio::time::timeout(Duration::from_millis(100), self.opened.recv())
            .await
            .is_err()
    }
}

pub fn pod(name: &str, uid: &str) -> Value {
    json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": name, "namespace": "ns1", "uid": uid}})
}

pub fn pod_list(items: &[Value], resource_version: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "PodList",
        "metadata": {"resourceVersion": resource_version},
        "items": items,
    })
}
