//! Watch socket factory: builds `?watch=true` URLs and opens one socket per call.

use super::model::ResourceModel;
use super::request::TransportError;
use super::selector::{LabelSelector, selector_to_string};
use super::url::{PathOptions, encode_query, fleet_api_path, is_remote_cluster, resource_path};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchQuery {
    pub ns: Option<String>,
    /// Carried for fingerprinting only; single objects are pinned with `field_selector`.
    pub name: Option<String>,
    pub cluster: Option<String>,
    pub label_selector: Option<LabelSelector>,
    pub field_selector: Option<String>,
    pub resource_version: Option<String>,
}

impl WatchQuery {
    #[must_use]
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("watch".to_string(), "true".to_string())];
        if let Some(selector) = self.label_selector.as_ref().filter(|s| !s.is_empty()) {
            params.push(("labelSelector".to_string(), selector_to_string(selector)));
        }
        if let Some(field_selector) = self.field_selector.as_ref().filter(|s| !s.is_empty()) {
            params.push(("fieldSelector".to_string(), field_selector.clone()));
        }
        if let Some(version) = self.resource_version.as_ref().filter(|v| !v.is_empty()) {
            params.push(("resourceVersion".to_string(), version.clone()));
        }
        params
    }
}

/// Scheme, host and port of the page the console is served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    pub secure: bool,
    pub host: String,
    pub port: Option<u16>,
}

impl PageLocation {
    /// # Errors
    ///
    /// Returns an error if `origin` is not an absolute URL with a host.
    pub fn from_url(origin: &str) -> crate::error::Result<Self> {
        let url = Url::parse(origin)?;
        let host = url
            .host_str()
            .ok_or_else(|| crate::error::Error::Custom(format!("origin has no host: {origin}")))?;
        Ok(Self {
            secure: url.scheme() == "https",
            host: host.to_string(),
            port: url.port(),
        })
    }

    #[must_use]
    pub fn socket_origin(&self) -> String {
        let (scheme, default_port) = if self.secure { ("wss", 443) } else { ("ws", 80) };
        format!("{scheme}://{}:{}", self.host, self.port.unwrap_or(default_port))
    }
}

/// `{base}{collection path}?watch=true[&labelSelector][&fieldSelector][&resourceVersion]`.
#[must_use]
pub fn watch_path(model: &ResourceModel, query: &WatchQuery, base: &str) -> String {
    let options = PathOptions::namespaced(query.ns.as_deref());
    format!(
        "{base}{}?{}",
        resource_path(model, &options),
        encode_query(&query.query_params())
    )
}

/// Full socket URL; paths that are already absolute socket URLs pass through.
#[must_use]
pub fn watch_url(location: &PageLocation, path: &str) -> String {
    if path.starts_with("ws://") || path.starts_with("wss://") {
        path.to_string()
    } else {
        format!("{}{path}", location.socket_origin())
    }
}

pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

#[async_trait]
pub trait WatchTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<FrameStream, TransportError>;
}

/// One open watch socket. Dropping it closes the connection.
pub struct WatchSocket {
    pub url: String,
    frames: FrameStream,
}

impl WatchSocket {
    #[must_use]
    pub fn new(url: String, frames: FrameStream) -> Self {
        Self { url, frames }
    }

    /// Next text frame, or `None` once the socket closed.
    pub async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        self.frames.next().await
    }
}

impl fmt::Debug for WatchSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSocket").field("url", &self.url).finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct WatchSocketFactory {
    transport: Arc<dyn WatchTransport>,
    location: PageLocation,
    backend_path: String,
    hub: Option<String>,
}

impl WatchSocketFactory {
    #[must_use]
    pub fn new(transport: Arc<dyn WatchTransport>, location: PageLocation, backend_path: &str) -> Self {
        Self {
            transport,
            location,
            backend_path: backend_path.to_string(),
            hub: None,
        }
    }

    #[must_use]
    pub fn with_hub(mut self, hub: Option<String>) -> Self {
        self.hub = hub;
        self
    }

    /// Socket URL for `query`, proxied when its cluster is not the hub.
    #[must_use]
    pub fn url_for(&self, model: &ResourceModel, query: &WatchQuery, proxy_base: Option<&str>) -> String {
        let base = match proxy_base {
            Some(base) => base.to_string(),
            None => match query.cluster.as_deref() {
                Some(cluster) if is_remote_cluster(Some(cluster), self.hub.as_deref()) => {
                    fleet_api_path(&self.backend_path, cluster)
                }
                _ => String::new(),
            },
        };
        watch_url(&self.location, &watch_path(model, query, &base))
    }

    /// Open exactly one socket; closing or reconnecting is up to the caller.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the connection could not be established.
    pub async fn open_watch(
        &self,
        model: &ResourceModel,
        query: &WatchQuery,
        proxy_base: Option<&str>,
    ) -> Result<WatchSocket, TransportError> {
        let url = self.url_for(model, query, proxy_base);
        info!("🔌 Opening watch socket: {}", url);
        let frames = self.transport.connect(&url).await?;
        Ok(WatchSocket::new(url, frames))
    }
}

/// `tokio-tungstenite` transport.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteTransport {
    headers: Vec<(String, String)>,
}

impl TungsteniteTransport {
    #[must_use]
    pub fn new(user_agent: &str) -> Self {
        Self {
            headers: vec![("User-Agent".to_string(), user_agent.to_string())],
        }
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        self
    }
}

#[async_trait]
impl WatchTransport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> Result<FrameStream, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        for (name, value) in &self.headers {
            match (name.parse::<tokio_tungstenite::tungstenite::http::HeaderName>(), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => {
                    request.headers_mut().insert(name, value);
                }
                _ => warn!("⚠️ Skipping invalid watch header {}", name),
            }
        }

        let (stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        debug!("🔌 Watch socket upgraded with status {}", response.status());

        let frames = stream.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Network(e.to_string()))),
            }
        });
        Ok(frames.boxed())
    }
}
