//! Retrying fetch client used for every proxied and backend request.
//!
//! The retry loop classifies each attempt into success, a terminal failure, or
//! a retryable failure. Retryable failures sleep for the current delay, which
//! doubles after each sleep until the retry budget is spent.

use super::resource_error::{K8sStatus, ResourceError, ResourceErrorCode};
use super::session::{NoopSessionNotifier, SessionExpiryNotifier};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);
pub const CSRF_COOKIE: &str = "csrf-token";

const RETRYABLE_STATUSES: [u16; 8] = [408, 429, 500, 502, 503, 504, 522, 524];
const POD_LOG_API: &str = "/apis/proxy.open-cluster-management.io/v1beta1";
const POD_LOG_SUFFIX: &str = "tailLines=1000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical request; the client may issue several attempts for it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub data: Option<Value>,
    /// Replaces the default `Accept: application/json` header set when present.
    pub headers: Option<Vec<(String, String)>>,
    pub retries: Option<u32>,
    pub delay: Option<Duration>,
    pub signal: Option<CancellationToken>,
    pub disable_redirect_unauthorized: bool,
}

impl FetchRequest {
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            data: None,
            headers: None,
            retries: None,
            delay: None,
            signal: None,
            disable_redirect_unauthorized: false,
        }
    }

    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = Some(headers);
        self
    }

    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    #[must_use]
    pub const fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    #[must_use]
    pub const fn disable_redirect_unauthorized(mut self) -> Self {
        self.disable_redirect_unauthorized = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Parsed JSON, or a JSON string for text bodies; `None` when the body did not parse.
    pub data: Option<Value>,
}

/// A single attempt as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string()).with_header("content-type", "application/json")
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_status_text(mut self, text: &str) -> Self {
        self.status_text = text.to_string();
        self
    }
}

/// Failures that happened before any response arrived.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection reset by peer")]
    ConnectionReset,
    #[error("host not found")]
    HostNotFound,
    #[error("network error: {0}")]
    Network(String),
    #[error("{0}")]
    Other(String),
}

impl From<TransportError> for ResourceError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::new(ResourceErrorCode::Timeout),
            TransportError::ConnectionReset => Self::new(ResourceErrorCode::ConnectionReset),
            TransportError::HostNotFound => Self::new(ResourceErrorCode::NotFound),
            TransportError::Network(_) => Self::new(ResourceErrorCode::NetworkError),
            TransportError::Other(message) => {
                Self::with_message(ResourceErrorCode::Unknown, format!("Unknown error code: {message}"))
            }
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Source of same-origin cookies.
pub trait CookieSource: Send + Sync {
    fn cookie(&self, name: &str) -> Option<String>;

    /// Value for a `Cookie` header sent with same-origin requests.
    fn cookie_header(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticCookies {
    cookies: Vec<(String, String)>,
}

impl StaticCookies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.cookies.push((name.to_string(), value.to_string()));
        self
    }
}

impl CookieSource for StaticCookies {
    fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(self.cookies.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("; "))
    }
}

/// `reqwest` transport; relative URLs are resolved against the console origin
/// and redirects are surfaced instead of followed.
pub struct ReqwestTransport {
    client: reqwest::Client,
    origin: Url,
    bearer_token: Option<String>,
}

impl ReqwestTransport {
    /// # Errors
    ///
    /// Returns an error if the origin is not an absolute URL or the HTTP client cannot be built.
    pub fn new(origin: &str, user_agent: &str) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            origin: Url::parse(origin)?,
            bearer_token: None,
        })
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token.filter(|t| !t.is_empty());
        self
    }

    #[must_use]
    pub const fn origin(&self) -> &Url {
        &self.origin
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = self
            .origin
            .join(&request.url)
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| classify_transport_error(&e))?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
            .collect();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!("⚠️ Failed to read response body: {}", e);
                Bytes::new()
            }
        };

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

fn classify_transport_error(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }

    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionReset => return TransportError::ConnectionReset,
                std::io::ErrorKind::TimedOut => return TransportError::Timeout,
                _ => {}
            }
        }
        let text = cause.to_string();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return TransportError::HostNotFound;
        }
        source = cause.source();
    }

    if err.is_connect() || err.is_request() {
        TransportError::Network(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// Retrying fetch client.
#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn HttpTransport>,
    cookies: Option<Arc<dyn CookieSource>>,
    session: Arc<dyn SessionExpiryNotifier>,
    default_retries: u32,
    default_delay: Duration,
}

impl fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchClient")
            .field("default_retries", &self.default_retries)
            .field("default_delay", &self.default_delay)
            .finish_non_exhaustive()
    }
}

impl FetchClient {
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            cookies: None,
            session: Arc::new(NoopSessionNotifier),
            default_retries: 0,
            default_delay: DEFAULT_DELAY,
        }
    }

    #[must_use]
    pub fn with_cookies(mut self, cookies: Arc<dyn CookieSource>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    #[must_use]
    pub fn with_session_notifier(mut self, session: Arc<dyn SessionExpiryNotifier>) -> Self {
        self.session = session;
        self
    }

    /// Retry budget used by [`Self::get_json`].
    #[must_use]
    pub const fn with_default_retries(mut self, retries: u32) -> Self {
        self.default_retries = retries;
        self
    }

    /// Initial backoff used by [`Self::get_json`].
    #[must_use]
    pub const fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    #[must_use]
    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        Arc::clone(&self.transport)
    }

    /// Issue `request`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Every failure is normalized to a [`ResourceError`]: transport failures,
    /// `Status` bodies, and non-2xx responses alike.
    pub async fn request(&self, request: FetchRequest) -> Result<FetchResponse, ResourceError> {
        let mut retries = request.retries.unwrap_or(0);
        let mut delay = request.delay.filter(|d| !d.is_zero()).unwrap_or(DEFAULT_DELAY);
        let http = self.prepare(&request)?;
        let signal = request.signal.as_ref();

        loop {
            if signal.is_some_and(CancellationToken::is_cancelled) {
                return Err(ResourceError::new(ResourceErrorCode::RequestAborted));
            }

            debug!("🌐 {} {}", http.method, http.url);
            let attempt = tokio::select! {
                biased;
                () = aborted(signal) => return Err(ResourceError::new(ResourceErrorCode::RequestAborted)),
                attempt = self.transport.send(http.clone()) => attempt,
            };

            match attempt {
                Err(err) => {
                    if retries == 0 {
                        warn!("❌ {} {} failed: {}", http.method, http.url, err);
                        return Err(err.into());
                    }
                    debug!("🔌 Transport error on {}: {}", http.url, err);
                }
                Ok(response) => {
                    let data = parse_body(&http.url, &response);

                    if let Some(status) = data.as_ref().and_then(K8sStatus::failure) {
                        if status.code == Some(401) {
                            self.expire_session(&request);
                        }
                        return Err(ResourceError::from_status(
                            status.code.unwrap_or(ResourceErrorCode::Unknown.as_u16()),
                            status.message.as_deref().or(Some("")),
                            status.reason,
                        ));
                    }

                    if response.status < 300 {
                        return Ok(FetchResponse {
                            status: response.status,
                            headers: response.headers,
                            data,
                        });
                    }

                    match response.status {
                        302 | 401 => {
                            self.expire_session(&request);
                            return Err(ResourceError::new(ResourceErrorCode::Unauthorized));
                        }
                        404 => return Err(ResourceError::new(ResourceErrorCode::NotFound)),
                        status if RETRYABLE_STATUSES.contains(&status) => {
                            if let Some(retry_after) = retry_after(&response) {
                                delay = retry_after;
                            }
                        }
                        _ => retries = 0,
                    }

                    if retries == 0 {
                        let reason = match &data {
                            Some(Value::String(text)) => Some(text.clone()),
                            _ => None,
                        };
                        warn!("❌ {} {} returned {}", http.method, http.url, response.status);
                        return Err(match ResourceErrorCode::from_code(response.status) {
                            Some(code) => ResourceError::with_message(code, response.status_text).with_reason(reason),
                            None => ResourceError::with_message(
                                ResourceErrorCode::Unknown,
                                format!("Unknown error code: {}", response.status),
                            ),
                        });
                    }
                }
            }

            info!("🔁 Retrying {} in {}ms ({} left)", http.url, delay.as_millis(), retries);
            tokio::select! {
                biased;
                () = aborted(signal) => return Err(ResourceError::new(ResourceErrorCode::RequestAborted)),
                () = tokio::time::sleep(delay) => {}
            }
            delay *= 2;
            retries -= 1;
        }
    }

    fn prepare(&self, request: &FetchRequest) -> Result<HttpRequest, ResourceError> {
        let mut headers = request
            .headers
            .clone()
            .unwrap_or_else(|| vec![("Accept".to_string(), "application/json".to_string())]);

        let same_origin = request.url.starts_with('/');
        if let Some(cookies) = self.cookies.as_ref().filter(|_| same_origin) {
            if request.method != Method::Get {
                if let Some(token) = cookies.cookie(CSRF_COOKIE) {
                    headers.push(("X-CSRFToken".to_string(), token));
                }
            }
            if let Some(cookie) = cookies.cookie_header() {
                headers.push(("Cookie".to_string(), cookie));
            }
        }

        let body = match request.data.as_ref().filter(|d| !d.is_null()) {
            Some(data) => {
                let body = serde_json::to_vec(data).map_err(|_| ResourceError::new(ResourceErrorCode::BadRequest))?;
                if find_header(&headers, "content-type").is_none() {
                    headers.push(("Content-Type".to_string(), "application/json".to_string()));
                }
                Some(Bytes::from(body))
            }
            None => None,
        };

        Ok(HttpRequest {
            method: request.method,
            url: request.url.clone(),
            headers,
            body,
        })
    }

    fn expire_session(&self, request: &FetchRequest) {
        if request.disable_redirect_unauthorized {
            debug!("🔒 Unauthorized on {}, login redirect disabled", request.url);
            return;
        }
        warn!("🔒 Session expired on {}", request.url);
        self.session.session_expired();
    }

    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn get_json(&self, url: &str, signal: Option<CancellationToken>) -> Result<Option<Value>, ResourceError> {
        let mut request = FetchRequest::get(url)
            .retries(self.default_retries)
            .delay(self.default_delay);
        request.signal = signal;
        self.request(request).await.map(|r| r.data)
    }

    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn post_json(&self, url: &str, data: Value) -> Result<Option<Value>, ResourceError> {
        self.request(FetchRequest::new(Method::Post, url).data(data)).await.map(|r| r.data)
    }

    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn put_json(&self, url: &str, data: Value) -> Result<Option<Value>, ResourceError> {
        self.request(FetchRequest::new(Method::Put, url).data(data)).await.map(|r| r.data)
    }

    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn patch_json(
        &self,
        url: &str,
        data: Value,
        headers: Option<Vec<(String, String)>>,
    ) -> Result<Option<Value>, ResourceError> {
        let mut request = FetchRequest::new(Method::Patch, url).data(data);
        request.headers = headers;
        self.request(request).await.map(|r| r.data)
    }

    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn delete(&self, url: &str) -> Result<Option<Value>, ResourceError> {
        self.request(FetchRequest::new(Method::Delete, url)).await.map(|r| r.data)
    }
}

async fn aborted(signal: Option<&CancellationToken>) {
    match signal {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .headers
        .get("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Text for `text/plain` and pod-log responses, JSON otherwise.
fn parse_body(url: &str, response: &HttpResponse) -> Option<Value> {
    let is_text = response
        .headers
        .get("content-type")
        .is_some_and(|ct| ct.contains("text/plain"))
        || (url.contains(POD_LOG_API) && url.ends_with(POD_LOG_SUFFIX));

    if is_text {
        return match std::str::from_utf8(&response.body) {
            Ok(text) => Some(Value::String(text.to_string())),
            Err(_) => {
                warn!("⚠️ Error getting resource text response from {}", url);
                None
            }
        };
    }

    match serde_json::from_slice(&response.body) {
        Ok(value) => Some(value),
        Err(_) => {
            debug!("⚠️ Error getting resource json response from {}", url);
            None
        }
    }
}
