//! Session expiry handling.
//!
//! The fetch client calls [`SessionExpiryNotifier::session_expired`] when the
//! backend reports the session is gone. The console implementation logs the
//! user out of the backend and the identity provider, then returns to `/`.

use super::request::{HttpRequest, HttpTransport, Method};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use url::form_urlencoded;

pub trait SessionExpiryNotifier: Send + Sync {
    /// Invoked synchronously on detection; implementations must not block.
    fn session_expired(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSessionNotifier;

impl SessionExpiryNotifier for NoopSessionNotifier {
    fn session_expired(&self) {}
}

/// Where to send the user once logged out.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Navigator that only records the target in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, path: &str) {
        info!("🧭 Session ended, navigate to {}", path);
    }
}

#[derive(Debug, Deserialize)]
struct ConfigureResponse {
    token_endpoint: Option<String>,
}

/// Best-effort logout run in the background.
pub struct LogoutSequence {
    transport: Arc<dyn HttpTransport>,
    navigator: Arc<dyn Navigator>,
    backend_path: String,
    in_progress: Arc<AtomicBool>,
}

impl LogoutSequence {
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>, navigator: Arc<dyn Navigator>, backend_path: &str) -> Self {
        Self {
            transport,
            navigator,
            backend_path: backend_path.to_string(),
            in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run every step in order; failures are logged and the next step still runs.
    pub async fn run(&self) {
        let token_endpoint = self.fetch_token_endpoint().await;

        let logout = get(format!("{}/logout", self.backend_path));
        if let Err(e) = self.transport.send(logout).await {
            warn!("⚠️ Backend logout failed: {}", e);
        }

        if let Some(endpoint) = token_endpoint {
            let idp_logout = identity_provider_logout_url(&endpoint);
            let body = form_urlencoded::Serializer::new(String::new())
                .append_pair("then", "/")
                .finish();
            let request = HttpRequest {
                method: Method::Post,
                url: idp_logout.clone(),
                headers: vec![("Content-Type".to_string(), "application/x-www-form-urlencoded".to_string())],
                body: Some(Bytes::from(body)),
            };
            match self.transport.send(request).await {
                Ok(_) => debug!("🔑 Identity provider logout posted to {}", idp_logout),
                Err(e) => warn!("⚠️ Identity provider logout failed: {}", e),
            }
        }

        self.navigator.navigate("/");
    }

    async fn fetch_token_endpoint(&self) -> Option<String> {
        let response = match self.transport.send(get(format!("{}/configure", self.backend_path))).await {
            Ok(response) => response,
            Err(e) => {
                warn!("⚠️ Could not load logout configuration: {}", e);
                return None;
            }
        };
        serde_json::from_slice::<ConfigureResponse>(&response.body)
            .ok()
            .and_then(|c| c.token_endpoint)
    }
}

impl SessionExpiryNotifier for LogoutSequence {
    fn session_expired(&self) {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("⚠️ Session expired outside a runtime, logout skipped");
            self.in_progress.store(false, Ordering::SeqCst);
            return;
        };

        let sequence = Self {
            transport: Arc::clone(&self.transport),
            navigator: Arc::clone(&self.navigator),
            backend_path: self.backend_path.clone(),
            in_progress: Arc::clone(&self.in_progress),
        };
        handle.spawn(async move {
            sequence.run().await;
            sequence.in_progress.store(false, Ordering::SeqCst);
        });
    }
}

fn get(url: String) -> HttpRequest {
    HttpRequest {
        method: Method::Get,
        url,
        headers: vec![("Accept".to_string(), "application/json".to_string())],
        body: None,
    }
}

fn identity_provider_logout_url(token_endpoint: &str) -> String {
    token_endpoint.strip_suffix("/oauth/token").map_or_else(
        || token_endpoint.replace("/oauth/token", "/logout"),
        |base| format!("{base}/logout"),
    )
}
