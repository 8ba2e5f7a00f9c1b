//! `GET {backend}/hub`: which cluster is the hub and what the fleet offers.

use super::DEFAULT_HUB_NAME;
use super::request::FetchClient;
use super::resource_error::{ResourceError, ResourceErrorCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FleetConfiguration {
    pub is_global_hub: bool,
    pub local_hub_name: Option<String>,
    pub is_hub_self_managed: Option<bool>,
    pub is_observability_installed: bool,
}

/// Fetches the fleet configuration once and keeps it for the life of the process.
pub struct FleetConfigService {
    fetch: FetchClient,
    url: String,
    hub_override: Option<String>,
    config: RwLock<Option<FleetConfiguration>>,
    loading: Mutex<()>,
}

impl std::fmt::Debug for FleetConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetConfigService")
            .field("url", &self.url)
            .field("hub_override", &self.hub_override)
            .finish_non_exhaustive()
    }
}

impl FleetConfigService {
    #[must_use]
    pub fn new(fetch: FetchClient, backend_path: &str) -> Self {
        Self {
            fetch,
            url: format!("{backend_path}/hub"),
            hub_override: None,
            config: RwLock::new(None),
            loading: Mutex::new(()),
        }
    }

    /// Pin the hub name instead of asking the backend for it.
    #[must_use]
    pub fn with_hub_override(mut self, hub: Option<String>) -> Self {
        self.hub_override = hub.filter(|h| !h.is_empty());
        self
    }

    pub async fn cached(&self) -> Option<FleetConfiguration> {
        self.config.read().await.clone()
    }

    /// # Errors
    ///
    /// Returns the fetch error, or `BadRequest` for a body that is not a fleet
    /// configuration. Failures are not cached.
    pub async fn get(&self) -> Result<FleetConfiguration, ResourceError> {
        if let Some(config) = self.cached().await {
            return Ok(config);
        }

        let _guard = self.loading.lock().await;
        if let Some(config) = self.cached().await {
            return Ok(config);
        }

        debug!("📡 Fetching fleet configuration from {}", self.url);
        let body = self
            .fetch
            .get_json(&self.url, None)
            .await?
            .ok_or_else(|| ResourceError::with_message(ResourceErrorCode::BadRequest, "empty fleet configuration"))?;
        let config: FleetConfiguration = serde_json::from_value(body)?;

        info!(
            "🏠 Fleet configuration loaded (hub: {}, global hub: {})",
            config.local_hub_name.as_deref().unwrap_or(DEFAULT_HUB_NAME),
            config.is_global_hub
        );
        *self.config.write().await = Some(config.clone());
        Ok(config)
    }

    /// Name of the hub cluster. Falls back to `local-cluster` when the
    /// configuration cannot be loaded or does not name one.
    pub async fn hub_cluster_name(&self) -> String {
        if let Some(hub) = &self.hub_override {
            return hub.clone();
        }
        match self.get().await {
            Ok(config) => config.local_hub_name.unwrap_or_else(|| DEFAULT_HUB_NAME.to_string()),
            Err(e) => {
                warn!("⚠️ Fleet configuration unavailable ({}), assuming hub {}", e, DEFAULT_HUB_NAME);
                DEFAULT_HUB_NAME.to_string()
            }
        }
    }

    /// Keep polling until one fetch succeeds.
    pub fn poll_until_loaded(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match service.get().await {
                    Ok(_) => break,
                    Err(e) => {
                        warn!("⚠️ Fleet configuration poll failed: {}, retrying in {}s", e, interval.as_secs());
                        sleep(interval).await;
                    }
                }
            }
        })
    }
}
