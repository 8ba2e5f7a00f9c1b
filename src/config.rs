//! Runtime settings for a fleet session, with `FLEET_*` environment overrides.

use crate::error::{Error, Result};
use crate::k8s::cache::CacheConfig;
use crate::k8s::cache::config::HUB_POLL_INTERVAL_SECONDS;
use crate::k8s::request::DEFAULT_DELAY;
use crate::k8s::{BACKEND_PATH, USER_AGENT};
use std::time::Duration;

pub const DEFAULT_CONSOLE_ORIGIN: &str = "http://localhost:9000";

pub const ENV_CONSOLE_ORIGIN: &str = "FLEET_CONSOLE_ORIGIN";
pub const ENV_BACKEND_PATH: &str = "FLEET_BACKEND_PATH";
pub const ENV_USER_AGENT: &str = "FLEET_USER_AGENT";
pub const ENV_REQUEST_RETRIES: &str = "FLEET_REQUEST_RETRIES";
pub const ENV_HUB_CLUSTER: &str = "FLEET_HUB_CLUSTER";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetSdkConfig {
    /// Origin of the console serving the backend proxy; relative URLs resolve against it.
    pub console_origin: String,
    pub backend_path: String,
    pub user_agent: String,
    pub request_retries: u32,
    pub request_delay: Duration,
    pub hub_poll_interval: Duration,
    pub cache: CacheConfig,
    /// Pins the hub name instead of asking the backend.
    pub hub_cluster: Option<String>,
    pub bearer_token: Option<String>,
}

impl Default for FleetSdkConfig {
    fn default() -> Self {
        Self {
            console_origin: DEFAULT_CONSOLE_ORIGIN.to_string(),
            backend_path: BACKEND_PATH.to_string(),
            user_agent: USER_AGENT.to_string(),
            request_retries: 0,
            request_delay: DEFAULT_DELAY,
            hub_poll_interval: Duration::from_secs(HUB_POLL_INTERVAL_SECONDS),
            cache: CacheConfig::default(),
            hub_cluster: None,
            bearer_token: None,
        }
    }
}

impl FleetSdkConfig {
    /// Defaults overridden by the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `FLEET_REQUEST_RETRIES` is not a number.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `FLEET_*` key.
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if `FLEET_REQUEST_RETRIES` is not a number.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(origin) = get(ENV_CONSOLE_ORIGIN) {
            config.console_origin = origin.trim_end_matches('/').to_string();
        }
        if let Some(path) = get(ENV_BACKEND_PATH) {
            config.backend_path = path.trim_end_matches('/').to_string();
        }
        if let Some(agent) = get(ENV_USER_AGENT) {
            config.user_agent = agent;
        }
        if let Some(retries) = get(ENV_REQUEST_RETRIES) {
            config.request_retries = retries
                .parse()
                .map_err(|_| Error::Custom(format!("{ENV_REQUEST_RETRIES} must be a non-negative integer, got {retries:?}")))?;
        }
        config.hub_cluster = get(ENV_HUB_CLUSTER);

        Ok(config)
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token.filter(|t| !t.is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = FleetSdkConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, FleetSdkConfig::default());
        assert_eq!(config.console_origin, "http://localhost:9000");
        assert_eq!(config.backend_path, "/api/proxy/plugin/acm/console/multicloud");
        assert_eq!(config.request_delay, Duration::from_millis(100));
        assert_eq!(config.hub_poll_interval, Duration::from_secs(15));
        assert_eq!(config.cache.eviction_delay(), Duration::from_secs(40));
        assert!(config.user_agent.starts_with("fleet-sdk/"));
    }

    #[test]
    fn environment_overrides() {
        let config = FleetSdkConfig::from_lookup(lookup(&[
            (ENV_CONSOLE_ORIGIN, "https://console.example.com/"),
            (ENV_REQUEST_RETRIES, "3"),
            (ENV_HUB_CLUSTER, "hub-a"),
            (ENV_USER_AGENT, " "),
        ]))
        .unwrap();

        assert_eq!(config.console_origin, "https://console.example.com");
        assert_eq!(config.request_retries, 3);
        assert_eq!(config.hub_cluster.as_deref(), Some("hub-a"));
        assert_eq!(config.user_agent, USER_AGENT);
    }

    #[test]
    fn bad_retry_count_is_rejected() {
        let err = FleetSdkConfig::from_lookup(lookup(&[(ENV_REQUEST_RETRIES, "many")])).unwrap_err();
        assert!(err.to_string().contains(ENV_REQUEST_RETRIES));
    }
}
