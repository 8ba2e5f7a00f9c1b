// kube client for the hub cluster, tagged with the fleet-sdk user agent
use crate::error::Result as FleetResult;
use crate::k8s::USER_AGENT;
use crate::k8s::hub::KubeHubClient;
use hyper::http::{HeaderName, HeaderValue};
use kube::{Client, Config};
use tracing::warn;

/// Create a kube client for the hub from the inferred kubeconfig
///
/// # Errors
///
/// Will return `Err` if no kubeconfig or in-cluster configuration can be found
pub async fn new(custom_user_agent: Option<&str>) -> FleetResult<Client> {
    let mut config = Config::infer().await?;

    let user_agent = custom_user_agent.unwrap_or(USER_AGENT);
    match HeaderValue::from_str(user_agent) {
        Ok(header_value) => config.headers.push((HeaderName::from_static("user-agent"), header_value)),
        Err(_) => warn!("⚠️ Ignoring invalid user agent {:?}", user_agent),
    }

    Ok(Client::try_from(config)?)
}

/// [`KubeHubClient`] over [`new`].
///
/// # Errors
///
/// See [`new`].
pub async fn hub_client(custom_user_agent: Option<&str>) -> FleetResult<KubeHubClient> {
    Ok(KubeHubClient::new(new(custom_user_agent).await?))
}
