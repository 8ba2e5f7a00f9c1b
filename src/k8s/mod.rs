pub mod access_review;
pub mod cache;
pub mod client;
pub mod clusters;
pub mod dispatch;
pub mod fleet_config;
pub mod hub;
pub mod model;
pub mod request;
pub mod resource_error;
pub mod search;
pub mod selector;
pub mod session;
pub mod url;
pub mod watch;

/// Default user agent for `fleet-sdk` - automatically uses the package version
///
/// Sent on every hub and proxy request. Override with `FLEET_USER_AGENT`.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Console backend prefix every proxied request is routed through.
pub const BACKEND_PATH: &str = "/api/proxy/plugin/acm/console/multicloud";

/// Hub name assumed until the fleet configuration endpoint answers.
pub const DEFAULT_HUB_NAME: &str = "local-cluster";

/// Console path for hub resources watched alongside remote ones.
pub const HUB_API_PATH: &str = "/api/kubernetes";

/// Search API endpoint under the console backend.
pub const SEARCH_API_PATH: &str = "/proxy/search";
