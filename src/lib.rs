pub mod config;
pub mod error;
pub mod k8s;

pub use config::FleetSdkConfig;
pub use k8s::access_review::{AccessCheck, AccessReviewKey, AccessReviewer};
pub use k8s::cache::{CachedResult, FleetData, FleetResourceCache, FleetWatchHandle, FleetWatchSet, FleetWatcher, WatchResource};
pub use k8s::dispatch::FleetClient;
pub use k8s::model::{FleetRequest, PropagationPolicy, ResourceModel};
pub use k8s::resource_error::{ResourceError, ResourceErrorCode};
pub use k8s::search::{SearchFilter, fleet_search};
