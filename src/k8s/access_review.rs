//! `SelfSubjectAccessReview` checks, memoized per session and failing open.

use super::dispatch::FleetClient;
use super::model::{FleetRequest, ResourceModel};
use super::resource_error::ResourceError;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use k8s_openapi::api::authorization::v1::{ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Everything that distinguishes one access check from another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AccessReviewKey {
    pub group: Option<String>,
    pub resource: String,
    pub subresource: Option<String>,
    pub verb: String,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub cluster: Option<String>,
}

impl AccessReviewKey {
    #[must_use]
    pub fn new(verb: &str, resource: &str) -> Self {
        Self {
            verb: verb.to_string(),
            resource: resource.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    #[must_use]
    pub fn subresource(mut self, subresource: &str) -> Self {
        self.subresource = Some(subresource.to_string());
        self
    }

    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    #[must_use]
    pub fn cluster(mut self, cluster: &str) -> Self {
        self.cluster = Some(cluster.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessCheck {
    pub is_allowed: bool,
    pub loading: bool,
}

impl AccessCheck {
    /// State before the review has answered.
    pub const LOADING: Self = Self {
        is_allowed: false,
        loading: true,
    };

    #[must_use]
    pub const fn resolved(is_allowed: bool) -> Self {
        Self {
            is_allowed,
            loading: false,
        }
    }
}

/// # Errors
///
/// Returns an error if the review cannot be serialized.
pub fn review_body(key: &AccessReviewKey) -> Result<Value, serde_json::Error> {
    let review = SelfSubjectAccessReview {
        spec: SelfSubjectAccessReviewSpec {
            resource_attributes: Some(ResourceAttributes {
                group: key.group.clone(),
                resource: Some(key.resource.clone()),
                subresource: key.subresource.clone(),
                verb: Some(key.verb.clone()),
                name: key.name.clone(),
                namespace: key.namespace.clone(),
                ..ResourceAttributes::default()
            }),
            ..SelfSubjectAccessReviewSpec::default()
        },
        ..SelfSubjectAccessReview::default()
    };
    serde_json::to_value(review)
}

fn allowed(response: Value) -> Result<bool, ResourceError> {
    let review: SelfSubjectAccessReview = serde_json::from_value(response)?;
    Ok(review.status.is_some_and(|status| status.allowed))
}

type SharedReview = Shared<BoxFuture<'static, Result<bool, ResourceError>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct AccessReviewer {
    client: FleetClient,
    memo: Arc<Mutex<HashMap<AccessReviewKey, bool>>>,
    in_flight: Arc<Mutex<HashMap<AccessReviewKey, SharedReview>>>,
}

impl std::fmt::Debug for AccessReviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessReviewer")
            .field("memoized", &lock(&self.memo).len())
            .finish_non_exhaustive()
    }
}

impl AccessReviewer {
    #[must_use]
    pub fn new(client: FleetClient) -> Self {
        Self {
            client,
            memo: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Is the current user allowed `key`? The first answer is kept for the
    /// session; a review that fails answers "allowed" and is asked again next time.
    pub async fn check(&self, key: &AccessReviewKey) -> AccessCheck {
        let shared = {
            if let Some(&allowed) = lock(&self.memo).get(key) {
                debug!("🎯 Access review HIT: {} {}", key.verb, key.resource);
                return AccessCheck::resolved(allowed);
            }

            let mut in_flight = lock(&self.in_flight);
            if let Some(existing) = in_flight.get(key) {
                existing.clone()
            } else {
                let shared = self.review(key.clone());
                in_flight.insert(key.clone(), shared.clone());
                shared
            }
        };

        match shared.await {
            Ok(allowed) => AccessCheck::resolved(allowed),
            Err(e) => {
                warn!("⚠️ Access review for {} {} failed ({}), allowing", key.verb, key.resource, e);
                AccessCheck::resolved(true)
            }
        }
    }

    fn review(&self, key: AccessReviewKey) -> SharedReview {
        let client = self.client.clone();
        let memo = Arc::clone(&self.memo);
        let in_flight = Arc::clone(&self.in_flight);

        async move {
            let result: Result<bool, ResourceError> = async {
                let mut request = FleetRequest::new(ResourceModel::self_subject_access_review()).data(review_body(&key)?);
                request.cluster = key.cluster.clone();
                allowed(client.fleet_create(&request).await?)
            }
            .await;

            if let Ok(allowed) = result {
                debug!("💾 Access review STORE: {} {} = {}", key.verb, key.resource, allowed);
                lock(&memo).insert(key.clone(), allowed);
            }
            lock(&in_flight).remove(&key);
            result
        }
        .boxed()
        .shared()
    }

    #[must_use]
    pub fn memoized(&self) -> usize {
        lock(&self.memo).len()
    }
}
