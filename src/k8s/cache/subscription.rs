use super::cached_data::CachedResult;
use super::config::SUBSCRIPTION_CHANNEL_CAPACITY;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct DataUpdate {
    pub key: String,
    pub result: CachedResult,
}

pub struct Subscription {
    pub id: String,
    pub pattern: String,
    pub sender: mpsc::Sender<DataUpdate>,
}

impl Subscription {
    #[must_use]
    pub fn new(pattern: String) -> (Self, mpsc::Receiver<DataUpdate>) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_CAPACITY);
        let id = Uuid::new_v4().to_string();

        (
            Self {
                id,
                pattern,
                sender: tx,
            },
            rx,
        )
    }
}

#[derive(Default)]
pub struct SubscriptionManager {
    subscriptions: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager").finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `pattern` is a cache key, a `prefix*` or `*`.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn subscribe(&self, pattern: String) -> (String, mpsc::Receiver<DataUpdate>) {
        let (subscription, receiver) = Subscription::new(pattern.clone());
        let id = subscription.id.clone();

        let mut subs = self.subscriptions.write().await;
        subs.entry(pattern).or_insert_with(Vec::new).push(subscription);

        (id, receiver)
    }

    pub async fn unsubscribe(&self, subscription_id: &str) {
        let mut subs = self.subscriptions.write().await;

        for subscriptions in subs.values_mut() {
            subscriptions.retain(|s| s.id != subscription_id);
        }

        // Clean up empty entries
        subs.retain(|_, v| !v.is_empty());
    }

    /// Push `result` to every matching subscriber without waiting. A full
    /// receiver misses this update but still holds a queued one, so a
    /// subscriber that re-reads the cache on wake-up ends on the latest state.
    pub async fn notify(&self, cache_key: &str, result: &CachedResult) {
        let subs = self.subscriptions.read().await;
        let update = DataUpdate {
            key: cache_key.to_string(),
            result: result.clone(),
        };

        for (pattern, subscriptions) in subs.iter() {
            if Self::pattern_matches(pattern, cache_key) {
                for subscription in subscriptions {
                    if subscription.sender.try_send(update.clone()).is_err() {
                        debug!("📭 Subscriber {} not receiving updates for {}", subscription.id, cache_key);
                    }
                }
            }
        }
    }

    fn pattern_matches(pattern: &str, cache_key: &str) -> bool {
        if pattern == "*" || pattern == cache_key {
            return true;
        }

        pattern
            .strip_suffix('*')
            .is_some_and(|prefix| cache_key.starts_with(prefix))
    }

    pub async fn active_subscriptions(&self) -> usize {
        let subs = self.subscriptions.read().await;
        subs.values().map(Vec::len).sum()
    }
}
