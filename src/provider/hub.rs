//! Realtime Change Hub
//!
//! Fans row changes out to push subscriptions. Each subscription is scoped to
//! one owner id and only receives events for that owner's rows.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::error::{ProviderError, ProviderResult};
use super::SubscriptionHandle;
use crate::bookmarks::{ChangeEvent, OwnerId};

/// Manages push subscriptions and event delivery
#[derive(Clone)]
pub struct ChangeHub {
    /// Active subscriptions: SubscriptionHandle → Subscriber
    subscribers: Arc<RwLock<HashMap<SubscriptionHandle, Subscriber>>>,
    /// Configuration
    config: HubConfig,
}

/// Configuration for the change hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of concurrent subscriptions
    pub max_subscriptions: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_subscriptions: 1000,
        }
    }
}

struct Subscriber {
    owner: OwnerId,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChangeHub {
    /// Create a new change hub
    pub fn new(config: HubConfig) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Register a subscription for `owner`
    ///
    /// Returns the handle and the receiving end of the event channel, or an
    /// error if the subscription limit has been reached.
    pub async fn register(
        &self,
        owner: &str,
    ) -> ProviderResult<(SubscriptionHandle, mpsc::UnboundedReceiver<ChangeEvent>)> {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.len() >= self.config.max_subscriptions {
            return Err(ProviderError::realtime(format!(
                "Too many subscriptions (limit: {})",
                self.config.max_subscriptions
            )));
        }

        let handle = SubscriptionHandle(Uuid::new_v4().to_string());
        let (sender, receiver) = mpsc::unbounded_channel();
        subscribers.insert(
            handle.clone(),
            Subscriber {
                owner: owner.to_string(),
                sender,
            },
        );

        tracing::debug!(subscription = %handle, owner_id = %owner, "Subscription opened");
        Ok((handle, receiver))
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub async fn unregister(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self.subscribers.write().await.remove(handle).is_some();
        if removed {
            tracing::debug!(subscription = %handle, "Subscription released");
        }
        removed
    }

    /// Deliver `event` to every subscription for `owner`
    ///
    /// Subscribers whose receiver has gone away are pruned.
    pub async fn publish(&self, owner: &str, event: &ChangeEvent) -> usize {
        let mut closed = Vec::new();
        let mut sent_count = 0;

        {
            let subscribers = self.subscribers.read().await;
            for (handle, subscriber) in subscribers.iter() {
                if subscriber.owner != owner {
                    continue;
                }
                if subscriber.sender.send(event.clone()).is_ok() {
                    sent_count += 1;
                } else {
                    closed.push(handle.clone());
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for handle in closed {
                subscribers.remove(&handle);
            }
        }

        tracing::trace!(
            owner_id = %owner,
            kind = event.kind(),
            subscribers = sent_count,
            "Published change"
        );
        sent_count
    }

    /// Number of open subscriptions
    pub async fn subscription_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Number of open subscriptions for one owner
    pub async fn owner_subscription_count(&self, owner: &str) -> usize {
        self.subscribers
            .read()
            .await
            .values()
            .filter(|s| s.owner == owner)
            .count()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
