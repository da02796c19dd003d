//! Subscription registry.
//!
//! Maps service-assigned subscription IDs to their [`Subscription`] so the
//! reader loop can route events. Lookups take a shard read lock only; the
//! handler itself is guarded per subscription.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::subscription::Subscription;

/// Active subscriptions indexed by ID.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: DashMap<u32, Arc<Subscription>>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription, replacing any previous record with its ID.
    pub fn insert(&self, subscription: Arc<Subscription>) -> Option<Arc<Subscription>> {
        let id = subscription.id();
        let previous = self.subscriptions.insert(id, subscription);
        if let Some(previous) = &previous {
            warn!(
                subscription = id,
                previous = %previous.resource_uri(),
                "Service reused a subscription ID"
            );
        } else {
            debug!(subscription = id, "Registered subscription");
        }
        previous
    }

    /// Look up a subscription.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<Arc<Subscription>> {
        self.subscriptions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a subscription.
    pub fn remove(&self, id: u32) -> Option<Arc<Subscription>> {
        self.subscriptions.remove(&id).map(|(_, sub)| sub)
    }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Snapshot of all registered subscriptions.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
