//! Subscriptions and their event handlers.

use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Receives the custom payload of every event sent to a subscription.
///
/// Handlers run on a task spawned per event, so two events for the same
/// subscription may be handled concurrently and out of order. Serialize
/// inside the handler if ordering matters.
pub trait SubscriptionHandler: Send + Sync + 'static {
    fn handle_event(&self, custom: Value);
}

impl<F> SubscriptionHandler for F
where
    F: Fn(Value) + Send + Sync + 'static,
{
    fn handle_event(&self, custom: Value) {
        self(custom)
    }
}

/// A subscription contracted with a resource URI.
///
/// Returned by [`Conn::subscribe`](crate::Conn::subscribe). Events are
/// ignored until a handler is installed with [`Subscription::handle`].
pub struct Subscription {
    id: u32,
    resource_uri: String,
    custom: Value,
    handler: Mutex<Option<Arc<dyn SubscriptionHandler>>>,
}

impl Subscription {
    pub(crate) fn new(id: u32, resource_uri: impl Into<String>, custom: Value) -> Self {
        Self {
            id,
            resource_uri: resource_uri.into(),
            custom,
            handler: Mutex::new(None),
        }
    }

    /// Service-assigned subscription ID.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The resource URI this subscription was created for.
    #[must_use]
    pub fn resource_uri(&self) -> &str {
        &self.resource_uri
    }

    /// Initial payload returned with the subscribe response.
    #[must_use]
    pub fn custom(&self) -> &Value {
        &self.custom
    }

    /// Install `handler` for all events dispatched from now on.
    pub fn handle(&self, handler: impl SubscriptionHandler) {
        let handler: Arc<dyn SubscriptionHandler> = Arc::new(handler);
        *self.handler.lock() = Some(handler);
    }

    /// Remove the handler; later events are dropped.
    pub fn clear_handler(&self) {
        *self.handler.lock() = None;
    }

    /// Whether a handler is installed.
    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Run the current handler with `custom`.
    ///
    /// Returns `false` when no handler is installed. The lock is released
    /// before the handler runs.
    pub(crate) fn dispatch(&self, custom: Value) -> bool {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                handler.handle_event(custom);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("resource_uri", &self.resource_uri)
            .field("custom", &self.custom)
            .field("has_handler", &self.has_handler())
            .finish()
    }
}
