//! Routing of pushed events to user callbacks.
//!
//! Two independent registries are composed at dispatch time: a single
//! connection-wide sink that sees every event, and a table of per-message
//! subscriptions keyed by message id. A subscription is retired as soon as a
//! terminal event (end or cancel) for its message is routed, whether or not
//! its filter matched that event.

use crate::event::{Event, EventType};
use crate::protocol::Reply;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Callbacks run on the connection's reading thread. They must return
/// quickly and must not send on the same connection.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Interest in the events of one message.
#[derive(Clone)]
pub struct Subscription {
    callback: EventCallback,
    event_types: Option<Vec<EventType>>,
}

impl Subscription {
    /// Subscribe to every event class.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            event_types: None,
        }
    }

    /// Restrict delivery to the given classes. Terminal events still retire
    /// the subscription when they are filtered out.
    pub fn with_event_types(mut self, event_types: &[EventType]) -> Self {
        self.event_types = Some(event_types.to_vec());
        self
    }

    pub fn wants(&self, event_type: EventType) -> bool {
        self.event_types
            .as_ref()
            .map_or(true, |types| types.contains(&event_type))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event_types", &self.event_types)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct EventDispatcher {
    callback: Option<EventCallback>,
    subscriptions: HashMap<u32, Subscription>,
    pending: Option<Subscription>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callback(&mut self, callback: EventCallback) {
        self.callback = Some(callback);
    }

    pub fn clear_callback(&mut self) {
        self.callback = None;
    }

    pub fn subscribe(&mut self, message_id: u32, subscription: Subscription) {
        self.subscriptions.insert(message_id, subscription);
    }

    pub fn unsubscribe(&mut self, message_id: u32) -> bool {
        self.subscriptions.remove(&message_id).is_some()
    }

    pub fn is_subscribed(&self, message_id: u32) -> bool {
        self.subscriptions.contains_key(&message_id)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Park a subscription for the data block about to be sent. It is keyed
    /// once the reply carrying the message id arrives.
    pub fn set_pending(&mut self, subscription: Option<Subscription>) {
        self.pending = subscription;
    }

    /// Called with every synchronous reply before it is handed to the
    /// waiting caller. Returns the message id a pending subscription was
    /// installed under, if any.
    pub fn attach_pending(&mut self, reply: &Reply) -> Option<u32> {
        let subscription = self.pending.take()?;
        if !reply.is_success() {
            return None;
        }
        let message_id = reply.message_id()?;
        self.subscriptions.insert(message_id, subscription);
        Some(message_id)
    }

    /// Collect the callbacks that should see `event`, retiring the message's
    /// subscription on a terminal event. Callers invoke the returned
    /// callbacks after releasing whatever lock guards the dispatcher.
    pub fn route(&mut self, event: &Event) -> Vec<EventCallback> {
        let mut targets = Vec::with_capacity(2);

        if let Some(callback) = &self.callback {
            targets.push(Arc::clone(callback));
        }

        let subscription = if event.event_type.is_terminal() {
            self.subscriptions.remove(&event.message_id)
        } else {
            self.subscriptions.get(&event.message_id).cloned()
        };

        if let Some(subscription) = subscription {
            if subscription.wants(event.event_type) {
                targets.push(subscription.callback);
            }
        }

        targets
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("has_callback", &self.callback.is_some())
            .field("subscriptions", &self.subscriptions.len())
            .field("pending", &self.pending.is_some())
            .finish()
    }
}
