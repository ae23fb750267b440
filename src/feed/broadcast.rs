//! Server-side fan-out of change events to feed subscriptions.

use crate::feed::types::{ChangeEvent, FeedChannel, FeedScope, SubscriptionId};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Internal subscription state.
struct Subscription {
    scope: FeedScope,
    sender: Sender<serde_json::Value>,
}

impl Subscription {
    /// Try to send a message. Returns false if the subscriber should be dropped.
    fn try_send(&self, message: serde_json::Value) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Manages feed subscriptions and broadcasts change events.
pub struct FeedBroadcaster {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl FeedBroadcaster {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a subscription with a bounded buffer.
    pub fn subscribe(&self, scope: FeedScope, buffer_size: usize) -> FeedChannel {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(buffer_size.max(1));

        debug!(?id, %scope, "feed subscription opened");
        self.subscriptions
            .write()
            .insert(id, Subscription { scope, sender });

        FeedChannel { id, receiver }
    }

    /// Close a subscription. Buffered messages stay readable, then the
    /// receiver reports disconnection.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if self.subscriptions.write().remove(&id).is_some() {
            debug!(?id, "feed subscription closed");
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Broadcast an event to every subscription whose scope covers its record.
    pub fn publish(&self, event: &ChangeEvent) {
        let message = match event.encode() {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "failed to encode change event");
                return;
            }
        };
        let id = event.id().clone();
        self.broadcast(|sub| sub.scope.covers(&id), message);
    }

    /// Broadcast an arbitrary message to every subscription.
    pub fn publish_raw(&self, message: serde_json::Value) {
        self.broadcast(|_| true, message);
    }

    /// Internal broadcast helper. Drops subscribers that fail to receive.
    fn broadcast<F>(&self, filter: F, message: serde_json::Value)
    where
        F: Fn(&Subscription) -> bool,
    {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if filter(sub) && !sub.try_send(message.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                warn!(?id, "dropping slow or disconnected feed subscriber");
                subs.remove(&id);
            }
        }
    }
}

impl Default for FeedBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
