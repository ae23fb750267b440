//! Folds change-feed events into the record store.

use crate::client::Gateway;
use crate::error::{Result, SyncError};
use crate::feed::types::{ChangeEvent, FeedChannel, FeedScope};
use crate::records::{AcceptOutcome, RecordStore};
use crossbeam_channel::TryRecvError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::AddAssign;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters from folding feed events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub applied: usize,
    /// Events for states not newer than what the store holds.
    pub stale: usize,
    /// Messages that did not decode; dropped.
    pub malformed: usize,
    /// Subscriptions whose channel closed during the drain.
    pub disconnected: usize,
}

impl AddAssign for FeedStats {
    fn add_assign(&mut self, other: Self) {
        self.applied += other.applied;
        self.stale += other.stale;
        self.malformed += other.malformed;
        self.disconnected += other.disconnected;
    }
}

struct ActiveFeed {
    channel: FeedChannel,
    closed: bool,
}

/// Keeps at most one live subscription per scope and applies what arrives
/// under monotonic acceptance.
pub struct FeedSubscriber {
    gateway: Gateway,
    store: Arc<RecordStore>,
    buffer_size: usize,
    active: Mutex<HashMap<FeedScope, ActiveFeed>>,
}

impl FeedSubscriber {
    pub fn new(gateway: Gateway, store: Arc<RecordStore>, buffer_size: usize) -> Self {
        Self {
            gateway,
            store,
            buffer_size,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Open a subscription. Fails if one is already active for `scope`;
    /// a closed one is replaced.
    pub async fn subscribe(&self, scope: FeedScope) -> Result<()> {
        if let Some(feed) = self.active.lock().get(&scope) {
            if !feed.closed {
                return Err(SyncError::SubscriptionExists(scope));
            }
        }

        let channel = self.gateway.subscribe(&scope, self.buffer_size).await?;

        let mut active = self.active.lock();
        if let Some(existing) = active.get(&scope) {
            if !existing.closed {
                // Lost a race with another subscribe for the same scope.
                self.gateway.unsubscribe(channel.id);
                return Err(SyncError::SubscriptionExists(scope));
            }
        }
        info!(%scope, "subscribed to change feed");
        active.insert(
            scope,
            ActiveFeed {
                channel,
                closed: false,
            },
        );
        Ok(())
    }

    /// Release a subscription. Returns false if none was held.
    pub fn release(&self, scope: &FeedScope) -> bool {
        match self.active.lock().remove(scope) {
            Some(feed) => {
                self.gateway.unsubscribe(feed.channel.id);
                debug!(%scope, "released change feed");
                true
            }
            None => false,
        }
    }

    pub fn release_all(&self) {
        let drained: Vec<(FeedScope, ActiveFeed)> = self.active.lock().drain().collect();
        for (_, feed) in drained {
            self.gateway.unsubscribe(feed.channel.id);
        }
    }

    pub fn is_active(&self, scope: &FeedScope) -> bool {
        self.active
            .lock()
            .get(scope)
            .map(|f| !f.closed)
            .unwrap_or(false)
    }

    /// Scopes with an open subscription.
    pub fn active_scopes(&self) -> Vec<FeedScope> {
        self.active
            .lock()
            .iter()
            .filter(|(_, f)| !f.closed)
            .map(|(scope, _)| scope.clone())
            .collect()
    }

    /// Apply everything pending on one subscription.
    pub fn drain(&self, scope: &FeedScope) -> FeedStats {
        let mut stats = FeedStats::default();
        let mut active = self.active.lock();
        if let Some(feed) = active.get_mut(scope) {
            self.drain_feed(scope, feed, &mut stats, &mut |_: &ChangeEvent| {});
        }
        stats
    }

    /// Apply everything pending on every subscription.
    pub fn drain_all(&self) -> FeedStats {
        self.drain_all_with(|_| {})
    }

    /// Like [`FeedSubscriber::drain_all`], handing each decoded event to
    /// `observe` before it is applied to the store.
    ///
    /// Views use this to see the state an update replaces.
    pub fn drain_all_with<F>(&self, mut observe: F) -> FeedStats
    where
        F: FnMut(&ChangeEvent),
    {
        let mut stats = FeedStats::default();
        let mut active = self.active.lock();
        for (scope, feed) in active.iter_mut() {
            let mut feed_stats = FeedStats::default();
            self.drain_feed(scope, feed, &mut feed_stats, &mut observe);
            stats += feed_stats;
        }
        stats
    }

    fn drain_feed(
        &self,
        scope: &FeedScope,
        feed: &mut ActiveFeed,
        stats: &mut FeedStats,
        observe: &mut dyn FnMut(&ChangeEvent),
    ) {
        if feed.closed {
            return;
        }
        loop {
            match feed.channel.try_recv() {
                Ok(message) => self.fold_message(&message, stats, observe),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!(%scope, "change feed disconnected");
                    feed.closed = true;
                    stats.disconnected += 1;
                    break;
                }
            }
        }
    }

    fn fold_message(
        &self,
        message: &serde_json::Value,
        stats: &mut FeedStats,
        observe: &mut dyn FnMut(&ChangeEvent),
    ) {
        match ChangeEvent::decode(message) {
            Ok(event) => {
                observe(&event);
                if self.apply(&event).is_applied() {
                    stats.applied += 1;
                } else {
                    stats.stale += 1;
                }
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed change event");
                stats.malformed += 1;
            }
        }
    }

    /// Apply one event to the store.
    ///
    /// Insert and update both require a strictly newer version than held, so
    /// an echo of our own create, or an out-of-order update, is dropped.
    pub fn apply(&self, event: &ChangeEvent) -> AcceptOutcome {
        let outcome = match event {
            ChangeEvent::Insert { record } | ChangeEvent::Update { record } => {
                self.store.accept(record.clone())
            }
            ChangeEvent::Delete { record, hard: false } => self.store.accept(record.clone()),
            ChangeEvent::Delete { record, hard: true } => {
                match self.store.evict_at(&record.id, record.version) {
                    Some(_) => AcceptOutcome::Replaced,
                    None => AcceptOutcome::Unchanged,
                }
            }
        };
        debug!(kind = event.kind(), id = %event.id(), version = event.record().version, ?outcome, "feed event");
        outcome
    }
}

impl Drop for FeedSubscriber {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryService;
    use crate::types::test_support::record;
    use crate::types::{RecordId, Session};
    use std::time::Duration;

    fn subscriber(service: Arc<InMemoryService>) -> (FeedSubscriber, Arc<RecordStore>) {
        let store = Arc::new(RecordStore::new());
        let gateway = Gateway::new(service, Session::new("a", "t"), Duration::from_secs(1));
        (FeedSubscriber::new(gateway, store.clone(), 100), store)
    }

    #[test]
    fn test_update_requires_newer_version() {
        let (feed, store) = subscriber(Arc::new(InMemoryService::new()));
        let id = RecordId::new("r1");
        store.accept(record("r1", 5));

        let outcome = feed.apply(&ChangeEvent::Update {
            record: record("r1", 4),
        });
        assert_eq!(outcome, AcceptOutcome::Stale);
        assert_eq!(store.version(&id), Some(5));

        let outcome = feed.apply(&ChangeEvent::Update {
            record: record("r1", 6),
        });
        assert_eq!(outcome, AcceptOutcome::Replaced);
    }

    #[test]
    fn test_insert_echo_does_not_downgrade() {
        let (feed, store) = subscriber(Arc::new(InMemoryService::new()));
        store.accept(record("r1", 2));

        let outcome = feed.apply(&ChangeEvent::Insert {
            record: record("r1", 1),
        });
        assert_eq!(outcome, AcceptOutcome::Stale);
        assert_eq!(store.version(&RecordId::new("r1")), Some(2));
    }

    #[test]
    fn test_hard_delete_evicts_and_blocks_late_updates() {
        let (feed, store) = subscriber(Arc::new(InMemoryService::new()));
        store.accept(record("r1", 2));

        feed.apply(&ChangeEvent::Delete {
            record: record("r1", 3),
            hard: true,
        });
        assert!(!store.contains(&RecordId::new("r1")));

        let late = feed.apply(&ChangeEvent::Update {
            record: record("r1", 3),
        });
        assert_eq!(late, AcceptOutcome::Stale);
        assert!(!store.contains(&RecordId::new("r1")));
    }

    #[tokio::test]
    async fn test_one_subscription_per_scope() {
        let service = Arc::new(InMemoryService::new());
        let (feed, _store) = subscriber(service.clone());

        feed.subscribe(FeedScope::All).await.unwrap();
        assert!(matches!(
            feed.subscribe(FeedScope::All).await,
            Err(SyncError::SubscriptionExists(FeedScope::All))
        ));
        feed.subscribe(FeedScope::Record(RecordId::new("r1")))
            .await
            .unwrap();
        assert_eq!(service.feed().subscription_count(), 2);

        assert!(feed.release(&FeedScope::All));
        assert!(!feed.release(&FeedScope::All));
        assert_eq!(service.feed().subscription_count(), 1);

        drop(feed);
        assert_eq!(service.feed().subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_events_do_not_end_subscription() {
        let service = Arc::new(InMemoryService::new());
        let (feed, store) = subscriber(service.clone());
        feed.subscribe(FeedScope::All).await.unwrap();

        service.feed().publish_raw(serde_json::json!({"type": "UPDATE"}));
        service.feed().publish_raw(serde_json::json!("garbage"));
        service.feed().publish(&ChangeEvent::Insert {
            record: record("r1", 1),
        });

        let stats = feed.drain(&FeedScope::All);
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.applied, 1);
        assert!(feed.is_active(&FeedScope::All));
        assert!(store.contains(&RecordId::new("r1")));
    }

    #[tokio::test]
    async fn test_observer_runs_before_store_update() {
        let service = Arc::new(InMemoryService::new());
        let (feed, store) = subscriber(service.clone());
        store.accept(record("r1", 1));
        feed.subscribe(FeedScope::All).await.unwrap();

        service.feed().publish(&ChangeEvent::Update {
            record: record("r1", 2),
        });

        let mut held_before = Vec::new();
        let stats = feed.drain_all_with(|event| held_before.push(store.version(event.id())));
        assert_eq!(held_before, vec![Some(1)]);
        assert_eq!(stats.applied, 1);
        assert_eq!(store.version(&RecordId::new("r1")), Some(2));
    }

    #[tokio::test]
    async fn test_disconnect_marks_closed_and_allows_resubscribe() {
        let service = Arc::new(InMemoryService::new());
        let (feed, _store) = subscriber(service.clone());
        feed.subscribe(FeedScope::All).await.unwrap();

        // Server side drops every subscription.
        for id in 0..10 {
            service.feed().unsubscribe(crate::feed::SubscriptionId(id));
        }

        let stats = feed.drain_all();
        assert_eq!(stats.disconnected, 1);
        assert!(!feed.is_active(&FeedScope::All));
        assert!(feed.active_scopes().is_empty());

        feed.subscribe(FeedScope::All).await.unwrap();
        assert!(feed.is_active(&FeedScope::All));
    }
}
