//! In-process metadata service.
//!
//! Implements the full remote contract against a map held in memory:
//! server-assigned ids, version and vector-clock bookkeeping, causal conflict
//! detection, soft and hard delete, listing, sync actions and the change
//! feed. Latency and transport faults can be injected to exercise the
//! client's timeout and failure paths.

use super::{total_pages, DeleteOutcome, ListPage, ListQuery, MetadataService, SyncResponse};
use crate::error::{Result, SyncError};
use crate::feed::{ChangeEvent, FeedBroadcaster, FeedChannel, FeedScope, SubscriptionId};
use crate::types::{
    ActorId, Baseline, ClockOrdering, RecordId, Session, Timestamp, VectorClock, VideoFields,
    VideoRecord, VideoStatus,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Actor id used for status updates from the processing pipeline.
pub const PROCESSOR_ACTOR: &str = "processor";

#[derive(Default)]
struct Faults {
    /// Delay before a request is handled.
    latency: Duration,
    /// Delay after a request is handled, before the response is returned.
    response_delay: Duration,
    /// Number of upcoming requests to fail with a transport error.
    fail_next: u32,
}

/// Metadata service held entirely in memory.
pub struct InMemoryService {
    records: Mutex<HashMap<RecordId, VideoRecord>>,
    feed: FeedBroadcaster,
    faults: Mutex<Faults>,
}

impl InMemoryService {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            feed: FeedBroadcaster::new(),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// The change-feed broadcaster, for publishing raw messages in tests.
    pub fn feed(&self) -> &FeedBroadcaster {
        &self.feed
    }

    pub fn set_latency(&self, latency: Duration) {
        self.faults.lock().latency = latency;
    }

    /// Delay responses after the request has been applied.
    pub fn set_response_delay(&self, delay: Duration) {
        self.faults.lock().response_delay = delay;
    }

    /// Fail the next `count` requests with a transport error.
    pub fn fail_next(&self, count: u32) {
        self.faults.lock().fail_next = count;
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Current server state of a record, bypassing faults.
    pub fn snapshot(&self, id: &RecordId) -> Option<VideoRecord> {
        self.records.lock().get(id).cloned()
    }

    /// Metadata update reported by the processing pipeline (status, media
    /// reference, ...). Applied against the current state, never conflicts.
    pub fn processor_update(&self, id: &RecordId, fields: &VideoFields) -> Result<VideoRecord> {
        fields.validate_for_update()?;
        let actor = ActorId::new(PROCESSOR_ACTOR);
        let record = {
            let mut records = self.records.lock();
            let current = records
                .get_mut(id)
                .ok_or_else(|| SyncError::NotFound(id.clone()))?;
            Self::commit(current, &actor, fields)?
        };
        self.feed.publish(&ChangeEvent::Update {
            record: record.clone(),
        });
        Ok(record)
    }

    async fn before_request(&self, operation: &str) -> Result<()> {
        let (latency, fail) = {
            let mut faults = self.faults.lock();
            let fail = faults.fail_next > 0;
            if fail {
                faults.fail_next -= 1;
            }
            (faults.latency, fail)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if fail {
            debug!(operation, "injected transport failure");
            return Err(SyncError::Transport(format!(
                "connection reset during {}",
                operation
            )));
        }
        Ok(())
    }

    async fn before_response(&self) {
        let delay = self.faults.lock().response_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Apply fields as one accepted mutation by `actor`.
    fn commit(current: &mut VideoRecord, actor: &ActorId, fields: &VideoFields) -> Result<VideoRecord> {
        if let Some(next) = fields.status {
            if !current.status.can_transition_to(next) {
                return Err(SyncError::Validation(format!(
                    "status cannot move from {} to {}",
                    current.status, next
                )));
            }
        }

        fields.apply_to(current);
        current.version += 1;
        current.vector_clock.increment(actor);
        current.updated_at = Timestamp::now();
        Ok(current.clone())
    }
}

impl Default for InMemoryService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataService for InMemoryService {
    /// New records start at version 1 with the creating actor's clock entry
    /// at 1, so a creator's first update never conflicts with its own create.
    async fn create(&self, session: &Session, fields: &VideoFields) -> Result<VideoRecord> {
        self.before_request("create").await?;
        fields.validate_for_create()?;

        let now = Timestamp::now();
        let mut record = VideoRecord {
            id: RecordId(uuid::Uuid::new_v4().to_string()),
            title: String::new(),
            description: String::new(),
            category: String::new(),
            tags: Vec::new(),
            status: VideoStatus::Uploading,
            media_ref: None,
            view_count: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            vector_clock: VectorClock::single(session.actor.clone(), 1),
            version: 1,
        };
        fields.apply_to(&mut record);

        self.records.lock().insert(record.id.clone(), record.clone());
        debug!(id = %record.id, actor = %session.actor, "created");
        self.feed.publish(&ChangeEvent::Insert {
            record: record.clone(),
        });

        self.before_response().await;
        Ok(record)
    }

    async fn update(
        &self,
        session: &Session,
        id: &RecordId,
        fields: &VideoFields,
        baseline: &Baseline,
    ) -> Result<VideoRecord> {
        self.before_request("update").await?;
        fields.validate_for_update()?;

        let record = {
            let mut records = self.records.lock();
            let current = records
                .get_mut(id)
                .ok_or_else(|| SyncError::NotFound(id.clone()))?;

            let seen_everything = baseline.vector_clock.descends_from(&current.vector_clock)
                && baseline.version >= current.version;
            if !seen_everything {
                debug!(%id, baseline = baseline.version, current = current.version, "conflict");
                return Err(SyncError::Conflict {
                    server_state: Box::new(current.clone()),
                });
            }

            Self::commit(current, &session.actor, fields)?
        };

        self.feed.publish(&ChangeEvent::Update {
            record: record.clone(),
        });
        self.before_response().await;
        Ok(record)
    }

    async fn delete(&self, session: &Session, id: &RecordId, hard: bool) -> Result<DeleteOutcome> {
        self.before_request("delete").await?;

        let (outcome, event) = {
            let mut records = self.records.lock();
            if hard {
                let last = records
                    .remove(id)
                    .ok_or_else(|| SyncError::NotFound(id.clone()))?;
                let outcome = DeleteOutcome::HardDeleted {
                    id: id.clone(),
                    last_version: last.version,
                };
                (outcome, Some(ChangeEvent::Delete { record: last, hard: true }))
            } else {
                let current = records
                    .get_mut(id)
                    .ok_or_else(|| SyncError::NotFound(id.clone()))?;
                if current.is_tombstone() {
                    (DeleteOutcome::SoftDeleted(current.clone()), None)
                } else {
                    if !current.status.can_soft_delete() {
                        return Err(SyncError::Validation(format!(
                            "cannot delete a record that is {}",
                            current.status
                        )));
                    }
                    let now = Timestamp::now();
                    current.status = VideoStatus::Deleted;
                    current.deleted_at = Some(now);
                    current.updated_at = now;
                    current.version += 1;
                    current.vector_clock.increment(&session.actor);
                    let tombstone = current.clone();
                    (
                        DeleteOutcome::SoftDeleted(tombstone.clone()),
                        Some(ChangeEvent::Delete {
                            record: tombstone,
                            hard: false,
                        }),
                    )
                }
            }
        };

        if let Some(event) = event {
            self.feed.publish(&event);
        }
        self.before_response().await;
        Ok(outcome)
    }

    async fn get(&self, _session: &Session, id: &RecordId) -> Result<VideoRecord> {
        self.before_request("get").await?;
        let record = self
            .records
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(id.clone()))?;
        self.before_response().await;
        Ok(record)
    }

    async fn list(&self, _session: &Session, query: &ListQuery) -> Result<ListPage> {
        self.before_request("list").await?;
        if query.page == 0 || query.limit == 0 {
            return Err(SyncError::Validation(
                "page and limit must be positive".into(),
            ));
        }

        let mut matching: Vec<VideoRecord> = self
            .records
            .lock()
            .values()
            .filter(|r| query.filters.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| query.sort.compare(a, b));

        let total = matching.len() as u64;
        let offset = (query.page as usize - 1).saturating_mul(query.limit as usize);
        let records = matching
            .into_iter()
            .skip(offset)
            .take(query.limit as usize)
            .collect();

        self.before_response().await;
        Ok(ListPage {
            records,
            total,
            total_pages: total_pages(total, query.limit),
        })
    }

    async fn sync(
        &self,
        _session: &Session,
        id: &RecordId,
        baseline: &Baseline,
    ) -> Result<SyncResponse> {
        self.before_request("sync").await?;

        let (response, event) = {
            let mut records = self.records.lock();
            let current = records
                .get_mut(id)
                .ok_or_else(|| SyncError::NotFound(id.clone()))?;

            match baseline.vector_clock.compare(&current.vector_clock) {
                ClockOrdering::Equal if baseline.version == current.version => {
                    (SyncResponse::NoChanges, None)
                }
                ClockOrdering::Concurrent => {
                    current.vector_clock.merge(&baseline.vector_clock);
                    current.version += 1;
                    current.updated_at = Timestamp::now();
                    let merged = current.clone();
                    (
                        SyncResponse::MergedConcurrent(merged.clone()),
                        Some(ChangeEvent::Update { record: merged }),
                    )
                }
                // Behind, ahead, or same clock with a different version: the server wins.
                _ => (SyncResponse::UpdateClient(current.clone()), None),
            }
        };

        if let Some(event) = event {
            self.feed.publish(&event);
        }
        self.before_response().await;
        Ok(response)
    }

    async fn subscribe(
        &self,
        _session: &Session,
        scope: &FeedScope,
        buffer_size: usize,
    ) -> Result<FeedChannel> {
        self.before_request("subscribe").await?;
        Ok(self.feed.subscribe(scope.clone(), buffer_size))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.feed.unsubscribe(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(actor: &str) -> Session {
        Session::new(actor, format!("token-{}", actor))
    }

    async fn ready_record(service: &InMemoryService) -> VideoRecord {
        let created = service
            .create(&session("a"), &VideoFields::new().title("Fight Night"))
            .await
            .unwrap();
        service
            .processor_update(&created.id, &VideoFields::new().status(VideoStatus::Processing))
            .unwrap();
        service
            .processor_update(&created.id, &VideoFields::new().status(VideoStatus::Ready))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_server_metadata() {
        let service = InMemoryService::new();
        let record = service
            .create(&session("a"), &VideoFields::new().title("Fight Night"))
            .await
            .unwrap();

        assert_eq!(record.version, 1);
        assert_eq!(record.status, VideoStatus::Uploading);
        assert_eq!(record.vector_clock, VectorClock::single(ActorId::new("a"), 1));
        assert_eq!(service.get(&session("b"), &record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_update_with_stale_baseline_conflicts() {
        let service = InMemoryService::new();
        let record = service
            .create(&session("a"), &VideoFields::new().title("v1"))
            .await
            .unwrap();
        let baseline = record.baseline();

        let accepted = service
            .update(&session("a"), &record.id, &VideoFields::new().title("v2"), &baseline)
            .await
            .unwrap();
        assert_eq!(accepted.version, 2);
        assert_eq!(accepted.vector_clock.get(&ActorId::new("a")), 2);

        let err = service
            .update(&session("b"), &record.id, &VideoFields::new().title("v2b"), &baseline)
            .await
            .unwrap_err();
        match err {
            SyncError::Conflict { server_state } => assert_eq!(server_state.version, 2),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_status_transition_is_rejected() {
        let service = InMemoryService::new();
        let record = service
            .create(&session("a"), &VideoFields::new().title("v1"))
            .await
            .unwrap();
        let err = service
            .update(
                &session("a"),
                &record.id,
                &VideoFields::new().status(VideoStatus::Ready),
                &record.baseline(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_soft_then_hard_delete() {
        let service = InMemoryService::new();
        let record = ready_record(&service).await;

        let outcome = service.delete(&session("a"), &record.id, false).await.unwrap();
        let tombstone = match outcome {
            DeleteOutcome::SoftDeleted(tombstone) => tombstone,
            other => panic!("expected soft delete, got {:?}", other),
        };
        assert_eq!(tombstone.status, VideoStatus::Deleted);
        assert_eq!(tombstone.version, record.version + 1);
        assert!(tombstone.deleted_at.is_some());

        service.delete(&session("a"), &record.id, true).await.unwrap();
        assert!(matches!(
            service.get(&session("a"), &record.id).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_actions() {
        let service = InMemoryService::new();
        let record = service
            .create(&session("a"), &VideoFields::new().title("v1"))
            .await
            .unwrap();

        let response = service
            .sync(&session("a"), &record.id, &record.baseline())
            .await
            .unwrap();
        assert_eq!(response, SyncResponse::NoChanges);

        let updated = service
            .processor_update(&record.id, &VideoFields::new().status(VideoStatus::Processing))
            .unwrap();
        let response = service
            .sync(&session("a"), &record.id, &record.baseline())
            .await
            .unwrap();
        assert_eq!(response, SyncResponse::UpdateClient(updated.clone()));

        let mut foreign = record.baseline();
        foreign.vector_clock.increment(&ActorId::new("offline-editor"));
        match service.sync(&session("a"), &record.id, &foreign).await.unwrap() {
            SyncResponse::MergedConcurrent(merged) => {
                assert_eq!(merged.version, updated.version + 1);
                assert!(merged.vector_clock.descends_from(&foreign.vector_clock));
            }
            other => panic!("expected merge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_injected_failure_applies_nothing() {
        let service = InMemoryService::new();
        service.fail_next(1);
        let err = service
            .create(&session("a"), &VideoFields::new().title("v1"))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(service.record_count(), 0);
    }
}
