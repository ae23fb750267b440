//! Bounded conflict resolution between concurrent writers.

mod common;

use async_trait::async_trait;
use common::{client, client_with, ready_video};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use video_sync::{
    Baseline, ClientConfig, DeleteOutcome, FeedChannel, FeedScope, InMemoryService, ListPage,
    ListQuery, MetadataService, RecordId, RecordStore, ResolutionPath, ResolutionState,
    Result, SaveOutcome, Session, SubscriptionId, SyncClient, SyncError, SyncResponse,
    TagMergePolicy, VideoFields, VideoRecord,
};

#[tokio::test]
async fn test_disjoint_retry_keeps_both_changes() {
    let service = Arc::new(InMemoryService::new());
    let editor_a = client(&service, "A");
    let editor_b = client(&service, "B");

    let record = ready_video(&service, &editor_a, "Fight Night").await;
    editor_b.fetch(&record.id).await.unwrap();
    assert_eq!(record.version, 3);

    let a = editor_a
        .update(&record.id, VideoFields::new().title("Fight Night: Rematch"))
        .await
        .unwrap();
    assert_eq!(a.record().version, 4);

    let b = editor_b
        .update(&record.id, VideoFields::new().description("Round by round"))
        .await
        .unwrap();

    match b {
        SaveOutcome::AutoResolved {
            record: merged,
            path,
            trace,
        } => {
            assert_eq!(path, ResolutionPath::FieldMerge);
            assert_eq!(merged.version, 5);
            assert_eq!(merged.title, "Fight Night: Rematch");
            assert_eq!(merged.description, "Round by round");
            assert_eq!(
                trace,
                vec![
                    ResolutionState::Idle,
                    ResolutionState::Syncing,
                    ResolutionState::Conflicted,
                    ResolutionState::Retrying,
                    ResolutionState::Resolved,
                ]
            );
        }
        other => panic!("expected auto-resolved save, got {:?}", other),
    }
}

#[tokio::test]
async fn test_overlapping_retry_is_last_write_wins() {
    let service = Arc::new(InMemoryService::new());
    let editor_a = client(&service, "A");
    let editor_b = client(&service, "B");

    let record = ready_video(&service, &editor_a, "Fight Night").await;
    editor_b.fetch(&record.id).await.unwrap();

    editor_a
        .update(
            &record.id,
            VideoFields::new().title("From A").description("A's notes"),
        )
        .await
        .unwrap();

    let b = editor_b
        .update(&record.id, VideoFields::new().title("From B"))
        .await
        .unwrap();

    match &b {
        SaveOutcome::AutoResolved { record: r, path, trace } => {
            assert_eq!(*path, ResolutionPath::RefreshAndRetry);
            assert_eq!(r.version, 5);
            assert_eq!(r.title, "From B");
            // A's non-overlapping change survives the refresh.
            assert_eq!(r.description, "A's notes");
            assert_eq!(
                trace.iter().filter(|&&s| s == ResolutionState::Retrying).count(),
                1
            );
        }
        other => panic!("expected auto-resolved save, got {:?}", other),
    }
    assert_eq!(service.snapshot(&record.id).unwrap().version, 5);
}

#[tokio::test]
async fn test_concurrent_tag_edits_merge_three_way() {
    let service = Arc::new(InMemoryService::new());
    let editor_a = client(&service, "A");
    let editor_b = client(&service, "B");

    let record = ready_video(&service, &editor_a, "Fight Night").await;
    editor_a
        .update(&record.id, VideoFields::new().tags(["boxing", "live"]))
        .await
        .unwrap();
    editor_b.fetch(&record.id).await.unwrap();

    editor_a
        .update(&record.id, VideoFields::new().tags(["boxing", "live", "ppv"]))
        .await
        .unwrap();
    let b = editor_b
        .update(&record.id, VideoFields::new().tags(["boxing", "highlights"]))
        .await
        .unwrap();

    assert!(b.was_auto_resolved());
    assert_eq!(b.record().tags, vec!["boxing", "ppv", "highlights"]);
}

#[tokio::test]
async fn test_replace_policy_treats_tags_as_scalar() {
    let service = Arc::new(InMemoryService::new());
    let config = ClientConfig {
        tag_merge: TagMergePolicy::Replace,
        ..Default::default()
    };
    let editor_a = client(&service, "A");
    let editor_b = client_with(&service, "B", config);

    let record = ready_video(&service, &editor_a, "Fight Night").await;
    editor_b.fetch(&record.id).await.unwrap();

    editor_a
        .update(&record.id, VideoFields::new().tags(["ppv"]))
        .await
        .unwrap();
    let b = editor_b
        .update(&record.id, VideoFields::new().tags(["highlights"]))
        .await
        .unwrap();

    match b {
        SaveOutcome::AutoResolved { record, path, .. } => {
            assert_eq!(path, ResolutionPath::RefreshAndRetry);
            assert_eq!(record.tags, vec!["highlights"]);
        }
        other => panic!("expected auto-resolved save, got {:?}", other),
    }
}

/// Service where a third writer commits just ahead of every update, so each
/// attempt (retry included) arrives with a stale baseline.
struct ContendedService {
    inner: InMemoryService,
    updates: AtomicUsize,
}

#[async_trait]
impl MetadataService for ContendedService {
    async fn create(&self, session: &Session, fields: &VideoFields) -> Result<VideoRecord> {
        self.inner.create(session, fields).await
    }

    async fn update(
        &self,
        session: &Session,
        id: &RecordId,
        fields: &VideoFields,
        baseline: &Baseline,
    ) -> Result<VideoRecord> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if let Some(current) = self.inner.snapshot(id) {
            self.inner
                .processor_update(id, &VideoFields::new().view_count(current.view_count + 1))?;
        }
        self.inner.update(session, id, fields, baseline).await
    }

    async fn delete(&self, session: &Session, id: &RecordId, hard: bool) -> Result<DeleteOutcome> {
        self.inner.delete(session, id, hard).await
    }

    async fn get(&self, session: &Session, id: &RecordId) -> Result<VideoRecord> {
        self.inner.get(session, id).await
    }

    async fn list(&self, session: &Session, query: &ListQuery) -> Result<ListPage> {
        self.inner.list(session, query).await
    }

    async fn sync(
        &self,
        session: &Session,
        id: &RecordId,
        baseline: &Baseline,
    ) -> Result<SyncResponse> {
        self.inner.sync(session, id, baseline).await
    }

    async fn subscribe(
        &self,
        session: &Session,
        scope: &FeedScope,
        buffer_size: usize,
    ) -> Result<FeedChannel> {
        self.inner.subscribe(session, scope, buffer_size).await
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.unsubscribe(id);
    }
}

#[tokio::test]
async fn test_second_conflict_is_surfaced_not_retried() {
    common::init_tracing();
    let service = Arc::new(ContendedService {
        inner: InMemoryService::new(),
        updates: AtomicUsize::new(0),
    });
    let session = Session::new("A", "session-A");
    let store = Arc::new(RecordStore::new());
    let editor = SyncClient::new(service.clone(), session, store.clone(), ClientConfig::default());

    let record = editor
        .create(VideoFields::new().title("Fight Night"))
        .await
        .unwrap();
    // Someone else moves the record on before our edit.
    service
        .inner
        .processor_update(&record.id, &VideoFields::new().view_count(1))
        .unwrap();

    let err = editor
        .update(&record.id, VideoFields::new().title("Mine"))
        .await
        .unwrap_err();

    let server_state = match err {
        SyncError::UnresolvedConflict { id, server_state } => {
            assert_eq!(id, record.id);
            server_state
        }
        other => panic!("expected unresolved conflict, got {:?}", other),
    };

    // Original attempt plus exactly one retry.
    assert_eq!(service.updates.load(Ordering::SeqCst), 2);

    // The store holds the latest state the server reported, not our edit.
    let held = store.get(&record.id).unwrap();
    assert_eq!(held, *server_state);
    assert_eq!(held.title, "Fight Night");
    assert!(!store.has_pending(&record.id));
}

#[tokio::test]
async fn test_store_never_holds_unaccepted_values_after_resolution() {
    let service = Arc::new(InMemoryService::new());
    let editor_a = client(&service, "A");
    let editor_b = client(&service, "B");

    let record = ready_video(&service, &editor_a, "Fight Night").await;
    editor_b.fetch(&record.id).await.unwrap();

    editor_a
        .update(&record.id, VideoFields::new().view_count(100))
        .await
        .unwrap();
    let b = editor_b
        .update(&record.id, VideoFields::new().category("boxing"))
        .await
        .unwrap();

    let held = editor_b.store().get(&record.id).unwrap();
    assert_eq!(held, service.snapshot(&record.id).unwrap());
    assert_eq!(held, b.into_record());
    assert!(!editor_b.store().has_pending(&record.id));
}
