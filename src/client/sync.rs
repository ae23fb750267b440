//! Sync client: create, update, delete and sync against the remote store.

use super::gateway::Gateway;
use crate::config::ClientConfig;
use crate::conflict::{
    ConflictContext, ConflictResolver, ResolutionMachine, ResolutionPath, ResolutionState,
};
use crate::error::{Result, SyncError};
use crate::records::RecordStore;
use crate::remote::{DeleteOutcome, MetadataService, SyncResponse};
use crate::types::{Baseline, RecordId, Session, VideoFields, VideoRecord};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a save ended, distinguishable for presentation.
#[derive(Clone, Debug)]
pub enum SaveOutcome {
    /// Accepted as sent.
    Saved(VideoRecord),
    /// Accepted after one automatic resolution.
    AutoResolved {
        record: VideoRecord,
        path: ResolutionPath,
        trace: Vec<ResolutionState>,
    },
}

impl SaveOutcome {
    pub fn record(&self) -> &VideoRecord {
        match self {
            SaveOutcome::Saved(record) | SaveOutcome::AutoResolved { record, .. } => record,
        }
    }

    pub fn into_record(self) -> VideoRecord {
        match self {
            SaveOutcome::Saved(record) | SaveOutcome::AutoResolved { record, .. } => record,
        }
    }

    pub fn was_auto_resolved(&self) -> bool {
        matches!(self, SaveOutcome::AutoResolved { .. })
    }
}

/// Result of syncing one record.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncOutcome {
    NoChanges,
    Updated(VideoRecord),
    Merged(VideoRecord),
    /// The server no longer has the record; the local copy was dropped.
    Evicted,
}

/// Totals from [`SyncClient::sync_all`].
#[derive(Debug, Default)]
pub struct SyncReport {
    pub unchanged: usize,
    pub updated: usize,
    pub evicted: usize,
    pub failed: Vec<(RecordId, SyncError)>,
}

/// Provisional overlay for one in-flight save.
///
/// Dropped when the save ends, including when its future is cancelled, so the
/// overlay never outlives the request that placed it.
struct PendingEdit<'a> {
    store: &'a RecordStore,
    id: &'a RecordId,
}

impl Drop for PendingEdit<'_> {
    fn drop(&mut self) {
        if self.store.discard_pending(self.id).is_some() {
            debug!(id = %self.id, "dropped provisional edit");
        }
    }
}

/// Issues mutations carrying the client's baseline and folds the results
/// into the shared [`RecordStore`].
pub struct SyncClient {
    gateway: Gateway,
    store: Arc<RecordStore>,
    resolver: ConflictResolver,
    config: ClientConfig,
}

impl SyncClient {
    pub fn new(
        service: Arc<dyn MetadataService>,
        session: Session,
        store: Arc<RecordStore>,
        config: ClientConfig,
    ) -> Self {
        let gateway = Gateway::new(service, session, config.request_timeout());
        Self {
            gateway,
            store,
            resolver: ConflictResolver::new(config.tag_merge),
            config,
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn session(&self) -> &Session {
        self.gateway.session()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create a record. Validation and transport failures are returned, never retried.
    pub async fn create(&self, fields: VideoFields) -> Result<VideoRecord> {
        fields.validate_for_create()?;

        let record = self.gateway.create(&fields).await?;
        self.store.settle(record.clone());
        info!(id = %record.id, "created record");
        Ok(record)
    }

    /// Update a record from the locally held baseline.
    ///
    /// A conflict goes to the resolver exactly once; the same baseline is
    /// never re-sent.
    pub async fn update(&self, id: &RecordId, fields: VideoFields) -> Result<SaveOutcome> {
        fields.validate_for_update()?;

        let baseline = match self.store.confirmed(id) {
            Some(record) => record,
            None => self.fetch(id).await?,
        };

        let mut machine = ResolutionMachine::new();
        machine.transition(ResolutionState::Syncing)?;

        let _pending = if self.config.provisional_edits {
            self.store.patch(id, &fields);
            Some(PendingEdit {
                store: &self.store,
                id,
            })
        } else {
            None
        };

        match self.gateway.update(id, &fields, &baseline.baseline()).await {
            Ok(record) => {
                machine.transition(ResolutionState::Resolved)?;
                self.store.settle(record.clone());
                debug!(%id, version = record.version, "update accepted");
                Ok(SaveOutcome::Saved(record))
            }
            Err(SyncError::Conflict { server_state }) => {
                machine.transition(ResolutionState::Conflicted)?;
                let ctx = ConflictContext {
                    id: id.clone(),
                    intended: fields,
                    baseline,
                    server_state: *server_state,
                };
                let resolution = self
                    .resolver
                    .resolve(&self.gateway, &self.store, machine, ctx)
                    .await?;
                Ok(SaveOutcome::AutoResolved {
                    record: resolution.record,
                    path: resolution.path,
                    trace: resolution.trace,
                })
            }
            Err(SyncError::NotFound(missing)) => {
                self.store.remove(&missing);
                Err(SyncError::NotFound(missing))
            }
            Err(e) => {
                warn!(%id, error = %e, "update failed");
                self.store.discard_pending(id);
                Err(e)
            }
        }
    }

    /// Soft delete leaves a versioned tombstone; hard delete evicts the id.
    pub async fn delete(&self, id: &RecordId, hard: bool) -> Result<DeleteOutcome> {
        match self.gateway.delete(id, hard).await {
            Ok(DeleteOutcome::SoftDeleted(tombstone)) => {
                self.store.settle(tombstone.clone());
                info!(%id, version = tombstone.version, "soft deleted");
                Ok(DeleteOutcome::SoftDeleted(tombstone))
            }
            Ok(DeleteOutcome::HardDeleted { id, last_version }) => {
                self.store.evict_at(&id, last_version);
                info!(%id, "hard deleted");
                Ok(DeleteOutcome::HardDeleted { id, last_version })
            }
            Err(SyncError::NotFound(missing)) => {
                self.store.remove(&missing);
                Err(SyncError::NotFound(missing))
            }
            Err(e) => Err(e),
        }
    }

    /// Read the server's current state into the store.
    pub async fn fetch(&self, id: &RecordId) -> Result<VideoRecord> {
        match self.gateway.get(id).await {
            Ok(record) => {
                self.store.accept(record.clone());
                Ok(record)
            }
            Err(SyncError::NotFound(missing)) => {
                self.store.remove(&missing);
                Err(SyncError::NotFound(missing))
            }
            Err(e) => Err(e),
        }
    }

    /// Reconcile one record's baseline with the server.
    pub async fn sync(&self, id: &RecordId) -> Result<SyncOutcome> {
        let baseline = self.store.baseline(id).unwrap_or_else(Baseline::default);

        match self.gateway.sync(id, &baseline).await {
            Ok(SyncResponse::NoChanges) => Ok(SyncOutcome::NoChanges),
            Ok(SyncResponse::UpdateClient(record)) => {
                self.store.accept(record.clone());
                Ok(SyncOutcome::Updated(record))
            }
            Ok(SyncResponse::MergedConcurrent(record)) => {
                self.store.accept(record.clone());
                Ok(SyncOutcome::Merged(record))
            }
            Err(SyncError::NotFound(missing)) => {
                debug!(id = %missing, "evicting record gone from server");
                self.store.remove(&missing);
                Ok(SyncOutcome::Evicted)
            }
            Err(e) => Err(e),
        }
    }

    /// Sync every held record. Failures are collected, not fatal.
    pub async fn sync_all(&self) -> SyncReport {
        let mut report = SyncReport::default();
        for id in self.store.ids() {
            match self.sync(&id).await {
                Ok(SyncOutcome::NoChanges) => report.unchanged += 1,
                Ok(SyncOutcome::Updated(_)) | Ok(SyncOutcome::Merged(_)) => report.updated += 1,
                Ok(SyncOutcome::Evicted) => report.evicted += 1,
                Err(e) => report.failed.push((id, e)),
            }
        }
        report
    }
}
