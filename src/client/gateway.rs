//! Bounded, session-stamped access to the remote service.

use crate::error::{Result, SyncError};
use crate::feed::{FeedChannel, FeedScope, SubscriptionId};
use crate::remote::{DeleteOutcome, ListPage, ListQuery, MetadataService, SyncResponse};
use crate::types::{Baseline, RecordId, Session, VideoFields, VideoRecord};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Wraps a [`MetadataService`] with the caller's session and a per-call timeout.
///
/// Every call either completes within the timeout or fails with
/// [`SyncError::Timeout`]. Nothing is retried here.
#[derive(Clone)]
pub struct Gateway {
    service: Arc<dyn MetadataService>,
    session: Session,
    timeout: Duration,
}

impl Gateway {
    pub fn new(service: Arc<dyn MetadataService>, session: Session, timeout: Duration) -> Self {
        Self {
            service,
            session,
            timeout,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                let after_ms = self.timeout.as_millis() as u64;
                warn!(operation, after_ms, "remote call timed out");
                Err(SyncError::Timeout { operation, after_ms })
            }
        }
    }

    pub async fn create(&self, fields: &VideoFields) -> Result<VideoRecord> {
        self.bounded("create", self.service.create(&self.session, fields))
            .await
    }

    pub async fn update(
        &self,
        id: &RecordId,
        fields: &VideoFields,
        baseline: &Baseline,
    ) -> Result<VideoRecord> {
        self.bounded(
            "update",
            self.service.update(&self.session, id, fields, baseline),
        )
        .await
    }

    pub async fn delete(&self, id: &RecordId, hard: bool) -> Result<DeleteOutcome> {
        self.bounded("delete", self.service.delete(&self.session, id, hard))
            .await
    }

    pub async fn get(&self, id: &RecordId) -> Result<VideoRecord> {
        self.bounded("get", self.service.get(&self.session, id)).await
    }

    pub async fn list(&self, query: &ListQuery) -> Result<ListPage> {
        self.bounded("list", self.service.list(&self.session, query))
            .await
    }

    pub async fn sync(&self, id: &RecordId, baseline: &Baseline) -> Result<SyncResponse> {
        self.bounded("sync", self.service.sync(&self.session, id, baseline))
            .await
    }

    pub async fn subscribe(&self, scope: &FeedScope, buffer_size: usize) -> Result<FeedChannel> {
        self.bounded(
            "subscribe",
            self.service.subscribe(&self.session, scope, buffer_size),
        )
        .await
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.service.unsubscribe(id);
    }
}
