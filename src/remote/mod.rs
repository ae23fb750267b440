//! Remote metadata service contract.
//!
//! The remote store is the sole source of truth. This module defines the
//! requests the client sends it and the shapes it answers with, plus an
//! in-process implementation ([`InMemoryService`]) that honours the same
//! semantics.

mod memory;

pub use memory::InMemoryService;

use crate::error::Result;
use crate::feed::{FeedChannel, FeedScope, SubscriptionId};
use crate::types::{Baseline, Field, RecordId, Session, VideoFields, VideoRecord, VideoStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Remote metadata service.
///
/// Errors are typed: `Validation`, `Transport`, `NotFound`, and `Conflict`
/// carrying the server's authoritative state.
#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn create(&self, session: &Session, fields: &VideoFields) -> Result<VideoRecord>;

    async fn update(
        &self,
        session: &Session,
        id: &RecordId,
        fields: &VideoFields,
        baseline: &Baseline,
    ) -> Result<VideoRecord>;

    async fn delete(&self, session: &Session, id: &RecordId, hard: bool) -> Result<DeleteOutcome>;

    async fn get(&self, session: &Session, id: &RecordId) -> Result<VideoRecord>;

    async fn list(&self, session: &Session, query: &ListQuery) -> Result<ListPage>;

    async fn sync(&self, session: &Session, id: &RecordId, baseline: &Baseline)
        -> Result<SyncResponse>;

    async fn subscribe(
        &self,
        session: &Session,
        scope: &FeedScope,
        buffer_size: usize,
    ) -> Result<FeedChannel>;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// Result of a delete request.
#[derive(Clone, Debug, PartialEq)]
pub enum DeleteOutcome {
    /// Tombstone left in place, still versioned.
    SoftDeleted(VideoRecord),
    /// Record removed server-side.
    HardDeleted { id: RecordId, last_version: u64 },
}

/// Server answer to a sync request.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncResponse {
    /// Client baseline matches the server.
    NoChanges,
    /// Client is behind; here is the current state.
    UpdateClient(VideoRecord),
    /// Client clock was concurrent with the server's; the server merged the
    /// clocks and committed a new version.
    MergedConcurrent(VideoRecord),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Title,
    ViewCount,
}

impl SortField {
    /// Whether changing `fields` can move a record within this ordering.
    ///
    /// Any accepted update moves `updated_at`.
    pub fn affected_by(self, fields: &BTreeSet<Field>) -> bool {
        match self {
            SortField::CreatedAt => false,
            SortField::UpdatedAt => !fields.is_empty(),
            SortField::Title => fields.contains(&Field::Title),
            SortField::ViewCount => fields.contains(&Field::ViewCount),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortOrder {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    /// Total order over records; ties break on id.
    pub fn compare(&self, a: &VideoRecord, b: &VideoRecord) -> Ordering {
        let primary = match self.field {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            SortField::ViewCount => a.view_count.cmp(&b.view_count),
        };
        let primary = match self.direction {
            SortDirection::Asc => primary,
            SortDirection::Desc => primary.reverse(),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

/// Listing filters. Tombstones are excluded unless asked for.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListFilters {
    pub category: Option<String>,
    pub status: Option<VideoStatus>,
    /// Records carrying this tag.
    pub tag: Option<String>,
    /// Case-insensitive substring of the title.
    pub search: Option<String>,
    pub include_deleted: bool,
}

impl ListFilters {
    pub fn matches(&self, record: &VideoRecord) -> bool {
        let wants_tombstones =
            self.include_deleted || self.status == Some(VideoStatus::Deleted);
        if record.is_tombstone() && !wants_tombstones {
            return false;
        }
        if let Some(category) = &self.category {
            if &record.category != category {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !record.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !record.title.to_lowercase().contains(&search.to_lowercase()) {
                return false;
            }
        }
        true
    }

    /// Fields whose values decide membership under these filters.
    ///
    /// Status always counts since it decides tombstone exclusion.
    pub fn filtered_fields(&self) -> BTreeSet<Field> {
        let mut fields = BTreeSet::new();
        fields.insert(Field::Status);
        if self.category.is_some() {
            fields.insert(Field::Category);
        }
        if self.tag.is_some() {
            fields.insert(Field::Tags);
        }
        if self.search.is_some() {
            fields.insert(Field::Title);
        }
        fields
    }
}

/// A windowed listing request. Pages are 1-based.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub filters: ListFilters,
    pub sort: SortOrder,
}

/// One window of a listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    pub records: Vec<VideoRecord>,
    pub total: u64,
    pub total_pages: u32,
}

pub(crate) fn total_pages(total: u64, limit: u32) -> u32 {
    if limit == 0 {
        return 0;
    }
    ((total + limit as u64 - 1) / limit as u64) as u32
}
