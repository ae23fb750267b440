//! # Video Sync
//!
//! Client-side sync engine keeping a local cache of shared video metadata
//! consistent with a remote authoritative store under concurrent,
//! uncoordinated writers.
//!
//! ## Core Concepts
//!
//! - **Record Store**: in-memory cache; every network-derived write must carry
//!   a newer version than what is held
//! - **Sync Client**: create/update/delete/sync carrying the held baseline
//!   (vector clock + version)
//! - **Conflict Resolver**: one bounded automatic retry, as a field-level
//!   merge or refresh-and-retry
//! - **Change Feed**: live INSERT/UPDATE/DELETE events from other writers
//! - **Query Coordinator**: paginated views that re-query rather than patch
//!
//! ## Example
//!
//! ```ignore
//! use video_sync::{ClientConfig, InMemoryService, RecordStore, Session, SyncClient, VideoFields};
//! use std::sync::Arc;
//!
//! let service = Arc::new(InMemoryService::new());
//! let store = Arc::new(RecordStore::new());
//! let client = SyncClient::new(
//!     service,
//!     Session::new("editor-1", token),
//!     store.clone(),
//!     ClientConfig::default(),
//! );
//!
//! let record = client.create(VideoFields::new().title("Fight Night")).await?;
//! let outcome = client
//!     .update(&record.id, VideoFields::new().description("Highlights"))
//!     .await?;
//! if outcome.was_auto_resolved() {
//!     // Saved, but only after merging with another writer's change.
//! }
//! ```

pub mod client;
pub mod config;
pub mod conflict;
pub mod error;
pub mod feed;
pub mod query;
pub mod records;
pub mod remote;
pub mod types;

// Re-exports
pub use client::{Gateway, SaveOutcome, SyncClient, SyncOutcome, SyncReport};
pub use config::{ClientConfig, TagMergePolicy};
pub use conflict::{
    ConflictContext, ConflictResolver, MergePlan, Resolution, ResolutionMachine, ResolutionPath,
    ResolutionState,
};
pub use error::{Result, SyncError};
pub use feed::{
    ChangeEvent, FeedBroadcaster, FeedChannel, FeedScope, FeedStats, FeedSubscriber,
    SubscriptionId,
};
pub use query::{Mutation, QueryCoordinator, ViewPage};
pub use records::{AcceptOutcome, RecordStore};
pub use remote::{
    DeleteOutcome, InMemoryService, ListFilters, ListPage, ListQuery, MetadataService,
    SortDirection, SortField, SortOrder, SyncResponse,
};
pub use types::*;
