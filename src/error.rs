//! Error types for the sync engine.

use crate::feed::FeedScope;
use crate::types::{RecordId, VideoRecord};
use thiserror::Error;

/// Main error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network-level failure. Surfaced to the caller, retried only by hand.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A remote call exceeded its bound. Treated as a transport failure.
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: &'static str, after_ms: u64 },

    /// Unknown or hard-deleted id.
    #[error("Record not found: {0}")]
    NotFound(RecordId),

    /// The server saw writes the client's baseline does not include.
    #[error("Conflict on {}: server is at version {}", .server_state.id, .server_state.version)]
    Conflict { server_state: Box<VideoRecord> },

    /// Still conflicting after the single automatic retry.
    #[error("Unresolved conflict on {id}: server is at version {}", .server_state.version)]
    UnresolvedConflict {
        id: RecordId,
        server_state: Box<VideoRecord>,
    },

    #[error("A feed subscription for {0} is already active")]
    SubscriptionExists(FeedScope),

    #[error("Invalid resolution transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Transport failures and timeouts.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Timeout { .. })
    }

    /// Errors a caller may reasonably retry by hand after the fact.
    pub fn is_retryable_manually(&self) -> bool {
        self.is_transport() || matches!(self, SyncError::UnresolvedConflict { .. })
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
