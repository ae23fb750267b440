//! Change-feed wire types.

use crate::error::Result;
use crate::types::{RecordId, VideoRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a feed subscription covers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FeedScope {
    /// Every record in the collection.
    All,
    /// A single record.
    Record(RecordId),
}

impl FeedScope {
    pub fn covers(&self, id: &RecordId) -> bool {
        match self {
            FeedScope::All => true,
            FeedScope::Record(scoped) => scoped == id,
        }
    }
}

impl fmt::Display for FeedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedScope::All => write!(f, "*"),
            FeedScope::Record(id) => write!(f, "{}", id),
        }
    }
}

/// A mutation pushed by the remote store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeEvent {
    Insert {
        record: VideoRecord,
    },
    Update {
        record: VideoRecord,
    },
    /// `record` is the tombstone for a soft delete, or the last state for a hard delete.
    Delete {
        record: VideoRecord,
        #[serde(default)]
        hard: bool,
    },
}

impl ChangeEvent {
    /// Decode a raw feed message.
    pub fn decode(message: &serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(message.clone())?)
    }

    pub fn encode(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn record(&self) -> &VideoRecord {
        match self {
            ChangeEvent::Insert { record }
            | ChangeEvent::Update { record }
            | ChangeEvent::Delete { record, .. } => record,
        }
    }

    pub fn id(&self) -> &RecordId {
        &self.record().id
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Insert { .. } => "INSERT",
            ChangeEvent::Update { .. } => "UPDATE",
            ChangeEvent::Delete { .. } => "DELETE",
        }
    }
}

/// Unique identifier for a feed subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Receiving end of a feed subscription. Messages are raw JSON.
pub struct FeedChannel {
    pub id: SubscriptionId,
    pub receiver: crossbeam_channel::Receiver<serde_json::Value>,
}

impl FeedChannel {
    /// Try to receive a message (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<serde_json::Value, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<serde_json::Value, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::record;

    #[test]
    fn test_wire_format_is_tagged() {
        let event = ChangeEvent::Delete {
            record: record("r1", 2),
            hard: true,
        };
        let json = event.encode().unwrap();
        assert_eq!(json["type"], "DELETE");
        assert_eq!(json["hard"], true);
        assert_eq!(json["record"]["id"], "r1");
        assert_eq!(ChangeEvent::decode(&json).unwrap(), event);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let json = serde_json::json!({"type": "TRUNCATE", "record": null});
        assert!(ChangeEvent::decode(&json).is_err());
    }

    #[test]
    fn test_scope_covers() {
        let id = RecordId::new("r1");
        assert!(FeedScope::All.covers(&id));
        assert!(FeedScope::Record(id.clone()).covers(&id));
        assert!(!FeedScope::Record(RecordId::new("r2")).covers(&id));
    }
}
