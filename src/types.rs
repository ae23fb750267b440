//! Core types for the sync engine.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Longest accepted title, in characters.
pub const MAX_TITLE_LEN: usize = 200;

/// Longest accepted description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 5000;

/// Maximum number of tags on a record.
pub const MAX_TAGS: usize = 30;

/// Stable, server-assigned identifier for a video record.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An independent writer (client session) as recognized by the server.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        ActorId(id.into())
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorId({})", self.0)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque session token issued by the auth collaborator. Forwarded, never inspected.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub String);

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never log the token itself.
        write!(f, "SessionToken(..)")
    }
}

/// Identity attached to every remote request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub actor: ActorId,
    pub token: SessionToken,
}

impl Session {
    pub fn new(actor: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            actor: ActorId(actor.into()),
            token: SessionToken(token.into()),
        }
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Causal relationship between two vector clocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockOrdering {
    Equal,
    /// Self happened strictly before other.
    Before,
    /// Self happened strictly after other.
    After,
    Concurrent,
}

/// Per-actor counters recording which writers have mutated a record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<ActorId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock with a single entry, as assigned on create.
    pub fn single(actor: ActorId, counter: u64) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(actor, counter);
        Self { entries }
    }

    /// Bump the counter for an actor whose write was accepted.
    pub fn increment(&mut self, actor: &ActorId) -> u64 {
        let counter = self.entries.entry(actor.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Counter for an actor (0 when absent).
    pub fn get(&self, actor: &ActorId) -> u64 {
        self.entries.get(actor).copied().unwrap_or(0)
    }

    /// Pointwise maximum. Never lowers an entry.
    pub fn merge(&mut self, other: &VectorClock) {
        for (actor, &value) in &other.entries {
            let entry = self.entries.entry(actor.clone()).or_insert(0);
            *entry = (*entry).max(value);
        }
    }

    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut less = false;
        let mut greater = false;

        let actors: BTreeSet<&ActorId> = self.entries.keys().chain(other.entries.keys()).collect();
        for actor in actors {
            match self.get(actor).cmp(&other.get(actor)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
        }

        match (less, greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// True when self has seen everything other has (equal or after).
    pub fn descends_from(&self, other: &VectorClock) -> bool {
        matches!(
            self.compare(other),
            ClockOrdering::Equal | ClockOrdering::After
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ActorId, &u64)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lifecycle status of a video record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Uploading,
    Processing,
    Ready,
    Failed,
    Deleted,
}

impl VideoStatus {
    /// Whether an update may move a record from `self` to `next`.
    ///
    /// `Deleted` is only reachable through a delete request.
    pub fn can_transition_to(self, next: VideoStatus) -> bool {
        use VideoStatus::*;

        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Uploading, Processing)
                | (Uploading, Failed)
                | (Processing, Ready)
                | (Processing, Failed)
                | (Failed, Processing)
        )
    }

    /// Whether a soft delete is allowed from this status.
    pub fn can_soft_delete(self) -> bool {
        matches!(self, VideoStatus::Ready | VideoStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VideoStatus::Uploading => "uploading",
            VideoStatus::Processing => "processing",
            VideoStatus::Ready => "ready",
            VideoStatus::Failed => "failed",
            VideoStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable fields of a video record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    Description,
    Category,
    Tags,
    Status,
    MediaRef,
    ViewCount,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Title,
        Field::Description,
        Field::Category,
        Field::Tags,
        Field::Status,
        Field::MediaRef,
        Field::ViewCount,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Description => "description",
            Field::Category => "category",
            Field::Tags => "tags",
            Field::Status => "status",
            Field::MediaRef => "media_ref",
            Field::ViewCount => "view_count",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The client's view of a record's concurrency state, sent with every mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub vector_clock: VectorClock,
    pub version: u64,
}

/// A shared video metadata record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: RecordId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: VideoStatus,
    /// Opaque reference to media bytes held by the storage collaborator.
    #[serde(default)]
    pub media_ref: Option<String>,
    #[serde(default)]
    pub view_count: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
    pub vector_clock: VectorClock,
    pub version: u64,
}

impl VideoRecord {
    pub fn baseline(&self) -> Baseline {
        Baseline {
            vector_clock: self.vector_clock.clone(),
            version: self.version,
        }
    }

    /// Soft-deleted records stay addressable but leave default listings.
    pub fn is_tombstone(&self) -> bool {
        self.status == VideoStatus::Deleted
    }

    pub fn field_value(&self, field: Field) -> serde_json::Value {
        match field {
            Field::Title => serde_json::Value::from(self.title.clone()),
            Field::Description => serde_json::Value::from(self.description.clone()),
            Field::Category => serde_json::Value::from(self.category.clone()),
            Field::Tags => serde_json::Value::from(self.tags.clone()),
            Field::Status => serde_json::Value::from(self.status.as_str()),
            Field::MediaRef => match &self.media_ref {
                Some(media) => serde_json::Value::from(media.clone()),
                None => serde_json::Value::Null,
            },
            Field::ViewCount => serde_json::Value::from(self.view_count),
        }
    }

    /// Fields whose values differ between `self` and `other`.
    pub fn diff(&self, other: &VideoRecord) -> BTreeSet<Field> {
        Field::ALL
            .iter()
            .copied()
            .filter(|&field| match field {
                Field::Title => self.title != other.title,
                Field::Description => self.description != other.description,
                Field::Category => self.category != other.category,
                Field::Tags => self.tags != other.tags,
                Field::Status => self.status != other.status,
                Field::MediaRef => self.media_ref != other.media_ref,
                Field::ViewCount => self.view_count != other.view_count,
            })
            .collect()
    }
}

/// Partial set of field changes, used for create, update and provisional patches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VideoStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
}

impl VideoFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn status(mut self, status: VideoStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn media_ref(mut self, media_ref: impl Into<String>) -> Self {
        self.media_ref = Some(media_ref.into());
        self
    }

    pub fn view_count(mut self, view_count: u64) -> Self {
        self.view_count = Some(view_count);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    /// Fields this change set touches.
    pub fn changed_fields(&self) -> BTreeSet<Field> {
        let mut fields = BTreeSet::new();
        if self.title.is_some() {
            fields.insert(Field::Title);
        }
        if self.description.is_some() {
            fields.insert(Field::Description);
        }
        if self.category.is_some() {
            fields.insert(Field::Category);
        }
        if self.tags.is_some() {
            fields.insert(Field::Tags);
        }
        if self.status.is_some() {
            fields.insert(Field::Status);
        }
        if self.media_ref.is_some() {
            fields.insert(Field::MediaRef);
        }
        if self.view_count.is_some() {
            fields.insert(Field::ViewCount);
        }
        fields
    }

    /// Shallow merge onto a record. Concurrency metadata is left untouched.
    pub fn apply_to(&self, record: &mut VideoRecord) {
        if let Some(title) = &self.title {
            record.title = title.clone();
        }
        if let Some(description) = &self.description {
            record.description = description.clone();
        }
        if let Some(category) = &self.category {
            record.category = category.clone();
        }
        if let Some(tags) = &self.tags {
            record.tags = tags.clone();
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(media_ref) = &self.media_ref {
            record.media_ref = Some(media_ref.clone());
        }
        if let Some(view_count) = self.view_count {
            record.view_count = view_count;
        }
    }

    /// Later values win for every field `other` sets.
    pub fn merge(&mut self, other: &VideoFields) {
        if other.title.is_some() {
            self.title = other.title.clone();
        }
        if other.description.is_some() {
            self.description = other.description.clone();
        }
        if other.category.is_some() {
            self.category = other.category.clone();
        }
        if other.tags.is_some() {
            self.tags = other.tags.clone();
        }
        if other.status.is_some() {
            self.status = other.status;
        }
        if other.media_ref.is_some() {
            self.media_ref = other.media_ref.clone();
        }
        if other.view_count.is_some() {
            self.view_count = other.view_count;
        }
    }

    /// Shape checks shared by client and server.
    pub fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(SyncError::Validation("title must not be empty".into()));
            }
            if title.chars().count() > MAX_TITLE_LEN {
                return Err(SyncError::Validation(format!(
                    "title exceeds {} characters",
                    MAX_TITLE_LEN
                )));
            }
        }
        if let Some(description) = &self.description {
            if description.chars().count() > MAX_DESCRIPTION_LEN {
                return Err(SyncError::Validation(format!(
                    "description exceeds {} characters",
                    MAX_DESCRIPTION_LEN
                )));
            }
        }
        if let Some(tags) = &self.tags {
            if tags.len() > MAX_TAGS {
                return Err(SyncError::Validation(format!(
                    "at most {} tags allowed",
                    MAX_TAGS
                )));
            }
            if tags.iter().any(|tag| tag.trim().is_empty()) {
                return Err(SyncError::Validation("tags must not be empty".into()));
            }
        }
        if self.status == Some(VideoStatus::Deleted) {
            return Err(SyncError::Validation(
                "status=deleted is set through delete, not update".into(),
            ));
        }
        Ok(())
    }

    /// Checks for a create request: a title is required and the record starts uploading.
    pub fn validate_for_create(&self) -> Result<()> {
        self.validate()?;
        if self.title.is_none() {
            return Err(SyncError::Validation("title is required".into()));
        }
        if let Some(status) = self.status {
            if status != VideoStatus::Uploading {
                return Err(SyncError::Validation(format!(
                    "new records start as uploading, got {}",
                    status
                )));
            }
        }
        Ok(())
    }

    /// Checks for an update request.
    pub fn validate_for_update(&self) -> Result<()> {
        if self.is_empty() {
            return Err(SyncError::Validation("update carries no fields".into()));
        }
        self.validate()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn record(id: &str, version: u64) -> VideoRecord {
        let mut vector_clock = VectorClock::new();
        for _ in 0..version {
            vector_clock.increment(&ActorId::new("server"));
        }
        VideoRecord {
            id: RecordId::new(id),
            title: format!("Video {}", id),
            description: String::new(),
            category: "sports".to_string(),
            tags: vec![],
            status: VideoStatus::Ready,
            media_ref: None,
            view_count: 0,
            created_at: Timestamp(1),
            updated_at: Timestamp(1),
            deleted_at: None,
            vector_clock,
            version,
        }
    }
}
