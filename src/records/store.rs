//! In-memory record store.

use crate::types::{Baseline, RecordId, VideoFields, VideoRecord};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Result of writing a record into the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// No copy was held before.
    Inserted,
    /// An older copy was replaced.
    Replaced,
    /// The same state was already held.
    Unchanged,
    /// Incoming version is not newer than the held (or evicted) one; dropped.
    Stale,
}

impl AcceptOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, AcceptOutcome::Inserted | AcceptOutcome::Replaced)
    }
}

/// A held record: the last server-confirmed state plus any provisional overlay.
struct Entry {
    record: VideoRecord,
    pending: Option<VideoFields>,
}

impl Entry {
    fn view(&self) -> VideoRecord {
        let mut record = self.record.clone();
        if let Some(pending) = &self.pending {
            pending.apply_to(&mut record);
        }
        record
    }
}

/// Client-side cache of video records.
///
/// Shared by reference between the sync client, feed subscriber and query
/// coordinator. Writes are serialized by the lock; network-derived writes go
/// through [`RecordStore::accept`], which drops anything not newer than what
/// is held, so arrival order does not matter.
pub struct RecordStore {
    entries: RwLock<HashMap<RecordId, Entry>>,
    /// Last version seen for ids that were evicted (hard delete / not found).
    ///
    /// One `u64` per evicted id, kept until [`RecordStore::forget_eviction`]
    /// or [`RecordStore::clear`]. Ids are server-assigned uuids and never
    /// reused, so growth follows the number of deletes this client observed.
    evicted: RwLock<HashMap<RecordId, u64>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            evicted: RwLock::new(HashMap::new()),
        }
    }

    /// Current view of a record, provisional overlay included.
    pub fn get(&self, id: &RecordId) -> Option<VideoRecord> {
        self.entries.read().get(id).map(Entry::view)
    }

    /// Last server-confirmed state, without any provisional overlay.
    pub fn confirmed(&self, id: &RecordId) -> Option<VideoRecord> {
        self.entries.read().get(id).map(|e| e.record.clone())
    }

    /// Concurrency baseline of the confirmed state.
    pub fn baseline(&self, id: &RecordId) -> Option<Baseline> {
        self.entries.read().get(id).map(|e| e.record.baseline())
    }

    /// Held version for an id.
    pub fn version(&self, id: &RecordId) -> Option<u64> {
        self.entries.read().get(id).map(|e| e.record.version)
    }

    pub fn has_pending(&self, id: &RecordId) -> bool {
        self.entries
            .read()
            .get(id)
            .map(|e| e.pending.is_some())
            .unwrap_or(false)
    }

    /// Wholesale replace. Reapplying the same record is a no-op.
    ///
    /// Skips the version check; use [`RecordStore::accept`] for anything that
    /// came off the network.
    pub fn upsert(&self, record: VideoRecord) -> AcceptOutcome {
        self.evicted.write().remove(&record.id);

        let mut entries = self.entries.write();
        match entries.get_mut(&record.id) {
            Some(entry) if entry.record == record && entry.pending.is_none() => {
                AcceptOutcome::Unchanged
            }
            Some(entry) => {
                entry.record = record;
                entry.pending = None;
                AcceptOutcome::Replaced
            }
            None => {
                entries.insert(
                    record.id.clone(),
                    Entry {
                        record,
                        pending: None,
                    },
                );
                AcceptOutcome::Inserted
            }
        }
    }

    /// Monotonic write: applies `record` only if its version is strictly
    /// greater than the held (or last evicted) version.
    ///
    /// A provisional overlay survives so an in-flight local edit stays visible.
    pub fn accept(&self, record: VideoRecord) -> AcceptOutcome {
        if let Some(&gone) = self.evicted.read().get(&record.id) {
            if record.version <= gone {
                debug!(id = %record.id, version = record.version, evicted_at = gone, "dropping state for evicted record");
                return AcceptOutcome::Stale;
            }
        }

        let mut entries = self.entries.write();
        let outcome = match entries.get_mut(&record.id) {
            Some(entry) if record.version < entry.record.version => AcceptOutcome::Stale,
            Some(entry) if record.version == entry.record.version => {
                if entry.record == record {
                    AcceptOutcome::Unchanged
                } else {
                    AcceptOutcome::Stale
                }
            }
            Some(entry) => {
                entry.record = record.clone();
                AcceptOutcome::Replaced
            }
            None => {
                entries.insert(
                    record.id.clone(),
                    Entry {
                        record: record.clone(),
                        pending: None,
                    },
                );
                AcceptOutcome::Inserted
            }
        };
        drop(entries);

        if outcome.is_applied() {
            self.evicted.write().remove(&record.id);
        }
        debug!(id = %record.id, version = record.version, ?outcome, "accept");
        outcome
    }

    /// Accept a server response for one of our own writes and drop the
    /// provisional overlay it confirms.
    pub fn settle(&self, record: VideoRecord) -> AcceptOutcome {
        let id = record.id.clone();
        let outcome = self.accept(record);
        self.discard_pending(&id);
        outcome
    }

    /// Shallow-merge provisional fields over the held record.
    ///
    /// Returns false if the id is not held.
    pub fn patch(&self, id: &RecordId, fields: &VideoFields) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(id) {
            Some(entry) => {
                match &mut entry.pending {
                    Some(pending) => pending.merge(fields),
                    None => entry.pending = Some(fields.clone()),
                }
                true
            }
            None => false,
        }
    }

    /// Drop any provisional overlay, reverting the view to the confirmed state.
    pub fn discard_pending(&self, id: &RecordId) -> Option<VideoFields> {
        self.entries
            .write()
            .get_mut(id)
            .and_then(|e| e.pending.take())
    }

    /// Evict a record. Later states at or below its last version are dropped.
    pub fn remove(&self, id: &RecordId) -> Option<VideoRecord> {
        let removed = self.entries.write().remove(id).map(|e| e.record);
        if let Some(record) = &removed {
            let mut evicted = self.evicted.write();
            let entry = evicted.entry(id.clone()).or_insert(0);
            *entry = (*entry).max(record.version);
        }
        removed
    }

    /// Evict an id and remember `version` as the floor for later writes.
    pub fn evict_at(&self, id: &RecordId, version: u64) -> Option<VideoRecord> {
        let removed = self.remove(id);
        let mut evicted = self.evicted.write();
        let entry = evicted.entry(id.clone()).or_insert(0);
        *entry = (*entry).max(version);
        removed
    }

    /// Version floor held for an evicted id.
    pub fn eviction_floor(&self, id: &RecordId) -> Option<u64> {
        self.evicted.read().get(id).copied()
    }

    /// Release the floor for an evicted id, e.g. once no request that could
    /// still return its old state is in flight.
    pub fn forget_eviction(&self, id: &RecordId) -> Option<u64> {
        self.evicted.write().remove(id)
    }

    /// Number of evicted ids with a floor.
    pub fn evicted_len(&self) -> usize {
        self.evicted.read().len()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Held ids, sorted.
    pub fn ids(&self) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Views of every held record, sorted by id.
    pub fn snapshot(&self) -> Vec<VideoRecord> {
        let mut records: Vec<VideoRecord> = self.entries.read().values().map(Entry::view).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        self.evicted.write().clear();
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}
