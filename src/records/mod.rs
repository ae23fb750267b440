//! Record store.
//!
//! The client's in-memory cache of video records. Holds the last
//! server-confirmed state per id, an optional provisional overlay for local
//! edits in flight, and a version floor for evicted ids.

mod store;

pub use store::{AcceptOutcome, RecordStore};
