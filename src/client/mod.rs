//! Sync client.

mod gateway;
mod sync;

pub use gateway::Gateway;
pub use sync::{SaveOutcome, SyncClient, SyncOutcome, SyncReport};
