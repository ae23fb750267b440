//! Conflict resolution.
//!
//! A save whose baseline the server has moved past comes back as a conflict
//! carrying the server's state. The resolver adopts that state, plans one
//! resubmission and sends it:
//! - disjoint changed fields: field-level merge
//! - overlapping changed fields: refresh-and-retry, caller's fields win
//!
//! A second conflict is surfaced as unresolved.

mod merge;
mod resolver;
mod state;

pub use merge::{plan, three_way_tags, MergePlan, ResolutionPath};
pub use resolver::{ConflictContext, ConflictResolver, Resolution};
pub use state::{ResolutionMachine, ResolutionState};
