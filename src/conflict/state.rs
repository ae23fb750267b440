//! Save/resolution state machine.
//!
//! ```text
//! Idle -> Syncing -> Resolved
//!            |
//!            v
//!        Conflicted -> Retrying -> Resolved
//!                          |
//!                          v
//!                      Unresolved
//! ```
//!
//! `Retrying` can only be entered from `Conflicted`, and `Retrying` never
//! leads back to `Conflicted`, so a save makes at most one automatic retry.

use crate::error::{Result, SyncError};
use std::fmt;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionState {
    Idle,
    Syncing,
    Conflicted,
    Retrying,
    Resolved,
    Unresolved,
}

impl ResolutionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ResolutionState::Resolved | ResolutionState::Unresolved)
    }

    fn allows(self, next: ResolutionState) -> bool {
        use ResolutionState::*;
        matches!(
            (self, next),
            (Idle, Syncing)
                | (Syncing, Resolved)
                | (Syncing, Conflicted)
                | (Conflicted, Retrying)
                | (Retrying, Resolved)
                | (Retrying, Unresolved)
        )
    }
}

impl fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks one save through the state machine and records the path taken.
#[derive(Clone, Debug)]
pub struct ResolutionMachine {
    state: ResolutionState,
    trace: Vec<ResolutionState>,
}

impl ResolutionMachine {
    pub fn new() -> Self {
        Self {
            state: ResolutionState::Idle,
            trace: vec![ResolutionState::Idle],
        }
    }

    pub fn state(&self) -> ResolutionState {
        self.state
    }

    /// Every state visited, in order.
    pub fn trace(&self) -> &[ResolutionState] {
        &self.trace
    }

    /// Number of automatic retries made so far.
    pub fn retries(&self) -> usize {
        self.trace
            .iter()
            .filter(|&&s| s == ResolutionState::Retrying)
            .count()
    }

    pub fn transition(&mut self, next: ResolutionState) -> Result<()> {
        if !self.state.allows(next) {
            return Err(SyncError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(from = %self.state, to = %next, "resolution transition");
        self.state = next;
        self.trace.push(next);
        Ok(())
    }

    pub fn into_trace(self) -> Vec<ResolutionState> {
        self.trace
    }
}

impl Default for ResolutionMachine {
    fn default() -> Self {
        Self::new()
    }
}
