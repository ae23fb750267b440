//! Bounded automatic conflict resolution.

use super::merge::{plan, ResolutionPath};
use super::state::{ResolutionMachine, ResolutionState};
use crate::client::Gateway;
use crate::config::TagMergePolicy;
use crate::error::{Result, SyncError};
use crate::records::RecordStore;
use crate::types::{RecordId, VideoFields, VideoRecord};
use tracing::{info, warn};

/// Everything the resolver needs about a conflicted save.
#[derive(Clone, Debug)]
pub struct ConflictContext {
    pub id: RecordId,
    /// Fields the caller meant to change.
    pub intended: VideoFields,
    /// The confirmed state the caller's update was based on.
    pub baseline: VideoRecord,
    /// The server's authoritative state from the conflict response.
    pub server_state: VideoRecord,
}

/// A conflict that was resolved automatically.
#[derive(Clone, Debug)]
pub struct Resolution {
    pub record: VideoRecord,
    pub path: ResolutionPath,
    pub trace: Vec<ResolutionState>,
}

/// Reconciles a conflicted save with exactly one resubmission.
#[derive(Clone, Debug)]
pub struct ConflictResolver {
    tag_policy: TagMergePolicy,
}

impl ConflictResolver {
    pub fn new(tag_policy: TagMergePolicy) -> Self {
        Self { tag_policy }
    }

    pub fn tag_policy(&self) -> TagMergePolicy {
        self.tag_policy
    }

    /// Resolve a conflict. `machine` must be in `Conflicted`.
    ///
    /// The server state is adopted into the store first, so whatever happens
    /// next the store only ever holds states the server accepted. A second
    /// conflict is returned as [`SyncError::UnresolvedConflict`].
    pub async fn resolve(
        &self,
        gateway: &Gateway,
        store: &RecordStore,
        mut machine: ResolutionMachine,
        ctx: ConflictContext,
    ) -> Result<Resolution> {
        machine.transition(ResolutionState::Retrying)?;
        store.accept(ctx.server_state.clone());

        let plan = plan(&ctx.baseline, &ctx.server_state, &ctx.intended, self.tag_policy);
        info!(
            id = %ctx.id,
            path = ?plan.path,
            overlap = ?plan.overlap,
            server_version = ctx.server_state.version,
            "retrying conflicted save"
        );

        match gateway
            .update(&ctx.id, &plan.fields, &ctx.server_state.baseline())
            .await
        {
            Ok(record) => {
                store.settle(record.clone());
                machine.transition(ResolutionState::Resolved)?;
                Ok(Resolution {
                    record,
                    path: plan.path,
                    trace: machine.into_trace(),
                })
            }
            Err(SyncError::Conflict { server_state }) => {
                machine.transition(ResolutionState::Unresolved)?;
                warn!(id = %ctx.id, version = server_state.version, "conflict persists after retry");
                store.accept((*server_state).clone());
                store.discard_pending(&ctx.id);
                Err(SyncError::UnresolvedConflict {
                    id: ctx.id,
                    server_state,
                })
            }
            Err(SyncError::NotFound(id)) => {
                store.remove(&id);
                Err(SyncError::NotFound(id))
            }
            Err(e) => {
                store.discard_pending(&ctx.id);
                Err(e)
            }
        }
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(TagMergePolicy::default())
    }
}
