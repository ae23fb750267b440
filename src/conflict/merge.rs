//! Merge planning for a conflicted save.

use crate::config::TagMergePolicy;
use crate::types::{Field, VideoFields, VideoRecord};
use std::collections::BTreeSet;

/// Which automatic resolution a conflicted save takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionPath {
    /// Caller and server changed disjoint fields; caller's fields go on top of
    /// the server state.
    FieldMerge,
    /// Changed fields overlap; the caller's fields are re-sent against the
    /// fresh server state and win.
    RefreshAndRetry,
}

/// The single resubmission a conflict resolves to.
#[derive(Clone, Debug, PartialEq)]
pub struct MergePlan {
    pub path: ResolutionPath,
    /// Fields to resubmit against the server state.
    pub fields: VideoFields,
    /// Fields both sides changed (after tag policy).
    pub overlap: BTreeSet<Field>,
}

/// Decide how to resubmit `intended` given the state the caller started from
/// (`baseline`) and what the server now holds (`server`).
pub fn plan(
    baseline: &VideoRecord,
    server: &VideoRecord,
    intended: &VideoFields,
    tag_policy: TagMergePolicy,
) -> MergePlan {
    let server_changed = baseline.diff(server);
    let caller_changed = intended.changed_fields();

    let mut overlap: BTreeSet<Field> = caller_changed
        .intersection(&server_changed)
        .copied()
        .collect();

    let mut fields = intended.clone();
    if tag_policy == TagMergePolicy::ThreeWay && overlap.remove(&Field::Tags) {
        if let Some(ours) = &intended.tags {
            fields.tags = Some(three_way_tags(&baseline.tags, ours, &server.tags));
        }
    }

    let path = if overlap.is_empty() {
        ResolutionPath::FieldMerge
    } else {
        ResolutionPath::RefreshAndRetry
    };

    MergePlan {
        path,
        fields,
        overlap,
    }
}

/// Server's tags, minus what the caller removed, plus what the caller added.
/// Server order is kept; additions follow in the caller's order.
pub fn three_way_tags(base: &[String], ours: &[String], theirs: &[String]) -> Vec<String> {
    let removed: BTreeSet<&String> = base.iter().filter(|t| !ours.contains(t)).collect();

    let mut merged: Vec<String> = theirs
        .iter()
        .filter(|t| !removed.contains(t))
        .cloned()
        .collect();

    for tag in ours {
        if !base.contains(tag) && !merged.contains(tag) {
            merged.push(tag.clone());
        }
    }
    merged
}
