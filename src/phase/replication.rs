//! Snapshot replication model.
//!
//! The authority publishes ordered tag snapshots; receivers diff the
//! previous mirror against the new snapshot to synthesize local start/end
//! events. Wire encoding is left to the transport; [`PhaseSnapshot`] only
//! derives serde so any serde format can carry it.

use serde::{Deserialize, Serialize};

use crate::tag::PhaseTag;

/// Ordered active-tag sequence tagged with the authority's revision.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    /// Incremented once per authoritative stack mutation
    pub revision: u64,
    /// Active tags in start order, duplicates permitted
    pub tags: Vec<PhaseTag>,
}

/// Result of diffing a mirrored sequence against a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotDiff {
    /// Indices into the old sequence that must end, ascending
    pub removed: Vec<usize>,
    /// Tags that must start, in snapshot order
    pub added: Vec<PhaseTag>,
}

impl SnapshotDiff {
    /// Returns `true` when old and new are identical.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Computes the transitions that turn `old` into `new`.
///
/// The authority only ever appends at the tail and removes from anywhere,
/// so the new sequence is some subsequence of the old one followed by fresh
/// entries. The longest prefix of `new` that is a subsequence of `old` is
/// matched greedily and kept; every unmatched old entry ends and the rest of
/// `new` starts. Applying the diff (remove, then append `added`) reproduces
/// `new` exactly, even when the transport coalesced an end and a restart of
/// the same tag into one snapshot.
#[must_use]
pub fn diff_snapshot(old: &[PhaseTag], new: &[PhaseTag]) -> SnapshotDiff {
    let mut kept = vec![false; old.len()];
    let mut cursor = 0;
    let mut matched = 0;

    for tag in new {
        let Some(offset) = old[cursor..].iter().position(|t| t == tag) else {
            break;
        };
        kept[cursor + offset] = true;
        cursor += offset + 1;
        matched += 1;
    }

    SnapshotDiff {
        removed: kept
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| (!keep).then_some(i))
            .collect(),
        added: new[matched..].to_vec(),
    }
}
