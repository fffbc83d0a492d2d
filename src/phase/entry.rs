//! Active phase records and their identifiers.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::tag::PhaseTag;

/// Opaque token identifying one active phase entry.
///
/// Handles are allocated from a per-stack counter starting at 1 and are
/// never reused, so a stale handle can only ever miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhaseHandle(u64);

impl PhaseHandle {
    /// Wraps a raw handle value.
    ///
    /// Mostly useful for diagnostics and tests; handles are normally
    /// obtained from `start_phase`.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PhaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of the requester that started a phase.
///
/// Purely informational: the subsystem never dereferences it, it only
/// compares it when cascading [`end_all_for_owner`].
///
/// [`end_all_for_owner`]: crate::phase::PhaseSubsystem::end_all_for_owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner:{}", self.0)
    }
}

/// One active instance of a phase.
#[derive(Debug, Clone)]
pub struct PhaseEntry {
    /// Canonical tag of the phase
    pub tag: PhaseTag,
    /// Unique handle used to end this entry
    pub handle: PhaseHandle,
    /// Requester that started the phase, if any
    pub owner: Option<OwnerId>,
    /// Parent phase when started as a sub-phase
    pub parent: Option<PhaseTag>,
    /// Monotonic start time
    pub started_at: Instant,
}

impl PhaseEntry {
    /// Returns how long this entry has been active.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns `true` when this entry is a sub-phase of another phase.
    #[must_use]
    pub const fn is_sub_phase(&self) -> bool {
        self.parent.is_some()
    }
}
