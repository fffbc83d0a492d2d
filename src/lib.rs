//! `gephase` - Server-authoritative game phase state machine
//!
//! Phases are identified by hierarchical tags (`Phase.Match.Playing`).
//! Several phases may be active at once; the authority starts and ends them
//! through a [`PhaseSubsystem`](phase::PhaseSubsystem), observers are
//! notified synchronously in one total order, and clients mirror the
//! authority by applying replicated snapshots.

pub mod config;
pub mod error;
pub mod observability;
pub mod phase;
pub mod tag;

pub use error::{GePhaseError, PhaseError, Result};
pub use phase::{NetRole, OwnerId, PhaseHandle, PhaseSubsystem};
pub use tag::{MatchMode, PhaseTag, TagRegistry};
