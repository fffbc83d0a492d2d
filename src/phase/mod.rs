//! Phase state machine.
//!
//! The [`PhaseSubsystem`] owns an ordered stack of active phase entries.
//! Phases are identified by hierarchical [`PhaseTag`](crate::tag::PhaseTag)s;
//! several may be active at once, and the same tag may be active more than
//! once. On the authority, requesters start and end phases and observers are
//! notified synchronously. Clients never mutate the stack directly: they
//! apply [`PhaseSnapshot`]s produced by the authority and receive the same
//! notifications locally.

pub mod entry;
pub mod listener;
pub mod observer;
pub mod options;
pub mod replication;
pub mod stack;
pub mod subsystem;

pub use entry::{OwnerId, PhaseEntry, PhaseHandle};
pub use listener::PhaseListener;
pub use observer::{ObserverRegistry, PhaseCallback, PhaseEvent, PhaseEventKind, SubscriptionId};
pub use options::{DEFAULT_OPTION_KEY, has_option, parse_option};
pub use replication::{PhaseSnapshot, SnapshotDiff, diff_snapshot};
pub use stack::PhaseStack;
pub use subsystem::{NetRole, PhaseSubsystem};
