//! Phase subsystem: the coordinator that owns the phase stack.
//!
//! One subsystem exists per world/session and is passed explicitly to the
//! code that needs it. The authority mutates the stack through
//! `start_phase`/`end_phase` and friends; clients mirror it by applying
//! snapshots.
//!
//! # Ordering
//!
//! The stack and the observer registry sit behind a single re-entrant lock.
//! A mutating call changes the stack immediately and queues one event per
//! entry it touched. The outermost call on the current thread then drains
//! the queue in FIFO order, invoking callbacks synchronously. A callback may
//! re-enter the subsystem (start or end phases, unsubscribe); its mutation
//! applies at once and its events join the back of the queue, so every
//! observer sees the same total order, matching mutation order.
//!
//! Callbacks must not block on another thread that calls into the same
//! subsystem: the lock is held for the whole drain.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PhaseConfig;
use crate::error::{GePhaseError, PhaseError};
use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;
use crate::tag::{MatchMode, PhaseTag, TagRegistry};

use super::entry::{OwnerId, PhaseEntry, PhaseHandle};
use super::observer::{self, ObserverRegistry, PhaseEvent, PhaseEventKind, Subscription, SubscriptionId};
use super::options::DEFAULT_OPTION_KEY;
use super::replication::{self, PhaseSnapshot};
use super::stack::PhaseStack;

/// Which side of the replication link a subsystem lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetRole {
    /// Owns the authoritative stack; may start and end phases
    #[default]
    Authority,
    /// Mirrors the authority through snapshots; read-only otherwise
    Client,
}

impl fmt::Display for NetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Authority => "authority",
            Self::Client => "client",
        })
    }
}

/// A queued transition, its recipients, and the stack size right after it.
#[derive(Debug)]
struct PendingEvent {
    event: PhaseEvent,
    targets: Vec<Arc<Subscription>>,
    active: usize,
}

/// Mutable state guarded by the subsystem lock.
#[derive(Debug, Default)]
struct State {
    stack: PhaseStack,
    observers: ObserverRegistry,
    pending: VecDeque<PendingEvent>,
    dispatching: bool,
    /// Authority: bumped per successful mutating call.
    /// Client: revision of the last applied snapshot.
    revision: u64,
    dirty: bool,
    applied_any: bool,
}

impl State {
    fn start(&mut self, tag: PhaseTag, owner: Option<OwnerId>, parent: Option<PhaseTag>) -> PhaseHandle {
        let handle = self.stack.push(tag.clone(), owner, parent.clone());
        self.enqueue(PhaseEvent::started(tag, handle, parent));
        handle
    }

    fn end(&mut self, handle: PhaseHandle) -> Result<PhaseEntry, PhaseError> {
        let entry = self.stack.pop(handle)?;
        self.enqueue(PhaseEvent::ended(entry.tag.clone(), handle, entry.parent.clone()));
        Ok(entry)
    }

    fn end_all(&mut self) -> usize {
        self.stack
            .handles()
            .into_iter()
            .filter(|h| self.end(*h).is_ok())
            .count()
    }

    /// Observers and the active count are captured now: late subscribers
    /// miss earlier events and the gauge follows mutation order.
    fn enqueue(&mut self, event: PhaseEvent) {
        let targets = self.observers.interested_in(&event);
        let active = self.stack.len();
        self.pending.push_back(PendingEvent { event, targets, active });
    }

    fn mark_dirty(&mut self) {
        self.revision += 1;
        self.dirty = true;
    }
}

/// Clears the dispatching flag even if a callback panics.
struct DispatchGuard<'a>(&'a RefCell<State>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.try_borrow_mut() {
            state.dispatching = false;
        }
    }
}

/// Coordinator owning the phase stack and observer registry.
pub struct PhaseSubsystem {
    role: NetRole,
    tags: TagRegistry,
    option_key: String,
    state: ReentrantMutex<RefCell<State>>,
    emitter: Option<Arc<EventEmitter>>,
}

impl PhaseSubsystem {
    /// Creates a subsystem with a permissive tag registry.
    #[must_use]
    pub fn new(role: NetRole) -> Self {
        Self::with_tags(role, TagRegistry::new())
    }

    /// Creates a subsystem that canonicalizes through `tags`.
    #[must_use]
    pub fn with_tags(role: NetRole, tags: TagRegistry) -> Self {
        Self {
            role,
            tags,
            option_key: DEFAULT_OPTION_KEY.to_owned(),
            state: ReentrantMutex::new(RefCell::new(State::default())),
            emitter: None,
        }
    }

    /// Builds a subsystem from loaded configuration.
    ///
    /// Opens the event journal when `events_file` is set and, on the
    /// authority, starts `initial_phase` via [`set_phase`](Self::set_phase).
    ///
    /// # Errors
    ///
    /// Returns an error if a configured tag is malformed or the journal file
    /// cannot be created.
    pub fn from_config(config: &PhaseConfig) -> Result<Self, GePhaseError> {
        let tags = if config.strict_tags {
            TagRegistry::strict(&config.known_phases)?
        } else {
            let registry = TagRegistry::new();
            for raw in &config.known_phases {
                registry.register(raw)?;
            }
            registry
        };

        let mut subsystem = Self::with_tags(config.role, tags).with_option_key(config.option_key.trim());
        if let Some(path) = &config.events_file {
            subsystem = subsystem.with_event_emitter(Arc::new(EventEmitter::from_file(path)?));
        }

        if let (NetRole::Authority, Some(initial)) = (config.role, &config.initial_phase) {
            subsystem.set_phase(initial, None)?;
        }
        Ok(subsystem)
    }

    /// Attaches a JSONL journal that records every transition.
    #[must_use]
    pub fn with_event_emitter(mut self, emitter: Arc<EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Overrides the key used by the game-mode option helpers.
    #[must_use]
    pub fn with_option_key(mut self, key: &str) -> Self {
        key.clone_into(&mut self.option_key);
        self
    }

    /// Network role of this subsystem.
    #[must_use]
    pub const fn role(&self) -> NetRole {
        self.role
    }

    /// Key used by the game-mode option helpers.
    #[must_use]
    pub fn option_key(&self) -> &str {
        &self.option_key
    }

    /// The tag registry used for canonicalization.
    #[must_use]
    pub const fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    /// Canonicalizes `raw` through this subsystem's registry.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::InvalidTagFormat`] or, for strict registries,
    /// [`PhaseError::UnknownTag`].
    pub fn canonicalize(&self, raw: &str) -> Result<PhaseTag, PhaseError> {
        self.tags.canonicalize(raw).map_err(|err| {
            debug!(raw, error = %err, "rejected phase tag");
            metrics::record_error(err.category());
            err
        })
    }

    // ------------------------------------------------------------------
    // Authority operations
    // ------------------------------------------------------------------

    /// Starts a phase and returns the handle needed to end it.
    ///
    /// The stack is untouched if the tag does not canonicalize.
    ///
    /// # Errors
    ///
    /// Returns a tag error, or [`PhaseError::WrongRole`] on a client.
    pub fn start_phase(&self, raw: &str, owner: Option<OwnerId>) -> Result<PhaseHandle, PhaseError> {
        self.require_authority("start_phase")?;
        let tag = self.canonicalize(raw)?;
        Ok(self.transact(|state| {
            let handle = state.start(tag, owner, None);
            state.mark_dirty();
            handle
        }))
    }

    /// Starts a phase nested under an active `parent` phase.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::ParentNotActive`] if no entry carries exactly
    /// the parent tag, a tag error, or [`PhaseError::WrongRole`].
    pub fn start_sub_phase(
        &self,
        raw: &str,
        parent: &str,
        owner: Option<OwnerId>,
    ) -> Result<PhaseHandle, PhaseError> {
        self.require_authority("start_sub_phase")?;
        let tag = self.canonicalize(raw)?;
        let parent = self.canonicalize(parent)?;
        self.transact(|state| {
            if !state.stack.is_active(&parent, MatchMode::Exact) {
                return Err(PhaseError::ParentNotActive(parent.to_string()));
            }
            let handle = state.start(tag, owner, Some(parent));
            state.mark_dirty();
            Ok(handle)
        })
        .inspect_err(|err| self.report(err))
    }

    /// Ends every active phase in stack order, then starts `raw`.
    ///
    /// # Errors
    ///
    /// Returns a tag error (nothing is ended in that case), or
    /// [`PhaseError::WrongRole`].
    pub fn set_phase(&self, raw: &str, owner: Option<OwnerId>) -> Result<PhaseHandle, PhaseError> {
        self.require_authority("set_phase")?;
        let tag = self.canonicalize(raw)?;
        Ok(self.transact(|state| {
            let ended = state.end_all();
            if ended > 0 {
                debug!(ended, "set_phase replaced active phases");
            }
            let handle = state.start(tag, owner, None);
            state.mark_dirty();
            handle
        }))
    }

    /// Ends the entry carrying `handle` and returns its tag.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::UnknownHandle`] if it already ended; other
    /// entries are unaffected. Returns [`PhaseError::WrongRole`] on a client.
    pub fn end_phase(&self, handle: PhaseHandle) -> Result<PhaseTag, PhaseError> {
        self.require_authority("end_phase")?;
        self.transact(|state| {
            let entry = state.end(handle)?;
            state.mark_dirty();
            Ok(entry.tag)
        })
        .inspect_err(|err| self.report(err))
    }

    /// Ends the first sub-phase, in start order, whose tag is exactly `raw`.
    ///
    /// Root phases are never ended by tag; use their handle.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::PhaseNotActive`] when no sub-phase matches, a
    /// tag error, or [`PhaseError::WrongRole`].
    pub fn end_phase_by_tag(&self, raw: &str) -> Result<PhaseHandle, PhaseError> {
        self.require_authority("end_phase_by_tag")?;
        let tag = self.canonicalize(raw)?;
        self.transact(|state| {
            let handle = state
                .stack
                .first_sub_phase_with_tag(&tag)
                .map(|e| e.handle)
                .ok_or_else(|| PhaseError::PhaseNotActive(tag.to_string()))?;
            state.end(handle)?;
            state.mark_dirty();
            Ok(handle)
        })
        .inspect_err(|err| self.report(err))
    }

    /// Ends every entry started by `owner`, in stack order.
    ///
    /// The owner's handles are collected before anything is ended, so
    /// callbacks that subscribe or unsubscribe cannot cause entries to be
    /// skipped. Returns the number of entries ended.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::WrongRole`] on a client.
    pub fn end_all_for_owner(&self, owner: OwnerId) -> Result<usize, PhaseError> {
        self.require_authority("end_all_for_owner")?;
        let ended = self.transact(|state| {
            let targets = state.stack.handles_for_owner(owner);
            let ended = targets.iter().filter(|h| state.end(**h).is_ok()).count();
            if ended > 0 {
                state.mark_dirty();
            }
            ended
        });
        debug!(%owner, ended, "ended phases for owner");
        Ok(ended)
    }

    // ------------------------------------------------------------------
    // Replication
    // ------------------------------------------------------------------

    /// Active tags in start order, as replicated to clients.
    #[must_use]
    pub fn replication_snapshot(&self) -> Vec<PhaseTag> {
        self.read(|state| state.stack.snapshot())
    }

    /// Active tags together with the current revision.
    #[must_use]
    pub fn replication_state(&self) -> PhaseSnapshot {
        self.read(|state| PhaseSnapshot {
            revision: state.revision,
            tags: state.stack.snapshot(),
        })
    }

    /// Returns a snapshot if the stack changed since the last call.
    ///
    /// Lets the transport coalesce any number of mutations into one send.
    pub fn take_dirty(&self) -> Option<PhaseSnapshot> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if !state.dirty {
            return None;
        }
        state.dirty = false;
        Some(PhaseSnapshot {
            revision: state.revision,
            tags: state.stack.snapshot(),
        })
    }

    /// Replaces the mirrored view with `tags`, notifying local observers.
    ///
    /// Removed entries end first (in their old order), then new tags start
    /// (in snapshot order). Afterwards the mirror equals `tags` exactly.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::WrongRole`] on the authority, or a tag error if
    /// a strict registry does not know one of `tags` (nothing is applied).
    pub fn apply_snapshot(&self, tags: &[PhaseTag]) -> Result<(), PhaseError> {
        self.require_client("apply_snapshot")?;
        self.apply_tags(tags, None)
    }

    /// Applies `snapshot` unless it is not newer than the last one applied.
    ///
    /// The revision is recorded before local observers run, so a callback
    /// that applies a newer snapshot is not overwritten afterwards. Returns
    /// `true` if the snapshot was applied.
    ///
    /// # Errors
    ///
    /// Same as [`apply_snapshot`](Self::apply_snapshot).
    pub fn apply_replicated(&self, snapshot: &PhaseSnapshot) -> Result<bool, PhaseError> {
        self.require_client("apply_replicated")?;
        // held across the check and the apply
        let guard = self.state.lock();
        let stale = {
            let state = guard.borrow();
            state.applied_any && snapshot.revision <= state.revision
        };
        if stale {
            debug!(revision = snapshot.revision, "dropping stale phase snapshot");
            return Ok(false);
        }
        self.apply_tags(&snapshot.tags, Some(snapshot.revision))?;
        drop(guard);
        Ok(true)
    }

    fn apply_tags(&self, tags: &[PhaseTag], revision: Option<u64>) -> Result<(), PhaseError> {
        let tags = tags
            .iter()
            .map(|t| self.canonicalize(t.as_str()))
            .collect::<Result<Vec<_>, _>>()?;

        let (ended, started) = self.transact(|state| {
            let diff = replication::diff_snapshot(&state.stack.snapshot(), &tags);
            let handles = state.stack.handles();
            for index in &diff.removed {
                let ended = state.end(handles[*index]);
                debug_assert!(ended.is_ok(), "diff index outside the current stack");
            }
            let started = diff.added.len();
            for tag in diff.added {
                state.start(tag, None, None);
            }
            state.applied_any = true;
            if let Some(revision) = revision {
                state.revision = revision;
            }
            (diff.removed.len(), started)
        });

        metrics::record_snapshot_applied();
        if let Some(emitter) = &self.emitter {
            emitter.emit(Event::snapshot_applied(&tags));
        }
        debug!(ended, started, ?revision, active = tags.len(), "applied phase snapshot");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Registers `callback` for transitions matching `pattern` under `mode`.
    ///
    /// Callbacks run in registration order on the thread that caused the
    /// transition. A subscription added while events are being delivered
    /// only sees transitions that happen after it was added.
    ///
    /// # Errors
    ///
    /// Returns a tag error if `pattern` does not canonicalize.
    pub fn subscribe<F>(&self, pattern: &str, mode: MatchMode, callback: F) -> Result<SubscriptionId, PhaseError>
    where
        F: Fn(&PhaseEvent) + Send + Sync + 'static,
    {
        let pattern = self.canonicalize(pattern)?;
        let guard = self.state.lock();
        let id = guard
            .borrow_mut()
            .observers
            .subscribe(pattern.clone(), mode, Arc::new(callback));
        debug!(%id, %pattern, ?mode, "subscribed to phase events");
        Ok(id)
    }

    /// Removes a subscription. Safe to call from inside any callback,
    /// including the subscription's own; it receives nothing further.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::UnknownSubscription`] if already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), PhaseError> {
        let guard = self.state.lock();
        let result = guard.borrow_mut().observers.unsubscribe(id);
        drop(guard);
        result.inspect_err(|err| self.report(err))
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.read(|state| state.observers.len())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Returns `true` if an active entry matches `tag` under `mode`.
    #[must_use]
    pub fn is_active(&self, tag: &PhaseTag, mode: MatchMode) -> bool {
        self.read(|state| state.stack.is_active(tag, mode))
    }

    /// Tag of the most recently started active entry.
    #[must_use]
    pub fn last_started(&self) -> Option<PhaseTag> {
        self.read(|state| state.stack.last().map(|e| e.tag.clone()))
    }

    /// Copy of the entry carrying `handle`, if active.
    #[must_use]
    pub fn entry(&self, handle: PhaseHandle) -> Option<PhaseEntry> {
        self.read(|state| state.stack.get(handle).cloned())
    }

    /// Copies of all active entries in start order.
    #[must_use]
    pub fn entries(&self) -> Vec<PhaseEntry> {
        self.read(|state| state.stack.iter().cloned().collect())
    }

    /// Number of active entries.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.read(|state| state.stack.len())
    }

    /// Drops all subscriptions and active entries without notifying anyone.
    ///
    /// Intended for world teardown.
    pub fn deinitialize(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let dropped = state.stack.drain_all().len();
        state.observers.clear();
        state.pending.clear();
        match self.role {
            NetRole::Authority => state.mark_dirty(),
            // accept whatever the authority sends next
            NetRole::Client => state.applied_any = false,
        }
        drop(state);
        drop(guard);
        metrics::set_active_phases(0);
        info!(role = %self.role, dropped, "phase subsystem deinitialized");
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    pub(super) fn require_authority(&self, operation: &'static str) -> Result<(), PhaseError> {
        self.require_role(NetRole::Authority, operation)
    }

    fn require_client(&self, operation: &'static str) -> Result<(), PhaseError> {
        self.require_role(NetRole::Client, operation)
    }

    fn require_role(&self, expected: NetRole, operation: &'static str) -> Result<(), PhaseError> {
        if self.role == expected {
            return Ok(());
        }
        let err = PhaseError::WrongRole {
            operation,
            role: self.role,
        };
        warn!(operation, role = %self.role, "phase operation rejected for role");
        metrics::record_error(err.category());
        Err(err)
    }

    fn report(&self, err: &PhaseError) {
        debug!(role = %self.role, error = %err, "phase request failed");
        metrics::record_error(err.category());
    }

    fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        let guard = self.state.lock();
        let state = guard.borrow();
        f(&state)
    }

    /// Runs a mutation under the lock, then drains queued events.
    fn transact<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let guard = self.state.lock();
        let result = f(&mut *guard.borrow_mut());
        self.drain(&guard);
        result
    }

    fn drain(&self, cell: &RefCell<State>) {
        {
            let mut state = cell.borrow_mut();
            if state.dispatching {
                return;
            }
            state.dispatching = true;
        }
        let _reset = DispatchGuard(cell);

        loop {
            let next = cell.borrow_mut().pending.pop_front();
            let Some(pending) = next else {
                break;
            };
            self.record(&pending.event, pending.active);
            observer::deliver(&pending.targets, &pending.event);
        }
    }

    fn record(&self, event: &PhaseEvent, active: usize) {
        let parent = event.parent.as_ref().map(PhaseTag::as_str);
        match event.kind {
            PhaseEventKind::Started => {
                info!(role = %self.role, tag = %event.tag, handle = %event.handle, parent, "phase started");
                metrics::record_phase_started(event.tag.as_str());
            }
            PhaseEventKind::Ended => {
                info!(role = %self.role, tag = %event.tag, handle = %event.handle, parent, "phase ended");
                metrics::record_phase_ended(event.tag.as_str());
            }
        }
        metrics::set_active_phases(active);
        if let Some(emitter) = &self.emitter {
            emitter.emit(Event::from_phase_event(event, self.role, active));
        }
    }
}

impl fmt::Debug for PhaseSubsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseSubsystem")
            .field("role", &self.role)
            .field("active", &self.active_count())
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn tag(s: &str) -> PhaseTag {
        PhaseTag::parse(s).unwrap()
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn record_into(log: &Log, name: &'static str) -> impl Fn(&PhaseEvent) + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |event: &PhaseEvent| log.lock().unwrap().push(format!("{name}:{event}"))
    }

    #[test]
    fn test_start_and_end_notify_in_order() {
        let subsystem = PhaseSubsystem::new(NetRole::Authority);
        let log: Log = Arc::default();
        subsystem
            .subscribe("Phase", MatchMode::SelfAndDescendants, record_into(&log, "a"))
            .unwrap();
        subsystem
            .subscribe("Phase.Warmup", MatchMode::Exact, record_into(&log, "b"))
            .unwrap();

        let h = subsystem.start_phase("Phase.Warmup", None).unwrap();
        subsystem.end_phase(h).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "a:Phase.Warmup started (#1)",
                "b:Phase.Warmup started (#1)",
                "a:Phase.Warmup ended (#1)",
                "b:Phase.Warmup ended (#1)",
            ]
        );
    }

    #[test]
    fn test_invalid_tag_does_not_mutate() {
        let subsystem = PhaseSubsystem::new(NetRole::Authority);
        subsystem.start_phase("Phase.Warmup", None).unwrap();
        let before = subsystem.replication_state();

        let err = subsystem.start_phase("Phase..Broken", None).unwrap_err();
        assert!(matches!(err, PhaseError::InvalidTagFormat { .. }));
        assert_eq!(subsystem.replication_state(), before);
    }

    #[test]
    fn test_client_cannot_mutate_and_authority_cannot_apply() {
        let client = PhaseSubsystem::new(NetRole::Client);
        assert_eq!(
            client.start_phase("Phase.Warmup", None).unwrap_err(),
            PhaseError::WrongRole {
                operation: "start_phase",
                role: NetRole::Client
            }
        );
        assert!(client.end_all_for_owner(OwnerId(1)).is_err());

        let authority = PhaseSubsystem::new(NetRole::Authority);
        assert!(matches!(
            authority.apply_snapshot(&[]).unwrap_err(),
            PhaseError::WrongRole { .. }
        ));
    }

    #[test]
    fn test_sub_phase_requires_active_parent() {
        let subsystem = PhaseSubsystem::new(NetRole::Authority);
        assert_eq!(
            subsystem
                .start_sub_phase("Phase.Match.Round", "Phase.Match", None)
                .unwrap_err(),
            PhaseError::ParentNotActive("Phase.Match".to_string())
        );
        assert_eq!(subsystem.active_count(), 0);

        subsystem.start_phase("Phase.Match", None).unwrap();
        let round = subsystem
            .start_sub_phase("Phase.Match.Round", "Phase.Match", None)
            .unwrap();
        assert_eq!(subsystem.entry(round).unwrap().parent, Some(tag("Phase.Match")));
    }

    #[test]
    fn test_set_phase_replaces_everything() {
        let subsystem = PhaseSubsystem::new(NetRole::Authority);
        let log: Log = Arc::default();
        subsystem
            .subscribe("Phase", MatchMode::SelfAndDescendants, record_into(&log, "o"))
            .unwrap();

        subsystem.start_phase("Phase.Warmup", None).unwrap();
        subsystem.start_phase("Phase.Lobby", None).unwrap();
        subsystem.set_phase("Phase.Match", None).unwrap();

        assert_eq!(subsystem.replication_snapshot(), vec![tag("Phase.Match")]);
        assert_eq!(
            log.lock().unwrap()[2..].to_vec(),
            vec![
                "o:Phase.Warmup ended (#1)",
                "o:Phase.Lobby ended (#2)",
                "o:Phase.Match started (#3)",
            ]
        );
    }

    #[test]
    fn test_end_phase_by_tag_ends_first_sub_phase() {
        let subsystem = PhaseSubsystem::new(NetRole::Authority);
        subsystem.start_phase("Phase.Match", None).unwrap();
        let first = subsystem
            .start_sub_phase("Phase.Round", "Phase.Match", None)
            .unwrap();
        let second = subsystem
            .start_sub_phase("Phase.Round", "Phase.Match", None)
            .unwrap();

        assert_eq!(subsystem.end_phase_by_tag("Phase.Round").unwrap(), first);
        assert!(subsystem.entry(second).is_some());
        assert_eq!(subsystem.end_phase_by_tag("Phase.Round").unwrap(), second);
        assert_eq!(
            subsystem.end_phase_by_tag("Phase.Round").unwrap_err(),
            PhaseError::PhaseNotActive("Phase.Round".to_string())
        );
    }

    #[test]
    fn test_root_phase_cannot_be_ended_by_tag() {
        let subsystem = PhaseSubsystem::new(NetRole::Authority);
        let root = subsystem.start_phase("Phase.Round", None).unwrap();
        let revision = subsystem.replication_state().revision;

        assert_eq!(
            subsystem.end_phase_by_tag("Phase.Round").unwrap_err(),
            PhaseError::PhaseNotActive("Phase.Round".to_string())
        );
        assert!(subsystem.entry(root).is_some());
        assert_eq!(subsystem.replication_state().revision, revision);

        // a root entry earlier in the stack does not shadow a later sub-phase
        subsystem.start_phase("Phase.Match", None).unwrap();
        let sub = subsystem
            .start_sub_phase("Phase.Round", "Phase.Match", None)
            .unwrap();
        assert_eq!(subsystem.end_phase_by_tag("Phase.Round").unwrap(), sub);
        assert!(subsystem.entry(root).is_some());
    }

    #[test]
    fn test_parent_observer_hears_sub_phase() {
        let subsystem = PhaseSubsystem::new(NetRole::Authority);
        let log: Log = Arc::default();
        subsystem
            .subscribe("Phase.Match", MatchMode::Exact, record_into(&log, "match"))
            .unwrap();
        subsystem
            .subscribe("Phase", MatchMode::SelfAndDescendants, record_into(&log, "all"))
            .unwrap();

        subsystem.start_phase("Phase.Match", None).unwrap();
        let overtime = subsystem
            .start_sub_phase("Phase.Overtime", "Phase.Match", None)
            .unwrap();
        subsystem.end_phase(overtime).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "match:Phase.Match started (#1)",
                "all:Phase.Match started (#1)",
                "match:Phase.Overtime started (#2) under Phase.Match",
                "all:Phase.Overtime started (#2) under Phase.Match",
                "match:Phase.Overtime ended (#2) under Phase.Match",
                "all:Phase.Overtime ended (#2) under Phase.Match",
            ]
        );
    }

    #[test]
    fn test_queued_events_carry_active_count_at_mutation() {
        let mut state = State::default();
        let a = state.start(tag("Phase.A"), None, None);
        state.start(tag("Phase.B"), None, None);
        state.end(a).unwrap();
        state.start(tag("Phase.C"), None, None);

        let counts: Vec<usize> = state.pending.iter().map(|p| p.active).collect();
        assert_eq!(counts, vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_reentrant_start_preserves_total_order() {
        let subsystem = Arc::new(PhaseSubsystem::new(NetRole::Authority));
        let log: Log = Arc::default();

        let weak = Arc::downgrade(&subsystem);
        subsystem
            .subscribe("Phase.Warmup", MatchMode::Exact, move |event: &PhaseEvent| {
                if event.kind == PhaseEventKind::Started {
                    if let Some(s) = weak.upgrade() {
                        s.start_phase("Phase.Match", None).unwrap();
                    }
                }
            })
            .unwrap();
        subsystem
            .subscribe("Phase", MatchMode::SelfAndDescendants, record_into(&log, "x"))
            .unwrap();
        subsystem
            .subscribe("Phase", MatchMode::SelfAndDescendants, record_into(&log, "y"))
            .unwrap();

        subsystem.start_phase("Phase.Warmup", None).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "x:Phase.Warmup started (#1)",
                "y:Phase.Warmup started (#1)",
                "x:Phase.Match started (#2)",
                "y:Phase.Match started (#2)",
            ]
        );
    }

    #[test]
    fn test_take_dirty_coalesces() {
        let subsystem = PhaseSubsystem::new(NetRole::Authority);
        assert!(subsystem.take_dirty().is_none());

        let h = subsystem.start_phase("Phase.Warmup", None).unwrap();
        subsystem.start_phase("Phase.Match", None).unwrap();
        subsystem.end_phase(h).unwrap();

        let snapshot = subsystem.take_dirty().unwrap();
        assert_eq!(snapshot.revision, 3);
        assert_eq!(snapshot.tags, vec![tag("Phase.Match")]);
        assert!(subsystem.take_dirty().is_none());
    }

    #[test]
    fn test_failed_end_does_not_bump_revision() {
        let subsystem = PhaseSubsystem::new(NetRole::Authority);
        let h = subsystem.start_phase("Phase.Warmup", None).unwrap();
        subsystem.end_phase(h).unwrap();
        let revision = subsystem.replication_state().revision;

        assert_eq!(subsystem.end_phase(h).unwrap_err(), PhaseError::UnknownHandle(h));
        assert_eq!(subsystem.replication_state().revision, revision);
    }

    #[test]
    fn test_deinitialize_is_silent() {
        let subsystem = PhaseSubsystem::new(NetRole::Authority);
        let log: Log = Arc::default();
        subsystem
            .subscribe("Phase", MatchMode::SelfAndDescendants, record_into(&log, "o"))
            .unwrap();
        subsystem.start_phase("Phase.Warmup", None).unwrap();
        subsystem.deinitialize();

        assert_eq!(subsystem.active_count(), 0);
        assert_eq!(subsystem.subscription_count(), 0);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_client_deinitialize_accepts_next_snapshot() {
        let client = PhaseSubsystem::new(NetRole::Client);
        let snapshot = PhaseSnapshot {
            revision: 5,
            tags: vec![tag("Phase.Match")],
        };
        assert!(client.apply_replicated(&snapshot).unwrap());
        client.deinitialize();

        assert!(client.apply_replicated(&snapshot).unwrap());
        assert_eq!(client.replication_snapshot(), vec![tag("Phase.Match")]);
    }

    #[test]
    fn test_snapshot_applied_from_callback_keeps_newer_revision() {
        let client = Arc::new(PhaseSubsystem::new(NetRole::Client));
        let newer = PhaseSnapshot {
            revision: 2,
            tags: vec![tag("Phase.Match")],
        };

        let weak = Arc::downgrade(&client);
        let pushed = Arc::new(Mutex::new(Some(newer.clone())));
        client
            .subscribe("Phase.Warmup", MatchMode::Exact, move |event: &PhaseEvent| {
                if event.kind != PhaseEventKind::Started {
                    return;
                }
                let next = pushed.lock().unwrap().take();
                if let (Some(next), Some(client)) = (next, weak.upgrade()) {
                    assert!(client.apply_replicated(&next).unwrap());
                }
            })
            .unwrap();

        let older = PhaseSnapshot {
            revision: 1,
            tags: vec![tag("Phase.Warmup")],
        };
        assert!(client.apply_replicated(&older).unwrap());

        assert_eq!(client.replication_state(), newer);
        assert!(!client.apply_replicated(&newer).unwrap());
    }

    #[test]
    fn test_last_started_tracks_tail() {
        let subsystem = PhaseSubsystem::new(NetRole::Authority);
        assert!(subsystem.last_started().is_none());
        subsystem.start_phase("Phase.Warmup", None).unwrap();
        let h = subsystem.start_phase("Phase.Match", None).unwrap();
        assert_eq!(subsystem.last_started(), Some(tag("Phase.Match")));
        subsystem.end_phase(h).unwrap();
        assert_eq!(subsystem.last_started(), Some(tag("Phase.Warmup")));
    }
}
