//! Observer registry for phase start/end notifications.
//!
//! Subscriptions are kept in registration order. Dispatch works on a
//! snapshot of the matching subscriptions, and each subscription carries a
//! liveness flag that is checked right before its callback runs. Removing a
//! subscription while an event is being delivered therefore never calls a
//! removed callback and never skips an unrelated one.
//!
//! A subscription receives an event when its pattern matches the event's
//! tag or, for sub-phases, the tag of the parent phase. Parent phases thus
//! hear about their sub-phases even when the sub-phase tag lives elsewhere
//! in the hierarchy.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::PhaseError;
use crate::tag::{MatchMode, PhaseTag};

use super::entry::PhaseHandle;

/// Whether a phase started or ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseEventKind {
    /// An entry was added to the stack
    Started,
    /// An entry was removed from the stack
    Ended,
}

/// A single phase transition delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEvent {
    /// Start or end
    pub kind: PhaseEventKind,
    /// Tag of the entry that changed
    pub tag: PhaseTag,
    /// Handle of the entry that changed (client-local on receivers)
    pub handle: PhaseHandle,
    /// Parent phase when the entry is a sub-phase. Always `None` on
    /// clients, snapshots do not carry parents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<PhaseTag>,
}

impl PhaseEvent {
    pub(crate) const fn started(tag: PhaseTag, handle: PhaseHandle, parent: Option<PhaseTag>) -> Self {
        Self {
            kind: PhaseEventKind::Started,
            tag,
            handle,
            parent,
        }
    }

    pub(crate) const fn ended(tag: PhaseTag, handle: PhaseHandle, parent: Option<PhaseTag>) -> Self {
        Self {
            kind: PhaseEventKind::Ended,
            tag,
            handle,
            parent,
        }
    }
}

impl fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.kind {
            PhaseEventKind::Started => "started",
            PhaseEventKind::Ended => "ended",
        };
        write!(f, "{} {verb} ({})", self.tag, self.handle)?;
        if let Some(parent) = &self.parent {
            write!(f, " under {parent}")?;
        }
        Ok(())
    }
}

/// Identifier returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Observer callback. Invoked synchronously on the thread that caused the
/// transition.
pub type PhaseCallback = Arc<dyn Fn(&PhaseEvent) + Send + Sync>;

/// A registered observer.
pub struct Subscription {
    id: SubscriptionId,
    pattern: PhaseTag,
    mode: MatchMode,
    callback: PhaseCallback,
    live: AtomicBool,
}

impl Subscription {
    /// Identifier of this subscription.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Pattern tag the subscription listens on.
    #[must_use]
    pub const fn pattern(&self) -> &PhaseTag {
        &self.pattern
    }

    /// Match mode applied to [`pattern`](Self::pattern).
    #[must_use]
    pub const fn mode(&self) -> MatchMode {
        self.mode
    }

    /// `false` once the subscription has been removed.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn matches(&self, tag: &PhaseTag) -> bool {
        self.mode.matches(&self.pattern, tag)
    }

    fn wants(&self, event: &PhaseEvent) -> bool {
        self.matches(&event.tag) || event.parent.as_ref().is_some_and(|p| self.matches(p))
    }

    /// Invokes the callback unless the subscription was removed.
    fn notify(&self, event: &PhaseEvent) -> bool {
        if !self.is_live() {
            return false;
        }
        (self.callback)(event);
        true
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("mode", &self.mode)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

/// Ordered set of subscriptions.
#[derive(Debug)]
pub struct ObserverRegistry {
    subscriptions: Vec<Arc<Subscription>>,
    next_id: u64,
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            next_id: 1,
        }
    }

    /// Registers a callback and returns its id. Ids are never reused.
    pub fn subscribe(
        &mut self,
        pattern: PhaseTag,
        mode: MatchMode,
        callback: PhaseCallback,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Arc::new(Subscription {
            id,
            pattern,
            mode,
            callback,
            live: AtomicBool::new(true),
        }));
        id
    }

    /// Removes a subscription and marks it dead so in-flight deliveries
    /// skip it.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::UnknownSubscription`] if `id` is not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Result<(), PhaseError> {
        let index = self
            .subscriptions
            .iter()
            .position(|s| s.id == id)
            .ok_or(PhaseError::UnknownSubscription(id))?;
        let removed = self.subscriptions.remove(index);
        removed.live.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Subscriptions interested in `tag`, in registration order.
    #[must_use]
    pub fn matching(&self, tag: &PhaseTag) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .iter()
            .filter(|s| s.matches(tag))
            .cloned()
            .collect()
    }

    /// Subscriptions that receive `event`: those matching its tag plus, for
    /// sub-phases, those matching its parent. Registration order, no
    /// duplicates.
    #[must_use]
    pub fn interested_in(&self, event: &PhaseEvent) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .iter()
            .filter(|s| s.wants(event))
            .cloned()
            .collect()
    }

    /// Returns `true` if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.iter().any(|s| s.id == id)
    }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Drops every subscription.
    pub fn clear(&mut self) {
        for sub in self.subscriptions.drain(..) {
            sub.live.store(false, Ordering::SeqCst);
        }
    }
}

/// Delivers `event` to each target that is still live, in order.
///
/// Returns the number of callbacks actually invoked.
pub fn deliver(targets: &[Arc<Subscription>], event: &PhaseEvent) -> usize {
    targets.iter().filter(|s| s.notify(event)).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn tag(s: &str) -> PhaseTag {
        PhaseTag::parse(s).unwrap()
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> PhaseCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_factory = Arc::clone(&log);
        let factory = move |name: &str| -> PhaseCallback {
            let log = Arc::clone(&log_for_factory);
            let name = name.to_owned();
            Arc::new(move |event: &PhaseEvent| {
                log.lock().unwrap().push(format!("{name}:{}", event.tag));
            })
        };
        (log, factory)
    }

    #[test]
    fn test_matching_respects_mode_and_order() {
        let (_, cb) = recorder();
        let mut registry = ObserverRegistry::new();
        let a = registry.subscribe(tag("Phase.Match"), MatchMode::SelfAndDescendants, cb("a"));
        let b = registry.subscribe(tag("Phase.Match.Playing"), MatchMode::Exact, cb("b"));
        let c = registry.subscribe(tag("Phase.Match"), MatchMode::Exact, cb("c"));

        let ids: Vec<_> = registry
            .matching(&tag("Phase.Match.Playing"))
            .iter()
            .map(|s| s.id())
            .collect();
        assert_eq!(ids, vec![a, b]);

        let ids: Vec<_> = registry
            .matching(&tag("Phase.Match"))
            .iter()
            .map(|s| s.id())
            .collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[test]
    fn test_deliver_skips_subscriptions_removed_mid_dispatch() {
        let (log, cb) = recorder();
        let mut registry = ObserverRegistry::new();
        registry.subscribe(tag("Phase"), MatchMode::SelfAndDescendants, cb("a"));
        let b = registry.subscribe(tag("Phase"), MatchMode::SelfAndDescendants, cb("b"));
        registry.subscribe(tag("Phase"), MatchMode::SelfAndDescendants, cb("c"));

        let targets = registry.matching(&tag("Phase.Warmup"));
        registry.unsubscribe(b).unwrap();

        let event = PhaseEvent::started(tag("Phase.Warmup"), PhaseHandle::from_raw(1), None);
        assert_eq!(deliver(&targets, &event), 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:Phase.Warmup".to_string(), "c:Phase.Warmup".to_string()]
        );
    }

    #[test]
    fn test_unsubscribe_unknown_is_reported() {
        let (_, cb) = recorder();
        let mut registry = ObserverRegistry::new();
        let id = registry.subscribe(tag("Phase"), MatchMode::Exact, cb("a"));
        registry.unsubscribe(id).unwrap();
        assert_eq!(
            registry.unsubscribe(id).unwrap_err(),
            PhaseError::UnknownSubscription(id)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_kills_outstanding_targets() {
        let (log, cb) = recorder();
        let mut registry = ObserverRegistry::new();
        registry.subscribe(tag("Phase"), MatchMode::SelfAndDescendants, cb("a"));
        let targets = registry.matching(&tag("Phase"));
        registry.clear();

        let event = PhaseEvent::ended(tag("Phase"), PhaseHandle::from_raw(3), None);
        assert_eq!(deliver(&targets, &event), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_event_display() {
        let event = PhaseEvent::started(tag("Phase.Warmup"), PhaseHandle::from_raw(4), None);
        assert_eq!(event.to_string(), "Phase.Warmup started (#4)");

        let sub = PhaseEvent::ended(tag("Phase.Overtime"), PhaseHandle::from_raw(5), Some(tag("Phase.Match")));
        assert_eq!(sub.to_string(), "Phase.Overtime ended (#5) under Phase.Match");
    }

    #[test]
    fn test_sub_phase_events_reach_parent_subscribers_once() {
        let (_, cb) = recorder();
        let mut registry = ObserverRegistry::new();
        let parent = registry.subscribe(tag("Phase.Match"), MatchMode::Exact, cb("parent"));
        let both = registry.subscribe(tag("Phase"), MatchMode::SelfAndDescendants, cb("both"));
        registry.subscribe(tag("Phase.Overtime.Extra"), MatchMode::Exact, cb("other"));

        let event = PhaseEvent::started(
            tag("Phase.Overtime"),
            PhaseHandle::from_raw(2),
            Some(tag("Phase.Match")),
        );
        let ids: Vec<_> = registry.interested_in(&event).iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![parent, both]);

        let root = PhaseEvent::started(tag("Phase.Overtime"), PhaseHandle::from_raw(3), None);
        let ids: Vec<_> = registry.interested_in(&root).iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![both]);
    }
}
