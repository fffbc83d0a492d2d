//! Ordered collection of active phase entries.
//!
//! The stack is a multiset ordered by start time: pushing a tag twice
//! yields two independent entries, and removal is by handle, from any
//! position. It carries no notification logic; the subsystem wraps it.

use std::time::Instant;

use crate::error::PhaseError;
use crate::tag::{MatchMode, PhaseTag};

use super::entry::{OwnerId, PhaseEntry, PhaseHandle};

/// Authoritative (or mirrored) set of active phases in start order.
#[derive(Debug)]
pub struct PhaseStack {
    entries: Vec<PhaseEntry>,
    next_handle: u64,
}

impl Default for PhaseStack {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseStack {
    /// Creates an empty stack. The first handle issued is `#1`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_handle: 1,
        }
    }

    /// Appends a new entry and returns its handle. Never deduplicates.
    pub fn push(
        &mut self,
        tag: PhaseTag,
        owner: Option<OwnerId>,
        parent: Option<PhaseTag>,
    ) -> PhaseHandle {
        let handle = PhaseHandle::from_raw(self.next_handle);
        self.next_handle += 1;
        self.entries.push(PhaseEntry {
            tag,
            handle,
            owner,
            parent,
            started_at: Instant::now(),
        });
        handle
    }

    /// Removes the entry carrying `handle`, preserving the order of the rest.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::UnknownHandle`] if no entry carries `handle`.
    pub fn pop(&mut self, handle: PhaseHandle) -> Result<PhaseEntry, PhaseError> {
        let index = self
            .position(handle)
            .ok_or(PhaseError::UnknownHandle(handle))?;
        Ok(self.entries.remove(index))
    }

    /// Returns `true` if some entry's tag matches `tag` under `mode`.
    #[must_use]
    pub fn is_active(&self, tag: &PhaseTag, mode: MatchMode) -> bool {
        self.entries.iter().any(|e| mode.matches(tag, &e.tag))
    }

    /// Returns the active tags in start order. Duplicates are kept.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PhaseTag> {
        self.entries.iter().map(|e| e.tag.clone()).collect()
    }

    /// Looks up an entry by handle.
    #[must_use]
    pub fn get(&self, handle: PhaseHandle) -> Option<&PhaseEntry> {
        self.entries.iter().find(|e| e.handle == handle)
    }

    /// The most recently started entry.
    #[must_use]
    pub fn last(&self) -> Option<&PhaseEntry> {
        self.entries.last()
    }

    /// The earliest started sub-phase whose tag equals `tag`.
    #[must_use]
    pub fn first_sub_phase_with_tag(&self, tag: &PhaseTag) -> Option<&PhaseEntry> {
        self.entries.iter().find(|e| e.is_sub_phase() && &e.tag == tag)
    }

    /// Handles owned by `owner`, in stack order.
    #[must_use]
    pub fn handles_for_owner(&self, owner: OwnerId) -> Vec<PhaseHandle> {
        self.entries
            .iter()
            .filter(|e| e.owner == Some(owner))
            .map(|e| e.handle)
            .collect()
    }

    /// All handles in stack order.
    #[must_use]
    pub fn handles(&self) -> Vec<PhaseHandle> {
        self.entries.iter().map(|e| e.handle).collect()
    }

    /// Removes every entry, returning them in start order.
    ///
    /// Handle allocation continues from where it was.
    pub fn drain_all(&mut self) -> Vec<PhaseEntry> {
        std::mem::take(&mut self.entries)
    }

    /// Iterates over the entries in start order.
    pub fn iter(&self) -> std::slice::Iter<'_, PhaseEntry> {
        self.entries.iter()
    }

    /// Number of active entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, handle: PhaseHandle) -> Option<usize> {
        self.entries.iter().position(|e| e.handle == handle)
    }
}

impl<'a> IntoIterator for &'a PhaseStack {
    type Item = &'a PhaseEntry;
    type IntoIter = std::slice::Iter<'a, PhaseEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
