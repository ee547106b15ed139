//! Id-indexed handler table.
//!
//! Error handlers, subscribers, and channel listeners all live in a
//! [`ListenerArena`]. Entries are keyed by a monotonically increasing
//! [`ListenerId`], so iteration and teardown follow registration order.
//! Removal is idempotent: removing an id twice returns `None` the
//! second time instead of failing.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::identifiers::ListenerId;

// ============================================================================
// ListenerArena
// ============================================================================

/// Ordered table of handles keyed by [`ListenerId`].
#[derive(Debug)]
pub struct ListenerArena<H> {
    entries: BTreeMap<ListenerId, H>,
}

impl<H> Default for ListenerArena<H> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<H> ListenerArena<H> {
    /// Creates an empty arena.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a handle and returns its id.
    pub fn insert(&mut self, handle: H) -> ListenerId {
        let id = ListenerId::next();
        self.entries.insert(id, handle);
        id
    }

    /// Removes a handle. Returns `None` if it was already removed.
    pub fn remove(&mut self, id: ListenerId) -> Option<H> {
        self.entries.remove(&id)
    }

    /// Returns `true` if `id` is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ListenerId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Returns the number of registered handles.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no handles are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every handle in registration order.
    pub fn drain(&mut self) -> Vec<(ListenerId, H)> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }
}

impl<H: Clone> ListenerArena<H> {
    /// Clones every handle in registration order.
    ///
    /// Callers invoke the snapshot after releasing the arena lock, so a
    /// handler may add or remove handlers without deadlocking.
    #[must_use]
    pub fn snapshot(&self) -> Vec<H> {
        self.entries.values().cloned().collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
