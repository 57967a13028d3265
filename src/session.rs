//! Registry of live connections.
//!
//! A [`ConnectionRegistry`] maps each [`ConnectionId`] to the
//! [`ConnectionHandle`] of its engine so a binding can enumerate or abort
//! the connections it accepted. Entries are removed when the engine reports
//! a terminal state; [`ConnectionRegistry::prune`] also drops any handle
//! whose connection already finished.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::engine::ConnectionHandle;

/// Identifier assigned to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Allocate the next process-wide identifier.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Concurrent registry of connection handles keyed by [`ConnectionId`].
#[derive(Debug, Default)]
pub struct ConnectionRegistry(DashMap<ConnectionId, ConnectionHandle>);

impl ConnectionRegistry {
    /// Retrieve the handle for `id` if the connection is still live.
    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        let handle = self.0.get(id).map(|entry| entry.value().clone());
        match handle {
            Some(handle) if handle.state().is_terminal() => {
                self.0.remove(id);
                None
            }
            other => other,
        }
    }

    /// Insert the handle of a newly established connection.
    pub fn insert(&self, handle: ConnectionHandle) { self.0.insert(handle.id(), handle); }

    /// Remove a handle, typically on connection teardown.
    pub fn remove(&self, id: &ConnectionId) { self.0.remove(id); }

    /// Drop every handle whose connection reached a terminal state.
    pub fn prune(&self) { self.0.retain(|_, handle| !handle.state().is_terminal()); }

    /// Prune finished entries, then collect the live handles.
    #[must_use]
    pub fn active_handles(&self) -> Vec<ConnectionHandle> {
        self.prune();
        self.0.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of registered connections, including any not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Returns `true` if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}
