//! Who is connected.
//!
//! The registry is the only state shared between connections. Every mutation and every
//! broadcast read goes through it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::error::{Error, Result};
use crate::handle::ConnectionHandle;

/// Identifies one accepted connection. Allocated from a counter, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Concurrent map from connection id to its handle.
///
/// Safe to use from any number of connection tasks at once.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, ConnectionHandle>,
    next_id: AtomicU64,
    closing: AtomicBool,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
            closing: AtomicBool::new(false),
        }
    }

    /// Allocate a fresh connection id.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Insert `handle` under its id.
    ///
    /// Once [`close_all`](Self::close_all) has run, newly registered handles are asked to close
    /// straight away.
    pub fn register(&self, handle: ConnectionHandle) -> Result<()> {
        let id = handle.id();
        match self.clients.entry(id) {
            Entry::Occupied(_) => return Err(Error::DuplicateRegistration(id)),
            Entry::Vacant(slot) => {
                slot.insert(handle.clone());
            }
        }
        debug!(conn_id = %id, clients = self.len(), "connection registered");
        if self.closing.load(Ordering::SeqCst) {
            handle.request_close();
        }
        Ok(())
    }

    /// Remove `id`. Returns `false` if it was not present, so cleanup may run twice.
    pub fn deregister(&self, id: ConnectionId) -> bool {
        let removed = self.clients.remove(&id).is_some();
        if removed {
            debug!(conn_id = %id, clients = self.len(), "connection deregistered");
        }
        removed
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.clients.get(&id).map(|entry| entry.value().clone())
    }

    /// Point in time copy of all entries, ordered by id.
    ///
    /// Registrations and removals racing with the caller never affect a snapshot that has
    /// already been taken.
    pub fn snapshot(&self) -> Vec<(ConnectionId, ConnectionHandle)> {
        let mut entries: Vec<_> = self
            .clients
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Ask every registered connection to close, now and for any registered later.
    pub fn close_all(&self) {
        self.closing.store(true, Ordering::SeqCst);
        for (_, handle) in self.snapshot() {
            handle.request_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::sync::mpsc;

    fn handle(id: ConnectionId) -> ConnectionHandle {
        let (tx, _rx) = mpsc::channel(4);
        ConnectionHandle::new(id, "127.0.0.1:4000".parse().unwrap(), tx)
    }

    #[test]
    fn ids_are_monotonic() {
        let registry = ClientRegistry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        assert!(b > a);
        assert_eq!(a.value() + 1, b.value());
    }

    #[test]
    fn register_and_get() {
        let registry = ClientRegistry::new();
        let id = registry.next_id();
        registry.register(handle(id)).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(id).map(|h| h.id()), Some(id));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = ClientRegistry::new();
        let id = registry.next_id();
        registry.register(handle(id)).unwrap();
        assert_matches!(
            registry.register(handle(id)),
            Err(Error::DuplicateRegistration(dup)) if dup == id
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn deregister_is_idempotent() {
        let registry = ClientRegistry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        registry.register(handle(a)).unwrap();
        registry.register(handle(b)).unwrap();

        assert!(registry.deregister(a));
        assert!(!registry.deregister(a));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(a).is_none());
    }

    #[test]
    fn snapshot_is_ordered_and_detached() {
        let registry = ClientRegistry::new();
        let ids: Vec<_> = (0..5).map(|_| registry.next_id()).collect();
        for id in ids.iter().rev() {
            registry.register(handle(*id)).unwrap();
        }

        let snapshot = registry.snapshot();
        registry.deregister(ids[0]);
        registry.register(handle(registry.next_id())).unwrap();

        let seen: Vec<_> = snapshot.iter().map(|(id, _)| *id).collect();
        assert_eq!(seen, ids);
    }

    #[tokio::test]
    async fn close_all_signals_present_and_late_connections() {
        let registry = ClientRegistry::new();
        let early = handle(registry.next_id());
        registry.register(early.clone()).unwrap();

        registry.close_all();
        let late = handle(registry.next_id());
        registry.register(late.clone()).unwrap();

        early.closed().await;
        late.closed().await;
    }
}
