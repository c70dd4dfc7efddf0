//! Membership set of connections that finished the handshake.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use crate::connection::{Connection, ConnectionId};

/// Thread-safe set of active connections, keyed by connection id.
///
/// Entries are weak: the registry never keeps a transport alive on its own, the owning
/// session does. Every operation takes the lock for a bounded, non-async critical section,
/// so callers never lock anything themselves.
///
/// `BTreeMap` keeps snapshots in join order, which makes fan-out deterministic.
#[derive(Default)]
pub struct Registry {
    members: Mutex<BTreeMap<ConnectionId, Weak<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `connection`. Returns `false` if it was already present.
    pub fn add(&self, connection: &Arc<Connection>) -> bool {
        let mut members = self.lock();
        if members.contains_key(&connection.id()) {
            return false;
        }
        members.insert(connection.id(), Arc::downgrade(connection));
        true
    }

    /// Removes the entry for `id`. Removing an absent id is a no-op that returns `false`.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.lock().get(&id).and_then(Weak::upgrade)
    }

    /// Point-in-time copy of the live members, ordered by id.
    ///
    /// The lock is released before returning, so iterating the result never blocks
    /// concurrent joins or departures. Entries whose connection has already been dropped
    /// are skipped.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.lock().values().filter_map(Weak::upgrade).collect()
    }

    /// Display names of the current members, in join order.
    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|member| member.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, Weak<Connection>>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
