//! # Connection Registry
//!
//! The set of live WebSocket connections, shared by every session and read by the
//! health endpoint.
//!
//! ## Thread Safety:
//! One `Arc<RwLock<HashMap<..>>>` holds the whole set. Every operation takes the lock
//! exactly once, so `size()` always sees a complete add or remove, never half of one.
//!
//! ## Cleanup Discipline:
//! Sessions hold a [`RegistryLease`] instead of calling `remove` by hand. The lease
//! removes its entry when dropped, so the entry goes away on every exit path of the
//! session, including panics that unwind through it. `remove` is idempotent, which
//! lets an explicit removal and the lease drop coexist.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Identity of one streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the registry knows about a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer_addr: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionInfo {
    pub fn new(id: ConnectionId, peer_addr: Option<String>) -> Self {
        Self {
            id,
            peer_addr,
            connected_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionInfo>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Returns `false` if the id was already present.
    pub fn add(&self, info: ConnectionInfo) -> bool {
        let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
        connections.insert(info.id, info).is_none()
    }

    /// Remove a connection. Removing an absent id is a no-op that returns `false`.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
        connections.remove(id).is_some()
    }

    pub fn size(&self) -> usize {
        self.connections.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Copy of all entries, oldest connection first.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let connections = self.connections.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<ConnectionInfo> = connections.values().cloned().collect();
        entries.sort_by_key(|info| info.connected_at);
        entries
    }

    /// Add `info` and hand back a lease that removes it again on drop.
    pub fn register(&self, info: ConnectionInfo) -> RegistryLease {
        let id = info.id;
        self.add(info);
        RegistryLease {
            registry: self.clone(),
            id,
        }
    }
}

/// Scoped registry membership; dropping it removes the connection.
#[derive(Debug)]
pub struct RegistryLease {
    registry: ConnectionRegistry,
    id: ConnectionId,
}

impl RegistryLease {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for RegistryLease {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn info() -> ConnectionInfo {
        ConnectionInfo::new(ConnectionId::new(), Some("127.0.0.1:50000".to_string()))
    }

    #[test]
    fn test_add_remove_size() {
        let registry = ConnectionRegistry::new();
        let first = info();
        let second = info();
        let first_id = first.id;

        assert!(registry.add(first));
        assert!(registry.add(second));
        assert_eq!(registry.size(), 2);
        assert!(registry.contains(&first_id));

        assert!(registry.remove(&first_id));
        assert_eq!(registry.size(), 1);
        assert!(!registry.contains(&first_id));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let entry = info();
        let id = entry.id;
        registry.add(entry);

        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(!registry.remove(&ConnectionId::new()));
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn test_lease_removes_on_drop() {
        let registry = ConnectionRegistry::new();
        let lease = registry.register(info());
        let id = lease.id();
        assert!(registry.contains(&id));

        // explicit removal followed by the lease drop must not underflow anything
        registry.remove(&id);
        drop(lease);
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn test_lease_released_when_owner_panics() {
        let registry = ConnectionRegistry::new();
        let cloned = registry.clone();
        let result = thread::spawn(move || {
            let _lease = cloned.register(info());
            panic!("session blew up");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn test_concurrent_adds_and_removes() {
        let registry = ConnectionRegistry::new();
        let n = 64;

        let ids: Vec<ConnectionId> = (0..n)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let entry = info();
                    let id = entry.id;
                    registry.add(entry);
                    id
                })
            })
            .map(|handle| handle.join().unwrap())
            .collect();
        assert_eq!(registry.size(), n);

        for (removed, id) in ids.iter().enumerate() {
            assert!(registry.remove(id));
            assert_eq!(registry.size(), n - removed - 1);
        }
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn test_snapshot_is_ordered_by_connect_time() {
        let registry = ConnectionRegistry::new();
        let mut older = info();
        older.connected_at = Utc::now() - chrono::Duration::seconds(10);
        let older_id = older.id;
        registry.add(info());
        registry.add(older);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, older_id);
    }
}
