//! Scope registry: which connections are live in which scope.
//!
//! Scopes are independently lockable so one busy scope never blocks another.
//! `members` hands out a point-in-time snapshot; callers iterate the snapshot
//! while the registry keeps mutating underneath, and removals triggered by
//! delivery failures go back through the normal idempotent `leave` path.

use super::connection::{ConnId, Connection};
use super::ScopeId;
use crate::error::RegistryError;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Membership state of one scope. Guarded by the scope's own mutex.
#[derive(Debug, Default)]
struct MemberSet {
    by_id: HashMap<ConnId, Arc<Connection>>,
    /// Display names in join order. Uniqueness is enforced per scope.
    names: Vec<String>,
}

#[derive(Debug)]
struct Scope {
    members: Mutex<MemberSet>,
}

impl Scope {
    fn new() -> Self {
        Self {
            members: Mutex::new(MemberSet::default()),
        }
    }
}

/// Registry of all live scopes and their members.
///
/// Constructed once at process start and handed to every session task.
#[derive(Debug)]
pub struct ScopeRegistry {
    scopes: DashMap<ScopeId, Arc<Scope>>,
    /// Which scope each connection is registered in. A connection appears
    /// here exactly while it is a member somewhere.
    joined: DashMap<ConnId, ScopeId>,
    /// Room mode admits by display name, so names must be unique per scope.
    /// Channels mode admits by stored user id and two users may legitimately
    /// share a display name.
    unique_names: bool,
}

impl ScopeRegistry {
    pub fn new(unique_names: bool) -> Self {
        Self {
            scopes: DashMap::new(),
            joined: DashMap::new(),
            unique_names,
        }
    }

    /// Register `conn` under `scope`, creating the scope on first join.
    ///
    /// Fails with `AlreadyJoined` if the connection is registered anywhere
    /// (callers must leave first) and with `NameInUse` if the display name is
    /// already claimed in that scope.
    pub fn join(&self, scope: &str, conn: Arc<Connection>) -> Result<(), RegistryError> {
        if let Some(existing) = self.joined.get(&conn.id()) {
            return Err(RegistryError::AlreadyJoined(existing.value().clone()));
        }

        let entry = self
            .scopes
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(Scope::new()))
            .clone();

        let name = conn.name();
        {
            let mut members = entry.members.lock();
            if self.unique_names && members.names.iter().any(|n| n == &name) {
                return Err(RegistryError::NameInUse(name));
            }
            members.names.push(name);
            members.by_id.insert(conn.id(), conn.clone());
        }

        self.joined.insert(conn.id(), scope.to_string());
        debug!(scope = %scope, conn_id = conn.id(), "connection joined scope");
        Ok(())
    }

    /// Remove `conn_id` from `scope`. Idempotent: removing an absent
    /// connection is a no-op.
    pub fn leave(&self, scope: &str, conn_id: ConnId) {
        let Some(entry) = self.scopes.get(scope).map(|s| s.clone()) else {
            return;
        };

        let removed = {
            let mut members = entry.members.lock();
            match members.by_id.remove(&conn_id) {
                Some(conn) => {
                    let name = conn.name();
                    // Duplicates are possible when uniqueness is not
                    // enforced; drop one roster slot, not all of them.
                    if let Some(pos) = members.names.iter().position(|n| n == &name) {
                        members.names.remove(pos);
                    }
                    true
                }
                None => false,
            }
        };

        if removed {
            self.joined
                .remove_if(&conn_id, |_, joined_scope| joined_scope == scope);
            debug!(scope = %scope, conn_id, "connection left scope");
        }
    }

    /// Point-in-time snapshot of the scope's members, safe to iterate while
    /// the registry is concurrently mutated. Unknown scopes yield an empty
    /// snapshot.
    pub fn members(&self, scope: &str) -> Vec<Arc<Connection>> {
        match self.scopes.get(scope) {
            Some(entry) => entry.members.lock().by_id.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn scope_exists(&self, scope: &str) -> bool {
        self.scopes.contains_key(scope)
    }

    /// Display names currently in the scope, in join order.
    pub fn names(&self, scope: &str) -> Vec<String> {
        match self.scopes.get(scope) {
            Some(entry) => entry.members.lock().names.clone(),
            None => Vec::new(),
        }
    }

    /// Rename a member in place (room-mode `join`-as-rename), keeping the
    /// per-scope uniqueness rule. Returns the previous name.
    pub fn rename(
        &self,
        scope: &str,
        conn_id: ConnId,
        new_name: &str,
    ) -> Result<String, RegistryError> {
        let entry = self
            .scopes
            .get(scope)
            .map(|s| s.clone())
            .ok_or_else(|| RegistryError::UnknownScope(scope.to_string()))?;

        let mut members = entry.members.lock();
        let conn = members
            .by_id
            .get(&conn_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownScope(scope.to_string()))?;

        let old_name = conn.name();
        if old_name == new_name {
            return Ok(old_name);
        }
        if self.unique_names && members.names.iter().any(|n| n == new_name) {
            return Err(RegistryError::NameInUse(new_name.to_string()));
        }
        if let Some(slot) = members.names.iter_mut().find(|n| **n == old_name) {
            *slot = new_name.to_string();
        }
        conn.set_name(new_name.to_string());
        Ok(old_name)
    }

    /// Total live connections across all scopes.
    pub fn connection_count(&self) -> usize {
        self.joined.len()
    }

    /// Number of scopes seen so far (empty scopes are retained).
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::ServerFrame;
    use crate::state::Identity;
    use tokio::sync::mpsc;

    fn conn(id: ConnId, name: &str) -> (Arc<Connection>, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(8);
        let identity = Identity {
            user_id: name.to_string(),
            name: name.to_string(),
            avatar: None,
            commitment: None,
        };
        (Arc::new(Connection::new(id, identity, tx)), rx)
    }

    #[test]
    fn members_reflect_joins_and_leaves() {
        let registry = ScopeRegistry::new(true);
        let (alice, _rx_a) = conn(1, "alice");
        let (bob, _rx_b) = conn(2, "bob");

        registry.join("lobby", alice.clone()).unwrap();
        registry.join("lobby", bob.clone()).unwrap();
        assert_eq!(registry.members("lobby").len(), 2);
        assert_eq!(registry.names("lobby"), vec!["alice", "bob"]);

        registry.leave("lobby", alice.id());
        let members = registry.members("lobby");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id(), bob.id());
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn double_leave_is_a_no_op() {
        let registry = ScopeRegistry::new(true);
        let (alice, _rx) = conn(1, "alice");
        registry.join("lobby", alice.clone()).unwrap();
        registry.leave("lobby", alice.id());
        registry.leave("lobby", alice.id());
        assert!(registry.members("lobby").is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn leave_of_unknown_scope_is_a_no_op() {
        let registry = ScopeRegistry::new(true);
        registry.leave("nowhere", 42);
    }

    #[test]
    fn join_twice_requires_leave_first() {
        let registry = ScopeRegistry::new(true);
        let (alice, _rx) = conn(1, "alice");
        registry.join("a", alice.clone()).unwrap();
        let err = registry.join("b", alice.clone()).unwrap_err();
        assert_eq!(err, RegistryError::AlreadyJoined("a".to_string()));

        registry.leave("a", alice.id());
        registry.join("b", alice).unwrap();
        assert_eq!(registry.members("b").len(), 1);
    }

    #[test]
    fn duplicate_names_are_rejected_per_scope() {
        let registry = ScopeRegistry::new(true);
        let (alice1, _rx1) = conn(1, "alice");
        let (alice2, _rx2) = conn(2, "alice");

        registry.join("lobby", alice1).unwrap();
        let err = registry.join("lobby", alice2.clone()).unwrap_err();
        assert_eq!(err, RegistryError::NameInUse("alice".to_string()));

        // Same name in a different scope is fine.
        registry.join("other", alice2).unwrap();
    }

    #[test]
    fn duplicate_names_are_allowed_when_not_enforced() {
        let registry = ScopeRegistry::new(false);
        let (alice1, _rx1) = conn(1, "alice");
        let (alice2, _rx2) = conn(2, "alice");

        registry.join("7", alice1).unwrap();
        registry.join("7", alice2).unwrap();
        assert_eq!(registry.names("7"), vec!["alice", "alice"]);
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let registry = ScopeRegistry::new(true);
        let (alice, _rx_a) = conn(1, "alice");
        let (bob, _rx_b) = conn(2, "bob");
        registry.join("lobby", alice.clone()).unwrap();
        registry.join("lobby", bob).unwrap();

        let snapshot = registry.members("lobby");
        registry.leave("lobby", alice.id());
        // The snapshot still holds both; the registry does not.
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.members("lobby").len(), 1);
    }

    #[test]
    fn rename_enforces_uniqueness() {
        let registry = ScopeRegistry::new(true);
        let (alice, _rx_a) = conn(1, "alice");
        let (bob, _rx_b) = conn(2, "bob");
        registry.join("lobby", alice.clone()).unwrap();
        registry.join("lobby", bob.clone()).unwrap();

        let err = registry.rename("lobby", bob.id(), "alice").unwrap_err();
        assert_eq!(err, RegistryError::NameInUse("alice".to_string()));

        let old = registry.rename("lobby", bob.id(), "robert").unwrap();
        assert_eq!(old, "bob");
        assert_eq!(registry.names("lobby"), vec!["alice", "robert"]);
        assert_eq!(bob.name(), "robert");
    }
}
