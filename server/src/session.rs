//! Session management: the one place where connections and entities are
//! paired up.
//!
//! A session is created when a connection opens and destroyed when it
//! closes. Opening allocates an entity with a default [`Player`]; closing
//! destroys that entity along with every component attached to it, so a
//! connection and its entity always live and die together.

use crate::registry::{Entity, Player, Registry};
use log::{info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identity of one transport connection. Handles are never reused within a
/// process, so a stale handle can only ever miss, never alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Allocates a process-unique handle.
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("{handle} already has a session (entity {entity})")]
    AlreadyOpen {
        handle: ConnectionHandle,
        entity: Entity,
    },
}

/// Tracks live sessions as a handle -> entity map.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: BTreeMap<ConnectionHandle, Entity>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the entity for a new connection.
    ///
    /// A second open for a handle that is already tracked is rejected and
    /// leaves the existing session untouched.
    pub fn open(
        &mut self,
        registry: &mut Registry,
        handle: ConnectionHandle,
    ) -> Result<Entity, SessionError> {
        if let Some(&entity) = self.sessions.get(&handle) {
            warn!("Rejecting duplicate open for {} (entity {})", handle, entity);
            return Err(SessionError::AlreadyOpen { handle, entity });
        }

        let entity = registry.create();
        registry.emplace(entity, Player::default());
        self.sessions.insert(handle, entity);

        info!("Session opened: {} -> entity {}", handle, entity);
        Ok(entity)
    }

    /// Ends the session for `handle` and destroys its entity.
    /// Unknown handles are logged and ignored.
    pub fn close(&mut self, registry: &mut Registry, handle: ConnectionHandle) -> Option<Entity> {
        let Some(entity) = self.sessions.remove(&handle) else {
            warn!("Close for unknown connection {}", handle);
            return None;
        };

        registry.destroy(entity);
        info!("Session closed: {} (entity {})", handle, entity);
        Some(entity)
    }

    pub fn resolve(&self, handle: ConnectionHandle) -> Option<Entity> {
        self.sessions.get(&handle).copied()
    }

    /// Live sessions in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionHandle, Entity)> + '_ {
        self.sessions.iter().map(|(handle, entity)| (*handle, *entity))
    }

    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let a = ConnectionHandle::next();
        let b = ConnectionHandle::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_open_creates_entity_with_player() {
        let mut registry = Registry::new();
        let mut sessions = SessionManager::new();
        let handle = ConnectionHandle::next();

        let entity = sessions.open(&mut registry, handle).unwrap();

        assert_eq!(sessions.resolve(handle), Some(entity));
        assert!(registry.contains(entity));
        assert!(registry.try_get::<Player>(entity).is_some());
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_close_destroys_entity() {
        let mut registry = Registry::new();
        let mut sessions = SessionManager::new();
        let handle = ConnectionHandle::next();

        let entity = sessions.open(&mut registry, handle).unwrap();
        assert_eq!(sessions.close(&mut registry, handle), Some(entity));

        assert_eq!(sessions.resolve(handle), None);
        assert!(!registry.contains(entity));
        assert!(registry.is_empty());
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_double_close_is_noop() {
        let mut registry = Registry::new();
        let mut sessions = SessionManager::new();
        let handle = ConnectionHandle::next();
        let other = ConnectionHandle::next();

        sessions.open(&mut registry, handle).unwrap();
        let survivor = sessions.open(&mut registry, other).unwrap();

        assert!(sessions.close(&mut registry, handle).is_some());
        assert!(sessions.close(&mut registry, handle).is_none());

        // The second close must not touch anyone else's entity.
        assert!(registry.contains(survivor));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_close_unknown_handle() {
        let mut registry = Registry::new();
        let mut sessions = SessionManager::new();

        assert!(sessions.close(&mut registry, ConnectionHandle::next()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_open_rejected() {
        let mut registry = Registry::new();
        let mut sessions = SessionManager::new();
        let handle = ConnectionHandle::next();

        let entity = sessions.open(&mut registry, handle).unwrap();
        let result = sessions.open(&mut registry, handle);

        assert_eq!(result, Err(SessionError::AlreadyOpen { handle, entity }));
        assert_eq!(sessions.resolve(handle), Some(entity));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sessions_and_entities_stay_in_bijection() {
        let mut registry = Registry::new();
        let mut sessions = SessionManager::new();
        let handles: Vec<ConnectionHandle> = (0..5).map(|_| ConnectionHandle::next()).collect();

        for handle in &handles {
            sessions.open(&mut registry, *handle).unwrap();
        }
        sessions.close(&mut registry, handles[1]);
        sessions.close(&mut registry, handles[3]);
        sessions.open(&mut registry, ConnectionHandle::next()).unwrap();

        let mut from_sessions: Vec<Entity> = sessions.iter().map(|(_, entity)| entity).collect();
        let mut from_registry: Vec<Entity> = registry.entities().collect();
        from_sessions.sort();
        from_registry.sort();

        assert_eq!(from_sessions, from_registry);
        assert_eq!(sessions.len(), 4);
    }
}
