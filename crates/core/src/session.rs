use crate::conversation::Conversation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The mutex serializes turns within a session.
pub type SessionHandle = Arc<Mutex<Conversation>>;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self) -> SessionId {
        let id = SessionId::new();
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(Conversation::new())));
        debug!(session = %id, "session opened");
        id
    }

    pub async fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn close(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            debug!(session = %id, "session closed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_are_isolated() {
        let registry = SessionRegistry::new();
        let first = registry.open().await;
        let second = registry.open().await;
        assert_ne!(first, second);
        assert_eq!(registry.len().await, 2);

        let first_handle = registry.get(&first).await.expect("first session exists");
        let second_handle = registry.get(&second).await.expect("second session exists");
        assert!(!Arc::ptr_eq(&first_handle, &second_handle));
    }

    #[tokio::test]
    async fn closed_sessions_are_forgotten() {
        let registry = SessionRegistry::new();
        let id = registry.open().await;

        assert!(registry.close(&id).await);
        assert!(registry.get(&id).await.is_none());
        assert!(!registry.close(&id).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_session_is_absent() {
        let registry = SessionRegistry::new();
        assert!(registry.get(&SessionId::new()).await.is_none());
    }
}
