//! Session Registry (spec §4.H).
//!
//! Process-wide (per engine instance) store of opaque AI conversation
//! handles. `clone` produces a fresh session whose history is a filtered
//! deep copy of the source — internal scaffolding messages stripped —
//! which is what `reuse_ai_session` ultimately calls into.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct SessionMessage {
    pub role: String,
    pub content: String,
    /// Scaffolding messages (tool-call bookkeeping, system prompts injected
    /// by the dispatcher) are dropped on clone.
    pub internal: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub id: String,
    pub history: Vec<SessionMessage>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history: Vec::new(),
        }
    }
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, id: &str) -> Session {
        let mut guard = self.sessions.write().await;
        guard
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id))
            .clone()
    }

    pub async fn append_message(&self, id: &str, message: SessionMessage) {
        let mut guard = self.sessions.write().await;
        guard
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id))
            .history
            .push(message);
    }

    /// Clones `source_id`'s session under `new_id`, dropping internal
    /// scaffolding messages (spec §4.H: "filtered deep copy").
    pub async fn clone_session(&self, source_id: &str, new_id: &str) -> Option<Session> {
        let mut guard = self.sessions.write().await;
        let source = guard.get(source_id)?.clone();
        let cloned = Session {
            id: new_id.to_string(),
            history: source
                .history
                .into_iter()
                .filter(|m| !m.internal)
                .collect(),
        };
        guard.insert(new_id.to_string(), cloned.clone());
        Some(cloned)
    }

    /// Tears down every session owned by this registry — called at run end
    /// and, by the external driver, on `SIGINT`/`SIGTERM` (spec §4.H).
    pub async fn shutdown(&self) {
        self.sessions.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clone_session_drops_internal_messages() {
        let registry = SessionRegistry::new();
        registry
            .append_message(
                "a",
                SessionMessage {
                    role: "user".into(),
                    content: "hello".into(),
                    internal: false,
                },
            )
            .await;
        registry
            .append_message(
                "a",
                SessionMessage {
                    role: "system".into(),
                    content: "scaffold".into(),
                    internal: true,
                },
            )
            .await;

        let cloned = registry.clone_session("a", "b").await.unwrap();
        assert_eq!(cloned.history.len(), 1);
        assert_eq!(cloned.history[0].content, "hello");
    }

    #[tokio::test]
    async fn shutdown_clears_every_session() {
        let registry = SessionRegistry::new();
        registry.get_or_create("a").await;
        registry.shutdown().await;
        let session = registry.get_or_create("a").await;
        assert!(session.history.is_empty());
    }
}
