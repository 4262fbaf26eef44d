//! In-memory checkpoint store for tests and embedded use

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agent::state::AgentState;
use crate::error::Result;

use super::{CheckpointStore, SessionInfo};

/// Checkpoint store backed by process memory.
///
/// Same contract as the Postgres store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    sessions: RwLock<HashMap<String, SessionInfo>>,
    states: RwLock<HashMap<String, AgentState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn create_session(
        &self,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<String> {
        let mut sessions = self.sessions.write().await;

        if let Some(id) = session_id {
            if sessions.contains_key(id) {
                return Ok(id.to_string());
            }
        }

        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        sessions.insert(
            id.clone(),
            SessionInfo {
                session_id: id.clone(),
                user_id: user_id.map(str::to_string),
                created_at: now,
                updated_at: now,
                status: "active".to_string(),
            },
        );
        Ok(id)
    }

    async fn session_info(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn get(&self, session_id: &str) -> Result<Option<AgentState>> {
        Ok(self.states.read().await.get(session_id).cloned())
    }

    async fn put(&self, session_id: &str, state: &AgentState) -> Result<()> {
        self.states
            .write()
            .await
            .insert(session_id.to_string(), state.clone());
        if let Some(info) = self.sessions.write().await.get_mut(session_id) {
            info.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        self.states.write().await.remove(session_id);
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::state::LoopPhase;

    #[tokio::test]
    async fn create_session_is_idempotent_on_id() {
        let store = MemoryCheckpointStore::new();
        let first = store
            .create_session(Some("user-1"), Some("sess-1"))
            .await
            .unwrap();
        let second = store.create_session(None, Some("sess-1")).await.unwrap();
        assert_eq!(first, "sess-1");
        assert_eq!(second, "sess-1");

        // Original metadata survives the second create.
        let info = store.session_info("sess-1").await.unwrap().unwrap();
        assert_eq!(info.user_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn generates_an_id_when_none_supplied() {
        let store = MemoryCheckpointStore::new();
        let id = store.create_session(None, None).await.unwrap();
        assert!(!id.is_empty());
        assert!(store.session_info(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn put_get_roundtrip_preserves_all_fields() {
        let store = MemoryCheckpointStore::new();
        store.create_session(None, Some("sess-1")).await.unwrap();

        let mut state = AgentState::new("sess-1", "system");
        state.begin_turn("hello");
        state.tools_bound = true;
        state.phase = LoopPhase::DispatchTools;
        state.transitions = 3;
        state
            .user_actions
            .push(serde_json::json!({"user_action": true, "route": "x"}));

        store.put("sess-1", &state).await.unwrap();
        let loaded = store.get("sess-1").await.unwrap().unwrap();

        assert_eq!(loaded.messages, state.messages);
        assert_eq!(loaded.phase, state.phase);
        assert_eq!(loaded.transitions, state.transitions);
        assert_eq!(loaded.tools_bound, state.tools_bound);
        assert_eq!(loaded.user_actions, state.user_actions);

        // Save-load-save fixed point.
        store.put("sess-1", &loaded).await.unwrap();
        let again = store.get("sess-1").await.unwrap().unwrap();
        assert_eq!(again.messages, loaded.messages);
    }

    #[tokio::test]
    async fn delete_erases_state_and_session() {
        let store = MemoryCheckpointStore::new();
        store.create_session(None, Some("sess-1")).await.unwrap();
        store
            .put("sess-1", &AgentState::new("sess-1", "s"))
            .await
            .unwrap();

        assert!(store.delete("sess-1").await.unwrap());
        assert!(store.get("sess-1").await.unwrap().is_none());
        assert!(store.session_info("sess-1").await.unwrap().is_none());
        assert!(!store.delete("sess-1").await.unwrap());
    }
}
