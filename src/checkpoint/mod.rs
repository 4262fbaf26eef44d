//! Checkpoint store - persisted agent loop state keyed by session id
//!
//! The agent loop writes the full `AgentState` after every state
//! transition; the store's only guarantees are read-your-writes per
//! session id, erasure on delete, and last-writer-wins for concurrent
//! writers of the same session.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::state::AgentState;
use crate::error::Result;

pub use memory::MemoryCheckpointStore;
pub use postgres::{init_pool, migrations, PostgresCheckpointStore};

/// Session metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Stable session/thread identifier
    pub session_id: String,
    /// Optional owning user
    pub user_id: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Session status ("active", ...)
    pub status: String,
}

/// Abstract interface for checkpoint persistence
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Create a session, or return the existing one when `session_id` is
    /// supplied and already known. Generates a new id when none is given.
    async fn create_session(
        &self,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<String>;

    /// Get session metadata
    async fn session_info(&self, session_id: &str) -> Result<Option<SessionInfo>>;

    /// Load the checkpointed state for a session
    async fn get(&self, session_id: &str) -> Result<Option<AgentState>>;

    /// Persist the state for a session (upsert, last writer wins)
    async fn put(&self, session_id: &str, state: &AgentState) -> Result<()>;

    /// Delete a session and its checkpoint. Returns whether it existed.
    async fn delete(&self, session_id: &str) -> Result<bool>;
}
