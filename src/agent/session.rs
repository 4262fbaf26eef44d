//! Session facade - the public entry point for conversation turns
//!
//! Binds a stable session id across invocations: resolves or creates the
//! session, loads the checkpointed state (or seeds a fresh one with the
//! system prompt), appends the user turn, and drives the agent loop to
//! termination. Invoking without a query resumes an interrupted turn from
//! wherever the checkpoint left off.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::agent::planner_loop::AgentLoop;
use crate::agent::state::{AgentState, LoopPhase};
use crate::checkpoint::CheckpointStore;
use crate::error::{Error, Result};

/// Projection of a completed turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    /// The query that started the turn (empty on resume)
    pub query: String,
    /// Terminal assistant message text
    pub response: String,
    /// Session id the turn ran under
    pub session_id: String,
    /// User actions harvested this turn
    pub user_actions: Vec<Value>,
    /// Number of messages in the conversation
    pub conversation_length: usize,
    /// Whether the turn completed without a fatal error
    pub success: bool,
    /// Fatal error description, when `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Session facade over the agent loop and checkpoint store
pub struct SessionFacade {
    agent_loop: AgentLoop,
    checkpoints: Arc<dyn CheckpointStore>,
    system_prompt: String,
}

impl SessionFacade {
    pub fn new(
        agent_loop: AgentLoop,
        checkpoints: Arc<dyn CheckpointStore>,
        system_prompt: String,
    ) -> Self {
        SessionFacade {
            agent_loop,
            checkpoints,
            system_prompt,
        }
    }

    /// Run one turn. `query = None` resumes an interrupted turn for an
    /// existing session instead of starting a new one.
    pub async fn invoke(
        &self,
        query: Option<&str>,
        session_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<TurnResult> {
        let session_id = self.checkpoints.create_session(user_id, session_id).await?;

        let mut state = match self.checkpoints.get(&session_id).await? {
            Some(state) => state,
            None => AgentState::new(&session_id, &self.system_prompt),
        };

        match query {
            Some(query) => {
                info!(session_id = %session_id, "Starting turn");
                state.begin_turn(query);
                self.checkpoints.put(&session_id, &state).await?;
            }
            None => {
                if state.phase == LoopPhase::Done || state.messages.len() <= 1 {
                    return Err(Error::InvalidInput(format!(
                        "session {} has no interrupted turn to resume",
                        session_id
                    )));
                }
                info!(session_id = %session_id, phase = ?state.phase, "Resuming turn");
            }
        }

        let outcome = self.agent_loop.run(&mut state).await;

        let result = TurnResult {
            query: query.unwrap_or_default().to_string(),
            response: state.final_response(),
            session_id: session_id.clone(),
            user_actions: state.turn_user_actions().to_vec(),
            conversation_length: state.messages.len(),
            success: outcome.is_ok(),
            error: outcome.as_ref().err().map(ToString::to_string),
        };

        if let Err(e) = outcome {
            warn!(session_id = %session_id, "Turn failed: {}", e);
        }

        Ok(result)
    }
}
