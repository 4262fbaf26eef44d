//! Per-turn agent loop state
//!
//! `AgentState` is the unit of persistence: the loop checkpoints it after
//! every state transition, so a crashed or restarted process resumes the
//! same turn at the exact phase it left off, without re-invoking the model
//! or re-dispatching completed tools.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::types::{Message, Role};

/// Phase of the agent loop state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// Bind the tool catalog to the model (once per session)
    BindTools,
    /// Invoke the model on the conversation
    Model,
    /// Invoke every tool call on the last assistant message
    DispatchTools,
    /// Advance the cursor over pending tool outputs
    SelectNextOutput,
    /// Fold the selected output back into the conversation
    FoldOutput,
    /// Terminal state for the turn
    Done,
}

/// The working state of one conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Stable thread identifier
    pub session_id: String,
    /// Ordered conversation messages
    pub messages: Vec<Message>,
    /// Tool messages produced by the last dispatch, not yet folded back
    pub pending_tool_outputs: Vec<Message>,
    /// Cursor into `pending_tool_outputs`; -1 means none selected
    pub current_index: i32,
    /// The tool message currently being post-processed
    pub current_tool_output: Option<Message>,
    /// True once the model has been bound to the catalog for this session
    pub tools_bound: bool,
    /// Side-effect descriptors harvested from tool results, append-only
    pub user_actions: Vec<Value>,
    /// Index into `user_actions` where the current turn began
    #[serde(default)]
    pub turn_actions_start: usize,
    /// Current loop phase, persisted for mid-turn resume
    pub phase: LoopPhase,
    /// State transitions consumed by the current turn
    pub transitions: u32,
}

impl AgentState {
    /// Create a fresh state seeded with a system prompt
    pub fn new(session_id: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        AgentState {
            session_id: session_id.into(),
            messages: vec![Message::system(system_prompt)],
            pending_tool_outputs: Vec::new(),
            current_index: -1,
            current_tool_output: None,
            tools_bound: false,
            user_actions: Vec::new(),
            turn_actions_start: 0,
            phase: LoopPhase::BindTools,
            transitions: 0,
        }
    }

    /// Begin a new turn: append the user message and reset the loop cursor.
    pub fn begin_turn(&mut self, query: impl Into<String>) {
        self.messages.push(Message::user(query));
        self.pending_tool_outputs.clear();
        self.current_index = -1;
        self.current_tool_output = None;
        self.turn_actions_start = self.user_actions.len();
        self.transitions = 0;
        self.phase = if self.tools_bound {
            LoopPhase::Model
        } else {
            LoopPhase::BindTools
        };
    }

    /// User actions harvested during the current turn
    pub fn turn_user_actions(&self) -> &[Value] {
        &self.user_actions[self.turn_actions_start.min(self.user_actions.len())..]
    }

    /// The last assistant message, if any
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
    }

    /// Text of the terminal assistant message for this turn
    pub fn final_response(&self) -> String {
        self.last_assistant()
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    /// Tool call ids announced by assistant messages but not yet answered
    /// by a later tool message.
    pub fn unanswered_tool_calls(&self) -> Vec<&str> {
        let mut unanswered: Vec<&str> = Vec::new();
        for msg in &self.messages {
            match msg.role {
                Role::Assistant => {
                    for call in msg.tool_calls() {
                        unanswered.push(&call.id);
                    }
                }
                Role::Tool => {
                    if let Some(id) = msg.tool_call_id.as_deref() {
                        unanswered.retain(|pending| *pending != id);
                    }
                }
                _ => {}
            }
        }
        unanswered
    }
}
