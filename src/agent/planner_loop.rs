//! The agent loop - model calls, tool dispatch, and compaction
//!
//! An explicit state machine over `LoopPhase`:
//!
//! ```text
//! bind_tools -> model -> dispatch_tools -> select_next_output -> fold_output
//!                 ^                              |    ^              |
//!                 +------ (outputs drained) -----+    +--------------+
//! ```
//!
//! The model re-enters after every dispatched batch has been folded back;
//! a model response without tool calls terminates the turn. Each selected
//! tool output is either folded as-is or first replaced by the compaction
//! engine when it exceeds the token threshold.
//!
//! `AgentState` is checkpointed after every transition, so a restart at
//! any phase resumes the same turn without re-invoking the model or
//! re-dispatching completed tools.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::agent::provider::ChatProvider;
use crate::agent::state::{AgentState, LoopPhase};
use crate::agent::types::{GenerationOptions, Message, ToolDefinition};
use crate::checkpoint::CheckpointStore;
use crate::compaction::CompactionEngine;
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::tokens::TokenAccountant;
use crate::tools::ToolRegistry;

/// Configurable limits for the agent loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Hard limit on state transitions per turn
    pub max_transitions: u32,
    /// Token threshold above which tool outputs are compacted
    pub compaction_threshold: usize,
    /// Per-tool-invocation timeout
    pub tool_timeout: Duration,
}

impl From<&AgentConfig> for LoopConfig {
    fn from(config: &AgentConfig) -> Self {
        LoopConfig {
            max_transitions: config.max_transitions,
            compaction_threshold: config.compaction_threshold,
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        (&AgentConfig::default()).into()
    }
}

/// The agent loop. Shared across sessions; all per-session state lives in
/// the `AgentState` being driven.
pub struct AgentLoop {
    provider: Arc<dyn ChatProvider>,
    tools: Arc<ToolRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
    compactor: CompactionEngine,
    accountant: TokenAccountant,
    config: LoopConfig,
    /// Tool definitions captured at bind time
    bound: RwLock<Option<Arc<Vec<ToolDefinition>>>>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        tools: Arc<ToolRegistry>,
        checkpoints: Arc<dyn CheckpointStore>,
        compactor: CompactionEngine,
        accountant: TokenAccountant,
        config: LoopConfig,
    ) -> Self {
        AgentLoop {
            provider,
            tools,
            checkpoints,
            compactor,
            accountant,
            config,
            bound: RwLock::new(None),
        }
    }

    /// Recompute the bound tool definitions from the registry.
    ///
    /// Tools registered after `bind_tools` are invisible to the model until
    /// this is called; there is no hot-patching of an existing binding.
    pub async fn rebind(&self) {
        let definitions = Arc::new(self.tools.definitions());
        *self.bound.write().await = Some(definitions);
    }

    async fn bound_definitions(&self) -> Arc<Vec<ToolDefinition>> {
        if let Some(definitions) = self.bound.read().await.clone() {
            return definitions;
        }
        // A fresh process resuming a session that bound in a previous one.
        let definitions = Arc::new(self.tools.definitions());
        *self.bound.write().await = Some(definitions.clone());
        definitions
    }

    /// Drive the state machine until the turn terminates.
    ///
    /// Transport-level model and tool failures are recovered into the
    /// message stream; budget overflow and fatal compaction errors are
    /// returned to the caller after the diagnostic state is checkpointed.
    pub async fn run(&self, state: &mut AgentState) -> Result<()> {
        while state.phase != LoopPhase::Done {
            state.transitions += 1;
            if state.transitions > self.config.max_transitions {
                warn!(
                    session_id = %state.session_id,
                    transitions = state.transitions,
                    "Transition budget exceeded, terminating turn"
                );
                state.messages.push(Message::assistant(
                    "I could not complete this request within the allotted number of steps. \
                     Please try a more specific query.",
                ));
                state.phase = LoopPhase::Done;
                self.checkpoints.put(&state.session_id, state).await?;
                return Err(Error::Budget(format!(
                    "exceeded {} transitions",
                    self.config.max_transitions
                )));
            }

            debug!(
                session_id = %state.session_id,
                phase = ?state.phase,
                transition = state.transitions,
                "Loop transition"
            );

            match state.phase {
                LoopPhase::BindTools => self.bind_tools(state).await,
                LoopPhase::Model => self.run_model(state).await,
                LoopPhase::DispatchTools => self.dispatch_tools(state).await,
                LoopPhase::SelectNextOutput => {
                    if let Err(e) = self.select_next_output(state).await {
                        // Fatal compaction failure: checkpoint, then surface.
                        self.checkpoints.put(&state.session_id, state).await?;
                        return Err(e);
                    }
                }
                LoopPhase::FoldOutput => self.fold_output(state),
                LoopPhase::Done => unreachable!("loop exited before Done"),
            }

            self.checkpoints.put(&state.session_id, state).await?;
        }

        info!(
            session_id = %state.session_id,
            transitions = state.transitions,
            messages = state.messages.len(),
            "Turn complete"
        );
        Ok(())
    }

    /// Bind the full tool catalog to the model, once per session.
    async fn bind_tools(&self, state: &mut AgentState) {
        let definitions = Arc::new(self.tools.definitions());
        info!(
            session_id = %state.session_id,
            tools = definitions.len(),
            "Binding tool catalog"
        );
        *self.bound.write().await = Some(definitions);
        state.tools_bound = true;
        state.phase = LoopPhase::Model;
    }

    /// Invoke the bound model and append its response. A provider failure
    /// terminates the turn with a diagnostic message; the model itself is
    /// in no position to recover from its own transport.
    async fn run_model(&self, state: &mut AgentState) {
        let definitions = self.bound_definitions().await;
        let options = GenerationOptions {
            temperature: Some(0.0),
            tools: (!definitions.is_empty()).then(|| (*definitions).clone()),
            ..Default::default()
        };

        match self.provider.generate(&state.messages, &options).await {
            Ok(response) => {
                let message = response.into_message();
                let has_calls = message.has_tool_calls();
                state.messages.push(message);
                state.phase = if has_calls {
                    LoopPhase::DispatchTools
                } else {
                    LoopPhase::Done
                };
            }
            Err(e) => {
                warn!(session_id = %state.session_id, "Model call failed: {}", e);
                state.messages.push(Message::assistant(
                    "The model service was unavailable while handling this request. \
                     Please try again.",
                ));
                state.phase = LoopPhase::Done;
            }
        }
    }

    /// Invoke every tool call on the last assistant message, in emission
    /// order, collecting the results as pending tool outputs.
    async fn dispatch_tools(&self, state: &mut AgentState) {
        let calls = state
            .last_assistant()
            .map(|m| m.tool_calls().to_vec())
            .unwrap_or_default();

        let mut outputs = Vec::with_capacity(calls.len());
        for call in &calls {
            info!(
                session_id = %state.session_id,
                tool = %call.name,
                call_id = %call.id,
                "Dispatching tool call"
            );

            let content =
                match tokio::time::timeout(self.config.tool_timeout, self.tools.execute(call))
                    .await
                {
                    Ok(content) => content,
                    Err(_) => {
                        warn!(tool = %call.name, "Tool invocation timed out");
                        json!({"error": "timeout"}).to_string()
                    }
                };
            outputs.push(Message::tool(&call.id, content));
        }

        state.pending_tool_outputs = outputs;
        state.current_index = -1;
        state.phase = LoopPhase::SelectNextOutput;
    }

    /// Advance the cursor over pending outputs. The selected output is
    /// compacted first when it exceeds the token threshold; a drained list
    /// re-enters the model.
    async fn select_next_output(&self, state: &mut AgentState) -> Result<()> {
        state.current_index += 1;
        let index = state.current_index as usize;
        state.current_tool_output = state.pending_tool_outputs.get(index).cloned();

        let Some(output) = &state.current_tool_output else {
            state.current_index = -1;
            state.pending_tool_outputs.clear();
            state.phase = LoopPhase::Model;
            return Ok(());
        };

        let tokens = self.accountant.estimate_text(&output.content);
        if tokens > self.config.compaction_threshold {
            info!(
                session_id = %state.session_id,
                tokens,
                threshold = self.config.compaction_threshold,
                "Tool output exceeds threshold, compacting"
            );
            let synthetic = self.compactor.compact(state).await?;
            state.pending_tool_outputs[index] = synthetic.clone();
            state.current_tool_output = Some(synthetic);
        }

        state.phase = LoopPhase::FoldOutput;
        Ok(())
    }

    /// Fold the selected tool output into the conversation, harvesting any
    /// user-action payload it carries.
    fn fold_output(&self, state: &mut AgentState) {
        if let Some(output) = state.current_tool_output.take() {
            if let Some(action) = parse_user_action(&output.content) {
                debug!(session_id = %state.session_id, "Harvested user action");
                state.user_actions.push(action);
            }
            state.messages.push(output);
        }
        state.phase = LoopPhase::SelectNextOutput;
    }
}

/// A tool result payload counts as a user action when it parses as a JSON
/// object whose `user_action` field is `true`.
fn parse_user_action(content: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(content).ok()?;
    (value.get("user_action")? == &Value::Bool(true)).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::MockProvider;
    use crate::agent::provider::ChatResponse;
    use crate::agent::types::ToolCall;
    use crate::blob::testing::CountingBlobStore;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::compaction::CompactionConfig;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo text"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn invoke(&self, args: Value) -> Result<Value> {
            Ok(args["text"].clone())
        }
    }

    struct CountingTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "counting"
        }
        fn description(&self) -> &str {
            "Counts invocations"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn invoke(&self, _args: Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!("counted"))
        }
    }

    fn tool_call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: args,
        }
    }

    fn build_loop(provider: Arc<MockProvider>, registry: ToolRegistry) -> AgentLoop {
        let accountant = TokenAccountant::approximate();
        let compactor = CompactionEngine::new(
            provider.clone(),
            Arc::new(CountingBlobStore::default()),
            accountant.clone(),
            CompactionConfig::default(),
        );
        AgentLoop::new(
            provider,
            Arc::new(registry),
            Arc::new(MemoryCheckpointStore::new()),
            compactor,
            accountant,
            LoopConfig::default(),
        )
    }

    #[tokio::test]
    async fn tool_cycle_folds_results_in_emission_order() {
        let provider = Arc::new(MockProvider::scripted(vec![
            ChatResponse::tool_calls(vec![
                tool_call("call-1", "echo", json!({"text": "first"})),
                tool_call("call-2", "echo", json!({"text": "second"})),
            ]),
            ChatResponse::text("done"),
        ]));
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let agent_loop = build_loop(provider, registry);

        let mut state = AgentState::new("sess-1", "S");
        state.begin_turn("ping");
        agent_loop.run(&mut state).await.unwrap();

        assert_eq!(state.final_response(), "done");
        let tool_ids: Vec<_> = state
            .messages
            .iter()
            .filter(|m| m.role == crate::agent::types::Role::Tool)
            .map(|m| m.tool_call_id.clone().unwrap())
            .collect();
        assert_eq!(tool_ids, vec!["call-1", "call-2"]);
        assert!(state.unanswered_tool_calls().is_empty());
        assert!(state.user_actions.is_empty());
        assert_eq!(state.phase, LoopPhase::Done);
    }

    #[tokio::test]
    async fn unknown_tool_error_feeds_back_to_model() {
        let provider = Arc::new(MockProvider::scripted(vec![
            ChatResponse::tool_calls(vec![tool_call("call-1", "does_not_exist", json!({}))]),
            ChatResponse::text("that tool is unavailable"),
        ]));
        let agent_loop = build_loop(provider, ToolRegistry::new());

        let mut state = AgentState::new("sess-1", "S");
        state.begin_turn("try it");
        agent_loop.run(&mut state).await.unwrap();

        let tool_msg = state
            .messages
            .iter()
            .find(|m| m.role == crate::agent::types::Role::Tool)
            .unwrap();
        assert!(tool_msg.content.contains("unknown tool: does_not_exist"));
        assert_eq!(state.final_response(), "that tool is unavailable");
    }

    #[tokio::test]
    async fn transition_budget_yields_diagnostic_and_budget_error() {
        // The model asks for the same tool forever.
        let provider = Arc::new(MockProvider::with_responder(|_, _| {
            Ok(ChatResponse::tool_calls(vec![ToolCall {
                id: "call-x".to_string(),
                name: "echo".to_string(),
                arguments: json!({"text": "again"}),
            }]))
        }));
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let agent_loop = build_loop(provider, registry);

        let mut state = AgentState::new("sess-1", "S");
        state.begin_turn("loop forever");
        let result = agent_loop.run(&mut state).await;

        assert!(matches!(result, Err(Error::Budget(_))));
        assert!(state
            .final_response()
            .contains("could not complete this request"));
        assert_eq!(state.phase, LoopPhase::Done);
    }

    #[tokio::test]
    async fn model_failure_terminates_with_diagnostic() {
        let provider = Arc::new(MockProvider::scripted(vec![]));
        let agent_loop = build_loop(provider, ToolRegistry::new());

        let mut state = AgentState::new("sess-1", "S");
        state.begin_turn("hello");
        agent_loop.run(&mut state).await.unwrap();

        assert!(state.final_response().contains("model service"));
        assert_eq!(state.phase, LoopPhase::Done);
    }

    #[tokio::test]
    async fn user_actions_are_harvested_from_flagged_results() {
        struct QuoteTool;

        #[async_trait]
        impl Tool for QuoteTool {
            fn name(&self) -> &str {
                "swap_quote"
            }
            fn description(&self) -> &str {
                "Quote a swap"
            }
            fn parameters_schema(&self) -> Value {
                json!({"type": "object", "properties": {}})
            }
            fn user_action(&self) -> bool {
                true
            }
            async fn invoke(&self, _args: Value) -> Result<Value> {
                Ok(json!({"route": "sol->usdc"}))
            }
        }

        let provider = Arc::new(MockProvider::scripted(vec![
            ChatResponse::tool_calls(vec![tool_call("call-1", "swap_quote", json!({}))]),
            ChatResponse::text("quote ready"),
        ]));
        let mut registry = ToolRegistry::new();
        registry.register(QuoteTool);
        let agent_loop = build_loop(provider, registry);

        let mut state = AgentState::new("sess-1", "S");
        state.begin_turn("quote me");
        agent_loop.run(&mut state).await.unwrap();

        assert_eq!(state.user_actions.len(), 1);
        assert_eq!(state.user_actions[0]["route"], "sol->usdc");
        assert_eq!(state.user_actions[0]["user_action"], json!(true));

        // The folded tool message carries the stamped payload.
        let tool_msg = state
            .messages
            .iter()
            .find(|m| m.role == crate::agent::types::Role::Tool)
            .unwrap();
        assert!(tool_msg.content.contains("user_action"));
    }

    #[tokio::test]
    async fn resume_does_not_redispatch_completed_tools() {
        let calls = Arc::new(AtomicUsize::new(0));

        // Simulate a crash after dispatch_tools: pending outputs persisted,
        // phase at select_next_output.
        let mut state = AgentState::new("sess-1", "S");
        state.tools_bound = true;
        state.begin_turn("resume me");
        state.messages.push(Message::assistant_with_tools(
            "",
            vec![tool_call("call-1", "counting", json!({}))],
        ));
        state.pending_tool_outputs = vec![Message::tool("call-1", "counted")];
        state.current_index = -1;
        state.phase = LoopPhase::SelectNextOutput;
        state.transitions = 3;

        let provider = Arc::new(MockProvider::scripted(vec![ChatResponse::text(
            "finished after resume",
        )]));
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool {
            calls: calls.clone(),
        });
        let agent_loop = build_loop(provider, registry);

        agent_loop.run(&mut state).await.unwrap();

        // The persisted pending output was used; the tool never ran again.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.final_response(), "finished after resume");
        assert!(state.unanswered_tool_calls().is_empty());
    }

    #[test]
    fn user_action_parsing_requires_true_flag() {
        assert!(parse_user_action(r#"{"user_action": true, "x": 1}"#).is_some());
        assert!(parse_user_action(r#"{"user_action": false}"#).is_none());
        assert!(parse_user_action(r#"{"x": 1}"#).is_none());
        assert!(parse_user_action("not json").is_none());
        assert!(parse_user_action("\"just a string\"").is_none());
    }
}
