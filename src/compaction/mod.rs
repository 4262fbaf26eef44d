//! Compaction engine - replaces oversized tool outputs with compact
//! synthetic tool messages
//!
//! Triggered by the agent loop when a tool result exceeds the token
//! threshold. The engine chunks the payload, asks a decision model whether
//! the downstream use is programmatic (schema discovery) or narrative
//! (summarization), runs the matching reduction, and emits exactly one
//! synthetic tool message paired with the original tool call id.
//!
//! Schema discovery refines a schema sequentially across chunks and uploads
//! the raw payload to blob storage; the synthetic message carries the
//! schema plus the payload URL. Summarization fans out over chunk batches
//! in parallel, merges each batch, then merges the batch summaries into a
//! final summary.

mod prompts;
mod state;

use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::agent::provider::ChatProvider;
use crate::agent::state::AgentState;
use crate::agent::types::{GenerationOptions, Message};
use crate::blob::BlobStore;
use crate::error::{Error, Result};
use crate::tokens::TokenAccountant;

pub use state::{CompactionState, ProcessingMode};

/// Compaction engine tunables
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Model used for decision, refinement, summarization, and merging
    pub model: String,
    /// Chunk size in tokens
    pub chunk_tokens: usize,
    /// Chunks per summarization batch
    pub batch_size: usize,
    /// Maximum sequential schema refinement passes (guard: count <= this)
    pub max_schema_passes: u32,
    /// Key prefix for raw payload uploads
    pub key_prefix: String,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        CompactionConfig {
            model: "gpt-4o-mini".to_string(),
            chunk_tokens: 5_000,
            batch_size: 8,
            max_schema_passes: 3,
            key_prefix: "tool-payloads".to_string(),
        }
    }
}

/// The outcome of the mode-decision call
#[derive(Debug)]
struct ModeDecision {
    mode: ProcessingMode,
    suggestions: Vec<String>,
}

/// Compaction engine
pub struct CompactionEngine {
    provider: Arc<dyn ChatProvider>,
    blobs: Arc<dyn BlobStore>,
    accountant: TokenAccountant,
    config: CompactionConfig,
}

impl CompactionEngine {
    /// Create a new engine
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        blobs: Arc<dyn BlobStore>,
        accountant: TokenAccountant,
        config: CompactionConfig,
    ) -> Self {
        CompactionEngine {
            provider,
            blobs,
            accountant,
            config,
        }
    }

    /// Compact the agent state's currently selected tool output.
    ///
    /// Returns a synthetic tool message carrying the original tool call id.
    /// The synthetic content is guaranteed to estimate strictly below the
    /// original; a reduction that grows the content degrades to truncation.
    pub async fn compact(&self, agent_state: &AgentState) -> Result<Message> {
        let tool_output = agent_state
            .current_tool_output
            .as_ref()
            .ok_or_else(|| Error::Compaction("No tool output selected".to_string()))?;
        let call_id = tool_output
            .tool_call_id
            .clone()
            .ok_or_else(|| Error::Compaction("Tool output missing call id".to_string()))?;

        let reason_context = steering_context(agent_state, &call_id);
        let original = tool_output.content.as_str();
        let chunks = self
            .accountant
            .chunk_text(original, self.config.chunk_tokens);

        info!(
            session_id = %agent_state.session_id,
            call_id = %call_id,
            chunks = chunks.len(),
            "Compacting oversized tool output"
        );

        let mut state = CompactionState::new(chunks, reason_context);

        let decision = self.decide_mode(&state).await;
        state.mode = decision.mode;
        state.suggestions = decision.suggestions;

        let content = match state.mode {
            ProcessingMode::Schema => {
                self.run_schema_discovery(&mut state).await?;
                let data_uri = self
                    .upload_payload(&agent_state.session_id, &call_id, original)
                    .await?;
                json!({
                    "data_schema": state.final_schema.unwrap_or_else(|| json!({})),
                    "data_uri": data_uri,
                })
                .to_string()
            }
            ProcessingMode::Summarize => {
                self.run_summarization(&mut state).await;
                state
                    .final_summary
                    .unwrap_or_else(|| "No summary generated".to_string())
            }
        };

        let content = self.enforce_monotonicity(original, content);
        Ok(Message::tool(call_id, content))
    }

    /// Ask the decision model to choose a processing mode over the first
    /// chunk. Falls back to schema discovery when the reply is unusable.
    async fn decide_mode(&self, state: &CompactionState) -> ModeDecision {
        let first_chunk = state.pending_chunks.first().map(String::as_str).unwrap_or("");
        let prompt = prompts::decision(&state.reason_context, first_chunk);

        let fallback = ModeDecision {
            mode: ProcessingMode::Schema,
            suggestions: Vec::new(),
        };

        let reply = match self.complete(prompts::DECISION_SYSTEM, prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Mode decision call failed, defaulting to schema: {}", e);
                return fallback;
            }
        };

        let Some(parsed) = parse_llm_json(&reply) else {
            warn!("Unparseable mode decision, defaulting to schema");
            return fallback;
        };

        let mode = parsed
            .get("mode")
            .and_then(Value::as_str)
            .and_then(ProcessingMode::parse)
            .unwrap_or(ProcessingMode::Schema);
        let suggestions = parsed
            .get("suggestions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        debug!(
            mode = %mode,
            reasoning = parsed.get("reasoning").and_then(serde_json::Value::as_str).unwrap_or(""),
            "Compaction mode decided"
        );

        ModeDecision { mode, suggestions }
    }

    /// Sequential schema refinement: each pass extends the previous schema
    /// with the next chunk, bounded by the pass guard.
    async fn run_schema_discovery(&self, state: &mut CompactionState) -> Result<()> {
        while !state.pending_chunks.is_empty()
            && state.iteration_count <= self.config.max_schema_passes
        {
            let chunk = state.pending_chunks.remove(0);
            state.current_chunk = Some(chunk);
            let chunk = state.current_chunk.as_deref().unwrap_or("");

            let prompt = prompts::schema(chunk, &state.previous_schema());
            let reply = self.complete(prompts::SCHEMA_SYSTEM, prompt).await?;

            match parse_llm_json(&reply) {
                Some(schema) => state.partial_schemas.push(schema),
                None => warn!(
                    "Unparseable schema reply on pass {}, keeping previous",
                    state.iteration_count
                ),
            }
            state.iteration_count += 1;
        }

        state.final_schema = Some(state.previous_schema());
        Ok(())
    }

    /// Parallel map-reduce summarization: batches of chunks summarize
    /// concurrently, each batch merges into an intermediate summary, and a
    /// final merge produces the terminal summary. Model failures inside a
    /// batch surface as error text in place, never as an abort.
    async fn run_summarization(&self, state: &mut CompactionState) {
        state.parallel_batches = state
            .pending_chunks
            .drain(..)
            .collect::<Vec<_>>()
            .chunks(self.config.batch_size)
            .map(|batch| batch.to_vec())
            .collect();

        let reason_context = state.reason_context.clone();
        let suggestions = state.joined_suggestions();

        let batch_futures = state
            .parallel_batches
            .iter()
            .map(|batch| self.summarize_batch(batch, &reason_context, &suggestions));
        state.summaries = join_all(batch_futures).await;

        if state.summaries.is_empty() {
            state.final_summary = Some("No summary generated".to_string());
            return;
        }

        let prompt = prompts::final_merge(
            &state.summaries.join(prompts::SUMMARY_SEPARATOR),
            &reason_context,
            &suggestions,
        );
        let final_summary = match self.complete(prompts::FINAL_MERGE_SYSTEM, prompt).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Final summary merge failed: {}", e);
                format!("Error merging summaries: {}", e)
            }
        };
        state.final_summary = Some(final_summary);
    }

    /// Summarize one batch: per-chunk calls run in parallel, then the batch
    /// merger folds them into a single intermediate summary.
    async fn summarize_batch(
        &self,
        batch: &[String],
        reason_context: &str,
        suggestions: &str,
    ) -> String {
        let chunk_futures = batch.iter().map(|chunk| {
            let prompt = prompts::summarize(chunk, reason_context, suggestions, "");
            self.complete(prompts::SUMMARIZE_SYSTEM, prompt)
        });

        let mut partials = Vec::with_capacity(batch.len());
        for result in join_all(chunk_futures).await {
            match result {
                Ok(partial) => partials.push(partial),
                Err(e) => {
                    warn!("Chunk summarization failed: {}", e);
                    return format!("Error merging summaries: {}", e);
                }
            }
        }

        let prompt = prompts::batch_merge(
            &partials.join(prompts::SUMMARY_SEPARATOR),
            reason_context,
            suggestions,
        );
        match self.complete(prompts::BATCH_MERGE_SYSTEM, prompt).await {
            Ok(merged) => merged,
            Err(e) => {
                warn!("Batch merge failed: {}", e);
                format!("Error merging summaries: {}", e)
            }
        }
    }

    /// Upload the raw payload for the schema branch. Failure here is fatal
    /// for the whole compaction: the model must not see a schema without a
    /// URI to fetch the data from.
    async fn upload_payload(&self, session_id: &str, call_id: &str, payload: &str) -> Result<String> {
        let key = format!("{}/{}/{}.json", self.config.key_prefix, session_id, call_id);
        self.blobs.upload(payload.as_bytes(), &key).await
    }

    /// Post-condition: the synthetic content must estimate strictly below
    /// the original. A violation degrades to a length-truncated summary.
    fn enforce_monotonicity(&self, original: &str, synthetic: String) -> String {
        let original_tokens = self.accountant.estimate_text(original);
        if self.accountant.estimate_text(&synthetic) < original_tokens {
            return synthetic;
        }

        warn!(
            "Compaction produced {} tokens from {}, degrading to truncation",
            self.accountant.estimate_text(&synthetic),
            original_tokens
        );

        let budget = original_tokens.saturating_sub(1);
        let mut end = synthetic.len();
        loop {
            end /= 2;
            while end > 0 && !synthetic.is_char_boundary(end) {
                end -= 1;
            }
            let candidate = &synthetic[..end];
            if end == 0 || self.accountant.estimate_text(candidate) < budget.max(1) {
                return format!("{}... [truncated]", candidate);
            }
        }
    }

    /// One-shot completion against the compaction model.
    async fn complete(&self, system: &str, user: String) -> Result<String> {
        let messages = [Message::system(system), Message::user(user)];
        let options = GenerationOptions {
            model: Some(self.config.model.clone()),
            temperature: Some(0.0),
            ..Default::default()
        };
        let response = self.provider.generate(&messages, &options).await?;
        Ok(response.content)
    }
}

/// Locate the `reason` argument of the tool call that produced the given
/// tool output, scanning the prior assistant message.
fn steering_context(agent_state: &AgentState, call_id: &str) -> String {
    agent_state
        .last_assistant()
        .and_then(|assistant| {
            assistant
                .tool_calls()
                .iter()
                .find(|call| call.id == call_id)
        })
        .and_then(|call| call.reason())
        .unwrap_or("")
        .to_string()
}

/// Parse a JSON object out of an LLM reply, tolerating Markdown code fences.
fn parse_llm_json(reply: &str) -> Option<Value> {
    let trimmed = reply.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::MockProvider;
    use crate::agent::provider::ChatResponse;
    use crate::agent::state::AgentState;
    use crate::agent::types::ToolCall;
    use crate::blob::testing::CountingBlobStore;
    use std::sync::atomic::Ordering;

    /// Routes compaction model calls by their system prompt.
    fn routing_provider(mode: &'static str) -> Arc<MockProvider> {
        Arc::new(MockProvider::with_responder(move |messages, _| {
            let system = &messages[0].content;
            let reply = if system == prompts::DECISION_SYSTEM {
                format!(
                    r#"{{"mode": "{}", "reasoning": "test", "suggestions": ["focus on totals"]}}"#,
                    mode
                )
            } else if system == prompts::SCHEMA_SYSTEM {
                r#"{"format": "list of JSON objects", "schema": {"id": "number"}, "enums": {}}"#
                    .to_string()
            } else if system == prompts::SUMMARIZE_SYSTEM {
                "partial summary".to_string()
            } else if system == prompts::BATCH_MERGE_SYSTEM {
                "intermediate summary".to_string()
            } else {
                "final summary with totals".to_string()
            };
            Ok(ChatResponse::text(reply))
        }))
    }

    fn oversized_state(reason: &str) -> AgentState {
        let mut state = AgentState::new("sess-1", "s");
        state.messages.push(Message::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "call-1".to_string(),
                name: "bulk".to_string(),
                arguments: serde_json::json!({"reason": reason}),
            }],
        ));
        let payload = (0..4000)
            .map(|i| format!(r#"{{"id": {}, "value": "record body {}"}}"#, i, i))
            .collect::<Vec<_>>()
            .join("\n");
        state.current_tool_output = Some(Message::tool("call-1", payload));
        state
    }

    fn engine(provider: Arc<MockProvider>, blobs: Arc<CountingBlobStore>) -> CompactionEngine {
        CompactionEngine::new(
            provider,
            blobs,
            TokenAccountant::approximate(),
            CompactionConfig {
                chunk_tokens: 500,
                ..CompactionConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn summarize_mode_emits_final_summary() {
        let blobs = Arc::new(CountingBlobStore::default());
        let engine = engine(routing_provider("summarize"), blobs.clone());
        let state = oversized_state("summarize the records");

        let synthetic = engine.compact(&state).await.unwrap();

        assert_eq!(synthetic.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(synthetic.content, "final summary with totals");
        // Summarize branch never touches blob storage.
        assert_eq!(blobs.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn schema_mode_uploads_exactly_once() {
        let blobs = Arc::new(CountingBlobStore::default());
        let engine = engine(routing_provider("schema"), blobs.clone());
        let state = oversized_state("analyze structure");

        let synthetic = engine.compact(&state).await.unwrap();
        let parsed: Value = serde_json::from_str(&synthetic.content).unwrap();

        assert_eq!(parsed["data_schema"]["schema"]["id"], "number");
        assert!(parsed["data_uri"].as_str().unwrap().contains("call-1"));
        assert_eq!(blobs.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn schema_mode_fails_when_upload_fails() {
        let blobs = Arc::new(CountingBlobStore::failing());
        let engine = engine(routing_provider("schema"), blobs);
        let state = oversized_state("analyze structure");

        let result = engine.compact(&state).await;
        assert!(matches!(result, Err(Error::Blob(_))));
    }

    #[tokio::test]
    async fn synthetic_content_is_smaller_than_original() {
        let blobs = Arc::new(CountingBlobStore::default());
        let engine = engine(routing_provider("summarize"), blobs);
        let state = oversized_state("summarize");

        let original_tokens = TokenAccountant::approximate()
            .estimate_text(&state.current_tool_output.as_ref().unwrap().content);
        let synthetic = engine.compact(&state).await.unwrap();
        let synthetic_tokens = TokenAccountant::approximate().estimate_text(&synthetic.content);

        assert!(synthetic_tokens < original_tokens);
    }

    #[tokio::test]
    async fn oversized_reduction_degrades_to_truncation() {
        // A "summary" longer than the original must be cut down, not folded
        // into the conversation at full size.
        let provider = Arc::new(MockProvider::with_responder(|messages, _| {
            let system = &messages[0].content;
            let reply = if system == prompts::DECISION_SYSTEM {
                r#"{"mode": "summarize", "reasoning": "", "suggestions": []}"#.to_string()
            } else {
                "padding ".repeat(100_000)
            };
            Ok(ChatResponse::text(reply))
        }));
        let engine = engine(provider, Arc::new(CountingBlobStore::default()));
        let state = oversized_state("summarize");

        let original_tokens = TokenAccountant::approximate()
            .estimate_text(&state.current_tool_output.as_ref().unwrap().content);
        let synthetic = engine.compact(&state).await.unwrap();

        assert!(synthetic.content.ends_with("[truncated]"));
        assert!(
            TokenAccountant::approximate().estimate_text(&synthetic.content) < original_tokens
        );
    }

    #[tokio::test]
    async fn summarizer_errors_surface_in_place() {
        let provider = Arc::new(MockProvider::with_responder(|messages, _| {
            let system = &messages[0].content;
            if system == prompts::DECISION_SYSTEM {
                Ok(ChatResponse::text(
                    r#"{"mode": "summarize", "reasoning": "", "suggestions": []}"#,
                ))
            } else if system == prompts::SUMMARIZE_SYSTEM {
                Err(Error::Provider("summarizer down".to_string()))
            } else if system == prompts::FINAL_MERGE_SYSTEM {
                // Final merge echoes its input so the batch error text is
                // observable in the synthetic message.
                Ok(ChatResponse::text(&messages[1].content))
            } else {
                Ok(ChatResponse::text("merged"))
            }
        }));
        let engine = engine(provider, Arc::new(CountingBlobStore::default()));
        let state = oversized_state("summarize");

        let synthetic = engine.compact(&state).await.unwrap();
        assert!(synthetic.content.contains("Error merging summaries"));
    }

    #[test]
    fn parse_llm_json_strips_code_fences() {
        let fenced = "```json\n{\"mode\": \"schema\"}\n```";
        assert_eq!(parse_llm_json(fenced).unwrap()["mode"], "schema");

        let bare = "{\"mode\": \"summarize\"}";
        assert_eq!(parse_llm_json(bare).unwrap()["mode"], "summarize");

        assert!(parse_llm_json("not json at all").is_none());
    }

    #[test]
    fn steering_context_matches_call_id() {
        let state = oversized_state("summarize the records");
        assert_eq!(steering_context(&state, "call-1"), "summarize the records");
        assert_eq!(steering_context(&state, "call-9"), "");
    }
}
