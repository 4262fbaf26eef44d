//! Scratch state for one compaction engine invocation

use serde_json::Value;

/// How the engine reduces the oversized payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessingMode {
    #[default]
    /// Sequential schema refinement over chunks, raw payload uploaded
    Schema,
    /// Parallel map-reduce summarization over chunk batches
    Summarize,
}

impl ProcessingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "schema" => Some(ProcessingMode::Schema),
            "summarize" => Some(ProcessingMode::Summarize),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingMode::Schema => write!(f, "schema"),
            ProcessingMode::Summarize => write!(f, "summarize"),
        }
    }
}

/// Working state of a single compaction run.
///
/// Created per oversized tool output and discarded once the synthetic
/// tool message has been emitted.
#[derive(Debug, Default)]
pub struct CompactionState {
    /// Token-bounded chunks awaiting processing, in payload order
    pub pending_chunks: Vec<String>,
    /// Chunk currently being refined (schema path)
    pub current_chunk: Option<String>,
    /// Chunk batches for the parallel summarization path
    pub parallel_batches: Vec<Vec<String>>,
    /// Intermediate schemas, each refining the previous
    pub partial_schemas: Vec<Value>,
    /// Per-batch merged summaries, in batch order
    pub summaries: Vec<String>,
    /// Terminal schema output
    pub final_schema: Option<Value>,
    /// Terminal summary output
    pub final_summary: Option<String>,
    /// Reduction mode chosen by the decision call
    pub mode: ProcessingMode,
    /// Steering string from the originating tool call's `reason` argument
    pub reason_context: String,
    /// Free-form hints returned by the mode-decision call
    pub suggestions: Vec<String>,
    /// Sequential-mode guardrail
    pub iteration_count: u32,
}

impl CompactionState {
    /// Initialize for a payload already split into chunks
    pub fn new(chunks: Vec<String>, reason_context: String) -> Self {
        CompactionState {
            pending_chunks: chunks,
            reason_context,
            ..Default::default()
        }
    }

    /// The latest partial schema, or an empty object before the first pass
    pub fn previous_schema(&self) -> Value {
        self.partial_schemas
            .last()
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    /// Suggestions joined for prompt interpolation
    pub fn joined_suggestions(&self) -> String {
        self.suggestions.join("\n\n")
    }
}
