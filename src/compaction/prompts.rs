//! Prompt construction for the compaction engine's model calls

/// System prompt for the mode-decision call
pub const DECISION_SYSTEM: &str = "You are an AI assistant that analyzes user queries and \
tool-call context to determine the best processing approach.";

/// System prompt for schema refinement
pub const SCHEMA_SYSTEM: &str = "You are a data structure analyzer.";

/// System prompt for per-chunk summarization
pub const SUMMARIZE_SYSTEM: &str = "You are a summarizer that processes partial or complete \
tool outputs, often in JSON or plain text.";

/// System prompt for merging partial summaries into an intermediate summary
pub const BATCH_MERGE_SYSTEM: &str = "You are an assistant that merges partial summaries \
into a single intermediate summary.";

/// System prompt for the final summary merge
pub const FINAL_MERGE_SYSTEM: &str = "You are an expert at combining and synthesizing \
multiple partial summaries into a comprehensive, coherent final summary.";

/// Decision prompt: choose schema discovery or summarization from the
/// steering context and the first chunk of the payload.
pub fn decision(reason_context: &str, first_chunk: &str) -> String {
    format!(
        "Given the purpose of a tool call and the first chunk of its output, determine whether to:\n\
         1. Discover schema from the data (for data analysis, exploration, or understanding structure)\n\
         2. Summarize the data (for getting insights, key points, or conclusions)\n\n\
         Purpose of the data: {reason_context}\n\
         First chunk: {first_chunk}\n\n\
         Consider:\n\
         - Choose schema discovery only when the data will be examined programmatically: \
         code execution against it, computing aggregates, structural analysis.\n\
         - Summarization is better for insights, key findings, conclusions, overviews, \
         or listing data in human-readable prose.\n\n\
         Return JSON only:\n\
         {{\"mode\": \"schema\" or \"summarize\", \"reasoning\": \"brief explanation\", \
         \"suggestions\": [\"specific processing suggestions\"]}}"
    )
}

/// Schema-refinement prompt over one chunk, extending the previous schema.
pub fn schema(chunk: &str, previous_schema: &serde_json::Value) -> String {
    format!(
        "Given a chunk of structured data (usually JSON, stringified JSON, or an array of \
         JSON objects), return:\n\n\
         1. \"format\" - e.g. \"list of JSON objects\", \"newline-delimited JSON\", \
         \"CSV-like\", \"stringified JSON\"\n\
         2. \"schema\" - map of field names to data types (\"string\", \"number\", \
         \"boolean\", \"object\", \"array\", or \"null\"). Nested fields get nested schemas.\n\
         3. \"enums\" - fields with at most 10 distinct values, as a map of field to values.\n\n\
         Output JSON only:\n\
         {{\"format\": \"...\", \"schema\": {{...}}, \"enums\": {{...}}}}\n\n\
         If a partial schema from previous chunks is provided, use it as context and extend \
         or update it as needed.\n\
         Partial schema from previous chunks:\n{previous_schema}\n\n\
         Chunk:\n{chunk}"
    )
}

/// Per-chunk summarization prompt.
pub fn summarize(
    chunk: &str,
    reason_context: &str,
    suggestions: &str,
    previous_summary: &str,
) -> String {
    format!(
        "The tool was called for the purpose below. You are given a data chunk which may be \
         malformed or incomplete due to chunking.\n\n\
         Purpose of the data: {reason_context}\n\
         Previous summary, if any: {previous_summary}\n\
         Suggestions for summarization: {suggestions}\n\n\
         Instructions:\n\
         1. Always preserve numeric values exactly as written. Do not round, rephrase, or \
         approximate decimals.\n\
         2. Extract only the fields or details relevant to the purpose and suggestions.\n\
         3. If the chunk is part of an object or array, keep usable substructures.\n\
         4. If parsing fails, extract key-value pairs heuristically.\n\
         5. Only add new information; do not re-summarize previous content.\n\
         6. If nothing useful is found, return an empty JSON object: {{}}.\n\n\
         Chunk:\n{chunk}\n\n\
         Output: valid JSON if possible; minimal, concise, only new info."
    )
}

/// Batch merge: combine a batch's per-chunk summaries into one intermediate
/// summary, without drawing conclusions.
pub fn batch_merge(partial_summaries: &str, reason_context: &str, suggestions: &str) -> String {
    format!(
        "Combine the following partial summaries into one concise intermediate summary.\n\
         - Always preserve numeric values exactly as written.\n\
         - Do NOT draw conclusions.\n\
         - Do NOT polish or finalize.\n\
         - Preserve structure and key details for the next stage.\n\n\
         Context:\n\
         - Purpose: {reason_context}\n\
         - Suggestions: {suggestions}\n\n\
         {partial_summaries}"
    )
}

/// Final merge: produce the comprehensive final summary.
pub fn final_merge(partial_summaries: &str, reason_context: &str, suggestions: &str) -> String {
    format!(
        "Combine and refine the following partial summaries into one cohesive summary.\n\n\
         Context:\n\
         - Purpose: {reason_context}\n\
         - Suggestions: {suggestions}\n\n\
         Partial summaries to merge:\n{partial_summaries}\n\n\
         Instructions:\n\
         - Always preserve numeric values exactly as written. Do not round, rephrase, or \
         approximate decimals.\n\
         - Use the purpose and suggestions to combine related information from different \
         summaries.\n\
         - Remove duplicate information.\n\
         - Ensure the final summary is well structured based on the purpose and suggestions.\n\
         - Maintain the key insights and findings from all partial summaries.\n\
         - If there are conflicting details, note them appropriately.\n\n\
         Return a comprehensive final summary that covers all the important information."
    )
}

/// Separator between partial summaries fed to the merge prompts.
pub const SUMMARY_SEPARATOR: &str = "\n\n--- PARTIAL SUMMARY ---\n\n";
