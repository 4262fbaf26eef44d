//! Token accounting - estimation and token-bounded chunking
//!
//! The agent loop and the compaction engine both need to reason about how
//! much of a model's context window a value will consume. Estimation uses
//! the model's BPE encoding when tiktoken knows it; unknown models fall
//! back to a fixed characters-per-token ratio.

use std::sync::Arc;

use serde_json::Value;
use tiktoken_rs::CoreBPE;
use tracing::debug;

/// Fallback ratio when no BPE encoding is available for the model.
const CHARS_PER_TOKEN: f64 = 3.5;

/// Punctuation boundaries used when a single line exceeds the chunk budget.
const SPLIT_PUNCTUATION: [char; 5] = [',', ';', '.', '?', '!'];

/// Estimates token counts and splits text into token-bounded chunks.
///
/// Cheap to clone; the underlying encoder is shared.
#[derive(Clone)]
pub struct TokenAccountant {
    bpe: Option<Arc<CoreBPE>>,
}

impl TokenAccountant {
    /// Create an accountant for a model. Falls back to the character ratio
    /// when tiktoken has no encoding for it.
    pub fn for_model(model: &str) -> Self {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => Some(Arc::new(bpe)),
            Err(_) => {
                debug!("No BPE encoding for model {}, using character ratio", model);
                None
            }
        };
        TokenAccountant { bpe }
    }

    /// Create an accountant that always uses the character ratio.
    pub fn approximate() -> Self {
        TokenAccountant { bpe: None }
    }

    /// Estimate the token count of a string.
    pub fn estimate_text(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => (text.len() as f64 / CHARS_PER_TOKEN) as usize,
        }
    }

    /// Estimate the token count of a JSON value, serialized with compact
    /// separators. Strings are estimated directly.
    pub fn estimate_value(&self, value: &Value) -> usize {
        match value {
            Value::String(s) => self.estimate_text(s),
            other => self.estimate_text(&other.to_string()),
        }
    }

    /// Split text into chunks of at most `max_tokens` tokens each.
    ///
    /// Splits on line boundaries, starting a new chunk when the next line
    /// would push the current one over budget. A single line that alone
    /// exceeds the budget is split at punctuation boundaries, with a hard
    /// character fallback derived from the ratio. Joining the chunks (with
    /// newlines at line-split points) reconstructs the input.
    pub fn chunk_text(&self, text: &str, max_tokens: usize) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0usize;

        for line in text.split('\n') {
            let line_tokens = self.estimate_text(line);

            if line_tokens > max_tokens {
                // Flush whatever is accumulated, then split the long line.
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                    current_tokens = 0;
                }
                chunks.extend(self.split_long_line(line, max_tokens));
                continue;
            }

            // The joining newline counts toward the budget too.
            let sep_tokens = if current.is_empty() { 0 } else { 1 };
            if !current.is_empty() && current_tokens + sep_tokens + line_tokens > max_tokens {
                chunks.push(std::mem::take(&mut current));
                current_tokens = 0;
            }

            if !current.is_empty() {
                current.push('\n');
                current_tokens += 1;
            }
            current.push_str(line);
            current_tokens += line_tokens;
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    /// Split a single overlong line at punctuation, falling back to a hard
    /// character limit when no boundary is found near the cut point.
    fn split_long_line(&self, line: &str, max_tokens: usize) -> Vec<String> {
        let char_limit = ((max_tokens as f64) * CHARS_PER_TOKEN) as usize;
        let char_limit = char_limit.max(1);

        let mut pieces = Vec::new();
        let mut remaining = line;

        while !remaining.is_empty() {
            if remaining.len() <= char_limit {
                pieces.push(remaining.to_string());
                break;
            }

            let limit = floor_char_boundary(remaining, char_limit);
            let window_start = floor_char_boundary(remaining, limit.saturating_sub(100));
            let window = &remaining[window_start..limit];

            // Prefer a punctuation boundary just before the hard cut.
            let split_at = window
                .char_indices()
                .rev()
                .find(|(_, c)| SPLIT_PUNCTUATION.contains(c))
                .map(|(i, c)| window_start + i + c.len_utf8())
                .unwrap_or(limit);

            pieces.push(remaining[..split_at].to_string());
            remaining = &remaining[split_at..];
        }

        pieces
    }
}

/// Largest index `<= at` that falls on a char boundary of `s`.
fn floor_char_boundary(s: &str, at: usize) -> usize {
    if at >= s.len() {
        return s.len();
    }
    let mut idx = at;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn estimate_text_is_positive_for_nonempty() {
        let acct = TokenAccountant::approximate();
        assert!(acct.estimate_text("hello world, this is a test") > 0);
        assert_eq!(acct.estimate_text(""), 0);
    }

    #[test]
    fn estimate_value_uses_compact_serialization() {
        let acct = TokenAccountant::approximate();
        let value = json!({"a": 1, "b": [1, 2, 3]});
        // Compact form has no spaces, so the estimate matches the compact string.
        assert_eq!(
            acct.estimate_value(&value),
            acct.estimate_text(&value.to_string())
        );
    }

    #[test]
    fn chunks_respect_token_budget() {
        let acct = TokenAccountant::approximate();
        let text = (0..200)
            .map(|i| format!("line number {} with some padding text", i))
            .collect::<Vec<_>>()
            .join("\n");

        let chunks = acct.chunk_text(&text, 50);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(acct.estimate_text(chunk) <= 50);
        }
    }

    #[test]
    fn chunk_concatenation_reconstructs_input() {
        let acct = TokenAccountant::approximate();
        let text = (0..100)
            .map(|i| format!("row {}", i))
            .collect::<Vec<_>>()
            .join("\n");

        let chunks = acct.chunk_text(&text, 20);
        // Chunks split at line boundaries, so rejoining with newlines
        // reproduces the original text.
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn overlong_line_splits_at_punctuation() {
        let acct = TokenAccountant::approximate();
        let line = "alpha, beta, gamma, delta. ".repeat(200);

        let chunks = acct.chunk_text(&line, 50);
        assert!(chunks.len() > 1);
        // No content lost: concatenation (no separators, since the splits
        // were intra-line) reproduces the line.
        assert_eq!(chunks.concat(), line);
        for chunk in &chunks[..chunks.len() - 1] {
            let last = chunk.chars().last().unwrap();
            assert!(SPLIT_PUNCTUATION.contains(&last) || chunk.len() >= 50);
        }
    }

    #[test]
    fn single_small_text_is_one_chunk() {
        let acct = TokenAccountant::approximate();
        let chunks = acct.chunk_text("just one short line", 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "just one short line");
    }
}
