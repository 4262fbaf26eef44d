//! Chat provider trait - abstract interface for chat model backends
//!
//! The trait-based approach enables testing with mock providers and
//! runtime backend switching based on configuration.

use async_trait::async_trait;

use crate::agent::types::{GenerationOptions, Message, ToolCall, UsageStats};
use crate::error::Result;

/// Response from a chat model
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated text content (may be empty when the model only calls tools)
    pub content: String,
    /// Tool calls requested by the model
    pub tool_calls: Vec<ToolCall>,
    /// Finish reason (stop, tool_calls, length, ...)
    pub finish_reason: Option<String>,
    /// Token usage statistics
    pub usage: Option<UsageStats>,
}

impl ChatResponse {
    /// A plain text response with no tool calls
    pub fn text(content: impl Into<String>) -> Self {
        ChatResponse {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".to_string()),
            usage: None,
        }
    }

    /// A response requesting the given tool calls
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        ChatResponse {
            content: String::new(),
            tool_calls: calls,
            finish_reason: Some("tool_calls".to_string()),
            usage: None,
        }
    }

    /// Convert into an assistant message for the conversation log
    pub fn into_message(self) -> Message {
        if self.tool_calls.is_empty() {
            Message::assistant(self.content)
        } else {
            Message::assistant_with_tools(self.content, self.tool_calls)
        }
    }
}

/// Abstract interface for chat model backends
///
/// Implement this trait to add support for new model APIs. The provider
/// handles authentication, request formatting, and response parsing; it
/// must be safe for concurrent calls.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Get the default model id for this provider
    fn default_model(&self) -> &str;

    /// Generate a response for the given conversation
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<ChatResponse>;
}
