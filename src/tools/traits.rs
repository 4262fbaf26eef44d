//! Core tool trait

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::types::{FunctionDefinition, ToolDefinition};
use crate::error::Result;

/// A tool that can be called by the model
///
/// Tools accept a single JSON object and return a JSON-serializable value;
/// the registry handles encoding results (and errors) into tool message
/// text. Tools whose results represent side-effectful intents rather than
/// retrievals set `user_action`, and the registry stamps their results so
/// the agent loop can harvest them.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Get the JSON Schema for tool parameters
    fn parameters_schema(&self) -> Value;

    /// Whether results represent user actions to surface to the caller
    fn user_action(&self) -> bool {
        false
    }

    /// Invoke the tool with the given arguments
    async fn invoke(&self, args: Value) -> Result<Value>;

    /// Convert to a model-facing tool definition
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: self.parameters_schema(),
            },
        }
    }
}
