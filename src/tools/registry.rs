//! Tool registry - manages the tool catalog for the agent loop
//!
//! Holds native tools and tools derived from datasource methods. Methods
//! registered under the same tool name (within or across datasources)
//! unify into a single action-dispatched tool.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::info;

use crate::agent::types::{ToolCall, ToolDefinition};
use crate::datasource::{DataSource, MethodSpec};

use super::traits::Tool;

/// Registry of available tools
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    method_groups: HashMap<String, Vec<BoundMethod>>,
}

/// A datasource method staged for tool derivation
#[derive(Clone)]
struct BoundMethod {
    source: Arc<dyn DataSource>,
    spec: MethodSpec,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        ToolRegistry {
            tools: HashMap::new(),
            method_groups: HashMap::new(),
        }
    }

    /// Register a native tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    /// Register every advertised method of a datasource.
    ///
    /// Methods sharing a tool name fold into one unified tool with an
    /// `action` discriminator; a lone method becomes a plain tool.
    pub fn register_source(&mut self, source: Arc<dyn DataSource>) {
        let specs = source.methods();
        info!(
            "Registering datasource '{}' with {} methods",
            source.name(),
            specs.len()
        );

        let mut touched = Vec::new();
        for spec in specs {
            let name = spec.tool_name.clone();
            self.method_groups
                .entry(name.clone())
                .or_default()
                .push(BoundMethod {
                    source: source.clone(),
                    spec,
                });
            touched.push(name);
        }

        for name in touched {
            let group = self.method_groups[&name].clone();
            self.tools
                .insert(name.clone(), Box::new(DataSourceTool::new(name, group)));
        }
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions for model binding
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool call, returning the tool message content.
    ///
    /// Protocol errors (unknown tool, tool failure) become structured error
    /// text rather than crashing the loop; the model can recover from them.
    pub async fn execute(&self, call: &ToolCall) -> String {
        let Some(tool) = self.get(&call.name) else {
            return json!({"error": format!("unknown tool: {}", call.name)}).to_string();
        };

        match tool.invoke(call.arguments.clone()).await {
            Ok(mut value) => {
                if tool.user_action() {
                    value = stamp_user_action(value, tool.name());
                }
                match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                }
            }
            Err(e) => json!({"error": e.to_string()}).to_string(),
        }
    }

    /// Get tool count
    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// List tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

/// Stamp a tool result as a user action.
///
/// Objects get the flag inserted (an existing flag is preserved); other
/// values are wrapped in an envelope carrying the payload.
pub(crate) fn stamp_user_action(value: Value, source: &str) -> Value {
    match value {
        Value::Object(mut map) => {
            map.entry("user_action").or_insert(Value::Bool(true));
            Value::Object(map)
        }
        other => json!({
            "user_action": true,
            "data": other,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "source": source,
        }),
    }
}

// ---- Datasource-derived tools ----

/// A tool backed by one or more datasource methods sharing a tool name.
struct DataSourceTool {
    name: String,
    description: String,
    schema: Value,
    methods: Vec<BoundMethod>,
}

impl DataSourceTool {
    fn new(name: String, methods: Vec<BoundMethod>) -> Self {
        let (description, schema) = if methods.len() > 1 {
            (unified_description(&name, &methods), unified_schema(&methods))
        } else {
            let spec = &methods[0].spec;
            (spec.description.clone(), simple_schema(spec))
        };

        DataSourceTool {
            name,
            description,
            schema,
            methods,
        }
    }

    async fn invoke_method(&self, bound: &BoundMethod, args: Value) -> crate::error::Result<Value> {
        let value = bound.source.call(&bound.spec.method, args).await?;
        if bound.spec.user_action {
            Ok(stamp_user_action(value, bound.source.name()))
        } else {
            Ok(value)
        }
    }
}

#[async_trait::async_trait]
impl Tool for DataSourceTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn invoke(&self, args: Value) -> crate::error::Result<Value> {
        if self.methods.len() == 1 {
            return self.invoke_method(&self.methods[0], args).await;
        }

        let available: Vec<&str> = self.methods.iter().map(|m| m.spec.method.as_str()).collect();
        let Some(action) = args.get("action").and_then(Value::as_str) else {
            return Ok(json!({
                "error": "missing required parameter: action",
                "available_actions": available,
            }));
        };

        let Some(bound) = self.methods.iter().find(|m| m.spec.method == action) else {
            return Ok(json!({
                "error": format!("Unknown action: {}", action),
                "available_actions": available,
            }));
        };

        // Pass through only the parameters this action declares.
        let filtered = match &args {
            Value::Object(map) => {
                let mut kept = Map::new();
                for param in &bound.spec.params {
                    if let Some(value) = map.get(&param.name) {
                        kept.insert(param.name.clone(), value.clone());
                    }
                }
                Value::Object(kept)
            }
            other => other.clone(),
        };

        self.invoke_method(bound, filtered).await
    }
}

/// Schema for a single-method tool: declared params, declared requiredness.
fn simple_schema(spec: &MethodSpec) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in &spec.params {
        properties.insert(
            param.name.clone(),
            json!({"type": param.param_type, "description": param.description}),
        );
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Schema for a unified tool: a required `action` discriminator plus the
/// union of all method parameters, each rendered optional. Conflicting
/// declarations keep the first occurrence.
fn unified_schema(methods: &[BoundMethod]) -> Value {
    let action_lines: Vec<String> = methods
        .iter()
        .map(|m| {
            let first_sentence = m
                .spec
                .description
                .split('.')
                .next()
                .unwrap_or(&m.spec.description);
            format!("- '{}': {}", m.spec.method, first_sentence)
        })
        .collect();

    let mut properties = Map::new();
    properties.insert(
        "action".to_string(),
        json!({
            "type": "string",
            "description": format!("Action to perform:\n\n{}", action_lines.join("\n")),
        }),
    );

    for bound in methods {
        for param in &bound.spec.params {
            properties.entry(param.name.clone()).or_insert_with(|| {
                json!({"type": param.param_type, "description": param.description})
            });
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": ["action"],
    })
}

fn unified_description(name: &str, methods: &[BoundMethod]) -> String {
    let mut parts = vec![format!("Unified tool for {} with the following actions:", name)];
    for bound in methods {
        let first_sentence = bound
            .spec
            .description
            .split('.')
            .next()
            .unwrap_or(&bound.spec.description);
        parts.push(format!("- {}: {}", bound.spec.method, first_sentence));
    }
    parts.join("\n")
}
