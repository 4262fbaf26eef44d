//! Code execution tool backed by the container sandbox

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::sandbox::{CodeExecutor, ExecutionRequest, Language};

use super::traits::Tool;

/// Tool exposing sandboxed code execution to the model.
///
/// Useful for examining data fetched by other tools, e.g. a payload the
/// compaction engine replaced with a schema and a download URL.
pub struct ExecuteCodeTool {
    executor: Arc<dyn CodeExecutor>,
}

impl ExecuteCodeTool {
    pub fn new(executor: Arc<dyn CodeExecutor>) -> Self {
        ExecuteCodeTool { executor }
    }
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Execute code in an isolated sandbox and return its stdout and stderr. \
         The sandbox has no network access. Use it to compute aggregates, parse \
         structured data, or examine datasets programmatically."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The code to execute"
                },
                "requirements": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Package requirements, if any"
                },
                "language": {
                    "type": "string",
                    "enum": ["python", "node"],
                    "description": "Execution language"
                }
            },
            "required": ["code", "language"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<Value> {
        let code = args
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput("bad args: missing code".to_string()))?;
        let language: Language = args
            .get("language")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput("bad args: missing language".to_string()))?
            .parse()?;
        let requirements = args
            .get("requirements")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let result = self
            .executor
            .execute(ExecutionRequest {
                code: code.to_string(),
                requirements,
                language,
            })
            .await?;

        Ok(json!({"stdout": result.stdout, "stderr": result.stderr}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeExecutor;

    #[async_trait]
    impl CodeExecutor for FakeExecutor {
        async fn execute(&self, request: ExecutionRequest) -> Result<crate::sandbox::ExecutionResult> {
            Ok(crate::sandbox::ExecutionResult {
                stdout: format!("ran {} code", request.language),
                stderr: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn returns_stdout_and_stderr() {
        let tool = ExecuteCodeTool::new(Arc::new(FakeExecutor));
        let result = tool
            .invoke(json!({"code": "print(1)", "language": "python"}))
            .await
            .unwrap();
        assert_eq!(result["stdout"], "ran python code");
        assert_eq!(result["stderr"], "");
    }

    #[tokio::test]
    async fn rejects_unknown_language() {
        let tool = ExecuteCodeTool::new(Arc::new(FakeExecutor));
        let result = tool.invoke(json!({"code": "x", "language": "cobol"})).await;
        assert!(result.is_err());
    }
}
