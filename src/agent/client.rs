//! OpenAI-compatible chat completions client

use async_trait::async_trait;
use reqwest::{header, Client};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agent::provider::{ChatProvider, ChatResponse};
use crate::agent::types::{GenerationOptions, Message, Role, ToolCall, ToolDefinition, UsageStats};
use crate::config::ProviderConfig;
use crate::error::{Error, Result};

/// HTTP client for OpenAI-compatible chat completion APIs
#[derive(Clone)]
pub struct OpenAiCompatClient {
    client: Client,
    config: ProviderConfig,
}

impl OpenAiCompatClient {
    /// Create a new client from provider configuration
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!(
                "Bearer {}",
                config.api_key.expose_secret()
            ))
            .map_err(|e| Error::Config(format!("Invalid API key format: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(OpenAiCompatClient { client, config })
    }

    async fn send_request(&self, request: ChatCompletionRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);

        debug!("Sending chat completion request: model={}", request.model);

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => {
                    warn!("Rate limit exceeded: {}", error_text);
                    Error::RateLimit(error_text)
                }
                401 => Error::Unauthorized("Invalid API key".to_string()),
                _ => Error::Provider(format!("API error ({}): {}", status, error_text)),
            });
        }

        let body = response.json::<ChatCompletionResponse>().await?;

        if let Some(ref usage) = body.usage {
            info!(
                "Chat completion: model={}, tokens={}",
                body.model, usage.total_tokens
            );
        }

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("Empty choices in completion response".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                // Malformed argument JSON becomes an empty object; the tool
                // will surface a structured error the model can react to.
                let arguments = serde_json::from_str(&tc.function.arguments).unwrap_or_else(|e| {
                    warn!(
                        "Failed to parse tool arguments for {}: {}",
                        tc.function.name, e
                    );
                    Value::Object(Default::default())
                });
                ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason: choice.finish_reason,
            usage: body.usage,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatClient {
    fn default_model(&self) -> &str {
        &self.config.model
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<ChatResponse> {
        let request = ChatCompletionRequest {
            model: options
                .model
                .clone()
                .unwrap_or_else(|| self.config.model.clone()),
            messages: messages.iter().map(WireMessage::from).collect(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            tools: options.tools.clone(),
            tool_choice: options.tools.as_ref().map(|_| "auto".to_string()),
        };

        self.send_request(request).await
    }
}

// ---- Wire types (OpenAI chat completions format) ----

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: Role,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        let tool_calls = msg.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    call_type: "function".to_string(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect()
        });

        WireMessage {
            role: msg.role,
            content: msg.content.clone(),
            tool_call_id: msg.tool_call_id.clone(),
            tool_calls,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// Arguments as a JSON-encoded string, per the wire format
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<WireChoice>,
    usage: Option<UsageStats>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> ProviderConfig {
        ProviderConfig {
            api_key: SecretString::from("test-key"),
            base_url,
            model: "gpt-4o".to_string(),
            compaction_model: "gpt-4o-mini".to_string(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn parses_tool_call_response() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cmpl-1",
                "model": "gpt-4o",
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call-1",
                            "type": "function",
                            "function": {
                                "name": "echo",
                                "arguments": "{\"text\": \"hi\"}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            })))
            .mount(&server)
            .await;

        let client = OpenAiCompatClient::new(test_config(server.uri())).unwrap();
        let response = client
            .generate(&[Message::user("ping")], &GenerationOptions::precise())
            .await
            .unwrap();

        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "echo");
        assert_eq!(response.tool_calls[0].arguments, json!({"text": "hi"}));
        assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[tokio::test]
    async fn surfaces_api_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = OpenAiCompatClient::new(test_config(server.uri())).unwrap();
        let result = client
            .generate(&[Message::user("ping")], &GenerationOptions::precise())
            .await;

        assert!(matches!(result, Err(Error::Provider(_))));
    }
}
