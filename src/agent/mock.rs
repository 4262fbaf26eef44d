//! Scripted chat provider for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::agent::provider::{ChatProvider, ChatResponse};
use crate::agent::types::{GenerationOptions, Message};
use crate::error::{Error, Result};

type Responder = dyn Fn(&[Message], &GenerationOptions) -> Result<ChatResponse> + Send + Sync;

/// A `ChatProvider` driven either by a fixed response script (popped in
/// order) or by a responder closure inspecting the request.
pub struct MockProvider {
    script: Mutex<VecDeque<ChatResponse>>,
    responder: Option<Box<Responder>>,
}

impl MockProvider {
    /// Serve the given responses in order; an extra call is an error.
    pub fn scripted(responses: Vec<ChatResponse>) -> Self {
        MockProvider {
            script: Mutex::new(responses.into()),
            responder: None,
        }
    }

    /// Compute every response from the request.
    pub fn with_responder(
        responder: impl Fn(&[Message], &GenerationOptions) -> Result<ChatResponse>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        MockProvider {
            script: Mutex::new(VecDeque::new()),
            responder: Some(Box::new(responder)),
        }
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn default_model(&self) -> &str {
        "mock-model"
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<ChatResponse> {
        if let Some(responder) = &self.responder {
            return responder(messages, options);
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Provider("Mock script exhausted".to_string()))
    }
}
