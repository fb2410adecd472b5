//! Chat-completion transport seam.
//!
//! The pipeline talks to the provider only through [`AiChatClient`]; the
//! OpenRouter adapter lives in [`openrouter`] and tests swap in fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;

pub mod openrouter;

pub use openrouter::OpenRouterClient;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// One chat-completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct AiRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl AiRequest {
    pub fn builder(model: impl Into<String>) -> AiRequestBuilder {
        AiRequestBuilder {
            model: model.into(),
            messages: Vec::new(),
            temperature: 0.7,
            max_tokens: 4000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiRequestBuilder {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

impl AiRequestBuilder {
    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage {
            role: Role::System,
            content: content.into(),
        });
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage {
            role: Role::User,
            content: content.into(),
        });
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn build(self) -> AiRequest {
        AiRequest {
            model: self.model,
            messages: self.messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Provider answer reduced to the part the pipeline consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiResponse {
    /// First non-blank content field; never empty on success.
    pub content: String,
    pub status: u16,
    pub raw_body: String,
}

#[async_trait]
pub trait AiChatClient: Send + Sync {
    async fn send(&self, request: &AiRequest) -> PipelineResult<AiResponse>;
}
