//! Chat-completion collaborator.
//!
//! [`ChatModel`] is the seam between the response generator and the hosted
//! model. [`OpenAiChatClient`] speaks the OpenAI-compatible
//! `/v1/chat/completions` protocol; tests substitute scripted models.

pub mod client;

pub use client::OpenAiChatClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged unit of the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub turns: Vec<Turn>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub total_tokens: u64,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion. Any transport, status or decoding problem is an error.
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<Completion>;
}
