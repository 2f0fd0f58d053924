//! Chat model capability.
//!
//! The pipeline talks to language models only through [`ChatModel`].
//! Network-backed implementations live in the `docent` app crate.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message of a rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Receives reply text as it is generated.
pub type TokenSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// A language model that completes a fully rendered prompt.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Return the assistant's reply to `messages`.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Like [`complete`](ChatModel::complete), but hands each piece of the
    /// reply to `on_token` as it arrives. Returns the whole reply.
    ///
    /// Backends without streaming deliver the reply as a single piece.
    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        on_token: TokenSink<'_>,
    ) -> Result<String> {
        let reply = self.complete(messages).await?;
        on_token(&reply);
        Ok(reply)
    }
}
