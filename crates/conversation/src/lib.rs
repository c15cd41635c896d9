//! Chat backend used to answer recognized utterances.

mod client;

pub use client::{ChatReply, ChatRequest, ConversationClient, ConversationSettings};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("API key not set")]
    MissingApiKey,
    #[error("query cannot be empty")]
    EmptyQuery,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP error: {status} - {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no answer field in response")]
    MissingAnswer,
}

pub type Result<T> = std::result::Result<T, ConversationError>;

/// A request/response chat backend.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Send `query`, continuing `conversation_id` when given, or the last
    /// conversation this backend saw otherwise.
    async fn send_message(&self, query: &str, conversation_id: Option<&str>) -> Result<ChatReply>;
}
