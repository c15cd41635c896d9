use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{ConversationBackend, ConversationError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSettings {
    /// e.g. `https://api.dify.ai/v1`
    pub base_url: String,
    pub api_key: String,
    pub user: String,
}

/// Body of `POST <base>/chat-messages`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub query: String,
    pub inputs: serde_json::Map<String, serde_json::Value>,
    pub response_mode: &'static str,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    pub fn blocking(query: &str, user: &str, conversation_id: Option<String>) -> Self {
        Self {
            query: query.to_string(),
            inputs: serde_json::Map::new(),
            response_mode: "blocking",
            user: user.to_string(),
            conversation_id: conversation_id.filter(|id| !id.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatReply {
    pub answer: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    answer: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
}

/// Parse a 2xx response body.
pub(crate) fn parse_reply(body: &str) -> Result<ChatReply> {
    let raw: RawReply = serde_json::from_str(body)?;
    let answer = raw.answer.ok_or(ConversationError::MissingAnswer)?;
    Ok(ChatReply {
        answer,
        conversation_id: raw.conversation_id.filter(|id| !id.is_empty()),
    })
}

pub struct ConversationClient {
    client: Client,
    settings: ConversationSettings,
    conversation_id: Mutex<Option<String>>,
}

impl ConversationClient {
    pub fn new(settings: ConversationSettings) -> Self {
        tracing::info!(base_url = %settings.base_url, "Conversation client initialized");
        Self {
            client: Client::new(),
            settings,
            conversation_id: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat-messages", self.settings.base_url.trim_end_matches('/'))
    }

    /// The conversation id returned by the latest reply.
    pub fn conversation_id(&self) -> Option<String> {
        self.conversation_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset_conversation(&self) {
        *self.conversation_id.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Validate inputs and build the request body without sending it.
    pub fn prepare(&self, query: &str, conversation_id: Option<&str>) -> Result<ChatRequest> {
        if query.trim().is_empty() {
            return Err(ConversationError::EmptyQuery);
        }
        if self.settings.api_key.trim().is_empty() {
            return Err(ConversationError::MissingApiKey);
        }
        let conversation_id = conversation_id
            .map(str::to_string)
            .or_else(|| self.conversation_id());
        Ok(ChatRequest::blocking(
            query,
            &self.settings.user,
            conversation_id,
        ))
    }
}

#[async_trait]
impl ConversationBackend for ConversationClient {
    async fn send_message(&self, query: &str, conversation_id: Option<&str>) -> Result<ChatReply> {
        let request = self.prepare(query, conversation_id)?;
        let url = self.endpoint();
        tracing::debug!(url = %url, continuing = request.conversation_id.is_some(), "Sending chat message");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "Chat request failed");
            return Err(ConversationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply = parse_reply(&body)?;
        if let Some(id) = &reply.conversation_id {
            *self.conversation_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_key: &str) -> ConversationClient {
        ConversationClient::new(ConversationSettings {
            base_url: "http://localhost/v1/".into(),
            api_key: api_key.into(),
            user: "murmur".into(),
        })
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(ChatRequest::blocking("hello", "murmur", None)).unwrap();
        assert_eq!(body["query"], "hello");
        assert_eq!(body["response_mode"], "blocking");
        assert_eq!(body["user"], "murmur");
        assert!(body["inputs"].as_object().unwrap().is_empty());
        assert!(body.get("conversation_id").is_none());

        let body =
            serde_json::to_value(ChatRequest::blocking("hi", "u", Some("conv-1".into()))).unwrap();
        assert_eq!(body["conversation_id"], "conv-1");
    }

    #[test]
    fn test_endpoint_trims_slash() {
        assert_eq!(client("k").endpoint(), "http://localhost/v1/chat-messages");
    }

    #[test]
    fn test_prepare_rejects_before_sending() {
        assert!(matches!(
            client("k").prepare("  ", None),
            Err(ConversationError::EmptyQuery)
        ));
        assert!(matches!(
            client("").prepare("hello", None),
            Err(ConversationError::MissingApiKey)
        ));
    }

    #[test]
    fn test_prepare_reuses_remembered_conversation() {
        let c = client("k");
        *c.conversation_id.lock().unwrap() = Some("conv-9".into());
        assert_eq!(
            c.prepare("hello", None).unwrap().conversation_id.as_deref(),
            Some("conv-9")
        );
        assert_eq!(
            c.prepare("hello", Some("explicit")).unwrap().conversation_id.as_deref(),
            Some("explicit")
        );
        c.reset_conversation();
        assert_eq!(c.prepare("hello", None).unwrap().conversation_id, None);
    }

    #[test]
    fn test_parse_reply() {
        let reply = parse_reply(r#"{"answer": "hi there", "conversation_id": "c1"}"#).unwrap();
        assert_eq!(reply.answer, "hi there");
        assert_eq!(reply.conversation_id.as_deref(), Some("c1"));

        assert!(matches!(
            parse_reply(r#"{"conversation_id": "c1"}"#),
            Err(ConversationError::MissingAnswer)
        ));
        assert!(matches!(parse_reply("<html>"), Err(ConversationError::Parse(_))));
    }

    #[tokio::test]
    async fn test_send_message_validates_without_network() {
        let c = client("");
        let err = c.send_message("hello", None).await.unwrap_err();
        assert!(matches!(err, ConversationError::MissingApiKey));
    }
}
