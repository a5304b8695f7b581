use serde::{Deserialize, Serialize};

/// Primary request-id header; mirrored onto every outbound artifact.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Secondary request-id header, consulted when the primary is absent.
pub const REQUEST_ID_HEADER_ALT: &str = "request-id";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// One inbound chat call. Re-serialized as-is for the backend forward.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantMessage {
    #[serde(default = "assistant_role")]
    pub role: String,
    pub content: String,
}

impl AssistantMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            role: assistant_role(),
            content: content.into(),
        }
    }
}

fn assistant_role() -> String {
    "assistant".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: AssistantMessage,
    #[serde(default = "stop_reason")]
    pub finish_reason: String,
}

fn stop_reason() -> String {
    "stop".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The canonical single-reply response shape handed to the HTTP layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayResponse {
    pub id: String,
    pub object: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

/// One incremental fragment; a missing `content` means no text this chunk.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeltaMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub index: u32,
    pub delta: DeltaMessage,
    pub finish_reason: Option<String>,
}

/// One unit of the outgoing event sequence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub choices: Vec<StreamChoice>,
}

impl ChatCompletionChunk {
    /// A chunk carrying exactly one content delta.
    pub fn content_delta(id: &str, content: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: DeltaMessage {
                    role: None,
                    content: Some(content.into()),
                },
                finish_reason: None,
            }],
        }
    }
}

/// Shape expected from the backend's non-streaming reply. Only
/// `choices[0].message.content` is consumed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendResponse {
    pub choices: Vec<Choice>,
}

/// Content of the most recent "user" message, or "" when there is none.
pub fn last_user_prompt(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|msg| msg.role == "user")
        .map(|msg| msg.content.as_str())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(role: &str, content: &str) -> Message {
        Message {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn last_user_prompt_picks_most_recent_user_message() {
        let messages = vec![msg("user", "hi"), msg("assistant", "yo"), msg("user", "bye")];
        assert_eq!(last_user_prompt(&messages), "bye");
    }

    #[test]
    fn last_user_prompt_skips_non_user_roles() {
        let messages = vec![msg("system", "rules"), msg("user", "question"), msg("assistant", "answer")];
        assert_eq!(last_user_prompt(&messages), "question");
    }

    #[test]
    fn last_user_prompt_empty_when_no_user_message() {
        assert_eq!(last_user_prompt(&[]), "");
        let messages = vec![msg("assistant", "unprompted")];
        assert_eq!(last_user_prompt(&messages), "");
    }

    #[test]
    fn chat_request_defaults_apply() {
        let req: ChatRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .expect("minimal request should parse");
        assert!(!req.stream);
        assert_eq!(req.model, "default");
    }

    #[test]
    fn content_delta_chunk_serializes_without_role() {
        let chunk = ChatCompletionChunk::content_delta("req_1", "x");
        let value = serde_json::to_value(&chunk).expect("chunk should serialize");
        assert_eq!(value["id"], "req_1");
        assert_eq!(value["choices"][0]["delta"]["content"], "x");
        assert!(value["choices"][0]["delta"].get("role").is_none());
        assert!(value["choices"][0]["finish_reason"].is_null());
    }
}
