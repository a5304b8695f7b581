use crate::protocol::{AssistantMessage, Choice, GatewayResponse, Usage};
use crate::tokens;

/// Build the canonical non-streaming response from resolved content text.
///
/// Error descriptions and genuine completions normalize identically; the
/// echo-vs-backend-vs-failure distinction is made before this point.
pub fn normalize(content: String, request_id: &str, prompt: &str) -> GatewayResponse {
    let prompt_tokens = tokens::estimate(prompt);
    let completion_tokens = tokens::estimate(&content);

    GatewayResponse {
        id: request_id.to_string(),
        object: "chat.completion".to_string(),
        choices: vec![Choice {
            index: 0,
            message: AssistantMessage::new(content),
            finish_reason: "stop".to_string(),
        }],
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    }
}
