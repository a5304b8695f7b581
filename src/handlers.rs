use crate::app::AppState;
use crate::fallback;
use crate::normalize::normalize;
use crate::protocol::{ChatRequest, REQUEST_ID_HEADER, REQUEST_ID_HEADER_ALT, last_user_prompt};
use crate::stream::{self, StreamPlan};
use crate::upstream;
use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Dispatch core: resolve the request id, extract the prompt, pick
/// backend-or-local and stream-or-single-shot, and answer 200 either way.
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Response {
    let request_id = resolve_request_id(&headers);
    let prompt = last_user_prompt(&request.messages).to_string();
    metrics::counter!(
        "echogate_requests_total",
        "stream" => if request.stream { "true" } else { "false" }
    )
    .increment(1);

    if request.stream {
        let plan = match state.runtime.backend_url.as_ref() {
            Some(base_url) => StreamPlan::Backend {
                client: state.http.clone(),
                base_url: base_url.clone(),
                request,
                timeout_ms: state.runtime.backend_timeout_ms,
            },
            None => StreamPlan::Local(fallback::echo(&prompt)),
        };
        let body = stream::sse_body(plan, request_id.clone());
        return (
            [
                ("content-type", "text/event-stream"),
                (REQUEST_ID_HEADER, request_id.as_str()),
            ],
            body,
        )
            .into_response();
    }

    let content = match state.runtime.backend_url.as_ref() {
        Some(base_url) => {
            match upstream::call_chat_completions(
                &state.http,
                base_url,
                &request,
                &request_id,
                state.runtime.backend_timeout_ms,
            )
            .await
            {
                Ok(content) => content,
                Err(err) => {
                    // Swallowed on purpose: the client gets a normal reply
                    // whose text describes the failure.
                    tracing::warn!(kind = ?err.kind, "backend call failed: {}", err);
                    metrics::counter!("echogate_backend_fallback_total").increment(1);
                    fallback::backend_error(&err.to_string())
                }
            }
        }
        None => fallback::echo(&prompt),
    };

    let response = normalize(content, &request_id, &prompt);
    (
        [(REQUEST_ID_HEADER, request_id.as_str())],
        Json(response),
    )
        .into_response()
}

/// Primary header, then the alternate, then a fresh id. Blank values count
/// as absent.
fn resolve_request_id(headers: &HeaderMap) -> String {
    header_value(headers, REQUEST_ID_HEADER)
        .or_else(|| header_value(headers, REQUEST_ID_HEADER_ALT))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn primary_request_id_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("abc"));
        headers.insert(REQUEST_ID_HEADER_ALT, HeaderValue::from_static("xyz"));
        assert_eq!(resolve_request_id(&headers), "abc");
    }

    #[test]
    fn alternate_header_used_when_primary_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER_ALT, HeaderValue::from_static("xyz"));
        assert_eq!(resolve_request_id(&headers), "xyz");
    }

    #[test]
    fn blank_header_values_are_treated_as_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("   "));
        headers.insert(REQUEST_ID_HEADER_ALT, HeaderValue::from_static("xyz"));
        assert_eq!(resolve_request_id(&headers), "xyz");
    }

    #[test]
    fn generated_ids_are_nonempty_and_unique() {
        let headers = HeaderMap::new();
        let first = resolve_request_id(&headers);
        let second = resolve_request_id(&headers);
        assert!(!first.is_empty());
        assert!(!second.is_empty());
        assert_ne!(first, second);
    }
}
