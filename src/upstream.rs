use crate::protocol::{BackendResponse, ChatRequest, REQUEST_ID_HEADER};
use axum::http::StatusCode;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    Network,
    Http,
}

/// A failed backend exchange: connect error, timeout, non-2xx status, or a
/// body that does not parse as a [`BackendResponse`]. All variants are
/// handled the same way downstream (fallback text), so the kind only feeds
/// logging.
#[derive(Debug, Clone)]
pub struct UpstreamCallError {
    pub kind: UpstreamErrorKind,
    pub status: Option<StatusCode>,
    pub message: String,
}

impl UpstreamCallError {
    pub fn new(kind: UpstreamErrorKind, status: Option<StatusCode>, message: String) -> Self {
        Self {
            kind,
            status,
            message,
        }
    }
}

impl std::fmt::Display for UpstreamCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for UpstreamCallError {}

/// Non-streaming backend call. Resolves to the first choice's content.
pub async fn call_chat_completions(
    client: &reqwest::Client,
    base_url: &str,
    request: &ChatRequest,
    request_id: &str,
    timeout_ms: u64,
) -> Result<String, UpstreamCallError> {
    let resp = open_chat_stream(client, base_url, request, request_id, timeout_ms).await?;
    let status = resp.status();
    let text = resp.text().await.map_err(|err| {
        UpstreamCallError::new(UpstreamErrorKind::Network, Some(status), err.to_string())
    })?;
    content_from_body(status, &text)
}

/// Issue the backend call and hand back the raw response once the status is
/// known good. The caller decides how to consume the body; dropping the
/// response releases the connection.
pub async fn open_chat_stream(
    client: &reqwest::Client,
    base_url: &str,
    request: &ChatRequest,
    request_id: &str,
    timeout_ms: u64,
) -> Result<reqwest::Response, UpstreamCallError> {
    let url = join_url(base_url, CHAT_COMPLETIONS_PATH);
    let resp = client
        .post(url)
        .timeout(std::time::Duration::from_millis(timeout_ms))
        .header(REQUEST_ID_HEADER, request_id)
        .json(request)
        .send()
        .await
        .map_err(|err| UpstreamCallError::new(UpstreamErrorKind::Network, None, err.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(UpstreamCallError::new(
            UpstreamErrorKind::Http,
            Some(status),
            format!("upstream status {}: {}", status, text),
        ));
    }
    Ok(resp)
}

/// Parse a full backend body and pull out the reply content.
pub(crate) fn content_from_body(
    status: StatusCode,
    body: &str,
) -> Result<String, UpstreamCallError> {
    let parsed: BackendResponse = serde_json::from_str(body).map_err(|err| {
        UpstreamCallError::new(
            UpstreamErrorKind::Http,
            Some(status),
            format!("malformed backend body: {err}"),
        )
    })?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| {
            UpstreamCallError::new(
                UpstreamErrorKind::Http,
                Some(status),
                "backend reply carried no choices".to_string(),
            )
        })
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let mut path = path.trim_start_matches('/');
    // Tolerate a base that already carries the /v1 prefix.
    if base.ends_with("/v1") {
        if let Some(stripped) = path.strip_prefix("v1/") {
            path = stripped;
        }
    }
    format!("{}/{}", base, path)
}
