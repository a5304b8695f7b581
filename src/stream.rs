//! Stream adapter: turns a content source into the outgoing SSE frame
//! sequence, always terminated by the completion sentinel.
//!
//! The producer runs on its own task and hands frames to the HTTP writer
//! through a bounded channel; each `send` is the cooperative suspension
//! point, and a dropped receiver (client gone) stops production and releases
//! any upstream connection.

use crate::error::{AppError, AppResult};
use crate::fallback;
use crate::protocol::{ChatCompletionChunk, ChatRequest};
use crate::upstream::{self, UpstreamCallError, UpstreamErrorKind};
use axum::body::Body;
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";
const DONE_DATA_LINE: &str = "data: [DONE]";
const CHANNEL_CAPACITY: usize = 64;

/// What the producer task should stream. Backend resolution is deferred into
/// the producer so transport failures degrade to error text instead of an
/// HTTP error, after response headers are already on the wire.
pub enum StreamPlan {
    Local(String),
    Backend {
        client: reqwest::Client,
        base_url: String,
        request: ChatRequest,
        timeout_ms: u64,
    },
}

/// Resolved content source, consumed exactly once.
enum ContentSource {
    Local(String),
    UpstreamIncremental(reqwest::Response),
    UpstreamSingleShot(String),
}

/// Spawn the producer for `plan` and return the SSE body to hand to the
/// HTTP layer.
pub fn sse_body(plan: StreamPlan, request_id: String) -> Body {
    let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let source = match plan {
            StreamPlan::Local(text) => ContentSource::Local(text),
            StreamPlan::Backend {
                client,
                base_url,
                request,
                timeout_ms,
            } => resolve_backend_source(&client, &base_url, &request, &request_id, timeout_ms).await,
        };
        if let Err(err) = drive(source, &request_id, &tx).await {
            tracing::warn!("stream producer failed: {}", err.message);
            let _ = tx.send(Bytes::from_static(DONE_FRAME.as_bytes())).await;
        }
    });
    Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>))
}

/// Open the backend call and classify its reply. Any failure becomes a local
/// error-text source so the client-visible framing never changes.
async fn resolve_backend_source(
    client: &reqwest::Client,
    base_url: &str,
    request: &ChatRequest,
    request_id: &str,
    timeout_ms: u64,
) -> ContentSource {
    let resp = match upstream::open_chat_stream(client, base_url, request, request_id, timeout_ms)
        .await
    {
        Ok(resp) => resp,
        Err(err) => return degrade(err),
    };
    let incremental = resp
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"));
    if incremental {
        return ContentSource::UpstreamIncremental(resp);
    }
    let status = resp.status();
    let body = match resp.text().await {
        Ok(body) => body,
        Err(err) => {
            return degrade(UpstreamCallError::new(
                UpstreamErrorKind::Network,
                Some(status),
                err.to_string(),
            ));
        }
    };
    match upstream::content_from_body(status, &body) {
        Ok(content) => ContentSource::UpstreamSingleShot(content),
        Err(err) => degrade(err),
    }
}

fn degrade(err: UpstreamCallError) -> ContentSource {
    tracing::warn!(kind = ?err.kind, "backend stream unavailable, serving error text: {}", err);
    metrics::counter!("echogate_backend_fallback_total").increment(1);
    ContentSource::Local(fallback::backend_error(&err.to_string()))
}

async fn drive(source: ContentSource, request_id: &str, tx: &mpsc::Sender<Bytes>) -> AppResult<()> {
    match source {
        ContentSource::Local(text) => emit_text(&text, request_id, tx).await,
        ContentSource::UpstreamSingleShot(content) => {
            let chunk = ChatCompletionChunk::content_delta(request_id, content);
            if !send_frame(tx, encode_frame(&chunk)?).await {
                return Ok(());
            }
            send_frame(tx, Bytes::from_static(DONE_FRAME.as_bytes())).await;
            Ok(())
        }
        ContentSource::UpstreamIncremental(resp) => forward_lines(resp, request_id, tx).await,
    }
}

/// Local text source: one chunk per character, then the sentinel.
/// Per-character granularity is the contract, not an accident.
async fn emit_text(text: &str, request_id: &str, tx: &mpsc::Sender<Bytes>) -> AppResult<()> {
    for ch in text.chars() {
        let chunk = ChatCompletionChunk::content_delta(request_id, ch.to_string());
        if !send_frame(tx, encode_frame(&chunk)?).await {
            return Ok(());
        }
    }
    send_frame(tx, Bytes::from_static(DONE_FRAME.as_bytes())).await;
    Ok(())
}

/// Upstream already speaks the incremental protocol: forward its non-empty
/// lines untouched, then make sure the sentinel went out exactly once.
async fn forward_lines(
    resp: reqwest::Response,
    request_id: &str,
    tx: &mpsc::Sender<Bytes>,
) -> AppResult<()> {
    let mut upstream_body = resp.bytes_stream();
    let mut buf = BytesMut::new();
    let mut last_was_done = false;

    while let Some(next) = upstream_body.next().await {
        let chunk = match next {
            Ok(chunk) => chunk,
            Err(err) => {
                // Read failure mid-stream: switch to error-text framing.
                tracing::warn!("backend stream broke mid-read: {}", err);
                metrics::counter!("echogate_backend_fallback_total").increment(1);
                return emit_text(&fallback::backend_error(&err.to_string()), request_id, tx)
                    .await;
            }
        };
        buf.extend_from_slice(&chunk);
        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let raw = buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            last_was_done = line.trim() == DONE_DATA_LINE;
            if !send_frame(tx, Bytes::from(format!("{line}\n"))).await {
                return Ok(());
            }
        }
    }

    let tail = String::from_utf8_lossy(&buf);
    let tail = tail.trim();
    if !tail.is_empty() {
        last_was_done = tail == DONE_DATA_LINE;
        if !send_frame(tx, Bytes::from(format!("{tail}\n"))).await {
            return Ok(());
        }
    }

    if !last_was_done {
        send_frame(tx, Bytes::from_static(DONE_FRAME.as_bytes())).await;
    }
    Ok(())
}

fn encode_frame(chunk: &ChatCompletionChunk) -> AppResult<Bytes> {
    let json = serde_json::to_string(chunk).map_err(|err| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "chunk_encode_failed",
            err.to_string(),
        )
    })?;
    Ok(Bytes::from(format!("data: {json}\n\n")))
}

/// False once the client has gone away; producers stop on that signal.
async fn send_frame(tx: &mpsc::Sender<Bytes>, frame: Bytes) -> bool {
    tx.send(frame).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    async fn collect_frames(source: ContentSource) -> String {
        let (tx, mut rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move {
            drive(source, "req_test", &tx).await.expect("drive should succeed");
        });
        let mut out = String::new();
        while let Some(frame) = rx.recv().await {
            out.push_str(&String::from_utf8_lossy(&frame));
        }
        handle.await.expect("producer task should finish");
        out
    }

    fn data_payloads(body: &str) -> Vec<Value> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .filter(|payload| *payload != "[DONE]")
            .map(|payload| serde_json::from_str(payload).expect("chunk should be json"))
            .collect()
    }

    #[tokio::test]
    async fn local_source_emits_one_chunk_per_character() {
        let body = collect_frames(ContentSource::Local("Echo: hi".to_string())).await;
        let chunks = data_payloads(&body);
        assert_eq!(chunks.len(), "Echo: hi".chars().count());
        let reassembled: String = chunks
            .iter()
            .map(|chunk| {
                chunk["choices"][0]["delta"]["content"]
                    .as_str()
                    .expect("delta content")
                    .to_string()
            })
            .collect();
        assert_eq!(reassembled, "Echo: hi");
        assert!(body.ends_with(DONE_FRAME));
        assert_eq!(body.matches("[DONE]").count(), 1);
    }

    #[tokio::test]
    async fn local_source_with_empty_text_is_just_the_sentinel() {
        let body = collect_frames(ContentSource::Local(String::new())).await;
        assert_eq!(body, DONE_FRAME);
    }

    #[tokio::test]
    async fn single_shot_source_is_one_chunk_then_sentinel() {
        let body = collect_frames(ContentSource::UpstreamSingleShot("full reply".to_string())).await;
        let chunks = data_payloads(&body);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0]["choices"][0]["delta"]["content"], "full reply");
        assert_eq!(chunks[0]["id"], "req_test");
        assert!(body.ends_with(DONE_FRAME));
    }

    #[tokio::test]
    async fn dropped_receiver_stops_local_production() {
        let (tx, rx) = mpsc::channel::<Bytes>(1);
        drop(rx);
        drive(
            ContentSource::Local("long enough to need many sends".to_string()),
            "req_test",
            &tx,
        )
        .await
        .expect("producer should stop quietly when the client is gone");
    }
}
