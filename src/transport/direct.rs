//! Single request/response call.

use async_stream::stream;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Response;
use serde::Deserialize;
use serde_json::{json, Value};

use super::sse::{data_event, LineSplitter};
use super::{EventStream, HttpBackend};
use crate::error::ChatError;
use crate::providers::{DeltaChunk, TurnRequest};
use crate::reassembly::RawEvent;

/// POSTs the turn and surfaces the answer without a job handle.
///
/// A JSON body becomes one `Data` event. Any other body is read as
/// newline-delimited JSON, one `{"delta": ...}` object per line, each
/// surfaced as a `Token` event while it arrives.
#[derive(Debug, Clone)]
pub struct DirectTransport {
    backend: HttpBackend,
}

impl DirectTransport {
    pub fn new(backend: HttpBackend) -> Self {
        DirectTransport { backend }
    }

    pub async fn open(&self, request: &TurnRequest) -> Result<EventStream, ChatError> {
        let config = self.backend.config();
        let url = config.url(&config.call_path);
        let body = request.body(config.flavor);
        let resp = self.backend.post_with_retry(&url, &body, None).await?;

        if is_json(&resp) {
            let value: Value = resp
                .json()
                .await
                .map_err(|e| ChatError::stream(format!("reading reply body from {url}: {e}")))?;
            Ok(Box::pin(futures_util::stream::once(async move {
                data_event(value)
            })))
        } else {
            Ok(delta_lines(resp))
        }
    }
}

fn is_json(resp: &Response) -> bool {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim_start().starts_with("application/json"))
        .unwrap_or(false)
}

fn delta_lines(resp: Response) -> EventStream {
    Box::pin(stream! {
        let mut bytes = Box::pin(resp.bytes_stream());
        let mut lines = LineSplitter::default();
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for line in lines.push(&chunk) {
                        if let Some(event) = line_event(&line) {
                            yield event;
                        }
                    }
                }
                Err(e) => {
                    yield RawEvent::Error(json!({"error": format!("reply interrupted: {e}")}));
                    return;
                }
            }
        }
        if let Some(line) = lines.finish() {
            if let Some(event) = line_event(&line) {
                yield event;
            }
        }
    })
}

/// Map one chunked-text line. Blank lines carry nothing.
pub fn line_event(line: &str) -> Option<RawEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return Some(RawEvent::Error(json!({
                "error": format!("malformed chunk: {e}"),
                "line": line,
            })))
        }
    };
    match DeltaChunk::deserialize(&value) {
        Ok(chunk) => Some(RawEvent::Token(chunk.delta)),
        Err(_) => Some(data_event(value)),
    }
}
