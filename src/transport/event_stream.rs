//! Job submission followed by a persistent server-sent-event connection.

use async_stream::stream;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Response;
use serde_json::json;
use tracing::debug;

use super::sse::{map_frame, SseDecoder};
use super::{check_status, EventStream, HttpBackend};
use crate::error::ChatError;
use crate::providers::TurnRequest;
use crate::reassembly::RawEvent;

#[derive(Debug, Clone)]
pub struct EventStreamTransport {
    backend: HttpBackend,
}

impl EventStreamTransport {
    pub fn new(backend: HttpBackend) -> Self {
        EventStreamTransport { backend }
    }

    pub fn backend(&self) -> &HttpBackend {
        &self.backend
    }

    pub async fn open(&self, request: &TurnRequest) -> Result<EventStream, ChatError> {
        let event_id = self.backend.initiate(request).await?;
        self.connect(&event_id).await
    }

    /// Attach to the event stream of an existing job.
    ///
    /// Failing to connect, or a non-2xx answer, is an `Err`; everything after
    /// the response headers arrive is reported inside the stream.
    pub async fn connect(&self, event_id: &str) -> Result<EventStream, ChatError> {
        let url = self
            .backend
            .job_url(&self.backend.config().stream_path, event_id);
        let resp = self
            .backend
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ChatError::network(&url, &e))?;
        let resp = check_status(resp, &url).await?;
        debug!(event_id = %event_id, url = %url, "event stream attached");
        Ok(frames(resp))
    }
}

/// Frames of one job's event stream.
///
/// Ends after the first terminal frame. A body that ends before one arrives
/// is a truncated reply and ends with an error event.
fn frames(resp: Response) -> EventStream {
    Box::pin(stream! {
        let mut bytes = Box::pin(resp.bytes_stream());
        let mut decoder = SseDecoder::default();
        'read: loop {
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    for frame in decoder.push(&chunk) {
                        if let Some(mapped) = map_frame(&frame) {
                            let terminal = mapped.terminal;
                            yield mapped.event;
                            if terminal {
                                break 'read;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    yield RawEvent::Error(json!({"error": format!("stream interrupted: {e}")}));
                    break;
                }
                None => {
                    if let Some(mapped) = decoder.finish().as_ref().and_then(map_frame) {
                        let terminal = mapped.terminal;
                        yield mapped.event;
                        if terminal {
                            break;
                        }
                    }
                    debug!("event stream closed without a terminal frame");
                    yield RawEvent::Error(json!({"error": "stream closed before completion"}));
                    break;
                }
            }
        }
    })
}
