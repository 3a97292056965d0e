//! Job submission followed by periodic result checks.

use async_stream::stream;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{EventStream, HttpBackend};
use crate::error::ChatError;
use crate::providers::{DataEnvelope, TurnRequest};
use crate::reassembly::RawEvent;

#[derive(Debug, Clone)]
pub struct PollingTransport {
    backend: HttpBackend,
}

impl PollingTransport {
    pub fn new(backend: HttpBackend) -> Self {
        PollingTransport { backend }
    }

    pub async fn open(&self, request: &TurnRequest) -> Result<EventStream, ChatError> {
        let event_id = self.backend.initiate(request).await?;
        Ok(self.poll_job(event_id))
    }

    /// Check the job's result every poll interval until it has data or the
    /// poll timeout passes.
    ///
    /// A result is surfaced as one `Data` event and ends the stream. Running
    /// past the timeout yields an `Error` event carrying `timeout_ms`.
    /// Failed checks are logged and count as "not ready". Each check is
    /// bounded by the same deadline.
    pub fn poll_job(&self, event_id: String) -> EventStream {
        let backend = self.backend.clone();
        let interval = backend.config().poll_interval();
        let timeout = backend.config().poll_timeout();
        Box::pin(stream! {
            let deadline = Instant::now() + timeout;
            let mut checks: u32 = 0;
            loop {
                checks = checks.saturating_add(1);
                // A slow check must not carry the turn past the deadline.
                match tokio::time::timeout_at(deadline, fetch_result(&backend, &event_id)).await {
                    Ok(Ok(Some(items))) => {
                        debug!(event_id = %event_id, checks, "result ready");
                        yield RawEvent::Data(items);
                        break;
                    }
                    Ok(Ok(None)) => debug!(event_id = %event_id, checks, "result not ready"),
                    Ok(Err(e)) => warn!(
                        error = %e,
                        event_id = %event_id,
                        checks,
                        "result check failed, will retry next tick"
                    ),
                    Err(_) => debug!(event_id = %event_id, checks, "result check cut off at deadline"),
                }
                let now = Instant::now();
                if now >= deadline {
                    yield RawEvent::Error(timeout_payload(timeout));
                    break;
                }
                tokio::time::sleep(interval.min(deadline - now)).await;
            }
        })
    }
}

fn timeout_payload(timeout: Duration) -> Value {
    json!({
        "error": format!("no result after {timeout:?}"),
        "timeout_ms": timeout.as_millis() as u64,
    })
}

/// `Ok(None)` while the job is not finished.
async fn fetch_result(backend: &HttpBackend, event_id: &str) -> Result<Option<Vec<Value>>, ChatError> {
    let url = backend.job_url(&backend.config().call_path, event_id);
    let resp = backend
        .get(&url)
        .timeout(backend.config().request_timeout())
        .send()
        .await
        .map_err(|e| ChatError::network(&url, &e))?;
    if resp.status() != StatusCode::OK {
        return Ok(None);
    }
    Ok(resp.json::<DataEnvelope>().await.ok().map(|env| env.data))
}
