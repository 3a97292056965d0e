//! Transports: ways of obtaining one turn's raw events from the backend.
//!
//! Every transport's `open` returns `Err` when the call could not be
//! established. Once a stream is returned, later failures arrive in it as
//! [`RawEvent::Error`] and end it.

pub mod direct;
pub mod event_stream;
pub mod polling;
pub mod sse;

use clap::ValueEnum;
use futures_util::Stream;
use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::providers::{JobHandle, TurnRequest};
use crate::reassembly::RawEvent;

pub use direct::DirectTransport;
pub use event_stream::EventStreamTransport;
pub use polling::PollingTransport;

/// Lazy, finite sequence of raw events for one turn.
pub type EventStream = Pin<Box<dyn Stream<Item = RawEvent> + Send>>;

/// Which transport strategy to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// Event stream, falling back to polling when it cannot be opened.
    #[default]
    Auto,
    Direct,
    Poll,
    Stream,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Auto => write!(f, "auto"),
            TransportKind::Direct => write!(f, "direct"),
            TransportKind::Poll => write!(f, "poll"),
            TransportKind::Stream => write!(f, "stream"),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared HTTP plumbing
// ---------------------------------------------------------------------------

/// HTTP client plus the configuration every transport reads from.
///
/// Cheap to clone; constructed once per session and passed in.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl HttpBackend {
    pub fn new(config: ClientConfig) -> Result<Self, ChatError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ChatError::Config(format!("building HTTP client: {e}")))?;
        Ok(HttpBackend {
            client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.get(url))
    }

    /// POST `body`, retrying once after the configured delay when the
    /// failure is retryable.
    pub async fn post_with_retry(
        &self,
        url: &str,
        body: &Value,
        timeout: Option<std::time::Duration>,
    ) -> Result<Response, ChatError> {
        let mut retried = false;
        loop {
            let mut builder = self.authorize(self.client.post(url)).json(body);
            if let Some(timeout) = timeout {
                builder = builder.timeout(timeout);
            }
            let result = match builder.send().await {
                Ok(resp) => check_status(resp, url).await,
                Err(e) => Err(ChatError::network(url, &e)),
            };
            match result {
                Err(e) if e.is_retryable() && !retried => {
                    retried = true;
                    warn!(
                        error = %e,
                        url = %url,
                        delay_ms = self.config.retry_delay_ms,
                        "request failed, retrying once"
                    );
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                other => return other,
            }
        }
    }

    /// Submit the turn to a job-based backend and return the job handle.
    pub async fn initiate(&self, request: &TurnRequest) -> Result<String, ChatError> {
        let url = self.config.url(&self.config.call_path);
        let body = request.body(self.config.flavor);
        let resp = self
            .post_with_retry(&url, &body, Some(self.config.request_timeout()))
            .await?;
        let handle: JobHandle = resp
            .json()
            .await
            .map_err(|e| ChatError::stream(format!("reading job handle from {url}: {e}")))?;
        debug!(event_id = %handle.event_id, url = %url, "job created");
        Ok(handle.event_id)
    }

    /// URL of a per-job resource under `prefix`.
    pub fn job_url(&self, prefix: &str, event_id: &str) -> String {
        self.config
            .url(&format!("{}/{}", prefix.trim_end_matches('/'), event_id))
    }
}

/// Pass 2xx responses through; turn anything else into the matching error.
pub async fn check_status(resp: Response, url: &str) -> Result<Response, ChatError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ChatError::from_status(status.as_u16(), url, body))
}

// ---------------------------------------------------------------------------
// Strategy selection
// ---------------------------------------------------------------------------

/// Event stream first; polling when the stream cannot be opened.
///
/// When the job was created but its stream could not be attached, polling
/// resumes the same job instead of submitting the message again. A failed
/// submission is returned as is, and a failure after the stream is open is
/// terminal for the turn.
#[derive(Debug, Clone)]
pub struct FallbackTransport {
    stream: EventStreamTransport,
    poll: PollingTransport,
}

impl FallbackTransport {
    pub fn new(backend: HttpBackend) -> Self {
        FallbackTransport {
            stream: EventStreamTransport::new(backend.clone()),
            poll: PollingTransport::new(backend),
        }
    }

    pub async fn open(&self, request: &TurnRequest) -> Result<EventStream, ChatError> {
        // Submission already retried once inside `initiate`; another attempt
        // would resend the message.
        let event_id = self.stream.backend().initiate(request).await?;
        match self.stream.connect(&event_id).await {
            Ok(events) => Ok(events),
            Err(e) => {
                warn!(
                    error = %e,
                    event_id = %event_id,
                    "event stream unavailable, falling back to polling"
                );
                Ok(self.poll.poll_job(event_id))
            }
        }
    }
}

/// A transport strategy, chosen once per session.
#[derive(Debug, Clone)]
pub enum Transport {
    Direct(DirectTransport),
    Poll(PollingTransport),
    Stream(EventStreamTransport),
    Auto(FallbackTransport),
}

impl Transport {
    pub fn new(kind: TransportKind, config: ClientConfig) -> Result<Self, ChatError> {
        let backend = HttpBackend::new(config)?;
        Ok(match kind {
            TransportKind::Auto => Transport::Auto(FallbackTransport::new(backend)),
            TransportKind::Direct => Transport::Direct(DirectTransport::new(backend)),
            TransportKind::Poll => Transport::Poll(PollingTransport::new(backend)),
            TransportKind::Stream => Transport::Stream(EventStreamTransport::new(backend)),
        })
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Direct(_) => TransportKind::Direct,
            Transport::Poll(_) => TransportKind::Poll,
            Transport::Stream(_) => TransportKind::Stream,
            Transport::Auto(_) => TransportKind::Auto,
        }
    }

    /// Start one turn.
    pub async fn open(&self, request: &TurnRequest) -> Result<EventStream, ChatError> {
        debug!(transport = %self.kind(), "opening turn");
        match self {
            Transport::Direct(t) => t.open(request).await,
            Transport::Poll(t) => t.open(request).await,
            Transport::Stream(t) => t.open(request).await,
            Transport::Auto(t) => t.open(request).await,
        }
    }
}
