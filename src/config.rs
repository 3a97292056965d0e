//! Client configuration: TOML file, environment, then CLI overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ChatError;
use crate::providers::{BackendFlavor, Sampling};
use crate::reassembly::PairOrder;

/// Environment variable consulted for the bearer token.
pub const TOKEN_ENV: &str = "CHAT_RELAY_TOKEN";

pub const DEFAULT_GREETING: &str = "Hi! How can I help you today?";

/// Everything needed to reach the backend and run a session.
///
/// Every field has a default, so a config file only needs to name what it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the backend, e.g. `http://127.0.0.1:7860`.
    pub base_url: String,
    /// Path for submitting a turn (direct call, or job creation).
    pub call_path: String,
    /// Path prefix of the event stream, keyed by job handle.
    pub stream_path: String,
    pub flavor: BackendFlavor,
    pub pair_order: PairOrder,
    /// Sent as `Authorization: Bearer <token>` when present.
    pub bearer_token: Option<String>,
    #[serde(flatten)]
    pub sampling: Sampling,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub connect_timeout_secs: u64,
    /// Per-request timeout for non-streaming calls.
    pub request_timeout_secs: u64,
    /// Where the message list is snapshotted; `None` disables snapshots.
    pub snapshot_path: Option<PathBuf>,
    pub greeting: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: "http://127.0.0.1:7860".to_string(),
            call_path: "gradio_api/call/chat".to_string(),
            stream_path: "gradio_api/queue/data".to_string(),
            flavor: BackendFlavor::default(),
            pair_order: PairOrder::default(),
            bearer_token: None,
            sampling: Sampling::default(),
            poll_interval_ms: 1_000,
            poll_timeout_secs: 30,
            retry_delay_ms: 1_500,
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
            snapshot_path: None,
            greeting: DEFAULT_GREETING.to_string(),
        }
    }
}

impl ClientConfig {
    /// Read a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ChatError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ChatError> {
        toml::from_str(raw).map_err(|e| ChatError::Config(e.to_string()))
    }

    /// Fill the bearer token from [`TOKEN_ENV`] when the file did not set one.
    pub fn with_env(mut self) -> Self {
        if self.bearer_token.is_none() {
            self.bearer_token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty());
        }
        self
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ChatError::Config(format!(
                "base_url must start with http:// or https://, got {:?}",
                self.base_url
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ChatError::Config("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Join `path` onto the base URL with exactly one slash between them.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
