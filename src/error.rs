//! Crate-level error type.
//!
//! Every failure a turn can end in is one of these variants. Only
//! [`ChatError::Network`] and [`ChatError::UpstreamUnavailable`] are retried
//! (once, after a fixed delay); everything else is terminal for the turn.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// HTTP statuses treated as transient upstream unavailability.
pub const TRANSIENT_STATUSES: &[u16] = &[429, 502, 503, 504];

#[derive(Debug, Error)]
pub enum ChatError {
    /// Connection, DNS or timeout failure before any response arrived.
    #[error("network error talking to {url}: {detail}")]
    Network { url: String, detail: String },

    /// The backend answered with a recognised transient-retry status.
    #[error("upstream unavailable: HTTP {status} from {url}")]
    UpstreamUnavailable { status: u16, url: String },

    /// Any other non-2xx answer.
    #[error("HTTP {status} from {url}: {body}")]
    Http { status: u16, url: String, body: String },

    /// A response arrived but no reply text could be extracted from it.
    #[error("no reply text found in backend response")]
    Shape { raw: Value },

    /// The stream ended abnormally or carried a malformed frame.
    #[error("stream error: {detail}")]
    Stream { detail: String },

    #[error("turn cancelled")]
    Cancelled,

    /// The event sequence ended without producing any reply text.
    #[error("no payload received from backend")]
    NoPayload,

    #[error("no result after {after:?}")]
    Timeout { after: Duration },

    #[error("refusing to send an empty message")]
    EmptyInput,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ChatError {
    /// Build the error for a non-success status, classifying transient codes.
    pub fn from_status(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        if TRANSIENT_STATUSES.contains(&status) {
            ChatError::UpstreamUnavailable { status, url }
        } else {
            ChatError::Http {
                status,
                url,
                body: body.into(),
            }
        }
    }

    pub fn network(url: impl Into<String>, err: &reqwest::Error) -> Self {
        ChatError::Network {
            url: url.into(),
            detail: err.to_string(),
        }
    }

    pub fn stream(detail: impl Into<String>) -> Self {
        ChatError::Stream {
            detail: detail.into(),
        }
    }

    /// Whether the failure is worth one automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::Network { .. } | ChatError::UpstreamUnavailable { .. }
        )
    }

    /// Short fixed text shown in place of the assistant reply.
    ///
    /// [`ChatError::Shape`] is the exception: callers display the raw payload
    /// instead (see [`crate::normalize::pretty_raw`]).
    pub fn user_notice(&self) -> &'static str {
        match self {
            ChatError::Network { .. } => "Could not reach the chat service. Check your connection and try again.",
            ChatError::UpstreamUnavailable { .. } => "The chat service is busy right now. Please try again shortly.",
            ChatError::Http { .. } => "The chat service rejected the request.",
            ChatError::Shape { .. } => "The chat service replied in an unrecognised format.",
            ChatError::Stream { .. } => "The reply stream was interrupted.",
            ChatError::Cancelled => "Cancelled.",
            ChatError::NoPayload => "The chat service returned no reply.",
            ChatError::Timeout { .. } => "The chat service took too long to answer.",
            ChatError::EmptyInput => "Type a message first.",
            ChatError::Config(_) => "The client is misconfigured.",
            ChatError::Io(_) | ChatError::Json(_) => "Something went wrong on this machine.",
        }
    }
}
