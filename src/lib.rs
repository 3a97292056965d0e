//! Chat client for hosted conversational backends whose reply envelope is
//! not fixed.
//!
//! A turn flows `ChatSession::send` → [`transport::Transport`] (direct call,
//! polling or event stream) → [`reassembly::Reassembler`] →
//! [`normalize::extract_text`], and the caller receives the growing reply
//! text followed by the outcome. See [`session::ChatSession`].

pub mod cli;
pub mod config;
pub mod error;
pub mod normalize;
pub mod providers;
pub mod reassembly;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub use error::ChatError;
pub use session::ChatSession;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry of the conversation, rendered in insertion order.
///
/// Only the content of the assistant message of the in-flight turn changes
/// after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp_ms: u64,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
            timestamp_ms: now_ms(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
            timestamp_ms: now_ms(),
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
