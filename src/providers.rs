use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Request body layout expected by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendFlavor {
    /// `{"data": [text, state, system, max_tokens, temperature, top_p]}`
    #[default]
    Positional,
    /// `{"message": text, "history": [[user, assistant], ...], "state": ...}`
    Named,
}

impl std::fmt::Display for BackendFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendFlavor::Positional => write!(f, "positional"),
            BackendFlavor::Named => write!(f, "named"),
        }
    }
}

// -- Turn request -----------------------------------------------------------

/// Sampling parameters sent with every turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sampling {
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for Sampling {
    fn default() -> Self {
        Sampling {
            system_prompt: "You are a helpful assistant.".to_string(),
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.95,
        }
    }
}

/// Everything a transport needs to run one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub user_text: String,
    /// Conversation state as it goes on the wire (`null` when empty).
    pub state: Value,
    /// Completed `(user, assistant)` exchanges before this turn.
    pub history: Vec<(String, String)>,
    pub sampling: Sampling,
    /// Client session identifier some queue backends key jobs by.
    pub session_hash: String,
}

impl TurnRequest {
    pub fn body(&self, flavor: BackendFlavor) -> Value {
        match flavor {
            BackendFlavor::Positional => json!({
                "data": [
                    self.user_text,
                    self.state,
                    self.sampling.system_prompt,
                    self.sampling.max_tokens,
                    self.sampling.temperature,
                    self.sampling.top_p,
                ],
                "session_hash": self.session_hash,
            }),
            BackendFlavor::Named => json!({
                "message": self.user_text,
                "history": self
                    .history
                    .iter()
                    .map(|(u, a)| json!([u, a]))
                    .collect::<Vec<_>>(),
                "state": self.state,
                "session_hash": self.session_hash,
            }),
        }
    }
}

// -- Response envelopes -------------------------------------------------------

/// Job handle returned by queue-style backends.
#[derive(Debug, Deserialize)]
pub struct JobHandle {
    pub event_id: String,
}

/// `{ "data": [...] }` result envelope.
#[derive(Debug, Deserialize)]
pub struct DataEnvelope {
    pub data: Vec<Value>,
}

/// One line of the chunked-text flavor.
#[derive(Debug, Deserialize)]
pub struct DeltaChunk {
    pub delta: String,
}
