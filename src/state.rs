//! Opaque conversation state replayed to the backend on every turn.

use serde_json::Value;

/// Store-and-forward holder for the backend's context token.
///
/// Empty at conversation start, replaced after every completed turn and
/// cleared on reset. The contents are never inspected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState(Option<Value>);

impl ConversationState {
    pub fn new() -> Self {
        Self(None)
    }

    pub fn current(&self) -> Option<&Value> {
        self.0.as_ref()
    }

    /// Value sent on the wire; JSON `null` while empty.
    pub fn as_wire(&self) -> Value {
        self.0.clone().unwrap_or(Value::Null)
    }

    /// Adopt the state returned by a completed turn.
    pub fn replace(&mut self, next: Value) {
        self.0 = match next {
            Value::Null => None,
            v => Some(v),
        };
    }

    pub fn reset(&mut self) {
        self.0 = None;
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}
