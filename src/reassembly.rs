//! Folds a turn's raw events into one growing display string.
//!
//! `Token` events are increments and are appended. `Data` events are
//! authoritative snapshots: their response half is normalized and replaces
//! everything accumulated so far, and their state half is kept as the
//! conversation state to adopt when the turn completes. Events are applied in
//! arrival order; nothing is reordered or deduplicated.

use async_stream::stream;
use clap::ValueEnum;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::ChatError;
use crate::normalize::{extract_text, is_recognized};

/// One unit received from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    /// Raw text fragment to append.
    Token(String),
    /// A `[primary, secondary]` pair holding the response and the updated
    /// state in an order the backend does not pin down.
    Data(Vec<Value>),
    /// Terminal failure reported by the backend or the transport.
    Error(Value),
    /// Progress information with no text content.
    Status(Value),
}

/// How the two halves of a `Data` pair are told apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PairOrder {
    /// Whichever element has extractable reply text is the response.
    #[default]
    Probe,
    ResponseFirst,
    StateFirst,
}

impl std::fmt::Display for PairOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairOrder::Probe => write!(f, "probe"),
            PairOrder::ResponseFirst => write!(f, "response-first"),
            PairOrder::StateFirst => write!(f, "state-first"),
        }
    }
}

/// Split a `Data` payload into `(response, state)`.
///
/// Only the first two elements are considered. Under [`PairOrder::Probe`],
/// when neither or both elements carry reply text the first one is taken as
/// the response.
pub fn split_pair(items: &[Value], order: PairOrder) -> (Option<&Value>, Option<&Value>) {
    let (primary, secondary) = match items {
        [] => return (None, None),
        [only] => return (Some(only), None),
        [a, b, ..] => (a, b),
    };
    let swap = match order {
        PairOrder::ResponseFirst => false,
        PairOrder::StateFirst => true,
        PairOrder::Probe => !is_recognized(primary) && is_recognized(secondary),
    };
    if swap {
        (Some(secondary), Some(primary))
    } else {
        (Some(primary), Some(secondary))
    }
}

/// What a pushed event produced for the display.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// The best current rendering of the reply.
    Text(String),
    Progress(Value),
}

/// Normalized outcome of one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    /// `None` when no recognizable text ever arrived.
    pub text: Option<String>,
    /// State half of the last `Data` event, if any.
    pub updated_state: Option<Value>,
    /// Last `Data` payload as received, kept for diagnosis.
    pub raw: Option<Value>,
}

impl TurnResult {
    /// Turn a text-less result into the matching error.
    ///
    /// A payload that arrived but could not be read is a
    /// [`ChatError::Shape`]; no payload at all is [`ChatError::NoPayload`].
    /// An empty reply (`Some("")`) is a success.
    pub fn checked(self) -> Result<TurnResult, ChatError> {
        if self.text.is_some() {
            return Ok(self);
        }
        match self.raw {
            Some(raw) => Err(ChatError::Shape { raw }),
            None => Err(ChatError::NoPayload),
        }
    }
}

/// Accumulator for a single turn.
#[derive(Debug, Default)]
pub struct Reassembler {
    order: PairOrder,
    accumulator: String,
    saw_text: bool,
    latest_state: Option<Value>,
    last_raw: Option<Value>,
}

impl Reassembler {
    pub fn new(order: PairOrder) -> Self {
        Self {
            order,
            ..Self::default()
        }
    }

    /// Current display text.
    pub fn text(&self) -> &str {
        &self.accumulator
    }

    /// Apply one event. `Ok(None)` means nothing changed for display.
    pub fn push(&mut self, event: RawEvent) -> Result<Option<Update>, ChatError> {
        match event {
            RawEvent::Token(fragment) => {
                self.accumulator.push_str(&fragment);
                self.saw_text = true;
                Ok(Some(Update::Text(self.accumulator.clone())))
            }
            RawEvent::Data(items) => {
                let (response, state) = split_pair(&items, self.order);
                if let Some(state) = state {
                    self.latest_state = Some(state.clone());
                }
                let text = response.and_then(extract_text);
                self.last_raw = Some(Value::Array(items));
                match text {
                    Some(text) => {
                        self.accumulator = text;
                        self.saw_text = true;
                        Ok(Some(Update::Text(self.accumulator.clone())))
                    }
                    None => Ok(None),
                }
            }
            RawEvent::Error(payload) => Err(error_from_payload(&payload)),
            RawEvent::Status(payload) => Ok(Some(Update::Progress(payload))),
        }
    }

    pub fn finish(self) -> TurnResult {
        TurnResult {
            text: self.saw_text.then_some(self.accumulator),
            updated_state: self.latest_state,
            raw: self.last_raw,
        }
    }
}

fn error_from_payload(payload: &Value) -> ChatError {
    if let Some(ms) = payload.get("timeout_ms").and_then(Value::as_u64) {
        return ChatError::Timeout {
            after: Duration::from_millis(ms),
        };
    }
    ChatError::stream(error_detail(payload))
}

fn error_detail(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| other.to_string()),
    }
}

/// Lazily map a raw event sequence to the running display text.
///
/// The output ends when the input does or after the first error. If the
/// input ends without any text the last item is the
/// [`TurnResult::checked`] error.
pub fn reassemble<S>(events: S, order: PairOrder) -> impl Stream<Item = Result<String, ChatError>>
where
    S: Stream<Item = RawEvent>,
{
    stream! {
        let mut events = Box::pin(events);
        let mut reassembler = Reassembler::new(order);
        let mut failed = false;
        while let Some(event) = events.next().await {
            match reassembler.push(event) {
                Ok(Some(Update::Text(text))) => {
                    yield Ok(text);
                }
                Ok(_) => {}
                Err(e) => {
                    failed = true;
                    yield Err(e);
                    break;
                }
            }
        }
        if !failed {
            if let Err(e) = reassembler.finish().checked() {
                yield Err(e);
            }
        }
    }
}
