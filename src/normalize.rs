//! Reply text extraction from backend payloads of unknown shape.
//!
//! The backend does not commit to a response envelope, so a payload is first
//! classified into one of a fixed set of [`ResponseShape`]s (first match in
//! priority order wins) and text is then pulled out of that shape. An object
//! carrying both `text` and `messages` is a [`ResponseShape::TextField`].

use serde_json::Value;

/// Field names probed for reply text, in priority order.
pub const TEXT_FIELDS: [&str; 4] = ["text", "answer", "message", "assistant"];

const ASSISTANT_ROLE: &str = "assistant";

/// A recognised payload shape, borrowing from the payload it was found in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponseShape<'a> {
    /// The payload is a bare string.
    Plain(&'a str),
    /// An object with a string-valued field from [`TEXT_FIELDS`].
    TextField { field: &'static str, text: &'a str },
    /// An object whose `messages` field is a list of `{role, content}` entries.
    MessageList(&'a [Value]),
    /// A list where every element is an object with `role` and `content`.
    RoleContentList(&'a [Value]),
    /// Any other list, read as legacy `[role, content]` pairs.
    PairList(&'a [Value]),
    /// A `{ "value": ... }` wrapper.
    Envelope(&'a Value),
    Unrecognized,
}

impl<'a> ResponseShape<'a> {
    /// Reply text carried by this shape, if any.
    pub fn text(&self) -> Option<&'a str> {
        match *self {
            ResponseShape::Plain(s) => Some(s),
            ResponseShape::TextField { text, .. } => Some(text),
            ResponseShape::MessageList(entries) | ResponseShape::RoleContentList(entries) => {
                last_assistant_content(entries)
            }
            ResponseShape::PairList(items) => last_pair_text(items),
            ResponseShape::Envelope(inner) => match inner {
                Value::String(s) => Some(s.as_str()),
                Value::Array(items) => last_pair_text(items),
                _ => None,
            },
            ResponseShape::Unrecognized => None,
        }
    }
}

/// Classify `raw` by the first matching shape rule.
pub fn classify(raw: &Value) -> ResponseShape<'_> {
    match raw {
        Value::String(s) => ResponseShape::Plain(s),
        Value::Array(items) => {
            if items.iter().all(is_role_content_entry) {
                ResponseShape::RoleContentList(items)
            } else {
                ResponseShape::PairList(items)
            }
        }
        Value::Object(map) => {
            for field in TEXT_FIELDS {
                if let Some(Value::String(text)) = map.get(field) {
                    return ResponseShape::TextField { field, text };
                }
            }
            if let Some(Value::Array(entries)) = map.get("messages") {
                return ResponseShape::MessageList(entries);
            }
            if let Some(inner) = map.get("value") {
                return ResponseShape::Envelope(inner);
            }
            ResponseShape::Unrecognized
        }
        _ => ResponseShape::Unrecognized,
    }
}

/// Best-candidate assistant text in `raw`, or `None` when nothing is found.
///
/// `None` means "show the raw payload for diagnosis", never "empty reply".
pub fn extract_text(raw: &Value) -> Option<String> {
    classify(raw).text().map(str::to_owned)
}

/// Whether reply text can be extracted from `raw`.
///
/// Used to tell the response apart from the conversation state when a
/// backend returns the two as an unordered pair.
pub fn is_recognized(raw: &Value) -> bool {
    classify(raw).text().is_some()
}

/// Pretty-printed payload shown in place of a reply that could not be read.
pub fn pretty_raw(raw: &Value) -> String {
    serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string())
}

fn is_role_content_entry(v: &Value) -> bool {
    v.as_object()
        .map(|m| m.contains_key("role") && m.contains_key("content"))
        .unwrap_or(false)
}

fn last_assistant_content(entries: &[Value]) -> Option<&str> {
    let entry = entries
        .iter()
        .rev()
        .find(|e| e.get("role").and_then(Value::as_str) == Some(ASSISTANT_ROLE))?;
    match entry.get("content")? {
        Value::String(s) => Some(s.as_str()),
        content => content.get("text").and_then(Value::as_str),
    }
}

fn last_pair_text(items: &[Value]) -> Option<&str> {
    match items.last()? {
        Value::Array(pair) if pair.len() == 2 => pair[1].as_str(),
        _ => None,
    }
}
