//! Line and server-sent-event framing over a raw byte stream, plus the
//! mapping from decoded frames to [`RawEvent`]s.

use serde_json::{json, Value};

use crate::normalize::is_recognized;
use crate::reassembly::RawEvent;

/// Splits bytes into `\n` (or `\r\n`) terminated lines.
///
/// Bytes are buffered until a newline arrives, so a multi-byte character cut
/// across two chunks is decoded intact.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // Buffered bytes never hold a newline, so only the new chunk is scanned.
        let mut search = self.buf.len();
        self.buf.extend_from_slice(chunk);
        let mut start = 0;
        let mut lines = Vec::new();
        while let Some(offset) = self.buf[search..].iter().position(|b| *b == b'\n') {
            let end = search + offset;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
            search = start;
        }
        self.buf.drain(..start);
        lines
    }

    /// Whatever is left after the last newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    lines: LineSplitter,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk, returning every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let lines = self.lines.push(chunk);
        lines.iter().filter_map(|line| self.feed_line(line)).collect()
    }

    /// Flush a trailing frame the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if let Some(line) = self.lines.finish() {
            if let Some(frame) = self.feed_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn feed_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id / retry
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        Some(SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// A frame mapped to a raw event; `terminal` ends the stream after it.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapped {
    pub event: RawEvent,
    pub terminal: bool,
}

impl Mapped {
    fn more(event: RawEvent) -> Option<Self> {
        Some(Mapped {
            event,
            terminal: false,
        })
    }

    fn last(event: RawEvent) -> Option<Self> {
        Some(Mapped {
            event,
            terminal: true,
        })
    }
}

/// Map a frame to the event its content calls for.
///
/// The SSE `event:` name wins when present; otherwise the JSON body's `msg`
/// (or `type`) field decides, then `token`/`delta` fields, then whether the
/// body is a recognisable reply shape. Frames that decide nothing are status.
pub fn map_frame(frame: &SseFrame) -> Option<Mapped> {
    let name = frame.event.as_deref().map(str::to_ascii_lowercase);
    let name = name.as_deref();
    let data = frame.data.trim();

    if data.is_empty() {
        return match name {
            Some("error") => Mapped::last(RawEvent::Error(json!({"error": "backend reported an error"}))),
            Some("complete") => Mapped::last(RawEvent::Status(json!({"event": "complete"}))),
            Some(other) => Mapped::more(RawEvent::Status(json!({"event": other}))),
            None => None,
        };
    }
    if data == "[DONE]" {
        return Mapped::last(RawEvent::Status(json!({"event": "done"})));
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            return Mapped::last(RawEvent::Error(json!({
                "error": format!("malformed frame: {e}"),
                "frame": data,
            })))
        }
    };

    match name {
        Some("error") => return Mapped::last(RawEvent::Error(value)),
        Some("complete") => return Mapped::last(data_event(value)),
        Some("generating") => return Mapped::more(data_event(value)),
        Some("token") | Some("delta") => {
            if let Value::String(s) = value {
                return Mapped::more(RawEvent::Token(s));
            }
        }
        Some("heartbeat") => return Mapped::more(RawEvent::Status(value)),
        _ => {}
    }

    let msg = value
        .get("msg")
        .or_else(|| value.get("type"))
        .and_then(Value::as_str)
        .map(str::to_owned);
    match msg.as_deref() {
        Some("error") | Some("process_error") => return Mapped::last(RawEvent::Error(value)),
        Some("process_completed") => {
            if value.get("success") == Some(&Value::Bool(false)) {
                let detail = value.get("output").cloned().unwrap_or(value);
                return Mapped::last(RawEvent::Error(detail));
            }
            return Mapped::last(output_data(value));
        }
        Some("process_generating") => return Mapped::more(output_data(value)),
        _ => {}
    }

    if let Value::String(s) = value {
        return Mapped::more(RawEvent::Token(s));
    }
    if let Some(fragment) = value
        .get("token")
        .or_else(|| value.get("delta"))
        .and_then(Value::as_str)
    {
        return Mapped::more(RawEvent::Token(fragment.to_string()));
    }
    if matches!(value.get("data"), Some(Value::Array(_))) || is_recognized(&value) {
        return Mapped::more(data_event(value));
    }
    Mapped::more(RawEvent::Status(value))
}

/// `[...]` or `{"data": [...]}` become the pair; anything else is a lone
/// response.
pub fn data_event(value: Value) -> RawEvent {
    match value {
        Value::Array(items) => RawEvent::Data(items),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => RawEvent::Data(items),
            Some(other) => {
                map.insert("data".to_string(), other);
                RawEvent::Data(vec![Value::Object(map)])
            }
            None => RawEvent::Data(vec![Value::Object(map)]),
        },
        other => RawEvent::Data(vec![other]),
    }
}

fn output_data(value: Value) -> RawEvent {
    match value.get("output").and_then(|o| o.get("data")) {
        Some(Value::Array(items)) => RawEvent::Data(items.clone()),
        _ => RawEvent::Status(value),
    }
}
