//! Local key-value snapshot of the message list.
//!
//! The file holds a JSON object; the message list lives under
//! [`MESSAGES_KEY`] and other keys are preserved on save. A missing file,
//! missing key, unreadable JSON or empty list restores the single seeded
//! greeting instead.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::ChatError;
use crate::Message;

pub const MESSAGES_KEY: &str = "chat-relay.messages";

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    greeting: String,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>, greeting: impl Into<String>) -> Self {
        SnapshotStore {
            path: path.into(),
            greeting: greeting.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `messages` under the fixed key.
    pub fn save(&self, messages: &[Message]) -> Result<(), ChatError> {
        let mut map = match self.read_map() {
            Ok(Some(map)) => map,
            _ => Map::new(),
        };
        map.insert(MESSAGES_KEY.to_string(), serde_json::to_value(messages)?);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&Value::Object(map))?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Restore the message list, falling back to the seeded greeting.
    pub fn load(&self) -> Vec<Message> {
        match self.try_load() {
            Ok(Some(messages)) if !messages.is_empty() => messages,
            Ok(_) => self.seeded(),
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "discarding unreadable snapshot");
                self.seeded()
            }
        }
    }

    /// Remove the stored list, leaving other keys alone.
    pub fn clear(&self) -> Result<(), ChatError> {
        let Ok(Some(mut map)) = self.read_map() else {
            return Ok(());
        };
        if map.remove(MESSAGES_KEY).is_some() {
            std::fs::write(&self.path, serde_json::to_vec_pretty(&Value::Object(map))?)?;
        }
        Ok(())
    }

    fn seeded(&self) -> Vec<Message> {
        vec![Message::assistant(self.greeting.clone())]
    }

    fn try_load(&self) -> Result<Option<Vec<Message>>, ChatError> {
        let Some(mut map) = self.read_map()? else {
            return Ok(None);
        };
        match map.remove(MESSAGES_KEY) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn read_map(&self) -> Result<Option<Map<String, Value>>, ChatError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<Value>(&raw)? {
            Value::Object(map) => Ok(Some(map)),
            _ => Err(ChatError::Config(format!(
                "snapshot {} is not a JSON object",
                self.path.display()
            ))),
        }
    }
}
