//! Chat → session mapping persistence
//!
//! The whole table is one JSON array, rewritten on every mutation.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A (chat, topic) pair; topic 0 is the general thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    pub chat_id: i64,
    pub topic_id: i64,
}

impl Slot {
    pub fn new(chat_id: i64, topic_id: i64) -> Self {
        Self { chat_id, topic_id }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.topic_id)
    }
}

/// Binding of one chat slot to one agent session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSessionMapping {
    pub chat_id: i64,
    #[serde(default)]
    pub topic_id: i64,
    pub session_id: String,
    pub project: String,
    pub model: Option<String>,
    /// Unix millis
    pub created_at: u64,
    /// Unix millis of the last inbound user message
    pub last_activity: u64,
    #[serde(default)]
    pub pinned_message_id: Option<i64>,
}

impl ChatSessionMapping {
    pub fn slot(&self) -> Slot {
        Slot::new(self.chat_id, self.topic_id)
    }

    /// First eight characters of the session id
    pub fn short_id(&self) -> &str {
        self.session_id.get(..8).unwrap_or(&self.session_id)
    }
}

/// File-backed mapping table
pub struct MappingStore {
    path: PathBuf,
}

impl MappingStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all mappings. A missing or unreadable file yields an empty table.
    pub fn load(&self) -> Vec<ChatSessionMapping> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to read mappings {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };
        match serde_json::from_str(&data) {
            Ok(mappings) => mappings,
            Err(e) => {
                tracing::warn!("Failed to parse mappings {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    /// Replace the file with `mappings` (temp file + rename)
    pub fn save(&self, mappings: &[ChatSessionMapping]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(mappings)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mapping(chat_id: i64, topic_id: i64, session_id: &str) -> ChatSessionMapping {
        ChatSessionMapping {
            chat_id,
            topic_id,
            session_id: session_id.to_string(),
            project: "demo".to_string(),
            model: Some("sonnet".to_string()),
            created_at: 1_700_000_000_000,
            last_activity: 1_700_000_000_000,
            pinned_message_id: None,
        }
    }

    #[test]
    fn test_slot_display() {
        assert_eq!(Slot::new(-100, 7).to_string(), "-100:7");
    }

    #[test]
    fn test_short_id() {
        let m = mapping(1, 0, "0123456789abcdef");
        assert_eq!(m.short_id(), "01234567");
        let m = mapping(1, 0, "abc");
        assert_eq!(m.short_id(), "abc");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::new(dir.path().join("mappings.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_replaces_whole_table() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::new(dir.path().join("state").join("mappings.json"));
        store
            .save(&[mapping(1, 0, "a"), mapping(1, 5, "b")])
            .unwrap();
        store.save(&[mapping(2, 0, "c")]).unwrap();

        let loaded = store.load();
        assert_eq!(loaded, vec![mapping(2, 0, "c")]);
        assert!(!dir.path().join("state").join("mappings.json.tmp").exists());
    }

    #[test]
    fn test_file_is_json_array() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::new(dir.path().join("mappings.json"));
        store.save(&[mapping(1, 0, "a")]).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert!(raw.is_array());
        assert_eq!(raw[0]["session_id"], "a");
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mappings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(MappingStore::new(path).load().is_empty());
    }

    #[test]
    fn test_legacy_entries_without_topic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mappings.json");
        std::fs::write(
            &path,
            r#"[{"chat_id":9,"session_id":"s","project":"p","model":null,"created_at":1,"last_activity":2}]"#,
        )
        .unwrap();
        let loaded = MappingStore::new(path).load();
        assert_eq!(loaded[0].slot(), Slot::new(9, 0));
        assert_eq!(loaded[0].pinned_message_id, None);
    }
}
