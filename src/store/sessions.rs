//! Session metadata store
//!
//! One JSON record per session under `<state_dir>/sessions/`.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Durable metadata of a launched session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub chat_id: i64,
    pub topic_id: i64,
    pub project: String,
    pub cwd: PathBuf,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub created_at: u64,
}

pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", session_id))
    }

    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(self.record_path(&record.session_id), json)?;
        Ok(())
    }

    /// Delete a record; deleting a missing record succeeds
    pub fn remove(&self, session_id: &str) -> Result<()> {
        match std::fs::remove_file(self.record_path(session_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.record_path(session_id).is_file()
    }

    pub fn load(&self, session_id: &str) -> Option<SessionRecord> {
        let data = std::fs::read_to_string(self.record_path(session_id)).ok()?;
        serde_json::from_str(&data)
            .map_err(|e| tracing::warn!(session_id, "Failed to parse session record: {}", e))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str) -> SessionRecord {
        SessionRecord {
            session_id: id.to_string(),
            chat_id: 1,
            topic_id: 0,
            project: "demo".to_string(),
            cwd: PathBuf::from("/tmp/demo"),
            model: None,
            permission_mode: Some("default".to_string()),
            created_at: 1,
        }
    }

    #[test]
    fn test_save_load_remove() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));
        assert!(!store.exists("s1"));

        store.save(&record("s1")).unwrap();
        assert!(store.exists("s1"));
        assert_eq!(store.load("s1"), Some(record("s1")));

        store.remove("s1").unwrap();
        assert!(!store.exists("s1"));
        assert!(store.load("s1").is_none());
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        assert!(store.remove("ghost").is_ok());
    }
}
