//! Durable bridge state
//!
//! - `mappings.json`: the chat → session table
//! - `sessions/<id>.json`: per-session launch metadata
//! - the project catalog, read-only and sourced from configuration

mod mappings;
mod projects;
mod sessions;

pub use mappings::{ChatSessionMapping, MappingStore, Slot};
pub use projects::{ProjectCatalog, ProjectProfile};
pub use sessions::{SessionRecord, SessionStore};

use std::path::Path;

/// Current time in milliseconds since UNIX epoch
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Mapping and session stores rooted at one state directory
pub fn open_stores(state_dir: &Path) -> (MappingStore, SessionStore) {
    (
        MappingStore::new(state_dir.join("mappings.json")),
        SessionStore::new(state_dir.join("sessions")),
    )
}
