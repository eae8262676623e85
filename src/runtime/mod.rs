//! Agent runtime boundary
//!
//! One external agent process per session. The bridge injects user text,
//! interrupts and model switches, and consumes typed events through the
//! [`EventRegistry`].

mod launcher;
mod registry;
pub mod types;

pub use launcher::{resolve_binary, ProcessRuntime};
pub use registry::EventRegistry;
pub use types::ContentBlock;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Parameters of a runtime launch
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub session_id: String,
    pub cwd: PathBuf,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
}

/// Completion statistics of one agent turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnSummary {
    pub is_error: bool,
    pub num_turns: Option<u32>,
    pub total_cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
}

impl From<&types::CliResultMessage> for TurnSummary {
    fn from(res: &types::CliResultMessage) -> Self {
        Self {
            is_error: res.is_error,
            num_turns: res.num_turns,
            total_cost_usd: res.total_cost_usd,
            duration_ms: res.duration_ms,
        }
    }
}

/// Events a runtime publishes per session
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// Assistant content blocks (prose and tool use)
    Assistant { content: Vec<ContentBlock> },
    /// The turn finished
    Completed(TurnSummary),
    /// Progress heartbeat while a tool runs
    Working,
    /// Runtime status change (e.g. compacting)
    StatusChanged { status: Option<String> },
    /// The runtime went away
    Disconnected { reason: String },
}

/// Agent runtime driven by the bridge
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Start a runtime for a new session
    async fn launch(&self, request: LaunchRequest) -> Result<()>;

    /// Inject a user turn
    async fn send_text(&self, session_id: &str, text: &str) -> Result<()>;

    /// Interrupt the running turn
    async fn interrupt(&self, session_id: &str) -> Result<()>;

    /// Switch the model for subsequent turns
    async fn set_model(&self, session_id: &str, model: &str) -> Result<()>;

    /// Terminate the runtime
    async fn kill(&self, session_id: &str) -> Result<()>;

    async fn is_alive(&self, session_id: &str) -> bool;

    /// Event fan-out for all sessions of this runtime
    fn events(&self) -> &EventRegistry;
}
