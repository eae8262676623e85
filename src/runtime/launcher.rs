//! CLI process lifecycle management
//!
//! Spawns one agent CLI per session in stream-json mode. A writer task
//! feeds stdin, a reader task turns stdout NDJSON into [`RuntimeEvent`]s,
//! and a monitor task reaps the process.

use super::types::{
    interrupt_to_cli_ndjson, parse_ndjson_line, set_model_to_cli_ndjson,
    user_message_to_cli_ndjson, CliMessage,
};
use super::{AgentRuntime, EventRegistry, LaunchRequest, RuntimeEvent, TurnSummary};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::codec::{FramedRead, LinesCodec};

/// Longest NDJSON line accepted from the CLI
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Grace period between the kill request and a forced kill
const KILL_GRACE: Duration = Duration::from_secs(5);

struct ProcessHandle {
    stdin_tx: mpsc::UnboundedSender<String>,
    kill_tx: Option<oneshot::Sender<()>>,
    pid: Option<u32>,
}

/// Runs the agent CLI as a child process per session
pub struct ProcessRuntime {
    config: RuntimeConfig,
    processes: Arc<RwLock<HashMap<String, ProcessHandle>>>,
    events: Arc<EventRegistry>,
}

impl ProcessRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            processes: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(EventRegistry::new()),
        }
    }

    fn binary(&self) -> Result<PathBuf> {
        match &self.config.binary {
            Some(path) => Ok(path.clone()),
            None => resolve_binary(),
        }
    }

    fn build_args(&self, request: &LaunchRequest) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--input-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--session-id".to_string(),
            request.session_id.clone(),
        ];
        if let Some(ref m) = request.model {
            args.push("--model".to_string());
            args.push(m.clone());
        }
        if let Some(ref pm) = request.permission_mode {
            args.push("--permission-mode".to_string());
            args.push(pm.clone());
        }
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    async fn write_line(&self, session_id: &str, msg: &serde_json::Value) -> Result<()> {
        let line = format!("{}\n", serde_json::to_string(msg)?);
        let processes = self.processes.read().await;
        let handle = processes
            .get(session_id)
            .ok_or_else(|| Error::Runtime(format!("Session {} is not running", session_id)))?;
        handle
            .stdin_tx
            .send(line)
            .map_err(|_| Error::Runtime(format!("Session {} stdin is closed", session_id)))
    }
}

#[async_trait]
impl AgentRuntime for ProcessRuntime {
    async fn launch(&self, request: LaunchRequest) -> Result<()> {
        let binary = self.binary()?;
        let args = self.build_args(&request);
        let session_id = request.session_id.clone();

        tracing::info!(
            session_id = %session_id,
            binary = %binary.display(),
            cwd = %request.cwd.display(),
            "Spawning agent CLI"
        );

        let mut child = Command::new(&binary)
            .args(&args)
            .current_dir(&request.cwd)
            .env("CLAUDECODE", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Runtime(format!(
                    "Failed to spawn agent CLI at {}: {}",
                    binary.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Runtime("Agent CLI stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Runtime("Agent CLI stdout unavailable".to_string()))?;
        let stderr = child.stderr.take();

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        self.processes.write().await.insert(
            session_id.clone(),
            ProcessHandle {
                stdin_tx,
                kill_tx: Some(kill_tx),
                pid: child.id(),
            },
        );

        spawn_stdin_writer(session_id.clone(), stdin, stdin_rx);
        spawn_stdout_reader(session_id.clone(), stdout, self.events.clone());
        if let Some(stderr) = stderr {
            spawn_stderr_logger(session_id.clone(), stderr);
        }
        spawn_exit_monitor(
            session_id,
            child,
            kill_rx,
            self.processes.clone(),
            self.events.clone(),
        );

        Ok(())
    }

    async fn send_text(&self, session_id: &str, text: &str) -> Result<()> {
        self.write_line(session_id, &user_message_to_cli_ndjson(text, session_id))
            .await
    }

    async fn interrupt(&self, session_id: &str) -> Result<()> {
        self.write_line(session_id, &interrupt_to_cli_ndjson()).await
    }

    async fn set_model(&self, session_id: &str, model: &str) -> Result<()> {
        self.write_line(session_id, &set_model_to_cli_ndjson(model))
            .await
    }

    async fn kill(&self, session_id: &str) -> Result<()> {
        let handle = self.processes.write().await.remove(session_id);
        if let Some(mut handle) = handle {
            tracing::info!(session_id = session_id, pid = ?handle.pid, "Killing agent CLI");
            if let Some(kill_tx) = handle.kill_tx.take() {
                let _ = kill_tx.send(());
            }
        }
        Ok(())
    }

    async fn is_alive(&self, session_id: &str) -> bool {
        self.processes.read().await.contains_key(session_id)
    }

    fn events(&self) -> &EventRegistry {
        &self.events
    }
}

fn spawn_stdin_writer(
    session_id: String,
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let written = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await
            }
            .await;
            if let Err(e) = written {
                tracing::warn!(session_id = %session_id, "Agent CLI stdin write failed: {}", e);
                break;
            }
        }
    });
}

fn spawn_stdout_reader(
    session_id: String,
    stdout: tokio::process::ChildStdout,
    events: Arc<EventRegistry>,
) {
    tokio::spawn(async move {
        let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, "Agent CLI stdout error: {}", e);
                    break;
                }
            };
            if let Some(event) = parse_ndjson_line(&line).and_then(|msg| to_event(&session_id, msg))
            {
                events.publish(&session_id, event);
            }
        }
    });
}

fn spawn_stderr_logger(session_id: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = FramedRead::new(stderr, LinesCodec::new_with_max_length(64 * 1024));
        while let Some(Ok(line)) = lines.next().await {
            tracing::debug!(session_id = %session_id, "agent stderr: {}", line);
        }
    });
}

fn spawn_exit_monitor(
    session_id: String,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    processes: Arc<RwLock<HashMap<String, ProcessHandle>>>,
    events: Arc<EventRegistry>,
) {
    tokio::spawn(async move {
        let reason = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => format!("agent process exited ({})", status),
                Err(e) => format!("agent process lost: {}", e),
            },
            _ = kill_rx => {
                let _ = child.start_kill();
                if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
                    tracing::warn!(session_id = %session_id, "Force killing agent CLI");
                    let _ = child.kill().await;
                }
                "agent process stopped".to_string()
            }
        };

        tracing::info!(session_id = %session_id, reason = %reason, "Agent CLI exited");
        processes.write().await.remove(&session_id);
        events.publish(&session_id, RuntimeEvent::Disconnected { reason });
    });
}

/// Map a CLI message onto the bridge-facing event set
fn to_event(session_id: &str, msg: CliMessage) -> Option<RuntimeEvent> {
    match msg {
        CliMessage::Assistant(ast) if ast.parent_tool_use_id.is_none() => {
            Some(RuntimeEvent::Assistant {
                content: ast.message.content,
            })
        }
        CliMessage::Result(res) => Some(RuntimeEvent::Completed(TurnSummary::from(&res))),
        CliMessage::ToolProgress(_) => Some(RuntimeEvent::Working),
        CliMessage::System(sys) if sys.subtype == "status" => {
            Some(RuntimeEvent::StatusChanged { status: sys.status })
        }
        CliMessage::System(sys) => {
            tracing::debug!(
                session_id = session_id,
                subtype = %sys.subtype,
                model = ?sys.model,
                "Agent CLI system message"
            );
            None
        }
        _ => None,
    }
}

/// Resolve the agent CLI binary path
pub fn resolve_binary() -> Result<PathBuf> {
    if let Ok(output) = std::process::Command::new("which").arg("claude").output() {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
    }

    let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let candidates = [
        home.join(".claude").join("local").join("claude"),
        PathBuf::from("/usr/local/bin/claude"),
        PathBuf::from("/opt/homebrew/bin/claude"),
    ];
    candidates
        .into_iter()
        .find(|candidate| candidate.exists())
        .ok_or_else(|| {
            Error::Runtime("Agent CLI not found; set runtime.binary in the config".to_string())
        })
}
