//! Chat command dispatch
//!
//! Handlers only use the bridge's public surface.

use super::{CreateError, SessionBridge};
use crate::error::{Error, Result};
use crate::format::escape_html;
use crate::store::{now_millis, ChatSessionMapping, ProjectProfile, Slot};
use crate::telegram::{InlineKeyboardButton, InlineKeyboardMarkup};
use std::sync::Arc;
use std::time::Duration;

/// Callback data prefix of the project picker buttons
pub const PROJECT_CALLBACK_PREFIX: &str = "project:";

const HELP: &str = "<b>Commands</b>
/project &lt;slug&gt; - start a session for a project
/&lt;slug&gt; - shorthand for /project &lt;slug&gt;
/projects - list projects
/switch [slug] - list sessions, or switch this topic to another project
/stop - stop this topic's session
/stopall - stop every session in this chat
/cancel - interrupt the running turn
/status - show the current session
/model [name] - show or switch the model
/new - restart the session with a fresh conversation
/help - this message

Anything else you write goes straight to the agent.";

/// Known chat commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Project,
    Projects,
    Switch,
    Stop,
    StopAll,
    Cancel,
    Status,
    Model,
    New,
    Help,
}

impl Command {
    /// Map a lowercased command token to a command
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "project" => Self::Project,
            "projects" => Self::Projects,
            "switch" => Self::Switch,
            "stop" => Self::Stop,
            "stopall" => Self::StopAll,
            "cancel" => Self::Cancel,
            "status" => Self::Status,
            "model" => Self::Model,
            "new" => Self::New,
            "help" | "start" => Self::Help,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    NotHandled,
}

/// Split `/cmd@bot args` into a lowercased token and the argument string.
///
/// Returns `None` for text that is not a command or is addressed to a
/// different bot.
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<(String, String)> {
    let body = text.trim_start().strip_prefix('/')?;
    let (head, args) = match body.find(char::is_whitespace) {
        Some(i) => (&body[..i], body[i..].trim()),
        None => (body, ""),
    };
    let token = match head.split_once('@') {
        Some((token, target)) => {
            if let Some(me) = bot_username {
                if !target.eq_ignore_ascii_case(me) {
                    return None;
                }
            }
            token
        }
        None => head,
    };
    if token.is_empty() {
        return None;
    }
    Some((token.to_lowercase(), args.to_string()))
}

/// Stateless command router
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Run the handler for `token`. Handler errors are logged and reported
    /// to the slot as `Error: <message>`.
    pub async fn dispatch(
        &self,
        bridge: &Arc<SessionBridge>,
        slot: Slot,
        token: &str,
        args: &str,
    ) -> DispatchOutcome {
        let Some(command) = Command::parse(token) else {
            return DispatchOutcome::NotHandled;
        };

        if let Err(e) = self.run(command, bridge, slot, args).await {
            tracing::warn!(slot = %slot, command = ?command, "Command failed: {}", e);
            if let Err(send_err) = bridge.reply_plain(slot, &format!("Error: {}", e)).await {
                tracing::warn!(slot = %slot, "Failed to report command error: {}", send_err);
            }
        }
        DispatchOutcome::Handled
    }

    async fn run(
        &self,
        command: Command,
        bridge: &Arc<SessionBridge>,
        slot: Slot,
        args: &str,
    ) -> Result<()> {
        match command {
            Command::Project => project(bridge, slot, args).await,
            Command::Projects => projects(bridge, slot).await,
            Command::Switch => switch(bridge, slot, args).await,
            Command::Stop => stop(bridge, slot).await,
            Command::StopAll => stop_all(bridge, slot).await,
            Command::Cancel => cancel(bridge, slot).await,
            Command::Status => status(bridge, slot).await,
            Command::Model => model(bridge, slot, args).await,
            Command::New => new_session(bridge, slot).await,
            Command::Help => bridge.reply(slot, HELP).await.map(|_| ()),
        }
    }
}

async fn project(bridge: &Arc<SessionBridge>, slot: Slot, args: &str) -> Result<()> {
    let slug = args.split_whitespace().next().unwrap_or_default();
    if slug.is_empty() {
        let mut html = String::from("Usage: /project &lt;slug&gt;\n\n");
        html.push_str(&project_list(bridge, &[]));
        bridge.reply(slot, &html).await?;
        return Ok(());
    }
    let Some(profile) = bridge.projects().get(slug).cloned() else {
        return not_found(bridge, slot, slug).await;
    };
    start_project(bridge, slot, &profile).await
}

async fn not_found(bridge: &Arc<SessionBridge>, slot: Slot, slug: &str) -> Result<()> {
    let html = format!(
        "Project <code>{}</code> not found. Use /projects to see what is available.",
        escape_html(slug)
    );
    bridge.reply(slot, &html).await?;
    Ok(())
}

async fn start_project(
    bridge: &Arc<SessionBridge>,
    slot: Slot,
    profile: &ProjectProfile,
) -> Result<()> {
    match bridge.create_session(slot, profile).await {
        Ok(mapping) => {
            let html = format!(
                "🚀 Started <b>{}</b> (session <code>{}</code>). Send a message to talk to the agent.",
                escape_html(profile.display_name()),
                escape_html(mapping.short_id())
            );
            bridge.reply(slot, &html).await?;
            if let Err(e) = bridge.publish_status(slot).await {
                tracing::debug!(slot = %slot, "Status card failed: {}", e);
            }
        }
        Err(CreateError::Launch(reason)) => {
            bridge
                .reply_plain(slot, &format!("Failed to start session: {}", reason))
                .await?;
        }
        Err(e) => {
            bridge.reply_plain(slot, &e.to_string()).await?;
        }
    }
    Ok(())
}

async fn projects(bridge: &Arc<SessionBridge>, slot: Slot) -> Result<()> {
    if bridge.projects().is_empty() {
        bridge.reply_plain(slot, "No projects configured.").await?;
        return Ok(());
    }
    let active = bridge.mappings_in_chat(slot.chat_id).await;
    let html = format!("<b>Projects</b>\n{}", project_list(bridge, &active));
    let buttons = bridge
        .projects()
        .list()
        .iter()
        .map(|p| InlineKeyboardButton {
            text: p.display_name().to_string(),
            callback_data: format!("{}{}", PROJECT_CALLBACK_PREFIX, p.slug),
        })
        .collect();
    bridge
        .reply_with_keyboard(slot, &html, InlineKeyboardMarkup::grid(buttons, 2))
        .await?;
    Ok(())
}

fn project_list(bridge: &SessionBridge, active: &[ChatSessionMapping]) -> String {
    bridge
        .projects()
        .list()
        .iter()
        .map(|p| {
            let marker = if active.iter().any(|m| m.project == p.slug) {
                " ✅"
            } else {
                ""
            };
            format!(
                "• <code>{}</code> {}{}",
                escape_html(&p.slug),
                escape_html(p.display_name()),
                marker
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn switch(bridge: &Arc<SessionBridge>, slot: Slot, args: &str) -> Result<()> {
    let slug = args.split_whitespace().next().unwrap_or_default();
    if slug.is_empty() {
        let sessions = bridge.mappings_in_chat(slot.chat_id).await;
        if sessions.is_empty() {
            bridge.reply_plain(slot, "No active sessions in this chat.").await?;
            return Ok(());
        }
        let lines: Vec<String> = sessions
            .iter()
            .map(|m| {
                let topic = if m.topic_id == 0 {
                    "general".to_string()
                } else {
                    format!("topic {}", m.topic_id)
                };
                let here = if m.slot() == slot { " ← here" } else { "" };
                format!(
                    "• {}: <b>{}</b> · <code>{}</code>{}",
                    topic,
                    escape_html(&m.project),
                    escape_html(m.model.as_deref().unwrap_or("default")),
                    here
                )
            })
            .collect();
        let html = format!(
            "<b>Active sessions</b>\n{}\n\nUse /switch &lt;slug&gt; to change this topic's project.",
            lines.join("\n")
        );
        bridge.reply(slot, &html).await?;
        return Ok(());
    }

    let Some(profile) = bridge.projects().get(slug).cloned() else {
        return not_found(bridge, slot, slug).await;
    };
    if let Some(current) = bridge.mapping(slot).await {
        if current.project == profile.slug {
            bridge
                .reply_plain(slot, &format!("Already on {}.", profile.slug))
                .await?;
            return Ok(());
        }
        bridge.destroy_session(slot).await;
    }
    start_project(bridge, slot, &profile).await
}

async fn stop(bridge: &Arc<SessionBridge>, slot: Slot) -> Result<()> {
    let text = match bridge.destroy_session(slot).await {
        Some(mapping) => format!("Session for {} stopped.", mapping.project),
        None => "No active session.".to_string(),
    };
    bridge.reply_plain(slot, &text).await?;
    Ok(())
}

async fn stop_all(bridge: &Arc<SessionBridge>, slot: Slot) -> Result<()> {
    let stopped = bridge.stop_all_in_chat(slot.chat_id).await;
    let text = match stopped {
        0 => "No active sessions in this chat.".to_string(),
        1 => "Stopped 1 session.".to_string(),
        n => format!("Stopped {} sessions.", n),
    };
    bridge.reply_plain(slot, &text).await?;
    Ok(())
}

async fn cancel(bridge: &Arc<SessionBridge>, slot: Slot) -> Result<()> {
    match bridge.interrupt(slot).await {
        Ok(()) => bridge.reply_plain(slot, "⏹ Interrupted.").await.map(|_| ()),
        Err(Error::NoSession) => bridge.reply_plain(slot, "No active session.").await.map(|_| ()),
        Err(e) => Err(e),
    }
}

async fn status(bridge: &Arc<SessionBridge>, slot: Slot) -> Result<()> {
    let Some(mapping) = bridge.mapping(slot).await else {
        bridge.reply_plain(slot, "No active session.").await?;
        return Ok(());
    };
    let now = now_millis();
    let age = Duration::from_millis(now.saturating_sub(mapping.created_at));
    let idle = Duration::from_millis(now.saturating_sub(mapping.last_activity));
    let remaining = bridge.settings().idle_timeout().saturating_sub(idle);
    let name = bridge
        .projects()
        .get(&mapping.project)
        .map(|p| p.display_name().to_string())
        .unwrap_or_else(|| mapping.project.clone());

    let html = format!(
        "<b>{}</b>\nModel: <code>{}</code>\nSession: <code>{}</code>\nRunning for {}\nIdle timeout in {}",
        escape_html(&name),
        escape_html(mapping.model.as_deref().unwrap_or("default")),
        escape_html(mapping.short_id()),
        format_duration(age),
        format_duration(remaining),
    );
    bridge.reply(slot, &html).await?;
    Ok(())
}

async fn model(bridge: &Arc<SessionBridge>, slot: Slot, args: &str) -> Result<()> {
    let requested = args.split_whitespace().next().unwrap_or_default();
    if requested.is_empty() {
        let current = bridge
            .mapping(slot)
            .await
            .map(|m| m.model.unwrap_or_else(|| "default".to_string()));
        let mut html = match current {
            Some(model) => format!("Current model: <code>{}</code>", escape_html(&model)),
            None => "No active session.".to_string(),
        };
        if !bridge.models().is_empty() {
            html.push_str("\n\nAvailable: ");
            let names: Vec<String> = bridge
                .models()
                .iter()
                .map(|m| format!("<code>{}</code>", escape_html(m)))
                .collect();
            html.push_str(&names.join(", "));
        }
        bridge.reply(slot, &html).await?;
        return Ok(());
    }

    bridge.set_model(slot, requested).await?;
    bridge
        .reply(
            slot,
            &format!("Model switched to <code>{}</code>.", escape_html(requested)),
        )
        .await?;
    Ok(())
}

async fn new_session(bridge: &Arc<SessionBridge>, slot: Slot) -> Result<()> {
    if bridge.mapping(slot).await.is_none() {
        bridge.reply_plain(slot, "No active session.").await?;
        return Ok(());
    }
    match bridge.restart_session(slot).await {
        Ok(mapping) => {
            let html = format!(
                "🔄 Fresh session for <b>{}</b> (session <code>{}</code>).",
                escape_html(&mapping.project),
                escape_html(mapping.short_id())
            );
            bridge.reply(slot, &html).await?;
            if let Err(e) = bridge.publish_status(slot).await {
                tracing::debug!(slot = %slot, "Status card failed: {}", e);
            }
        }
        Err(CreateError::Launch(reason)) => {
            bridge
                .reply_plain(slot, &format!("Failed to start session: {}", reason))
                .await?;
        }
        Err(e) => {
            bridge.reply_plain(slot, &e.to_string()).await?;
        }
    }
    Ok(())
}

/// Compact human duration ("1h 05m", "3m 07s", "42s")
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m", h, m)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}
