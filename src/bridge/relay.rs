//! Runtime event → chat relay
//!
//! One task per active session drains the session's subscription. It ends
//! when the subscription is dropped or the slot is remapped.

use super::SessionBridge;
use crate::format::{split_content, summary_line};
use crate::runtime::RuntimeEvent;
use crate::store::Slot;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// What the relay does after an event
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

impl SessionBridge {
    pub(super) fn spawn_relay(
        self: &Arc<Self>,
        slot: Slot,
        session_id: String,
        mut rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    ) {
        let bridge: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(bridge) = bridge.upgrade() else {
                    break;
                };
                if bridge.relay_event(slot, &session_id, event).await == Flow::Stop {
                    break;
                }
            }
            tracing::debug!(slot = %slot, session_id = %session_id, "Relay finished");
        });
    }

    async fn relay_event(&self, slot: Slot, session_id: &str, event: RuntimeEvent) -> Flow {
        let current = self.mapping(slot).await;
        if current.as_ref().map(|m| m.session_id.as_str()) != Some(session_id) {
            return Flow::Stop;
        }

        match event {
            RuntimeEvent::Assistant { content } => {
                let (tools, prose) = split_content(&content);
                for line in &tools {
                    if let Err(e) = self.reply(slot, line).await {
                        tracing::warn!(slot = %slot, "Failed to send tool line: {}", e);
                    }
                }
                if !prose.trim().is_empty() {
                    self.stop_typing(slot).await;
                    if let Err(e) = self.send_markdown(slot, &prose).await {
                        tracing::warn!(slot = %slot, "Failed to send reply: {}", e);
                    }
                } else if !tools.is_empty() {
                    self.start_typing(slot).await;
                }
            }
            RuntimeEvent::Completed(summary) => {
                self.stop_typing(slot).await;
                if let Err(e) = self.reply_plain(slot, &summary_line(&summary)).await {
                    tracing::warn!(slot = %slot, "Failed to send turn summary: {}", e);
                }
            }
            RuntimeEvent::Working => self.start_typing(slot).await,
            RuntimeEvent::Disconnected { reason } => {
                tracing::info!(slot = %slot, session_id, reason = %reason, "Runtime disconnected");
                if let Some(mapping) = self.destroy_session(slot).await {
                    let notice = format!(
                        "Session for {} ended: {}. Use /project {} to start again.",
                        mapping.project, reason, mapping.project
                    );
                    if let Err(e) = self.reply_plain(slot, &notice).await {
                        tracing::warn!(slot = %slot, "Failed to send disconnect notice: {}", e);
                    }
                }
                return Flow::Stop;
            }
            RuntimeEvent::StatusChanged { status } => {
                tracing::debug!(slot = %slot, status = ?status, "Runtime status changed");
            }
        }
        Flow::Continue
    }
}
