//! Typing indicator and idle eviction timers

use super::SessionBridge;
use crate::store::Slot;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Chat action sent while the agent works
const TYPING_ACTION: &str = "typing";

struct IdleTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Per-slot timer tasks. Not persisted.
#[derive(Default)]
pub(super) struct TimerSet {
    typing: HashMap<Slot, JoinHandle<()>>,
    idle: HashMap<Slot, IdleTimer>,
    next_generation: u64,
}

impl TimerSet {
    fn stop_typing(&mut self, slot: Slot) -> bool {
        match self.typing.remove(&slot) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn disarm_idle(&mut self, slot: Slot) {
        if let Some(timer) = self.idle.remove(&slot) {
            timer.handle.abort();
        }
    }

    pub(super) fn clear(&mut self, slot: Slot) {
        self.stop_typing(slot);
        self.disarm_idle(slot);
    }

    pub(super) fn clear_all(&mut self) {
        for (_, handle) in self.typing.drain() {
            handle.abort();
        }
        for (_, timer) in self.idle.drain() {
            timer.handle.abort();
        }
    }
}

impl SessionBridge {
    /// Refresh the typing indicator until stopped. Already typing is a no-op.
    pub(super) async fn start_typing(&self, slot: Slot) {
        let mut timers = self.timers.lock().await;
        if let Some(handle) = timers.typing.get(&slot) {
            if !handle.is_finished() {
                return;
            }
        }

        let chat = Arc::clone(&self.chat);
        let interval = self.settings.typing_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = chat
                    .send_chat_action(slot.chat_id, slot.topic_id, TYPING_ACTION)
                    .await
                {
                    tracing::debug!(slot = %slot, "Typing ping failed: {}", e);
                }
            }
        });
        timers.typing.insert(slot, handle);
    }

    /// Stop the typing indicator. Stopping a stopped indicator is a no-op.
    pub async fn stop_typing(&self, slot: Slot) {
        self.timers.lock().await.stop_typing(slot);
    }

    pub async fn is_typing(&self, slot: Slot) -> bool {
        self.timers
            .lock()
            .await
            .typing
            .get(&slot)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// (Re)arm the idle deadline of a slot to fire `after` from now
    pub(super) async fn arm_idle(self: &Arc<Self>, slot: Slot, after: Duration) {
        let mut timers = self.timers.lock().await;
        timers.disarm_idle(slot);
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let bridge: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(bridge) = bridge.upgrade() {
                bridge.on_idle_expired(slot, generation).await;
            }
        });
        timers.idle.insert(slot, IdleTimer { generation, handle });
    }

    async fn on_idle_expired(&self, slot: Slot, generation: u64) {
        {
            let mut timers = self.timers.lock().await;
            match timers.idle.get(&slot) {
                // Leave our own entry without aborting this task
                Some(timer) if timer.generation == generation => {
                    timers.idle.remove(&slot);
                }
                _ => return,
            }
        }

        let Some(mapping) = self.destroy_session(slot).await else {
            return;
        };
        tracing::info!(slot = %slot, session_id = %mapping.session_id, "Session evicted after idle timeout");
        let minutes = self.settings.idle_timeout().as_secs() / 60;
        let notice = format!(
            "Session for {} ended due to inactivity ({} min without messages). Use /project {} to start again.",
            mapping.project, minutes, mapping.project
        );
        if let Err(e) = self.reply_plain(slot, &notice).await {
            tracing::warn!(slot = %slot, "Failed to send idle notice: {}", e);
        }
    }

    pub(super) async fn clear_timers(&self, slot: Slot) {
        self.timers.lock().await.clear(slot);
    }

    pub async fn has_idle_timer(&self, slot: Slot) -> bool {
        self.timers.lock().await.idle.contains_key(&slot)
    }
}
