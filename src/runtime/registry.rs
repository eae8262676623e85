//! Per-session event fan-out
//!
//! Subscribers are keyed by session id and subscriber id
//! (`<channel>:<chat>`). Dropping a subscription closes the receiver, which
//! is how relay tasks learn to stop.

use super::RuntimeEvent;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

type Subscribers = HashMap<String, mpsc::UnboundedSender<RuntimeEvent>>;

/// Publish/subscribe registry of runtime events
#[derive(Default)]
pub struct EventRegistry {
    sessions: Mutex<HashMap<String, Subscribers>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a session's events, replacing any previous
    /// subscription under the same subscriber id.
    pub fn subscribe(
        &self,
        session_id: &str,
        subscriber_id: &str,
    ) -> mpsc::UnboundedReceiver<RuntimeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions
                .entry(session_id.to_string())
                .or_default()
                .insert(subscriber_id.to_string(), tx);
        }
        rx
    }

    /// Remove one subscription. Returns whether it existed.
    pub fn unsubscribe(&self, session_id: &str, subscriber_id: &str) -> bool {
        let Ok(mut sessions) = self.sessions.lock() else {
            return false;
        };
        let Some(subs) = sessions.get_mut(session_id) else {
            return false;
        };
        let removed = subs.remove(subscriber_id).is_some();
        if subs.is_empty() {
            sessions.remove(session_id);
        }
        removed
    }

    /// Drop every subscription of a session
    pub fn remove_session(&self, session_id: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(session_id);
        }
    }

    /// Deliver an event to every subscriber of a session, pruning closed
    /// receivers. Returns the number of deliveries.
    pub fn publish(&self, session_id: &str, event: RuntimeEvent) -> usize {
        let Ok(mut sessions) = self.sessions.lock() else {
            return 0;
        };
        let Some(subs) = sessions.get_mut(session_id) else {
            return 0;
        };
        subs.retain(|_, tx| tx.send(event.clone()).is_ok());
        let delivered = subs.len();
        if subs.is_empty() {
            sessions.remove(session_id);
        }
        delivered
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .ok()
            .and_then(|sessions| sessions.get(session_id).map(HashMap::len))
            .unwrap_or(0)
    }
}
