//! In-memory chat provider and runtime for bridge tests

use super::SessionBridge;
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::runtime::{AgentRuntime, EventRegistry, LaunchRequest};
use crate::store::ProjectProfile;
use crate::telegram::{
    CallbackQuery, Chat, ChatApi, Message, ParseMode, SendMessage, Update, User,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const CHAT: i64 = 100;
pub const BOT: &str = "bridge_bot";

/// One outbound call observed by [`RecordingChat`]
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: &'static str,
    pub chat_id: i64,
    pub topic_id: i64,
    pub text: String,
    pub html: bool,
}

/// Chat provider that records every call
#[derive(Default)]
pub struct RecordingChat {
    calls: Mutex<Vec<Call>>,
    updates: Mutex<VecDeque<Vec<Update>>>,
    fail_html: AtomicBool,
    next_message_id: AtomicI64,
}

impl RecordingChat {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than typing pings
    pub fn visible(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.method != "sendChatAction")
            .collect()
    }

    /// Texts of every sent message
    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == "sendMessage")
            .map(|c| c.text)
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls().iter().filter(|c| c.method == method).count()
    }

    pub fn queue_updates(&self, updates: Vec<Update>) {
        self.updates.lock().unwrap().push_back(updates);
    }

    /// Reject HTML sends as unparsable markup
    pub fn set_fail_html(&self, fail: bool) {
        self.fail_html.store(fail, Ordering::SeqCst);
    }

    fn record(&self, method: &'static str, chat_id: i64, topic_id: i64, text: &str, html: bool) {
        self.calls.lock().unwrap().push(Call {
            method,
            chat_id,
            topic_id,
            text: text.to_string(),
            html,
        });
    }

    fn next_id(&self) -> i64 {
        self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl ChatApi for RecordingChat {
    async fn get_me(&self) -> Result<User> {
        self.record("getMe", 0, 0, "", false);
        Ok(User {
            id: 1,
            is_bot: true,
            first_name: "Bridge".to_string(),
            username: Some(BOT.to_string()),
        })
    }

    async fn delete_webhook(&self) -> Result<()> {
        self.record("deleteWebhook", 0, 0, "", false);
        Ok(())
    }

    async fn get_updates(&self, _offset: i64, timeout: Duration) -> Result<Vec<Update>> {
        let queued = self.updates.lock().unwrap().pop_front();
        match queued {
            Some(updates) => Ok(updates),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(Vec::new())
            }
        }
    }

    async fn send_message(&self, request: &SendMessage) -> Result<i64> {
        let html = request.parse_mode == Some(ParseMode::Html);
        if html && self.fail_html.load(Ordering::SeqCst) {
            return Err(Error::Telegram {
                code: Some(400),
                description: "Bad Request: can't parse entities".to_string(),
            });
        }
        let topic = request.message_thread_id.unwrap_or(0);
        self.record("sendMessage", request.chat_id, topic, &request.text, html);
        Ok(self.next_id())
    }

    async fn edit_message_text(&self, chat_id: i64, _message_id: i64, html: &str) -> Result<()> {
        self.record("editMessageText", chat_id, 0, html, true);
        Ok(())
    }

    async fn send_chat_action(&self, chat_id: i64, topic_id: i64, action: &str) -> Result<()> {
        self.record("sendChatAction", chat_id, topic_id, action, false);
        Ok(())
    }

    async fn set_reaction(&self, chat_id: i64, _message_id: i64, emoji: &str) -> Result<()> {
        self.record("setMessageReaction", chat_id, 0, emoji, false);
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, _text: Option<&str>) -> Result<()> {
        self.record("answerCallbackQuery", 0, 0, callback_id, false);
        Ok(())
    }

    async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        self.record("pinChatMessage", chat_id, 0, &message_id.to_string(), false);
        Ok(())
    }

    async fn unpin_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        self.record("unpinChatMessage", chat_id, 0, &message_id.to_string(), false);
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        topic_id: i64,
        file_name: &str,
        _content: Bytes,
        _caption: Option<&str>,
    ) -> Result<i64> {
        self.record("sendDocument", chat_id, topic_id, file_name, false);
        Ok(self.next_id())
    }

    async fn download_file(&self, file_id: &str) -> Result<Bytes> {
        self.record("getFile", 0, 0, file_id, false);
        Ok(Bytes::from_static(b"uploaded bytes"))
    }
}

/// Runtime that tracks calls instead of spawning processes
#[derive(Default)]
pub struct MockRuntime {
    events: EventRegistry,
    alive: Mutex<HashSet<String>>,
    launches: Mutex<Vec<LaunchRequest>>,
    sent: Mutex<Vec<(String, String)>>,
    interrupts: Mutex<Vec<String>>,
    models: Mutex<Vec<(String, String)>>,
    killed: Mutex<Vec<String>>,
    fail_launch: AtomicBool,
    launch_delay: Mutex<Option<Duration>>,
}

impl MockRuntime {
    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.launches.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn interrupts(&self) -> Vec<String> {
        self.interrupts.lock().unwrap().clone()
    }

    pub fn model_switches(&self) -> Vec<(String, String)> {
        self.models.lock().unwrap().clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }

    pub fn mark_alive(&self, session_id: &str) {
        self.alive.lock().unwrap().insert(session_id.to_string());
    }

    pub fn set_fail_launch(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        *self.launch_delay.lock().unwrap() = Some(delay);
    }

    fn require_alive(&self, session_id: &str) -> Result<()> {
        if self.alive.lock().unwrap().contains(session_id) {
            Ok(())
        } else {
            Err(Error::Runtime(format!("Session {} is not running", session_id)))
        }
    }
}

#[async_trait]
impl AgentRuntime for MockRuntime {
    async fn launch(&self, request: LaunchRequest) -> Result<()> {
        let delay = *self.launch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(Error::Runtime("agent binary not found".to_string()));
        }
        self.mark_alive(&request.session_id);
        self.launches.lock().unwrap().push(request);
        Ok(())
    }

    async fn send_text(&self, session_id: &str, text: &str) -> Result<()> {
        self.require_alive(session_id)?;
        self.sent
            .lock()
            .unwrap()
            .push((session_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn interrupt(&self, session_id: &str) -> Result<()> {
        self.require_alive(session_id)?;
        self.interrupts.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    async fn set_model(&self, session_id: &str, model: &str) -> Result<()> {
        self.require_alive(session_id)?;
        self.models
            .lock()
            .unwrap()
            .push((session_id.to_string(), model.to_string()));
        Ok(())
    }

    async fn kill(&self, session_id: &str) -> Result<()> {
        self.alive.lock().unwrap().remove(session_id);
        self.killed.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    async fn is_alive(&self, session_id: &str) -> bool {
        self.alive.lock().unwrap().contains(session_id)
    }

    fn events(&self) -> &EventRegistry {
        &self.events
    }
}

pub struct Harness {
    pub bridge: Arc<SessionBridge>,
    pub chat: Arc<RecordingChat>,
    pub runtime: Arc<MockRuntime>,
    pub dir: TempDir,
}

pub fn project(slug: &str, dir: &Path) -> ProjectProfile {
    ProjectProfile {
        slug: slug.to_string(),
        name: String::new(),
        cwd: dir.join(slug),
        model: None,
        permission_mode: "default".to_string(),
    }
}

pub fn config(dir: &Path) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.telegram.bot_token = "123:test".to_string();
    config.telegram.allowed_chats = vec![CHAT];
    config.storage.state_dir = dir.join("state");
    config.models = vec!["sonnet".to_string(), "opus".to_string()];
    config.projects = vec![project("web", dir), project("api", dir)];
    config
}

pub fn harness() -> Harness {
    harness_with(TempDir::new().unwrap(), Arc::new(MockRuntime::default()), |_| {})
}

/// Build a bridge over an existing state directory and runtime
pub fn harness_with(
    dir: TempDir,
    runtime: Arc<MockRuntime>,
    customize: impl FnOnce(&mut BridgeConfig),
) -> Harness {
    let mut config = config(dir.path());
    customize(&mut config);
    let chat = Arc::new(RecordingChat::default());
    let bridge = SessionBridge::new(&config, chat.clone(), runtime.clone()).unwrap();
    Harness {
        bridge,
        chat,
        runtime,
        dir,
    }
}

pub fn message(message_id: i64, chat_id: i64, kind: &str, topic: i64, text: &str) -> Message {
    Message {
        message_id,
        chat: Chat {
            id: chat_id,
            kind: kind.to_string(),
            title: None,
        },
        from: Some(User {
            id: 7,
            is_bot: false,
            first_name: "Dana".to_string(),
            username: None,
        }),
        message_thread_id: (topic != 0).then_some(topic),
        is_topic_message: topic != 0,
        text: Some(text.to_string()),
        caption: None,
        photo: None,
        document: None,
    }
}

pub fn text_update(update_id: i64, chat_id: i64, text: &str) -> Update {
    Update {
        update_id,
        message: Some(message(update_id, chat_id, "private", 0, text)),
        callback_query: None,
    }
}

pub fn message_update(update_id: i64, message: Message) -> Update {
    Update {
        update_id,
        message: Some(message),
        callback_query: None,
    }
}

pub fn callback_update(update_id: i64, chat_id: i64, data: &str) -> Update {
    Update {
        update_id,
        message: None,
        callback_query: Some(CallbackQuery {
            id: format!("cb-{}", update_id),
            from: User {
                id: 7,
                is_bot: false,
                first_name: "Dana".to_string(),
                username: None,
            },
            message: Some(message(update_id, chat_id, "private", 0, "Projects")),
            data: Some(data.to_string()),
        }),
    }
}

/// Poll `condition` until it holds or a few seconds pass
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
