//! Telegram ↔ agent session bridge
//!
//! Owns the long-poll loop, the (chat, topic) → session mapping table, the
//! creation guard, typing/idle timers and the relay of runtime events back
//! into the chat.

mod commands;
mod relay;
mod timers;

#[cfg(test)]
mod mock;

pub use commands::{parse_command, Command, CommandDispatcher, DispatchOutcome};

use crate::config::{BridgeConfig, BridgeSettings};
use crate::error::{Error, Result};
use crate::format::{escape_html, strip_html, Formatter};
use crate::runtime::{AgentRuntime, LaunchRequest, RuntimeEvent};
use crate::store::{
    now_millis, open_stores, ChatSessionMapping, MappingStore, ProjectCatalog, ProjectProfile,
    SessionRecord, SessionStore, Slot,
};
use crate::telegram::{
    CallbackQuery, ChatApi, InlineKeyboardMarkup, Message, SendMessage, Update,
};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use timers::TimerSet;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long `stop()` waits for the poll task to wind down
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Directory (under the project cwd) receiving uploaded files
const UPLOAD_DIR: &str = ".chat-uploads";

/// Why a session could not be created
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CreateError {
    #[error("A session is already being started here, please wait")]
    InProgress,

    #[error("Project {project} is already active here. Use /stop first")]
    AlreadyActive { project: String },

    #[error("Project {project} already has a session in this chat")]
    ProjectBusy { project: String },

    #[error("{0}")]
    Launch(String),
}

#[derive(Default)]
struct BridgeState {
    mappings: HashMap<Slot, ChatSessionMapping>,
    /// Slots with a creation in flight
    pending: HashSet<Slot>,
}

struct PollTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Multiplexes agent sessions behind one Telegram bot
pub struct SessionBridge {
    chat: Arc<dyn ChatApi>,
    runtime: Arc<dyn AgentRuntime>,
    formatter: Formatter,
    dispatcher: CommandDispatcher,
    settings: BridgeSettings,
    allowed_chats: HashSet<i64>,
    projects: ProjectCatalog,
    models: Vec<String>,
    mapping_store: MappingStore,
    session_store: SessionStore,
    state: RwLock<BridgeState>,
    timers: Mutex<TimerSet>,
    persist_lock: Mutex<()>,
    offset: AtomicI64,
    bot_username: RwLock<Option<String>>,
    poll: Mutex<Option<PollTask>>,
}

impl SessionBridge {
    pub fn new(
        config: &BridgeConfig,
        chat: Arc<dyn ChatApi>,
        runtime: Arc<dyn AgentRuntime>,
    ) -> Result<Arc<Self>> {
        let (mapping_store, session_store) = open_stores(&config.storage.state_dir);
        Ok(Arc::new(Self {
            chat,
            runtime,
            formatter: Formatter::new(config.bridge.max_message_len)?,
            dispatcher: CommandDispatcher,
            settings: config.bridge.clone(),
            allowed_chats: config.telegram.allowed_chats.iter().copied().collect(),
            projects: ProjectCatalog::new(config.projects.clone()),
            models: config.models.clone(),
            mapping_store,
            session_store,
            state: RwLock::new(BridgeState::default()),
            timers: Mutex::new(TimerSet::default()),
            persist_lock: Mutex::new(()),
            offset: AtomicI64::new(0),
            bot_username: RwLock::new(None),
            poll: Mutex::new(None),
        }))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Authenticate, restore persisted mappings and start long-polling.
    /// Calling it while running is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut poll = self.poll.lock().await;
        if poll.is_some() {
            return Ok(());
        }
        if self.allowed_chats.is_empty() {
            return Err(Error::Config(
                "Refusing to start without a chat allow-list".to_string(),
            ));
        }

        let me = self.chat.get_me().await?;
        tracing::info!(bot = ?me.username, "Authenticated with Telegram");
        *self.bot_username.write().await = me.username;

        if let Err(e) = self.chat.delete_webhook().await {
            tracing::warn!("Failed to clear webhook: {}", e);
        }

        self.restore().await;

        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).poll_loop(token.clone()));
        *poll = Some(PollTask { token, handle });
        tracing::info!(
            allowed_chats = self.allowed_chats.len(),
            projects = self.projects.list().len(),
            "Session bridge started"
        );
        Ok(())
    }

    /// Stop polling, clear timers and persist mappings. Idempotent.
    ///
    /// The in-memory table is released after persisting; the next
    /// [`start`](Self::start) rebuilds it from disk, re-arming idle timers.
    pub async fn stop(&self) {
        let Some(task) = self.poll.lock().await.take() else {
            return;
        };
        task.token.cancel();
        if tokio::time::timeout(STOP_GRACE, task.handle).await.is_err() {
            tracing::warn!("Poll loop did not stop in time");
        }
        self.timers.lock().await.clear_all();
        self.persist().await;

        let released: Vec<_> = self.state.write().await.mappings.drain().collect();
        for (slot, mapping) in &released {
            self.runtime
                .events()
                .unsubscribe(&mapping.session_id, &subscriber_id(*slot));
        }
        tracing::info!(released = released.len(), "Session bridge stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.poll.lock().await.is_some()
    }

    /// Next update id the poll loop will request
    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::SeqCst)
    }

    async fn poll_loop(self: Arc<Self>, token: CancellationToken) {
        tracing::debug!("Long-poll loop running");
        loop {
            let offset = self.offset();
            let poll = tokio::time::timeout(
                self.settings.poll_deadline(),
                self.chat.get_updates(offset, self.settings.poll_timeout()),
            );
            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = poll => result,
            };

            match result {
                Ok(Ok(updates)) => {
                    if let Some(max) = updates.iter().map(|u| u.update_id).max() {
                        self.offset.fetch_max(max + 1, Ordering::SeqCst);
                    }
                    for update in updates {
                        let bridge = Arc::clone(&self);
                        let update_id = update.update_id;
                        spawn_logged(format!("update {}", update_id), async move {
                            bridge.handle_update(update).await
                        });
                    }
                    continue;
                }
                Ok(Err(e)) => {
                    tracing::warn!(offset, transport = e.is_transport(), "Long-poll failed: {}", e);
                }
                Err(_) => {
                    tracing::warn!(offset, "Long-poll timed out");
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.settings.retry_delay()) => {}
            }
        }
        tracing::debug!("Long-poll loop exited");
    }

    /// Re-install persisted mappings whose runtime survived
    async fn restore(self: &Arc<Self>) {
        let persisted = self.mapping_store.load();
        if persisted.is_empty() {
            tracing::debug!("No mappings to restore");
            return;
        }

        let total = persisted.len();
        let now = now_millis();
        let mut restored = Vec::new();
        for mapping in persisted {
            let slot = mapping.slot();
            if !self.is_allowed(slot.chat_id) {
                tracing::debug!(slot = %slot, "Dropping mapping for chat no longer allowed");
                continue;
            }
            if !self.session_store.exists(&mapping.session_id) {
                tracing::debug!(session_id = %mapping.session_id, "Dropping mapping without session record");
                continue;
            }
            if !self.runtime.is_alive(&mapping.session_id).await {
                tracing::debug!(session_id = %mapping.session_id, "Dropping mapping with dead runtime");
                continue;
            }

            let installed = {
                let mut state = self.state.write().await;
                let duplicate = state.mappings.contains_key(&slot)
                    || state
                        .mappings
                        .values()
                        .any(|m| m.session_id == mapping.session_id);
                if !duplicate {
                    state.mappings.insert(slot, mapping.clone());
                }
                !duplicate
            };
            if installed {
                restored.push(mapping);
            }
        }

        for mapping in &restored {
            let slot = mapping.slot();
            let rx = self
                .runtime
                .events()
                .subscribe(&mapping.session_id, &subscriber_id(slot));
            self.spawn_relay(slot, mapping.session_id.clone(), rx);

            let idle_ms = now.saturating_sub(mapping.last_activity);
            let remaining = self
                .settings
                .idle_timeout()
                .saturating_sub(Duration::from_millis(idle_ms));
            self.arm_idle(slot, remaining).await;
        }

        self.persist().await;
        tracing::info!(restored = restored.len(), total, "Restored chat sessions");
    }

    // =========================================================================
    // Session state machine
    // =========================================================================

    /// Create a session for `slot` running `profile`.
    ///
    /// absent → pending → active on success, pending → absent on failure.
    pub async fn create_session(
        self: &Arc<Self>,
        slot: Slot,
        profile: &ProjectProfile,
    ) -> std::result::Result<ChatSessionMapping, CreateError> {
        {
            let mut state = self.state.write().await;
            if state.pending.contains(&slot) {
                return Err(CreateError::InProgress);
            }
            if let Some(existing) = state.mappings.get(&slot) {
                return Err(CreateError::AlreadyActive {
                    project: existing.project.clone(),
                });
            }
            if state
                .mappings
                .values()
                .any(|m| m.chat_id == slot.chat_id && m.project == profile.slug)
            {
                return Err(CreateError::ProjectBusy {
                    project: profile.slug.clone(),
                });
            }
            state.pending.insert(slot);
        }

        let launched = self.launch(slot, profile).await;

        let result = {
            let mut state = self.state.write().await;
            state.pending.remove(&slot);
            match launched {
                Ok((mapping, rx)) => {
                    state.mappings.insert(slot, mapping.clone());
                    Ok((mapping, rx))
                }
                Err(e) => Err(e),
            }
        };

        match result {
            Ok((mapping, rx)) => {
                tracing::info!(
                    slot = %slot,
                    session_id = %mapping.session_id,
                    project = %mapping.project,
                    "Session created"
                );
                self.persist().await;
                self.spawn_relay(slot, mapping.session_id.clone(), rx);
                self.arm_idle(slot, self.settings.idle_timeout()).await;
                Ok(mapping)
            }
            Err(e) => {
                tracing::warn!(slot = %slot, project = %profile.slug, "Session creation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Persist the session record and launch the runtime, rolling the
    /// record back when the launch fails.
    async fn launch(
        &self,
        slot: Slot,
        profile: &ProjectProfile,
    ) -> std::result::Result<
        (ChatSessionMapping, mpsc::UnboundedReceiver<RuntimeEvent>),
        CreateError,
    > {
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = now_millis();
        let record = SessionRecord {
            session_id: session_id.clone(),
            chat_id: slot.chat_id,
            topic_id: slot.topic_id,
            project: profile.slug.clone(),
            cwd: profile.cwd.clone(),
            model: profile.model.clone(),
            permission_mode: Some(profile.permission_mode.clone()),
            created_at: now,
        };
        self.session_store
            .save(&record)
            .map_err(|e| CreateError::Launch(e.to_string()))?;

        let subscriber = subscriber_id(slot);
        let rx = self.runtime.events().subscribe(&session_id, &subscriber);
        let request = LaunchRequest {
            session_id: session_id.clone(),
            cwd: profile.cwd.clone(),
            model: profile.model.clone(),
            permission_mode: Some(profile.permission_mode.clone()),
        };
        if let Err(e) = self.runtime.launch(request).await {
            self.runtime.events().unsubscribe(&session_id, &subscriber);
            if let Err(rm) = self.session_store.remove(&session_id) {
                tracing::warn!(session_id = %session_id, "Failed to roll back session record: {}", rm);
            }
            return Err(CreateError::Launch(e.to_string()));
        }

        let mapping = ChatSessionMapping {
            chat_id: slot.chat_id,
            topic_id: slot.topic_id,
            session_id,
            project: profile.slug.clone(),
            model: profile.model.clone(),
            created_at: now,
            last_activity: now,
            pinned_message_id: None,
        };
        Ok((mapping, rx))
    }

    /// Tear down the session mapped to `slot`. Absent slots are a no-op.
    pub async fn destroy_session(&self, slot: Slot) -> Option<ChatSessionMapping> {
        let mapping = self.state.write().await.mappings.remove(&slot)?;

        self.runtime.events().remove_session(&mapping.session_id);
        if let Err(e) = self.runtime.kill(&mapping.session_id).await {
            tracing::warn!(session_id = %mapping.session_id, "Failed to kill runtime: {}", e);
        }
        if let Err(e) = self.session_store.remove(&mapping.session_id) {
            tracing::warn!(session_id = %mapping.session_id, "Failed to remove session record: {}", e);
        }
        self.clear_timers(slot).await;
        if let Some(pinned) = mapping.pinned_message_id {
            if let Err(e) = self.chat.unpin_message(slot.chat_id, pinned).await {
                tracing::debug!(slot = %slot, "Unpin failed: {}", e);
            }
        }
        self.persist().await;

        tracing::info!(
            slot = %slot,
            session_id = %mapping.session_id,
            project = %mapping.project,
            "Session destroyed"
        );
        Some(mapping)
    }

    /// Forward user text to the mapped session
    pub async fn relay_user_text(self: &Arc<Self>, slot: Slot, text: &str) -> Result<()> {
        let session_id = self.session_id(slot).await.ok_or(Error::NoSession)?;
        self.runtime.send_text(&session_id, text).await?;

        {
            let mut state = self.state.write().await;
            if let Some(mapping) = state.mappings.get_mut(&slot) {
                if mapping.session_id == session_id {
                    mapping.last_activity = now_millis();
                }
            }
        }
        self.persist().await;
        self.arm_idle(slot, self.settings.idle_timeout()).await;
        self.start_typing(slot).await;
        Ok(())
    }

    /// Interrupt the running turn
    pub async fn interrupt(&self, slot: Slot) -> Result<()> {
        let session_id = self.session_id(slot).await.ok_or(Error::NoSession)?;
        self.runtime.interrupt(&session_id).await?;
        self.stop_typing(slot).await;
        Ok(())
    }

    /// Switch the model of the mapped session
    pub async fn set_model(&self, slot: Slot, model: &str) -> Result<()> {
        let session_id = self.session_id(slot).await.ok_or(Error::NoSession)?;
        self.runtime.set_model(&session_id, model).await?;
        {
            let mut state = self.state.write().await;
            if let Some(mapping) = state.mappings.get_mut(&slot) {
                if mapping.session_id == session_id {
                    mapping.model = Some(model.to_string());
                }
            }
        }
        self.persist().await;
        if let Err(e) = self.publish_status(slot).await {
            tracing::debug!(slot = %slot, "Status refresh failed: {}", e);
        }
        Ok(())
    }

    /// Replace the slot's session with a fresh one on the same project
    pub async fn restart_session(
        self: &Arc<Self>,
        slot: Slot,
    ) -> std::result::Result<ChatSessionMapping, CreateError> {
        let Some(current) = self.mapping(slot).await else {
            return Err(CreateError::Launch("No active session".to_string()));
        };
        let mut profile = match self.projects.get(&current.project) {
            Some(profile) => profile.clone(),
            None => {
                return Err(CreateError::Launch(format!(
                    "Project {} is no longer configured",
                    current.project
                )))
            }
        };
        if current.model.is_some() {
            profile.model = current.model.clone();
        }
        self.destroy_session(slot).await;
        self.create_session(slot, &profile).await
    }

    /// Destroy every session of a chat, returning how many were stopped
    pub async fn stop_all_in_chat(&self, chat_id: i64) -> usize {
        let slots: Vec<Slot> = self
            .mappings_in_chat(chat_id)
            .await
            .iter()
            .map(ChatSessionMapping::slot)
            .collect();
        let mut stopped = 0;
        for slot in slots {
            if self.destroy_session(slot).await.is_some() {
                stopped += 1;
            }
        }
        stopped
    }

    // =========================================================================
    // Read surface for command handlers
    // =========================================================================

    pub async fn mapping(&self, slot: Slot) -> Option<ChatSessionMapping> {
        self.state.read().await.mappings.get(&slot).cloned()
    }

    /// Mappings of one chat, ordered by topic
    pub async fn mappings_in_chat(&self, chat_id: i64) -> Vec<ChatSessionMapping> {
        let mut mappings: Vec<_> = self
            .state
            .read()
            .await
            .mappings
            .values()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        mappings.sort_by_key(|m| m.topic_id);
        mappings
    }

    pub fn projects(&self) -> &ProjectCatalog {
        &self.projects
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn is_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats.contains(&chat_id)
    }

    async fn session_id(&self, slot: Slot) -> Option<String> {
        self.state
            .read()
            .await
            .mappings
            .get(&slot)
            .map(|m| m.session_id.clone())
    }

    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = {
            let state = self.state.read().await;
            let mut mappings: Vec<_> = state.mappings.values().cloned().collect();
            mappings.sort_by_key(ChatSessionMapping::slot);
            mappings
        };
        if let Err(e) = self.mapping_store.save(&snapshot) {
            tracing::warn!(path = %self.mapping_store.path().display(), "Failed to persist mappings: {}", e);
        }
    }

    // =========================================================================
    // Outbound helpers
    // =========================================================================

    /// Send HTML, retrying once as plain text if the markup is rejected
    pub async fn reply(&self, slot: Slot, html: &str) -> Result<i64> {
        let request = SendMessage::new(slot.chat_id, slot.topic_id, html).html();
        match self.chat.send_message(&request).await {
            Err(e @ Error::Telegram { .. }) => {
                tracing::debug!(slot = %slot, "HTML send rejected, retrying as plain text: {}", e);
                self.reply_plain(slot, &strip_html(html)).await
            }
            other => other,
        }
    }

    pub async fn reply_plain(&self, slot: Slot, text: &str) -> Result<i64> {
        self.chat
            .send_message(&SendMessage::new(slot.chat_id, slot.topic_id, text))
            .await
    }

    pub async fn reply_with_keyboard(
        &self,
        slot: Slot,
        html: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<i64> {
        let request = SendMessage::new(slot.chat_id, slot.topic_id, html)
            .html()
            .with_keyboard(keyboard.clone());
        match self.chat.send_message(&request).await {
            Err(e @ Error::Telegram { .. }) => {
                tracing::debug!(slot = %slot, "HTML send rejected, retrying as plain text: {}", e);
                let plain =
                    SendMessage::new(slot.chat_id, slot.topic_id, strip_html(html)).with_keyboard(keyboard);
                self.chat.send_message(&plain).await
            }
            other => other,
        }
    }

    /// Format agent Markdown and send it, chunked or as a document
    pub async fn send_markdown(&self, slot: Slot, markdown: &str) -> Result<()> {
        let chunks = self.formatter.render(markdown);
        if chunks.len() > self.settings.max_chunks {
            tracing::debug!(slot = %slot, chunks = chunks.len(), "Reply too long, sending as document");
            self.chat
                .send_document(
                    slot.chat_id,
                    slot.topic_id,
                    "reply.md",
                    bytes::Bytes::from(markdown.to_string()),
                    Some("Reply too long for chat, attached as reply.md"),
                )
                .await?;
            return Ok(());
        }
        for chunk in chunks {
            self.reply(slot, &chunk).await?;
        }
        Ok(())
    }

    /// Create or refresh the pinned status card of a slot
    pub async fn publish_status(&self, slot: Slot) -> Result<()> {
        let Some(mapping) = self.mapping(slot).await else {
            return Ok(());
        };
        let html = status_card(&mapping, self.projects.get(&mapping.project));

        if let Some(pinned) = mapping.pinned_message_id {
            match self.chat.edit_message_text(slot.chat_id, pinned, &html).await {
                Ok(()) => return Ok(()),
                Err(Error::Telegram { description, .. }) if description.contains("not modified") => {
                    return Ok(())
                }
                Err(e) => tracing::debug!(slot = %slot, "Status edit failed, sending new card: {}", e),
            }
        }

        let message_id = self.reply(slot, &html).await?;
        if let Err(e) = self.chat.pin_message(slot.chat_id, message_id).await {
            tracing::debug!(slot = %slot, "Pin failed: {}", e);
        }
        {
            let mut state = self.state.write().await;
            if let Some(current) = state.mappings.get_mut(&slot) {
                if current.session_id == mapping.session_id {
                    current.pinned_message_id = Some(message_id);
                }
            }
        }
        self.persist().await;
        Ok(())
    }

    // =========================================================================
    // Inbound dispatch
    // =========================================================================

    /// Process one update from the long-poll loop
    pub async fn handle_update(self: &Arc<Self>, update: Update) -> Result<()> {
        if let Some(callback) = update.callback_query {
            return self.handle_callback(callback).await;
        }
        let Some(message) = update.message else {
            return Ok(());
        };

        let chat_id = message.chat.id;
        if !self.is_allowed(chat_id) {
            tracing::debug!(chat_id, "Ignoring update from chat outside the allow-list");
            return Ok(());
        }
        let slot = Slot::new(chat_id, message.topic_id());
        let text = message.body().unwrap_or_default().trim().to_string();

        if text.starts_with('/') {
            return self.handle_command(slot, &text).await;
        }

        let username = self.bot_username.read().await.clone();
        if !message.chat.is_private() && !mentions(&text, username.as_deref()) {
            return Ok(());
        }
        let text = strip_mention(&text, username.as_deref());

        if message.photo.is_some() || message.document.is_some() {
            return self.relay_upload(slot, &message, &text).await;
        }
        if text.is_empty() {
            return Ok(());
        }
        self.relay_inbound(slot, message.message_id, &text).await
    }

    async fn relay_inbound(self: &Arc<Self>, slot: Slot, message_id: i64, text: &str) -> Result<()> {
        match self.relay_user_text(slot, text).await {
            Ok(()) => {
                if let Err(e) = self.chat.set_reaction(slot.chat_id, message_id, "👀").await {
                    tracing::debug!(slot = %slot, "Reaction failed: {}", e);
                }
                Ok(())
            }
            Err(Error::NoSession) => {
                self.reply_plain(
                    slot,
                    "No active session. Start one with /project <slug> or pick from /projects.",
                )
                .await?;
                Ok(())
            }
            Err(e) => {
                self.reply_plain(slot, &format!("Error: {}", e)).await?;
                Err(e)
            }
        }
    }

    async fn handle_command(self: &Arc<Self>, slot: Slot, text: &str) -> Result<()> {
        let username = self.bot_username.read().await.clone();
        let Some((token, args)) = parse_command(text, username.as_deref()) else {
            return Ok(());
        };
        tracing::debug!(slot = %slot, command = %token, "Dispatching command");

        if self.dispatcher.dispatch(self, slot, &token, &args).await == DispatchOutcome::Handled {
            return Ok(());
        }
        if self.projects.get(&token).is_some() {
            self.dispatcher.dispatch(self, slot, "project", &token).await;
        }
        Ok(())
    }

    async fn handle_callback(self: &Arc<Self>, callback: CallbackQuery) -> Result<()> {
        let Some(message) = callback.message.as_ref() else {
            return Ok(());
        };
        if !self.is_allowed(message.chat.id) {
            tracing::debug!(chat_id = message.chat.id, "Ignoring callback from chat outside the allow-list");
            return Ok(());
        }
        if let Err(e) = self.chat.answer_callback_query(&callback.id, None).await {
            tracing::debug!("Callback answer failed: {}", e);
        }

        let slot = Slot::new(message.chat.id, message.topic_id());
        let slug = callback
            .data
            .as_deref()
            .and_then(|d| d.strip_prefix(commands::PROJECT_CALLBACK_PREFIX));
        match slug {
            Some(slug) => {
                self.dispatcher.dispatch(self, slot, "project", slug).await;
            }
            None => tracing::debug!(data = ?callback.data, "Unknown callback data"),
        }
        Ok(())
    }

    /// Save an uploaded photo/document into the project and tell the agent
    async fn relay_upload(self: &Arc<Self>, slot: Slot, message: &Message, caption: &str) -> Result<()> {
        let Some(mapping) = self.mapping(slot).await else {
            return self.relay_inbound(slot, message.message_id, caption).await;
        };

        let (file_id, file_name) = if let Some(doc) = &message.document {
            let name = doc
                .file_name
                .clone()
                .unwrap_or_else(|| format!("document-{}", message.message_id));
            (doc.file_id.clone(), name)
        } else if let Some(photo) = message
            .photo
            .as_ref()
            .and_then(|sizes| {
                sizes
                    .iter()
                    .max_by_key(|p| u64::from(p.width) * u64::from(p.height))
            })
        {
            (photo.file_id.clone(), format!("photo-{}.jpg", message.message_id))
        } else {
            return Ok(());
        };

        let cwd = match self.projects.get(&mapping.project) {
            Some(profile) => profile.cwd.clone(),
            None => match self.session_store.load(&mapping.session_id) {
                Some(record) => record.cwd,
                None => return Err(Error::Session(format!("Unknown project {}", mapping.project))),
            },
        };

        let content = self.chat.download_file(&file_id).await?;
        let path = upload_path(&cwd, &file_name);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&path, &content).await?;
        tracing::info!(slot = %slot, path = %path.display(), bytes = content.len(), "Saved upload");

        let relative = path.strip_prefix(&cwd).unwrap_or(&path);
        let mut note = format!("[User uploaded a file: {}]", relative.display());
        if !caption.is_empty() {
            note.push_str("\n\n");
            note.push_str(caption);
        }
        self.relay_inbound(slot, message.message_id, &note).await
    }
}

/// Registry subscriber id of a slot's relay
fn subscriber_id(slot: Slot) -> String {
    format!("telegram:{}", slot.chat_id)
}

/// Spawn a task whose error is logged instead of lost
fn spawn_logged<F>(name: String, future: F) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = future.await {
            tracing::warn!(task = %name, "Task failed: {}", e);
        }
    })
}

fn mentions(text: &str, username: Option<&str>) -> bool {
    match username {
        Some(name) => !mention_spans(text, name).is_empty(),
        None => false,
    }
}

/// Remove every `@<bot>` mention, case-insensitively
fn strip_mention(text: &str, username: Option<&str>) -> String {
    let Some(name) = username else {
        return text.trim().to_string();
    };
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, end) in mention_spans(text, name) {
        out.push_str(&text[last..start]);
        last = end;
    }
    out.push_str(&text[last..]);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Byte ranges of whole `@<name>` handles in `text`. A handle followed by
/// another username character is a different user.
fn mention_spans(text: &str, name: &str) -> Vec<(usize, usize)> {
    let needle = format!("@{}", name.to_ascii_lowercase());
    let lower = text.to_ascii_lowercase();
    lower
        .match_indices(&needle)
        .map(|(start, _)| (start, start + needle.len()))
        .filter(|&(_, end)| {
            !lower[end..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        })
        .collect()
}

/// Target path of an upload, confined to the project's upload directory
fn upload_path(cwd: &Path, file_name: &str) -> PathBuf {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.starts_with('.'))
        .unwrap_or("upload.bin");
    let safe: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || "._-".contains(c) { c } else { '_' })
        .collect();
    cwd.join(UPLOAD_DIR).join(safe)
}

fn status_card(mapping: &ChatSessionMapping, profile: Option<&ProjectProfile>) -> String {
    let name = profile.map(|p| p.display_name()).unwrap_or(&mapping.project);
    format!(
        "📌 <b>{}</b>\nModel: <code>{}</code>\nSession: <code>{}</code>",
        escape_html(name),
        escape_html(mapping.model.as_deref().unwrap_or("default")),
        escape_html(mapping.short_id()),
    )
}
