//! Telegram Bot API client
//!
//! The bridge talks to the provider only through [`ChatApi`], so tests can
//! substitute a recording implementation.

mod client;
pub mod types;

pub use client::TelegramClient;
pub use types::{
    CallbackQuery, Chat, InlineKeyboardButton, InlineKeyboardMarkup, Message, ParseMode,
    SendMessage, Update, User,
};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Outbound and long-poll surface of the chat provider
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Verify the token and return the bot account
    async fn get_me(&self) -> Result<User>;

    /// Drop any configured webhook so long-polling is allowed
    async fn delete_webhook(&self) -> Result<()>;

    /// Long-poll for updates starting at `offset`
    async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>>;

    /// Send a message, returning its id
    async fn send_message(&self, request: &SendMessage) -> Result<i64>;

    async fn edit_message_text(&self, chat_id: i64, message_id: i64, html: &str) -> Result<()>;

    async fn send_chat_action(&self, chat_id: i64, topic_id: i64, action: &str) -> Result<()>;

    async fn set_reaction(&self, chat_id: i64, message_id: i64, emoji: &str) -> Result<()>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;

    async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<()>;

    async fn unpin_message(&self, chat_id: i64, message_id: i64) -> Result<()>;

    /// Upload `content` as a document, returning the message id
    async fn send_document(
        &self,
        chat_id: i64,
        topic_id: i64,
        file_name: &str,
        content: Bytes,
        caption: Option<&str>,
    ) -> Result<i64>;

    /// Resolve and download a file by id
    async fn download_file(&self, file_id: &str) -> Result<Bytes>;
}
