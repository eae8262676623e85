//! reqwest implementation of the Bot API

use super::types::*;
use super::ChatApi;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Ceiling for every call except `getUpdates`
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra slack given to `getUpdates` above its server-side wait
const POLL_SLACK: Duration = Duration::from_secs(10);

/// Telegram Bot API client
///
/// Holds only the token and API base; safe to share across tasks.
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("chatbridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.token, file_path)
    }

    /// POST a JSON body and unwrap the `{ok, result}` envelope
    async fn call<B, T>(&self, method: &str, body: &B, timeout: Duration) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        let bytes = response.bytes().await?;
        decode_envelope(method, &bytes)
    }
}

fn decode_envelope<T: DeserializeOwned>(method: &str, bytes: &[u8]) -> Result<T> {
    let envelope: ApiResponse<T> = serde_json::from_slice(bytes)?;
    if !envelope.ok {
        tracing::debug!(
            method,
            code = ?envelope.error_code,
            "Bot API call rejected"
        );
        return Err(Error::Telegram {
            code: envelope.error_code,
            description: envelope
                .description
                .unwrap_or_else(|| format!("{} failed", method)),
        });
    }
    envelope.result.ok_or_else(|| Error::Telegram {
        code: None,
        description: format!("{} returned no result", method),
    })
}

#[async_trait]
impl ChatApi for TelegramClient {
    async fn get_me(&self) -> Result<User> {
        self.call("getMe", &serde_json::json!({}), REQUEST_TIMEOUT)
            .await
    }

    async fn delete_webhook(&self) -> Result<()> {
        let _: bool = self
            .call(
                "deleteWebhook",
                &serde_json::json!({ "drop_pending_updates": false }),
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", &body, timeout + POLL_SLACK).await
    }

    async fn send_message(&self, request: &SendMessage) -> Result<i64> {
        let sent: Message = self.call("sendMessage", request, REQUEST_TIMEOUT).await?;
        Ok(sent.message_id)
    }

    async fn edit_message_text(&self, chat_id: i64, message_id: i64, html: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": html,
            "parse_mode": ParseMode::Html,
            "disable_web_page_preview": true,
        });
        let _: serde_json::Value = self
            .call("editMessageText", &body, REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn send_chat_action(&self, chat_id: i64, topic_id: i64, action: &str) -> Result<()> {
        let mut body = serde_json::json!({ "chat_id": chat_id, "action": action });
        if let Some(thread) = thread_id(topic_id) {
            body["message_thread_id"] = thread.into();
        }
        let _: bool = self
            .call("sendChatAction", &body, REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn set_reaction(&self, chat_id: i64, message_id: i64, emoji: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reaction": [{ "type": "emoji", "emoji": emoji }],
        });
        let _: bool = self
            .call("setMessageReaction", &body, REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = serde_json::json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = text.into();
        }
        let _: bool = self
            .call("answerCallbackQuery", &body, REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "disable_notification": true,
        });
        let _: bool = self
            .call("pinChatMessage", &body, REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn unpin_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let body = serde_json::json!({ "chat_id": chat_id, "message_id": message_id });
        let _: bool = self
            .call("unpinChatMessage", &body, REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        topic_id: i64,
        file_name: &str,
        content: Bytes,
        caption: Option<&str>,
    ) -> Result<i64> {
        let part = reqwest::multipart::Part::bytes(content.to_vec())
            .file_name(file_name.to_string())
            .mime_str("text/markdown")?;
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);
        if let Some(thread) = thread_id(topic_id) {
            form = form.text("message_thread_id", thread.to_string());
        }
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let response = self
            .http
            .post(self.method_url("sendDocument"))
            .timeout(REQUEST_TIMEOUT * 2)
            .multipart(form)
            .send()
            .await?;
        let bytes = response.bytes().await?;
        let sent: Message = decode_envelope("sendDocument", &bytes)?;
        Ok(sent.message_id)
    }

    async fn download_file(&self, file_id: &str) -> Result<Bytes> {
        let info: FileInfo = self
            .call(
                "getFile",
                &serde_json::json!({ "file_id": file_id }),
                REQUEST_TIMEOUT,
            )
            .await?;
        let path = info.file_path.ok_or_else(|| Error::Telegram {
            code: None,
            description: format!("File {} is not downloadable", file_id),
        })?;

        let response = self
            .http
            .get(self.file_url(&path))
            .timeout(REQUEST_TIMEOUT * 4)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }
}
