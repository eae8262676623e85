//! Bot API wire types
//!
//! Only the fields the bridge reads are modeled; everything else in the
//! provider's payloads is ignored by serde.

use serde::{Deserialize, Serialize};

/// Envelope returned by every Bot API method
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
}

/// One inbound update from `getUpdates`
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub is_topic_message: bool,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photo: Option<Vec<PhotoSize>>,
    pub document: Option<Document>,
}

impl Message {
    /// Forum topic of the message, 0 for the general thread
    pub fn topic_id(&self) -> i64 {
        if self.is_topic_message {
            self.message_thread_id.unwrap_or(0)
        } else {
            0
        }
    }

    /// Text body, falling back to the media caption
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
}

impl Chat {
    /// One-to-one dialog with the bot
    pub fn is_private(&self) -> bool {
        self.kind == "private"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

/// Result of `getFile`
#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    pub file_id: String,
    pub file_path: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl InlineKeyboardMarkup {
    /// Lay `buttons` out `per_row` to a row
    pub fn grid(buttons: Vec<InlineKeyboardButton>, per_row: usize) -> Self {
        let per_row = per_row.max(1);
        Self {
            inline_keyboard: buttons
                .chunks(per_row)
                .map(|row| row.to_vec())
                .collect(),
        }
    }
}

/// Markup flavor of an outbound text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
}

/// `sendMessage` request body
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SendMessage {
    pub chat_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disable_web_page_preview: bool,
}

impl SendMessage {
    /// Plain text addressed to a chat/topic slot
    pub fn new(chat_id: i64, topic_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            message_thread_id: thread_id(topic_id),
            text: text.into(),
            parse_mode: None,
            reply_markup: None,
            disable_web_page_preview: true,
        }
    }

    pub fn html(mut self) -> Self {
        self.parse_mode = Some(ParseMode::Html);
        self
    }

    pub fn with_keyboard(mut self, markup: InlineKeyboardMarkup) -> Self {
        self.reply_markup = Some(markup);
        self
    }
}

/// Topic 0 is the general thread and is addressed without a thread id
pub fn thread_id(topic_id: i64) -> Option<i64> {
    (topic_id != 0).then_some(topic_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_update() {
        let json = r#"{"update_id":10,"message":{"message_id":5,"chat":{"id":-100,"type":"supergroup","title":"Dev"},"from":{"id":7,"is_bot":false,"first_name":"Ann","username":"ann"},"message_thread_id":3,"is_topic_message":true,"text":"/status"}}"#;
        let update: Update = serde_json::from_str(json).unwrap();
        let msg = update.message.unwrap();
        assert_eq!(update.update_id, 10);
        assert_eq!(msg.topic_id(), 3);
        assert!(!msg.chat.is_private());
        assert_eq!(msg.body(), Some("/status"));
    }

    #[test]
    fn test_reply_thread_is_not_a_topic() {
        let json = r#"{"message_id":5,"chat":{"id":1,"type":"private"},"message_thread_id":4,"text":"hi"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.topic_id(), 0);
        assert!(msg.chat.is_private());
    }

    #[test]
    fn test_caption_is_body_fallback() {
        let json = r#"{"message_id":1,"chat":{"id":1,"type":"private"},"caption":"look","photo":[{"file_id":"a","width":90,"height":90}]}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.body(), Some("look"));
        assert_eq!(msg.photo.unwrap().len(), 1);
    }

    #[test]
    fn test_send_message_serialization() {
        let req = SendMessage::new(42, 0, "<b>x</b>").html();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["parse_mode"], "HTML");
        assert!(json.get("message_thread_id").is_none());
        assert!(json.get("reply_markup").is_none());

        let req = SendMessage::new(42, 9, "x");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["message_thread_id"], 9);
        assert!(json.get("parse_mode").is_none());
    }

    #[test]
    fn test_keyboard_grid() {
        let buttons: Vec<_> = (0..5)
            .map(|i| InlineKeyboardButton {
                text: format!("p{}", i),
                callback_data: format!("project:p{}", i),
            })
            .collect();
        let markup = InlineKeyboardMarkup::grid(buttons, 2);
        assert_eq!(markup.inline_keyboard.len(), 3);
        assert_eq!(markup.inline_keyboard[2].len(), 1);
    }

    #[test]
    fn test_error_envelope() {
        let json = r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#;
        let resp: ApiResponse<User> = serde_json::from_str(json).unwrap();
        assert!(!resp.ok);
        assert!(resp.result.is_none());
        assert_eq!(resp.error_code, Some(401));
    }
}
