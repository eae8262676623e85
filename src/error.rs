//! Chatbridge error types

use thiserror::Error;

/// Chatbridge error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The Bot API answered with `ok: false`
    #[error("Telegram API error{}: {description}", code_suffix(.code))]
    Telegram {
        code: Option<i64>,
        description: String,
    },

    /// Session bridge error
    #[error("Session error: {0}")]
    Session(String),

    /// No session is mapped to the chat/topic slot
    #[error("No active session")]
    NoSession,

    /// Agent runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error came from the transport rather than from the API
    /// itself (network failure, timeout, undecodable body).
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Io(_) | Error::Serialization(_))
    }
}

fn code_suffix(code: &Option<i64>) -> String {
    code.map(|c| format!(" {}", c)).unwrap_or_default()
}

/// Result type alias for chatbridge operations
pub type Result<T> = std::result::Result<T, Error>;
