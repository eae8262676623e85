//! Chatbridge - Telegram front-end for long-lived coding agent sessions
//!
//! Chatbridge lets a small set of allowed Telegram chats drive coding agent
//! CLI sessions. Each (chat, forum topic) pair is bound to at most one
//! running agent; user text is injected into it and the agent's output is
//! formatted back into the chat.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Telegram Bot API                         │
//! └──────────────┬───────────────────────────────▲───────────────┘
//!                │ getUpdates (long-poll)        │ sendMessage / sendChatAction
//! ┌──────────────▼───────────────────────────────┴───────────────┐
//! │                       Session Bridge                          │
//! │  ┌────────────┐ ┌─────────────────┐ ┌──────────────────────┐ │
//! │  │ Allow-list │ │ Command router  │ │ Slot → session table │ │
//! │  └────────────┘ └─────────────────┘ └──────────────────────┘ │
//! │  ┌────────────────────┐ ┌──────────────────────────────────┐ │
//! │  │ Typing/idle timers │ │ Markdown → HTML formatter/chunker│ │
//! │  └────────────────────┘ └──────────────────────────────────┘ │
//! └──────────────┬───────────────────────────────▲───────────────┘
//!                │ stdin NDJSON                  │ stdout NDJSON events
//! ┌──────────────▼───────────────────────────────┴───────────────┐
//! │            Agent runtime (one CLI process per session)        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`bridge`]: long-poll loop, session state machine, commands, timers
//! - [`telegram`]: Bot API client and wire types
//! - [`runtime`]: agent process launcher and event fan-out
//! - [`format`]: Markdown → Telegram HTML, chunking, tool summaries
//! - [`store`]: mapping persistence, session records, project catalog
//! - [`config`]: configuration management

pub mod bridge;
pub mod config;
pub mod error;
pub mod format;
pub mod runtime;
pub mod store;
pub mod telegram;

pub use bridge::SessionBridge;
pub use config::BridgeConfig;
pub use error::{Error, Result};
