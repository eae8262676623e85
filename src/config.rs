//! Chatbridge configuration management
//!
//! Configuration is read from a TOML file and then overridden from the
//! environment. Environment values always win over the file.

use crate::error::{Error, Result};
use crate::store::ProjectProfile;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the bot token
pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
/// Environment variable holding the comma separated chat allow-list
pub const ENV_ALLOWED_CHATS: &str = "TELEGRAM_ALLOWED_CHATS";
/// Environment variable overriding the Bot API base URL
pub const ENV_API_BASE: &str = "TELEGRAM_API_BASE";
/// Environment variable overriding the state directory
pub const ENV_STATE_DIR: &str = "CHATBRIDGE_STATE_DIR";

/// Main chatbridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Telegram credentials and access control
    pub telegram: TelegramConfig,

    /// Bridge timing and formatting limits
    pub bridge: BridgeSettings,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Agent runtime configuration
    pub runtime: RuntimeConfig,

    /// Model names offered by `/model`
    pub models: Vec<String>,

    /// Known projects
    pub projects: Vec<ProjectProfile>,
}

/// Telegram channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token
    pub bot_token: String,

    /// Chat IDs allowed to talk to the bot
    pub allowed_chats: Vec<i64>,

    /// Bot API base URL
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_chats: Vec::new(),
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

/// Bridge timing and formatting limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Server-side long-poll wait in seconds
    pub poll_timeout_secs: u64,

    /// Extra client-side slack on top of the poll wait
    pub poll_grace_secs: u64,

    /// Backoff after a failed poll
    pub retry_delay_secs: u64,

    /// Idle window after which a session is evicted
    pub idle_timeout_secs: u64,

    /// Typing indicator refresh interval (Telegram expires it after ~5s)
    pub typing_interval_secs: u64,

    /// Maximum length of one outbound message
    pub max_message_len: usize,

    /// Replies needing more chunks than this are sent as a document
    pub max_chunks: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 30,
            poll_grace_secs: 10,
            retry_delay_secs: 5,
            idle_timeout_secs: 30 * 60,
            typing_interval_secs: 4,
            max_message_len: 4096,
            max_chunks: 8,
        }
    }
}

impl BridgeSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// Client-side bound on a single poll call, strictly longer than the
    /// server-side wait.
    pub fn poll_deadline(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs + self.poll_grace_secs.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn typing_interval(&self) -> Duration {
        Duration::from_secs(self.typing_interval_secs)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the mapping file and session records
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: dirs_next::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".chatbridge"),
        }
    }
}

/// Agent runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Path to the agent CLI (None = search PATH and common locations)
    pub binary: Option<PathBuf>,

    /// Extra arguments appended to every launch
    pub extra_args: Vec<String>,
}

impl BridgeConfig {
    /// Default config file location (~/.config/chatbridge/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|dir| dir.join("chatbridge").join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// used when present and built-in defaults otherwise. Environment
    /// overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(ENV_BOT_TOKEN).filter(|t| !t.trim().is_empty()) {
            self.telegram.bot_token = token.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_ALLOWED_CHATS) {
            let chats = parse_chat_list(&raw);
            if !chats.is_empty() {
                self.telegram.allowed_chats = chats;
            }
        }
        if let Some(base) = lookup(ENV_API_BASE).filter(|b| !b.trim().is_empty()) {
            self.telegram.api_base = base.trim().trim_end_matches('/').to_string();
        }
        if let Some(dir) = lookup(ENV_STATE_DIR).filter(|d| !d.trim().is_empty()) {
            self.storage.state_dir = PathBuf::from(dir.trim());
        }
    }

    /// Check that the bridge can run with this configuration
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(Error::Config(format!(
                "No bot token configured (set telegram.bot_token or {})",
                ENV_BOT_TOKEN
            )));
        }
        if self.telegram.allowed_chats.is_empty() {
            return Err(Error::Config(format!(
                "No chat allow-list configured (set telegram.allowed_chats or {})",
                ENV_ALLOWED_CHATS
            )));
        }

        let b = &self.bridge;
        if b.poll_timeout_secs == 0 || b.idle_timeout_secs == 0 || b.typing_interval_secs == 0 {
            return Err(Error::Config(
                "bridge timing values must be greater than zero".to_string(),
            ));
        }
        if b.max_message_len < 64 {
            return Err(Error::Config(
                "bridge.max_message_len must be at least 64".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for project in &self.projects {
            if project.slug.trim().is_empty() {
                return Err(Error::Config("Project with empty slug".to_string()));
            }
            if !seen.insert(project.slug.to_lowercase()) {
                return Err(Error::Config(format!(
                    "Duplicate project slug: {}",
                    project.slug
                )));
            }
        }

        Ok(())
    }

    /// Copy of the config that is safe to print
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.telegram.bot_token.is_empty() {
            copy.telegram.bot_token = "<redacted>".to_string();
        }
        copy
    }
}

/// Parse "1, -1002, x" into chat ids, skipping junk
fn parse_chat_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
models = ["opus", "sonnet"]

[telegram]
bot_token = "file-token"
allowed_chats = [42, -100123]

[bridge]
idle_timeout_secs = 600

[[projects]]
slug = "demo"
name = "Demo"
cwd = "/tmp/demo"
model = "sonnet"
permission_mode = "acceptEdits"
"#;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.bridge.poll_timeout_secs, 30);
        assert_eq!(config.bridge.idle_timeout_secs, 1800);
        assert_eq!(config.bridge.max_message_len, 4096);
        assert!(config.bridge.typing_interval_secs < 5);
        assert!(config.telegram.allowed_chats.is_empty());
    }

    #[test]
    fn test_poll_deadline_exceeds_poll_timeout() {
        let mut settings = BridgeSettings::default();
        assert!(settings.poll_deadline() > settings.poll_timeout());
        settings.poll_grace_secs = 0;
        assert!(settings.poll_deadline() > settings.poll_timeout());
    }

    #[test]
    fn test_from_toml() {
        let config = BridgeConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.telegram.bot_token, "file-token");
        assert_eq!(config.telegram.allowed_chats, vec![42, -100123]);
        assert_eq!(config.bridge.idle_timeout_secs, 600);
        assert_eq!(config.bridge.poll_timeout_secs, 30);
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.projects[0].slug, "demo");
        assert_eq!(config.projects[0].permission_mode, "acceptEdits");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_takes_precedence() {
        let mut config = BridgeConfig::from_toml(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_BOT_TOKEN, "env-token"),
            (ENV_ALLOWED_CHATS, "7, 8 ,bogus"),
            (ENV_API_BASE, "http://localhost:8081/"),
            (ENV_STATE_DIR, "/var/lib/chatbridge"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.telegram.bot_token, "env-token");
        assert_eq!(config.telegram.allowed_chats, vec![7, 8]);
        assert_eq!(config.telegram.api_base, "http://localhost:8081");
        assert_eq!(config.storage.state_dir, PathBuf::from("/var/lib/chatbridge"));
    }

    #[test]
    fn test_empty_env_does_not_clobber_file() {
        let mut config = BridgeConfig::from_toml(SAMPLE).unwrap();
        config.apply_env(|k| match k {
            ENV_BOT_TOKEN => Some("  ".to_string()),
            ENV_ALLOWED_CHATS => Some("".to_string()),
            _ => None,
        });
        assert_eq!(config.telegram.bot_token, "file-token");
        assert_eq!(config.telegram.allowed_chats, vec![42, -100123]);
    }

    #[test]
    fn test_validate_requires_allow_list() {
        let mut config = BridgeConfig::from_toml(SAMPLE).unwrap();
        config.telegram.allowed_chats.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("allow-list"));
    }

    #[test]
    fn test_validate_requires_token() {
        let mut config = BridgeConfig::from_toml(SAMPLE).unwrap();
        config.telegram.bot_token.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_slugs() {
        let mut config = BridgeConfig::from_toml(SAMPLE).unwrap();
        let mut dup = config.projects[0].clone();
        dup.slug = "DEMO".to_string();
        config.projects.push(dup);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate project slug"));
    }

    #[test]
    fn test_redacted_hides_token() {
        let config = BridgeConfig::from_toml(SAMPLE).unwrap();
        let redacted = config.redacted();
        assert_eq!(redacted.telegram.bot_token, "<redacted>");
        let text = toml::to_string_pretty(&redacted).unwrap();
        assert!(!text.contains("file-token"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let result = BridgeConfig::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
