//! Chatbridge - Telegram front-end for long-lived coding agent sessions

use anyhow::{Context, Result};
use chatbridge::{
    bridge::SessionBridge,
    config::BridgeConfig,
    format::Formatter,
    runtime::ProcessRuntime,
    telegram::{ChatApi, SendMessage, TelegramClient},
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chatbridge")]
#[command(version)]
#[command(about = "Telegram front-end for long-lived coding agent sessions")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CHATBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until interrupted
    Run,

    /// List configured projects
    Projects,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },

    /// Send one formatted message and exit
    Send {
        /// Target chat ID
        #[arg(long)]
        chat: i64,

        /// Forum topic ID (0 for the general thread)
        #[arg(long, default_value = "0")]
        topic: i64,

        /// Message content (Markdown)
        #[arg(short, long)]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("chatbridge={}", log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = BridgeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run => run_bridge(config).await?,
        Commands::Projects => list_projects(&config),
        Commands::Config { default } => show_config(if default { None } else { Some(&config) })?,
        Commands::Send {
            chat,
            topic,
            message,
        } => send_message(&config, chat, topic, &message).await?,
    }

    Ok(())
}

async fn run_bridge(config: BridgeConfig) -> Result<()> {
    config.validate()?;
    tracing::info!(
        state_dir = %config.storage.state_dir.display(),
        "Starting chatbridge"
    );

    let chat = Arc::new(TelegramClient::new(
        &config.telegram.api_base,
        &config.telegram.bot_token,
    )?);
    let runtime = Arc::new(ProcessRuntime::new(config.runtime.clone()));
    let bridge = SessionBridge::new(&config, chat, runtime)?;

    bridge.start().await?;
    tracing::info!("Chatbridge is running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    bridge.stop().await;
    Ok(())
}

fn list_projects(config: &BridgeConfig) {
    if config.projects.is_empty() {
        println!("No projects configured.");
        return;
    }
    for project in &config.projects {
        println!(
            "{:<16} {:<24} {}",
            project.slug,
            project.display_name(),
            project.cwd.display()
        );
    }
}

fn show_config(config: Option<&BridgeConfig>) -> Result<()> {
    let config = config.map(BridgeConfig::redacted).unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}

async fn send_message(config: &BridgeConfig, chat_id: i64, topic: i64, message: &str) -> Result<()> {
    if config.telegram.bot_token.is_empty() {
        anyhow::bail!("No bot token configured");
    }
    let client = TelegramClient::new(&config.telegram.api_base, &config.telegram.bot_token)?;
    let formatter = Formatter::new(config.bridge.max_message_len)?;
    for chunk in formatter.render(message) {
        let request = SendMessage::new(chat_id, topic, chunk).html();
        let message_id = client.send_message(&request).await?;
        tracing::debug!(chat_id, message_id, "Sent message");
    }
    println!("Sent to {}", chat_id);
    Ok(())
}
