//! Conduit Telegram Bot — Telegram interface for conduit.
//!
//! Connects the Telegram Bot API to `conduit-core`'s `Core`, the same
//! composition root `conduit-cli` drives from a terminal.

mod commands;
mod format;
mod handlers;
mod outbound;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use conduit_core::{Config, Core, NullObserver, OutboundSink};
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing_subscriber::prelude::*;

use crate::outbound::TelegramOutboundSink;

/// Conduit Telegram Bot — multiplexes one user's chat across named
/// assistant sessions.
#[derive(Parser)]
#[command(name = "conduit-telegram")]
struct Args {
    /// Path to a custom config file (overrides default search locations)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

/// Default tracing directives enabling info-level logs for this crate and conduit-core.
const DEFAULT_DIRECTIVES: &[&str] = &["conduit_telegram=info", "conduit_core=info"];

/// Build the default `EnvFilter`: RUST_LOG (if set) plus our default directives.
fn default_env_filter() -> anyhow::Result<tracing_subscriber::EnvFilter> {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in DEFAULT_DIRECTIVES {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Initialize the tracing subscriber.
///
/// When `config.logging` is `Some`, creates a layered subscriber with both
/// stdout and rolling file output. When `None`, uses stdout-only.
///
/// Returns the non-blocking writer guard that must be held for the process lifetime.
fn init_tracing(
    config: &Config,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    if let Some(ref lc) = config.logging {
        if let Err(e) = std::fs::create_dir_all(&lc.directory) {
            eprintln!(
                "Warning: Failed to create log directory '{}': {}. Falling back to stdout-only.",
                lc.directory, e
            );
            tracing_subscriber::fmt()
                .with_env_filter(default_env_filter()?)
                .init();
            return Ok(None);
        }

        let rotation = match lc.rotation.as_str() {
            "daily" => tracing_appender::rolling::Rotation::DAILY,
            "hourly" => tracing_appender::rolling::Rotation::HOURLY,
            "never" => tracing_appender::rolling::Rotation::NEVER,
            other => {
                eprintln!(
                    "Warning: Unknown rotation '{}', falling back to daily",
                    other
                );
                tracing_appender::rolling::Rotation::DAILY
            }
        };

        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(rotation)
            .filename_prefix("conduit-telegram")
            .filename_suffix("log")
            .max_log_files(lc.max_files)
            .build(&lc.directory)
            .context("Failed to create rolling file appender")?;

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let env_filter = default_env_filter()?;
        let stdout_layer = tracing_subscriber::fmt::layer();
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .with(file_layer)
            .init();

        Ok(Some(guard))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(default_env_filter()?)
            .init();
        Ok(None)
    }
}

/// Resolve the bot token with the following priority:
///
/// 1. `TELEGRAM_BOT_TOKEN` environment variable (if set and non-empty).
/// 2. `telegram.token` in `config.toml`.
///
/// The token is **never** passed to any tracing macro.
pub fn resolve_bot_token(config: &Config) -> anyhow::Result<String> {
    if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
        if !token.is_empty() {
            return Ok(token);
        }
    }
    config
        .telegram
        .as_ref()
        .and_then(|t| t.token.clone())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Bot token required: set TELEGRAM_BOT_TOKEN env var or telegram.token in config"
            )
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 1. Load application configuration FIRST (tracing init depends on config).
    let config = Config::load(args.config.as_deref()).context("Failed to load config")?;

    // 2. Initialize tracing (stdout-only or stdout+file based on config).
    let _guard = init_tracing(&config)?;

    tracing::info!("Starting Conduit Telegram Bot");

    // 3. Resolve bot token (env var > config file). Token is never logged.
    let token = resolve_bot_token(&config).context("Failed to obtain bot token")?;

    // 4. Create the teloxide Bot instance.
    let bot = Bot::new(token);

    // 5. Compose Core: MCP injection, history, default session, queue.
    let observer = Arc::new(NullObserver);
    let outbound: Arc<dyn OutboundSink> = Arc::new(TelegramOutboundSink::new(bot.clone()));
    let core = Core::new(&config, observer, outbound)
        .await
        .context("Failed to initialize conduit core")?;

    // 6. Fetch the bot's own identity (required for filter_command parsing).
    let me = bot.get_me().await.context("Failed to fetch bot identity")?;

    // 7. Register slash commands with Telegram (for autocomplete UI). Non-fatal on failure.
    if let Err(e) = bot.set_my_commands(commands::Command::bot_commands()).await {
        tracing::warn!("Failed to register bot commands: {}", e);
    }

    // 8. Branched handler: commands route separately from free-text messages.
    let handler = dptree::entry().branch(
        Update::filter_message()
            .branch(
                dptree::entry()
                    .filter_command::<commands::Command>()
                    .endpoint(commands::handle_command),
            )
            .branch(dptree::entry().endpoint(handlers::handle_message)),
    );

    tracing::info!("Dispatcher ready — polling for updates");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![me, Arc::clone(&core)])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::info!("Dispatcher stopped — draining queue");
    core.shutdown(Duration::from_secs(30)).await;
    tracing::info!("Core shutdown complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::config::TelegramConfig;
    use std::sync::Mutex;

    /// Guards tests that mutate `TELEGRAM_BOT_TOKEN`.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_resolve_token_env_var() {
        let _guard = ENV_MUTEX.lock().unwrap();
        // SAFETY: guarded by mutex; single-threaded section.
        unsafe { std::env::set_var("TELEGRAM_BOT_TOKEN", "env-token-value") };

        let config = Config {
            telegram: Some(TelegramConfig {
                token: Some("config-token".to_string()),
                ..TelegramConfig::default()
            }),
            ..Config::default()
        };

        let result = resolve_bot_token(&config);
        assert_eq!(result.unwrap(), "env-token-value");

        unsafe { std::env::remove_var("TELEGRAM_BOT_TOKEN") };
    }

    #[test]
    fn test_resolve_token_config() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::remove_var("TELEGRAM_BOT_TOKEN") };

        let config = Config {
            telegram: Some(TelegramConfig {
                token: Some("config-token".to_string()),
                ..TelegramConfig::default()
            }),
            ..Config::default()
        };

        let result = resolve_bot_token(&config);
        assert_eq!(result.unwrap(), "config-token");
    }

    #[test]
    fn test_resolve_token_none() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::remove_var("TELEGRAM_BOT_TOKEN") };

        let config = Config::default();
        let result = resolve_bot_token(&config);
        assert!(result.is_err());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("TELEGRAM_BOT_TOKEN"));
    }

    #[test]
    fn test_resolve_token_empty_env_var() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::set_var("TELEGRAM_BOT_TOKEN", "") };

        let config = Config {
            telegram: Some(TelegramConfig {
                token: Some("fallback-config-token".to_string()),
                ..TelegramConfig::default()
            }),
            ..Config::default()
        };

        let result = resolve_bot_token(&config);
        assert_eq!(result.unwrap(), "fallback-config-token");

        unsafe { std::env::remove_var("TELEGRAM_BOT_TOKEN") };
    }
}
