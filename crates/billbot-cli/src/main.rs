//! billbot - runs bill requests from group chats through the billing backend

mod config;
mod telegram;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use billbot_backend::HttpBackend;
use billbot_dialog::{Dispatcher, InMemorySessionStore, Router, RouterConfig};

use crate::config::{BOT_TOKEN_ENV, Config, Settings};
use crate::telegram::TelegramTransport;

/// Pause after a failed getUpdates before polling again
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// billbot - bill request bot
#[derive(Parser, Debug)]
#[command(name = "billbot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: ~/.config/billbot/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(verbose: bool, log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("billbot=debug,billbot_dialog=debug,billbot_backend=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(Config::config_path);

    // Initialize config and exit
    if args.init_config {
        Config::init(&config_path)
            .with_context(|| format!("creating {}", config_path.display()))?;
        println!("Config file created at: {}", config_path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let settings = Config::load_from(&config_path)
        .and_then(|c| c.resolve(std::env::var(BOT_TOKEN_ENV).ok()))
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    init_tracing(args.verbose, settings.log_file.as_ref())?;
    tracing::info!("Starting billbot (bot id {})", settings.bot_id);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
            shutdown.cancel();
        }
    });

    run(settings, cancel).await
}

/// Poll for updates until cancelled, queueing each event behind its conversation
async fn run(settings: Settings, cancel: CancellationToken) -> anyhow::Result<()> {
    let transport = Arc::new(TelegramTransport::new(
        &settings.api_url,
        &settings.bot_token,
        settings.poll_timeout,
    )?);
    let backend = Arc::new(HttpBackend::new(settings.endpoints.clone()));
    let router = Arc::new(Router::new(
        RouterConfig {
            bot_id: settings.bot_id,
            bot_username: settings.bot_username.clone(),
            home_chat_id: settings.home_chat_id,
        },
        backend,
        transport.clone(),
        Arc::new(InMemorySessionStore::new()),
        settings.admin_chat_id,
    ));
    let mut dispatcher = Dispatcher::new(router);

    let mut offset = 0;
    loop {
        let updates = tokio::select! {
            _ = cancel.cancelled() => break,
            updates = transport.get_updates(offset, settings.poll_timeout) => updates,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                tracing::error!("Failed to fetch updates: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RETRY_DELAY) => continue,
                }
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(event) = update.into_event() else {
                continue;
            };
            dispatcher.submit(event);
        }
    }

    tracing::info!(
        "Finishing events of {} conversations",
        dispatcher.conversations()
    );
    dispatcher.shutdown().await;
    Ok(())
}
