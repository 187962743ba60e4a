//! Feedmaster bot CLI
//!
//! Long-running entry point plus a few maintenance commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use feedmaster_bot::{
    error::{AppError, Result},
    models::{Config, Event, RarityTier},
    pipeline::{Orchestrator, Settings},
    publishers,
    render::{CardRenderer, Renderer},
    services::{FeedClient, MetadataResolver},
    storage::{CursorStore, LocalStorage, MemoryStorage},
    utils::http,
};
use tokio_util::sync::CancellationToken;

/// Feedmaster - Achievement publishing bot
#[derive(Parser, Debug)]
#[command(
    name = "feedmaster-bot",
    version,
    about = "Publishes rare Feedmaster achievements to Bluesky and Discord"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll and publish until interrupted
    Run,

    /// Run a single cycle and exit
    Once,

    /// Validate configuration
    Validate,

    /// Render a card to a file without publishing
    Preview {
        /// Display name shown on the card
        #[arg(long, default_value = "Feedmaster Fan")]
        user: String,

        #[arg(long, default_value = "Night Owl")]
        achievement: String,

        #[arg(long, default_value = "Legendary")]
        tier: String,

        #[arg(long, default_value_t = 1.25)]
        percentage: f64,

        /// Avatar image URL
        #[arg(long)]
        avatar_url: Option<String>,

        #[arg(short, long, default_value = "card.png")]
        output: PathBuf,
    },

    /// Show stored cursor, rate window and card cache
    Info,
}

/// Initialize logging. `RUST_LOG` wins over both arguments.
fn init_logging(verbose: bool, configured: &str) {
    let level = if verbose { "debug" } else { configured };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Load the config file and overlay credentials from the environment.
fn load_config(path: &Path) -> (Config, Option<AppError>) {
    let (mut config, error) = match Config::load(path) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    config.apply_credentials(|key| std::env::var(key).ok());
    (config, error)
}

fn build_orchestrator(config: &Config, storage: Arc<LocalStorage>) -> Result<Orchestrator> {
    let api_client = http::create_async_client(&config.http)?;
    let browser_client = http::create_browser_client(&config.http)?;

    let source = FeedClient::new(api_client.clone(), &config.feed.api_base)?;
    let renderer = CardRenderer::new(browser_client.clone(), storage.clone(), &config.render);
    let resolver = MetadataResolver::new(browser_client);
    let destinations = publishers::from_config(config, &api_client);

    Ok(Orchestrator::new(
        Settings::from_config(config),
        Box::new(source),
        Box::new(renderer),
        Box::new(resolver),
        destinations,
        storage,
    ))
}

/// Cancel `token` on Ctrl-C or SIGTERM.
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            log::warn!("Cannot listen for SIGTERM: {}", e);
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = sigterm.recv() => log::info!("Received SIGTERM, shutting down after the current cycle"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Received Ctrl-C, shutting down after the current cycle"),
        Err(e) => {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, load_error) = load_config(&cli.config);
    init_logging(cli.verbose, &config.logging.level);

    log::info!("Feedmaster bot starting...");
    match &load_error {
        Some(e) => log::warn!(
            "Config load failed from {}: {}. Using defaults.",
            cli.config.display(),
            e
        ),
        None => log::info!("Loaded configuration from {}", cli.config.display()),
    }

    let storage = Arc::new(LocalStorage::new(&config.storage.root_dir));

    match cli.command {
        Command::Run => {
            config.validate()?;
            let mut orchestrator = build_orchestrator(&config, Arc::clone(&storage))?;

            let cancel = CancellationToken::new();
            spawn_shutdown_listener(cancel.clone());
            orchestrator.run(cancel).await;
        }

        Command::Once => {
            config.validate()?;
            let mut orchestrator = build_orchestrator(&config, Arc::clone(&storage))?;

            orchestrator.initialize(Utc::now()).await;
            orchestrator.authenticate_all().await;
            let report = orchestrator.run_cycle(Utc::now()).await?;
            log::info!("Cycle complete: {}", report);
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Some(e) = load_error {
                log::error!("Config could not be loaded: {}", e);
                return Err(e);
            }
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }

            let settings = Settings::from_config(&config);
            log::info!("✓ Feeds: {}", settings.feed_ids.join(", "));
            log::info!(
                "✓ Poll every {} min, {} posts per cycle, {} per hour",
                config.posting.poll_interval_minutes,
                settings.max_posts_per_interval,
                settings.max_posts_per_hour
            );
            log::info!("✓ Minimum tier: {}", settings.min_tier);
            log::info!("All validations passed!");
        }

        Command::Preview {
            user,
            achievement,
            tier,
            percentage,
            avatar_url,
            output,
        } => {
            let tier = RarityTier::from_name(&tier)
                .ok_or_else(|| AppError::validation(format!("unknown tier '{tier}'")))?;
            let event = Event {
                id: 0,
                user_handle: user.clone(),
                user_display_name: Some(user),
                user_avatar_url: avatar_url,
                achievement_name: achievement,
                rarity_tier: Some(tier),
                rarity_percentage: Some(percentage),
                share_url: None,
                earned_at: Utc::now(),
            };

            let client = http::create_browser_client(&config.http)?;
            let renderer = CardRenderer::new(client, Arc::new(MemoryStorage::new()), &config.render);
            let card = renderer.render(&event).await?;
            std::fs::write(&output, &card.png)?;

            log::info!("Card written to {} ({} bytes)", output.display(), card.png.len());
            log::info!("Message: {}", event.format(&config.posting.message_template));
        }

        Command::Info => {
            log::info!("Storage directory: {}", storage.root_dir().display());
            log::info!("Cursor: {}", storage.load().await);
            match storage.load_window().await {
                Some(window) => log::info!(
                    "Rate window: {} posts, resets at {}",
                    window.count,
                    window.resets_at
                ),
                None => log::info!("Rate window: none stored yet"),
            }
            log::info!("Cached cards: {}", storage.card_count().await?);
        }
    }

    log::info!("Done!");

    Ok(())
}
