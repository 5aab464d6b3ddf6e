//! Relaybot CLI
//!
//! Command-line entry point for the Telegram to inference relay bot

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relaybot_config::Config;
use relaybot_core::{standard_dispatcher, ReplyRelay};
use relaybot_providers::{InferenceClient, OpenAICompatibleClient, RequestTranslator};
use relaybot_telegram::TelegramAdapter;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "relaybot")]
#[command(about = "Telegram bot relaying text and images to a multimodal chat API", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (overrides core.log_level)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot in the foreground until Ctrl+C
    Start,

    /// Validate the config and check the Telegram token
    Check,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the configuration with secrets redacted
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = match load_config(cli.config) {
                Ok(config) => config,
                Err(err) => {
                    let level = cli.log_level.as_deref().unwrap_or("info");
                    let _ = logging::init_stderr_logging(level);
                    report_critical(&err);
                    return Err(err);
                }
            };
            let log_level = cli
                .log_level
                .unwrap_or_else(|| config.log_level().to_string());
            let log_dir = config.data_dir().join("logs");
            let _logging_guard = logging::init_logging(&log_dir, &log_level)?;

            info!("Starting Telegram bot...");
            let result = run_bot(config).await;
            if let Err(err) = &result {
                report_critical(err);
            }
            info!("Bot has stopped");
            result?;
        }

        Commands::Check => {
            let config = load_config(cli.config)?;
            println!("Config OK");

            let adapter = TelegramAdapter::new(&config.telegram)?;
            let me = adapter
                .get_me()
                .await
                .context("Telegram token check failed")?;
            println!(
                "Telegram bot: @{} (id {})",
                me.username.as_deref().unwrap_or("unknown"),
                me.id
            );
            println!(
                "Inference endpoint: {} (model {})",
                config.inference.base_url, config.inference.model
            );
            let log_manager = logging::LogManager::new(config.data_dir().join("logs"));
            println!("Log: {}", log_manager.get_current_log_path().display());
        }

        Commands::Config { action } => match action {
            ConfigCommands::Show => {
                let config = load_config(cli.config)?;
                print!("{}", toml::to_string_pretty(&config.redacted())?);
            }
        },
    }

    Ok(())
}

fn report_critical(err: &anyhow::Error) {
    error!(error = %format!("{:#}", err), "Critical error");
}

fn load_config(config_path: Option<String>) -> Result<Config> {
    if let Some(path) = config_path {
        Config::load(&path).with_context(|| format!("Failed to load config {}", path))
    } else if let Some(default_path) = Config::default_path() {
        Config::load(&default_path)
            .with_context(|| format!("Failed to load config {}", default_path.display()))
    } else {
        anyhow::bail!("No config file found")
    }
}

async fn run_bot(config: Config) -> Result<()> {
    // reqwest's blocking client must be built outside the async context.
    let inference_config = config.inference.clone();
    let client = tokio::task::spawn_blocking(move || {
        OpenAICompatibleClient::from_config(&inference_config)
    })
    .await
    .context("Inference client setup task failed")??;
    let client: Arc<dyn InferenceClient> = Arc::new(client);

    let translator = RequestTranslator::new(Arc::clone(&client), config.inference.model.clone())
        .with_image_type_detection(config.inference.detect_image_type);

    let adapter = TelegramAdapter::new(&config.telegram)?;
    let me = adapter
        .get_me()
        .await
        .context("Telegram token check failed")?;
    let adapter = Arc::new(adapter.with_bot_username(me.username.clone()));

    let relay = Arc::new(ReplyRelay::new(adapter.clone(), translator));
    let dispatcher = standard_dispatcher(relay);

    info!(
        bot = me.username.as_deref().unwrap_or("unknown"),
        model = %config.inference.model,
        "Bot is now running. Press Ctrl+C to stop."
    );

    let result = tokio::select! {
        res = adapter.poll(&dispatcher) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    drop(dispatcher);
    let _ = tokio::task::spawn_blocking(move || drop(client)).await;

    result
}
