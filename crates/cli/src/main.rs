//! LicenseDesk CLI - admin client for the license reseller backend

mod commands;
mod config;
mod logging;
mod state_dir;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use commands::Commands;
use config::Settings;
use licensedesk_client::{ApiClient, FileStorage, MemoryStorage, TokenStore};
use logging::LogFormat;
use state_dir::StateDir;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, debug, error};

#[derive(Parser)]
#[command(name = "licensedesk")]
#[command(about = "Admin client for the LicenseDesk backend")]
#[command(version)]
struct Cli {
    /// Set logging level
    #[arg(short = 'l', long, global = true, default_value = "warn")]
    log_level: LogLevel,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Configuration file (TOML or YAML)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// State directory for the durable session and logs
    #[arg(short = 'd', long, global = true, env = "LICENSEDESK_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Disable file logging for long-running commands
    #[arg(long, global = true)]
    no_file_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let state_dir = cli
        .state_dir
        .clone()
        .or_else(|| settings.state_dir.clone())
        .map_or_else(StateDir::new, StateDir::with_override);

    let log_file = (cli.command.is_long_running() && !cli.no_file_log).then(|| state_dir.log_path("watch"));
    let guard = logging::init_logging(cli.log_level.into(), cli.log_format, log_file.as_deref())?;

    state_dir.create_directories().await?;
    let client = build_client(&settings, &state_dir)?;
    debug!(origin = %client.backend_url()?, "client ready");

    let result = cli.command.execute(&client, &settings).await;
    if let Err(e) = result {
        error!("Command failed: {e:#}");
        eprintln!("Error: {e:#}");
        drop(guard);
        std::process::exit(1);
    }

    Ok(())
}

fn build_client(settings: &Settings, state_dir: &StateDir) -> Result<ApiClient> {
    let store = TokenStore::new(
        Arc::new(FileStorage::new(state_dir.storage_path())),
        Arc::new(MemoryStorage::new()),
    );

    ApiClient::builder()
        .store(store)
        .resolver(settings.resolver()?)
        .hostname(settings.backend.hostname.clone())
        .timeout(settings.timeout())
        .on_auth_failed(Arc::new(|| {
            eprintln!("Session expired. Run `licensedesk login` to sign in again.");
        }))
        .build()
        .context("Failed to build API client")
}

#[derive(Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}
