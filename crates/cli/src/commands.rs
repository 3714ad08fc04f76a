//! CLI commands

use anyhow::{Result, bail};
use clap::Subcommand;
use licensedesk_client::{ApiClient, ConnectionMonitor, ConnectionState, ConnectionStatus, Resource};
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::config::Settings;

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in to the admin backend
    Login {
        #[arg(short, long)]
        username: String,

        #[arg(short, long, env = "LICENSEDESK_PASSWORD", hide_env_values = true)]
        password: String,

        /// Keep the session in the state directory across runs
        #[arg(long)]
        remember: bool,
    },

    /// Forget the stored session
    Logout,

    /// Show the signed-in user and the backend in use
    Whoami,

    /// Inspect or override the backend origin
    Backend {
        #[command(subcommand)]
        command: BackendCommands,
    },

    /// Check backend health once
    Status,

    /// Poll backend health until interrupted
    Watch {
        /// Seconds between polls (defaults to monitor.interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// List a resource collection as JSON
    List {
        /// One of software, licenses, orders, subscriptions
        resource: Resource,
    },
}

#[derive(Subcommand)]
pub enum BackendCommands {
    /// Print the resolved backend origin
    Show,

    /// Persist a backend origin preference
    Set { url: String },

    /// Remove the persisted preference
    Clear,
}

impl Commands {
    /// Whether the command keeps running until interrupted
    pub const fn is_long_running(&self) -> bool {
        matches!(self, Self::Watch { .. })
    }

    pub async fn execute(self, client: &ApiClient, settings: &Settings) -> Result<()> {
        match self {
            Self::Login {
                username,
                password,
                remember,
            } => {
                let user = client.login(&username, &password, remember).await?;
                println!(
                    "Logged in as {} ({})",
                    user.username.as_deref().unwrap_or(&username),
                    user.role
                );
                if !remember {
                    println!("Session not remembered; pass --remember to keep it for later runs");
                }
                Ok(())
            }
            Self::Logout => {
                client.logout()?;
                println!("Logged out");
                Ok(())
            }
            Self::Whoami => whoami(client),
            Self::Backend { command } => command.execute(client),
            Self::Status => {
                let state = client.check_connection().await;
                print_state(&state);
                if state.status == ConnectionStatus::Connected {
                    Ok(())
                } else {
                    bail!("backend is {}", state.status)
                }
            }
            Self::Watch { interval } => {
                let interval = interval
                    .map_or_else(|| settings.poll_interval(), |secs| Duration::from_secs(secs.max(1)));
                watch(client.clone(), interval).await
            }
            Self::List { resource } => {
                let items = client.list(resource).await?;
                println!("{}", serde_json::to_string_pretty(&items)?);
                Ok(())
            }
        }
    }
}

impl BackendCommands {
    pub fn execute(self, client: &ApiClient) -> Result<()> {
        match self {
            Self::Show => {
                println!("{}", client.backend_url()?);
                Ok(())
            }
            Self::Set { url } => {
                let parsed = Url::parse(url.trim())?;
                if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                    bail!("backend url must be an http or https origin: {url}");
                }
                client.store().set_backend_preference(parsed.as_str())?;
                println!("Backend preference set to {parsed}");
                if client.backend_url()? != parsed {
                    println!("Note: the signed-in profile overrides it with {}", client.backend_url()?);
                }
                Ok(())
            }
            Self::Clear => {
                client.store().clear_backend_preference()?;
                println!("Backend preference cleared, using {}", client.backend_url()?);
                Ok(())
            }
        }
    }
}

fn whoami(client: &ApiClient) -> Result<()> {
    let Some(user) = client.current_user()? else {
        println!("Not logged in (backend {})", client.backend_url()?);
        return Ok(());
    };
    println!("User:         {}", user.username.as_deref().unwrap_or("-"));
    println!("Id:           {}", user.id);
    println!("Role:         {}", user.role);
    println!("Subscription: {}", if user.subscription_active { "active" } else { "inactive" });
    println!("Backend:      {}", client.backend_url()?);
    Ok(())
}

fn print_state(state: &ConnectionState) {
    let checked = state
        .last_checked_at
        .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    match &state.message {
        Some(message) => println!("[{checked}] {}: {message}", state.status),
        None => println!("[{checked}] {}", state.status),
    }
}

async fn watch(client: ApiClient, interval: Duration) -> Result<()> {
    info!(origin = %client.backend_url()?, interval_secs = interval.as_secs(), "watching backend health");
    let monitor = ConnectionMonitor::start(client, interval);
    let mut states = monitor.subscribe();
    let mut last = None;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Received shutdown signal");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if last != Some(state.status) {
                    print_state(&state);
                    last = Some(state.status);
                }
            }
        }
    }

    monitor.shutdown().await;
    Ok(())
}
