//! Backend connectivity monitoring

use crate::client::{ApiClient, ApiRequest};
use crate::error::ErrorKind;
use crate::types::{ErrorBody, HEALTH_PATH};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Body message the health endpoint returns when everything is fine
pub const HEALTHY_MESSAGE: &str = "API is working";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No poll has settled yet
    Checking,
    Connected,
    /// The backend could not be reached
    Disconnected,
    /// The backend answered with something unexpected
    Error,
    /// Reachable, but the account's subscription has lapsed
    SubscriptionExpired,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::SubscriptionExpired => "subscription_expired",
        })
    }
}

/// Result of the latest health poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConnectionState {
    pub const fn checking() -> Self {
        Self {
            status: ConnectionStatus::Checking,
            last_checked_at: None,
            message: None,
        }
    }

    fn observed(status: ConnectionStatus, message: Option<String>) -> Self {
        Self {
            status,
            last_checked_at: Some(Utc::now()),
            message,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::checking()
    }
}

/// Classify a health endpoint response
pub fn classify(status: StatusCode, body: &[u8]) -> (ConnectionStatus, Option<String>) {
    let parsed = serde_json::from_slice::<ErrorBody>(body).ok();
    let message = parsed.as_ref().and_then(|b| b.message.clone().or_else(|| b.error.clone()));

    if status == StatusCode::FORBIDDEN && parsed.as_ref().is_some_and(|b| b.subscription_required) {
        return (ConnectionStatus::SubscriptionExpired, message);
    }
    if status == StatusCode::OK && message.as_deref() == Some(HEALTHY_MESSAGE) {
        return (ConnectionStatus::Connected, message);
    }
    let message = message.unwrap_or_else(|| format!("unexpected health response: {status}"));
    (ConnectionStatus::Error, Some(message))
}

impl ApiClient {
    /// Poll the health endpoint once
    ///
    /// Sends the stored token when there is one; never refreshes it.
    pub async fn check_connection(&self) -> ConnectionState {
        match self.probe(&ApiRequest::get(HEALTH_PATH)).await {
            Ok((status, body)) => {
                let (status, message) = classify(status, &body);
                ConnectionState::observed(status, message)
            }
            Err(error) => {
                let status = match error.kind() {
                    ErrorKind::NetworkError | ErrorKind::Timeout => ConnectionStatus::Disconnected,
                    _ => ConnectionStatus::Error,
                };
                ConnectionState::observed(status, Some(error.to_string()))
            }
        }
    }
}

/// Background health poller publishing [`ConnectionState`]
///
/// A poll starts only after the previous one settled. Dropping the monitor
/// stops the loop.
pub struct ConnectionMonitor {
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionMonitor {
    /// Start polling on the current tokio runtime; the first poll runs immediately
    pub fn start(client: ApiClient, interval: Duration) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::checking());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(poll_loop(client, interval, state_tx, shutdown_rx));
        Self {
            state_rx,
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Latest published state
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Stop polling and wait for an in-flight poll to be abandoned
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("connection monitor stopped");
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn poll_loop(
    client: ApiClient,
    interval: Duration,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(interval_ms = interval.as_millis(), "connection monitor started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let state = tokio::select! {
                    state = client.check_connection() => state,
                    _ = shutdown_rx.changed() => break,
                };
                publish(&state_tx, state);
            }
        }
    }
}

fn publish(state_tx: &watch::Sender<ConnectionState>, state: ConnectionState) {
    state_tx.send_modify(|current| {
        if current.status != state.status {
            match state.status {
                ConnectionStatus::Connected => info!(from = %current.status, "backend connected"),
                status => warn!(
                    from = %current.status,
                    to = %status,
                    message = state.message.as_deref().unwrap_or_default(),
                    "backend connection degraded"
                ),
            }
        }
        *current = state;
    });
}
