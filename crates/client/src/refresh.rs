//! Single-flight coordination of token refreshes
//!
//! While an exchange is outstanding the coordinator is `refreshing`; every
//! caller that arrives in that state awaits the same shared outcome instead
//! of starting its own network call. The exchange runs on its own task, so
//! it completes even when every caller awaiting it has been cancelled.

use crate::error::ErrorKind;
use crate::session::Session;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

/// Why a refresh did not produce a new session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// The backend rejected the exchange; the session has been terminated
    Rejected(String),
    /// The exchange never got an answer; the session has been terminated
    Unavailable(ErrorKind, String),
    /// The backend refused because of a billing lapse; the session is kept
    SubscriptionRequired(String),
}

pub type RefreshOutcome = Result<Session, RefreshFailure>;

type InFlight = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Default)]
struct State {
    generation: u64,
    in_flight: Option<(u64, InFlight)>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owned refresh state; one per client
#[derive(Default)]
pub struct RefreshCoordinator {
    state: Arc<Mutex<State>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an exchange is currently outstanding
    pub fn is_refreshing(&self) -> bool {
        lock(&self.state).in_flight.is_some()
    }

    /// Await the outstanding exchange, or start one with `exchange`
    ///
    /// `exchange` is only invoked when no exchange is in flight. It is
    /// spawned on the current tokio runtime and clears the slot itself once
    /// it settles, so cancelling a caller never stalls the refresh.
    pub async fn run<F, Fut>(&self, exchange: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome> + Send + 'static,
    {
        let in_flight = {
            let mut state = lock(&self.state);
            if let Some((generation, in_flight)) = &state.in_flight {
                debug!(generation, "joining in-flight token refresh");
                in_flight.clone()
            } else {
                state.generation += 1;
                let generation = state.generation;
                let in_flight = spawn_exchange(Arc::clone(&self.state), generation, exchange());
                state.in_flight = Some((generation, in_flight.clone()));
                debug!(generation, "starting token refresh");
                in_flight
            }
        };

        in_flight.await
    }
}

fn spawn_exchange<Fut>(state: Arc<Mutex<State>>, generation: u64, exchange: Fut) -> InFlight
where
    Fut: Future<Output = RefreshOutcome> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let outcome = exchange.await;
        let mut guard = lock(&state);
        if matches!(&guard.in_flight, Some((current, _)) if *current == generation) {
            guard.in_flight = None;
        }
        outcome
    });

    async move {
        task.await.unwrap_or_else(|join_error| {
            error!(%join_error, "token refresh task did not complete");
            Err(RefreshFailure::Unavailable(
                ErrorKind::NetworkError,
                format!("token refresh aborted: {join_error}"),
            ))
        })
    }
    .boxed()
    .shared()
}
