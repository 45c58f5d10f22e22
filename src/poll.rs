//! Status polling for long-running tasks.
//!
//! A poll loop is an explicit two-state machine published over a
//! `tokio::sync::watch` channel. `Polling` transitions to `Stopped` exactly
//! once, whether by a terminal status, a transport failure, a timeout or
//! [`PollHandle::cancel`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::task::{TaskId, TaskStatus};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_POLL_DURATION: Duration = Duration::from_secs(620);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// `None` polls until a terminal status or cancellation.
    pub max_duration: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_duration: Some(DEFAULT_MAX_POLL_DURATION),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Finished(TaskStatus),
    Cancelled,
    TransportFailed(String),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Polling {
        task_id: TaskId,
        last_status: Option<TaskStatus>,
        queries: u32,
    },
    Stopped {
        task_id: TaskId,
        outcome: PollOutcome,
    },
}

impl PollState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped { .. })
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::Polling { task_id, .. } | Self::Stopped { task_id, .. } => task_id,
        }
    }

    pub fn outcome(&self) -> Option<&PollOutcome> {
        match self {
            Self::Polling { .. } => None,
            Self::Stopped { outcome, .. } => Some(outcome),
        }
    }
}

/// One status query for the task being watched.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn probe(&self) -> Result<TaskStatus, ClientError>;
}

/// Observer and cancel capability for one poll loop.
#[derive(Debug, Clone)]
pub struct PollHandle {
    state: Arc<watch::Sender<PollState>>,
}

impl PollHandle {
    pub fn state(&self) -> PollState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.borrow().is_stopped()
    }

    /// Stops polling. Returns `false` if the loop had already stopped.
    pub fn cancel(&self) -> bool {
        stop(&self.state, PollOutcome::Cancelled)
    }

    /// Waits for the loop to stop and returns why it did.
    pub async fn outcome(&self) -> PollOutcome {
        let mut receiver = self.state.subscribe();
        let outcome = match receiver.wait_for(PollState::is_stopped).await {
            Ok(state) => state.outcome().cloned().unwrap_or(PollOutcome::Cancelled),
            Err(_) => PollOutcome::Cancelled,
        };
        outcome
    }
}

/// Spawns poll loops with a shared cadence.
#[derive(Debug, Clone, Default)]
pub struct PollScheduler {
    config: PollConfig,
}

impl PollScheduler {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> PollConfig {
        self.config
    }

    /// Starts polling `source` for `task_id`. The first query happens one
    /// interval after this call. Must be called within a tokio runtime.
    pub fn watch(&self, task_id: impl Into<TaskId>, source: Arc<dyn StatusSource>) -> PollHandle {
        let task_id = task_id.into();
        let (sender, _) = watch::channel(PollState::Polling {
            task_id: task_id.clone(),
            last_status: None,
            queries: 0,
        });
        let state = Arc::new(sender);
        debug!(task_id = %task_id, interval_ms = self.config.interval.as_millis() as u64, "poll loop started");
        tokio::spawn(run_poll_loop(source, self.config, Arc::clone(&state)));
        PollHandle { state }
    }
}

async fn run_poll_loop(
    source: Arc<dyn StatusSource>,
    config: PollConfig,
    state: Arc<watch::Sender<PollState>>,
) {
    let deadline = config.max_duration.map(|max_duration| Instant::now() + max_duration);
    let mut stopped = state.subscribe();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            _ = until_deadline(deadline) => return time_out(&state),
            _ = until_stopped(&mut stopped) => return,
        }

        // A query still in flight at the deadline is abandoned. Otherwise it
        // is allowed to finish and its result is dropped if the loop was
        // stopped meanwhile.
        let probed = tokio::select! {
            probed = source.probe() => probed,
            _ = until_deadline(deadline) => return time_out(&state),
        };
        match probed {
            Ok(status) => {
                if !apply_status(&state, status) {
                    debug!(status = %status, "discarding status for a stopped poll loop");
                    return;
                }
                if status.is_terminal() {
                    info!(task_id = %state.borrow().task_id(), status = %status, "poll loop finished");
                    return;
                }
            }
            Err(error) => {
                if stop(&state, PollOutcome::TransportFailed(error.to_string())) {
                    warn!(error = %error, "status query failed; polling stopped");
                }
                return;
            }
        }
    }
}

async fn until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn time_out(state: &watch::Sender<PollState>) {
    if stop(state, PollOutcome::TimedOut) {
        warn!(task_id = %state.borrow().task_id(), "poll loop timed out");
    }
}

async fn until_stopped(receiver: &mut watch::Receiver<PollState>) {
    let _ = receiver.wait_for(PollState::is_stopped).await;
}

/// Records `status` if the loop is still polling. Returns `false` when the
/// loop had already stopped.
fn apply_status(state: &watch::Sender<PollState>, status: TaskStatus) -> bool {
    state.send_if_modified(|current| {
        let PollState::Polling {
            task_id, queries, ..
        } = current
        else {
            return false;
        };
        let task_id = task_id.clone();
        let queries = *queries + 1;
        debug!(task_id = %task_id, status = %status, queries, "poll tick");
        *current = if status.is_terminal() {
            PollState::Stopped {
                task_id,
                outcome: PollOutcome::Finished(status),
            }
        } else {
            PollState::Polling {
                task_id,
                last_status: Some(status),
                queries,
            }
        };
        true
    })
}

fn stop(state: &watch::Sender<PollState>, outcome: PollOutcome) -> bool {
    state.send_if_modified(|current| {
        let PollState::Polling { task_id, .. } = current else {
            return false;
        };
        let task_id = task_id.clone();
        *current = PollState::Stopped { task_id, outcome };
        true
    })
}
