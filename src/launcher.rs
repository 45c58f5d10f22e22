//! Start, track and cancel long-running backend tasks.
//!
//! The launcher keeps at most one non-terminal task per [`TaskKind`]. The
//! check and the reservation happen in one critical section before the start
//! request is sent, and every reservation carries a generation so a late
//! outcome for a discarded task never touches its replacement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use automation_api::{ApiRequest, AutomationApiError, StatusCode};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::calibration::CalibrationPhase;
use crate::error::ClientError;
use crate::lock_unpoisoned;
use crate::notify::{notify_error, NotificationKind, NotificationSink};
use crate::poll::{PollHandle, PollOutcome, PollScheduler, StatusSource};
use crate::refresh::RefreshCoordinator;
use crate::task::{StatusBody, Task, TaskAccepted, TaskKind, TaskRequest, TaskStatus};

pub type ReservationId = u64;

#[derive(Debug)]
enum Slot {
    Starting {
        generation: ReservationId,
    },
    Active {
        generation: ReservationId,
        task: Task,
        poll: Option<PollHandle>,
    },
}

impl Slot {
    fn generation(&self) -> ReservationId {
        match self {
            Self::Starting { generation } | Self::Active { generation, .. } => *generation,
        }
    }

    fn task(&self) -> Option<&Task> {
        match self {
            Self::Starting { .. } => None,
            Self::Active { task, .. } => Some(task),
        }
    }
}

pub struct TaskLauncher {
    coordinator: Arc<RefreshCoordinator>,
    scheduler: PollScheduler,
    sink: Arc<dyn NotificationSink>,
    slots: Mutex<HashMap<TaskKind, Slot>>,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for TaskLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLauncher")
            .field("scheduler", &self.scheduler)
            .field("active", &self.active_tasks())
            .finish_non_exhaustive()
    }
}

impl TaskLauncher {
    pub fn new(
        coordinator: Arc<RefreshCoordinator>,
        scheduler: PollScheduler,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            coordinator,
            scheduler,
            sink,
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    /// Starts the task described by `request`.
    ///
    /// Fails with [`ClientError::TaskAlreadyActive`] if a task of the same
    /// kind is pending or in progress. The returned task is `InProgress`.
    pub async fn start_task(&self, request: TaskRequest) -> Result<Task, ClientError> {
        let result = self.start_task_inner(&request).await;
        if let Err(error) = &result {
            notify_error(self.sink.as_ref(), error);
        }
        result
    }

    async fn start_task_inner(&self, request: &TaskRequest) -> Result<Task, ClientError> {
        request.validate()?;
        let kind = request.kind();
        let generation = self.reserve(kind)?;

        let task = match self.request_start(request).await {
            Ok(task) => task,
            Err(error) => {
                self.release(kind, generation);
                warn!(kind = %kind, error = %error, "task start failed");
                return Err(error);
            }
        };

        if !self.activate(generation, task.clone()) {
            warn!(task_id = %task.id, "task started after its reservation was discarded");
        }
        info!(task_id = %task.id, kind = %kind, name = %task.name, "task started");
        self.sink.notify(
            NotificationKind::Info,
            &format!("{} started", describe(&task)),
        );
        Ok(task)
    }

    fn reserve(&self, kind: TaskKind) -> Result<ReservationId, ClientError> {
        let mut slots = lock_unpoisoned(&self.slots);
        if slots.contains_key(&kind) {
            debug!(kind = %kind, "rejecting start; kind already active");
            return Err(ClientError::TaskAlreadyActive { kind });
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        slots.insert(kind, Slot::Starting { generation });
        Ok(generation)
    }

    fn release(&self, kind: TaskKind, generation: ReservationId) {
        let mut slots = lock_unpoisoned(&self.slots);
        if matches!(slots.get(&kind), Some(Slot::Starting { generation: current }) if *current == generation)
        {
            slots.remove(&kind);
        }
    }

    fn activate(&self, generation: ReservationId, task: Task) -> bool {
        let mut slots = lock_unpoisoned(&self.slots);
        match slots.get_mut(&task.kind) {
            Some(slot)
                if matches!(slot, Slot::Starting { .. }) && slot.generation() == generation =>
            {
                *slot = Slot::Active {
                    generation,
                    task,
                    poll: None,
                };
                true
            }
            _ => false,
        }
    }

    async fn request_start(&self, request: &TaskRequest) -> Result<Task, ClientError> {
        let api_request = request.start_request();
        let response = self.coordinator.execute(&api_request).await?;
        let accepted: TaskAccepted = response.decode(&api_request.path)?;
        let kind = request.kind();

        let id = match accepted.task_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None if kind == TaskKind::CalibrationPhase => uuid::Uuid::new_v4().to_string(),
            None => {
                return Err(AutomationApiError::Decode {
                    path: api_request.path,
                    message: "response is missing task_id".to_string(),
                }
                .into())
            }
        };

        Ok(Task {
            id,
            kind,
            name: request.name(),
            status: TaskStatus::InProgress,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Starts polling the active task `task_id` and settles it on the
    /// terminal outcome. Watching an already watched task returns the
    /// existing handle.
    pub fn watch(self: &Arc<Self>, task_id: &str) -> Result<PollHandle, ClientError> {
        let mut slots = lock_unpoisoned(&self.slots);
        let Some((generation, task, poll)) = slots.values_mut().find_map(|slot| match slot {
            Slot::Active {
                generation,
                task,
                poll,
            } if task.id == task_id => Some((*generation, task, poll)),
            _ => None,
        }) else {
            return Err(ClientError::validation(format!(
                "task {task_id} is not active"
            )));
        };

        if let Some(existing) = poll {
            return Ok(existing.clone());
        }

        let Some(request) = task.status_request() else {
            return Err(ClientError::validation(format!(
                "{} tasks do not report status",
                task.kind
            )));
        };

        let source = Arc::new(TaskStatusProbe {
            coordinator: Arc::clone(&self.coordinator),
            request,
        });
        let handle = self.scheduler.watch(task.id.clone(), source);
        *poll = Some(handle.clone());

        let kind = task.kind;
        let launcher = Arc::downgrade(self);
        let follower = handle.clone();
        drop(slots);
        tokio::spawn(follow_poll(launcher, follower, kind, generation));
        Ok(handle)
    }

    pub async fn start_and_watch(
        self: &Arc<Self>,
        request: TaskRequest,
    ) -> Result<(Task, PollHandle), ClientError> {
        let task = self.start_task(request).await?;
        let handle = self.watch(&task.id)?;
        Ok((task, handle))
    }

    fn settle(&self, kind: TaskKind, generation: ReservationId, outcome: PollOutcome) {
        let status = match &outcome {
            PollOutcome::Finished(status) => *status,
            PollOutcome::Cancelled => return,
            PollOutcome::TransportFailed(_) | PollOutcome::TimedOut => TaskStatus::Failed,
        };

        let Some(mut task) = self.take_active(kind, generation) else {
            debug!(kind = %kind, generation, "ignoring outcome for a discarded task");
            return;
        };
        task.status = status;
        info!(task_id = %task.id, status = %status, "task settled");

        match outcome {
            PollOutcome::Finished(TaskStatus::Completed) => self.sink.notify(
                NotificationKind::Success,
                &format!("{} completed", describe(&task)),
            ),
            PollOutcome::Finished(TaskStatus::Stopped) => self.sink.notify(
                NotificationKind::Info,
                &format!("{} stopped", describe(&task)),
            ),
            PollOutcome::TransportFailed(message) => notify_error(
                self.sink.as_ref(),
                &ClientError::TaskFailed {
                    task_id: task.id.clone(),
                    message: format!("status check failed: {message}"),
                },
            ),
            PollOutcome::TimedOut => notify_error(
                self.sink.as_ref(),
                &ClientError::TaskFailed {
                    task_id: task.id.clone(),
                    message: "timed out waiting for completion".to_string(),
                },
            ),
            _ => notify_error(
                self.sink.as_ref(),
                &ClientError::TaskFailed {
                    task_id: task.id.clone(),
                    message: format!("{} failed", describe(&task)),
                },
            ),
        }
    }

    fn take_active(&self, kind: TaskKind, generation: ReservationId) -> Option<Task> {
        let mut slots = lock_unpoisoned(&self.slots);
        match slots.get(&kind) {
            Some(Slot::Active {
                generation: current,
                ..
            }) if *current == generation => match slots.remove(&kind) {
                Some(Slot::Active { task, .. }) => Some(task),
                _ => None,
            },
            _ => None,
        }
    }

    fn find_active(&self, task_id: &str) -> Option<(ReservationId, Task, Option<PollHandle>)> {
        lock_unpoisoned(&self.slots)
            .values()
            .find_map(|slot| match slot {
                Slot::Active {
                    generation,
                    task,
                    poll,
                } if task.id == task_id => Some((*generation, task.clone(), poll.clone())),
                _ => None,
            })
    }

    /// Cancels the active task `task_id`. Cancelling a task that is no longer
    /// active succeeds without contacting the backend.
    pub async fn cancel_task(&self, task_id: &str) -> Result<(), ClientError> {
        let Some((generation, task, poll)) = self.find_active(task_id) else {
            debug!(task_id, "cancel requested for an inactive task");
            return Ok(());
        };

        if let Some(request) = task.cancel_request() {
            if let Err(error) = self.request_cancel(&request).await {
                warn!(task_id, error = %error, "task cancellation failed");
                notify_error(self.sink.as_ref(), &error);
                return Err(error);
            }
        }

        if let Some(poll) = poll {
            poll.cancel();
        }
        if self.take_active(task.kind, generation).is_some() {
            info!(task_id, "task cancelled");
            self.sink.notify(
                NotificationKind::Info,
                &format!("{} stopped", describe(&task)),
            );
        }
        Ok(())
    }

    async fn request_cancel(&self, request: &ApiRequest) -> Result<(), ClientError> {
        let response = self.coordinator.send(request).await?;
        if response.is_success() || already_terminal(response.status) {
            return Ok(());
        }
        Err(ClientError::backend(response.status, response.error_message()))
    }

    /// Settles `task_id` with the terminal `status` without polling. Returns
    /// the settled task, or `None` if it was not active.
    pub fn finish(&self, task_id: &str, status: TaskStatus) -> Option<Task> {
        if !status.is_terminal() {
            return None;
        }
        let (generation, task, poll) = self.find_active(task_id)?;
        if let Some(poll) = poll {
            poll.cancel();
        }
        let mut task = self.take_active(task.kind, generation)?;
        task.status = status;
        debug!(task_id, status = %status, "task finished");
        Some(task)
    }

    pub fn active(&self, kind: TaskKind) -> Option<Task> {
        lock_unpoisoned(&self.slots)
            .get(&kind)
            .and_then(Slot::task)
            .cloned()
    }

    pub fn active_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = lock_unpoisoned(&self.slots)
            .values()
            .filter_map(Slot::task)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.kind);
        tasks
    }

    /// True while any task is pending or in progress, including one whose
    /// start request has not been answered yet.
    pub fn has_active_task(&self) -> bool {
        !lock_unpoisoned(&self.slots).is_empty()
    }

    /// Halts every poll loop and discards all tracked tasks.
    pub fn shutdown(&self) -> Vec<Task> {
        let drained: Vec<Slot> = lock_unpoisoned(&self.slots)
            .drain()
            .map(|(_, slot)| slot)
            .collect();
        let mut discarded = Vec::new();
        for slot in drained {
            if let Slot::Active { task, poll, .. } = slot {
                if let Some(poll) = poll {
                    poll.cancel();
                }
                discarded.push(task);
            }
        }
        if !discarded.is_empty() {
            info!(count = discarded.len(), "discarded active tasks on shutdown");
        }
        discarded
    }

    /// Asks the backend to open `phase`. Returns the handoff URL it reports,
    /// if any. The browser phase needs no trigger.
    pub async fn open_calibration_phase(
        &self,
        phase: CalibrationPhase,
    ) -> Result<Option<String>, ClientError> {
        let Some(path) = phase.trigger_path() else {
            return Ok(None);
        };
        let opened: PhaseOpened = self
            .coordinator
            .execute_json(&ApiRequest::post(path))
            .await?;
        debug!(phase = %phase, url = ?opened.url, "calibration phase opened");
        Ok(opened.url)
    }
}

#[derive(Debug, Default, Deserialize)]
struct PhaseOpened {
    #[serde(default)]
    url: Option<String>,
}

fn already_terminal(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::NOT_FOUND | StatusCode::CONFLICT | StatusCode::GONE
    )
}

fn describe(task: &Task) -> String {
    match task.kind {
        TaskKind::Record => format!("Recording '{}'", task.name),
        TaskKind::Playback => format!("Playback of '{}'", task.name),
        TaskKind::CalibrationPhase => format!("Calibration phase '{}'", task.name),
    }
}

async fn follow_poll(
    launcher: Weak<TaskLauncher>,
    handle: PollHandle,
    kind: TaskKind,
    generation: ReservationId,
) {
    let outcome = handle.outcome().await;
    if let Some(launcher) = launcher.upgrade() {
        launcher.settle(kind, generation, outcome);
    }
}

struct TaskStatusProbe {
    coordinator: Arc<RefreshCoordinator>,
    request: ApiRequest,
}

#[async_trait]
impl StatusSource for TaskStatusProbe {
    async fn probe(&self) -> Result<TaskStatus, ClientError> {
        let body: StatusBody = self.coordinator.execute_json(&self.request).await?;
        TaskStatus::parse(&body.status).ok_or_else(|| {
            AutomationApiError::Decode {
                path: self.request.path.clone(),
                message: format!("unrecognized task status '{}'", body.status),
            }
            .into()
        })
    }
}
