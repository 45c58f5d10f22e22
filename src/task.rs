use std::fmt;

use automation_api::ApiRequest;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::calibration::{CalibrationPhase, CalibrationSample};
use crate::error::ClientError;

/// Backend-issued (or, for acknowledged-only submissions, client-issued) task id.
pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Record,
    Playback,
    CalibrationPhase,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Playback => "playback",
            Self::CalibrationPhase => "calibration",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Stopped,
    Failed,
}

impl TaskStatus {
    /// Parses the status spellings used by the backend and its worker queue.
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.trim() {
            "pending" | "Pending" | "PENDING" | "queued" => Self::Pending,
            "in_progress" | "InProgress" | "IN_PROGRESS" | "STARTED" | "PROGRESS" | "running" => {
                Self::InProgress
            }
            "completed" | "Completed" | "COMPLETED" | "SUCCESS" => Self::Completed,
            "stopped" | "Stopped" | "STOPPED" | "REVOKED" | "cancelled" => Self::Stopped,
            "failed" | "Failed" | "FAILED" | "FAILURE" => Self::Failed,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Routine name for record/playback, phase name for calibration.
    pub name: String,
    pub status: TaskStatus,
    pub created_at: OffsetDateTime,
}

impl Task {
    /// Endpoint polled for this task's status, if it is a polled kind.
    pub fn status_request(&self) -> Option<ApiRequest> {
        match self.kind {
            TaskKind::Record => Some(ApiRequest::get(format!(
                "/recording-status/{}",
                urlencoding::encode(&self.id)
            ))),
            TaskKind::Playback => Some(ApiRequest::get(format!(
                "/playback_status/{}",
                urlencoding::encode(&self.name)
            ))),
            TaskKind::CalibrationPhase => None,
        }
    }

    /// Backend cancellation call for this task, if its kind has one.
    pub fn cancel_request(&self) -> Option<ApiRequest> {
        match self.kind {
            TaskKind::Record => Some(ApiRequest::post("/cancel_recording").with_body(json!({
                "task_id": self.id,
                "routine_name": self.name,
            }))),
            TaskKind::Playback => Some(ApiRequest::post("/stop_playback").with_body(json!({
                "routine_name": self.name,
                "task_id": self.id,
            }))),
            TaskKind::CalibrationPhase => None,
        }
    }
}

/// A request to start one remote task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskRequest {
    Record {
        routine_name: String,
        tokens_per_run: Option<u32>,
    },
    Playback {
        routine_name: String,
    },
    Calibration {
        phase: CalibrationPhase,
        samples: Vec<CalibrationSample>,
        aspect_ratio: f64,
    },
}

impl TaskRequest {
    pub fn record(routine_name: impl Into<String>, tokens_per_run: Option<u32>) -> Self {
        Self::Record {
            routine_name: routine_name.into(),
            tokens_per_run,
        }
    }

    pub fn playback(routine_name: impl Into<String>) -> Self {
        Self::Playback {
            routine_name: routine_name.into(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Record { .. } => TaskKind::Record,
            Self::Playback { .. } => TaskKind::Playback,
            Self::Calibration { .. } => TaskKind::CalibrationPhase,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Record { routine_name, .. } | Self::Playback { routine_name } => {
                routine_name.trim().to_string()
            }
            Self::Calibration { phase, .. } => phase.as_str().to_string(),
        }
    }

    /// Local validation performed before any network call.
    pub fn validate(&self) -> Result<(), ClientError> {
        match self {
            Self::Record { routine_name, .. } | Self::Playback { routine_name } => {
                if routine_name.trim().is_empty() {
                    return Err(ClientError::validation("routine name must not be empty"));
                }
            }
            Self::Calibration {
                samples,
                aspect_ratio,
                ..
            } => {
                if samples.is_empty() {
                    return Err(ClientError::validation(
                        "calibration submission needs at least one sample",
                    ));
                }
                if samples.iter().any(|sample| !sample.is_normalized()) {
                    return Err(ClientError::validation(
                        "calibration samples must be normalized to [0, 1]",
                    ));
                }
                if !aspect_ratio.is_finite() || *aspect_ratio <= 0.0 {
                    return Err(ClientError::validation(
                        "calibration aspect ratio must be a positive number",
                    ));
                }
            }
        }
        Ok(())
    }

    /// The backend call that starts this task.
    pub fn start_request(&self) -> ApiRequest {
        match self {
            Self::Record {
                routine_name,
                tokens_per_run,
            } => ApiRequest::post("/record").with_body(json!({
                "routine_name": routine_name.trim(),
                "tokens_per_run": tokens_per_run,
            })),
            Self::Playback { routine_name } => ApiRequest::post("/start_playback")
                .with_body(json!({ "routine_name": routine_name.trim() })),
            Self::Calibration {
                phase,
                samples,
                aspect_ratio,
            } => {
                let points: Vec<[f64; 2]> = samples.iter().map(|sample| [sample.x, sample.y]).collect();
                ApiRequest::post("/calibrate").with_body(json!({
                    "calibration_data": points,
                    "type": phase.as_str(),
                    "aspect_ratio": aspect_ratio,
                }))
            }
        }
    }
}

/// `{task_id}` body returned by start endpoints.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TaskAccepted {
    #[serde(default)]
    pub task_id: Option<String>,
}

/// `{status}` body returned by status endpoints.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StatusBody {
    pub status: String,
}
