use automation_api::AutomationApiError;
use thiserror::Error;

use crate::task::{TaskId, TaskKind};

/// Failures surfaced by the session, refresh, task and calibration layers.
///
/// `Transport` and `Backend` together form the "transport error" class: the
/// first is a failure to obtain a response at all, the second a non-success
/// response other than an authorization rejection.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("session expired; sign in again")]
    AuthExpired,

    #[error("a {kind} task is already active")]
    TaskAlreadyActive { kind: TaskKind },

    #[error("transport error: {0}")]
    Transport(#[from] AutomationApiError),

    #[error("backend rejected the request (HTTP {status}): {message}")]
    Backend { status: u16, message: String },

    #[error("task {task_id} failed: {message}")]
    TaskFailed { task_id: TaskId, message: String },

    #[error("invalid input: {0}")]
    Validation(String),
}

impl ClientError {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn backend(status: automation_api::StatusCode, message: impl Into<String>) -> Self {
        Self::Backend {
            status: status.as_u16(),
            message: message.into(),
        }
    }

    /// True when the error requires the user to sign in again.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }

    /// True for the transport class (`Transport` and `Backend`).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Backend { .. })
    }
}

/// Errors raised while loading [`crate::config::ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config JSON: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("config field '{field}' {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    #[must_use]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
