//! User-facing notification capability.
//!
//! The core never renders anything; it reports outcomes through a
//! [`NotificationSink`] supplied by whoever embeds the session.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::error::ClientError;
use crate::lock_unpoisoned;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Info,
    Success,
    Error,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Error => "error",
        })
    }
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, kind: NotificationKind, message: &str);

    /// Called once the credential has been cleared because it could not be
    /// recovered. Embedders redirect to their sign-in surface here.
    fn session_expired(&self) {}
}

/// Reports `error` through `sink` with its human-readable message.
pub fn notify_error(sink: &dyn NotificationSink, error: &ClientError) {
    sink.notify(NotificationKind::Error, &error.to_string());
}

/// Sink that forwards every notification to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, kind: NotificationKind, message: &str) {
        match kind {
            NotificationKind::Info => info!(target: "routine_pilot::notify", "{message}"),
            NotificationKind::Success => info!(target: "routine_pilot::notify", success = true, "{message}"),
            NotificationKind::Error => error!(target: "routine_pilot::notify", "{message}"),
        }
    }

    fn session_expired(&self) {
        warn!(target: "routine_pilot::notify", "session expired; sign-in required");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

/// Sink that keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    notifications: Mutex<Vec<Notification>>,
    expirations: Mutex<usize>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock_unpoisoned(&self.notifications).clone()
    }

    pub fn messages(&self, kind: NotificationKind) -> Vec<String> {
        lock_unpoisoned(&self.notifications)
            .iter()
            .filter(|notification| notification.kind == kind)
            .map(|notification| notification.message.clone())
            .collect()
    }

    pub fn expirations(&self) -> usize {
        *lock_unpoisoned(&self.expirations)
    }

    pub fn clear(&self) {
        lock_unpoisoned(&self.notifications).clear();
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, kind: NotificationKind, message: &str) {
        lock_unpoisoned(&self.notifications).push(Notification {
            kind,
            message: message.to_string(),
        });
    }

    fn session_expired(&self) {
        *lock_unpoisoned(&self.expirations) += 1;
    }
}
