//! Client for a remote routine automation backend.
//!
//! Invariant: at most one refresh request is in flight per credential
//! generation, and at most one task per [`TaskKind`] is pending or in
//! progress per [`Session`].
//!
//! # Public API Overview
//! - Build a [`Session`] from a [`ClientConfig`] and a [`NotificationSink`].
//! - Sign in, then record or play back routines; each returns the started
//!   [`Task`] and a [`PollHandle`] that follows it to a terminal status.
//! - Drive pointer calibration through [`CalibrationMachine`].
//! - Ask the [`NavigationGuard`] before leaving while work is in flight.
//!
//! All backend calls go through the [`RefreshCoordinator`], which attaches
//! the bearer credential and recovers from expiry with a single refresh.

#![allow(clippy::type_complexity)]

use std::sync::{Mutex, MutexGuard};

pub mod calibration;
pub mod config;
pub mod credential;
pub mod error;
pub mod guard;
pub mod launcher;
pub mod notify;
pub mod poll;
pub mod refresh;
pub mod routines;
pub mod session;
pub mod task;

pub use crate::calibration::{
    default_target_points, CalibrationMachine, CalibrationPhase, CalibrationSample,
    CalibrationState, SurfaceRect, TargetPoint,
};
pub use crate::config::ClientConfig;
pub use crate::credential::{
    Credential, CredentialSnapshot, CredentialStore, SessionGrant, EXPIRY_SKEW,
};
pub use crate::error::{ClientError, ConfigError};
pub use crate::guard::{LeaveDecision, NavigationGuard};
pub use crate::launcher::TaskLauncher;
pub use crate::notify::{
    Notification, NotificationKind, NotificationSink, RecordingSink, TracingSink,
};
pub use crate::poll::{PollConfig, PollHandle, PollOutcome, PollScheduler, PollState, StatusSource};
pub use crate::refresh::{IdentityProvider, RefreshCoordinator};
pub use crate::routines::{NewRoutine, Routine, RoutineClient};
pub use crate::session::Session;
pub use crate::task::{Task, TaskId, TaskKind, TaskRequest, TaskStatus};

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
