use std::sync::Arc;

use crate::launcher::TaskLauncher;
use crate::task::TaskKind;

/// Whether the user may leave without confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveDecision {
    Allow,
    Confirm { message: String },
}

impl LeaveDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Warns before leaving while a task is pending or in progress.
#[derive(Debug, Clone)]
pub struct NavigationGuard {
    launcher: Arc<TaskLauncher>,
}

impl NavigationGuard {
    pub fn new(launcher: Arc<TaskLauncher>) -> Self {
        Self { launcher }
    }

    pub fn before_unload(&self) -> LeaveDecision {
        if !self.launcher.has_active_task() {
            return LeaveDecision::Allow;
        }

        let active = self.launcher.active_tasks();
        let message = match active.first() {
            Some(task) if task.kind == TaskKind::Record => format!(
                "Recording '{}' is still in progress. Leaving now will abandon it.",
                task.name
            ),
            Some(task) if task.kind == TaskKind::Playback => format!(
                "Playback of '{}' is still running. Leaving now will abandon it.",
                task.name
            ),
            _ => "A task is still in progress. Leaving now will abandon it.".to_string(),
        };
        LeaveDecision::Confirm { message }
    }
}
