use routine_pilot::{
    CalibrationMachine, CalibrationState, ClientError, LeaveDecision, Session, SurfaceRect,
};

use crate::commands::{parse_slash_command, SlashCommand, HELP_LINES};

/// Surface that `/sample` coordinates are measured against.
pub const CLI_SURFACE: SurfaceRect = SurfaceRect {
    left: 0.0,
    top: 0.0,
    width: 1280.0,
    height: 720.0,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptAction {
    Warn(String),
    Exit,
}

pub struct App {
    session: Session,
    calibration: Option<CalibrationMachine>,
    interrupt_armed: bool,
    pub should_exit: bool,
}

impl App {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            calibration: None,
            interrupt_armed: false,
            should_exit: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Ctrl-C: exits right away when idle; otherwise the first press warns and
    /// a second one exits.
    pub fn on_interrupt(&mut self) -> InterruptAction {
        match self.session.navigation_guard().before_unload() {
            LeaveDecision::Allow => InterruptAction::Exit,
            LeaveDecision::Confirm { .. } if self.interrupt_armed => InterruptAction::Exit,
            LeaveDecision::Confirm { message } => {
                self.interrupt_armed = true;
                InterruptAction::Warn(format!("{message} Press Ctrl-C again to quit."))
            }
        }
    }

    pub async fn handle_line(&mut self, line: &str) -> Vec<String> {
        self.interrupt_armed = false;
        let Some(command) = parse_slash_command(line) else {
            if line.trim().is_empty() {
                return Vec::new();
            }
            return vec!["Type /help for commands.".to_string()];
        };

        match self.handle_command(command).await {
            Ok(lines) => lines,
            Err(error) => vec![format!("error: {error}")],
        }
    }

    async fn handle_command(&mut self, command: SlashCommand) -> Result<Vec<String>, ClientError> {
        let lines = match command {
            SlashCommand::Help => HELP_LINES.iter().map(|line| line.to_string()).collect(),
            SlashCommand::Login { username, password } => {
                self.session.login(&username, &password).await?;
                vec![format!("Signed in as {username}.")]
            }
            SlashCommand::Logout => self.logout().await,
            SlashCommand::Record {
                routine,
                tokens_per_run,
            } => {
                let (task, _poll) = self.session.record(&routine, tokens_per_run).await?;
                vec![format!("Recording '{}' started (task {}).", task.name, task.id)]
            }
            SlashCommand::Play { routine } => {
                let (task, _poll) = self.session.play(&routine).await?;
                vec![format!("Playback of '{}' started (task {}).", task.name, task.id)]
            }
            SlashCommand::Cancel { task_id } => self.cancel(task_id).await?,
            SlashCommand::Status => self.status(),
            SlashCommand::Routines => {
                let routines = self.session.routines().list().await?;
                if routines.is_empty() {
                    vec!["No routines saved.".to_string()]
                } else {
                    routines
                        .iter()
                        .map(|routine| format!("#{} {}", routine.id, routine.name))
                        .collect()
                }
            }
            SlashCommand::Calibrate => {
                let machine = self.session.calibration();
                let lines = vec![calibration_prompt(&machine)];
                self.calibration = Some(machine);
                lines
            }
            SlashCommand::Sample { x, y } => self.sample(&x, &y)?,
            SlashCommand::Submit => self.submit().await?,
            SlashCommand::Quit => {
                self.should_exit = true;
                Vec::new()
            }
            SlashCommand::Usage(usage) => vec![format!("usage: {usage}")],
            SlashCommand::Unknown(command) => vec![format!("Unknown command {command}.")],
        };
        Ok(lines)
    }

    /// Cancels running tasks on the backend before the credential goes away.
    async fn logout(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        for task in self.session.launcher().active_tasks() {
            match self.session.cancel(&task.id).await {
                Ok(()) => lines.push(format!("Cancelled task {}.", task.id)),
                Err(error) => lines.push(format!(
                    "warning: task {} may still be running: {error}",
                    task.id
                )),
            }
        }
        self.session.teardown();
        self.calibration = None;
        self.session.logout().await;
        lines.push("Signed out.".to_string());
        lines
    }

    async fn cancel(&mut self, task_id: Option<String>) -> Result<Vec<String>, ClientError> {
        let targets: Vec<String> = match task_id {
            Some(task_id) => vec![task_id],
            None => self
                .session
                .launcher()
                .active_tasks()
                .into_iter()
                .map(|task| task.id)
                .collect(),
        };
        if targets.is_empty() {
            return Ok(vec!["No active tasks.".to_string()]);
        }

        let mut lines = Vec::new();
        for task_id in targets {
            self.session.cancel(&task_id).await?;
            lines.push(format!("Cancelled task {task_id}."));
        }
        Ok(lines)
    }

    fn status(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "signed in: {}",
            if self.session.is_authenticated() {
                "yes"
            } else {
                "no"
            }
        )];
        let tasks = self.session.launcher().active_tasks();
        if tasks.is_empty() {
            lines.push("no active tasks".to_string());
        }
        for task in tasks {
            lines.push(format!(
                "{} '{}' task {} {}",
                task.kind, task.name, task.id, task.status
            ));
        }
        if let Some(machine) = &self.calibration {
            lines.push(calibration_prompt(machine));
        }
        lines
    }

    fn sample(&mut self, x: &str, y: &str) -> Result<Vec<String>, ClientError> {
        let Some(machine) = self.calibration.as_mut() else {
            return Ok(vec!["Start calibration with /calibrate first.".to_string()]);
        };
        let (Ok(x), Ok(y)) = (x.parse::<f64>(), y.parse::<f64>()) else {
            return Err(ClientError::validation("sample coordinates must be numbers"));
        };

        machine.record_sample((x, y), &CLI_SURFACE)?;
        Ok(vec![calibration_prompt(machine)])
    }

    async fn submit(&mut self) -> Result<Vec<String>, ClientError> {
        let Some(machine) = self.calibration.as_mut() else {
            return Ok(vec!["Start calibration with /calibrate first.".to_string()]);
        };

        let state = machine.submit_phase().await?;
        let mut lines = Vec::new();
        if let Some(url) = machine.handoff_url() {
            lines.push(format!("Continue at {url}"));
        }
        lines.push(calibration_prompt(machine));
        if state == CalibrationState::Done {
            self.calibration = None;
        }
        Ok(lines)
    }
}

fn calibration_prompt(machine: &CalibrationMachine) -> String {
    let Some(phase) = machine.phase() else {
        return "Calibration complete.".to_string();
    };
    let collected = machine.samples().len();
    let total = machine.targets().len();
    match machine.current_target() {
        Some(target) => format!(
            "Calibration phase '{phase}' ({collected}/{total}): click {}",
            target.label
        ),
        None => format!("Calibration phase '{phase}' ({collected}/{total}): ready, /submit"),
    }
}
