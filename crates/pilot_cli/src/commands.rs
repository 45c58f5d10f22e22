#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Login { username: String, password: String },
    Logout,
    Record {
        routine: String,
        tokens_per_run: Option<u32>,
    },
    Play { routine: String },
    /// Cancels `task_id`, or every active task when absent.
    Cancel { task_id: Option<String> },
    Status,
    Routines,
    Calibrate,
    Sample { x: String, y: String },
    Submit,
    Quit,
    Usage(&'static str),
    Unknown(String),
}

pub const HELP_LINES: &[&str] = &[
    "/login <username> <password>  sign in",
    "/logout                       sign out",
    "/record <routine> [tokens]    record a routine",
    "/play <routine>               play a routine back",
    "/cancel [task id]             cancel a task (all active tasks by default)",
    "/status                       show session and task state",
    "/routines                     list saved routines",
    "/calibrate                    start pointer calibration",
    "/sample <x> <y>               record a calibration click on the 1280x720 surface",
    "/submit                       submit the current calibration phase",
    "/quit                         exit",
];

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut parts = trimmed.split_whitespace();
    let command = parts.next().unwrap_or(trimmed).to_string();
    let args: Vec<&str> = parts.collect();

    let parsed = match (command.as_str(), args.as_slice()) {
        ("/help", _) => SlashCommand::Help,
        ("/login", [username, password]) => SlashCommand::Login {
            username: (*username).to_string(),
            password: (*password).to_string(),
        },
        ("/login", _) => SlashCommand::Usage("/login <username> <password>"),
        ("/logout", _) => SlashCommand::Logout,
        ("/record", [routine]) => SlashCommand::Record {
            routine: (*routine).to_string(),
            tokens_per_run: None,
        },
        ("/record", [routine, tokens]) => match tokens.parse::<u32>() {
            Ok(tokens) => SlashCommand::Record {
                routine: (*routine).to_string(),
                tokens_per_run: Some(tokens),
            },
            Err(_) => SlashCommand::Usage("/record <routine> [tokens]"),
        },
        ("/record", _) => SlashCommand::Usage("/record <routine> [tokens]"),
        ("/play", [routine]) => SlashCommand::Play {
            routine: (*routine).to_string(),
        },
        ("/play", _) => SlashCommand::Usage("/play <routine>"),
        ("/cancel", []) => SlashCommand::Cancel { task_id: None },
        ("/cancel", [task_id]) => SlashCommand::Cancel {
            task_id: Some((*task_id).to_string()),
        },
        ("/cancel", _) => SlashCommand::Usage("/cancel [task id]"),
        ("/status", _) => SlashCommand::Status,
        ("/routines", _) => SlashCommand::Routines,
        ("/calibrate", _) => SlashCommand::Calibrate,
        ("/sample", [x, y]) => SlashCommand::Sample {
            x: (*x).to_string(),
            y: (*y).to_string(),
        },
        ("/sample", _) => SlashCommand::Usage("/sample <x> <y>"),
        ("/submit", _) => SlashCommand::Submit,
        ("/quit", _) => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}
