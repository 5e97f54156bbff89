//! Control protocol for a running batch: pause, resume or cancel a task by name.
//!
//! One command per line, `"<verb> <name>"`. `mdm run` listens on a Unix
//! socket and applies each command to its coordinator; `mdm pause <name>`
//! and friends are the clients.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::batch::BatchCoordinator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Pause(String),
    Resume(String),
    Cancel(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlParseError {
    #[error("empty control line")]
    Empty,
    #[error("unknown control verb {0:?}")]
    UnknownVerb(String),
    #[error("control verb {0:?} needs a task name")]
    MissingName(String),
}

impl ControlCommand {
    /// Parses one protocol line. The name is everything after the verb, trimmed.
    pub fn parse(line: &str) -> Result<Self, ControlParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ControlParseError::Empty);
        }
        let (verb, name) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let ctor: fn(String) -> Self = match verb {
            "pause" => ControlCommand::Pause,
            "resume" => ControlCommand::Resume,
            "cancel" => ControlCommand::Cancel,
            other => return Err(ControlParseError::UnknownVerb(other.to_string())),
        };
        if name.is_empty() {
            return Err(ControlParseError::MissingName(verb.to_string()));
        }
        Ok(ctor(name.to_string()))
    }

    pub fn verb(&self) -> &'static str {
        match self {
            ControlCommand::Pause(_) => "pause",
            ControlCommand::Resume(_) => "resume",
            ControlCommand::Cancel(_) => "cancel",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ControlCommand::Pause(n) | ControlCommand::Resume(n) | ControlCommand::Cancel(n) => n,
        }
    }

    /// Protocol line including the trailing newline.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }

    /// Applies the command. Returns whether a task was affected; unknown
    /// names are a no-op.
    pub fn apply(&self, coordinator: &BatchCoordinator) -> bool {
        match self {
            ControlCommand::Pause(name) => coordinator.pause(name),
            ControlCommand::Resume(name) => coordinator.resume(name),
            ControlCommand::Cancel(name) => coordinator.cancel(name),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verb(), self.name())
    }
}

/// Default path for the control socket (XDG state dir).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("mdm")
        .map_err(std::io::Error::other)?
        .get_state_home();
    Ok(dir.join("control.sock"))
}
