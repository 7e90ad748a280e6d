//! Error types for the command engine.

use std::io;
use std::time::Duration;

use atlink_protocol::{Line, ProtocolError};
use thiserror::Error;

use crate::config::ConfigError;

/// Error returned by an event handler. Logged, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that end a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No terminal line arrived within the timeout.
    #[error("command timeout ({command:?}) after {elapsed:?}")]
    Timeout {
        /// The command text.
        command: String,
        /// Time spent waiting.
        elapsed: Duration,
    },

    /// The engine was stopped while the command was pending.
    #[error("command aborted by engine shutdown ({command:?})")]
    Aborted {
        /// The command text.
        command: String,
    },

    /// The device answered with a failure token.
    #[error("command rejected ({command:?}): {line}")]
    Rejected {
        /// The command text.
        command: String,
        /// The failure line.
        line: Line,
        /// Lines collected before the failure line.
        lines: Vec<Line>,
    },

    /// The command text cannot be sent as a single line.
    #[error("invalid command {command:?}: {reason}")]
    InvalidCommand {
        /// The command text.
        command: String,
        /// Why the command was refused.
        reason: &'static str,
    },

    /// The command text cannot be encoded.
    #[error("cannot encode command {command:?}: {source}")]
    Encode {
        /// The command text.
        command: String,
        /// The encoding failure.
        #[source]
        source: ProtocolError,
    },

    /// Writing to the transport failed.
    #[error("transport write failed for {command:?}: {source}")]
    Transport {
        /// The command text.
        command: String,
        /// The I/O failure.
        #[source]
        source: io::Error,
    },
}

impl CommandError {
    /// Get the command text the error refers to.
    pub fn command(&self) -> &str {
        match self {
            CommandError::Timeout { command, .. }
            | CommandError::Aborted { command }
            | CommandError::Rejected { command, .. }
            | CommandError::InvalidCommand { command, .. }
            | CommandError::Encode { command, .. }
            | CommandError::Transport { command, .. } => command,
        }
    }

    /// Check whether this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::Timeout { .. })
    }

    /// Check whether the engine was stopped.
    pub fn is_aborted(&self) -> bool {
        matches!(self, CommandError::Aborted { .. })
    }

    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            CommandError::Timeout { .. } => "timeout",
            CommandError::Aborted { .. } => "aborted",
            CommandError::Rejected { .. } => "rejected",
            CommandError::InvalidCommand { .. } => "invalid",
            CommandError::Encode { .. } => "encode",
            CommandError::Transport { .. } => "transport",
        }
    }
}

/// Result type alias for command operations.
pub type CommandResult<T> = Result<T, CommandError>;

/// Errors that prevent an engine from starting.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A worker thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name.
        name: &'static str,
        /// The spawn failure.
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_accessor_and_labels() {
        let err = CommandError::Timeout {
            command: "AT+CSQ".to_string(),
            elapsed: Duration::from_millis(10),
        };
        assert_eq!(err.command(), "AT+CSQ");
        assert!(err.is_timeout());
        assert!(!err.is_aborted());
        assert_eq!(err.label(), "timeout");

        let err = CommandError::Aborted {
            command: "AT".to_string(),
        };
        assert!(err.is_aborted());
        assert_eq!(err.to_string(), "command aborted by engine shutdown (\"AT\")");
    }

    #[test]
    fn test_rejected_display() {
        let err = CommandError::Rejected {
            command: "AT+CPIN?".to_string(),
            line: Line::from("+CME ERROR: 10"),
            lines: Vec::new(),
        };
        assert_eq!(err.to_string(), "command rejected (\"AT+CPIN?\"): +CME ERROR: 10");
    }
}
