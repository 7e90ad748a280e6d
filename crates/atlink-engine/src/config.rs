//! Engine configuration.

use std::time::Duration;

use atlink_protocol::{Classification, MatchMode, TextCodec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default time to wait for a command's terminal line (milliseconds).
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;

/// Default size of the reader thread's read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// How the timeout budget of a command is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// One fixed deadline for the whole reply, measured from the write.
    #[default]
    Deadline,
    /// The deadline is pushed back every time a line is received.
    Inactivity,
}

/// Errors found while validating an [`EngineConfig`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The line terminator is empty.
    #[error("line terminator must not be empty")]
    EmptyTerminator,

    /// The command terminator is empty.
    #[error("command terminator must not be empty")]
    EmptyCommandTerminator,

    /// The default command timeout is zero.
    #[error("command timeout must be greater than zero")]
    ZeroTimeout,

    /// The read buffer size is zero.
    #[error("read buffer size must be greater than zero")]
    ZeroReadBuffer,

    /// A failure token is empty and would match every line.
    #[error("failure tokens must not be empty")]
    EmptyFailureToken,
}

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sequence terminating received lines.
    pub terminator: String,
    /// Sequence appended to written commands. Defaults to `terminator`.
    pub command_terminator: Option<String>,
    /// Encoding of line text in both directions.
    pub text: TextCodec,
    /// How received lines are split into responses and events.
    pub classification: Classification,
    /// Default time to wait for a terminal line (milliseconds).
    pub command_timeout_ms: u64,
    /// Default timeout policy for commands.
    pub timeout_policy: TimeoutPolicy,
    /// Default comparison of lines with terminal tokens.
    pub match_mode: MatchMode,
    /// Lines that end a command as rejected (for example `ERROR`).
    pub failure_tokens: Vec<String>,
    /// Discard response lines that echo the command text.
    pub skip_echo: bool,
    /// Discard empty lines before classification.
    pub skip_empty_lines: bool,
    /// Discard responses left over from a previous command before writing.
    pub flush_stale_responses: bool,
    /// Size of the reader thread's read buffer.
    pub read_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            terminator: "\r\n".to_string(),
            command_terminator: None,
            text: TextCodec::default(),
            classification: Classification::default(),
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            timeout_policy: TimeoutPolicy::default(),
            match_mode: MatchMode::default(),
            failure_tokens: Vec::new(),
            skip_echo: false,
            skip_empty_lines: true,
            flush_stale_responses: true,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl EngineConfig {
    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.terminator.is_empty() {
            return Err(ConfigError::EmptyTerminator);
        }
        if self.command_terminator.as_deref() == Some("") {
            return Err(ConfigError::EmptyCommandTerminator);
        }
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::ZeroReadBuffer);
        }
        if self.failure_tokens.iter().any(String::is_empty) {
            return Err(ConfigError::EmptyFailureToken);
        }
        Ok(())
    }

    /// Get the default command timeout.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Get the terminator of received lines.
    pub fn terminator_bytes(&self) -> &[u8] {
        self.terminator.as_bytes()
    }

    /// Get the terminator appended to written commands.
    pub fn command_terminator_bytes(&self) -> &[u8] {
        self.command_terminator
            .as_deref()
            .unwrap_or(&self.terminator)
            .as_bytes()
    }

    /// Treat `ERROR` as a failed command instead of an ordinary line.
    pub fn with_error_as_failure(mut self) -> Self {
        self.failure_tokens = vec![atlink_protocol::ERROR.to_string()];
        self
    }
}
