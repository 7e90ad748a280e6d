//! Command requests and the reply collection state.

use std::time::Duration;

use atlink_protocol::{Line, MatchMode, OK};
use tracing::trace;

use crate::config::{EngineConfig, TimeoutPolicy};
use crate::error::CommandError;

/// A command to send to the device and how to recognize the end of its reply.
///
/// Settings left unset fall back to the engine's [`EngineConfig`].
///
/// ```rust
/// use std::time::Duration;
/// use atlink_engine::Command;
/// use atlink_protocol::MatchMode;
///
/// let cmd = Command::new("AT+CCID")
///     .terminal("+CCID:")
///     .match_mode(MatchMode::Prefix)
///     .timeout(Duration::from_secs(1));
/// assert_eq!(cmd.text(), "AT+CCID");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    text: String,
    terminals: Vec<String>,
    failures: Option<Vec<String>>,
    match_mode: Option<MatchMode>,
    timeout: Option<Duration>,
    timeout_policy: Option<TimeoutPolicy>,
}

impl Command {
    /// Create a command that completes on `OK`.
    pub fn new(text: impl Into<String>) -> Self {
        Command {
            text: text.into(),
            terminals: vec![OK.to_string()],
            failures: None,
            match_mode: None,
            timeout: None,
            timeout_policy: None,
        }
    }

    /// Complete on this token instead of `OK`.
    pub fn terminal(mut self, token: impl Into<String>) -> Self {
        self.terminals = vec![token.into()];
        self
    }

    /// Complete on any of these tokens. The [`Reply`] reports which one matched.
    pub fn terminals<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terminals = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Fail on this token, in addition to any failure tokens set before.
    ///
    /// Once set, the configured failure tokens are no longer used.
    pub fn failure(mut self, token: impl Into<String>) -> Self {
        self.failures.get_or_insert_with(Vec::new).push(token.into());
        self
    }

    /// Ignore the configured failure tokens for this command.
    pub fn no_failures(mut self) -> Self {
        self.failures = Some(Vec::new());
        self
    }

    /// Compare lines with tokens using this mode.
    pub fn match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = Some(mode);
        self
    }

    /// Wait at most this long for the terminal line.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Spend the timeout according to this policy.
    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = Some(policy);
        self
    }

    /// Get the command text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Get the terminal tokens.
    pub fn terminal_tokens(&self) -> &[String] {
        &self.terminals
    }

    /// Get the timeout, falling back to the configured default.
    pub fn effective_timeout(&self, config: &EngineConfig) -> Duration {
        self.timeout.unwrap_or_else(|| config.command_timeout())
    }

    /// Get the timeout policy, falling back to the configured default.
    pub fn effective_timeout_policy(&self, config: &EngineConfig) -> TimeoutPolicy {
        self.timeout_policy.unwrap_or(config.timeout_policy)
    }
}

/// The reply to a completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Lines received before the terminal line.
    pub lines: Vec<Line>,
    /// The terminal line itself.
    pub terminal: Line,
    /// Index of the terminal token that matched.
    pub matched: usize,
}

impl Reply {
    /// Discard the terminal line and keep the collected lines.
    pub fn into_lines(self) -> Vec<Line> {
        self.lines
    }
}

/// Outcome of feeding one response line to a [`PendingCommand`].
#[derive(Debug)]
pub(crate) enum Progress {
    /// More lines are needed.
    Continue,
    /// A terminal token matched.
    Complete(Reply),
    /// A failure token matched.
    Failed(CommandError),
}

/// The command in flight and the lines collected for it so far.
#[derive(Debug)]
pub(crate) struct PendingCommand<'a> {
    text: &'a str,
    terminals: &'a [String],
    failures: &'a [String],
    mode: MatchMode,
    skip_echo: bool,
    lines: Vec<Line>,
}

impl<'a> PendingCommand<'a> {
    pub(crate) fn new(command: &'a Command, config: &'a EngineConfig) -> Self {
        PendingCommand {
            text: &command.text,
            terminals: &command.terminals,
            failures: command.failures.as_deref().unwrap_or(&config.failure_tokens),
            mode: command.match_mode.unwrap_or(config.match_mode),
            skip_echo: config.skip_echo,
            lines: Vec::new(),
        }
    }

    /// Feed the next response line.
    pub(crate) fn accept(&mut self, line: Line) -> Progress {
        if self.skip_echo && line == *self.text {
            trace!("skipping echo of {:?}", self.text);
            return Progress::Continue;
        }

        if let Some(matched) = self.mode.find(&line, self.terminals) {
            return Progress::Complete(Reply {
                lines: std::mem::take(&mut self.lines),
                terminal: line,
                matched,
            });
        }

        if self.mode.find(&line, self.failures).is_some() {
            return Progress::Failed(CommandError::Rejected {
                command: self.text.to_string(),
                line,
                lines: std::mem::take(&mut self.lines),
            });
        }

        self.lines.push(line);
        Progress::Continue
    }

    /// Get the lines collected so far.
    pub(crate) fn lines(&self) -> &[Line] {
        &self.lines
    }
}
