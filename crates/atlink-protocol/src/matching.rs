//! Matching of response lines against terminal tokens.

use serde::{Deserialize, Serialize};

use crate::line::Line;

/// Result code that ends a successful command.
pub const OK: &str = "OK";

/// Result code that ends a failed command.
pub const ERROR: &str = "ERROR";

/// How a line is compared with a terminal token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// The line equals the token.
    #[default]
    Exact,
    /// The line starts with the token.
    Prefix,
    /// The line contains the token.
    Contains,
}

impl MatchMode {
    /// Check whether a line matches a token.
    pub fn matches(&self, line: &str, token: &str) -> bool {
        match self {
            MatchMode::Exact => line == token,
            MatchMode::Prefix => line.starts_with(token),
            MatchMode::Contains => line.contains(token),
        }
    }

    /// Find the first token in `tokens` matched by `line`.
    pub fn find<S: AsRef<str>>(&self, line: &Line, tokens: &[S]) -> Option<usize> {
        tokens
            .iter()
            .position(|token| self.matches(line.as_str(), token.as_ref()))
    }
}
