//! Decoded lines.

use std::fmt;
use std::sync::Arc;

/// A decoded, terminator-stripped line received from the device.
///
/// Lines are immutable and cheap to clone; the text is shared.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Line(Arc<str>);

impl Line {
    /// Create a line from text.
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Line(text.into())
    }

    /// Get the line text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the line is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check whether the line starts with the given prefix.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Convert the line into an owned string.
    pub fn into_string(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Debug for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Line {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Line {
    fn from(text: String) -> Self {
        Line(text.into())
    }
}

impl From<&str> for Line {
    fn from(text: &str) -> Self {
        Line(text.into())
    }
}

impl PartialEq<str> for Line {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for Line {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}
