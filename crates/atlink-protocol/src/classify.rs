//! Classification of received lines into responses and events.
//!
//! A line is either part of the reply to the command currently in flight or
//! an unsolicited event (`RING`, `+CREG: 1`, ...). The protocol gives no
//! reliable way to tell them apart, so the choice is a heuristic supplied as
//! a strategy. An event that is really the awaited answer to a command is
//! resolved later by event correlation, never here.

use serde::{Deserialize, Serialize};

use crate::line::Line;

/// Prefix conventionally used by unsolicited result codes.
pub const DEFAULT_EVENT_PREFIX: &str = "+";

/// Destination of a classified line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Reply to the command in flight.
    Response,
    /// Unsolicited event.
    Event,
}

/// Strategy deciding the [`Route`] of each line.
pub trait Classifier: Send {
    /// Classify a freshly framed line.
    fn classify(&self, line: &Line) -> Route;
}

impl<F> Classifier for F
where
    F: Fn(&Line) -> Route + Send,
{
    fn classify(&self, line: &Line) -> Route {
        self(line)
    }
}

/// Routes every line to the responses queue. Events never occur.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllResponses;

impl Classifier for AllResponses {
    fn classify(&self, _line: &Line) -> Route {
        Route::Response
    }
}

/// Routes lines starting with a prefix to the events queue.
#[derive(Debug, Clone)]
pub struct PrefixClassifier {
    prefix: String,
}

impl PrefixClassifier {
    /// Create a classifier for the given event prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        PrefixClassifier {
            prefix: prefix.into(),
        }
    }

    /// Get the event prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for PrefixClassifier {
    fn default() -> Self {
        PrefixClassifier::new(DEFAULT_EVENT_PREFIX)
    }
}

impl Classifier for PrefixClassifier {
    fn classify(&self, line: &Line) -> Route {
        if line.starts_with(&self.prefix) {
            Route::Event
        } else {
            Route::Response
        }
    }
}

/// Classification expressed as configuration data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// See [`AllResponses`].
    AllResponses,
    /// See [`PrefixClassifier`].
    Prefix(String),
}

impl Default for Classification {
    fn default() -> Self {
        Classification::Prefix(DEFAULT_EVENT_PREFIX.to_string())
    }
}

impl Classification {
    /// Build the classifier this configuration describes.
    pub fn build(&self) -> Box<dyn Classifier> {
        match self {
            Classification::AllResponses => Box::new(AllResponses),
            Classification::Prefix(prefix) => Box::new(PrefixClassifier::new(prefix.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_responses() {
        let classifier = AllResponses;
        assert_eq!(classifier.classify(&Line::from("+CSQ: 1,2")), Route::Response);
        assert_eq!(classifier.classify(&Line::from("OK")), Route::Response);
    }

    #[test]
    fn test_prefix_classifier() {
        let classifier = PrefixClassifier::default();
        assert_eq!(classifier.classify(&Line::from("+CREG: 1")), Route::Event);
        assert_eq!(classifier.classify(&Line::from("OK")), Route::Response);
        assert_eq!(classifier.classify(&Line::from("AT+CSQ")), Route::Response);
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |line: &Line| {
            if line.as_str() == "RING" {
                Route::Event
            } else {
                Route::Response
            }
        };
        assert_eq!(classifier.classify(&Line::from("RING")), Route::Event);
        assert_eq!(classifier.classify(&Line::from("OK")), Route::Response);
    }

    #[test]
    fn test_classification_build() {
        let classifier = Classification::Prefix("^".to_string()).build();
        assert_eq!(classifier.classify(&Line::from("^SYSSTART")), Route::Event);
        assert_eq!(classifier.classify(&Line::from("+CSQ: 1")), Route::Response);

        let classifier = Classification::AllResponses.build();
        assert_eq!(classifier.classify(&Line::from("+CSQ: 1")), Route::Response);
    }
}
