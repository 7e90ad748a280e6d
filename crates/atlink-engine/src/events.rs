//! Event processing.
//!
//! Events are drained from their queue by a dedicated thread so that the
//! stream reader never waits on application code. Each event is first
//! offered to the [`EventCorrelator`]: if a command sent with
//! [`Engine::execute_awaiting_event`](crate::Engine::execute_awaiting_event)
//! is waiting and the event answers it, the event goes to that command.
//! Everything else goes to the [`EventHandler`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use atlink_protocol::Line;
use crossbeam_channel::Receiver;
use tracing::{debug, error, info, trace};

use crate::engine::Shared;
use crate::error::{BuildError, HandlerError};
use crate::metric_defs;
use crate::receiver::Delivery;

/// Handler for unsolicited events, run on the event thread.
///
/// Handlers should return promptly. Errors and panics are logged and the
/// next event is processed as usual.
pub trait EventHandler: Send + 'static {
    /// Handle one event line.
    fn on_event(&mut self, line: Line) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: FnMut(Line) -> Result<(), HandlerError> + Send + 'static,
{
    fn on_event(&mut self, line: Line) -> Result<(), HandlerError> {
        self(line)
    }
}

/// Default handler: logs every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEvents;

impl EventHandler for LogEvents {
    fn on_event(&mut self, line: Line) -> Result<(), HandlerError> {
        info!("event received: {}", line);
        Ok(())
    }
}

/// Decides whether an event answers the outstanding command.
///
/// Returns the answer value, or `None` if the event is unrelated.
pub trait EventCorrelator: Send + Sync + 'static {
    /// Match `event` against the `outstanding` command text.
    fn correlate(&self, outstanding: &str, event: &Line) -> Option<String>;
}

impl<F> EventCorrelator for F
where
    F: Fn(&str, &Line) -> Option<String> + Send + Sync + 'static,
{
    fn correlate(&self, outstanding: &str, event: &Line) -> Option<String> {
        self(outstanding, event)
    }
}

/// Correlates `AT+XYZ` style commands with `+XYZ: value` events.
///
/// The event prefix is the command without its leading `AT` and without any
/// `?` query or `=` arguments: `AT+CSQ`, `AT+CPIN?` and `AT+TCPSETUP=1,host`
/// are answered by `+CSQ`, `+CPIN` and `+TCPSETUP` lines. The answer is the
/// text after the prefix and its `:` separator, trimmed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixCorrelator;

impl PrefixCorrelator {
    /// Derive the event prefix answering `command`.
    pub fn event_prefix(command: &str) -> Option<&str> {
        let command = command.trim();
        let body = command
            .get(..2)
            .filter(|at| at.eq_ignore_ascii_case("AT"))
            .map(|_| &command[2..])?;

        // Only extended commands (`+CSQ`, `^SYSINFO`) answer with events.
        if !body.starts_with(|c: char| c.is_ascii_punctuation()) {
            return None;
        }

        let end = body.find(['?', '=']).unwrap_or(body.len());
        let prefix = &body[..end];
        (prefix.len() > 1).then_some(prefix)
    }
}

impl EventCorrelator for PrefixCorrelator {
    fn correlate(&self, outstanding: &str, event: &Line) -> Option<String> {
        let prefix = Self::event_prefix(outstanding)?;
        let rest = event.as_str().strip_prefix(prefix)?;
        if !rest.is_empty() && !rest.starts_with(':') {
            // `+CSQN` does not answer `AT+CSQ`.
            return None;
        }
        Some(rest.trim_start_matches(':').trim().to_string())
    }
}

/// The loop draining the events queue.
pub(crate) struct EventProcessor {
    shared: Arc<Shared>,
    events: Receiver<Delivery<Line>>,
    handler: Box<dyn EventHandler>,
    correlator: Box<dyn EventCorrelator>,
}

impl EventProcessor {
    pub(crate) fn new(
        shared: Arc<Shared>,
        events: Receiver<Delivery<Line>>,
        handler: Box<dyn EventHandler>,
        correlator: Box<dyn EventCorrelator>,
    ) -> Self {
        EventProcessor {
            shared,
            events,
            handler,
            correlator,
        }
    }

    pub(crate) fn spawn(self) -> Result<JoinHandle<()>, BuildError> {
        thread::Builder::new()
            .name("atlink-event".to_string())
            .spawn(move || self.run())
            .map_err(|source| BuildError::Spawn {
                name: "event",
                source,
            })
    }

    fn run(mut self) {
        while self.shared.is_alive() {
            match self.events.recv() {
                Ok(Delivery::Item(line)) => self.dispatch(line),
                // The liveness flag is already cleared; the loop exits.
                Ok(Delivery::Shutdown) => {}
                Err(_) => break,
            }
        }
        debug!("event processor stopped");
    }

    fn dispatch(&mut self, line: Line) {
        let correlator = &*self.correlator;
        let shared = &*self.shared;
        let answered = panic::catch_unwind(AssertUnwindSafe(|| shared.answer(&line, correlator)));
        match answered {
            Ok(true) => {
                metrics::counter!(metric_defs::EVENTS_CORRELATED).increment(1);
                return;
            }
            Ok(false) => {}
            Err(payload) => {
                error!("event correlator panicked on {:?}: {}", line, panic_message(&*payload));
            }
        }

        trace!("dispatching event {:?}", line);
        let handler = &mut self.handler;
        let description = format!("{:?}", line);
        match panic::catch_unwind(AssertUnwindSafe(|| handler.on_event(line))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                metrics::counter!(metric_defs::HANDLER_FAULTS).increment(1);
                error!("event handler failed on {}: {}", description, e);
            }
            Err(payload) => {
                metrics::counter!(metric_defs::HANDLER_FAULTS).increment(1);
                error!(
                    "event handler panicked on {}: {}",
                    description,
                    panic_message(&*payload)
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_prefix() {
        assert_eq!(PrefixCorrelator::event_prefix("AT+CSQ"), Some("+CSQ"));
        assert_eq!(PrefixCorrelator::event_prefix("AT+CPIN?"), Some("+CPIN"));
        assert_eq!(
            PrefixCorrelator::event_prefix("AT+TCPSETUP=1,59.110.215.205,9900"),
            Some("+TCPSETUP")
        );
        assert_eq!(PrefixCorrelator::event_prefix("at^SYSINFO"), Some("^SYSINFO"));
        assert_eq!(PrefixCorrelator::event_prefix("ATE0"), None);
        assert_eq!(PrefixCorrelator::event_prefix("AT"), None);
        assert_eq!(PrefixCorrelator::event_prefix("AT+"), None);
        assert_eq!(PrefixCorrelator::event_prefix("+CSQ"), None);
    }

    #[test]
    fn test_prefix_correlator() {
        let correlator = PrefixCorrelator;
        assert_eq!(
            correlator.correlate("AT+CSQ", &Line::from("+CSQ: 20,99")),
            Some("20,99".to_string())
        );
        assert_eq!(
            correlator.correlate("AT+CGATT?", &Line::from("+CGATT:1")),
            Some("1".to_string())
        );
        assert_eq!(
            correlator.correlate("AT+TCPCLOSE=1", &Line::from("+TCPCLOSE")),
            Some(String::new())
        );
        assert_eq!(correlator.correlate("AT+CSQ", &Line::from("+CSQN: 1")), None);
        assert_eq!(correlator.correlate("AT+CSQ", &Line::from("+CREG: 0,1")), None);
    }

    #[test]
    fn test_closure_correlator() {
        let correlator = |outstanding: &str, event: &Line| {
            (outstanding == "AT+JRBD" && event.starts_with("+RRBDRES"))
                .then(|| event.as_str()[9..].to_string())
        };
        assert_eq!(
            correlator.correlate("AT+JRBD", &Line::from("+RRBDRES:0123456789AB")),
            Some("0123456789AB".to_string())
        );
        assert_eq!(correlator.correlate("AT", &Line::from("+RRBDRES:0")), None);
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom");
        let payload = panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(&*payload), "code 7");
    }
}
