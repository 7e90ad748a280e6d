//! Metric names and descriptions.
//!
//! The engine records through the `metrics` facade and never installs a
//! recorder; without one every call is a no-op. Call [`describe_metrics`]
//! once after installing an exporter to attach units and help text.

use std::time::Duration;

use metrics::{describe_counter, describe_histogram, Unit};

/// Commands written to the transport.
pub const COMMANDS_SENT: &str = "atlink.commands.sent";

/// Finished commands, labelled by `result`.
pub const COMMAND_RESULTS: &str = "atlink.commands.results";

/// Time from write to terminal line (or failure).
pub const COMMAND_LATENCY: &str = "atlink.commands.latency";

/// Received lines, labelled by `route`.
pub const LINES_ROUTED: &str = "atlink.lines.routed";

/// Received lines dropped because they could not be decoded.
pub const LINES_DROPPED: &str = "atlink.lines.dropped";

/// Events answered by correlation instead of the event handler.
pub const EVENTS_CORRELATED: &str = "atlink.events.correlated";

/// Event handler errors and panics.
pub const HANDLER_FAULTS: &str = "atlink.events.handler_faults";

/// Register descriptions for all engine metrics.
pub fn describe_metrics() {
    describe_counter!(COMMANDS_SENT, Unit::Count, "Commands written to the transport");
    describe_counter!(COMMAND_RESULTS, Unit::Count, "Finished commands by result");
    describe_histogram!(COMMAND_LATENCY, Unit::Seconds, "Time from write to reply");
    describe_counter!(LINES_ROUTED, Unit::Count, "Received lines by route");
    describe_counter!(LINES_DROPPED, Unit::Count, "Received lines that failed decoding");
    describe_counter!(EVENTS_CORRELATED, Unit::Count, "Events that answered a pending command");
    describe_counter!(HANDLER_FAULTS, Unit::Count, "Event handler errors and panics");
}

pub(crate) fn record_result(result: &'static str, elapsed: Duration) {
    metrics::counter!(COMMAND_RESULTS, "result" => result).increment(1);
    metrics::histogram!(COMMAND_LATENCY).record(elapsed.as_secs_f64());
}
