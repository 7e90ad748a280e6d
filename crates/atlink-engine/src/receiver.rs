//! The stream-reading side of the engine.
//!
//! Bytes from the transport enter through [`StreamReceiver::feed`]. The
//! receiver frames them into lines, classifies each line and pushes it onto
//! the responses or events queue. It never waits for a consumer, so a slow
//! event handler cannot stall the stream.

use std::io::{self, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use atlink_protocol::{Classifier, Line, LineFramer, Route};
use crossbeam_channel::Sender;
use tracing::{debug, trace, warn};

use crate::engine::Shared;
use crate::error::BuildError;
use crate::metric_defs;

/// Item carried by the engine's queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Delivery<T> {
    /// A queued item.
    Item(T),
    /// Pushed by `stop()` to wake a blocked consumer.
    Shutdown,
}

/// Frames, classifies and routes received bytes.
///
/// There is exactly one receiver per engine, and it owns the partial-line
/// buffer. Either call [`feed`](StreamReceiver::feed) from your own read loop
/// or hand a reader to [`spawn`](StreamReceiver::spawn).
pub struct StreamReceiver {
    framer: LineFramer,
    classifier: Box<dyn Classifier>,
    responses: Sender<Delivery<Line>>,
    events: Sender<Delivery<Line>>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for StreamReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReceiver").finish_non_exhaustive()
    }
}

impl StreamReceiver {
    pub(crate) fn new(
        framer: LineFramer,
        classifier: Box<dyn Classifier>,
        responses: Sender<Delivery<Line>>,
        events: Sender<Delivery<Line>>,
        shared: Arc<Shared>,
    ) -> Self {
        StreamReceiver {
            framer,
            classifier,
            responses,
            events,
            shared,
        }
    }

    /// Feed a chunk of received bytes. Returns the number of lines routed.
    pub fn feed(&mut self, chunk: &[u8]) -> usize {
        let dropped_before = self.framer.dropped_lines();
        self.framer.push(chunk);

        let mut routed = 0;
        while let Some(line) = self.framer.decode_line() {
            if self.route(line) {
                routed += 1;
            }
        }

        let dropped = self.framer.dropped_lines() - dropped_before;
        if dropped > 0 {
            metrics::counter!(metric_defs::LINES_DROPPED).increment(dropped);
        }
        routed
    }

    fn route(&mut self, line: Line) -> bool {
        if line.is_empty() && self.shared.config.skip_empty_lines {
            return false;
        }

        let route = self.classifier.classify(&line);
        trace!("<- {:?} ({:?})", line, route);

        let (queue, label) = match route {
            Route::Response => (&self.responses, "response"),
            Route::Event => (&self.events, "event"),
        };
        metrics::counter!(metric_defs::LINES_ROUTED, "route" => label).increment(1);

        // The engine keeps both receivers alive, so this cannot fail.
        let _ = queue.send(Delivery::Item(line));
        true
    }

    /// Get the number of buffered bytes not yet terminated.
    pub fn buffered_len(&self) -> usize {
        self.framer.buffered_len()
    }

    /// Get the number of lines dropped by strict decoding.
    pub fn dropped_lines(&self) -> u64 {
        self.framer.dropped_lines()
    }

    /// Run the receiver on its own thread, reading from `reader`.
    ///
    /// The thread exits when the reader reports end of stream, fails with an
    /// I/O error, or returns after the engine was stopped. Read timeouts
    /// (`WouldBlock`/`TimedOut`, as serial ports report them) are retried.
    pub fn spawn<R>(self, reader: R) -> Result<ReaderHandle, BuildError>
    where
        R: Read + Send + 'static,
    {
        let thread = thread::Builder::new()
            .name("atlink-reader".to_string())
            .spawn(move || self.read_loop(reader))
            .map_err(|source| BuildError::Spawn {
                name: "reader",
                source,
            })?;
        Ok(ReaderHandle { thread })
    }

    fn read_loop<R: Read>(mut self, mut reader: R) {
        let mut read_buf = vec![0u8; self.shared.config.read_buffer_size];

        while self.shared.is_alive() {
            match reader.read(&mut read_buf) {
                Ok(0) => {
                    debug!("transport reached end of stream");
                    break;
                }
                Ok(n) => {
                    self.feed(&read_buf[..n]);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                    ) => {}
                Err(e) => {
                    warn!("transport read failed: {}", e);
                    break;
                }
            }
        }

        if self.framer.buffered_len() > 0 {
            debug!(
                "reader exiting with unterminated data: {:?}",
                self.framer.pending_text()
            );
        }
    }
}

/// Handle to a running reader thread.
pub struct ReaderHandle {
    thread: JoinHandle<()>,
}

impl ReaderHandle {
    /// Check if the reader thread has finished.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Join the reader thread, blocking until it exits.
    pub fn join(self) -> thread::Result<()> {
        self.thread.join()
    }
}
