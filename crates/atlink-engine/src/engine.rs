//! The command engine.
//!
//! An [`Engine`] owns the transport's write side and serializes commands on
//! it: the command lock *is* the writer, so only the caller holding it can put
//! bytes on the wire. Replies are taken from the responses queue filled by
//! the [`StreamReceiver`], while events are handled by the event processor
//! thread.
//!
//! ## Lifecycle
//!
//! An engine starts running when it is built and stops exactly once, on
//! [`Engine::stop`] or when the last handle is dropped. Stopping wakes every
//! blocked party with a shutdown sentinel:
//!
//! - the event processor exits its loop and is joined
//! - a command waiting for its reply returns [`CommandError::Aborted`]
//! - a command waiting for an event answer returns [`CommandError::Aborted`]
//!
//! Commands issued after the stop fail with `Aborted` without touching the
//! transport.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use atlink_protocol::{Classifier, Line, LineFramer, TextCodec};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::command::{Command, PendingCommand, Progress, Reply};
use crate::config::{ConfigError, EngineConfig, TimeoutPolicy};
use crate::error::{BuildError, CommandError, CommandResult};
use crate::events::{EventCorrelator, EventHandler, EventProcessor, LogEvents, PrefixCorrelator};
use crate::metric_defs;
use crate::receiver::{Delivery, ReaderHandle, StreamReceiver};

/// The command waiting for an event answer.
struct Outstanding {
    command: String,
    answered: AtomicBool,
    /// Overrides the engine's correlator for this command.
    correlator: Option<Box<dyn EventCorrelator>>,
}

/// State shared by the engine handles, the receiver and the event processor.
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    alive: AtomicBool,
    /// The command lock.
    transport: Mutex<Box<dyn Write + Send>>,
    /// Set and cleared under the command lock, read by the event processor.
    outstanding: RwLock<Option<Outstanding>>,
    text: TextCodec,
    responses: Receiver<Delivery<Line>>,
    responses_tx: Sender<Delivery<Line>>,
    events_tx: Sender<Delivery<Line>>,
    answers: Receiver<Delivery<String>>,
    answers_tx: Sender<Delivery<String>>,
}

impl Shared {
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Offer an event to the outstanding command.
    ///
    /// Returns true if the event answered it. Only the first matching event
    /// is taken.
    pub(crate) fn answer(&self, event: &Line, correlator: &dyn EventCorrelator) -> bool {
        let outstanding = self.outstanding.read();
        let Some(outstanding) = outstanding.as_ref() else {
            return false;
        };
        if outstanding.answered.load(Ordering::SeqCst) {
            return false;
        }
        let correlator = outstanding.correlator.as_deref().unwrap_or(correlator);
        let Some(value) = correlator.correlate(&outstanding.command, event) else {
            return false;
        };
        if outstanding.answered.swap(true, Ordering::SeqCst) {
            return false;
        }

        trace!("event {:?} answers {:?}", event, outstanding.command);
        // The slot is drained before the command is written and holds a
        // single answer, so it has room.
        let _ = self.answers_tx.try_send(Delivery::Item(value));
        true
    }

    fn encode_command(&self, text: &str) -> CommandResult<Vec<u8>> {
        let terminator = self.config.command_terminator_bytes();
        let contains = |needle: &[u8]| {
            text.as_bytes()
                .windows(needle.len())
                .any(|window| window == needle)
        };
        if contains(terminator) || contains(self.config.terminator_bytes()) {
            return Err(CommandError::InvalidCommand {
                command: text.to_string(),
                reason: "command text contains the line terminator",
            });
        }

        let mut bytes = self.text.encode(text).map_err(|source| CommandError::Encode {
            command: text.to_string(),
            source,
        })?;
        bytes.extend_from_slice(terminator);
        Ok(bytes)
    }

    /// Discard responses left over from earlier commands.
    fn flush_stale(&self, command: &str) -> CommandResult<()> {
        if !self.config.flush_stale_responses {
            return Ok(());
        }
        loop {
            match self.responses.try_recv() {
                Ok(Delivery::Item(line)) => {
                    debug!("discarding stale response {:?} before {:?}", line, command);
                }
                Ok(Delivery::Shutdown) | Err(TryRecvError::Disconnected) => {
                    return Err(aborted(command));
                }
                Err(TryRecvError::Empty) => return Ok(()),
            }
        }
    }

    fn clear_answers(&self, command: &str) -> CommandResult<()> {
        loop {
            match self.answers.try_recv() {
                Ok(Delivery::Item(value)) => {
                    debug!("discarding stale event answer {:?} before {:?}", value, command);
                }
                Ok(Delivery::Shutdown) | Err(TryRecvError::Disconnected) => {
                    return Err(aborted(command));
                }
                Err(TryRecvError::Empty) => return Ok(()),
            }
        }
    }

    fn write(&self, transport: &mut dyn Write, command: &str, bytes: &[u8]) -> CommandResult<()> {
        transport
            .write_all(bytes)
            .and_then(|()| transport.flush())
            .map_err(|source| CommandError::Transport {
                command: command.to_string(),
                source,
            })?;
        metrics::counter!(metric_defs::COMMANDS_SENT).increment(1);
        Ok(())
    }

    /// Close the engine. Returns false if it was already stopped.
    fn shutdown(&self) -> bool {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return false;
        }
        // Receivers live in `self`, so these sends cannot fail.
        let _ = self.events_tx.send(Delivery::Shutdown);
        let _ = self.responses_tx.send(Delivery::Shutdown);

        // A stale answer would leave no room for the sentinel.
        while let Ok(Delivery::Item(value)) = self.answers.try_recv() {
            debug!("discarding event answer {:?} at shutdown", value);
        }
        let _ = self.answers_tx.try_send(Delivery::Shutdown);
        true
    }
}

/// Wait for the next response, forever if `deadline` is `None`.
fn recv_response(
    responses: &Receiver<Delivery<Line>>,
    deadline: Option<Instant>,
) -> Result<Delivery<Line>, RecvTimeoutError> {
    match deadline {
        Some(deadline) => responses.recv_deadline(deadline),
        None => responses.recv().map_err(|_| RecvTimeoutError::Disconnected),
    }
}

fn aborted(command: &str) -> CommandError {
    CommandError::Aborted {
        command: command.to_string(),
    }
}

/// Clears the outstanding command when the awaiting-event call returns.
struct OutstandingGuard<'a>(&'a Shared);

impl Drop for OutstandingGuard<'_> {
    fn drop(&mut self) {
        *self.0.outstanding.write() = None;
    }
}

/// Stops the engine when the last handle goes away.
struct Lifecycle {
    shared: Arc<Shared>,
    event_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Lifecycle {
    fn stop(&self) {
        if self.shared.shutdown() {
            info!("engine stopped");
        }

        let Some(handle) = self.event_thread.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Stopped from inside the event handler; the loop exits when the
            // handler returns.
            return;
        }
        if handle.join().is_err() {
            error!("event processor thread panicked");
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle to a running command engine.
///
/// Handles are cheap to clone and can be shared between threads. Any number
/// of threads may issue commands; they are executed one at a time.
///
/// The engine stops when the last handle is dropped. An event handler that
/// keeps a strong handle keeps the engine alive until [`Engine::stop`] is
/// called; give handlers a [`WeakEngine`] from [`Engine::downgrade`] instead.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
    lifecycle: Arc<Lifecycle>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.is_running())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Engine {
    /// Check if the engine has not been stopped.
    pub fn is_running(&self) -> bool {
        self.shared.is_alive()
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Create a handle that does not keep the engine running.
    pub fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            shared: Arc::downgrade(&self.shared),
            lifecycle: Arc::downgrade(&self.lifecycle),
        }
    }

    /// Send `text` and collect response lines until one matches `terminal`.
    ///
    /// Lines are compared with the configured [`MatchMode`](crate::MatchMode),
    /// exact by default. Returns the lines received before the terminal line.
    /// Fails with [`CommandError::Timeout`] if the terminal line does not
    /// arrive within `timeout`.
    pub fn execute(&self, text: &str, terminal: &str, timeout: Duration) -> CommandResult<Vec<Line>> {
        let command = Command::new(text).terminal(terminal).timeout(timeout);
        self.run(&command).map(Reply::into_lines)
    }

    /// Send a command and wait for its reply.
    pub fn run(&self, command: &Command) -> CommandResult<Reply> {
        let config = &self.shared.config;
        let text = command.text();

        let mut transport = self.shared.transport.lock();
        if !self.shared.is_alive() {
            return Err(aborted(text));
        }
        let bytes = self.shared.encode_command(text)?;
        self.shared.flush_stale(text)?;

        let timeout = command.effective_timeout(config);
        let policy = command.effective_timeout_policy(config);
        let started = Instant::now();

        debug!("-> {:?}", text);
        if let Err(e) = self.shared.write(&mut **transport, text, &bytes) {
            return finish(text, started, Err(e));
        }

        let mut pending = PendingCommand::new(command, config);
        // A timeout too large for an `Instant` waits indefinitely.
        let mut deadline = started.checked_add(timeout);
        let result = loop {
            match recv_response(&self.shared.responses, deadline) {
                Ok(Delivery::Item(line)) => {
                    trace!("{:?} <- {:?}", text, line);
                    if policy == TimeoutPolicy::Inactivity {
                        deadline = Instant::now().checked_add(timeout);
                    }
                    match pending.accept(line) {
                        Progress::Continue => {}
                        Progress::Complete(reply) => break Ok(reply),
                        Progress::Failed(e) => break Err(e),
                    }
                }
                Ok(Delivery::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    break Err(aborted(text));
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !self.shared.is_alive() {
                        break Err(aborted(text));
                    }
                    debug!("{:?} timed out with partial reply {:?}", text, pending.lines());
                    break Err(CommandError::Timeout {
                        command: text.to_string(),
                        elapsed: started.elapsed(),
                    });
                }
            }
        };
        drop(transport);

        finish(text, started, result)
    }

    /// Send `text` and wait for the event that answers it.
    ///
    /// For devices whose reply to a command is an unsolicited-looking line:
    /// `AT+CSQ` is answered by `+CSQ: 20,99`. The event is matched by the
    /// engine's [`EventCorrelator`] and its value returned; it is not passed
    /// to the event handler. Plain response lines (such as a trailing `OK`)
    /// stay in the responses queue and are flushed before the next command.
    pub fn execute_awaiting_event(&self, text: &str, timeout: Duration) -> CommandResult<String> {
        self.await_event(text, timeout, None)
    }

    /// Like [`execute_awaiting_event`](Engine::execute_awaiting_event), but
    /// match the answering event with `correlator` instead of the engine's.
    pub fn execute_awaiting_event_with(
        &self,
        text: &str,
        timeout: Duration,
        correlator: impl EventCorrelator,
    ) -> CommandResult<String> {
        self.await_event(text, timeout, Some(Box::new(correlator)))
    }

    fn await_event(
        &self,
        text: &str,
        timeout: Duration,
        correlator: Option<Box<dyn EventCorrelator>>,
    ) -> CommandResult<String> {
        let shared = &*self.shared;

        let mut transport = shared.transport.lock();
        if !shared.is_alive() {
            return Err(aborted(text));
        }
        let bytes = shared.encode_command(text)?;
        shared.flush_stale(text)?;
        shared.clear_answers(text)?;

        *shared.outstanding.write() = Some(Outstanding {
            command: text.to_string(),
            answered: AtomicBool::new(false),
            correlator,
        });
        let guard = OutstandingGuard(shared);

        let started = Instant::now();
        debug!("-> {:?} (awaiting event)", text);
        if let Err(e) = shared.write(&mut **transport, text, &bytes) {
            return finish(text, started, Err(e));
        }

        let result = match shared.answers.recv_timeout(timeout) {
            Ok(Delivery::Item(value)) => Ok(value),
            Ok(Delivery::Shutdown) | Err(RecvTimeoutError::Disconnected) => Err(aborted(text)),
            Err(RecvTimeoutError::Timeout) if !shared.is_alive() => Err(aborted(text)),
            Err(RecvTimeoutError::Timeout) => Err(CommandError::Timeout {
                command: text.to_string(),
                elapsed: started.elapsed(),
            }),
        };
        drop(guard);
        drop(transport);

        finish(text, started, result)
    }

    /// Write a line without waiting for any reply.
    ///
    /// The write still takes the command lock, so it never lands in the
    /// middle of another command.
    pub fn send_raw(&self, text: &str) -> CommandResult<()> {
        let mut transport = self.shared.transport.lock();
        if !self.shared.is_alive() {
            return Err(aborted(text));
        }
        let bytes = self.shared.encode_command(text)?;
        debug!("-> {:?} (no reply)", text);
        self.shared.write(&mut **transport, text, &bytes)
    }

    /// Stop the engine.
    ///
    /// Wakes any pending command with [`CommandError::Aborted`] and joins the
    /// event processor thread. Calling `stop` again does nothing.
    pub fn stop(&self) {
        self.lifecycle.stop();
    }
}

/// A handle that does not keep the engine running.
///
/// Meant for event handlers that issue follow-up commands.
#[derive(Clone, Default)]
pub struct WeakEngine {
    shared: Weak<Shared>,
    lifecycle: Weak<Lifecycle>,
}

impl WeakEngine {
    /// Get a full handle, or `None` once every [`Engine`] has been dropped.
    pub fn upgrade(&self) -> Option<Engine> {
        Some(Engine {
            shared: self.shared.upgrade()?,
            lifecycle: self.lifecycle.upgrade()?,
        })
    }
}

impl std::fmt::Debug for WeakEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakEngine")
            .field("alive", &(self.lifecycle.strong_count() > 0))
            .finish()
    }
}

fn finish<T>(command: &str, started: Instant, result: CommandResult<T>) -> CommandResult<T> {
    let elapsed = started.elapsed();
    match &result {
        Ok(_) => {
            trace!("{:?} completed in {:?}", command, elapsed);
            metric_defs::record_result("ok", elapsed);
        }
        Err(e) => {
            if e.is_aborted() {
                debug!("{}", e);
            } else {
                warn!("{}", e);
            }
            metric_defs::record_result(e.label(), elapsed);
        }
    }
    result
}

/// Builder for an [`Engine`].
///
/// ```rust
/// use atlink_engine::{EngineBuilder, EngineConfig, HandlerError, Line};
///
/// let (engine, mut receiver) = EngineBuilder::new(EngineConfig::default())
///     .event_handler(|line: Line| -> Result<(), HandlerError> {
///         println!("event: {}", line);
///         Ok(())
///     })
///     .build(std::io::sink())
///     .unwrap();
///
/// receiver.feed(b"+CREG: 1\r\n");
/// engine.stop();
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    classifier: Option<Box<dyn Classifier>>,
    handler: Box<dyn EventHandler>,
    correlator: Box<dyn EventCorrelator>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl EngineBuilder {
    /// Create a builder with the default event handler and correlator.
    pub fn new(config: EngineConfig) -> Self {
        EngineBuilder {
            config,
            classifier: None,
            handler: Box::new(LogEvents),
            correlator: Box::new(PrefixCorrelator),
        }
    }

    /// Use this classifier instead of the configured classification.
    pub fn classifier(mut self, classifier: impl Classifier + 'static) -> Self {
        self.classifier = Some(Box::new(classifier));
        self
    }

    /// Handle events with `handler`.
    ///
    /// A handler that issues commands should hold a [`WeakEngine`]. A strong
    /// [`Engine`] captured by the handler keeps the engine running until
    /// [`Engine::stop`] is called.
    pub fn event_handler(mut self, handler: impl EventHandler) -> Self {
        self.handler = Box::new(handler);
        self
    }

    /// Match events to awaiting-event commands with `correlator`.
    pub fn correlator(mut self, correlator: impl EventCorrelator) -> Self {
        self.correlator = Box::new(correlator);
        self
    }

    /// Start the engine writing commands to `writer`.
    ///
    /// Received bytes must be fed to the returned [`StreamReceiver`], either
    /// directly or by spawning it on a reader.
    pub fn build<W>(self, writer: W) -> Result<(Engine, StreamReceiver), BuildError>
    where
        W: Write + Send + 'static,
    {
        let EngineBuilder {
            config,
            classifier,
            handler,
            correlator,
        } = self;

        config.validate()?;
        let framer = LineFramer::new(config.terminator_bytes(), config.text)
            .map_err(|_| ConfigError::EmptyTerminator)?;
        let classifier = classifier.unwrap_or_else(|| config.classification.build());

        let (responses_tx, responses) = unbounded();
        let (events_tx, events) = unbounded();
        let (answers_tx, answers) = bounded(1);

        let shared = Arc::new(Shared {
            text: config.text,
            config,
            alive: AtomicBool::new(true),
            transport: Mutex::new(Box::new(writer)),
            outstanding: RwLock::new(None),
            responses,
            responses_tx: responses_tx.clone(),
            events_tx: events_tx.clone(),
            answers,
            answers_tx,
        });

        let event_thread =
            EventProcessor::new(shared.clone(), events, handler, correlator).spawn()?;
        debug!("engine started with {:?}", shared.config);

        let receiver = StreamReceiver::new(framer, classifier, responses_tx, events_tx, shared.clone());
        let lifecycle = Arc::new(Lifecycle {
            shared: shared.clone(),
            event_thread: Mutex::new(Some(event_thread)),
        });

        Ok((Engine { shared, lifecycle }, receiver))
    }

    /// Start the engine on a reader/writer pair, running the receiver on its
    /// own thread.
    pub fn connect<R, W>(self, reader: R, writer: W) -> Result<(Engine, ReaderHandle), BuildError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (engine, receiver) = self.build(writer)?;
        let reader = receiver.spawn(reader)?;
        Ok((engine, reader))
    }
}
