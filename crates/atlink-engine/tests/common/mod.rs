//! Scripted in-memory device for engine tests.
//!
//! The engine writes into a [`WireWriter`]; each write arrives on the
//! [`Wire`] as one chunk. Replies are either fed straight into the
//! engine's `StreamReceiver` or sent through a [`ChannelReader`] when the
//! reader thread is under test.

#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::time::Duration;

use atlink_engine::{Engine, EngineBuilder, EngineConfig, HandlerError, Line, StreamReceiver};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

/// How long tests wait for something that should happen.
pub const WAIT: Duration = Duration::from_secs(2);

/// Write half handed to the engine.
pub struct WireWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for WireWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "device gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A writer whose every write fails.
pub struct BrokenWriter;

impl Write for BrokenWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "port closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The device's view of the bytes the engine wrote.
pub struct Wire {
    rx: Receiver<Vec<u8>>,
}

impl Wire {
    /// Wait for the next command line, without its terminator.
    pub fn expect_command(&self) -> String {
        self.try_command(WAIT).expect("no command written to the wire")
    }

    /// Wait up to `timeout` for the next command line.
    pub fn try_command(&self, timeout: Duration) -> Option<String> {
        match self.rx.recv_timeout(timeout) {
            Ok(bytes) => Some(
                String::from_utf8(bytes)
                    .expect("command is not UTF-8")
                    .trim_end_matches("\r\n")
                    .to_string(),
            ),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Create a connected writer/wire pair.
pub fn wire() -> (WireWriter, Wire) {
    let (tx, rx) = unbounded();
    (WireWriter { tx }, Wire { rx })
}

/// Read half for the reader thread, fed by a [`DeviceSender`].
pub struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                // Device hung up.
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// A [`ChannelReader`] that first fails with each of `errors` in turn.
pub struct FlakyReader {
    errors: Vec<io::ErrorKind>,
    inner: ChannelReader,
}

impl FlakyReader {
    pub fn new(inner: ChannelReader, errors: &[io::ErrorKind]) -> Self {
        let mut errors = errors.to_vec();
        errors.reverse();
        FlakyReader { errors, inner }
    }
}

impl Read for FlakyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.errors.pop() {
            Some(kind) => Err(io::Error::new(kind, "transient read failure")),
            None => self.inner.read(buf),
        }
    }
}

/// The device's transmit side. Dropping it ends the reader's stream.
pub struct DeviceSender {
    tx: Sender<Vec<u8>>,
}

impl DeviceSender {
    /// Send raw bytes.
    pub fn send(&self, bytes: &[u8]) {
        self.tx.send(bytes.to_vec()).expect("reader gone");
    }

    /// Send lines, each terminated with `\r\n`.
    pub fn send_lines(&self, lines: &[&str]) {
        self.send(&frame(lines));
    }
}

/// Create a connected device-sender/reader pair.
pub fn device_link() -> (DeviceSender, ChannelReader) {
    let (tx, rx) = unbounded();
    (
        DeviceSender { tx },
        ChannelReader {
            rx,
            pending: Vec::new(),
        },
    )
}

/// Terminate each line with `\r\n` and concatenate.
pub fn frame(lines: &[&str]) -> Vec<u8> {
    lines
        .iter()
        .flat_map(|line| line.bytes().chain(*b"\r\n"))
        .collect()
}

/// Build an engine on an in-memory wire.
pub fn engine(config: EngineConfig) -> (Engine, StreamReceiver, Wire) {
    engine_with(EngineBuilder::new(config))
}

/// Build an engine from a prepared builder on an in-memory wire.
pub fn engine_with(builder: EngineBuilder) -> (Engine, StreamReceiver, Wire) {
    let (writer, wire) = wire();
    let (engine, receiver) = builder.build(writer).expect("engine failed to build");
    (engine, receiver, wire)
}

/// An event handler that forwards every event to the returned receiver.
pub fn event_sink() -> (
    impl FnMut(Line) -> Result<(), HandlerError> + Send + 'static,
    Receiver<Line>,
) {
    let (tx, rx) = unbounded();
    let handler = move |line: Line| -> Result<(), HandlerError> {
        tx.send(line)?;
        Ok(())
    };
    (handler, rx)
}
