//! AT Command Engine
//!
//! A half-duplex command/response engine for devices that speak a
//! line-oriented text protocol (GSM, Bluetooth and similar modules). It
//! serializes commands from any number of threads, collects each command's
//! reply lines until a terminal line, and hands unsolicited event lines to
//! a handler on a dedicated thread.
//!
//! # Architecture
//!
//! ```text
//!   transport ──bytes──▶ StreamReceiver ──┬─▶ responses ──▶ Engine::run / execute
//!                        (frame, classify) │
//!                                          └─▶ events ────▶ event processor
//!                                                            ├─▶ correlator ─▶ execute_awaiting_event
//!                                                            └─▶ EventHandler
//! ```
//!
//! - [`EngineBuilder`] validates the [`EngineConfig`], starts the event
//!   processor and returns an [`Engine`] with its [`StreamReceiver`]
//! - [`Engine`] issues commands: [`Engine::execute`] waits for a terminal
//!   token, [`Engine::execute_awaiting_event`] waits for a correlated event
//! - [`Engine::stop`] aborts pending commands and ends the event processor
//!
//! # Example
//!
//! ```rust,no_run
//! use std::net::TcpStream;
//! use std::time::Duration;
//! use atlink_engine::{EngineBuilder, EngineConfig};
//!
//! let stream = TcpStream::connect("127.0.0.1:4000")?;
//! let (engine, _reader) = EngineBuilder::new(EngineConfig::default())
//!     .connect(stream.try_clone()?, stream)?;
//!
//! let lines = engine.execute("AT+CGMR", "OK", Duration::from_secs(1))?;
//! let signal = engine.execute_awaiting_event("AT+CSQ", Duration::from_secs(1))?;
//! println!("{:?} {}", lines, signal);
//!
//! engine.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod command;
mod config;
mod engine;
mod error;
mod events;
mod receiver;

pub mod metric_defs;

pub use command::{Command, Reply};
pub use config::*;
pub use engine::{Engine, EngineBuilder, WeakEngine};
pub use error::*;
pub use events::{EventCorrelator, EventHandler, LogEvents, PrefixCorrelator};
pub use metric_defs::describe_metrics;
pub use receiver::{ReaderHandle, StreamReceiver};

pub use atlink_protocol::{
    Classification, Classifier, DecodePolicy, Encoding, Line, MatchMode, Route, TextCodec, ERROR,
    OK,
};
