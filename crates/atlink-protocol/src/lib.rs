//! AT Command Line Protocol
//!
//! This crate provides the stateless building blocks for talking to modem-like
//! devices (GSM, Bluetooth and similar modules) that speak a line-based text
//! command protocol over a serial line.
//!
//! # Protocol Overview
//!
//! - **Commands** (host → device): text such as `AT+CSQ` followed by a terminator
//! - **Responses** (device → host): zero or more information lines and a final
//!   result code such as `OK` or `ERROR`, each terminated with `\r\n`
//! - **Events** (device → host): unsolicited lines (`+CREG: 1`, `RING`) that may
//!   arrive at any time, even in the middle of a response
//!
//! # Building Blocks
//!
//! - [`LineFramer`]: accumulates received chunks and yields complete [`Line`]s
//! - [`TextCodec`]: decodes and encodes line text with a configurable encoding
//! - [`Classifier`]: decides whether a line is a [`Route::Response`] or a
//!   [`Route::Event`]
//! - [`MatchMode`]: compares lines with terminal tokens
//!
//! # Example
//!
//! ```rust
//! use atlink_protocol::{Classifier, LineFramer, PrefixClassifier, Route};
//!
//! let mut framer = LineFramer::default();
//! let classifier = PrefixClassifier::default();
//!
//! let routes: Vec<Route> = framer
//!     .feed(b"+CSQ: 20,99\r\nOK\r\n")
//!     .map(|line| classifier.classify(&line))
//!     .collect();
//! assert_eq!(routes, vec![Route::Event, Route::Response]);
//! ```

mod classify;
mod codec;
mod error;
mod line;
mod matching;
mod text;

pub use classify::*;
pub use codec::*;
pub use error::*;
pub use line::*;
pub use matching::*;
pub use text::*;
