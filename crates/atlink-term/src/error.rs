//! Error types for the terminal.

use std::io;
use std::path::PathBuf;

use atlink_engine::{BuildError, ConfigError};
use thiserror::Error;

/// Errors that end the terminal session.
#[derive(Debug, Error)]
pub enum TermError {
    #[error("cannot read config {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse config {path:?}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot start engine: {0}")]
    Engine(#[from] BuildError),

    #[error("cannot install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("cannot install log subscriber: {0}")]
    Logging(String),

    #[error("cannot read stdin: {0}")]
    Stdin(#[source] io::Error),
}

pub type TermResult<T> = Result<T, TermError>;
