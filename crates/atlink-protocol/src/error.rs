//! Error types for the line protocol.

use thiserror::Error;

use crate::text::Encoding;

/// Errors that can occur while framing, decoding or encoding lines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A received line is not valid in the configured encoding.
    #[error("invalid {encoding} sequence at byte {position}")]
    Decode {
        /// Encoding the line was decoded with.
        encoding: Encoding,
        /// Offset of the first offending byte within the line.
        position: usize,
    },

    /// Outgoing text contains a character the encoding cannot represent.
    #[error("character {character:?} cannot be encoded as {encoding}")]
    Unencodable {
        /// Encoding the text was encoded with.
        encoding: Encoding,
        /// First character that could not be encoded.
        character: char,
    },

    /// The configured line terminator is empty.
    #[error("line terminator must not be empty")]
    EmptyTerminator,
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
