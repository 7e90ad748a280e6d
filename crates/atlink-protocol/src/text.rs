//! Character encodings for line text.
//!
//! Devices on the other end of a serial line rarely agree on an encoding.
//! Most speak ASCII, some send Latin-1 names in phonebook entries, newer
//! modules send UTF-8. The [`TextCodec`] pairs an [`Encoding`] with a
//! [`DecodePolicy`] that says what to do with bytes that do not fit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Character used when an invalid sequence is decoded under
/// [`DecodePolicy::Replace`].
pub const REPLACEMENT_CHAR: char = '\u{FFFD}';

/// Byte used when a character cannot be encoded under
/// [`DecodePolicy::Replace`].
pub const REPLACEMENT_BYTE: u8 = b'?';

/// Character encoding of the text carried on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// UTF-8.
    #[default]
    Utf8,
    /// ISO-8859-1. Every byte maps to exactly one character.
    Latin1,
    /// 7-bit US-ASCII.
    Ascii,
}

impl Encoding {
    /// Returns the conventional name of the encoding.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Latin1 => "ISO-8859-1",
            Encoding::Ascii => "ASCII",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with byte sequences (or characters) the encoding cannot map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePolicy {
    /// Substitute a replacement character and carry on.
    #[default]
    Replace,
    /// Reject the whole line (or command).
    Strict,
}

/// Encoder/decoder for line text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextCodec {
    /// Encoding used in both directions.
    #[serde(default)]
    pub encoding: Encoding,
    /// Handling of invalid sequences.
    #[serde(default)]
    pub policy: DecodePolicy,
}

impl TextCodec {
    /// Create a codec for the given encoding and policy.
    pub const fn new(encoding: Encoding, policy: DecodePolicy) -> Self {
        TextCodec { encoding, policy }
    }

    /// Decode received bytes into text.
    pub fn decode(&self, bytes: &[u8]) -> ProtocolResult<String> {
        match (self.encoding, self.policy) {
            (Encoding::Utf8, DecodePolicy::Replace) => {
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            (Encoding::Utf8, DecodePolicy::Strict) => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| ProtocolError::Decode {
                    encoding: Encoding::Utf8,
                    position: e.valid_up_to(),
                }),
            (Encoding::Latin1, _) => Ok(bytes.iter().map(|&b| b as char).collect()),
            (Encoding::Ascii, DecodePolicy::Replace) => Ok(bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { REPLACEMENT_CHAR })
                .collect()),
            (Encoding::Ascii, DecodePolicy::Strict) => {
                if let Some(position) = bytes.iter().position(|b| !b.is_ascii()) {
                    return Err(ProtocolError::Decode {
                        encoding: Encoding::Ascii,
                        position,
                    });
                }
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
        }
    }

    /// Encode outgoing text into bytes.
    pub fn encode(&self, text: &str) -> ProtocolResult<Vec<u8>> {
        let limit = match self.encoding {
            Encoding::Utf8 => return Ok(text.as_bytes().to_vec()),
            Encoding::Latin1 => 0xFF,
            Encoding::Ascii => 0x7F,
        };

        let mut buf = Vec::with_capacity(text.len());
        for c in text.chars() {
            let code = c as u32;
            if code <= limit {
                buf.push(code as u8);
                continue;
            }
            match self.policy {
                DecodePolicy::Replace => buf.push(REPLACEMENT_BYTE),
                DecodePolicy::Strict => {
                    return Err(ProtocolError::Unencodable {
                        encoding: self.encoding,
                        character: c,
                    })
                }
            }
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_replace_substitutes() {
        let codec = TextCodec::new(Encoding::Utf8, DecodePolicy::Replace);
        let text = codec.decode(b"OK\xffOK").unwrap();
        assert_eq!(text, "OK\u{FFFD}OK");
    }

    #[test]
    fn test_utf8_strict_reports_position() {
        let codec = TextCodec::new(Encoding::Utf8, DecodePolicy::Strict);
        let err = codec.decode(b"+CSQ\xff").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Decode {
                encoding: Encoding::Utf8,
                position: 4
            }
        );
    }

    #[test]
    fn test_latin1_decodes_every_byte() {
        let codec = TextCodec::new(Encoding::Latin1, DecodePolicy::Strict);
        let bytes: Vec<u8> = (0u8..=255).collect();
        let text = codec.decode(&bytes).unwrap();
        assert_eq!(text.chars().count(), 256);
        assert_eq!(codec.encode(&text).unwrap(), bytes);
    }

    #[test]
    fn test_ascii_replace_and_strict() {
        let lenient = TextCodec::new(Encoding::Ascii, DecodePolicy::Replace);
        assert_eq!(lenient.decode(b"A\x80B").unwrap(), "A\u{FFFD}B");

        let strict = TextCodec::new(Encoding::Ascii, DecodePolicy::Strict);
        assert!(matches!(
            strict.decode(b"A\x80B"),
            Err(ProtocolError::Decode { position: 1, .. })
        ));
    }

    #[test]
    fn test_encode_unencodable() {
        let lenient = TextCodec::new(Encoding::Ascii, DecodePolicy::Replace);
        assert_eq!(lenient.encode("AT+CMGS=\"é\"").unwrap(), b"AT+CMGS=\"?\"");

        let strict = TextCodec::new(Encoding::Latin1, DecodePolicy::Strict);
        assert_eq!(strict.encode("é").unwrap(), vec![0xE9]);
        assert_eq!(
            strict.encode("€"),
            Err(ProtocolError::Unencodable {
                encoding: Encoding::Latin1,
                character: '€'
            })
        );
    }

    #[test]
    fn test_codec_deserializes_snake_case() {
        let codec: TextCodec =
            serde_json::from_str(r#"{"encoding":"latin1","policy":"strict"}"#).unwrap();
        assert_eq!(codec, TextCodec::new(Encoding::Latin1, DecodePolicy::Strict));
    }
}
