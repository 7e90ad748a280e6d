//! Line framing for the received byte stream.
//!
//! The device answers with text lines terminated by `\r\n`. Bytes arrive in
//! arbitrary chunks (a read may return half a line or several lines), so the
//! framer keeps the unterminated tail in a buffer and hands out complete
//! lines as soon as their terminator has been seen.

use bytes::{Buf, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};
use crate::line::Line;
use crate::text::TextCodec;

/// Default line terminator.
pub const DEFAULT_TERMINATOR: &[u8] = b"\r\n";

/// Initial capacity of the partial-line buffer. The buffer grows past this
/// as needed; no line length limit is enforced.
pub const INITIAL_BUFFER_CAPACITY: usize = 256;

/// A framer that turns a chunked byte stream into decoded lines.
#[derive(Debug)]
pub struct LineFramer {
    /// Bytes received but not yet terminated.
    buffer: BytesMut,
    /// Terminator sequence that ends a line.
    terminator: Vec<u8>,
    /// Decoder for line text.
    text: TextCodec,
    /// Offset from which the next terminator search starts.
    scan_from: usize,
    /// Lines discarded because they failed strict decoding.
    dropped: u64,
}

impl Default for LineFramer {
    fn default() -> Self {
        LineFramer {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            terminator: DEFAULT_TERMINATOR.to_vec(),
            text: TextCodec::default(),
            scan_from: 0,
            dropped: 0,
        }
    }
}

impl LineFramer {
    /// Create a framer with the given terminator and text codec.
    pub fn new(terminator: &[u8], text: TextCodec) -> ProtocolResult<Self> {
        if terminator.is_empty() {
            return Err(ProtocolError::EmptyTerminator);
        }
        Ok(LineFramer {
            terminator: terminator.to_vec(),
            text,
            ..Default::default()
        })
    }

    /// Get the terminator sequence.
    pub fn terminator(&self) -> &[u8] {
        &self.terminator
    }

    /// Get the text codec.
    pub fn text_codec(&self) -> TextCodec {
        self.text
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Add received data and iterate over the lines it completes.
    ///
    /// A chunk may complete zero, one or many lines. Lines the iterator does
    /// not consume stay buffered and are returned by the next call.
    pub fn feed<'a>(&'a mut self, data: &[u8]) -> Frames<'a> {
        self.push(data);
        Frames { framer: self }
    }

    /// Try to decode the next complete line from the buffer.
    ///
    /// Returns `None` when the buffer holds no terminator. A line that fails
    /// strict decoding is dropped and the next one is tried.
    pub fn decode_line(&mut self) -> Option<Line> {
        loop {
            let end = match self.find_terminator() {
                Some(end) => end,
                None => {
                    // Keep a partial terminator at the tail in the next search.
                    self.scan_from = self
                        .buffer
                        .len()
                        .saturating_sub(self.terminator.len() - 1);
                    return None;
                }
            };

            let line_data = self.buffer.split_to(end);
            self.buffer.advance(self.terminator.len());
            self.scan_from = 0;

            match self.text.decode(&line_data) {
                Ok(text) => return Some(Line::from(text)),
                Err(e) => {
                    self.dropped += 1;
                    log::warn!(
                        "dropping undecodable line ({} bytes): {}",
                        line_data.len(),
                        e
                    );
                }
            }
        }
    }

    fn find_terminator(&self) -> Option<usize> {
        let start = self.scan_from.min(self.buffer.len());
        self.buffer[start..]
            .windows(self.terminator.len())
            .position(|window| window == self.terminator.as_slice())
            .map(|pos| start + pos)
    }

    /// Encode a line for transmission, appending the given terminator.
    pub fn encode_line(&self, text: &str, terminator: &[u8]) -> ProtocolResult<Vec<u8>> {
        let mut buf = self.text.encode(text)?;
        buf.extend_from_slice(terminator);
        Ok(buf)
    }

    /// Get the number of buffered (unterminated) bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Get the number of lines dropped by strict decoding.
    pub fn dropped_lines(&self) -> u64 {
        self.dropped
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan_from = 0;
    }

    /// Get the current buffer contents as a string (for debugging).
    pub fn pending_text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).to_string()
    }
}

/// Iterator over the lines completed by [`LineFramer::feed`].
#[derive(Debug)]
pub struct Frames<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Frames<'_> {
    type Item = Line;

    fn next(&mut self) -> Option<Line> {
        self.framer.decode_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{DecodePolicy, Encoding};

    const STREAM: &[u8] = b"\r\nOK\r\n+CSQ: 20,99\r\n\r\nOK\r\nRING\r\n+CREG: 0,1\r\npartial";

    fn frame_in_chunks(data: &[u8], chunk_size: usize) -> (Vec<Line>, usize) {
        let mut framer = LineFramer::default();
        let mut lines = Vec::new();
        for chunk in data.chunks(chunk_size) {
            lines.extend(framer.feed(chunk));
        }
        (lines, framer.buffered_len())
    }

    #[test]
    fn test_encode_line() {
        let framer = LineFramer::default();
        let encoded = framer.encode_line("AT+CSQ", b"\r").unwrap();
        assert_eq!(encoded, b"AT+CSQ\r");
    }

    #[test]
    fn test_decode_multiple_lines_from_one_chunk() {
        let mut framer = LineFramer::default();
        let lines: Vec<Line> = framer.feed(b"line1\r\nline2\r\n").collect();
        assert_eq!(lines, vec![Line::from("line1"), Line::from("line2")]);
        assert!(framer.decode_line().is_none());
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_empty_lines_are_framed() {
        let mut framer = LineFramer::default();
        let lines: Vec<Line> = framer.feed(b"\r\nOK\r\n").collect();
        assert_eq!(lines, vec![Line::from(""), Line::from("OK")]);
    }

    #[test]
    fn test_chunking_invariance() {
        let (expected, expected_tail) = frame_in_chunks(STREAM, STREAM.len());
        assert_eq!(expected.len(), 7);
        assert_eq!(expected_tail, "partial".len());

        for chunk_size in 1..STREAM.len() {
            let (lines, tail) = frame_in_chunks(STREAM, chunk_size);
            assert_eq!(lines, expected, "chunk size {chunk_size}");
            assert_eq!(tail, expected_tail, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_partial_line_across_chunks() {
        let mut framer = LineFramer::default();
        for chunk in [&b"+CGMR: "[..], b"V1.", b"2.", b"3"] {
            assert_eq!(framer.feed(chunk).count(), 0);
        }
        assert_eq!(framer.pending_text(), "+CGMR: V1.2.3");

        let lines: Vec<Line> = framer.feed(b"\r\n").collect();
        assert_eq!(lines, vec![Line::from("+CGMR: V1.2.3")]);
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_terminator_split_across_chunks() {
        let mut framer = LineFramer::default();
        assert_eq!(framer.feed(b"OK\r").count(), 0);
        let lines: Vec<Line> = framer.feed(b"\nERROR\r").collect();
        assert_eq!(lines, vec![Line::from("OK")]);
        let lines: Vec<Line> = framer.feed(b"\n").collect();
        assert_eq!(lines, vec![Line::from("ERROR")]);
    }

    #[test]
    fn test_lone_cr_is_not_a_terminator() {
        let mut framer = LineFramer::default();
        let lines: Vec<Line> = framer.feed(b"a\rb\r\n").collect();
        assert_eq!(lines, vec![Line::from("a\rb")]);
    }

    #[test]
    fn test_custom_terminator() {
        let mut framer = LineFramer::new(b"\r", TextCodec::default()).unwrap();
        let lines: Vec<Line> = framer.feed(b"AT\rOK\r").collect();
        assert_eq!(lines, vec![Line::from("AT"), Line::from("OK")]);
    }

    #[test]
    fn test_empty_terminator_rejected() {
        let err = LineFramer::new(b"", TextCodec::default()).unwrap_err();
        assert_eq!(err, ProtocolError::EmptyTerminator);
    }

    #[test]
    fn test_strict_decoding_drops_only_bad_line() {
        let codec = TextCodec::new(Encoding::Utf8, DecodePolicy::Strict);
        let mut framer = LineFramer::new(DEFAULT_TERMINATOR, codec).unwrap();
        let lines: Vec<Line> = framer.feed(b"+CMT: \xff\xfe\r\nOK\r\n").collect();
        assert_eq!(lines, vec![Line::from("OK")]);
        assert_eq!(framer.dropped_lines(), 1);
    }

    #[test]
    fn test_replace_decoding_keeps_line() {
        let mut framer = LineFramer::default();
        let lines: Vec<Line> = framer.feed(b"\xffOK\r\n").collect();
        assert_eq!(lines, vec![Line::from("\u{FFFD}OK")]);
        assert_eq!(framer.dropped_lines(), 0);
    }

    #[test]
    fn test_round_trip_lossless_text() {
        let codec = TextCodec::new(Encoding::Latin1, DecodePolicy::Strict);
        let mut framer = LineFramer::new(DEFAULT_TERMINATOR, codec).unwrap();
        let text = "+CPBR: 1,\"0123\",129,\"Müller\"";
        let wire = framer.encode_line(text, DEFAULT_TERMINATOR).unwrap();
        let lines: Vec<Line> = framer.feed(&wire).collect();
        assert_eq!(lines, vec![Line::from(text)]);
    }

    #[test]
    fn test_unconsumed_lines_stay_buffered() {
        let mut framer = LineFramer::default();
        let first = framer.feed(b"one\r\ntwo\r\n").next();
        assert_eq!(first, Some(Line::from("one")));
        let rest: Vec<Line> = framer.feed(b"three\r\n").collect();
        assert_eq!(rest, vec![Line::from("two"), Line::from("three")]);
    }

    #[test]
    fn test_clear() {
        let mut framer = LineFramer::default();
        framer.push(b"garbage\r");
        framer.clear();
        assert_eq!(framer.buffered_len(), 0);
        let lines: Vec<Line> = framer.feed(b"OK\r\n").collect();
        assert_eq!(lines, vec![Line::from("OK")]);
    }
}
