//! Line codec for the executor pipe
//!
//! Each command travels as one line:
//! ```text
//! <id> <command>\n
//! ```
//!
//! The id ends at the first space; the rest of the line is the command.
//! Backslash, newline and carriage return inside the command are escaped as
//! `\\`, `\n` and `\r` so that a command always fits on a single line.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::limits::MAX_LINE_LENGTH;
use crate::CommandRecord;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Line too long: {0} bytes (max: {MAX_LINE_LENGTH})")]
    LineTooLong(usize),

    #[error("Line is not valid UTF-8")]
    InvalidUtf8,

    #[error("Missing separator between id and command")]
    MissingSeparator,

    #[error("Invalid command id: {0:?}")]
    InvalidId(String),

    #[error("Invalid escape sequence: \\{0}")]
    InvalidEscape(char),
}

/// Escape a command so it fits on one line
pub fn escape(command: &str) -> String {
    let mut out = String::with_capacity(command.len());
    for c in command.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape`]
pub fn unescape(escaped: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => return Err(CodecError::InvalidEscape(other)),
            None => return Err(CodecError::InvalidEscape(' ')),
        }
    }
    Ok(out)
}

/// Encode a command record into a newline-terminated line
pub fn encode(record: &CommandRecord) -> Result<Bytes, CodecError> {
    let line = format!("{} {}", record.id, escape(&record.command));

    if line.len() > MAX_LINE_LENGTH {
        return Err(CodecError::LineTooLong(line.len()));
    }

    let mut buf = BytesMut::with_capacity(line.len() + 1);
    buf.put_slice(line.as_bytes());
    buf.put_u8(b'\n');

    Ok(buf.freeze())
}

/// Decode one line (without its terminator)
pub fn decode_line(line: &[u8]) -> Result<CommandRecord, CodecError> {
    let line = std::str::from_utf8(line).map_err(|_| CodecError::InvalidUtf8)?;
    let line = line.strip_suffix('\r').unwrap_or(line);

    let (id, command) = line.split_once(' ').ok_or(CodecError::MissingSeparator)?;
    let id = id
        .parse::<i64>()
        .map_err(|_| CodecError::InvalidId(id.to_string()))?;

    Ok(CommandRecord {
        id,
        command: unescape(command)?,
    })
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Partial line data being accumulated
    buffer: BytesMut,
}

impl LineDecoder {
    /// Create a new line decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next line from the buffer
    ///
    /// Returns:
    /// - `Ok(Some(record))` if a complete line was decoded
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the line is invalid; the line is consumed so decoding
    ///   can continue with the next one
    pub fn decode_next(&mut self) -> Result<Option<CommandRecord>, CodecError> {
        let Some(end) = self.buffer.iter().position(|b| *b == b'\n') else {
            if self.buffer.len() > MAX_LINE_LENGTH {
                let len = self.buffer.len();
                self.buffer.clear();
                return Err(CodecError::LineTooLong(len));
            }
            return Ok(None);
        };

        let line = self.buffer.split_to(end);
        self.buffer.advance(1);

        if line.len() > MAX_LINE_LENGTH {
            return Err(CodecError::LineTooLong(line.len()));
        }
        if line.is_empty() {
            return self.decode_next();
        }

        decode_line(&line).map(Some)
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_plain_command() {
        let encoded = encode(&CommandRecord::new(6, "ls /tmp")).unwrap();
        assert_eq!(&encoded[..], b"6 ls /tmp\n");
    }

    #[test]
    fn test_sentinel_line() {
        let encoded = encode(&CommandRecord::sentinel()).unwrap();
        assert_eq!(&encoded[..], b"-1 exit\n");
        let decoded = decode_line(b"-1 exit").unwrap();
        assert!(decoded.is_sentinel());
    }

    #[test]
    fn test_multiline_command_stays_on_one_line() {
        let record = CommandRecord::new(3, "printf 'a\\nb'\necho done");
        let encoded = encode(&record).unwrap();
        assert_eq!(encoded.iter().filter(|b| **b == b'\n').count(), 1);

        let mut decoder = LineDecoder::new();
        decoder.extend(&encoded);
        assert_eq!(decoder.decode_next().unwrap(), Some(record));
    }

    #[test]
    fn test_spaces_after_id_are_preserved() {
        let decoded = decode_line(b"8  echo   spaced").unwrap();
        assert_eq!(decoded.id, 8);
        assert_eq!(decoded.command, " echo   spaced");
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode_line(b"nospace"), Err(CodecError::MissingSeparator));
        assert_eq!(
            decode_line(b"x ls"),
            Err(CodecError::InvalidId("x".into()))
        );
        assert_eq!(decode_line(b"1 bad\\q"), Err(CodecError::InvalidEscape('q')));
    }

    #[test]
    fn test_line_decoder_across_chunks() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"6 ls /t");
        assert!(decoder.decode_next().unwrap().is_none());
        assert_eq!(decoder.buffer_len(), 7);

        decoder.extend(b"mp\n7 echo hi\n");
        assert_eq!(decoder.decode_next().unwrap(), Some(CommandRecord::new(6, "ls /tmp")));
        assert_eq!(decoder.decode_next().unwrap(), Some(CommandRecord::new(7, "echo hi")));
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_decoder_skips_bad_line() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"garbage\n\n9 uptime\n");
        assert!(decoder.decode_next().is_err());
        assert_eq!(decoder.decode_next().unwrap(), Some(CommandRecord::new(9, "uptime")));
    }

    #[test]
    fn test_oversized_line_rejected() {
        let record = CommandRecord::new(1, "x".repeat(MAX_LINE_LENGTH));
        assert!(matches!(encode(&record), Err(CodecError::LineTooLong(_))));

        let mut decoder = LineDecoder::new();
        decoder.extend(&vec![b'a'; MAX_LINE_LENGTH + 1]);
        assert!(matches!(decoder.decode_next(), Err(CodecError::LineTooLong(_))));
        assert_eq!(decoder.buffer_len(), 0);
    }
}
