//! Incremental RESP Parser
//!
//! The parser reads from a buffer and returns either:
//! - `Ok(Some((value, consumed)))` - a complete value, `consumed` bytes used
//! - `Ok(None)` - the message is incomplete, wait for more data
//! - `Err(ParseError)` - invalid protocol data
//!
//! The caller appends network data to a buffer, calls `parse()`, and on
//! success advances the buffer by `consumed` bytes. The same parser serves the
//! server side (batch frames from clients) and the Redis driver (replies from
//! the backend).
//!
//! Unlike a Redis server, inline commands are not accepted: every frame must
//! start with a RESP type prefix.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use std::num::ParseIntError;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The message exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (64 MB)
pub const MAX_BULK_SIZE: usize = 64 * 1024 * 1024;

/// Maximum array nesting depth. Batch frames nest two levels deep.
pub const MAX_NESTING_DEPTH: usize = 8;

#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one RESP value from the start of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => {
                Ok(parse_line(buf)?.map(|(s, n)| (RespValue::SimpleString(s), n)))
            }
            prefix::ERROR => Ok(parse_line(buf)?.map(|(s, n)| (RespValue::Error(s), n))),
            prefix::INTEGER => match parse_line(buf)? {
                Some((s, consumed)) => {
                    let n: i64 = s
                        .parse()
                        .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))?;
                    Ok(Some((RespValue::Integer(n), consumed)))
                }
                None => Ok(None),
            },
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Parses a bulk string: `$<length>\r\n<data>\r\n`
    fn parse_bulk_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let (length, header) = match parse_length(buf)? {
            Some(v) => v,
            None => return Ok(None),
        };

        if length == -1 {
            return Ok(Some((RespValue::Null, header)));
        }
        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let total_needed = header + length + 2;
        if buf.len() < total_needed {
            return Ok(None);
        }

        if &buf[header + length..total_needed] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[header..header + length]);
        Ok(Some((RespValue::BulkString(data), total_needed)))
    }

    /// Parses an array: `*<count>\r\n<elements...>`
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let (count, mut consumed) = match parse_length(buf)? {
            Some(v) => v,
            None => return Ok(None),
        };

        if count == -1 {
            return Ok(Some((RespValue::Null, consumed)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;
        // Never trust the declared count for preallocation
        let mut elements = Vec::with_capacity(count.min(1024));

        self.depth += 1;

        for _ in 0..count {
            if consumed >= buf.len() {
                return Ok(None);
            }

            match self.parse_value(&buf[consumed..])? {
                Some((value, element_consumed)) => {
                    elements.push(value);
                    consumed += element_consumed;
                }
                None => return Ok(None),
            }
        }

        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Reads `<prefix><line>\r\n` and returns the line and the bytes consumed.
fn parse_line(buf: &[u8]) -> ParseResult<Option<(String, usize)>> {
    match find_crlf(&buf[1..]) {
        Some(pos) => {
            let s = std::str::from_utf8(&buf[1..1 + pos])
                .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
            Ok(Some((s.to_string(), 1 + pos + 2)))
        }
        None => Ok(None),
    }
}

/// Reads the `<prefix><n>\r\n` header of a bulk string or array.
fn parse_length(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    match parse_line(buf)? {
        Some((s, consumed)) => {
            let n: i64 = s
                .parse()
                .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))?;
            Ok(Some((n, consumed)))
        }
        None => Ok(None),
    }
}

/// Finds the position of CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Parses a single RESP message from bytes.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_string() {
        let (value, consumed) = parse_message(b"+OK\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::SimpleString("OK".to_string()));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_parse_incomplete() {
        assert!(parse_message(b"+OK").unwrap().is_none());
        assert!(parse_message(b"$5\r\nhel").unwrap().is_none());
        assert!(parse_message(b"*2\r\n$3\r\nfoo\r\n").unwrap().is_none());
    }

    #[test]
    fn test_parse_error_line() {
        let (value, consumed) = parse_message(b"-UNKNOWN_STORAGE cache\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Error("UNKNOWN_STORAGE cache".to_string()));
        assert_eq!(consumed, 24);
    }

    #[test]
    fn test_parse_integer() {
        let (value, consumed) = parse_message(b":-2\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Integer(-2));
        assert_eq!(consumed, 5);

        assert!(matches!(
            parse_message(b":not_a_number\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_parse_bulk_strings() {
        let (value, consumed) = parse_message(b"$5\r\nhello\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::from("hello")));
        assert_eq!(consumed, 11);

        let (value, _) = parse_message(b"$0\r\n\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::new()));

        let (value, _) = parse_message(b"$-1\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Null);
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        let (value, _) = parse_message(b"$5\r\nhel\x00o\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::from(&b"hel\x00o"[..])));
    }

    #[test]
    fn test_bulk_string_missing_crlf() {
        assert!(matches!(
            parse_message(b"$3\r\nabcXY"),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_parse_batch_frame() {
        let input = b"*3\r\n$6\r\nkv.Has\r\n$6\r\nmemory\r\n*1\r\n*3\r\n$1\r\na\r\n$-1\r\n$-1\r\n";
        let (value, consumed) = parse_message(input).unwrap().unwrap();
        assert_eq!(consumed, input.len());
        assert_eq!(
            value,
            RespValue::Array(vec![
                RespValue::bulk_string("kv.Has"),
                RespValue::bulk_string("memory"),
                RespValue::Array(vec![RespValue::Array(vec![
                    RespValue::bulk_string("a"),
                    RespValue::Null,
                    RespValue::Null,
                ])]),
            ])
        );
    }

    #[test]
    fn test_pipelined_values() {
        let input = b"+OK\r\n:1\r\n";
        let mut parser = RespParser::new();

        let (first, consumed) = parser.parse(input).unwrap().unwrap();
        assert_eq!(first, RespValue::ok());

        let (second, _) = parser.parse(&input[consumed..]).unwrap().unwrap();
        assert_eq!(second, RespValue::Integer(1));
    }

    #[test]
    fn test_oversized_bulk_rejected_from_header() {
        let header = format!("${}\r\n", MAX_BULK_SIZE + 1);
        let result = parse_message(header.as_bytes());

        assert_eq!(
            result,
            Err(ParseError::MessageTooLarge {
                size: MAX_BULK_SIZE + 1,
                max: MAX_BULK_SIZE
            })
        );
    }

    #[test]
    fn test_inline_commands_rejected() {
        assert_eq!(
            parse_message(b"PING\r\n"),
            Err(ParseError::UnknownPrefix(b'P'))
        );
    }

    #[test]
    fn test_nesting_limit() {
        let mut input = Vec::new();
        for _ in 0..=MAX_NESTING_DEPTH + 1 {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":1\r\n");

        assert!(matches!(
            parse_message(&input),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_roundtrip() {
        let original = RespValue::command(["SET", "key", "value"]);
        let serialized = original.serialize();
        let (parsed, _) = parse_message(&serialized).unwrap().unwrap();
        assert_eq!(original, parsed);
    }
}
