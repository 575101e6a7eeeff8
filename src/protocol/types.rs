//! Request and Reply Types
//!
//! A [`Request`] is what the frame decoder hands to the dispatcher: an array
//! of binary-safe arguments, the first one being the command name.
//! A [`Reply`] is what the dispatcher hands back, ready to be encoded.
//!
//! ## Reply Wire Format
//!
//! - Simple string: `+OK\r\n`
//! - Error: `-ERR unknown command\r\n`
//! - Nil: `$-1\r\n`
//! - Bulk: `+hello\r\n`, or `$7\r\nhel\r\nlo\r\n` when the payload holds CR or LF
//!
//! Bulk payloads use simple-string framing so plain values look exactly like
//! the replies existing clients of this server expect. A payload that would
//! break that framing is sent as a length-prefixed bulk string instead.

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// Prefix put in front of every error message on the wire.
const ERROR_KIND: &[u8] = b"ERR ";

/// One decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    args: Vec<Bytes>,
}

impl Request {
    pub fn new(args: Vec<Bytes>) -> Self {
        Self { args }
    }

    /// The command name as sent by the client (case preserved).
    pub fn name(&self) -> Option<&Bytes> {
        self.args.first()
    }

    /// Arguments following the command name.
    pub fn args(&self) -> &[Bytes] {
        self.args.get(1..).unwrap_or(&[])
    }

    /// Number of elements in the frame, command name included.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn into_parts(self) -> Vec<Bytes> {
        self.args
    }
}

impl<T: Into<Bytes>> FromIterator<T> for Request {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// A reply produced by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Status reply such as `OK` or `PONG`.
    Simple(String),

    /// Binary payload (ECHO and GET results).
    Bulk(Bytes),

    /// Absent value: the null bulk string `$-1\r\n`.
    Nil,

    /// Error message, sent as `-ERR <message>\r\n`.
    Error(String),
}

impl Reply {
    pub fn simple(s: impl Into<String>) -> Self {
        Reply::Simple(s.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    /// Creates an error reply. The `ERR ` prefix is added by the encoder.
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error(message.into())
    }

    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    pub fn pong() -> Self {
        Reply::Simple("PONG".to_string())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Encodes the reply into its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encodes the reply, appending to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => {
                buf.push(prefix::SIMPLE_STRING);
                push_line_safe(buf, s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(data) if has_line_break(data) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(data) => {
                buf.push(prefix::SIMPLE_STRING);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Reply::Nil => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            Reply::Error(message) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(ERROR_KIND);
                push_line_safe(buf, message.as_bytes());
                buf.extend_from_slice(CRLF);
            }
        }
    }
}

#[inline]
fn has_line_break(data: &[u8]) -> bool {
    data.iter().any(|&b| b == b'\r' || b == b'\n')
}

/// Appends a single-line payload, replacing CR and LF with spaces.
fn push_line_safe(buf: &mut Vec<u8>, line: &[u8]) {
    buf.extend(line.iter().map(|&b| match b {
        b'\r' | b'\n' => b' ',
        other => other,
    }));
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Simple(s) => write!(f, "{}", s),
            Reply::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Reply::Nil => write!(f, "(nil)"),
            Reply::Error(s) => write!(f, "(error) ERR {}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_encode() {
        assert_eq!(Reply::simple("OK").encode(), b"+OK\r\n");
        assert_eq!(Reply::pong().encode(), b"+PONG\r\n");
    }

    #[test]
    fn test_error_encode() {
        assert_eq!(
            Reply::error("unknown command").encode(),
            b"-ERR unknown command\r\n"
        );
        assert_eq!(
            Reply::error("invalid expire time in 'set' command").encode(),
            b"-ERR invalid expire time in 'set' command\r\n"
        );
    }

    #[test]
    fn test_error_message_line_breaks_are_flattened() {
        assert_eq!(
            Reply::error("bad\r\nframe").encode(),
            b"-ERR bad  frame\r\n"
        );
    }

    #[test]
    fn test_bulk_uses_simple_framing() {
        assert_eq!(Reply::bulk(Bytes::from("bar")).encode(), b"+bar\r\n");
        assert_eq!(Reply::bulk(Bytes::new()).encode(), b"+\r\n");
    }

    #[test]
    fn test_bulk_with_crlf_is_length_prefixed() {
        let reply = Reply::bulk(Bytes::from_static(b"hel\r\nlo"));
        assert_eq!(reply.encode(), b"$7\r\nhel\r\nlo\r\n");

        let lone_newline = Reply::bulk(Bytes::from_static(b"a\nb"));
        assert_eq!(lone_newline.encode(), b"$3\r\na\nb\r\n");
    }

    #[test]
    fn test_bulk_binary_payload() {
        let reply = Reply::bulk(Bytes::from_static(b"hel\x00o"));
        assert_eq!(reply.encode(), b"+hel\x00o\r\n");
    }

    #[test]
    fn test_nil_encode() {
        assert_eq!(Reply::Nil.encode(), b"$-1\r\n");
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = Vec::new();
        Reply::ok().encode_into(&mut buf);
        Reply::Nil.encode_into(&mut buf);
        assert_eq!(buf, b"+OK\r\n$-1\r\n");
    }

    #[test]
    fn test_request_accessors() {
        let request: Request = ["SET", "key", "value"].into_iter().collect();
        assert_eq!(request.name(), Some(&Bytes::from("SET")));
        assert_eq!(request.args(), &[Bytes::from("key"), Bytes::from("value")]);
        assert_eq!(request.len(), 3);

        let empty = Request::new(Vec::new());
        assert!(empty.is_empty());
        assert!(empty.name().is_none());
        assert!(empty.args().is_empty());
    }
}
