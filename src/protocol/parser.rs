//! Incremental Request Frame Decoder
//!
//! Clients send every request as an array of bulk strings:
//!
//! ```text
//! *<N>\r\n
//! $<len>\r\n<len bytes>\r\n      (repeated N times)
//! ```
//!
//! ## How the Decoder Works
//!
//! The decoder looks at everything buffered so far for a connection and returns:
//! - `Ok(Some((request, consumed)))` - one complete frame, `consumed` bytes were used
//! - `Ok(None)` - the frame is incomplete, nothing was consumed
//! - `Err(ProtocolError)` - the client sent something that is not a valid frame
//!
//! Only the header lines (`*<N>` and `$<len>`) are searched for CRLF. Payloads
//! are sliced out by their declared length, so a value may contain any byte,
//! including `\r\n`.

use crate::protocol::types::{prefix, Request, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors raised for malformed request frames. Any of these ends the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A frame or element started with the wrong type byte
    #[error("expected {expected:?}, got {found:?}")]
    UnexpectedByte { expected: char, found: char },

    /// A length field is not a decimal integer
    #[error("invalid length field: {0:?}")]
    InvalidLength(String),

    /// Array length is negative or above the configured maximum
    #[error("invalid multibulk length")]
    InvalidArrayLength(i64),

    /// Bulk length is negative or above the configured maximum
    #[error("invalid bulk length")]
    InvalidBulkLength(i64),

    /// A bulk payload was not followed by CRLF
    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    /// A header line grew past `MAX_HEADER_LEN` without a terminator
    #[error("header line too long")]
    HeaderTooLong,
}

/// Result type for decoding operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Maximum number of elements in one request (same as Redis)
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Longest header line accepted, type byte included, CRLF excluded.
/// A sign and 19 digits fit comfortably.
pub const MAX_HEADER_LEN: usize = 32;

/// One decoded frame and the number of bytes it occupied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Request(Request, usize),

    /// `*0\r\n`: no command to run
    Empty(usize),
}

impl Decoded {
    pub fn consumed(&self) -> usize {
        match self {
            Decoded::Request(_, used) | Decoded::Empty(used) => *used,
        }
    }
}

/// Decoder for request frames.
///
/// # Example
///
/// ```
/// use quickkv::protocol::FrameDecoder;
///
/// let mut decoder = FrameDecoder::new();
/// let buf = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
///
/// let (request, consumed) = decoder.decode(buf).unwrap().unwrap();
/// assert_eq!(consumed, buf.len());
/// assert_eq!(request.args().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_bulk_len: usize,
    max_array_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates a decoder with the default size limits.
    pub fn new() -> Self {
        Self::with_limits(MAX_BULK_LEN, MAX_ARRAY_LEN)
    }

    /// Creates a decoder with custom limits on bulk length and element count.
    pub fn with_limits(max_bulk_len: usize, max_array_len: usize) -> Self {
        Self {
            max_bulk_len,
            max_array_len,
        }
    }

    /// Decodes the next frame at the front of `buf`.
    ///
    /// `Ok(None)` means the frame is incomplete and nothing was consumed.
    /// An empty array (`*0\r\n`) comes back as [`Decoded::Empty`] so the
    /// caller can drop its bytes.
    pub fn decode_next(&mut self, buf: &[u8]) -> ProtocolResult<Option<Decoded>> {
        let (count, mut pos) = match self.read_array_header(buf, 0)? {
            Some(header) => header,
            None => return Ok(None),
        };

        if count == 0 {
            return Ok(Some(Decoded::Empty(pos)));
        }

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            match self.read_bulk(buf, pos)? {
                Some((arg, next)) => {
                    args.push(arg);
                    pos = next;
                }
                None => return Ok(None),
            }
        }

        Ok(Some(Decoded::Request(Request::new(args), pos)))
    }

    /// Attempts to decode one request from the front of `buf`.
    ///
    /// Empty arrays ahead of the request are skipped and counted in its
    /// `consumed`. Use [`decode_next`](Self::decode_next) to consume empty
    /// arrays that no request follows yet.
    pub fn decode(&mut self, buf: &[u8]) -> ProtocolResult<Option<(Request, usize)>> {
        let mut offset = 0;

        loop {
            match self.decode_next(&buf[offset..])? {
                Some(Decoded::Empty(used)) => offset += used,
                Some(Decoded::Request(request, used)) => {
                    return Ok(Some((request, offset + used)))
                }
                None => return Ok(None),
            }
        }
    }

    /// Decodes every complete request in `buf`.
    ///
    /// Returns the requests in arrival order and the number of bytes
    /// consumed, empty arrays included. Trailing partial data is left for the
    /// caller to keep.
    pub fn decode_all(&mut self, buf: &[u8]) -> ProtocolResult<(Vec<Request>, usize)> {
        let mut requests = Vec::new();
        let mut consumed = 0;

        while let Some(decoded) = self.decode_next(&buf[consumed..])? {
            consumed += decoded.consumed();
            if let Decoded::Request(request, _) = decoded {
                requests.push(request);
            }
        }

        Ok((requests, consumed))
    }

    /// Parses `*<count>\r\n` at `start`.
    fn read_array_header(&self, buf: &[u8], start: usize) -> ProtocolResult<Option<(usize, usize)>> {
        let (line, next) = match read_header_line(buf, start, prefix::ARRAY)? {
            Some(header) => header,
            None => return Ok(None),
        };

        let count = parse_length(line)?;
        if count < 0 || count as u64 > self.max_array_len as u64 {
            return Err(ProtocolError::InvalidArrayLength(count));
        }

        Ok(Some((count as usize, next)))
    }

    /// Parses `$<len>\r\n<data>\r\n` at `start`.
    fn read_bulk(&self, buf: &[u8], start: usize) -> ProtocolResult<Option<(Bytes, usize)>> {
        let (line, data_start) = match read_header_line(buf, start, prefix::BULK_STRING)? {
            Some(header) => header,
            None => return Ok(None),
        };

        let length = parse_length(line)?;
        if length < 0 || length as u64 > self.max_bulk_len as u64 {
            return Err(ProtocolError::InvalidBulkLength(length));
        }
        let length = length as usize;

        let data_end = data_start + length;
        let total_needed = data_end + CRLF.len();
        if buf.len() < total_needed {
            return Ok(None);
        }

        if &buf[data_end..total_needed] != CRLF {
            return Err(ProtocolError::MissingCrlf);
        }

        let data = Bytes::copy_from_slice(&buf[data_start..data_end]);
        Ok(Some((data, total_needed)))
    }
}

/// Reads a header line starting at `start` whose first byte must be `sigil`.
///
/// Returns the line body (sigil and CRLF stripped) and the offset just past
/// the CRLF.
fn read_header_line(buf: &[u8], start: usize, sigil: u8) -> ProtocolResult<Option<(&[u8], usize)>> {
    let rest = &buf[start..];
    let Some(&found) = rest.first() else {
        return Ok(None);
    };

    if found != sigil {
        return Err(ProtocolError::UnexpectedByte {
            expected: char::from(sigil),
            found: char::from(found),
        });
    }

    // Only look as far as the longest legal header could reach.
    let window = &rest[..rest.len().min(MAX_HEADER_LEN + CRLF.len())];
    match find_crlf(window) {
        Some(pos) => Ok(Some((&rest[1..pos], start + pos + CRLF.len()))),
        None if window.len() == MAX_HEADER_LEN + CRLF.len() => Err(ProtocolError::HeaderTooLong),
        None => Ok(None),
    }
}

/// Parses a strict decimal integer: an optional `-` followed by ASCII digits.
fn parse_length(line: &[u8]) -> ProtocolResult<i64> {
    let invalid = || ProtocolError::InvalidLength(String::from_utf8_lossy(line).into_owned());

    let (negative, digits) = match line.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, line),
    };

    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    let mut value: i64 = 0;
    for &digit in digits {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(i64::from(digit - b'0')))
            .ok_or_else(invalid)?;
    }

    Ok(if negative { -value } else { value })
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == CRLF)
}

/// Decodes a single request with a default decoder.
pub fn decode_frame(buf: &[u8]) -> ProtocolResult<Option<(Request, usize)>> {
    FrameDecoder::new().decode(buf)
}
