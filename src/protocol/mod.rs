//! Wire Protocol
//!
//! Requests arrive as RESP arrays of bulk strings; replies go out as simple
//! strings, errors, or the null bulk string.
//!
//! ## Modules
//!
//! - `types`: `Request`, `Reply` and the reply encoder
//! - `parser`: incremental, length-prefixed frame decoder
//!
//! ## Example
//!
//! ```
//! use quickkv::protocol::{decode_frame, Reply};
//!
//! let data = b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n";
//! let (request, consumed) = decode_frame(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//! assert_eq!(request.args()[0].as_ref(), b"hi");
//!
//! assert_eq!(Reply::ok().encode(), b"+OK\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{decode_frame, Decoded, FrameDecoder, ProtocolError, ProtocolResult};
pub use types::{Reply, Request};
