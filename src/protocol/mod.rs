//! Wire Protocol
//!
//! kvplug frames its batch requests in RESP, the Redis Serialization
//! Protocol. The same codec is reused by the Redis driver to talk to its
//! backend.
//!
//! ## Modules
//!
//! - `types`: the `RespValue` enum and serialization
//! - `parser`: incremental parser for incoming RESP data
//! - `frame`: batch request/response frames on top of RESP
//!
//! ## Example
//!
//! ```
//! use kvplug::item::{Method, Request};
//! use kvplug::protocol::{decode_request, encode_request, parse_message};
//!
//! let request = Request::keys("memory", ["a", "b"]);
//! let bytes = encode_request(Method::Has, &request).serialize();
//!
//! let (frame, consumed) = parse_message(&bytes).unwrap().unwrap();
//! assert_eq!(consumed, bytes.len());
//!
//! let (method, decoded) = decode_request(frame).unwrap();
//! assert_eq!(method, Method::Has);
//! assert_eq!(decoded, request);
//! ```

pub mod frame;
pub mod parser;
pub mod types;

pub use frame::{decode_request, decode_response, encode_request, encode_response};
pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
