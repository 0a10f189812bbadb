//! Batch Operation Service
//!
//! The service sits between the wire and the drivers: it takes a decoded
//! [`Method`](crate::item::Method) and [`Request`](crate::item::Request),
//! routes the request to the named storage and returns a
//! [`Response`](crate::item::Response) or exactly one error.

mod batch;

pub use batch::{BatchService, ServiceStats};
