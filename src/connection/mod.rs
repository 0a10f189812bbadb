//! Client Connections
//!
//! Each accepted TCP connection gets its own Tokio task that reads batch
//! request frames, hands them to the [`BatchService`](crate::service::BatchService)
//! and writes one reply frame per request, in order.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read bytes  │───>│ Parse RESP  │───>│ Decode frame│      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                     ┌─────────────┐    ┌─────────────┐      │
//! │                     │ Send reply  │<───│ service.call│      │
//! │                     └─────────────┘    └─────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Pipelined requests on one connection are answered in the order they
//! arrived.

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
