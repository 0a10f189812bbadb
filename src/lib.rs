//! # kvplug - Pluggable Key-Value Storage with a Batch RPC
//!
//! kvplug serves named storage instances over TCP. Every request carries a
//! batch of items aimed at one instance, and the instance is backed by a
//! pluggable [`Driver`](storage::Driver): an in-memory driver with its own
//! TTL bookkeeping, or a Redis-compatible server with native expiry.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              kvplug                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│   Batch     │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Service    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │ resolve(name)           │
//! │                                               ▼                         │
//! │                     ┌──────────────────────────────────────────────┐    │
//! │                     │             StorageRegistry                  │    │
//! │                     │   "memory-rr" ──> MemoryDriver ◄── Sweeper   │    │
//! │                     │   "redis-rr"  ──> RedisDriver                │    │
//! │                     └──────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Methods
//!
//! | Method       | Items in                | Items out                     |
//! |--------------|-------------------------|-------------------------------|
//! | `kv.Set`     | key, value, [timeout]   | none                          |
//! | `kv.Has`     | key                     | live keys                     |
//! | `kv.MGet`    | key                     | live keys with values         |
//! | `kv.MExpire` | key, timeout            | none                          |
//! | `kv.TTL`     | key                     | key, seconds left, expiry     |
//! | `kv.Delete`  | key                     | none                          |
//! | `kv.Clear`   | ignored                 | none                          |
//!
//! Timeouts are absolute RFC 3339 instants. A key is live while its expiry
//! is strictly in the future.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kvplug::config::Config;
//! use kvplug::connection::ConnectionStats;
//! use kvplug::service::BatchService;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let (registry, _sweepers) = config.build_registry();
//!     let service = BatchService::new(Arc::new(registry));
//!
//!     let listener = TcpListener::bind(config.server.bind_address()).await?;
//!     kvplug::server::serve(
//!         listener,
//!         service,
//!         Arc::new(ConnectionStats::new()),
//!         async { let _ = tokio::signal::ctrl_c().await; },
//!         config.server.shutdown_grace(),
//!     )
//!     .await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod item;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod service;
pub mod storage;

pub use client::KvClient;
pub use error::{KvError, KvResult};
pub use item::{Item, Method, Request, Response};
pub use registry::StorageRegistry;
pub use service::BatchService;
pub use storage::{Driver, MemoryDriver, RedisDriver};

/// The default port kvplug listens on
pub const DEFAULT_PORT: u16 = 6001;

/// The default host kvplug binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of kvplug
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
