//! Storage Drivers
//!
//! Every storage instance is a [`Driver`]: an async trait object the batch
//! service calls with whole batches. Two drivers ship with kvplug.
//!
//! ```text
//!                 ┌──────────────────────────┐
//!                 │      dyn Driver          │
//!                 └────────────┬─────────────┘
//!                 ┌────────────┴─────────────┐
//!       ┌─────────┴─────────┐      ┌─────────┴─────────┐
//!       │   MemoryDriver    │      │   RedisDriver     │
//!       │ shards + TTL map  │      │ RESP over TCP     │
//!       └─────────┬─────────┘      └───────────────────┘
//!                 ▲
//!       ┌─────────┴─────────┐
//!       │  ExpirySweeper    │
//!       │ (Tokio task)      │
//!       └───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use kvplug::item::Record;
//! use kvplug::storage::{Driver, MemoryDriver};
//!
//! # tokio_test::block_on(async {
//! let driver = MemoryDriver::new();
//! driver.set(vec![Record::new("name", "Ariz")]).await.unwrap();
//!
//! let values = driver.mget(&["name".to_string()]).await.unwrap();
//! assert_eq!(values[0].1, "Ariz");
//! # });
//! ```

pub mod driver;
pub mod memory;
pub mod redis;
pub mod sweeper;
pub mod ttl;

pub use driver::Driver;
pub use memory::{MemoryDriver, MemoryStats, DEFAULT_SHARDS};
pub use redis::{RedisConfig, RedisDriver};
pub use sweeper::{ExpirySweeper, DEFAULT_SWEEP_INTERVAL};
pub use ttl::TtlManager;
