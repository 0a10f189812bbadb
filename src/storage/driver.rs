//! The Storage Driver Contract
//!
//! Every backend implements [`Driver`]. The semantics are the same whether
//! the medium expires keys natively (Redis) or needs manual sweeping
//! (the in-memory driver):
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | `set`     | Full overwrite. A record without `expires_at` clears any previous expiry. |
//! | `has`     | Subset of keys that are live |
//! | `mget`    | Key/value for live keys, misses omitted |
//! | `mexpire` | Replaces the expiry of live keys, never creates a key |
//! | `ttl`     | Remaining time for live keys that have an expiry |
//! | `delete`  | Removes keys, absent keys are no-ops |
//! | `clear`   | Removes every key |
//!
//! A key whose expiry instant is at or before "now" is absent for every read,
//! even if it is still physically stored.
//!
//! Drivers report failures as `BackendUnavailable` or `BackendInternal` for
//! the whole call. Misses are never errors.

use crate::error::KvResult;
use crate::item::Record;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[async_trait]
pub trait Driver: Send + Sync {
    /// Short backend name for logs ("memory", "redis").
    fn kind(&self) -> &'static str;

    /// Upserts every record. Either all records are applied or an error is returned.
    async fn set(&self, records: Vec<Record>) -> KvResult<()>;

    /// Returns the keys that are currently live.
    async fn has(&self, keys: &[String]) -> KvResult<Vec<String>>;

    /// Returns key/value pairs for keys that are currently live.
    async fn mget(&self, keys: &[String]) -> KvResult<Vec<(String, Bytes)>>;

    /// Sets the expiry of each live key. Absent or expired keys are ignored.
    async fn mexpire(&self, deadlines: Vec<(String, DateTime<Utc>)>) -> KvResult<()>;

    /// Returns the remaining time of each live key that has an expiry.
    async fn ttl(&self, keys: &[String]) -> KvResult<Vec<(String, Duration)>>;

    /// Removes the given keys.
    async fn delete(&self, keys: &[String]) -> KvResult<()>;

    /// Removes every key in the instance.
    async fn clear(&self) -> KvResult<()>;

    /// Releases backend resources. Called once at shutdown.
    async fn close(&self) {}
}
