//! In-Memory Reference Driver
//!
//! A complete [`Driver`] built from a key → value map plus a [`TtlManager`].
//! It is the simplest backend and the reference for how every driver must
//! behave.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      MemoryDriver                           │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────┐            │
//! │  │  Shard 0    │ │  Shard 1    │ │  Shard N    │            │
//! │  │  RwLock     │ │  RwLock     │ │  RwLock     │            │
//! │  │  values     │ │  values     │ │  values     │            │
//! │  │  TtlManager │ │  TtlManager │ │  TtlManager │            │
//! │  └─────────────┘ └─────────────┘ └─────────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ sweep_expired()
//!              ┌─────────────┴─────────────┐
//!              │      ExpirySweeper        │
//!              └───────────────────────────┘
//! ```
//!
//! A shard's values and expiries live under one lock, so a key is never
//! live on one path and gone on another at the same instant, and a sweep
//! can never resurrect a key a client just deleted.
//!
//! Reads only filter expired keys. Writes that touch an expired key drop it
//! on the spot. Everything else is left to the sweeper.

use crate::error::KvResult;
use crate::item::Record;
use crate::storage::driver::Driver;
use crate::storage::ttl::TtlManager;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default number of shards.
pub const DEFAULT_SHARDS: usize = 16;

#[derive(Debug, Default)]
struct Shard {
    values: HashMap<String, Bytes>,
    ttl: TtlManager,
}

impl Shard {
    fn is_live(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.values.contains_key(key) && self.ttl.is_live(key, now)
    }

    fn remove(&mut self, key: &str) -> bool {
        self.ttl.remove(key);
        self.values.remove(key).is_some()
    }
}

/// Snapshot of driver statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Keys physically stored (may include expired keys not yet swept)
    pub keys: u64,
    /// Stored keys that have an expiry
    pub expiring: u64,
    /// Keys evicted by sweeps so far
    pub evicted: u64,
}

/// The in-memory driver.
///
/// # Example
///
/// ```
/// use kvplug::item::Record;
/// use kvplug::storage::{Driver, MemoryDriver};
///
/// # tokio_test::block_on(async {
/// let driver = MemoryDriver::new();
/// driver.set(vec![Record::new("name", "Ariz")]).await.unwrap();
///
/// let found = driver.has(&["name".to_string(), "other".to_string()]).await.unwrap();
/// assert_eq!(found, vec!["name".to_string()]);
/// # });
/// ```
pub struct MemoryDriver {
    shards: Vec<RwLock<Shard>>,
    evicted: AtomicU64,
}

impl std::fmt::Debug for MemoryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDriver")
            .field("shards", &self.shards.len())
            .field("evicted", &self.evicted.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Creates a driver with `count` shards (at least one).
    pub fn with_shards(count: usize) -> Self {
        let shards = (0..count.max(1))
            .map(|_| RwLock::new(Shard::default()))
            .collect();

        Self {
            shards,
            evicted: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    #[inline]
    fn shard(&self, key: &str) -> &RwLock<Shard> {
        &self.shards[self.shard_index(key)]
    }

    /// Evicts every key whose expiry is at or before `now`.
    ///
    /// Returns the number of keys removed.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> u64 {
        let mut evicted = 0u64;

        for shard in &self.shards {
            let mut shard = shard.write();
            for key in shard.ttl.drain_expired(now) {
                if shard.values.remove(&key).is_some() {
                    evicted += 1;
                }
            }
        }

        if evicted > 0 {
            self.evicted.fetch_add(evicted, Ordering::Relaxed);
        }

        evicted
    }

    /// Evicts every key that has expired by now.
    pub fn sweep_expired(&self) -> u64 {
        self.sweep_expired_at(Utc::now())
    }

    /// Number of keys physically stored, expired or not.
    pub fn len(&self) -> u64 {
        self.shards.iter().map(|s| s.read().values.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MemoryStats {
        let mut stats = MemoryStats {
            evicted: self.evicted.load(Ordering::Relaxed),
            ..Default::default()
        };

        for shard in &self.shards {
            let shard = shard.read();
            stats.keys += shard.values.len() as u64;
            stats.expiring += shard.ttl.len() as u64;
        }

        stats
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn set(&self, records: Vec<Record>) -> KvResult<()> {
        for record in records {
            let mut shard = self.shard(&record.key).write();
            shard.ttl.reset(&record.key, record.expires_at);
            shard.values.insert(record.key, record.value);
        }
        Ok(())
    }

    async fn has(&self, keys: &[String]) -> KvResult<Vec<String>> {
        let now = Utc::now();
        Ok(keys
            .iter()
            .filter(|key| self.shard(key).read().is_live(key, now))
            .cloned()
            .collect())
    }

    async fn mget(&self, keys: &[String]) -> KvResult<Vec<(String, Bytes)>> {
        let now = Utc::now();
        let mut found = Vec::with_capacity(keys.len());

        for key in keys {
            let shard = self.shard(key).read();
            if !shard.ttl.is_live(key, now) {
                continue;
            }
            if let Some(value) = shard.values.get(key) {
                found.push((key.clone(), value.clone()));
            }
        }

        Ok(found)
    }

    async fn mexpire(&self, deadlines: Vec<(String, DateTime<Utc>)>) -> KvResult<()> {
        let now = Utc::now();

        for (key, at) in deadlines {
            let mut shard = self.shard(&key).write();
            if !shard.values.contains_key(&key) {
                continue;
            }
            if !shard.ttl.is_live(&key, now) {
                // Expired but not swept yet: it is absent, drop it for real.
                shard.remove(&key);
                self.evicted.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            shard.ttl.expire(&key, at);
        }

        Ok(())
    }

    async fn ttl(&self, keys: &[String]) -> KvResult<Vec<(String, Duration)>> {
        let now = Utc::now();
        let mut found = Vec::new();

        for key in keys {
            let shard = self.shard(key).read();
            if !shard.values.contains_key(key) {
                continue;
            }
            if let Some(remaining) = shard.ttl.remaining(key, now) {
                found.push((key.clone(), remaining));
            }
        }

        Ok(found)
    }

    async fn delete(&self, keys: &[String]) -> KvResult<()> {
        for key in keys {
            self.shard(key).write().remove(key);
        }
        Ok(())
    }

    async fn clear(&self) -> KvResult<()> {
        // Hold every shard before touching any so a clear is all-at-once.
        let mut guards: Vec<_> = self.shards.iter().map(|s| s.write()).collect();
        for shard in guards.iter_mut() {
            shard.values.clear();
            shard.ttl.clear();
        }
        Ok(())
    }
}
