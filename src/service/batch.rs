//! Batch Operation Service
//!
//! For every request the service:
//!
//! 1. resolves the storage name through the registry,
//! 2. validates every item for the method (the whole request fails on the
//!    first bad item, before the driver is touched),
//! 3. invokes the driver once with the whole batch,
//! 4. turns the driver's answer into a [`Response`].
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      BatchService                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  resolve()  │───>│ validate()  │───>│  driver.*   │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                          Response           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads (`Has`, `MGet`, `TTL`) answer in request order with repeated keys
//! collapsed. Writes answer with an empty acknowledgement.

use crate::error::{KvError, KvResult};
use crate::item::{format_timestamp, parse_timestamp, Item, Method, Record, Request, Response};
use crate::registry::StorageRegistry;
use crate::storage::Driver;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Request counters.
#[derive(Debug, Default)]
pub struct ServiceStats {
    /// Requests received
    pub requests: AtomicU64,
    /// Requests answered with an error
    pub failures: AtomicU64,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn request_received(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn request_failed(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Executes batch requests against registered storages.
///
/// Cheap to clone: every connection gets its own handle.
#[derive(Clone)]
pub struct BatchService {
    registry: Arc<StorageRegistry>,
    deadline: Option<Duration>,
    stats: Arc<ServiceStats>,
}

impl BatchService {
    pub fn new(registry: Arc<StorageRegistry>) -> Self {
        Self {
            registry,
            deadline: None,
            stats: Arc::new(ServiceStats::new()),
        }
    }

    /// Abandons any request that runs longer than `deadline`.
    ///
    /// Mutations a driver already applied stay applied.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn registry(&self) -> &StorageRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &ServiceStats {
        &self.stats
    }

    /// Executes one request.
    pub async fn call(&self, method: Method, request: Request) -> KvResult<Response> {
        self.stats.request_received();

        let storage = request.storage.clone();
        let items = request.items.len();

        let result = match self.deadline {
            Some(limit) => tokio::time::timeout(limit, self.dispatch(method, request))
                .await
                .unwrap_or(Err(KvError::DeadlineExceeded(limit))),
            None => self.dispatch(method, request).await,
        };

        match &result {
            Ok(_) if method.is_write() => debug!(
                method = %method,
                storage = %storage,
                items = items,
                "Write applied"
            ),
            Ok(response) => trace!(
                method = %method,
                storage = %storage,
                items = items,
                returned = response.len(),
                "Read completed"
            ),
            Err(e) => {
                self.stats.request_failed();
                match e {
                    KvError::BackendUnavailable(_) | KvError::BackendInternal(_) => {
                        warn!(method = %method, storage = %storage, error = %e, "Driver failed")
                    }
                    _ => debug!(method = %method, storage = %storage, error = %e, "Request rejected"),
                }
            }
        }

        result
    }

    async fn dispatch(&self, method: Method, request: Request) -> KvResult<Response> {
        let driver = self.registry.resolve(&request.storage)?;
        let driver = driver.as_ref();
        let items = request.items;

        match method {
            Method::Set => self.set(driver, items).await,
            Method::Has => self.has(driver, items).await,
            Method::MGet => self.mget(driver, items).await,
            Method::MExpire => self.mexpire(driver, items).await,
            Method::Ttl => self.ttl(driver, items).await,
            Method::Delete => self.delete(driver, items).await,
            Method::Clear => self.clear(driver).await,
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// kv.Set: key, value, optional timeout
    async fn set(&self, driver: &dyn Driver, items: Vec<Item>) -> KvResult<Response> {
        let mut records = Vec::with_capacity(items.len());

        for (position, item) in items.into_iter().enumerate() {
            check_key(&item.key, position)?;

            let expires_at = match item.timeout.as_deref() {
                Some(t) if !t.is_empty() => Some(parse_timestamp(&item.key, t)?),
                _ => None,
            };

            records.push(Record {
                key: item.key,
                value: item.value,
                expires_at,
            });
        }

        driver.set(records).await?;
        Ok(Response::ack())
    }

    /// kv.MExpire: key, timeout (required)
    async fn mexpire(&self, driver: &dyn Driver, items: Vec<Item>) -> KvResult<Response> {
        let mut deadlines: Vec<(String, DateTime<Utc>)> = Vec::with_capacity(items.len());

        for (position, item) in items.into_iter().enumerate() {
            check_key(&item.key, position)?;

            let at = match item.timeout.as_deref() {
                Some(t) if !t.is_empty() => parse_timestamp(&item.key, t)?,
                _ => {
                    return Err(KvError::InvalidItem(format!(
                        "missing timeout for key '{}'",
                        item.key
                    )))
                }
            };

            deadlines.push((item.key, at));
        }

        driver.mexpire(deadlines).await?;
        Ok(Response::ack())
    }

    /// kv.Delete: key
    async fn delete(&self, driver: &dyn Driver, items: Vec<Item>) -> KvResult<Response> {
        let keys = keys_of(items)?;
        driver.delete(&keys).await?;
        Ok(Response::ack())
    }

    /// kv.Clear: items are ignored
    async fn clear(&self, driver: &dyn Driver) -> KvResult<Response> {
        driver.clear().await?;
        Ok(Response::ack())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// kv.Has: key → live keys
    async fn has(&self, driver: &dyn Driver, items: Vec<Item>) -> KvResult<Response> {
        let keys = keys_of(items)?;
        let live: HashSet<String> = driver.has(&keys).await?.into_iter().collect();

        Ok(Response {
            items: keys
                .into_iter()
                .filter(|k| live.contains(k))
                .map(Item::key)
                .collect(),
        })
    }

    /// kv.MGet: key → key + value for live keys
    async fn mget(&self, driver: &dyn Driver, items: Vec<Item>) -> KvResult<Response> {
        let keys = keys_of(items)?;
        let mut found: HashMap<String, Bytes> = driver.mget(&keys).await?.into_iter().collect();

        Ok(Response {
            items: keys
                .into_iter()
                .filter_map(|k| {
                    let value = found.remove(&k)?;
                    Some(Item::new(k, value))
                })
                .collect(),
        })
    }

    /// kv.TTL: key → key + remaining time for live keys that have an expiry
    async fn ttl(&self, driver: &dyn Driver, items: Vec<Item>) -> KvResult<Response> {
        let keys = keys_of(items)?;
        let mut found: HashMap<String, Duration> = driver.ttl(&keys).await?.into_iter().collect();
        let now = Utc::now();

        Ok(Response {
            items: keys
                .into_iter()
                .filter_map(|k| {
                    let remaining = found.remove(&k)?;
                    Some(ttl_item(k, remaining, now))
                })
                .collect(),
        })
    }
}

/// Builds a TTL reply item: value = remaining whole seconds (rounded up),
/// timeout = the absolute expiry instant.
fn ttl_item(key: String, remaining: Duration, now: DateTime<Utc>) -> Item {
    let secs = remaining.as_millis().div_ceil(1000);

    // Stored instants are whole seconds; round off the clock drift
    let expires_ms = now.timestamp_millis() + remaining.as_millis() as i64;
    let expires_at = DateTime::from_timestamp((expires_ms + 500).div_euclid(1000), 0).unwrap_or(now);

    Item {
        key,
        value: Bytes::from(secs.to_string()),
        timeout: Some(format_timestamp(expires_at)),
    }
}

fn check_key(key: &str, position: usize) -> KvResult<()> {
    if key.is_empty() {
        return Err(KvError::InvalidItem(format!(
            "empty key at position {}",
            position
        )));
    }
    Ok(())
}

/// Validated keys of a read/delete batch, repeated keys collapsed.
fn keys_of(items: Vec<Item>) -> KvResult<Vec<String>> {
    let mut seen = HashSet::with_capacity(items.len());
    let mut keys = Vec::with_capacity(items.len());

    for (position, item) in items.into_iter().enumerate() {
        check_key(&item.key, position)?;
        if seen.insert(item.key.clone()) {
            keys.push(item.key);
        }
    }

    Ok(keys)
}
