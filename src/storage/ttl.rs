//! Expiry Bookkeeping
//!
//! [`TtlManager`] tracks absolute expiry instants per key for drivers whose
//! medium has no native expiry. It knows nothing about values: the owning
//! driver keeps values in its own map and asks the manager whether a key is
//! still live.
//!
//! A key with no entry here has no expiry. A key with an entry is live while
//! its instant is strictly after `now`.
//!
//! The manager is not synchronized on its own. The in-memory driver keeps
//! one manager per shard, behind the same lock as that shard's values, so a
//! value and its expiry are always read and evicted together.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct TtlManager {
    expiries: HashMap<String, DateTime<Utc>>,
}

impl TtlManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the expiry that goes with a fresh `Set` of `key`.
    ///
    /// `None` clears any previous expiry, since a set is a full overwrite.
    pub fn reset(&mut self, key: &str, expires_at: Option<DateTime<Utc>>) {
        match expires_at {
            Some(at) => {
                self.expiries.insert(key.to_string(), at);
            }
            None => {
                self.expiries.remove(key);
            }
        }
    }

    /// Replaces the expiry of `key`.
    pub fn expire(&mut self, key: &str, at: DateTime<Utc>) {
        self.expiries.insert(key.to_string(), at);
    }

    /// Returns true if `key` has no expiry or expires strictly after `now`.
    #[inline]
    pub fn is_live(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.expiries.get(key).map(|at| *at > now).unwrap_or(true)
    }

    /// Returns the recorded expiry of `key`, if any.
    pub fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.expiries.get(key).copied()
    }

    /// Remaining time before `key` expires.
    ///
    /// `None` if the key has no expiry or has already expired.
    pub fn remaining(&self, key: &str, now: DateTime<Utc>) -> Option<Duration> {
        let at = self.expires_at(key)?;
        (at - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Forgets the expiry of `key`.
    pub fn remove(&mut self, key: &str) {
        self.expiries.remove(key);
    }

    /// Removes and returns every key whose expiry is at or before `now`.
    pub fn drain_expired(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .expiries
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.expiries.remove(key);
        }

        expired
    }

    pub fn clear(&mut self) {
        self.expiries.clear();
    }

    /// Number of keys that have an expiry recorded.
    pub fn len(&self) -> usize {
        self.expiries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expiries.is_empty()
    }
}
