//! Storage Registry
//!
//! Maps storage names to live driver instances. The registry is filled once
//! at startup from configuration and then shared read-only (behind an `Arc`)
//! by every request, so lookups need no locking.
//!
//! Requests never create storages: a name that was not registered resolves
//! to `UnknownStorage`.

use crate::error::{KvError, KvResult};
use crate::storage::Driver;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Default, Clone)]
pub struct StorageRegistry {
    drivers: BTreeMap<String, Arc<dyn Driver>>,
}

impl std::fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.drivers.iter().map(|(name, d)| (name, d.kind())))
            .finish()
    }
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `driver`. A second registration of the same name
    /// replaces the first.
    pub fn register(&mut self, name: impl Into<String>, driver: Arc<dyn Driver>) {
        let name = name.into();
        let kind = driver.kind();

        if self.drivers.insert(name.clone(), driver).is_some() {
            warn!(storage = %name, driver = kind, "Storage re-registered, previous driver replaced");
        } else {
            info!(storage = %name, driver = kind, "Storage registered");
        }
    }

    /// Returns the driver bound to `name`.
    pub fn resolve(&self, name: &str) -> KvResult<Arc<dyn Driver>> {
        self.drivers
            .get(name)
            .cloned()
            .ok_or_else(|| KvError::UnknownStorage(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Lets every driver release its resources.
    pub async fn close_all(&self) {
        for (name, driver) in &self.drivers {
            driver.close().await;
            info!(storage = %name, "Storage closed");
        }
    }
}
