//! The coordination store interface.
//!
//! Leader election, backend liveness and association sets all hang off a small
//! shared keyspace. The trait keeps the rest of the system independent of the
//! concrete store; the in-memory implementation backs tests and single-node
//! deployments.


use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Errors returned by coordination store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested key does not exist.
    #[error("key not found: {0}")]
    NotFound(String),
    /// The store could not be reached; the operation may be retried.
    #[error("coordination store unavailable")]
    Unavailable,
    /// Any other opaque store failure.
    #[error("coordination store error: {0}")]
    Internal(String),
}

/// A small shared keyspace used for cluster coordination.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Fetch the value at the given key.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Write the value at the given key, creating it if needed.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Delete the given key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List all key/value pairs under the given prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}

/// An in-memory coordination store.
pub struct MemoryCoordinationStore {
    data: Mutex<HashMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
}

impl MemoryCoordinationStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        })
    }

    /// Simulate a store outage; every operation fails until cleared.
    #[allow(dead_code)]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.check_available()?;
        let data = self.data.lock().await;
        data.get(key).cloned().ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.check_available()?;
        let mut data = self.data.lock().await;
        data.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut data = self.data.lock().await;
        data.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        self.check_available()?;
        let data = self.data.lock().await;
        let mut entries: Vec<_> = data
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}
