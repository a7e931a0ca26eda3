//! In-memory store.

use crate::{DurableStore, StoreError, StoreResult};
use holdfast_types::lock;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// A [`DurableStore`] backed by a `HashMap`. Contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
    read_only: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with [`StoreError::Unavailable`].
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Returns all keys currently stored.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.items).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is read-only".into()));
        }
        Ok(())
    }
}

impl DurableStore for MemoryStore {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(lock(&self.items).get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_writable()?;
        lock(&self.items).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StoreResult<()> {
        self.check_writable()?;
        lock(&self.items).remove(key);
        Ok(())
    }
}
