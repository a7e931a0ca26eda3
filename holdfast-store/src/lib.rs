//! Durable key-value store collaborators.
//!
//! The sync core persists its queue and cache snapshots as opaque JSON blobs
//! through the [`DurableStore`] trait. The storage engine behind it is not
//! the core's concern: the same logic runs against the in-memory store used
//! in tests and the SQLite-backed store used on device.
//!
//! # Example
//!
//! ```
//! use holdfast_store::{DurableStore, JsonStoreExt, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.save_json("settings", &vec![1, 2, 3]).unwrap();
//! let back: Option<Vec<u32>> = store.load_json("settings").unwrap();
//! assert_eq!(back, Some(vec![1, 2, 3]));
//! ```

mod error;
mod memory;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A synchronous string-blob store (`getItem` / `setItem` / `removeItem`).
pub trait DurableStore: Send + Sync {
    /// Reads the blob stored under `key`.
    fn get_item(&self, key: &str) -> StoreResult<Option<String>>;

    /// Replaces the blob stored under `key`.
    fn set_item(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Deletes the blob stored under `key`. Missing keys are not an error.
    fn remove_item(&self, key: &str) -> StoreResult<()>;
}

/// JSON helpers available on every [`DurableStore`].
pub trait JsonStoreExt {
    /// Reads and decodes a JSON blob.
    fn load_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>>;

    /// Encodes and writes a JSON blob.
    fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()>;
}

impl<S: DurableStore + ?Sized> JsonStoreExt for S {
    fn load_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get_item(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set_item(key, &raw)
    }
}
