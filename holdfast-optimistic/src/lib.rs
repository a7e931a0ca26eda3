//! Optimistic update manager for the Holdfast sync core.
//!
//! Every local mutation is recorded as an [`OptimisticUpdate`] the moment
//! the user makes it, so reads can show the change before the server has
//! seen it. [`OptimisticManager::apply_updates`] replays the live updates
//! for a table over a server snapshot in timestamp order. When the queue
//! reports the outcome, updates are confirmed (and remapped from their
//! temporary id to the server's) or failed. A periodic sweep fails updates
//! that waited too long and purges settled ones.
//!
//! ```
//! use holdfast_optimistic::{OptimisticConfig, OptimisticManager};
//! use serde_json::json;
//!
//! let manager = OptimisticManager::new(OptimisticConfig::default());
//! let created = manager.create_optimistic_insert("goals", json!({"title": "Run"}));
//! assert!(created.id.is_temporary());
//!
//! let rows = manager.apply_updates("goals", Vec::new());
//! assert_eq!(rows[0]["title"], "Run");
//!
//! manager.confirm_update(&created.id, Some(&json!({"id": "g1", "title": "Run"})));
//! assert_eq!(manager.resolve_id(&created.id).as_str(), "g1");
//! ```

mod alias;
mod config;
mod manager;
mod update;

pub use alias::AliasTable;
pub use config::{MIN_SWEEP_INTERVAL, OptimisticConfig};
pub use manager::{OptimisticEvent, OptimisticManager, PENDING_TIMEOUT_ERROR, SweepReport};
pub use update::{OptimisticOp, OptimisticUpdate, UpdateStatus};
