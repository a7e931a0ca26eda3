//! Sync context for the Holdfast sync core.
//!
//! [`SyncContext`] is the one place the five components are constructed and
//! wired together. Callers hold a context (or a clone of it) instead of
//! reaching for process-wide instances:
//!
//! - mutations are recorded optimistically and appended to the durable queue
//! - [`SyncContext::sync`] replays the queue through the batcher on pooled
//!   connections, then confirms or fails the optimistic updates and drops the
//!   affected cache entries
//! - reads go through the query cache and come back with outstanding
//!   optimistic updates projected over them
//!
//! # Example
//!
//! ```
//! use holdfast_core::SyncContext;
//! use holdfast_remote::{Filter, MemoryConnector, MemoryRemote};
//! use holdfast_store::MemoryStore;
//! use holdfast_types::EntityKind;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let remote = MemoryRemote::new();
//! let ctx = SyncContext::builder(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryConnector::new(remote.clone())),
//! )
//! .build()?;
//!
//! ctx.create("u1", EntityKind::Goal, json!({"title": "Read more"}))?;
//! let report = ctx.sync("u1").await?;
//! assert_eq!(report.synced, 1);
//!
//! let goals = ctx.read("u1", EntityKind::Goal, Filter::new()).await?;
//! assert_eq!(goals[0]["title"], "Read more");
//! ctx.shutdown()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
mod error;

pub use config::{DEFAULT_CACHE_STORAGE_KEY, HoldfastConfig};
pub use context::{BackgroundTasks, ContextStatus, SyncContext, SyncContextBuilder, SyncReport};
pub use error::{CoreError, CoreResult};
