//! Priority request batcher for the Holdfast sync core.
//!
//! Outgoing calls are queued with a priority, cut into batches of at most
//! `max_batch_size`, and executed with per-item isolation so one failure
//! never fails its batch-mates. Transient failures are retried with
//! exponential backoff inside a bounded loop. A rate-limit failure from any
//! item opens a global breaker: no new batch starts until the cooldown has
//! elapsed, after which the affected request is retried.
//!
//! ```no_run
//! use holdfast_batch::{BatcherConfig, Priority, RequestBatcher, RequestOptions};
//! use holdfast_remote::RemoteError;
//!
//! # async fn demo() {
//! let batcher = RequestBatcher::new(BatcherConfig::default());
//! let answer = batcher
//!     .add(|| async { Ok::<_, RemoteError>(42) }, RequestOptions::new(Priority::High))
//!     .await;
//! assert_eq!(answer.ok(), Some(42));
//! # }
//! ```

mod batcher;
mod config;
mod error;
mod request;

pub use batcher::{BatchEvent, BatchId, BatcherStats, RequestBatcher};
pub use config::BatcherConfig;
pub use error::{BatchError, BatchResult};
pub use request::{Priority, RequestHandle, RequestId, RequestOptions};
