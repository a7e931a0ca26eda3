//! Bounded pool of remote-service client handles.
//!
//! The pool keeps between `min_connections` and `max_connections` handles
//! open, hands idle ones out to callers, and retires connections that sit
//! idle too long or keep failing. A periodic health check pings idle
//! handles and tops the pool back up to its minimum.
//!
//! ```no_run
//! use holdfast_pool::{ConnectionPool, PoolConfig};
//! use holdfast_remote::{Filter, MemoryConnector, MemoryRemote};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), holdfast_pool::PoolError> {
//! let connector = Arc::new(MemoryConnector::new(MemoryRemote::new()));
//! let pool = ConnectionPool::new(PoolConfig::default(), connector);
//! pool.initialize().await?;
//!
//! let rows = pool
//!     .with_connection(|conn| async move { conn.select("goals", &Filter::new()).await })
//!     .await?;
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod pool;

pub use config::{MIN_POLL_INTERVAL, PoolConfig};
pub use error::{PoolError, PoolResult};
pub use pool::{
    Connection, ConnectionId, ConnectionInfo, ConnectionPool, ConnectionStatus, HealthReport,
    PoolEvent, PoolStatus, RetireReason,
};
