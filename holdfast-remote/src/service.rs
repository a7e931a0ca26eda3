//! Remote service abstraction.

use crate::error::RemoteResult;
use crate::filter::Filter;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Table probed by the default [`RemoteService::ping`].
pub const HEALTH_TABLE: &str = "categories";

/// Table-oriented CRUD surface of the remote data service.
///
/// Rows are JSON objects. Implementations must report rate limiting with a
/// [`RemoteError`](crate::RemoteError) that classifies as rate-limited.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Inserts a row and returns it as stored (with its server id).
    async fn insert(&self, table: &str, row: Value) -> RemoteResult<Value>;

    /// Applies `patch` to every row matching `filter`; returns the updated rows.
    async fn update(&self, table: &str, filter: &Filter, patch: Value) -> RemoteResult<Vec<Value>>;

    /// Deletes every row matching `filter`; returns the deleted rows.
    async fn delete(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Value>>;

    /// Returns rows matching `filter`.
    async fn select(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Value>>;

    /// Cheap liveness probe used by pool health checks.
    async fn ping(&self) -> RemoteResult<()> {
        self.select(HEALTH_TABLE, &Filter::new().limit(1))
            .await
            .map(|_| ())
    }
}

/// Opens new handles to the remote service.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Creates a fresh client handle.
    async fn connect(&self) -> RemoteResult<Arc<dyn RemoteService>>;
}
