//! The connection pool.

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use futures::future::join_all;
use holdfast_remote::{RemoteConnector, RemoteError, RemoteResult, RemoteService};
use holdfast_types::{Observers, lock};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Identifier of a pooled connection, unique within one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle status of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Available to `acquire`.
    Idle,
    /// Handed out to a caller (or being pinged).
    Busy,
    /// Failed recently; withheld until a health check pings it back.
    Error,
}

/// Why a connection left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireReason {
    TooManyErrors,
    IdleTimeout,
    Shutdown,
}

/// Outcome of one health-check pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub pinged: usize,
    pub failed: usize,
    pub retired: usize,
    pub created: usize,
    pub total: usize,
}

/// Observability events emitted by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    Created { id: ConnectionId },
    Acquired { id: ConnectionId },
    Released { id: ConnectionId },
    ErrorMarked { id: ConnectionId, errors: u32 },
    Retired { id: ConnectionId, reason: RetireReason },
    ReplacementFailed { error: String },
    HealthCheck(HealthReport),
}

/// Snapshot of a pool's occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub error: usize,
    /// Connections being opened right now (slots already reserved).
    pub creating: usize,
}

/// Read-only view of one pooled connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub status: ConnectionStatus,
    pub last_used: Instant,
    pub created_at: Instant,
    pub usage_count: u64,
    pub errors: u32,
}

struct PooledConnection {
    id: ConnectionId,
    handle: Arc<dyn RemoteService>,
    status: ConnectionStatus,
    last_used: Instant,
    created_at: Instant,
    usage_count: u64,
    errors: u32,
}

impl PooledConnection {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            status: self.status,
            last_used: self.last_used,
            created_at: self.created_at,
            usage_count: self.usage_count,
            errors: self.errors,
        }
    }
}

/// A connection checked out of the pool.
///
/// Hand it back with [`ConnectionPool::release`] or
/// [`ConnectionPool::mark_error`]. Dereferences to the remote service.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    handle: Arc<dyn RemoteService>,
}

impl Connection {
    /// The pool-assigned id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// A shared handle to the underlying client.
    pub fn handle(&self) -> Arc<dyn RemoteService> {
        Arc::clone(&self.handle)
    }
}

impl Deref for Connection {
    type Target = dyn RemoteService;

    fn deref(&self) -> &Self::Target {
        &*self.handle
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

#[derive(Default)]
struct PoolState {
    connections: Vec<PooledConnection>,
    creating: usize,
    next_id: u64,
}

impl PoolState {
    fn size(&self) -> usize {
        self.connections.len() + self.creating
    }

    fn find_mut(&mut self, id: ConnectionId) -> Option<&mut PooledConnection> {
        self.connections.iter_mut().find(|c| c.id == id)
    }

    fn remove(&mut self, id: ConnectionId) -> Option<PooledConnection> {
        let pos = self.connections.iter().position(|c| c.id == id)?;
        Some(self.connections.remove(pos))
    }
}

enum Checkout {
    Ready(Connection),
    Create,
    Exhausted,
}

struct PoolInner {
    config: PoolConfig,
    connector: Arc<dyn RemoteConnector>,
    state: Mutex<PoolState>,
    events: Observers<PoolEvent>,
    is_initializing: AtomicBool,
    closed: AtomicBool,
}

/// A bounded pool of remote-service handles. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

/// Returns a reserved creation slot if the create never completed.
struct CreateSlot<'a> {
    pool: &'a PoolInner,
    armed: bool,
}

impl Drop for CreateSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = lock(&self.pool.state);
            state.creating = state.creating.saturating_sub(1);
        }
    }
}

/// Releases a connection on drop unless it was already settled.
struct Lease<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl Lease<'_> {
    fn settle(&mut self, ok: bool) {
        if let Some(conn) = self.conn.take() {
            if ok {
                self.pool.release(conn);
            } else {
                self.pool.mark_error(conn);
            }
        }
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.settle(true);
    }
}

impl ConnectionPool {
    /// Creates an empty pool. Call [`initialize`](Self::initialize) to open
    /// the minimum number of connections up front.
    pub fn new(config: PoolConfig, connector: Arc<dyn RemoteConnector>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config: config.normalized(),
                connector,
                state: Mutex::new(PoolState::default()),
                events: Observers::new("connection-pool"),
                is_initializing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Registers a listener for pool events.
    pub fn subscribe<F>(&self, listener: F) -> holdfast_types::ListenerId
    where
        F: Fn(&PoolEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    /// Opens connections until the pool holds `min_connections`.
    ///
    /// Concurrent calls while one is running return immediately.
    pub async fn initialize(&self) -> PoolResult<()> {
        if self
            .inner
            .is_initializing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("pool initialization already in progress");
            return Ok(());
        }

        let result = self.fill_to_min().await;
        self.inner.is_initializing.store(false, Ordering::SeqCst);

        let created = result?;
        info!(created, min = self.inner.config.min_connections, "connection pool initialized");
        Ok(())
    }

    /// Checks out a connection, opening one or waiting if necessary.
    pub async fn acquire(&self) -> PoolResult<Connection> {
        let timeout = self.inner.config.acquire_timeout;
        let poll = self.inner.config.acquire_poll_interval;
        let deadline = Instant::now() + timeout;

        loop {
            if self.is_closed() {
                return Err(PoolError::Closed);
            }

            match self.try_checkout() {
                Checkout::Ready(conn) => {
                    self.inner.events.emit(&PoolEvent::Acquired { id: conn.id });
                    return Ok(conn);
                }
                Checkout::Create => {
                    let conn = self
                        .open_reserved(ConnectionStatus::Busy)
                        .await
                        .map_err(PoolError::Connect)?;
                    self.inner.events.emit(&PoolEvent::Acquired { id: conn.id });
                    return Ok(conn);
                }
                Checkout::Exhausted => {}
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(waited_ms = timeout.as_millis() as u64, "connection pool exhausted");
                return Err(PoolError::AcquireTimeout { waited: timeout });
            }
            sleep(poll.min(deadline - now)).await;
        }
    }

    /// Returns a connection to the idle set.
    pub fn release(&self, conn: Connection) {
        let found = {
            let mut state = lock(&self.inner.state);
            match state.find_mut(conn.id) {
                Some(pooled) => {
                    pooled.status = ConnectionStatus::Idle;
                    pooled.last_used = Instant::now();
                    true
                }
                None => false,
            }
        };

        if found {
            self.inner.events.emit(&PoolEvent::Released { id: conn.id });
        } else {
            debug!(id = %conn.id, "released connection no longer in pool");
        }
    }

    /// Records a failure on a connection.
    ///
    /// At `max_errors` the connection is retired and a replacement is opened
    /// in the background; below that it is withheld until the next health
    /// check pings it successfully.
    pub fn mark_error(&self, conn: Connection) {
        let max_errors = self.inner.config.max_errors;
        let (errors, retired, replace) = {
            let mut state = lock(&self.inner.state);
            let Some(pooled) = state.find_mut(conn.id) else {
                debug!(id = %conn.id, "errored connection no longer in pool");
                return;
            };
            pooled.errors += 1;
            pooled.last_used = Instant::now();
            let errors = pooled.errors;

            if errors >= max_errors {
                state.remove(conn.id);
                let replace = !self.is_closed() && self.reserve_slot(&mut state);
                (errors, true, replace)
            } else {
                pooled.status = ConnectionStatus::Error;
                (errors, false, false)
            }
        };

        self.inner.events.emit(&PoolEvent::ErrorMarked { id: conn.id, errors });

        if retired {
            warn!(id = %conn.id, errors, "retiring connection after repeated errors");
            self.inner.events.emit(&PoolEvent::Retired {
                id: conn.id,
                reason: RetireReason::TooManyErrors,
            });
        }

        if replace {
            let pool = self.clone();
            tokio::spawn(async move {
                if let Err(e) = pool.open_reserved(ConnectionStatus::Idle).await {
                    warn!(error = %e, "failed to open replacement connection");
                    pool.inner
                        .events
                        .emit(&PoolEvent::ReplacementFailed { error: e.to_string() });
                }
            });
        }
    }

    /// Runs `f` on a pooled connection.
    ///
    /// The connection is released when `f` succeeds and marked as errored
    /// when it fails, exactly once either way. If the returned future is
    /// dropped before `f` finishes, the connection is released.
    pub async fn with_connection<T, F, Fut>(&self, f: F) -> PoolResult<T>
    where
        F: FnOnce(Arc<dyn RemoteService>) -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let conn = self.acquire().await?;
        let handle = conn.handle();
        let mut lease = Lease {
            pool: self,
            conn: Some(conn),
        };

        let result = f(handle).await;
        lease.settle(result.is_ok());
        result.map_err(PoolError::Remote)
    }

    /// Pings idle and errored connections, retires stale ones, and tops the
    /// pool back up to `min_connections`.
    pub async fn health_check(&self) -> HealthReport {
        let mut report = HealthReport::default();
        if self.is_closed() {
            return report;
        }

        let probes: Vec<(ConnectionId, Arc<dyn RemoteService>)> = {
            let mut state = lock(&self.inner.state);
            state
                .connections
                .iter_mut()
                .filter(|c| c.status != ConnectionStatus::Busy)
                .map(|c| {
                    c.status = ConnectionStatus::Busy;
                    (c.id, Arc::clone(&c.handle))
                })
                .collect()
        };
        report.pinged = probes.len();

        let results = join_all(probes.into_iter().map(|(id, handle)| async move {
            (id, handle.ping().await)
        }))
        .await;

        let mut retired = Vec::new();
        {
            let max_errors = self.inner.config.max_errors;
            let mut state = lock(&self.inner.state);
            for (id, result) in results {
                let Some(pooled) = state.find_mut(id) else {
                    continue;
                };
                match result {
                    Ok(()) => pooled.status = ConnectionStatus::Idle,
                    Err(e) => {
                        report.failed += 1;
                        pooled.errors += 1;
                        debug!(%id, errors = pooled.errors, error = %e, "health check ping failed");
                        if pooled.errors >= max_errors {
                            state.remove(id);
                            retired.push((id, RetireReason::TooManyErrors));
                        } else {
                            pooled.status = ConnectionStatus::Error;
                        }
                    }
                }
            }

            let min = self.inner.config.min_connections;
            let idle_timeout = self.inner.config.idle_timeout;
            let now = Instant::now();
            let mut stale: Vec<(ConnectionId, Instant)> = state
                .connections
                .iter()
                .filter(|c| {
                    c.status == ConnectionStatus::Idle
                        && now.saturating_duration_since(c.last_used) > idle_timeout
                })
                .map(|c| (c.id, c.last_used))
                .collect();
            stale.sort_by_key(|(_, last_used)| *last_used);

            for (id, _) in stale {
                if state.connections.len() <= min {
                    break;
                }
                state.remove(id);
                retired.push((id, RetireReason::IdleTimeout));
            }
        }

        report.retired = retired.len();
        for (id, reason) in retired {
            debug!(%id, ?reason, "retired connection");
            self.inner.events.emit(&PoolEvent::Retired { id, reason });
        }

        match self.fill_to_min().await {
            Ok(created) => report.created = created,
            Err(e) => warn!(error = %e, "health check could not restore minimum pool size"),
        }

        report.total = lock(&self.inner.state).connections.len();
        debug!(?report, "pool health check complete");
        self.inner.events.emit(&PoolEvent::HealthCheck(report.clone()));
        report
    }

    /// Spawns the periodic health check.
    pub fn start_health_check(&self) -> JoinHandle<()> {
        let pool = self.clone();
        let period = self.inner.config.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if pool.is_closed() {
                    break;
                }
                pool.health_check().await;
            }
        })
    }

    /// Closes the pool; subsequent acquires fail with [`PoolError::Closed`].
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let drained: Vec<ConnectionId> = {
            let mut state = lock(&self.inner.state);
            state.connections.drain(..).map(|c| c.id).collect()
        };
        for id in drained {
            self.inner.events.emit(&PoolEvent::Retired {
                id,
                reason: RetireReason::Shutdown,
            });
        }
        info!("connection pool shut down");
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Current occupancy.
    pub fn status(&self) -> PoolStatus {
        let state = lock(&self.inner.state);
        let mut status = PoolStatus {
            total: state.connections.len(),
            creating: state.creating,
            ..PoolStatus::default()
        };
        for c in &state.connections {
            match c.status {
                ConnectionStatus::Idle => status.idle += 1,
                ConnectionStatus::Busy => status.busy += 1,
                ConnectionStatus::Error => status.error += 1,
            }
        }
        status
    }

    /// Number of open connections.
    pub fn size(&self) -> usize {
        lock(&self.inner.state).connections.len()
    }

    /// Snapshot of every pooled connection.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        lock(&self.inner.state)
            .connections
            .iter()
            .map(PooledConnection::info)
            .collect()
    }

    fn try_checkout(&self) -> Checkout {
        let mut state = lock(&self.inner.state);
        if let Some(pooled) = state
            .connections
            .iter_mut()
            .find(|c| c.status == ConnectionStatus::Idle)
        {
            pooled.status = ConnectionStatus::Busy;
            pooled.usage_count += 1;
            pooled.last_used = Instant::now();
            return Checkout::Ready(Connection {
                id: pooled.id,
                handle: Arc::clone(&pooled.handle),
            });
        }

        if self.reserve_slot(&mut state) {
            Checkout::Create
        } else {
            Checkout::Exhausted
        }
    }

    fn reserve_slot(&self, state: &mut PoolState) -> bool {
        if state.size() < self.inner.config.max_connections {
            state.creating += 1;
            true
        } else {
            false
        }
    }

    /// Opens a connection into a slot already reserved with `reserve_slot`.
    async fn open_reserved(&self, status: ConnectionStatus) -> RemoteResult<Connection> {
        let mut slot = CreateSlot {
            pool: &self.inner,
            armed: true,
        };
        let handle = self.inner.connector.connect().await;

        let mut state = lock(&self.inner.state);
        state.creating = state.creating.saturating_sub(1);
        slot.armed = false;

        let handle = handle?;
        if self.is_closed() {
            return Err(RemoteError::Network("connection pool is closed".into()));
        }

        state.next_id += 1;
        let id = ConnectionId(state.next_id);
        let now = Instant::now();
        state.connections.push(PooledConnection {
            id,
            handle: Arc::clone(&handle),
            status,
            last_used: now,
            created_at: now,
            usage_count: u64::from(status == ConnectionStatus::Busy),
            errors: 0,
        });
        drop(state);

        debug!(%id, "opened connection");
        self.inner.events.emit(&PoolEvent::Created { id });
        Ok(Connection { id, handle })
    }

    async fn fill_to_min(&self) -> PoolResult<usize> {
        let min = self.inner.config.min_connections;
        let mut created = 0;
        loop {
            let reserved = {
                let mut state = lock(&self.inner.state);
                state.size() < min && self.reserve_slot(&mut state)
            };
            if !reserved {
                return Ok(created);
            }
            self.open_reserved(ConnectionStatus::Idle)
                .await
                .map_err(PoolError::Connect)?;
            created += 1;
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}
