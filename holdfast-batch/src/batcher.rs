//! The request batcher and its dispatcher loop.

use crate::config::BatcherConfig;
use crate::request::{
    Attempt, Job, Priority, RequestHandle, RequestId, RequestOptions, Resolution, TypedJob,
};
use futures::future::join_all;
use holdfast_types::{Classify, ErrorClass, ListenerId, Observers, lock};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

/// Identifier of one cut batch.
pub type BatchId = u64;

/// Lifecycle events emitted by the batcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    Queued {
        id: RequestId,
        priority: Priority,
        category: String,
    },
    BatchStart {
        batch: BatchId,
        size: usize,
    },
    BatchComplete {
        batch: BatchId,
        succeeded: usize,
        failed: usize,
        requeued: usize,
    },
    RateLimited {
        cooldown: Duration,
    },
    RateLimitReset,
    Paused,
    Resumed,
    Cleared {
        cancelled: usize,
    },
}

/// Pull-style counters for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatcherStats {
    pub queued: usize,
    pub in_flight_batches: usize,
    pub batches_started: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub rate_limit_trips: u64,
    pub paused: bool,
    /// Remaining cooldown in milliseconds, if the breaker is open.
    pub rate_limited_for_ms: Option<u64>,
}

struct QueuedRequest {
    id: RequestId,
    seq: u64,
    queued_at: Instant,
    priority: Priority,
    category: String,
    attempts: u32,
    job: Box<dyn Job>,
}

impl QueuedRequest {
    fn sort_key(&self) -> (Priority, Instant, u64) {
        (self.priority, self.queued_at, self.seq)
    }
}

#[derive(Default)]
struct BatcherState {
    queue: Vec<QueuedRequest>,
    in_flight: usize,
    paused: bool,
    rate_limited_until: Option<Instant>,
    next_seq: u64,
    next_batch: BatchId,
    batches_started: u64,
    completed: u64,
    failed: u64,
    retried: u64,
    rate_limit_trips: u64,
}

enum Step {
    Start(BatchId, Vec<QueuedRequest>),
    WaitUntil(Instant),
    Idle,
    Stop,
}

enum ItemOutcome {
    Succeeded,
    Failed,
    Requeued,
}

struct BatcherInner {
    config: BatcherConfig,
    state: Mutex<BatcherState>,
    wake: Arc<Notify>,
    events: Observers<BatchEvent>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl Drop for BatcherInner {
    fn drop(&mut self) {
        // Lets the dispatcher observe that the batcher is gone.
        self.wake.notify_one();
    }
}

/// Priority queue that cuts requests into bounded batches, executes them
/// with per-item isolation, retries transient failures, and pauses globally
/// on rate limiting. Cheap to clone.
///
/// Must be created inside a Tokio runtime: the dispatcher is spawned on
/// construction and exits when the last clone is dropped or on
/// [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct RequestBatcher {
    inner: Arc<BatcherInner>,
}

impl RequestBatcher {
    pub fn new(config: BatcherConfig) -> Self {
        let wake = Arc::new(Notify::new());
        let inner = Arc::new(BatcherInner {
            config: config.normalized(),
            state: Mutex::new(BatcherState::default()),
            wake: Arc::clone(&wake),
            events: Observers::new("request-batcher"),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        });
        tokio::spawn(dispatch_loop(Arc::downgrade(&inner), wake));
        Self { inner }
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }

    /// Registers a listener for batcher events.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&BatchEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Queues `execute` and returns a handle that resolves when this
    /// request completes.
    ///
    /// `execute` is called once per attempt. Transient failures are retried
    /// with exponential backoff up to `retry_count` times; a rate-limit
    /// failure trips the global cooldown and puts the request back in the
    /// queue; anything else is returned to the caller untouched.
    pub fn add<T, E, F, Fut>(&self, execute: F, options: RequestOptions) -> RequestHandle<T, E>
    where
        T: Send + 'static,
        E: Classify + fmt::Display + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (job, mut handle) = TypedJob::new(execute);
        let job: Box<dyn Job> = Box::new(job);

        if self.is_shut_down() {
            job.resolve(Resolution::Shutdown);
            return handle;
        }

        let id = RequestId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        handle.set_id(id);
        {
            let mut state = lock(&self.inner.state);
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(QueuedRequest {
                id,
                seq,
                queued_at: Instant::now(),
                priority: options.priority,
                category: options.category.clone(),
                attempts: 0,
                job,
            });
        }

        debug!(%id, priority = ?options.priority, category = %options.category, "request queued");
        self.inner.events.emit(&BatchEvent::Queued {
            id,
            priority: options.priority,
            category: options.category,
        });
        self.inner.wake.notify_one();
        handle
    }

    /// Stops cutting new batches. In-flight batches keep running.
    pub fn pause(&self) {
        lock(&self.inner.state).paused = true;
        info!("request batcher paused");
        self.inner.events.emit(&BatchEvent::Paused);
    }

    pub fn resume(&self) {
        lock(&self.inner.state).paused = false;
        info!("request batcher resumed");
        self.inner.events.emit(&BatchEvent::Resumed);
        self.inner.wake.notify_one();
    }

    /// Rejects every queued, not yet started request with
    /// [`BatchError::Cancelled`](crate::BatchError::Cancelled). Returns how
    /// many were rejected.
    pub fn clear(&self) -> usize {
        let drained: Vec<QueuedRequest> = lock(&self.inner.state).queue.drain(..).collect();
        let cancelled = drained.len();
        for request in drained {
            request.job.resolve(Resolution::Cancelled);
        }
        info!(cancelled, "request queue cleared");
        self.inner.events.emit(&BatchEvent::Cleared { cancelled });
        cancelled
    }

    /// Rejects queued requests with `Shutdown`, refuses new ones, and stops
    /// the dispatcher. In-flight batches finish on their own.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<QueuedRequest> = lock(&self.inner.state).queue.drain(..).collect();
        let rejected = drained.len();
        for request in drained {
            request.job.resolve(Resolution::Shutdown);
        }
        self.inner.wake.notify_one();
        info!(rejected, "request batcher shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Returns true while the rate-limit cooldown is active.
    pub fn is_rate_limited(&self) -> bool {
        lock(&self.inner.state)
            .rate_limited_until
            .is_some_and(|until| until > Instant::now())
    }

    pub fn stats(&self) -> BatcherStats {
        let state = lock(&self.inner.state);
        let now = Instant::now();
        BatcherStats {
            queued: state.queue.len(),
            in_flight_batches: state.in_flight,
            batches_started: state.batches_started,
            completed: state.completed,
            failed: state.failed,
            retried: state.retried,
            rate_limit_trips: state.rate_limit_trips,
            paused: state.paused,
            rate_limited_for_ms: state
                .rate_limited_until
                .filter(|until| *until > now)
                .map(|until| (until - now).as_millis() as u64),
        }
    }
}

impl fmt::Debug for RequestBatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBatcher")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl BatcherInner {
    /// Decides what the dispatcher does next. Runs in one critical section.
    fn next_step(&self) -> (Step, bool) {
        if self.closed.load(Ordering::SeqCst) {
            return (Step::Stop, false);
        }

        let now = Instant::now();
        let mut state = lock(&self.state);
        let mut reset = false;

        if let Some(until) = state.rate_limited_until {
            if until > now {
                return (Step::WaitUntil(until), false);
            }
            state.rate_limited_until = None;
            reset = true;
        }

        if state.paused
            || state.queue.is_empty()
            || state.in_flight >= self.config.max_concurrent_batches
        {
            return (Step::Idle, reset);
        }

        if state.queue.len() < self.config.max_batch_size {
            let oldest = state.queue.iter().map(|r| r.queued_at).min().unwrap_or(now);
            let ready_at = oldest + self.config.batch_delay;
            if ready_at > now {
                return (Step::WaitUntil(ready_at), reset);
            }
        }

        state.queue.sort_by_key(QueuedRequest::sort_key);
        let take = state.queue.len().min(self.config.max_batch_size);
        let batch: Vec<QueuedRequest> = state.queue.drain(..take).collect();
        state.in_flight += 1;
        state.batches_started += 1;
        state.next_batch += 1;
        (Step::Start(state.next_batch, batch), reset)
    }

    fn trip_rate_limit(&self) {
        let cooldown = self.config.rate_limit_cooldown;
        let until = Instant::now() + cooldown;
        {
            let mut state = lock(&self.state);
            state.rate_limit_trips += 1;
            state.rate_limited_until = Some(match state.rate_limited_until {
                Some(existing) if existing > until => existing,
                _ => until,
            });
        }
        warn!(cooldown_ms = cooldown.as_millis() as u64, "rate limited; pausing all batches");
        self.events.emit(&BatchEvent::RateLimited { cooldown });
        self.wake.notify_one();
    }

    fn requeue(&self, request: QueuedRequest) -> Result<(), QueuedRequest> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(request);
        }
        lock(&self.state).queue.push(request);
        Ok(())
    }

    async fn run_item(&self, mut request: QueuedRequest) -> ItemOutcome {
        let max_attempts = self.config.max_attempts();
        loop {
            let attempt_index = request.attempts;
            request.attempts += 1;

            let attempt = request.job.attempt().await;
            let (class, message) = match attempt {
                Attempt::Done => {
                    request.job.resolve(Resolution::Settled);
                    return ItemOutcome::Succeeded;
                }
                Attempt::Failed { class, message } => (class, message),
            };

            let exhausted = request.attempts >= max_attempts;
            match class {
                ErrorClass::RateLimited => {
                    self.trip_rate_limit();
                    if exhausted {
                        warn!(id = %request.id, attempts = request.attempts, error = %message, "rate-limited request out of attempts");
                        request.job.resolve(Resolution::Settled);
                        return ItemOutcome::Failed;
                    }
                    debug!(id = %request.id, attempts = request.attempts, "requeued after rate limit");
                    return match self.requeue(request) {
                        Ok(()) => ItemOutcome::Requeued,
                        Err(request) => {
                            request.job.resolve(Resolution::Shutdown);
                            ItemOutcome::Failed
                        }
                    };
                }
                ErrorClass::Transient if !exhausted => {
                    let delay = self.config.backoff(attempt_index);
                    lock(&self.state).retried += 1;
                    debug!(
                        id = %request.id,
                        attempt = request.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "retrying transient failure"
                    );
                    sleep(delay).await;
                }
                _ => {
                    debug!(
                        id = %request.id,
                        category = %request.category,
                        attempts = request.attempts,
                        %class,
                        error = %message,
                        "request failed"
                    );
                    request.job.resolve(Resolution::Settled);
                    return ItemOutcome::Failed;
                }
            }
        }
    }
}

/// Decrements the in-flight batch count even if a batch task panics.
struct InFlight<'a> {
    inner: &'a BatcherInner,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        {
            let mut state = lock(&self.inner.state);
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.inner.wake.notify_one();
    }
}

async fn run_batch(inner: Arc<BatcherInner>, batch: BatchId, requests: Vec<QueuedRequest>) {
    let _in_flight = InFlight { inner: &inner };
    let size = requests.len();
    debug!(batch, size, "batch started");
    inner.events.emit(&BatchEvent::BatchStart { batch, size });

    let outcomes = join_all(requests.into_iter().map(|r| inner.run_item(r))).await;

    let (mut succeeded, mut failed, mut requeued) = (0, 0, 0);
    for outcome in outcomes {
        match outcome {
            ItemOutcome::Succeeded => succeeded += 1,
            ItemOutcome::Failed => failed += 1,
            ItemOutcome::Requeued => requeued += 1,
        }
    }
    {
        let mut state = lock(&inner.state);
        state.completed += succeeded as u64;
        state.failed += failed as u64;
    }

    debug!(batch, succeeded, failed, requeued, "batch complete");
    inner.events.emit(&BatchEvent::BatchComplete {
        batch,
        succeeded,
        failed,
        requeued,
    });
}

async fn dispatch_loop(inner: Weak<BatcherInner>, wake: Arc<Notify>) {
    loop {
        let Some(strong) = inner.upgrade() else {
            break;
        };

        let (step, reset) = strong.next_step();
        if reset {
            info!("rate-limit cooldown elapsed; resuming batches");
            strong.events.emit(&BatchEvent::RateLimitReset);
        }

        match step {
            Step::Start(batch, requests) => {
                tokio::spawn(run_batch(strong, batch, requests));
            }
            Step::WaitUntil(at) => {
                drop(strong);
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = sleep_until(at) => {}
                }
            }
            Step::Idle => {
                drop(strong);
                wake.notified().await;
            }
            Step::Stop => break,
        }
    }
    debug!("batch dispatcher stopped");
}
