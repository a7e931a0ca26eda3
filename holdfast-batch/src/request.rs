//! Batchable requests and the handles callers await.

use crate::error::BatchError;
use futures::future::BoxFuture;
use holdfast_types::{Classify, ErrorClass};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::debug;

/// Scheduling priority. Lower rank runs first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Sort rank: high is 0, low is 2.
    pub fn rank(self) -> u8 {
        self as u8
    }
}

/// Per-request scheduling options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub priority: Priority,
    /// Free-form label carried into events and logs.
    pub category: String,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Medium,
            category: "default".to_string(),
        }
    }
}

impl RequestOptions {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

/// Identifier assigned to each request by its batcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Result of a single attempt, with the typed value kept inside the job.
pub(crate) enum Attempt {
    Done,
    Failed { class: ErrorClass, message: String },
}

/// How a job leaves the batcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Report the outcome of the last attempt.
    Settled,
    Cancelled,
    Shutdown,
}

/// Type-erased unit of work.
pub(crate) trait Job: Send {
    fn attempt(&mut self) -> BoxFuture<'_, Attempt>;
    fn resolve(self: Box<Self>, resolution: Resolution);
}

pub(crate) struct TypedJob<T, E, F> {
    execute: F,
    last: Option<Result<T, E>>,
    reply: oneshot::Sender<Result<T, BatchError<E>>>,
}

impl<T, E, F> TypedJob<T, E, F> {
    pub(crate) fn new(execute: F) -> (Self, RequestHandle<T, E>) {
        let (reply, rx) = oneshot::channel();
        let job = Self {
            execute,
            last: None,
            reply,
        };
        (job, RequestHandle { id: None, rx })
    }
}

impl<T, E, F, Fut> Job for TypedJob<T, E, F>
where
    T: Send + 'static,
    E: Classify + fmt::Display + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    fn attempt(&mut self) -> BoxFuture<'_, Attempt> {
        let fut = (self.execute)();
        Box::pin(async move {
            let result = fut.await;
            let attempt = match &result {
                Ok(_) => Attempt::Done,
                Err(e) => Attempt::Failed {
                    class: e.class(),
                    message: e.to_string(),
                },
            };
            self.last = Some(result);
            attempt
        })
    }

    fn resolve(self: Box<Self>, resolution: Resolution) {
        let outcome = match (resolution, self.last) {
            (Resolution::Settled, Some(Ok(value))) => Ok(value),
            (Resolution::Settled, Some(Err(e))) => Err(BatchError::Failed(e)),
            (Resolution::Settled, None) => Err(BatchError::Abandoned),
            (Resolution::Cancelled, _) => Err(BatchError::Cancelled),
            (Resolution::Shutdown, _) => Err(BatchError::Shutdown),
        };
        if self.reply.send(outcome).is_err() {
            debug!("request outcome dropped; caller no longer waiting");
        }
    }
}

/// Future resolving when one request completes (not when its batch does).
///
/// Dropping the handle does not cancel the work.
#[must_use = "the request runs regardless; await the handle to observe its outcome"]
pub struct RequestHandle<T, E> {
    id: Option<RequestId>,
    rx: oneshot::Receiver<Result<T, BatchError<E>>>,
}

impl<T, E> RequestHandle<T, E> {
    pub(crate) fn set_id(&mut self, id: RequestId) {
        self.id = Some(id);
    }

    /// The id under which the request was queued. `None` if the batcher
    /// rejected it on arrival.
    pub fn id(&self) -> Option<RequestId> {
        self.id
    }
}

impl<T, E> Future for RequestHandle<T, E> {
    type Output = Result<T, BatchError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(BatchError::Abandoned)))
    }
}

impl<T, E> fmt::Debug for RequestHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle").field("id", &self.id).finish()
    }
}
