//! Worker isolation for blocking container-engine calls.
//!
//! Each call runs on its own tokio task and reports back over a oneshot
//! channel. The caller races that channel against an optional timer: on
//! timeout the task is aborted, on panic the join error is turned into
//! `WorkerFailed`. The pool size caps how many engine calls are in flight.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn, Instrument};

use crate::error::PlaygroundError;

/// Bounded pool of isolated execution units.
#[derive(Debug, Clone)]
pub(crate) struct WorkerPool {
    permits: Arc<Semaphore>,
    default_timeout: Option<Duration>,
}

impl WorkerPool {
    /// Creates a pool running at most `size` workers at once.
    pub fn new(size: usize, default_timeout: Option<Duration>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
            default_timeout,
        }
    }

    /// Timeout applied to ordinary engine calls.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Runs `task` in an isolated worker.
    ///
    /// Exactly one result or error is delivered. The worker is torn down
    /// before this returns, whichever way it ends.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        timeout: Option<Duration>,
        task: F,
    ) -> Result<T, PlaygroundError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, PlaygroundError>> + Send + 'static,
    {
        // Time spent queued for a permit counts against the limit.
        let deadline = timeout.map(|limit| (limit, Instant::now() + limit));
        let acquire = Arc::clone(&self.permits).acquire_owned();
        let acquired = match deadline {
            Some((limit, at)) => {
                if let Ok(acquired) = tokio::time::timeout_at(at, acquire).await {
                    acquired
                } else {
                    warn!(operation, ?limit, "Timed out waiting for a free worker");
                    return Err(PlaygroundError::timed_out(operation, limit));
                }
            }
            None => acquire.await,
        };
        let permit =
            acquired.map_err(|_| PlaygroundError::worker_failed(operation, "worker pool is closed"))?;

        let (tx, rx) = oneshot::channel();
        let span = tracing::debug_span!("worker", operation);
        let mut handle = tokio::spawn(
            async move {
                let _permit = permit;
                let result = task().await;
                // The receiver is gone only if the caller already timed out.
                let _ = tx.send(result);
            }
            .instrument(span),
        );

        let received = match deadline {
            Some((limit, at)) => {
                if let Ok(received) = tokio::time::timeout_at(at, rx).await {
                    received
                } else {
                    handle.abort();
                    // Wait for the abort so no worker outlives the call.
                    let _ = (&mut handle).await;
                    warn!(operation, ?limit, "Worker timed out, terminated");
                    return Err(PlaygroundError::timed_out(operation, limit));
                }
            }
            None => rx.await,
        };

        match received {
            Ok(result) => {
                if let Err(e) = handle.await {
                    debug!(operation, "Worker join after result failed: {}", e);
                }
                result
            }
            Err(_) => {
                let message = match handle.await {
                    Err(e) if e.is_panic() => panic_message(e.into_panic()),
                    Err(e) => e.to_string(),
                    Ok(()) => "worker exited without reporting a result".to_string(),
                };
                warn!(operation, "Worker failed: {}", message);
                Err(PlaygroundError::worker_failed(operation, message))
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
