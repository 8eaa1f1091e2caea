//! Owner of every detached handler run.

use std::{future::Future, sync::Arc};

use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, Span, debug, info};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("No tokio runtime is available to run background work")]
    NoRuntime,

    #[error("Background executor is shut down")]
    ShutDown,
}

/// Runs submitted futures on the current runtime with at most
/// `max_concurrency` of them active at a time.
///
/// Submission never waits: the permit is acquired inside the spawned task.
/// A gated task takes its gate before competing for a permit, so tasks
/// queued on a busy gate do not hold slots other work could use.
#[derive(Clone)]
pub struct BackgroundExecutor {
    tracker: TaskTracker,
    shutdown: CancellationToken,
    permits: Arc<Semaphore>,
}

impl BackgroundExecutor {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn submit<F>(&self, span: Span, fut: F) -> Result<(), ExecutorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit_gated(span, None, fut)
    }

    /// Like `submit`, but the task holds `gate` for its whole run.
    pub fn submit_gated<F>(
        &self,
        span: Span,
        gate: Option<Arc<Mutex<()>>>,
        fut: F,
    ) -> Result<(), ExecutorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(ExecutorError::ShutDown);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?;

        let permits = Arc::clone(&self.permits);
        let shutdown = self.shutdown.clone();
        let task = async move {
            let _gate = match gate {
                Some(gate) => tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        debug!("Shutdown while waiting on a serialized handler, not starting");
                        return;
                    }
                    guard = gate.lock_owned() => Some(guard),
                },
                None => None,
            };
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Shutdown before a worker slot freed up, not starting");
                    return;
                }
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            fut.await;
            drop(permit);
        };

        self.tracker.spawn_on(task.instrument(span), &runtime);
        Ok(())
    }

    /// Tasks spawned and not yet finished, queued ones included.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Token that fires when `shutdown` is called.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Waits until everything submitted so far has finished. New work may
    /// still be submitted afterwards.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancels outstanding work and waits for it to wind down. Later
    /// submissions are refused.
    pub async fn shutdown(&self) {
        let pending = self.tracker.len();
        info!(pending, "Shutting down background executor");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
