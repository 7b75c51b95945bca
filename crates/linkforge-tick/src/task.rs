//! Cancellable periodic background jobs.
//!
//! A [`PeriodicTask`] is one Tokio task running one job on one
//! [`TickScheduler`]. It is owned through its [`TaskHandle`]: stopping or
//! dropping the handle cancels the loop. Nothing here is process-wide, so
//! two session managers in the same test binary never see each other's
//! jobs.
//!
//! Cancellation is cooperative. The loop checks the token while waiting
//! for the next tick, never in the middle of a run: stopping a job lets a
//! sweep that already started finish and only prevents the next one.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{TickConfig, TickMetrics, TickScheduler};

/// Errors from starting a background job.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// The caller is not inside a Tokio runtime, so there is nowhere to
    /// spawn the job.
    #[error("no Tokio runtime available to run task {0}")]
    NoRuntime(&'static str),
}

/// Spawns periodic jobs.
pub struct PeriodicTask;

impl PeriodicTask {
    /// Spawn `job` on the current Tokio runtime, once per tick.
    ///
    /// Each run is spawned as its own task and awaited, so a run that
    /// returns an error *or panics* is logged and the loop moves on to
    /// the next tick.
    ///
    /// # Errors
    /// Returns [`TickError::NoRuntime`] when called outside a runtime.
    pub fn spawn<F, Fut, E>(
        name: &'static str,
        config: TickConfig,
        mut job: F,
    ) -> Result<TaskHandle, TickError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| TickError::NoRuntime(name))?;

        let cancel = CancellationToken::new();
        let metrics = Arc::new(Mutex::new(TickMetrics::default()));

        let token = cancel.clone();
        let shared = Arc::clone(&metrics);
        let join = runtime.spawn(async move {
            let mut scheduler = TickScheduler::new(config);
            info!(
                task = name,
                interval_ms = scheduler.interval().as_millis() as u64,
                "periodic task started"
            );

            loop {
                let info = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    info = scheduler.wait_for_tick() => info,
                };

                if info.overrun {
                    debug!(task = name, tick = info.tick, skipped = info.ticks_skipped, "periodic task running late");
                }
                let succeeded = match tokio::spawn(job()).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!(task = name, tick = info.tick, error = %e, "periodic task run failed");
                        false
                    }
                    Err(e) => {
                        error!(task = name, tick = info.tick, error = %e, "periodic task run panicked");
                        false
                    }
                };
                scheduler.record_tick_end(succeeded);
                *shared.lock() = scheduler.metrics().clone();
            }

            info!(task = name, runs = scheduler.tick_count(), "periodic task stopped");
        });

        Ok(TaskHandle {
            name,
            cancel,
            join: Some(join),
            metrics,
        })
    }
}

/// Owner of a running [`PeriodicTask`].
///
/// Dropping the handle cancels the task, exactly like [`stop`](Self::stop).
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
    metrics: Arc<Mutex<TickMetrics>>,
}

impl TaskHandle {
    /// The name the task was spawned with.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the task to stop before its next run. Idempotent.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!(task = self.name, "periodic task stop requested");
            self.cancel.cancel();
        }
    }

    /// `true` once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `true` once the task's loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Metrics as of the last completed run.
    pub fn metrics(&self) -> TickMetrics {
        self.metrics.lock().clone()
    }

    /// Stop the task and wait for its loop to exit, including any run
    /// that is in flight.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(task = self.name, error = %e, "periodic task ended abnormally");
            }
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
