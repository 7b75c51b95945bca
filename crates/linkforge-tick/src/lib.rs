//! Fixed-interval scheduler and background jobs for Linkforge.
//!
//! Two layers:
//!
//! - [`TickScheduler`]: a plain `wait_for_tick` clock with overrun
//!   handling and per-run metrics. It owns no task.
//! - [`PeriodicTask`]: spawns a Tokio task that drives a scheduler and runs
//!   a job once per tick until its [`TaskHandle`] is stopped.
//!
//! Session garbage collection and snapshot dumps are both a
//! `PeriodicTask`; each job gets its own scheduler so their cadences never
//! interfere.
//!
//! # Integration
//!
//! The scheduler is designed to sit inside a `tokio::select!` loop next to
//! a cancellation branch:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = cancel.cancelled() => break,
//!         info = scheduler.wait_for_tick() => {
//!             let ok = run_job().await.is_ok();
//!             scheduler.record_tick_end(ok);
//!         }
//!     }
//! }
//! ```

mod task;

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

pub use task::{PeriodicTask, TaskHandle, TickError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How often a job runs and how it copes with being late.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Random jitter (up to this value) added to the *first* tick so jobs
    /// started at the same instant don't line up forever.
    pub initial_jitter: Duration,
    /// Track run durations in [`TickMetrics`]. Counters are always kept.
    pub metrics_enabled: bool,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_jitter: Duration::ZERO,
            metrics_enabled: true,
        }
    }
}

impl TickConfig {
    /// Smallest accepted interval. A zero interval would spin.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

    /// Create a config for a specific interval with sensible defaults.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Set the first-tick jitter.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.initial_jitter = jitter;
        self
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`TickScheduler::new`]: intervals below
    /// [`Self::MIN_INTERVAL`] are raised to it.
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                min_ms = Self::MIN_INTERVAL.as_millis() as u64,
                "tick interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Per-tick info
// ---------------------------------------------------------------------------

/// Information about a fired tick, returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// 1 for the first run, then +1 per run.
    pub tick: u64,
    /// `true` if this tick fired more than 10% of an interval late.
    pub overrun: bool,
    /// How many whole intervals were skipped due to overrun.
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Runtime metrics for a scheduler.
///
/// Run durations refer to the job execution time reported via
/// [`TickScheduler::record_tick_end`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickMetrics {
    /// Total ticks fired.
    pub total_ticks: u64,
    /// Runs reported as failed.
    pub total_failures: u64,
    /// Ticks that fired more than 10% of an interval late.
    pub total_overruns: u64,
    /// Whole intervals skipped because a tick fired late.
    pub total_skipped: u64,
    /// Duration of the most recent run.
    pub last_run_time: Duration,
    /// Longest run observed.
    pub max_run_time: Duration,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-interval tick scheduler. One per background job.
pub struct TickScheduler {
    config: TickConfig,
    tick_count: u64,
    next_tick: TokioInstant,
    /// Start of the run in progress, taken by `record_tick_end`.
    tick_start: Option<Instant>,
    metrics: TickMetrics,
}

impl TickScheduler {
    /// Builds a scheduler from `config` (after [`TickConfig::validated`]).
    ///
    /// The first tick fires one interval from now, plus optional jitter.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();

        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_us = config.initial_jitter.as_micros() as u64;
            Duration::from_micros(rand::rng().random_range(0..=max_us))
        };
        let next_tick = TokioInstant::now() + config.interval + jitter;

        debug!(
            interval_ms = config.interval.as_millis() as u64,
            jitter_ms = jitter.as_millis() as u64,
            "tick scheduler created"
        );

        Self {
            config,
            tick_count: 0,
            next_tick,
            tick_start: None,
            metrics: TickMetrics::default(),
        }
    }

    /// Create a scheduler for a specific interval with default settings.
    pub fn with_interval(interval: Duration) -> Self {
        Self::new(TickConfig::with_interval(interval))
    }

    /// Sleeps until the next run is due.
    ///
    /// A late tick (more than 10% of an interval) counts as an overrun.
    /// The missed intervals are skipped and the next deadline is one
    /// interval from now, so a slow sweep never causes a burst of sweeps.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let next = self.next_tick;
        let interval = self.config.interval;
        time::sleep_until(next).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.tick_start = Some(Instant::now());

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > interval / 10;
        let mut ticks_skipped = 0u64;

        if overrun {
            ticks_skipped = (late_by.as_nanos() / interval.as_nanos()) as u64;
            if ticks_skipped > 0 {
                warn!(
                    tick = self.tick_count,
                    skipped = ticks_skipped,
                    late_ms = late_by.as_millis() as u64,
                    "tick overrun, skipping ahead"
                );
            }
        }
        self.next_tick = now + interval;

        if overrun {
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_skipped += ticks_skipped;
        self.metrics.total_ticks += 1;

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    /// Record that the job for the current tick has finished.
    ///
    /// `succeeded` feeds the failure counter. A run that takes longer than
    /// the whole interval is logged, since the next tick is already late.
    pub fn record_tick_end(&mut self, succeeded: bool) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = start.elapsed();

        if !succeeded {
            self.metrics.total_failures += 1;
        }

        if elapsed >= self.config.interval {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_millis() as u64,
                interval_ms = self.config.interval.as_millis() as u64,
                "job run exceeded its interval"
            );
        }

        if self.config.metrics_enabled {
            self.metrics.last_run_time = elapsed;
            if elapsed > self.metrics.max_run_time {
                self.metrics.max_run_time = elapsed;
            }
        }
    }

    /// Ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Counters and run durations so far.
    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    /// The configured (validated) interval.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }
}
