//! Cycle controller: run-once, fixed-interval, and continuous execution of a
//! reconciliation cycle.
//!
//! # Model
//!
//! Single-threaded cooperative loop. The cycle callback runs synchronously to
//! completion; shutdown is only observed between iterations and inside waits,
//! at roughly one-second granularity — an in-flight cycle is never
//! interrupted. No cycle error propagates out of the loop: errors are logged,
//! counted, and followed by a recovery delay where the mode keeps iterating.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use cpd_engine::CycleReport;
use tracing::{error, info, warn};

/// Cooperative shutdown flag, shared with a signal handler.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Safe to call from a signal handler thread.
    pub fn request(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Execution mode of the controller loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// One cycle; its outcome becomes the process outcome.
    Once,
    /// Cycle, then sleep `interval`, up to `max_iterations` cycles
    /// (`None` = unbounded).
    Interval {
        interval: Duration,
        max_iterations: Option<u64>,
    },
    /// Back-to-back cycles separated by `delay`, bounded by elapsed
    /// wall-clock `max_runtime` (`None` = unbounded).
    Continuous {
        delay: Duration,
        max_runtime: Option<Duration>,
    },
}

/// Wait granularity and error-recovery delays. Production uses the defaults;
/// tests shrink them to keep the suite fast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tuning {
    /// Maximum single sleep slice; bounds shutdown latency.
    pub tick: Duration,
    /// Sleep after a failed interval-mode iteration.
    pub recovery_delay: Duration,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            recovery_delay: Duration::from_secs(30),
        }
    }
}

/// Aggregate of every cycle the controller ran.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
    pub orders_copied: u64,
    pub orders_updated: u64,
    pub orders_cancelled: u64,
    pub positions_updated: u64,
    pub positions_closed: u64,
}

impl RunSummary {
    fn absorb(&mut self, report: &CycleReport) {
        self.iterations += 1;
        if report.success {
            self.cycles_succeeded += 1;
        } else {
            self.cycles_failed += 1;
        }
        self.orders_copied += u64::from(report.orders_copied);
        self.orders_updated += u64::from(report.orders_updated);
        self.orders_cancelled += u64::from(report.orders_cancelled);
        self.positions_updated += u64::from(report.positions_updated);
        self.positions_closed += u64::from(report.positions_closed);
    }

    fn absorb_error(&mut self) {
        self.iterations += 1;
        self.cycles_failed += 1;
    }

    /// `true` when every iteration succeeded (and at least one ran).
    pub fn all_succeeded(&self) -> bool {
        self.cycles_failed == 0 && self.cycles_succeeded > 0
    }
}

/// Drives the cycle callback according to a [`RunMode`].
pub struct Controller {
    mode: RunMode,
    shutdown: Shutdown,
    tuning: Tuning,
}

impl Controller {
    pub fn new(mode: RunMode, shutdown: Shutdown) -> Self {
        Self {
            mode,
            shutdown,
            tuning: Tuning::default(),
        }
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Run cycles until the mode's bound or a shutdown request. The callback
    /// receives the 1-based iteration number.
    pub fn run<F>(&self, mut cycle: F) -> RunSummary
    where
        F: FnMut(u64) -> Result<CycleReport>,
    {
        match &self.mode {
            RunMode::Once => self.run_once(&mut cycle),
            RunMode::Interval {
                interval,
                max_iterations,
            } => self.run_interval(*interval, *max_iterations, &mut cycle),
            RunMode::Continuous { delay, max_runtime } => {
                self.run_continuous(*delay, *max_runtime, &mut cycle)
            }
        }
    }

    fn run_once<F>(&self, cycle: &mut F) -> RunSummary
    where
        F: FnMut(u64) -> Result<CycleReport>,
    {
        info!("running single reconciliation cycle");
        let mut summary = RunSummary::default();
        self.invoke(1, cycle, &mut summary);
        summary
    }

    fn run_interval<F>(
        &self,
        interval: Duration,
        max_iterations: Option<u64>,
        cycle: &mut F,
    ) -> RunSummary
    where
        F: FnMut(u64) -> Result<CycleReport>,
    {
        info!(interval_secs = interval.as_secs(), "running in interval mode");
        let mut summary = RunSummary::default();
        let mut iteration = 0u64;
        while !self.shutdown.is_requested() {
            iteration += 1;
            let errored = self.invoke(iteration, cycle, &mut summary);

            if let Some(max) = max_iterations {
                if iteration >= max {
                    info!(max, "iteration bound reached");
                    break;
                }
            }

            let delay = if errored {
                warn!(
                    delay_secs = self.tuning.recovery_delay.as_secs(),
                    "waiting recovery delay after iteration error"
                );
                self.tuning.recovery_delay
            } else {
                interval
            };
            if !self.wait(delay) {
                break;
            }
        }
        info!(iterations = summary.iterations, "interval loop finished");
        summary
    }

    fn run_continuous<F>(
        &self,
        delay: Duration,
        max_runtime: Option<Duration>,
        cycle: &mut F,
    ) -> RunSummary
    where
        F: FnMut(u64) -> Result<CycleReport>,
    {
        info!(delay_secs = delay.as_secs(), "running in continuous mode");
        let started = Instant::now();
        let mut summary = RunSummary::default();
        let mut iteration = 0u64;
        while !self.shutdown.is_requested() {
            if let Some(cap) = max_runtime {
                if started.elapsed() >= cap {
                    info!(cap_secs = cap.as_secs(), "runtime cap reached");
                    break;
                }
            }
            iteration += 1;
            let errored = self.invoke(iteration, cycle, &mut summary);

            let next_delay = if errored {
                (delay * 2).min(Duration::from_secs(30))
            } else {
                delay
            };
            if !self.wait(next_delay) {
                break;
            }
        }
        info!(
            iterations = summary.iterations,
            elapsed_secs = started.elapsed().as_secs(),
            "continuous loop finished"
        );
        summary
    }

    /// Run one iteration; returns `true` when it errored (vs. merely
    /// reporting failure).
    fn invoke<F>(&self, iteration: u64, cycle: &mut F, summary: &mut RunSummary) -> bool
    where
        F: FnMut(u64) -> Result<CycleReport>,
    {
        match cycle(iteration) {
            Ok(report) => {
                if !report.success {
                    warn!(
                        iteration,
                        failed_terminals = ?report.failed_terminals,
                        "cycle completed with errors"
                    );
                }
                summary.absorb(&report);
                false
            }
            Err(err) => {
                error!(iteration, %err, "cycle errored");
                summary.absorb_error();
                true
            }
        }
    }

    /// Sleep `total` in tick-sized slices, bailing early on shutdown. Returns
    /// `false` when shutdown was requested during the wait.
    fn wait(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        while !self.shutdown.is_requested() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            std::thread::sleep(remaining.min(self.tuning.tick));
        }
        false
    }
}
