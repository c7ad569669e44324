//! Fixed-rate control loop
//!
//! Runs a callback at a target frequency on the calling thread, measures the
//! real time step between iteration starts and keeps timing statistics.
//! Shutdown is cooperative through a [`StopHandle`] checked once per
//! iteration.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for a control loop
#[derive(Debug, Clone)]
pub struct ControlLoopConfig {
    /// Target loop rate in Hz
    pub rate_hz: f64,
    /// Name for logging
    pub name: Arc<str>,
    /// Whether to warn on timing overruns
    pub warn_on_overrun: bool,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            rate_hz: 30.0,
            name: "balance".into(),
            warn_on_overrun: true,
        }
    }
}

impl ControlLoopConfig {
    /// Create a new config with the given rate
    pub fn new(rate_hz: f64) -> Self {
        Self {
            rate_hz,
            ..Default::default()
        }
    }

    /// Set the loop name
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Get the target period
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz)
    }
}

/// Cooperative stop flag shared between threads
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop; the loop finishes its current iteration first
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Timing statistics of a control loop
///
/// Iteration times are the busy part of each cycle, without the sleep.
/// Mean and variance are kept with Welford's online update.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ControlLoopStats {
    /// Completed iterations
    pub iterations: u64,
    /// Iterations that took longer than the period
    pub overruns: u64,
    pub min_iteration_time: Duration,
    pub max_iteration_time: Duration,
    mean_secs: f64,
    m2: f64,
}

impl ControlLoopStats {
    /// Record one iteration's busy time
    pub fn record(&mut self, busy: Duration, period: Duration) {
        self.iterations += 1;
        if busy > period {
            self.overruns += 1;
        }
        if self.iterations == 1 {
            self.min_iteration_time = busy;
            self.max_iteration_time = busy;
        } else {
            self.min_iteration_time = self.min_iteration_time.min(busy);
            self.max_iteration_time = self.max_iteration_time.max(busy);
        }

        let secs = busy.as_secs_f64();
        let delta = secs - self.mean_secs;
        self.mean_secs += delta / self.iterations as f64;
        self.m2 += delta * (secs - self.mean_secs);
    }

    pub fn mean_iteration_time(&self) -> Duration {
        Duration::from_secs_f64(self.mean_secs.max(0.0))
    }

    /// Standard deviation of the iteration time, zero below two samples
    pub fn jitter(&self) -> Duration {
        if self.iterations < 2 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((self.m2 / (self.iterations - 1) as f64).max(0.0).sqrt())
    }
}

/// A fixed-rate control loop
///
/// # Example
/// ```
/// use ballplate_core::control::{ControlLoop, ControlLoopConfig, StopHandle};
///
/// let config = ControlLoopConfig::new(1000.0).with_name("demo");
/// let stats = ControlLoop::run(config, &StopHandle::new(), |iteration, _dt| iteration < 3);
/// assert_eq!(stats.iterations, 3);
/// ```
pub struct ControlLoop;

impl ControlLoop {
    /// Run on the current thread until the callback returns false or `stop` is set
    ///
    /// The callback receives the iteration count and the measured time since
    /// the previous iteration started. The first iteration has no previous
    /// start and is given the nominal period.
    pub fn run<F>(config: ControlLoopConfig, stop: &StopHandle, mut callback: F) -> ControlLoopStats
    where
        F: FnMut(u64, f64) -> bool,
    {
        let period = config.period();
        let mut stats = ControlLoopStats::default();
        let mut iteration = 0u64;
        let mut last_start: Option<Instant> = None;

        while !stop.is_stopped() {
            let loop_start = Instant::now();
            let dt = match last_start {
                Some(prev) => loop_start.duration_since(prev).as_secs_f64(),
                None => period.as_secs_f64(),
            };
            last_start = Some(loop_start);

            let should_continue = callback(iteration, dt);

            let execution_time = loop_start.elapsed();

            if !should_continue {
                break;
            }

            stats.record(execution_time, period);

            if let Some(sleep_time) = period.checked_sub(execution_time) {
                thread::sleep(sleep_time);
            } else if config.warn_on_overrun {
                tracing::warn!(
                    "{}: loop overrun by {:?}",
                    config.name,
                    execution_time - period
                );
            }

            iteration += 1;
        }

        stats
    }

    /// Run with a wall-clock limit
    pub fn run_for<F>(
        config: ControlLoopConfig,
        duration: Duration,
        stop: &StopHandle,
        mut callback: F,
    ) -> ControlLoopStats
    where
        F: FnMut(u64, f64) -> bool,
    {
        let start = Instant::now();
        Self::run(config, stop, |iter, dt| {
            if start.elapsed() >= duration {
                return false;
            }
            callback(iter, dt)
        })
    }
}
