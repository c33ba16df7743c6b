//! Warmup ramp construction
//!
//! When a warmup window is configured, the target rate is not jumped straight
//! to the steady-state rate; it climbs in equal steps so a cold backend is
//! not shocked by full load. The ramp is expressed as a step function from
//! cumulative operation count to per-operation wait time: each plateau
//! sustains `interval_index x increment` ops/sec per worker for one interval.
//!
//! The steady-state rate itself is inferred from the trace: the number of
//! records inside the first 60 seconds of trace time divided by 60. A trace
//! that never reaches the 60-second mark cannot calibrate a warmup, which is
//! a fatal configuration error when warmup was requested.

use anyhow::bail;
use std::time::Duration;

use crate::trace::TracePrescan;
use crate::Result;

/// One plateau of the warmup step function.
///
/// The worker issues `boundary_ops` operations spaced `wait_nanos` apart
/// before moving to the next (faster) plateau.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plateau {
    /// Number of operations issued while this plateau is active
    pub boundary_ops: u64,
    /// Nanoseconds between successive operations at this plateau's rate
    pub wait_nanos: u64,
}

/// Per-worker warmup ramp: an ordered step function plus the total warmup
/// operation budget (the exact sum of the plateau boundaries).
#[derive(Debug, Clone)]
pub struct WarmupRamp {
    duration: Duration,
    steps: Vec<Plateau>,
    budget_ops: u64,
}

/// Nanoseconds between successive operations at a per-thread target rate.
///
/// Inverse of the rate: 1000 ops/sec/thread -> 1,000,000 ns between
/// operations, 2000 -> 500,000 ns.
pub fn calculate_waiting_time(rate_per_thread: u64) -> u64 {
    let per_ms = rate_per_thread as f64 / 1000.0;
    (1_000_000.0 / per_ms) as u64
}

impl WarmupRamp {
    /// A ramp that is never active (warmup disabled).
    pub fn disabled() -> Self {
        Self {
            duration: Duration::ZERO,
            steps: Vec::new(),
            budget_ops: 0,
        }
    }

    /// Build the per-worker ramp from a trace pre-scan.
    ///
    /// The per-interval rate increment is the steady-state aggregate rate
    /// divided by the interval count and the thread count, so every worker
    /// ramps independently toward its share of the aggregate rate.
    ///
    /// # Errors
    ///
    /// Fails when warmup was requested but the trace is shorter than the
    /// 60-second calibration window, or when the inferred increment rounds
    /// to zero ops/sec (the ramp would never advance).
    pub fn build(
        prescan: &TracePrescan,
        duration: Duration,
        intervals: u32,
        threads: u32,
    ) -> Result<Self> {
        if duration.is_zero() {
            return Ok(Self::disabled());
        }
        if !prescan.spans_first_minute {
            bail!(
                "cannot start warmup phase: trace duration is shorter than the \
                 60 s calibration window"
            );
        }

        let steady_rate = prescan.first_minute_ops / 60;
        let interval_nanos = duration.as_nanos() as u64 / intervals as u64;
        let increment = steady_rate / intervals as u64 / threads as u64;
        if increment == 0 {
            bail!(
                "warmup rate increment rounds to zero \
                 (steady rate {steady_rate} ops/s, {intervals} intervals, {threads} threads); \
                 lower the interval or thread count"
            );
        }

        let mut steps = Vec::with_capacity(intervals as usize);
        let mut budget_ops = 0u64;
        for interval in 1..=intervals as u64 {
            let rate = interval * increment;
            let boundary_ops = rate * interval_nanos / 1_000_000_000;
            let wait_nanos = calculate_waiting_time(rate);
            budget_ops += boundary_ops;
            steps.push(Plateau {
                boundary_ops,
                wait_nanos,
            });
        }

        tracing::info!(
            warmup_secs = duration.as_secs(),
            target_rate = steady_rate,
            budget_ops,
            "warmup ramp calibrated from trace"
        );

        Ok(Self {
            duration,
            steps,
            budget_ops,
        })
    }

    /// Whether the ramp has any plateaus at all.
    pub fn is_enabled(&self) -> bool {
        !self.steps.is_empty()
    }

    /// Configured warmup duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Total warmup operation budget per worker.
    pub fn budget_ops(&self) -> u64 {
        self.budget_ops
    }

    /// The ordered plateaus of the step function.
    pub fn steps(&self) -> &[Plateau] {
        &self.steps
    }

    /// Cumulative wait (nanoseconds since worker start) for the operation
    /// numbered `ops_done`.
    ///
    /// Walks the step function from the beginning, charging each fully
    /// consumed plateau its whole `boundary_ops x wait_nanos` and the
    /// current plateau only the operations spent inside it. Early plateaus
    /// have long waits, so the deadline advances slower early in warmup.
    pub fn cumulative_wait_nanos(&self, ops_done: u64) -> u64 {
        let mut waiting = 0u64;
        let mut cumulative = 0u64;
        for plateau in &self.steps {
            cumulative += plateau.boundary_ops;
            if ops_done > cumulative {
                waiting += plateau.boundary_ops * plateau.wait_nanos;
            } else {
                waiting += (ops_done - (cumulative - plateau.boundary_ops)) * plateau.wait_nanos;
                break;
            }
        }
        waiting
    }
}
