//! Per-worker operation scheduling
//!
//! Each worker owns one `Scheduler` that turns warmup-ramp or trace-driven
//! timing into a deadline (intended dispatch time) for every operation. The
//! worker loop sleeps until the deadline, dispatches, and asks for the next
//! one. No cross-worker coordination is needed: the schedule state is
//! exclusively owned by its worker.
//!
//! The scheduler is a two-phase state machine:
//!
//! - **Warming up** while fewer operations than the warmup budget have been
//!   issued and the warmup window has not elapsed. Deadlines come from
//!   walking the ramp's step function.
//! - **Steady state** afterwards. Deadlines come from the trace: worker
//!   start + warmup duration + next inter-arrival offset. An exhausted trace
//!   yields `None`, the cooperative "no more scheduled work" signal.
//!
//! The transition is a one-way latch; a worker never re-enters warmup.
//!
//! All deadline math uses the monotonic clock (`Instant`). Wall-clock time
//! can jump and must never be used for duration arithmetic.

use std::time::{Duration, Instant};

use crate::trace::TraceSource;
use crate::warmup::WarmupRamp;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    WarmingUp,
    SteadyState,
}

/// Per-worker deadline generator.
#[derive(Debug)]
pub struct Scheduler {
    start: Instant,
    ops_done: u64,
    phase: Phase,
    ramp: WarmupRamp,
    trace: TraceSource,
}

impl Scheduler {
    /// Create a scheduler over a (reloaded) trace source.
    ///
    /// The worker's start time is captured here; construct the scheduler
    /// right before the worker loop begins.
    pub fn new(trace: TraceSource, ramp: WarmupRamp) -> Self {
        let phase = if ramp.is_enabled() {
            Phase::WarmingUp
        } else {
            Phase::SteadyState
        };
        Self {
            start: Instant::now(),
            ops_done: 0,
            phase,
            ramp,
            trace,
        }
    }

    /// Deadline for the next operation as an offset (nanoseconds) from the
    /// worker's start time.
    ///
    /// `Ok(None)` means the trace is exhausted: stop issuing new operations
    /// for this worker, without aborting work already in flight.
    pub fn next_deadline_nanos(&mut self) -> Result<Option<u64>> {
        if self.phase == Phase::WarmingUp {
            let warmed = self.ops_done >= self.ramp.budget_ops()
                || self.start.elapsed() >= self.ramp.duration();
            if warmed {
                // One-way transition, never revisited
                self.phase = Phase::SteadyState;
                tracing::debug!(ops_done = self.ops_done, "warmup complete, replaying trace");
            } else {
                let wait = self.ramp.cumulative_wait_nanos(self.ops_done);
                self.ops_done += 1;
                return Ok(Some(wait));
            }
        }

        match self.trace.next()? {
            Some(offset) => {
                self.ops_done += 1;
                Ok(Some(self.ramp.duration().as_nanos() as u64 + offset))
            }
            None => Ok(None),
        }
    }

    /// Deadline for the next operation on the monotonic clock.
    pub fn next_deadline(&mut self) -> Result<Option<Instant>> {
        Ok(self
            .next_deadline_nanos()?
            .map(|nanos| self.start + Duration::from_nanos(nanos)))
    }

    /// The worker's start time.
    pub fn start(&self) -> Instant {
        self.start
    }

    /// Operations scheduled so far. Only ever increases.
    pub fn ops_done(&self) -> u64 {
        self.ops_done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TracePrescan;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn source(lines: &[&str]) -> (NamedTempFile, TraceSource) {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        let source = TraceSource::open(file.path()).unwrap();
        (file, source)
    }

    fn ramp_for_tests() -> WarmupRamp {
        let prescan = TracePrescan {
            total_ops: 120_000,
            first_minute_ops: 60_000,
            spans_first_minute: true,
        };
        WarmupRamp::build(&prescan, Duration::from_secs(10), 5, 1).unwrap()
    }

    #[test]
    fn test_trace_deadlines_without_warmup() {
        let (_file, trace) = source(&["0", "1000000000", "2000000000"]);
        let mut scheduler = Scheduler::new(trace, WarmupRamp::disabled());

        assert_eq!(scheduler.next_deadline_nanos().unwrap(), Some(0));
        assert_eq!(scheduler.next_deadline_nanos().unwrap(), Some(1_000_000_000));
        assert_eq!(scheduler.next_deadline_nanos().unwrap(), Some(2_000_000_000));
        assert_eq!(scheduler.next_deadline_nanos().unwrap(), None);
        assert_eq!(scheduler.ops_done(), 3);
    }

    #[test]
    fn test_instant_deadlines_offset_from_start() {
        let (_file, trace) = source(&["0", "1000000000"]);
        let mut scheduler = Scheduler::new(trace, WarmupRamp::disabled());
        let start = scheduler.start();

        assert_eq!(scheduler.next_deadline().unwrap(), Some(start));
        assert_eq!(
            scheduler.next_deadline().unwrap(),
            Some(start + Duration::from_secs(1))
        );
        assert_eq!(scheduler.next_deadline().unwrap(), None);
    }

    #[test]
    fn test_warmup_deadlines_walk_the_ramp() {
        let (_file, trace) = source(&["0"]);
        let ramp = ramp_for_tests();
        let first_wait = ramp.steps()[0].wait_nanos;
        let mut scheduler = Scheduler::new(trace, ramp);

        // Operation 0 dispatches immediately; later ones accumulate waits
        assert_eq!(scheduler.next_deadline_nanos().unwrap(), Some(0));
        assert_eq!(scheduler.next_deadline_nanos().unwrap(), Some(first_wait));
        assert_eq!(
            scheduler.next_deadline_nanos().unwrap(),
            Some(2 * first_wait)
        );
    }

    #[test]
    fn test_budget_exhaustion_enters_steady_state() {
        let (_file, trace) = source(&["7"]);
        let ramp = ramp_for_tests();
        let budget = ramp.budget_ops();
        let warmup_nanos = ramp.duration().as_nanos() as u64;
        let mut scheduler = Scheduler::new(trace, ramp);

        for _ in 0..budget {
            assert!(scheduler.next_deadline_nanos().unwrap().is_some());
        }
        assert_eq!(scheduler.phase, Phase::WarmingUp);

        // Budget consumed: next deadline comes from the trace, shifted past
        // the warmup window
        assert_eq!(
            scheduler.next_deadline_nanos().unwrap(),
            Some(warmup_nanos + 7)
        );
        assert_eq!(scheduler.phase, Phase::SteadyState);
        assert_eq!(scheduler.next_deadline_nanos().unwrap(), None);
    }

    #[test]
    fn test_elapsed_window_enters_steady_state() {
        let (_file, trace) = source(&["42"]);
        let ramp = ramp_for_tests();
        let warmup_nanos = ramp.duration().as_nanos() as u64;
        let mut scheduler = Scheduler::new(trace, ramp);

        // Pretend the worker started longer ago than the warmup window
        scheduler.start = Instant::now() - Duration::from_secs(11);
        assert_eq!(
            scheduler.next_deadline_nanos().unwrap(),
            Some(warmup_nanos + 42)
        );
        assert_eq!(scheduler.phase, Phase::SteadyState);
    }

    #[test]
    fn test_transition_is_permanent() {
        let (_file, trace) = source(&["1", "2"]);
        let ramp = ramp_for_tests();
        let mut scheduler = Scheduler::new(trace, ramp);

        scheduler.start = Instant::now() - Duration::from_secs(11);
        assert!(scheduler.next_deadline_nanos().unwrap().is_some());

        // Move the clock back inside the window; the latch must hold
        scheduler.start = Instant::now();
        let warmup_nanos = scheduler.ramp.duration().as_nanos() as u64;
        assert_eq!(
            scheduler.next_deadline_nanos().unwrap(),
            Some(warmup_nanos + 2)
        );
    }

    #[test]
    fn test_ops_done_monotonic() {
        let (_file, trace) = source(&["0", "1", "2"]);
        let mut scheduler = Scheduler::new(trace, WarmupRamp::disabled());

        let mut last = scheduler.ops_done();
        while scheduler.next_deadline_nanos().unwrap().is_some() {
            assert!(scheduler.ops_done() > last);
            last = scheduler.ops_done();
        }
    }
}
