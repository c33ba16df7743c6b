//! Worker threads and run orchestration
//!
//! One independent worker runs per configured thread. Each worker owns its
//! schedule state and backend instance outright and runs a closed loop:
//! compute deadline, sleep until it, dispatch, repeat. The only shared
//! mutable state is the measurement aggregator (atomic fan-in) and whatever
//! pool the binding keeps behind `init`/`cleanup`.
//!
//! Termination is cooperative. The scheduler signals "no more scheduled
//! work", workers stop issuing and drain their in-flight asynchronous
//! operations without aborting them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::RunConfig;
use crate::executor::CompletionExecutor;
use crate::measure::Measurements;
use crate::mix::OperationMix;
use crate::schedule::Scheduler;
use crate::store::{StorageBackend, Verb};
use crate::trace::TraceSource;
use crate::warmup::WarmupRamp;
use crate::wrapper::{BucketPolicy, InstrumentedStore, PendingOp};
use crate::Result;

/// Constructs one backend instance per worker, keyed by worker id.
pub type BackendFactory = dyn Fn(u32) -> Result<Box<dyn StorageBackend>> + Send + Sync;

/// Final tally of a completed run.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    /// Operations issued across all workers, warmup included
    pub operations: u64,
    /// Wall time from first worker start to last worker exit
    pub elapsed: Duration,
}

/// Execute a full load-generation run.
///
/// Performs the trace pre-scan, calibrates the warmup ramp (aborting before
/// any worker starts if calibration is impossible), then spawns one worker
/// per configured thread and joins them all. Every worker gets its own
/// trace cursor, scheduler, and backend instance; they share only the
/// aggregator and the completion executor.
pub fn run(
    config: &RunConfig,
    factory: &BackendFactory,
    measurements: Arc<Measurements>,
) -> Result<RunSummary> {
    config.validate()?;

    let mut trace = TraceSource::open(&config.trace_path)?;
    let prescan = trace.prescan()?;
    drop(trace);
    tracing::info!(
        records = prescan.total_ops,
        trace = %config.trace_path.display(),
        "trace pre-scan complete"
    );

    // Fatal before any worker starts when the trace cannot calibrate warmup
    let ramp = WarmupRamp::build(&prescan, config.warmup, config.warmup_intervals, config.threads)?;

    let steady_budget = match config.operation_count {
        Some(count) if count > prescan.total_ops => {
            tracing::warn!(
                requested = count,
                trace = prescan.total_ops,
                "operation count exceeds trace size; run terminates at trace end"
            );
            prescan.total_ops
        }
        Some(count) => count,
        None => prescan.total_ops,
    };
    let total_budget = ramp.budget_ops() * config.threads as u64 + steady_budget;

    let executor = Arc::new(CompletionExecutor::from_config(
        config.completion_pool_threads,
    ));
    let policy = BucketPolicy {
        report_latency_for_each_error: config.report_latency_for_each_error,
        latency_tracked_errors: config.latency_tracked_errors.clone(),
    };
    let issued = AtomicU64::new(0);

    let run_start = Instant::now();
    thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::with_capacity(config.threads as usize);
        for worker_id in 0..config.threads {
            let ramp = ramp.clone();
            let policy = policy.clone();
            let executor = Arc::clone(&executor);
            let measurements = Arc::clone(&measurements);
            let issued = &issued;
            let handle = scope.spawn(move || -> Result<()> {
                let backend = factory(worker_id)?;
                let mut store =
                    InstrumentedStore::new(backend, measurements, policy, executor);
                let trace = TraceSource::open(&config.trace_path)?;
                let mut mix = OperationMix::new(
                    config.mix.clone(),
                    config.table.clone(),
                    config.record_count,
                    worker_id as u64,
                );

                store.init()?;
                let scheduler = Scheduler::new(trace, ramp);
                let result = worker_loop(
                    &mut store,
                    scheduler,
                    &mut mix,
                    issued,
                    total_budget,
                    config,
                );
                // Cleanup runs even when the loop failed
                let cleanup = store.cleanup(Instant::now());
                result.and(cleanup)
            });
            handles.push(handle);
        }

        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        Ok(())
    })?;

    let summary = RunSummary {
        operations: issued.load(Ordering::Relaxed).min(total_budget),
        elapsed: run_start.elapsed(),
    };
    tracing::info!(
        operations = summary.operations,
        elapsed_secs = summary.elapsed.as_secs_f64(),
        "run complete"
    );
    Ok(summary)
}

/// The closed per-worker loop: deadline, sleep, dispatch.
fn worker_loop(
    store: &mut InstrumentedStore,
    mut scheduler: Scheduler,
    mix: &mut OperationMix,
    issued: &AtomicU64,
    total_budget: u64,
    config: &RunConfig,
) -> Result<()> {
    let mut pending: Vec<PendingOp> = Vec::new();

    while let Some(deadline) = scheduler.next_deadline()? {
        if issued.fetch_add(1, Ordering::Relaxed) >= total_budget {
            break;
        }
        sleep_until(deadline);

        let op = mix.next_operation();
        if config.async_dispatch {
            match op.verb {
                Verb::Read => {
                    enforce_ceiling(&mut pending, config.max_in_flight)?;
                    pending.push(store.read_async(
                        &op.table,
                        &op.key,
                        op.fields.as_deref(),
                        deadline,
                    )?);
                    continue;
                }
                Verb::Insert | Verb::Update => {
                    enforce_ceiling(&mut pending, config.max_in_flight)?;
                    let values = op.values.clone().unwrap_or_default();
                    let handle = if op.verb == Verb::Insert {
                        store.insert_async(&op.table, &op.key, &values, deadline)?
                    } else {
                        store.update_async(&op.table, &op.key, &values, deadline)?
                    };
                    pending.push(handle);
                    continue;
                }
                // Scans and deletes have no asynchronous variant
                _ => {}
            }
        }
        store.dispatch(&op, deadline);
    }

    // Drain in-flight work before exiting; nothing is aborted
    for handle in pending {
        handle.wait()?;
    }
    Ok(())
}

/// Apply the optional in-flight ceiling by waiting out the oldest handle.
fn enforce_ceiling(pending: &mut Vec<PendingOp>, max_in_flight: Option<usize>) -> Result<()> {
    if let Some(limit) = max_in_flight {
        while pending.len() >= limit {
            pending.remove(0).wait()?;
        }
    }
    Ok(())
}

/// Sleep on the monotonic clock until `deadline`; past deadlines return
/// immediately (the backlog is charged to intended latency instead).
fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::MeasurementKind;
    use crate::store::mock::{MockBackend, MockConnection};
    use crate::store::pool::RefCountedPool;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use tempfile::NamedTempFile;

    fn trace_file(offsets: &[u64]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for offset in offsets {
            writeln!(file, "{}", offset).unwrap();
        }
        file.flush().unwrap();
        file
    }

    /// Millisecond-scale trace so tests finish quickly.
    fn short_trace(records: usize) -> NamedTempFile {
        let offsets: Vec<u64> = (0..records as u64).map(|i| i * 100_000).collect();
        trace_file(&offsets)
    }

    fn pooled_factory() -> (Arc<RefCountedPool<MockConnection>>, Box<BackendFactory>) {
        let pool = Arc::new(RefCountedPool::new());
        let factory_pool = Arc::clone(&pool);
        let factory: Box<BackendFactory> = Box::new(move |_worker| {
            Ok(Box::new(MockBackend::with_pool(Arc::clone(&factory_pool))) as Box<dyn StorageBackend>)
        });
        (pool, factory)
    }

    fn completed_data_ops(measurements: &Measurements) -> u64 {
        measurements
            .buckets()
            .iter()
            .filter(|bucket| *bucket != "CLEANUP")
            .map(|bucket| measurements.total_count(bucket))
            .sum()
    }

    #[test]
    fn test_run_replays_whole_trace() {
        let trace = short_trace(50);
        let config = RunConfig::for_trace(trace.path());
        let (pool, factory) = pooled_factory();
        let measurements = Arc::new(Measurements::new(MeasurementKind::Counter));

        let summary = run(&config, &factory, Arc::clone(&measurements)).unwrap();

        assert_eq!(summary.operations, 50);
        // Every completed operation is reflected exactly once
        assert_eq!(completed_data_ops(&measurements), 50);
        // Cleanup released the shared resource
        assert_eq!(pool.ref_count(), 0);
        assert_eq!(measurements.total_count("CLEANUP"), 1);
    }

    #[test]
    fn test_multiple_workers_share_aggregator() {
        let trace = short_trace(20);
        let mut config = RunConfig::for_trace(trace.path());
        config.threads = 4;
        let (pool, factory) = pooled_factory();
        let measurements = Arc::new(Measurements::new(MeasurementKind::Counter));

        // Each worker replays the full trace; the budget caps the total
        let summary = run(&config, &factory, Arc::clone(&measurements)).unwrap();

        assert_eq!(summary.operations, 20);
        assert_eq!(pool.ref_count(), 0);
        assert_eq!(measurements.total_count("CLEANUP"), 4);
    }

    #[test]
    fn test_operation_count_terminates_early() {
        let trace = short_trace(100);
        let mut config = RunConfig::for_trace(trace.path());
        config.operation_count = Some(10);
        let (_pool, factory) = pooled_factory();
        let measurements = Arc::new(Measurements::new(MeasurementKind::Counter));

        let summary = run(&config, &factory, Arc::clone(&measurements)).unwrap();

        assert_eq!(summary.operations, 10);
        assert_eq!(completed_data_ops(&measurements), 10);
    }

    #[test]
    fn test_oversized_operation_count_ends_at_trace() {
        let trace = short_trace(10);
        let mut config = RunConfig::for_trace(trace.path());
        config.operation_count = Some(1_000_000);
        let (_pool, factory) = pooled_factory();
        let measurements = Arc::new(Measurements::new(MeasurementKind::Counter));

        let summary = run(&config, &factory, measurements).unwrap();
        assert_eq!(summary.operations, 10);
    }

    #[test]
    fn test_warmup_against_short_trace_aborts_before_workers() {
        let trace = short_trace(10);
        let mut config = RunConfig::for_trace(trace.path());
        config.warmup = Duration::from_secs(5);

        let built = Arc::new(AtomicUsize::new(0));
        let factory_built = Arc::clone(&built);
        let factory: Box<BackendFactory> = Box::new(move |_worker| {
            factory_built.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockBackend::new()) as Box<dyn StorageBackend>)
        });
        let measurements = Arc::new(Measurements::new(MeasurementKind::Counter));

        let result = run(&config, &factory, measurements);
        assert!(result.is_err());
        // No worker ever started
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_async_dispatch_drains_in_flight() {
        let trace = short_trace(30);
        let mut config = RunConfig::for_trace(trace.path());
        config.async_dispatch = true;
        config.mix.read_weight = 50;
        config.mix.update_weight = 50;
        let (pool, factory) = pooled_factory();
        let measurements = Arc::new(Measurements::new(MeasurementKind::Counter));

        let summary = run(&config, &factory, Arc::clone(&measurements)).unwrap();

        assert_eq!(summary.operations, 30);
        // Drained completions are all reflected in the totals
        assert_eq!(completed_data_ops(&measurements), 30);
        assert_eq!(pool.ref_count(), 0);
    }

    #[test]
    fn test_async_dispatch_with_dedicated_pool_and_ceiling() {
        let trace = short_trace(30);
        let mut config = RunConfig::for_trace(trace.path());
        config.async_dispatch = true;
        config.completion_pool_threads = Some(2);
        config.max_in_flight = Some(4);
        let (_pool, factory) = pooled_factory();
        let measurements = Arc::new(Measurements::new(MeasurementKind::Counter));

        let summary = run(&config, &factory, Arc::clone(&measurements)).unwrap();
        assert_eq!(summary.operations, 30);
        assert_eq!(completed_data_ops(&measurements), 30);
    }

    #[test]
    fn test_missing_trace_is_fatal() {
        let config = RunConfig::for_trace("/nonexistent/trace.txt");
        let (_pool, factory) = pooled_factory();
        let measurements = Arc::new(Measurements::new(MeasurementKind::Counter));
        assert!(run(&config, &factory, measurements).is_err());
    }
}
