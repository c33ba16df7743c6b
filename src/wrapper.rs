//! Instrumented execution wrapper
//!
//! Wraps a storage backend and measures every call: actual latency (from
//! dispatch) and intended latency (from the scheduler-computed deadline, so
//! queueing delay under saturation is charged to the operation that should
//! have started earlier, correcting for coordinated omission). Statuses are
//! counted, latencies land in per-bucket series, and a per-verb tracing span
//! covers every call with guaranteed release on all exit paths.
//!
//! Failures never cross the wrapper boundary as errors: a fault at the
//! binding boundary becomes a `Status::Error` outcome, measured and counted
//! like any other completion. Asynchronous completions - success and failure
//! alike - run through the same measurement hook, either inline on the
//! binding's completion thread or on the dedicated completion pool.

use crossbeam::channel::{self, Receiver};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace_span;

use crate::executor::CompletionExecutor;
use crate::measure::Measurements;
use crate::store::{
    AsyncCompletion, FieldMap, Operation, OperationOutcome, Status, StorageBackend, Verb,
};
use crate::Result;

/// How failed operations are mapped to latency buckets.
///
/// Success buckets are the bare verb name. Failures bucket as
/// `VERB-<STATUS>` when every error is reported distinctly or the status
/// name is in the tracked set; everything else collapses into the generic
/// `VERB-FAILED` bucket so cardinality stays bounded by default.
#[derive(Debug, Clone, Default)]
pub struct BucketPolicy {
    pub report_latency_for_each_error: bool,
    pub latency_tracked_errors: HashSet<String>,
}

impl BucketPolicy {
    /// Measurement bucket for `verb` completing with `status`.
    pub fn bucket_name(&self, verb: &str, status: &Status) -> String {
        if status.is_ok() {
            verb.to_string()
        } else if self.report_latency_for_each_error
            || self.latency_tracked_errors.contains(status.name())
        {
            format!("{}-{}", verb, status.name())
        } else {
            format!("{verb}-FAILED")
        }
    }
}

/// Microseconds from `from` to `to`, negative when `to` precedes `from`.
///
/// Intended latency is measured against the scheduled deadline, which an
/// operation dispatched ahead of schedule can beat.
fn signed_micros(from: Instant, to: Instant) -> i64 {
    match to.checked_duration_since(from) {
        Some(elapsed) => elapsed.as_micros() as i64,
        None => -(from.duration_since(to).as_micros() as i64),
    }
}

/// Pending handle for an asynchronous operation.
///
/// The outcome is delivered after the completion hook has already fed the
/// aggregator; waiting on the handle is optional.
#[derive(Debug)]
pub struct PendingOp {
    outcome: Receiver<OperationOutcome>,
}

impl PendingOp {
    /// Block until the operation resolves.
    pub fn wait(&self) -> Result<OperationOutcome> {
        self.outcome
            .recv()
            .map_err(|_| anyhow::anyhow!("async completion dropped without resolving"))
    }

    /// The outcome, if the operation has already resolved.
    pub fn try_outcome(&self) -> Option<OperationOutcome> {
        self.outcome.try_recv().ok()
    }
}

/// Storage backend wrapper that measures latencies and counts statuses.
pub struct InstrumentedStore {
    backend: Box<dyn StorageBackend>,
    measurements: Arc<Measurements>,
    policy: Arc<BucketPolicy>,
    executor: Arc<CompletionExecutor>,
}

impl InstrumentedStore {
    pub fn new(
        backend: Box<dyn StorageBackend>,
        measurements: Arc<Measurements>,
        policy: BucketPolicy,
        executor: Arc<CompletionExecutor>,
    ) -> Self {
        Self {
            backend,
            measurements,
            policy: Arc::new(policy),
            executor,
        }
    }

    /// Initialize the wrapped backend. Init faults are fatal, not outcomes.
    pub fn init(&mut self) -> Result<()> {
        let _span = trace_span!("store", verb = %Verb::Init).entered();
        self.backend.init()
    }

    /// Tear down the wrapped backend; the teardown itself is measured.
    pub fn cleanup(&mut self, intended: Instant) -> Result<()> {
        let _span = trace_span!("store", verb = %Verb::Cleanup).entered();
        let start = Instant::now();
        self.backend.cleanup()?;
        let end = Instant::now();
        self.measure(Verb::Cleanup.name(), &Status::Ok, intended, start, end);
        Ok(())
    }

    /// Read one record at its scheduled deadline.
    pub fn read(
        &mut self,
        table: &str,
        key: &str,
        fields: Option<&[String]>,
        intended: Instant,
    ) -> (Status, FieldMap) {
        let _span = trace_span!("store", verb = %Verb::Read, table).entered();
        let start = Instant::now();
        let (status, result) = match self.backend.read(table, key, fields) {
            Ok(resolved) => resolved,
            Err(fault) => {
                tracing::debug!(error = %fault, "read faulted at the binding boundary");
                (Status::Error, FieldMap::new())
            }
        };
        let end = Instant::now();
        self.finish(Verb::Read.name(), &status, intended, start, end);
        (status, result)
    }

    /// Range scan at its scheduled deadline.
    pub fn scan(
        &mut self,
        table: &str,
        start_key: &str,
        count: usize,
        fields: Option<&[String]>,
        intended: Instant,
    ) -> (Status, Vec<FieldMap>) {
        let _span = trace_span!("store", verb = %Verb::Scan, table).entered();
        let start = Instant::now();
        let (status, rows) = match self.backend.scan(table, start_key, count, fields) {
            Ok(resolved) => resolved,
            Err(fault) => {
                tracing::debug!(error = %fault, "scan faulted at the binding boundary");
                (Status::Error, Vec::new())
            }
        };
        let end = Instant::now();
        self.finish(Verb::Scan.name(), &status, intended, start, end);
        (status, rows)
    }

    /// Insert a record at its scheduled deadline.
    pub fn insert(
        &mut self,
        table: &str,
        key: &str,
        values: &FieldMap,
        intended: Instant,
    ) -> Status {
        let _span = trace_span!("store", verb = %Verb::Insert, table).entered();
        self.write_verb(Verb::Insert, table, key, values, intended)
    }

    /// Update a record at its scheduled deadline.
    pub fn update(
        &mut self,
        table: &str,
        key: &str,
        values: &FieldMap,
        intended: Instant,
    ) -> Status {
        let _span = trace_span!("store", verb = %Verb::Update, table).entered();
        self.write_verb(Verb::Update, table, key, values, intended)
    }

    /// Delete a record at its scheduled deadline.
    pub fn delete(&mut self, table: &str, key: &str, intended: Instant) -> Status {
        let _span = trace_span!("store", verb = %Verb::Delete, table).entered();
        let start = Instant::now();
        let status = match self.backend.delete(table, key) {
            Ok(status) => status,
            Err(fault) => {
                tracing::debug!(error = %fault, "delete faulted at the binding boundary");
                Status::Error
            }
        };
        let end = Instant::now();
        self.finish(Verb::Delete.name(), &status, intended, start, end);
        status
    }

    fn write_verb(
        &mut self,
        verb: Verb,
        table: &str,
        key: &str,
        values: &FieldMap,
        intended: Instant,
    ) -> Status {
        let start = Instant::now();
        let result = match verb {
            Verb::Insert => self.backend.insert(table, key, values),
            _ => self.backend.update(table, key, values),
        };
        let status = match result {
            Ok(status) => status,
            Err(fault) => {
                tracing::debug!(error = %fault, verb = %verb, "write faulted at the binding boundary");
                Status::Error
            }
        };
        let end = Instant::now();
        self.finish(verb.name(), &status, intended, start, end);
        status
    }

    /// Dispatch one mix operation synchronously.
    pub fn dispatch(&mut self, op: &Operation, intended: Instant) -> Status {
        match op.verb {
            Verb::Read => {
                self.read(&op.table, &op.key, op.fields.as_deref(), intended)
                    .0
            }
            Verb::Scan => {
                self.scan(
                    &op.table,
                    &op.key,
                    op.scan_count,
                    op.fields.as_deref(),
                    intended,
                )
                .0
            }
            Verb::Insert => {
                let values = op.values.clone().unwrap_or_default();
                self.insert(&op.table, &op.key, &values, intended)
            }
            Verb::Update => {
                let values = op.values.clone().unwrap_or_default();
                self.update(&op.table, &op.key, &values, intended)
            }
            Verb::Delete => self.delete(&op.table, &op.key, intended),
            Verb::Init | Verb::Cleanup => Status::Error,
        }
    }

    /// Dispatch a read without blocking; the completion hook measures it.
    pub fn read_async(
        &mut self,
        table: &str,
        key: &str,
        fields: Option<&[String]>,
        intended: Instant,
    ) -> Result<PendingOp> {
        let _span = trace_span!("store", verb = %Verb::Read, table, mode = "async").entered();
        let start = Instant::now();
        let (done, pending) = self.completion_hook(Verb::Read, intended, start);
        self.backend.read_async(table, key, fields, done)?;
        Ok(pending)
    }

    /// Dispatch an insert without blocking; the completion hook measures it.
    pub fn insert_async(
        &mut self,
        table: &str,
        key: &str,
        values: &FieldMap,
        intended: Instant,
    ) -> Result<PendingOp> {
        let _span = trace_span!("store", verb = %Verb::Insert, table, mode = "async").entered();
        let start = Instant::now();
        let (done, pending) = self.completion_hook(Verb::Insert, intended, start);
        self.backend.insert_async(table, key, values, done)?;
        Ok(pending)
    }

    /// Dispatch an update without blocking; the completion hook measures it.
    pub fn update_async(
        &mut self,
        table: &str,
        key: &str,
        values: &FieldMap,
        intended: Instant,
    ) -> Result<PendingOp> {
        let _span = trace_span!("store", verb = %Verb::Update, table, mode = "async").entered();
        let start = Instant::now();
        let (done, pending) = self.completion_hook(Verb::Update, intended, start);
        self.backend.update_async(table, key, values, done)?;
        Ok(pending)
    }

    /// Build the completion callback for an async dispatch.
    ///
    /// The hook computes the end time, parses the native payload (or derives
    /// an ERROR outcome from a failed completion - the failure path feeds
    /// the aggregator exactly like the success path), and resolves the
    /// pending handle. It runs inline on the binding's completion thread or
    /// on the dedicated pool, per configuration.
    fn completion_hook(
        &self,
        verb: Verb,
        intended: Instant,
        start: Instant,
    ) -> (crate::store::CompletionCallback, PendingOp) {
        let measurements = Arc::clone(&self.measurements);
        let policy = Arc::clone(&self.policy);
        let (tx, rx) = channel::bounded(1);

        let hook = move |completion: AsyncCompletion| {
            let end = Instant::now();
            let status = match completion.result {
                Ok(payload) => (completion.parse)(payload).0,
                Err(failure) => {
                    tracing::debug!(error = %failure, verb = %verb, "async completion failed");
                    Status::Error
                }
            };
            let actual_us = signed_micros(start, end);
            let intended_us = signed_micros(intended, end);
            let bucket = policy.bucket_name(verb.name(), &status);
            measurements.measure(&bucket, actual_us);
            measurements.measure_intended(&bucket, intended_us);
            measurements.report_status(verb.name(), &status);
            let _ = tx.send(OperationOutcome {
                status,
                actual_us,
                intended_us,
            });
        };

        let executor = Arc::clone(&self.executor);
        let done: crate::store::CompletionCallback = Box::new(move |completion| {
            match executor.as_ref() {
                CompletionExecutor::Inline => hook(completion),
                CompletionExecutor::Dedicated(pool) => {
                    pool.execute(Box::new(move || hook(completion)))
                }
            }
        });

        (done, PendingOp { outcome: rx })
    }

    fn finish(&self, verb: &str, status: &Status, intended: Instant, start: Instant, end: Instant) {
        self.measure(verb, status, intended, start, end);
        self.measurements.report_status(verb, status);
    }

    fn measure(&self, verb: &str, status: &Status, intended: Instant, start: Instant, end: Instant) {
        let bucket = self.policy.bucket_name(verb, status);
        self.measurements.measure(&bucket, signed_micros(start, end));
        self.measurements
            .measure_intended(&bucket, signed_micros(intended, end));
    }
}
