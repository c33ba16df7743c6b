//! Measurement aggregation
//!
//! One `Measurements` instance is shared by every worker for the lifetime of
//! the process; it must absorb concurrent `measure`/`report_status` calls
//! with no lost updates. Per-operation records are created lazily behind an
//! `RwLock<HashMap>` with a read-path fast hit, and the hot path inside each
//! record is atomics (counter strategy) or a per-record mutex (histogram
//! strategy); there is no single global lock on the hot path.
//!
//! Two latency series are kept per bucket: *actual* (dispatch to completion)
//! and *intended* (scheduled deadline to completion). The intended series is
//! exported under an `Intended-` prefixed group.
//!
//! # Example
//!
//! ```
//! use tracepulse::measure::{MeasurementKind, Measurements};
//! use tracepulse::store::Status;
//!
//! let measurements = Measurements::new(MeasurementKind::Histogram);
//! measurements.measure("READ", 120);
//! measurements.measure_intended("READ", 450);
//! measurements.report_status("READ", &Status::Ok);
//!
//! assert_eq!(measurements.total_count("READ"), 1);
//! assert_eq!(measurements.status_count("READ", "OK"), 1);
//! ```

pub mod counter;
pub mod export;
pub mod histogram;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::store::Status;
use crate::Result;

use counter::CounterMeasurement;
use histogram::HistogramMeasurement;

/// Export prefix for the intended-latency series of a bucket.
const INTENDED_PREFIX: &str = "Intended-";

/// Sink accepting `(group, label, value)` triples.
///
/// The aggregator is agnostic to the serialization format the sink produces;
/// see [`export`] for the text and JSON sinks.
pub trait MeasurementSink {
    fn write(&mut self, group: &str, label: &str, value: f64) -> Result<()>;
}

/// One interchangeable latency-collection strategy.
///
/// Implementations must tolerate concurrent `measure` calls; the wrapper is
/// agnostic to which strategy is installed.
pub trait OpMeasurement: Send + Sync {
    /// Record one latency sample in microseconds.
    fn measure(&self, latency_us: i64);

    /// Number of samples recorded so far.
    fn count(&self) -> u64;

    /// Export this series under `group`.
    fn export(&self, group: &str, sink: &mut dyn MeasurementSink) -> Result<()>;

    /// One-line human-readable summary.
    fn summary(&self) -> String;
}

/// Which latency-collection strategy new records use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum MeasurementKind {
    /// Count and mean only; baseline with the least overhead
    Counter,
    /// HdrHistogram percentiles
    Histogram,
}

impl MeasurementKind {
    fn instantiate(self) -> Box<dyn OpMeasurement> {
        match self {
            MeasurementKind::Counter => Box::new(CounterMeasurement::new()),
            MeasurementKind::Histogram => Box::new(HistogramMeasurement::new()),
        }
    }
}

/// Per-bucket accumulation: actual and intended latency series plus status
/// counts keyed by status name.
struct OpRecord {
    actual: Box<dyn OpMeasurement>,
    intended: Box<dyn OpMeasurement>,
    statuses: RwLock<HashMap<String, Arc<AtomicU64>>>,
}

impl OpRecord {
    fn new(kind: MeasurementKind) -> Self {
        Self {
            actual: kind.instantiate(),
            intended: kind.instantiate(),
            statuses: RwLock::new(HashMap::new()),
        }
    }

    fn count_status(&self, name: &str) {
        {
            let statuses = self.statuses.read().unwrap();
            if let Some(counter) = statuses.get(name) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        let mut statuses = self.statuses.write().unwrap();
        statuses
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Process-wide, thread-safe latency and status aggregator.
pub struct Measurements {
    kind: MeasurementKind,
    records: RwLock<HashMap<String, Arc<OpRecord>>>,
}

impl Measurements {
    /// Create an aggregator using `kind` for every bucket.
    pub fn new(kind: MeasurementKind) -> Self {
        Self {
            kind,
            records: RwLock::new(HashMap::new()),
        }
    }

    fn record_for(&self, bucket: &str) -> Arc<OpRecord> {
        {
            let records = self.records.read().unwrap();
            if let Some(record) = records.get(bucket) {
                return Arc::clone(record);
            }
        }
        let mut records = self.records.write().unwrap();
        Arc::clone(
            records
                .entry(bucket.to_string())
                .or_insert_with(|| Arc::new(OpRecord::new(self.kind))),
        )
    }

    /// Record an actual latency sample for `bucket`, microseconds.
    pub fn measure(&self, bucket: &str, latency_us: i64) {
        self.record_for(bucket).actual.measure(latency_us);
    }

    /// Record an intended latency sample for `bucket`, microseconds.
    pub fn measure_intended(&self, bucket: &str, latency_us: i64) {
        self.record_for(bucket).intended.measure(latency_us);
    }

    /// Count one occurrence of `status` for `bucket`.
    pub fn report_status(&self, bucket: &str, status: &Status) {
        self.record_for(bucket).count_status(status.name());
    }

    /// Total actual-latency samples recorded for `bucket`.
    pub fn total_count(&self, bucket: &str) -> u64 {
        let records = self.records.read().unwrap();
        records.get(bucket).map_or(0, |r| r.actual.count())
    }

    /// Occurrences of `status_name` counted for `bucket`.
    pub fn status_count(&self, bucket: &str, status_name: &str) -> u64 {
        let records = self.records.read().unwrap();
        records.get(bucket).map_or(0, |record| {
            let statuses = record.statuses.read().unwrap();
            statuses
                .get(status_name)
                .map_or(0, |c| c.load(Ordering::Relaxed))
        })
    }

    /// Bucket names seen so far, sorted for deterministic output.
    pub fn buckets(&self) -> Vec<String> {
        let records = self.records.read().unwrap();
        let mut names: Vec<String> = records.keys().cloned().collect();
        names.sort();
        names
    }

    /// Export every bucket into `sink`: the actual series under the bucket
    /// name, the intended series under `Intended-<bucket>`, and the status
    /// counts as `Return=<name>` labels.
    pub fn export(&self, sink: &mut dyn MeasurementSink) -> Result<()> {
        for bucket in self.buckets() {
            let record = self.record_for(&bucket);
            record.actual.export(&bucket, sink)?;
            if record.intended.count() > 0 {
                record
                    .intended
                    .export(&format!("{INTENDED_PREFIX}{bucket}"), sink)?;
            }

            let statuses = record.statuses.read().unwrap();
            let mut names: Vec<&String> = statuses.keys().collect();
            names.sort();
            for name in names {
                let count = statuses[name].load(Ordering::Relaxed);
                sink.write(&bucket, &format!("Return={name}"), count as f64)?;
            }
        }
        Ok(())
    }

    /// Human-readable one-line-per-bucket summary.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for bucket in self.buckets() {
            let record = self.record_for(&bucket);
            lines.push(format!("[{}] {}", bucket, record.actual.summary()));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counts_reflected_exactly_once() {
        let measurements = Measurements::new(MeasurementKind::Counter);
        measurements.measure("READ", 100);
        measurements.measure("READ", 200);
        measurements.measure("UPDATE", 50);

        assert_eq!(measurements.total_count("READ"), 2);
        assert_eq!(measurements.total_count("UPDATE"), 1);
        assert_eq!(measurements.total_count("DELETE"), 0);
    }

    #[test]
    fn test_status_counting() {
        let measurements = Measurements::new(MeasurementKind::Counter);
        measurements.report_status("READ", &Status::Ok);
        measurements.report_status("READ", &Status::Ok);
        measurements.report_status("READ", &Status::NotFound);

        assert_eq!(measurements.status_count("READ", "OK"), 2);
        assert_eq!(measurements.status_count("READ", "NOT_FOUND"), 1);
        assert_eq!(measurements.status_count("READ", "ERROR"), 0);
    }

    #[test]
    fn test_no_lost_updates_under_concurrency() {
        // N workers each recording M operations of the same type must be
        // reflected exactly once each in the final totals.
        let measurements = Arc::new(Measurements::new(MeasurementKind::Histogram));
        let workers = 8;
        let per_worker = 2_000;

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let measurements = Arc::clone(&measurements);
                thread::spawn(move || {
                    for i in 0..per_worker {
                        measurements.measure("READ", (worker * per_worker + i) as i64);
                        measurements.measure_intended("READ", 10);
                        measurements.report_status("READ", &Status::Ok);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let expected = (workers * per_worker) as u64;
        assert_eq!(measurements.total_count("READ"), expected);
        assert_eq!(measurements.status_count("READ", "OK"), expected);
    }

    #[test]
    fn test_buckets_sorted() {
        let measurements = Measurements::new(MeasurementKind::Counter);
        measurements.measure("UPDATE", 1);
        measurements.measure("READ", 1);
        measurements.measure("READ-FAILED", 1);

        assert_eq!(measurements.buckets(), vec!["READ", "READ-FAILED", "UPDATE"]);
    }

    #[test]
    fn test_export_includes_intended_and_statuses() {
        struct Capture(Vec<(String, String, f64)>);
        impl MeasurementSink for Capture {
            fn write(&mut self, group: &str, label: &str, value: f64) -> Result<()> {
                self.0.push((group.to_string(), label.to_string(), value));
                Ok(())
            }
        }

        let measurements = Measurements::new(MeasurementKind::Counter);
        measurements.measure("READ", 100);
        measurements.measure_intended("READ", 300);
        measurements.report_status("READ", &Status::Ok);

        let mut sink = Capture(Vec::new());
        measurements.export(&mut sink).unwrap();

        assert!(sink.0.iter().any(|(g, _, _)| g == "READ"));
        assert!(sink.0.iter().any(|(g, _, _)| g == "Intended-READ"));
        assert!(sink
            .0
            .iter()
            .any(|(g, l, v)| g == "READ" && l == "Return=OK" && *v == 1.0));
    }

    #[test]
    fn test_summary_mentions_every_bucket() {
        let measurements = Measurements::new(MeasurementKind::Counter);
        measurements.measure("READ", 100);
        measurements.measure("SCAN", 500);

        let summary = measurements.summary();
        assert!(summary.contains("[READ]"));
        assert!(summary.contains("[SCAN]"));
    }
}
