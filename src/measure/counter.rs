//! Count-and-mean measurement strategy
//!
//! Keeps nothing beyond an operation count and a running latency total.
//! Primarily a baseline for gauging the overhead the richer strategies
//! impose, but also the cheapest way to sanity-check a run.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use super::{MeasurementSink, OpMeasurement};
use crate::Result;

/// Lock-free count + mean latency collector.
#[derive(Debug, Default)]
pub struct CounterMeasurement {
    ops: AtomicU64,
    total_latency_us: AtomicI64,
}

impl CounterMeasurement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mean latency in microseconds, or 0.0 before any sample.
    pub fn mean_us(&self) -> f64 {
        let ops = self.ops.load(Ordering::Relaxed);
        if ops == 0 {
            return 0.0;
        }
        self.total_latency_us.load(Ordering::Relaxed) as f64 / ops as f64
    }
}

impl OpMeasurement for CounterMeasurement {
    fn measure(&self, latency_us: i64) {
        self.ops.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
    }

    fn count(&self) -> u64 {
        self.ops.load(Ordering::Relaxed)
    }

    fn export(&self, group: &str, sink: &mut dyn MeasurementSink) -> Result<()> {
        sink.write(group, "Total Operations", self.count() as f64)?;
        sink.write(group, "Average Latency (us)", self.mean_us())?;
        Ok(())
    }

    fn summary(&self) -> String {
        format!("ops={} mean={:.1}us", self.count(), self.mean_us())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_and_mean() {
        let measurement = CounterMeasurement::new();
        measurement.measure(100);
        measurement.measure(200);
        measurement.measure(300);

        assert_eq!(measurement.count(), 3);
        assert!((measurement.mean_us() - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_mean_is_zero() {
        let measurement = CounterMeasurement::new();
        assert_eq!(measurement.count(), 0);
        assert_eq!(measurement.mean_us(), 0.0);
    }

    #[test]
    fn test_negative_samples_allowed() {
        // Intended latency can be negative when an operation completes
        // before its scheduled deadline
        let measurement = CounterMeasurement::new();
        measurement.measure(-50);
        measurement.measure(150);

        assert_eq!(measurement.count(), 2);
        assert!((measurement.mean_us() - 50.0).abs() < f64::EPSILON);
    }
}
