//! HdrHistogram measurement strategy
//!
//! Tracks latencies from 1 microsecond to 1 hour with 3 significant digits
//! (0.1% precision), giving accurate percentiles at constant cost per
//! sample. Each bucket owns its histogram behind its own mutex, so workers
//! recording different operation types never contend.

use hdrhistogram::Histogram;
use std::sync::Mutex;

use super::{MeasurementSink, OpMeasurement};
use crate::Result;

/// Highest trackable latency: 1 hour in microseconds.
const MAX_LATENCY_US: u64 = 3_600_000_000;

/// Percentiles exported for every histogram series.
const EXPORT_PERCENTILES: [f64; 5] = [50.0, 95.0, 99.0, 99.9, 99.99];

/// Percentile-accurate latency collector.
#[derive(Debug)]
pub struct HistogramMeasurement {
    histogram: Mutex<Histogram<u64>>,
}

impl HistogramMeasurement {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, MAX_LATENCY_US, 3)
            .expect("histogram bounds are statically valid");
        Self {
            histogram: Mutex::new(histogram),
        }
    }

    /// Latency at `percentile` in microseconds.
    pub fn percentile_us(&self, percentile: f64) -> u64 {
        self.histogram.lock().unwrap().value_at_quantile(percentile / 100.0)
    }

    /// Mean latency in microseconds.
    pub fn mean_us(&self) -> f64 {
        self.histogram.lock().unwrap().mean()
    }
}

impl Default for HistogramMeasurement {
    fn default() -> Self {
        Self::new()
    }
}

impl OpMeasurement for HistogramMeasurement {
    fn measure(&self, latency_us: i64) {
        // Clamp into the trackable range; negative intended latencies
        // (completion before the scheduled deadline) land in the lowest bin
        let value = (latency_us.max(1) as u64).min(MAX_LATENCY_US);
        let mut histogram = self.histogram.lock().unwrap();
        let _ = histogram.record(value);
    }

    fn count(&self) -> u64 {
        self.histogram.lock().unwrap().len()
    }

    fn export(&self, group: &str, sink: &mut dyn MeasurementSink) -> Result<()> {
        let histogram = self.histogram.lock().unwrap();
        sink.write(group, "Total Operations", histogram.len() as f64)?;
        sink.write(group, "Average Latency (us)", histogram.mean())?;
        sink.write(group, "Min Latency (us)", histogram.min() as f64)?;
        sink.write(group, "Max Latency (us)", histogram.max() as f64)?;
        for percentile in EXPORT_PERCENTILES {
            sink.write(
                group,
                &format!("{percentile}th Percentile Latency (us)"),
                histogram.value_at_quantile(percentile / 100.0) as f64,
            )?;
        }
        Ok(())
    }

    fn summary(&self) -> String {
        let histogram = self.histogram.lock().unwrap();
        format!(
            "ops={} mean={:.1}us p99={}us max={}us",
            histogram.len(),
            histogram.mean(),
            histogram.value_at_quantile(0.99),
            histogram.max()
        )
    }
}
