//! Run configuration
//!
//! One immutable `RunConfig` value is built at startup (from the CLI or by
//! hand in tests) and passed explicitly to the scheduler, wrapper, and
//! aggregator at construction time. Nothing reads mutable global state.

use anyhow::bail;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::measure::MeasurementKind;
use crate::mix::MixConfig;
use crate::Result;

/// Complete, validated harness configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Path to the inter-arrival trace file
    pub trace_path: PathBuf,
    /// Warmup window; zero disables the ramp
    pub warmup: Duration,
    /// Number of warmup ramp intervals
    pub warmup_intervals: u32,
    /// Worker thread count
    pub threads: u32,
    /// Steady-state operation budget override. Smaller than the trace ends
    /// the run early; larger only logs a warning and ends at trace end.
    pub operation_count: Option<u64>,
    /// Give every distinct error status its own latency bucket
    pub report_latency_for_each_error: bool,
    /// Status names bucketed distinctly even when the global flag is off
    pub latency_tracked_errors: HashSet<String>,
    /// Size of the dedicated async-completion pool; `None` runs completions
    /// inline on the binding's completion thread
    pub completion_pool_threads: Option<usize>,
    /// Ceiling on in-flight async operations per worker; `None` preserves
    /// unlimited overlap for maximum-throughput testing
    pub max_in_flight: Option<usize>,
    /// Dispatch through the asynchronous path where the verb supports it
    pub async_dispatch: bool,
    /// Latency-collection strategy for every bucket
    pub measurement: MeasurementKind,
    /// Operation mix weights
    pub mix: MixConfig,
    /// Key space size for the mix generator
    pub record_count: u64,
    /// Target table name
    pub table: String,
}

impl RunConfig {
    /// Minimal configuration for a given trace; callers override fields.
    pub fn for_trace(trace_path: impl Into<PathBuf>) -> Self {
        Self {
            trace_path: trace_path.into(),
            warmup: Duration::ZERO,
            warmup_intervals: 5,
            threads: 1,
            operation_count: None,
            report_latency_for_each_error: false,
            latency_tracked_errors: HashSet::new(),
            completion_pool_threads: None,
            max_in_flight: None,
            async_dispatch: false,
            measurement: MeasurementKind::Histogram,
            mix: MixConfig::default(),
            record_count: 1000,
            table: "usertable".to_string(),
        }
    }

    /// Reject impossible combinations before any worker starts.
    ///
    /// Warmup calibration against the trace itself happens later, after the
    /// pre-scan; this pass covers everything checkable without I/O.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            bail!("thread count must be at least 1");
        }
        if !self.warmup.is_zero() && self.warmup_intervals == 0 {
            bail!("warmup requires at least 1 ramp interval");
        }
        if self.record_count == 0 {
            bail!("record count must be at least 1");
        }
        if let Some(0) = self.completion_pool_threads {
            bail!("dedicated completion pool needs at least 1 thread");
        }
        if let Some(0) = self.max_in_flight {
            bail!("in-flight ceiling must be at least 1");
        }
        self.mix.validate()?;
        Ok(())
    }
}
