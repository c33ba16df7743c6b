//! TracePulse CLI entry point

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::collections::HashSet;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracepulse::config::RunConfig;
use tracepulse::measure::export::{JsonSink, TextSink};
use tracepulse::measure::{MeasurementKind, Measurements};
use tracepulse::store::mock::MockBackend;
use tracepulse::store::pool::RefCountedPool;
use tracepulse::store::StorageBackend;
use tracepulse::worker::{self, BackendFactory};
use tracepulse::Result;

/// Output serialization for the measurement export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Text,
    Json,
}

/// Trace-driven storage load generator
#[derive(Debug, Parser)]
#[command(name = "tracepulse", version, about)]
struct Cli {
    /// Trace file of inter-arrival offsets (nanoseconds, one per line)
    #[arg(long, value_name = "FILE")]
    trace: PathBuf,

    /// Warmup window in seconds; 0 disables the ramp
    #[arg(long, default_value_t = 0)]
    warmup: u64,

    /// Number of warmup ramp intervals
    #[arg(long, default_value_t = 5)]
    warmup_intervals: u32,

    /// Worker thread count
    #[arg(long, short = 't', default_value_t = num_cpus::get() as u32)]
    threads: u32,

    /// Stop after this many steady-state operations (default: trace length)
    #[arg(long, value_name = "COUNT")]
    operation_count: Option<u64>,

    /// Give every distinct error status its own latency bucket
    #[arg(long)]
    report_each_error: bool,

    /// Status names bucketed distinctly even without --report-each-error
    #[arg(long, value_name = "STATUS", value_delimiter = ',')]
    tracked_errors: Vec<String>,

    /// Run async completions on a dedicated pool of this many threads
    #[arg(long, value_name = "THREADS")]
    completion_pool: Option<usize>,

    /// Ceiling on in-flight async operations per worker (default: unlimited)
    #[arg(long, value_name = "COUNT")]
    max_in_flight: Option<usize>,

    /// Dispatch through the asynchronous path where the verb supports it
    #[arg(long)]
    async_dispatch: bool,

    /// Latency-collection strategy
    #[arg(long, value_enum, default_value = "histogram")]
    measurement: MeasurementKind,

    /// Read percentage of the operation mix
    #[arg(long, default_value_t = 95)]
    read_weight: u8,

    /// Update percentage of the operation mix
    #[arg(long, default_value_t = 5)]
    update_weight: u8,

    /// Insert percentage of the operation mix
    #[arg(long, default_value_t = 0)]
    insert_weight: u8,

    /// Scan percentage of the operation mix
    #[arg(long, default_value_t = 0)]
    scan_weight: u8,

    /// Delete percentage of the operation mix
    #[arg(long, default_value_t = 0)]
    delete_weight: u8,

    /// Key space size
    #[arg(long, default_value_t = 1000)]
    record_count: u64,

    /// Target table name
    #[arg(long, default_value = "usertable")]
    table: String,

    /// Export format for the measurement report
    #[arg(long, value_enum, default_value = "text")]
    export: ExportFormat,

    /// Write the report to a file instead of stdout
    #[arg(long, value_name = "FILE")]
    export_file: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> RunConfig {
        let mut config = RunConfig::for_trace(self.trace);
        config.warmup = Duration::from_secs(self.warmup);
        config.warmup_intervals = self.warmup_intervals;
        config.threads = self.threads;
        config.operation_count = self.operation_count;
        config.report_latency_for_each_error = self.report_each_error;
        config.latency_tracked_errors = self.tracked_errors.iter().cloned().collect::<HashSet<_>>();
        config.completion_pool_threads = self.completion_pool;
        config.max_in_flight = self.max_in_flight;
        config.async_dispatch = self.async_dispatch;
        config.measurement = self.measurement;
        config.mix.read_weight = self.read_weight;
        config.mix.update_weight = self.update_weight;
        config.mix.insert_weight = self.insert_weight;
        config.mix.scan_weight = self.scan_weight;
        config.mix.delete_weight = self.delete_weight;
        config.record_count = self.record_count;
        config.table = self.table;
        config
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("TracePulse v{}", env!("CARGO_PKG_VERSION"));
    println!("Trace-driven storage load generator");
    println!();

    let cli = Cli::parse();
    let export_format = cli.export;
    let export_file = cli.export_file.clone();
    let config = cli.into_config();
    config.validate().context("invalid configuration")?;

    // All worker backends share one in-memory table through the pool
    let pool = Arc::new(RefCountedPool::new());
    let factory: Box<BackendFactory> = Box::new(move |_worker| {
        Ok(Box::new(MockBackend::with_pool(Arc::clone(&pool))) as Box<dyn StorageBackend>)
    });

    let measurements = Arc::new(Measurements::new(config.measurement));
    let summary = worker::run(&config, &factory, Arc::clone(&measurements))?;

    println!(
        "{} operations in {:.3}s",
        summary.operations,
        summary.elapsed.as_secs_f64()
    );
    println!();

    export_report(&measurements, export_format, export_file.as_deref())
}

fn export_report(
    measurements: &Measurements,
    format: ExportFormat,
    path: Option<&std::path::Path>,
) -> Result<()> {
    match (format, path) {
        (ExportFormat::Text, None) => {
            let mut sink = TextSink::new(std::io::stdout().lock());
            measurements.export(&mut sink)?;
            sink.into_inner()?;
        }
        (ExportFormat::Text, Some(path)) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut sink = TextSink::new(file);
            measurements.export(&mut sink)?;
            sink.into_inner()?;
        }
        (ExportFormat::Json, target) => {
            let mut sink = JsonSink::new();
            measurements.export(&mut sink)?;
            match target {
                None => sink.finish(std::io::stdout().lock())?,
                Some(path) => {
                    let file = File::create(path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    sink.finish(file)?;
                }
            }
        }
    }
    Ok(())
}
