//! TracePulse - trace-driven storage load generator
//!
//! TracePulse drives configurable operation mixes against a pluggable storage
//! backend at a controlled rate and measures how long every operation took,
//! correcting for coordinated omission under saturation.
//!
//! # Architecture
//!
//! - **Trace replay**: inter-arrival timing replayed from recorded traces
//! - **Warmup ramp**: load increases in steps before steady-state replay
//! - **Open-loop scheduling**: per-worker deadlines computed ahead of dispatch
//! - **Instrumented wrapper**: every storage call timed twice (actual and
//!   intended latency) and fed into a shared measurement aggregator
//! - **Pluggable measurements**: counter-only or HdrHistogram strategies

pub mod config;
pub mod executor;
pub mod measure;
pub mod mix;
pub mod schedule;
pub mod store;
pub mod trace;
pub mod warmup;
pub mod worker;
pub mod wrapper;

// Re-export commonly used types
pub use config::RunConfig;
pub use measure::Measurements;
pub use store::{Status, StorageBackend};

/// Result type used throughout TracePulse
pub type Result<T> = anyhow::Result<T>;
