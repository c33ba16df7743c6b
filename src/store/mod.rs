//! Storage backend abstraction
//!
//! The harness core never talks to a wire protocol, connection pool, or
//! query builder; it only depends on the `StorageBackend` trait defined
//! here. A concrete binding (a CQL client, a key-value store SDK, the
//! in-process mock) implements the capability set and is instantiated once
//! per worker thread.
//!
//! Operation failures are values, not errors: every data verb resolves to a
//! [`Status`], and a `Result::Err` from a binding marks a fault at the
//! binding boundary (the instrumented wrapper converts it to
//! `Status::Error` so one failing operation never terminates a worker).

pub mod mock;
pub mod pool;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use crate::Result;

/// Field name to value mapping carried by reads, inserts, and updates.
pub type FieldMap = HashMap<String, String>;

/// Uniform success/failure result of a storage operation.
///
/// Statuses replace thrown errors at the core boundary; a non-OK status is
/// measured and counted exactly like a success, just bucketed differently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Status {
    /// The operation completed successfully
    Ok,
    /// The requested record does not exist
    NotFound,
    /// The operation failed for an unspecified reason
    Error,
    /// An extensible, binding-defined failure class (e.g. "TIMEOUT")
    Named(String),
}

impl Status {
    /// Whether this status represents success.
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Stable display name used for status counting and latency buckets.
    pub fn name(&self) -> &str {
        match self {
            Status::Ok => "OK",
            Status::NotFound => "NOT_FOUND",
            Status::Error => "ERROR",
            Status::Named(name) => name,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Core storage verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Read,
    Update,
    Insert,
    Delete,
    Scan,
    Init,
    Cleanup,
}

impl Verb {
    /// Upper-case verb name used as the measurement bucket prefix.
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Read => "READ",
            Verb::Update => "UPDATE",
            Verb::Insert => "INSERT",
            Verb::Delete => "DELETE",
            Verb::Scan => "SCAN",
            Verb::Init => "INIT",
            Verb::Cleanup => "CLEANUP",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One operation drawn from the mix, immutable once dispatched.
#[derive(Debug, Clone)]
pub struct Operation {
    pub verb: Verb,
    /// Target table name
    pub table: String,
    /// Target record identifier (start key for scans)
    pub key: String,
    /// Field subset to read, or `None` for all fields
    pub fields: Option<Vec<String>>,
    /// Field payload for inserts and updates
    pub values: Option<FieldMap>,
    /// Number of records a scan should return
    pub scan_count: usize,
}

/// Final record of one executed operation.
///
/// Actual latency runs from dispatch to completion; intended latency runs
/// from the scheduled deadline to completion, charging queueing delay under
/// saturation to the operation that should have started earlier.
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub status: Status,
    /// Completion minus dispatch time, microseconds
    pub actual_us: i64,
    /// Completion minus intended (scheduled) dispatch time, microseconds
    pub intended_us: i64,
}

/// Binding-native completion payload for an asynchronous operation.
pub type CompletionPayload = Box<dyn Any + Send>;

/// Parser paired with an asynchronous dispatch: turns the binding's native
/// completion payload into the same `(Status, fields)` shape the synchronous
/// path returns.
pub type ParseFn = Box<dyn FnOnce(CompletionPayload) -> (Status, FieldMap) + Send>;

/// Completion delivered by a binding once an asynchronous operation
/// resolves. Carries the native payload (or the binding's failure message)
/// plus the paired parser.
pub struct AsyncCompletion {
    /// Native payload on success, binding failure message otherwise
    pub result: std::result::Result<CompletionPayload, String>,
    /// Parser for the payload
    pub parse: ParseFn,
}

impl fmt::Debug for AsyncCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCompletion")
            .field("ok", &self.result.is_ok())
            .finish()
    }
}

/// Callback invoked by the binding when an asynchronous operation
/// completes. The callback runs on whatever thread the binding delivers
/// completions from unless the caller reroutes it to a dedicated executor.
pub type CompletionCallback = Box<dyn FnOnce(AsyncCompletion) + Send>;

/// Storage backend capability set.
///
/// One instance exists per worker thread; instances must be `Send` so they
/// can move onto their worker. Shared state behind the instances (a session,
/// a cluster handle) belongs in a [`pool::RefCountedPool`] acquired in
/// `init` and released in `cleanup`.
///
/// # Error handling
///
/// Data verbs report operation-level failures through [`Status`]; an `Err`
/// return means the binding itself faulted and is converted to
/// `Status::Error` by the wrapper. `init` and `cleanup` errors are fatal to
/// the run.
pub trait StorageBackend: Send {
    /// Initialize per-worker state. Called once before the worker loop;
    /// multiple workers may call concurrently.
    fn init(&mut self) -> Result<()>;

    /// Tear down per-worker state. Called once after the worker loop.
    fn cleanup(&mut self) -> Result<()>;

    /// Read one record, returning the requested field subset.
    fn read(&mut self, table: &str, key: &str, fields: Option<&[String]>)
        -> Result<(Status, FieldMap)>;

    /// Range scan starting at `start_key`, returning up to `count` rows.
    fn scan(
        &mut self,
        table: &str,
        start_key: &str,
        count: usize,
        fields: Option<&[String]>,
    ) -> Result<(Status, Vec<FieldMap>)>;

    /// Insert a record.
    fn insert(&mut self, table: &str, key: &str, values: &FieldMap) -> Result<Status>;

    /// Overwrite fields of an existing record.
    fn update(&mut self, table: &str, key: &str, values: &FieldMap) -> Result<Status>;

    /// Delete a record.
    fn delete(&mut self, table: &str, key: &str) -> Result<Status>;

    /// Dispatch a read without blocking. The binding invokes `done` from its
    /// completion thread; the delivered [`AsyncCompletion`] carries the
    /// parser paired with this dispatch.
    ///
    /// Bindings without a native asynchronous path keep the default
    /// implementation, which rejects the dispatch.
    fn read_async(
        &mut self,
        _table: &str,
        _key: &str,
        _fields: Option<&[String]>,
        _done: CompletionCallback,
    ) -> Result<()> {
        anyhow::bail!("backend does not support asynchronous reads")
    }

    /// Dispatch an insert without blocking. See [`StorageBackend::read_async`].
    fn insert_async(
        &mut self,
        _table: &str,
        _key: &str,
        _values: &FieldMap,
        _done: CompletionCallback,
    ) -> Result<()> {
        anyhow::bail!("backend does not support asynchronous inserts")
    }

    /// Dispatch an update without blocking. See [`StorageBackend::read_async`].
    fn update_async(
        &mut self,
        _table: &str,
        _key: &str,
        _values: &FieldMap,
        _done: CompletionCallback,
    ) -> Result<()> {
        anyhow::bail!("backend does not support asynchronous updates")
    }
}
