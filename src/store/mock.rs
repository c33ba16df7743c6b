//! In-process mock storage backend
//!
//! The mock implements the full `StorageBackend` capability set against an
//! in-memory table shared through a [`RefCountedPool`], making runs fast and
//! deterministic. It is what the CLI drives when no real binding is wired
//! in, and what the harness tests exercise.
//!
//! # Features
//!
//! - Real record storage: reads see prior inserts, misses are `NOT_FOUND`
//! - Configurable forced status for data operations
//! - Configurable simulated latency
//! - Asynchronous dispatch with a per-operation completion thread, including
//!   forced completion failures
//!
//! # Example
//!
//! ```
//! use tracepulse::store::mock::MockBackend;
//! use tracepulse::store::{FieldMap, Status, StorageBackend};
//!
//! let mut backend = MockBackend::new();
//! backend.init()?;
//!
//! let mut values = FieldMap::new();
//! values.insert("field0".into(), "payload".into());
//! assert_eq!(backend.insert("usertable", "user1", &values)?, Status::Ok);
//!
//! let (status, row) = backend.read("usertable", "user1", None)?;
//! assert_eq!(status, Status::Ok);
//! assert_eq!(row.get("field0").map(String::as_str), Some("payload"));
//!
//! backend.cleanup()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::anyhow;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::pool::RefCountedPool;
use super::{AsyncCompletion, CompletionCallback, FieldMap, Status, StorageBackend};
use crate::Result;

/// Shared state behind all mock backend instances: the in-memory table.
#[derive(Debug, Default)]
pub struct MockConnection {
    /// Rows keyed by (table, key); BTreeMap so scans are ordered
    rows: Mutex<BTreeMap<(String, String), FieldMap>>,
}

impl MockConnection {
    fn read(&self, table: &str, key: &str, fields: Option<&[String]>) -> (Status, FieldMap) {
        let rows = self.rows.lock().unwrap();
        match rows.get(&(table.to_string(), key.to_string())) {
            Some(row) => (Status::Ok, project(row, fields)),
            None => (Status::NotFound, FieldMap::new()),
        }
    }

    fn scan(
        &self,
        table: &str,
        start_key: &str,
        count: usize,
        fields: Option<&[String]>,
    ) -> (Status, Vec<FieldMap>) {
        let rows = self.rows.lock().unwrap();
        let start = (table.to_string(), start_key.to_string());
        let result: Vec<FieldMap> = rows
            .range(start..)
            .take_while(|((t, _), _)| t == table)
            .take(count)
            .map(|(_, row)| project(row, fields))
            .collect();
        if result.is_empty() {
            (Status::NotFound, result)
        } else {
            (Status::Ok, result)
        }
    }

    fn upsert(&self, table: &str, key: &str, values: &FieldMap) -> Status {
        let mut rows = self.rows.lock().unwrap();
        rows.entry((table.to_string(), key.to_string()))
            .or_default()
            .extend(values.clone());
        Status::Ok
    }

    fn delete(&self, table: &str, key: &str) -> Status {
        let mut rows = self.rows.lock().unwrap();
        match rows.remove(&(table.to_string(), key.to_string())) {
            Some(_) => Status::Ok,
            None => Status::NotFound,
        }
    }
}

fn project(row: &FieldMap, fields: Option<&[String]>) -> FieldMap {
    match fields {
        None => row.clone(),
        Some(wanted) => wanted
            .iter()
            .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
            .collect(),
    }
}

/// Mock storage backend; one instance per worker.
pub struct MockBackend {
    pool: Arc<RefCountedPool<MockConnection>>,
    conn: Option<Arc<MockConnection>>,
    /// Status returned by every data operation instead of the real result
    forced_status: Option<Status>,
    /// Simulated per-operation latency
    latency: Option<Duration>,
    /// Failure message delivered through the async failure callback
    fail_async_with: Option<String>,
}

impl MockBackend {
    /// Create a backend with its own private resource pool.
    pub fn new() -> Self {
        Self::with_pool(Arc::new(RefCountedPool::new()))
    }

    /// Create a backend over a shared pool, as a multi-worker run does.
    pub fn with_pool(pool: Arc<RefCountedPool<MockConnection>>) -> Self {
        Self {
            pool,
            conn: None,
            forced_status: None,
            latency: None,
            fail_async_with: None,
        }
    }

    /// Force every data operation to resolve with `status`.
    pub fn force_status(&mut self, status: Status) {
        self.forced_status = Some(status);
    }

    /// Simulate `latency` on every data operation.
    pub fn simulate_latency(&mut self, latency: Duration) {
        self.latency = Some(latency);
    }

    /// Make asynchronous completions fail with `message`.
    pub fn fail_async(&mut self, message: impl Into<String>) {
        self.fail_async_with = Some(message.into());
    }

    fn connection(&self) -> Result<&Arc<MockConnection>> {
        self.conn
            .as_ref()
            .ok_or_else(|| anyhow!("mock backend used before init"))
    }

    fn simulate(&self) {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
    }

    fn resolve(&self, real: Status) -> Status {
        self.forced_status.clone().unwrap_or(real)
    }

    /// Dispatch a completion on its own thread, as a real binding's driver
    /// completion thread would.
    fn complete_async(
        &self,
        done: CompletionCallback,
        produce: impl FnOnce(&MockConnection) -> (Status, FieldMap) + Send + 'static,
    ) -> Result<()> {
        let conn = Arc::clone(self.connection()?);
        let latency = self.latency;
        let failure = self.fail_async_with.clone();
        thread::spawn(move || {
            if let Some(latency) = latency {
                thread::sleep(latency);
            }
            let result = match failure {
                Some(message) => Err(message),
                None => {
                    let payload: super::CompletionPayload = Box::new(produce(&conn));
                    Ok(payload)
                }
            };
            done(AsyncCompletion {
                result,
                parse: Box::new(|payload| {
                    *payload
                        .downcast::<(Status, FieldMap)>()
                        .expect("mock completion payload")
                }),
            });
        });
        Ok(())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MockBackend {
    fn init(&mut self) -> Result<()> {
        let conn = self.pool.acquire(|| Ok(MockConnection::default()))?;
        self.conn = Some(conn);
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        self.conn = None;
        self.pool.release(|_| Ok(()))
    }

    fn read(
        &mut self,
        table: &str,
        key: &str,
        fields: Option<&[String]>,
    ) -> Result<(Status, FieldMap)> {
        self.simulate();
        let (status, row) = self.connection()?.read(table, key, fields);
        Ok((self.resolve(status), row))
    }

    fn scan(
        &mut self,
        table: &str,
        start_key: &str,
        count: usize,
        fields: Option<&[String]>,
    ) -> Result<(Status, Vec<FieldMap>)> {
        self.simulate();
        let (status, rows) = self.connection()?.scan(table, start_key, count, fields);
        Ok((self.resolve(status), rows))
    }

    fn insert(&mut self, table: &str, key: &str, values: &FieldMap) -> Result<Status> {
        self.simulate();
        let status = self.connection()?.upsert(table, key, values);
        Ok(self.resolve(status))
    }

    fn update(&mut self, table: &str, key: &str, values: &FieldMap) -> Result<Status> {
        self.simulate();
        let status = self.connection()?.upsert(table, key, values);
        Ok(self.resolve(status))
    }

    fn delete(&mut self, table: &str, key: &str) -> Result<Status> {
        self.simulate();
        let status = self.connection()?.delete(table, key);
        Ok(self.resolve(status))
    }

    fn read_async(
        &mut self,
        table: &str,
        key: &str,
        fields: Option<&[String]>,
        done: CompletionCallback,
    ) -> Result<()> {
        let table = table.to_string();
        let key = key.to_string();
        let fields = fields.map(<[String]>::to_vec);
        let forced = self.forced_status.clone();
        self.complete_async(done, move |conn| {
            let (status, row) = conn.read(&table, &key, fields.as_deref());
            (forced.unwrap_or(status), row)
        })
    }

    fn insert_async(
        &mut self,
        table: &str,
        key: &str,
        values: &FieldMap,
        done: CompletionCallback,
    ) -> Result<()> {
        let table = table.to_string();
        let key = key.to_string();
        let values = values.clone();
        let forced = self.forced_status.clone();
        self.complete_async(done, move |conn| {
            let status = conn.upsert(&table, &key, &values);
            (forced.unwrap_or(status), FieldMap::new())
        })
    }

    fn update_async(
        &mut self,
        table: &str,
        key: &str,
        values: &FieldMap,
        done: CompletionCallback,
    ) -> Result<()> {
        let table = table.to_string();
        let key = key.to_string();
        let values = values.clone();
        let forced = self.forced_status.clone();
        self.complete_async(done, move |conn| {
            let status = conn.upsert(&table, &key, &values);
            (forced.unwrap_or(status), FieldMap::new())
        })
    }
}
