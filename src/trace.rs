//! Trace replay source
//!
//! A trace file is plain text with one record per line, each line a base-10
//! signed 64-bit integer: the number of nanoseconds elapsed since the trace's
//! own start. Records are consumed strictly in order; negative or malformed
//! values are a fatal configuration error, not a per-record recoverable one.
//!
//! The source is restartable: a full pre-scan pass (to count records and find
//! the warmup calibration boundary) is followed by a `reload()` before real
//! replay, so the same file is read twice end to end.
//!
//! # Example
//!
//! ```no_run
//! use tracepulse::trace::TraceSource;
//!
//! let mut source = TraceSource::open("trace.txt")?;
//! let prescan = source.prescan()?;
//! println!("{} records in trace", prescan.total_ops);
//!
//! source.reload()?;
//! while let Some(offset_nanos) = source.next()? {
//!     // schedule an operation at trace start + offset_nanos
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{bail, Context};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::Result;

/// Length of the calibration window used to infer the steady-state rate.
///
/// The warmup ramp targets the aggregate rate observed during the first
/// minute of trace time, so a trace must span at least this much simulated
/// time for warmup to be usable.
pub const CALIBRATION_WINDOW_NANOS: u64 = 60_000_000_000;

/// Lazy, restartable reader over a trace file.
///
/// `next()` yields inter-arrival timestamps in file order; `Ok(None)` is the
/// explicit end-of-sequence marker. `reload()` resets the cursor to record 0
/// and reproduces the identical sequence.
#[derive(Debug)]
pub struct TraceSource {
    path: PathBuf,
    reader: BufReader<File>,
    /// 1-based line number of the last line read, for error reporting
    line_no: u64,
}

/// Result of a full pre-scan pass over a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracePrescan {
    /// Total number of records in the trace
    pub total_ops: u64,
    /// Number of records whose timestamp falls strictly inside the first
    /// 60 seconds of trace time
    pub first_minute_ops: u64,
    /// Whether the trace reaches the end of the calibration window at all.
    /// False means no steady-state rate can be inferred from it.
    pub spans_first_minute: bool,
}

impl TraceSource {
    /// Open a trace file for replay.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("failed to open trace file {}", path.display()))?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            line_no: 0,
        })
    }

    /// Read the next inter-arrival timestamp (nanoseconds since trace start).
    ///
    /// Returns `Ok(None)` once the trace is exhausted. Whitespace-only lines
    /// (e.g. a trailing newline) are skipped; anything else that fails to
    /// parse as a non-negative integer is a fatal error.
    pub fn next(&mut self) -> Result<Option<u64>> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes = self
                .reader
                .read_line(&mut line)
                .with_context(|| format!("failed to read trace file {}", self.path.display()))?;
            if bytes == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let value: i64 = trimmed.parse().with_context(|| {
                format!(
                    "malformed trace record at {}:{}: {:?}",
                    self.path.display(),
                    self.line_no,
                    trimmed
                )
            })?;
            if value < 0 {
                bail!(
                    "negative timestamp in trace record at {}:{}: {}",
                    self.path.display(),
                    self.line_no,
                    value
                );
            }
            return Ok(Some(value as u64));
        }
    }

    /// Reset the cursor to the beginning of the trace.
    ///
    /// The file is reopened so the subsequent sequence of timestamps is
    /// byte-for-byte identical to the first pass.
    pub fn reload(&mut self) -> Result<()> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to reopen trace file {}", self.path.display()))?;
        self.reader = BufReader::new(file);
        self.line_no = 0;
        Ok(())
    }

    /// Consume the remainder of the trace, counting records and locating the
    /// warmup calibration boundary.
    ///
    /// This is the first of the two passes over the trace; callers are
    /// expected to `reload()` before replaying. Timestamps must be
    /// non-decreasing in a well-formed trace, so the first record at or past
    /// the 60-second mark fixes the first-minute count.
    pub fn prescan(&mut self) -> Result<TracePrescan> {
        let mut total = 0u64;
        let mut first_minute = 0u64;
        let mut spans = false;

        while let Some(timestamp) = self.next()? {
            if !spans && timestamp >= CALIBRATION_WINDOW_NANOS {
                first_minute = total;
                spans = true;
            }
            total += 1;
        }

        Ok(TracePrescan {
            total_ops: total,
            first_minute_ops: first_minute,
            spans_first_minute: spans,
        })
    }

    /// Path of the underlying trace file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn trace_file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_read_in_order() {
        let file = trace_file(&["0", "1000000000", "2000000000"]);
        let mut source = TraceSource::open(file.path()).unwrap();

        assert_eq!(source.next().unwrap(), Some(0));
        assert_eq!(source.next().unwrap(), Some(1_000_000_000));
        assert_eq!(source.next().unwrap(), Some(2_000_000_000));
        assert_eq!(source.next().unwrap(), None);
        // End-of-sequence is stable, not an error
        assert_eq!(source.next().unwrap(), None);
    }

    #[test]
    fn test_prescan_counts_records() {
        let file = trace_file(&["0", "1000000000", "2000000000"]);
        let mut source = TraceSource::open(file.path()).unwrap();

        let prescan = source.prescan().unwrap();
        assert_eq!(prescan.total_ops, 3);
        assert!(!prescan.spans_first_minute);
    }

    #[test]
    fn test_prescan_first_minute_boundary() {
        // Two records inside the first minute, two past it
        let file = trace_file(&["0", "30000000000", "60000000000", "90000000000"]);
        let mut source = TraceSource::open(file.path()).unwrap();

        let prescan = source.prescan().unwrap();
        assert_eq!(prescan.total_ops, 4);
        assert_eq!(prescan.first_minute_ops, 2);
        assert!(prescan.spans_first_minute);
    }

    #[test]
    fn test_reload_reproduces_sequence() {
        let file = trace_file(&["5", "10", "15"]);
        let mut source = TraceSource::open(file.path()).unwrap();

        let mut first = Vec::new();
        while let Some(ts) = source.next().unwrap() {
            first.push(ts);
        }

        source.reload().unwrap();
        let mut second = Vec::new();
        while let Some(ts) = source.next().unwrap() {
            second.push(ts);
        }

        assert_eq!(first, vec![5, 10, 15]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_record_is_fatal() {
        let file = trace_file(&["0", "not-a-number"]);
        let mut source = TraceSource::open(file.path()).unwrap();

        assert_eq!(source.next().unwrap(), Some(0));
        assert!(source.next().is_err());
    }

    #[test]
    fn test_negative_record_is_fatal() {
        let file = trace_file(&["-5"]);
        let mut source = TraceSource::open(file.path()).unwrap();
        assert!(source.next().is_err());
    }

    #[test]
    fn test_blank_lines_skipped() {
        let file = trace_file(&["0", "", "100"]);
        let mut source = TraceSource::open(file.path()).unwrap();

        assert_eq!(source.next().unwrap(), Some(0));
        assert_eq!(source.next().unwrap(), Some(100));
        assert_eq!(source.next().unwrap(), None);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(TraceSource::open("/nonexistent/trace.txt").is_err());
    }
}
