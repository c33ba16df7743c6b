//! Measurement export sinks
//!
//! The aggregator hands every sink a flat stream of `(group, label, value)`
//! triples; the sink decides the serialization. Two formats ship with the
//! harness: a human-readable text listing and JSON.

use serde::{Deserialize, Serialize};
use std::io::Write;

use super::MeasurementSink;
use crate::Result;

/// Writes `[group] label, value` lines to any writer.
pub struct TextSink<W: Write> {
    writer: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Flush and hand back the writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> MeasurementSink for TextSink<W> {
    fn write(&mut self, group: &str, label: &str, value: f64) -> Result<()> {
        writeln!(self.writer, "[{}] {}, {}", group, label, value)?;
        Ok(())
    }
}

/// One exported measurement in JSON form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonMeasurement {
    pub group: String,
    pub label: String,
    pub value: f64,
}

/// Collects triples and serializes them as a JSON array.
#[derive(Debug, Default)]
pub struct JsonSink {
    entries: Vec<JsonMeasurement>,
}

impl JsonSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize everything collected so far to `writer`.
    pub fn finish<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, &self.entries)?;
        Ok(())
    }

    pub fn entries(&self) -> &[JsonMeasurement] {
        &self.entries
    }
}

impl MeasurementSink for JsonSink {
    fn write(&mut self, group: &str, label: &str, value: f64) -> Result<()> {
        self.entries.push(JsonMeasurement {
            group: group.to_string(),
            label: label.to_string(),
            value,
        });
        Ok(())
    }
}
