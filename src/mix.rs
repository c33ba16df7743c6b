//! Operation mix generation
//!
//! The trace controls *when* operations dispatch; the mix controls *what*
//! they are. Verb weights are integer percentages summing to 100, keys are
//! drawn uniformly from a configured record space, and every worker seeds
//! its own generator so runs are reproducible.

use anyhow::bail;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::store::{FieldMap, Operation, Verb};
use crate::Result;

/// Verb weights (percentages, must sum to 100).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixConfig {
    pub read_weight: u8,
    pub update_weight: u8,
    pub insert_weight: u8,
    pub scan_weight: u8,
    pub delete_weight: u8,
}

impl Default for MixConfig {
    /// The classic read-heavy mix: 95% reads, 5% updates.
    fn default() -> Self {
        Self {
            read_weight: 95,
            update_weight: 5,
            insert_weight: 0,
            scan_weight: 0,
            delete_weight: 0,
        }
    }
}

impl MixConfig {
    pub fn validate(&self) -> Result<()> {
        let total = self.read_weight as u32
            + self.update_weight as u32
            + self.insert_weight as u32
            + self.scan_weight as u32
            + self.delete_weight as u32;
        if total != 100 {
            bail!("operation mix weights must sum to 100, got {total}");
        }
        Ok(())
    }
}

/// Per-worker operation generator.
#[derive(Debug)]
pub struct OperationMix {
    config: MixConfig,
    rng: Xoshiro256PlusPlus,
    table: String,
    record_count: u64,
    field_count: usize,
    max_scan_length: usize,
}

impl OperationMix {
    /// Create a generator for one worker. Different seeds give different
    /// but reproducible operation streams.
    pub fn new(config: MixConfig, table: impl Into<String>, record_count: u64, seed: u64) -> Self {
        Self {
            config,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            table: table.into(),
            record_count: record_count.max(1),
            field_count: 10,
            max_scan_length: 100,
        }
    }

    fn choose_verb(&mut self) -> Verb {
        let roll = self.rng.gen_range(0u32..100);
        let mut threshold = self.config.read_weight as u32;
        if roll < threshold {
            return Verb::Read;
        }
        threshold += self.config.update_weight as u32;
        if roll < threshold {
            return Verb::Update;
        }
        threshold += self.config.insert_weight as u32;
        if roll < threshold {
            return Verb::Insert;
        }
        threshold += self.config.scan_weight as u32;
        if roll < threshold {
            return Verb::Scan;
        }
        Verb::Delete
    }

    fn choose_key(&mut self) -> String {
        format!("user{}", self.rng.gen_range(0..self.record_count))
    }

    fn build_values(&mut self) -> FieldMap {
        let mut values = FieldMap::new();
        for field in 0..self.field_count {
            let payload: u64 = self.rng.gen();
            values.insert(format!("field{field}"), format!("{payload:016x}"));
        }
        values
    }

    /// Draw the next operation.
    pub fn next_operation(&mut self) -> Operation {
        let verb = self.choose_verb();
        let key = self.choose_key();
        let (values, scan_count) = match verb {
            Verb::Insert | Verb::Update => (Some(self.build_values()), 0),
            Verb::Scan => (None, self.rng.gen_range(1..=self.max_scan_length)),
            _ => (None, 0),
        };
        Operation {
            verb,
            table: self.table.clone(),
            key,
            fields: None,
            values,
            scan_count,
        }
    }
}
