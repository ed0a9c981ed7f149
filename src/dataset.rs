//! Builders for the seed dataset written on first start.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use crate::record::{Record, WorkingSet};
use crate::schema::{ColumnType, Schema};

#[derive(Debug)]
pub enum DatasetError {
    Read(String),
    Parse(String),
}

impl std::fmt::Display for DatasetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetError::Read(e) => write!(f, "dataset read error: {}", e),
            DatasetError::Parse(e) => write!(f, "dataset parse error: {}", e),
        }
    }
}

impl std::error::Error for DatasetError {}

/// Produces the rows a cache is seeded with when its durable store is empty.
///
/// Keys are `0..n` in order, and each row's identity attribute equals its key.
#[async_trait::async_trait]
pub trait DatasetBuilder: Send + Sync {
    async fn build(&self, schema: &Schema, size: usize) -> Result<WorkingSet, DatasetError>;
}

/// Random rows shaped like the schema's sample record. Deterministic per seed.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    seed: u64,
}

impl SyntheticDataset {
    pub const DEFAULT_SEED: u64 = 0x6772_6964;

    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl Default for SyntheticDataset {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEED)
    }
}

const SYLLABLES: &[&str] = &[
    "ka", "lo", "mi", "ne", "ra", "to", "vu", "ze", "sa", "di", "po", "the",
];

fn synthetic_value(rng: &mut StdRng, sample: &Value) -> Value {
    match ColumnType::of(sample) {
        ColumnType::Number if sample.is_f64() => Value::from(rng.gen_range(0.0..1000.0_f64)),
        ColumnType::Number => Value::from(rng.gen_range(0..1000_i64)),
        ColumnType::Boolean => Value::Bool(rng.gen_bool(0.5)),
        ColumnType::String => {
            let parts = rng.gen_range(2..=4);
            let mut word = String::new();
            for i in 0..parts {
                let syllable = SYLLABLES[rng.gen_range(0..SYLLABLES.len())];
                if i == 0 {
                    word.push_str(&syllable[..1].to_uppercase());
                    word.push_str(&syllable[1..]);
                } else {
                    word.push_str(syllable);
                }
            }
            Value::String(word)
        }
        ColumnType::Array | ColumnType::Object | ColumnType::Null => sample.clone(),
    }
}

#[async_trait::async_trait]
impl DatasetBuilder for SyntheticDataset {
    async fn build(&self, schema: &Schema, size: usize) -> Result<WorkingSet, DatasetError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let rows = (0..size).map(|index| {
            let mut record = Record::new();
            for (name, sample) in &schema.sample {
                let value = if *name == schema.identity {
                    Value::from(index as i64)
                } else {
                    synthetic_value(&mut rng, sample)
                };
                record.insert(name.clone(), value);
            }
            (index as i64, record)
        });
        Ok(rows.collect())
    }
}

/// Rows read from a JSON file holding an array of objects.
///
/// At most `size` rows are taken; the identity attribute is overwritten with
/// the row's index.
#[derive(Debug, Clone)]
pub struct JsonFileDataset {
    path: PathBuf,
}

impl JsonFileDataset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl DatasetBuilder for JsonFileDataset {
    async fn build(&self, schema: &Schema, size: usize) -> Result<WorkingSet, DatasetError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| DatasetError::Read(format!("{}: {}", self.path.display(), e)))?;
        let rows: Vec<Record> = serde_json::from_str(&text)
            .map_err(|e| DatasetError::Parse(format!("{}: {}", self.path.display(), e)))?;

        Ok(rows
            .into_iter()
            .take(size)
            .enumerate()
            .map(|(index, mut record)| {
                record.insert(schema.identity.clone(), Value::from(index as i64));
                (index as i64, record)
            })
            .collect())
    }
}
