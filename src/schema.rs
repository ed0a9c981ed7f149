//! Dataset schema and the column descriptors derived from it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Record;

/// Identity attribute used when none is configured.
pub const DEFAULT_IDENTITY: &str = "ID";

/// Inferred JSON type of a column, taken from the sample record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Number,
    String,
    Boolean,
    Array,
    Object,
    Null,
}

impl ColumnType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Number(_) => ColumnType::Number,
            Value::String(_) => ColumnType::String,
            Value::Bool(_) => ColumnType::Boolean,
            Value::Array(_) => ColumnType::Array,
            Value::Object(_) => ColumnType::Object,
            Value::Null => ColumnType::Null,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Number => "number",
            ColumnType::String => "string",
            ColumnType::Boolean => "boolean",
            ColumnType::Array => "array",
            ColumnType::Object => "object",
            ColumnType::Null => "null",
        }
    }
}

/// Sort state a column starts in. Owned by the ordering collaborator afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortState {
    #[default]
    Unordered,
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    pub read_only: bool,
    pub order: SortState,
}

/// Describes one dataset: its name, a sample row, and which columns are read-only.
///
/// Read-only columns are listed explicitly. The identity column is always
/// read-only, whether listed or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default = "default_identity")]
    pub identity: String,
    #[serde(default)]
    pub read_only: Vec<String>,
    pub sample: Record,
}

fn default_identity() -> String {
    DEFAULT_IDENTITY.to_string()
}

impl Schema {
    pub fn new(name: impl Into<String>, sample: Record) -> Self {
        Self {
            name: name.into(),
            identity: default_identity(),
            read_only: Vec::new(),
            sample,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_read_only<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.read_only.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn is_read_only(&self, column: &str) -> bool {
        column == self.identity || self.read_only.iter().any(|c| c == column)
    }

    /// One descriptor per sample attribute, in sample order.
    pub fn columns(&self) -> Vec<ColumnDescriptor> {
        self.sample
            .iter()
            .map(|(name, value)| ColumnDescriptor {
                name: name.clone(),
                column_type: ColumnType::of(value),
                read_only: self.is_read_only(name),
                order: SortState::Unordered,
            })
            .collect()
    }

    /// The single durable-store key for this schema at a given dataset size.
    pub fn storage_key(&self, size: usize) -> String {
        format!("{}-{}", self.name, size)
    }
}
