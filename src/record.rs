//! Records and the insertion-ordered working set they live in.

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;

/// One row: an open attribute bag in declaration order.
pub type Record = serde_json::Map<String, Value>;

/// Ordered `key -> Record` container.
///
/// Iteration follows insertion order. Overwriting an existing key keeps its
/// original position, removing a key closes the gap.
#[derive(Debug, Clone, Default)]
pub struct WorkingSet {
    entries: Vec<(i64, Record)>,
    /// key -> position in `entries`
    index: HashMap<i64, usize>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: i64) -> bool {
        self.index.contains_key(&key)
    }

    pub fn get(&self, key: i64) -> Option<&Record> {
        self.index.get(&key).map(|&pos| &self.entries[pos].1)
    }

    /// Insert or overwrite, returning the previous record for `key`.
    pub fn insert(&mut self, key: i64, record: Record) -> Option<Record> {
        match self.index.get(&key) {
            Some(&pos) => Some(std::mem::replace(&mut self.entries[pos].1, record)),
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((key, record));
                None
            }
        }
    }

    pub fn remove(&mut self, key: i64) -> Option<Record> {
        let pos = self.index.remove(&key)?;
        let (_, record) = self.entries.remove(pos);
        for (k, _) in &self.entries[pos..] {
            if let Some(p) = self.index.get_mut(k) {
                *p -= 1;
            }
        }
        Some(record)
    }

    pub fn keys(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Record> {
        self.entries.iter().map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &Record)> {
        self.entries.iter().map(|(k, r)| (*k, r))
    }

    /// Serialize the whole set as one blob: `[[key, record], ...]`.
    pub fn to_blob(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_blob(blob: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(blob)
    }
}

impl PartialEq for WorkingSet {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl FromIterator<(i64, Record)> for WorkingSet {
    fn from_iter<T: IntoIterator<Item = (i64, Record)>>(iter: T) -> Self {
        let mut set = WorkingSet::new();
        for (key, record) in iter {
            set.insert(key, record);
        }
        set
    }
}

impl Serialize for WorkingSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

impl<'de> Deserialize<'de> for WorkingSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = Vec::<(i64, Record)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}
