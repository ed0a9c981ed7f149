use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheOptions;
use crate::dataset::{DatasetBuilder, JsonFileDataset, SyntheticDataset};
use crate::schema::Schema;
use crate::store::{FileStore, DEFAULT_COLLECTION, DEFAULT_DATABASE};

pub const CONFIG_FILENAME: &str = ".gridcache.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub size: usize,
    pub schema: Schema,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory; defaults to the platform data dir.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Evict worker requests unanswered after this long. Unset: wait forever.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: None,
            database: default_database(),
            collection: default_collection(),
            request_timeout_ms: None,
        }
    }
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// JSON array of rows to seed from instead of generating them.
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            source: None,
            seed: default_seed(),
        }
    }
}

fn default_seed() -> u64 {
    SyntheticDataset::DEFAULT_SEED
}

impl Default for Config {
    /// The demo "Channels" dataset of 180 rows.
    fn default() -> Self {
        let sample = json!({
            "ID": -1,
            "Call_Sign": " ",
            "Affiliate": " ",
            "Virtual_Channel": 0,
            "Keep": " ",
            "Band": " ",
            "Heading": " ",
            "Distance": " ",
            "Strength": " ",
        });
        let sample = match sample {
            serde_json::Value::Object(map) => map,
            _ => unreachable!("sample literal is an object"),
        };
        Self {
            size: 180,
            schema: Schema::new("Channels", sample),
            storage: StorageConfig::default(),
            dataset: DatasetConfig::default(),
        }
    }
}

impl Config {
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            schema: self.schema.clone(),
            size: self.size,
        }
    }

    pub fn storage_dir(&self) -> Result<PathBuf> {
        match &self.storage.dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|d| d.join("gridcache"))
                .context("No data directory on this platform; set storage.dir"),
        }
    }

    pub fn store(&self) -> Result<FileStore> {
        Ok(FileStore::with_names(
            self.storage_dir()?,
            self.storage.database.clone(),
            self.storage.collection.clone(),
        ))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.storage.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn dataset_builder(&self) -> Arc<dyn DatasetBuilder> {
        match &self.dataset.source {
            Some(path) => Arc::new(JsonFileDataset::new(path)),
            None => Arc::new(SyntheticDataset::new(self.dataset.seed)),
        }
    }
}

pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to the defaults.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<Config> {
    if path.as_ref().exists() {
        load_config_from_path(path)
    } else {
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
size = 5

[schema]
name = "X"
sample = { ID = -1, Name = " " }
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.size, 5);
        assert_eq!(config.schema.name, "X");
        assert_eq!(config.schema.identity, "ID");
        assert!(config.schema.sample["ID"].is_i64());
        assert_eq!(config.storage, StorageConfig::default());
        assert_eq!(config.dataset.source, None);
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
size = 20

[schema]
name = "Users"
identity = "UserId"
read_only = ["Created"]

[schema.sample]
UserId = 0
Name = " "
Created = " "

[storage]
dir = "/tmp/gridcache-test"
database = "db"
collection = "rows"
request_timeout_ms = 1500

[dataset]
source = "users.json"
seed = 3
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let columns = config.schema.columns();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["UserId", "Name", "Created"]);
        assert!(columns[0].read_only && !columns[1].read_only && columns[2].read_only);
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(
            config.storage_dir().unwrap(),
            PathBuf::from("/tmp/gridcache-test")
        );
        assert_eq!(config.dataset.seed, 3);
    }

    #[test]
    fn test_default_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        let config = Config::default();
        config.save_to(&path).unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.cache_options().schema.storage_key(loaded.size), "Channels-180");
    }

    #[test]
    fn test_load_config_not_found() {
        let result = load_config_from_path("/nonexistent/.gridcache.toml");
        assert!(result.is_err());
        assert_eq!(
            load_or_default("/nonexistent/.gridcache.toml").unwrap(),
            Config::default()
        );
    }
}
