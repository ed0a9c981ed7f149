use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::sync::OnceCell;
use tracing::debug;

use super::{DurableStore, StoreError};

pub const DEFAULT_DATABASE: &str = "workDB";
pub const DEFAULT_COLLECTION: &str = "records";

/// Directory-backed store: `{root}/{database}/{collection}/{key}.json`.
///
/// The collection directory is created on first use and its path is cached
/// for the lifetime of the store.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    database: String,
    collection: String,
    handle: OnceCell<PathBuf>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_names(root, DEFAULT_DATABASE, DEFAULT_COLLECTION)
    }

    pub fn with_names(
        root: impl Into<PathBuf>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            database: database.into(),
            collection: collection.into(),
            handle: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn collection_dir(&self) -> Result<&PathBuf, StoreError> {
        self.handle
            .get_or_try_init(|| async {
                let dir = self.root.join(&self.database).join(&self.collection);
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| StoreError::Open(format!("{}: {}", dir.display(), e)))?;
                debug!(path = %dir.display(), "opened durable collection");
                Ok::<_, StoreError>(dir)
            })
            .await
    }

    async fn entry_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        Ok(self
            .collection_dir()
            .await?
            .join(format!("{}.json", file_name_for(key))))
    }
}

/// Map a store key onto a safe file name. Bytes outside `[A-Za-z0-9._-]`
/// are written as `%XX`, so distinct keys never share a file.
fn file_name_for(key: &str) -> String {
    let mut name = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => name.push(byte as char),
            b'.' if !name.is_empty() => name.push('.'),
            other => name.push_str(&format!("%{:02X}", other)),
        }
    }
    name
}

#[async_trait::async_trait]
impl DurableStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.entry_path(key).await?;
        match tokio::fs::read_to_string(&path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Read(format!("{}: {}", path.display(), e))),
        }
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let path = self.entry_path(key).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| StoreError::Write(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Write(format!("{}: {}", path.display(), e)))
    }
}
