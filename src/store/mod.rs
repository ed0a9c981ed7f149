//! Durable store adapters: one awaitable result per `get`/`put`.

mod file;
mod memory;

pub use file::{FileStore, DEFAULT_COLLECTION, DEFAULT_DATABASE};
pub use memory::MemoryStore;

/// Error from the underlying persistent store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store (or its collection) could not be opened.
    Open(String),
    Read(String),
    Write(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Open(e) => write!(f, "open failed: {}", e),
            StoreError::Read(e) => write!(f, "read failed: {}", e),
            StoreError::Write(e) => write!(f, "write failed: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Key-value persistent store owned by the storage worker.
#[async_trait::async_trait]
pub trait DurableStore: Send + Sync {
    /// Read the blob stored under `key`. `Ok(None)` when nothing was ever written.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `value` under `key`, replacing any previous blob.
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<S: DurableStore + ?Sized> DurableStore for std::sync::Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        (**self).put(key, value).await
    }
}
