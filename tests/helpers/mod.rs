#![allow(dead_code)] // Test helpers appear unused when compiled independently

use gridcache::{
    Cache, CacheOptions, DurableStore, MemoryStore, Record, Schema, StoreError, SyntheticDataset,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Build a record from a `json!` object literal.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

pub fn schema(name: &str) -> Schema {
    Schema::new(name, record(serde_json::json!({"ID": -1, "Name": " "})))
}

pub fn options(name: &str, size: usize) -> CacheOptions {
    CacheOptions {
        schema: schema(name),
        size,
    }
}

pub fn launch<S: DurableStore + 'static>(store: S, name: &str, size: usize) -> Cache {
    Cache::launch(
        options(name, size),
        store,
        Arc::new(SyntheticDataset::default()),
        None,
    )
}

/// Memory store that counts writes and can be told to reject them.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub puts: Arc<AtomicUsize>,
    pub reject_writes: Arc<AtomicBool>,
    pub reject_reads: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn set_reject_reads(&self, reject: bool) {
        self.reject_reads.store(reject, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl DurableStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.reject_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Read("injected read failure".to_string()));
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write("injected write failure".to_string()));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, value).await
    }
}

/// Memory store that logs every operation as `"GET key"` / `"PUT key"`.
#[derive(Clone, Default)]
pub struct RecordingStore {
    pub inner: MemoryStore,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl RecordingStore {
    pub fn operations(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DurableStore for RecordingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.log.lock().unwrap().push(format!("GET {}", key));
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.log.lock().unwrap().push(format!("PUT {}", key));
        self.inner.put(key, value).await
    }
}

/// Memory store whose writes can be parked until released.
#[derive(Clone, Default)]
pub struct GatedStore {
    pub inner: MemoryStore,
    hold: Arc<AtomicBool>,
    arrived: Arc<Notify>,
    release: Arc<Notify>,
}

impl GatedStore {
    pub fn hold_writes(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    /// Resolves once a write is parked at the gate.
    pub async fn write_parked(&self) {
        self.arrived.notified().await;
    }

    /// Let the parked write through and stop holding new ones.
    pub fn open(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }
}

#[async_trait::async_trait]
impl DurableStore for GatedStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        if self.hold.load(Ordering::SeqCst) {
            self.arrived.notify_one();
            self.release.notified().await;
        }
        self.inner.put(key, value).await
    }
}
