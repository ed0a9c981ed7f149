//! Persisted in-memory cache.
//!
//! Reads are served synchronously from the working set. Every mutation is
//! applied in memory first; a background sync task then persists the whole
//! working set through the storage worker and re-hydrates from it. Sync jobs
//! run one at a time in the order they were queued, so each re-hydrate only
//! starts after the persist before it has been acknowledged.

use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::dataset::{DatasetBuilder, DatasetError};
use crate::protocol::{Payload, NOT_FOUND};
use crate::record::{Record, WorkingSet};
use crate::schema::{ColumnDescriptor, Schema};
use crate::store::DurableStore;
use crate::transport::{Transport, TransportError};
use crate::worker::StorageWorker;

/// Prefix of the error markers surfaced to UI callers.
pub const ERROR_MARKER: &str = "Error";

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub schema: Schema,
    pub size: usize,
}

#[derive(Debug)]
pub enum CacheError {
    Encode(String),
    Decode(String),
    /// The worker returned something other than a blob or the not-found sentinel.
    UnexpectedResult(String),
    Transport(TransportError),
    Dataset(DatasetError),
    SyncStopped,
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Encode(e) => write!(f, "encode error: {}", e),
            CacheError::Decode(e) => write!(f, "decode error: {}", e),
            CacheError::UnexpectedResult(e) => write!(f, "unexpected worker result: {}", e),
            CacheError::Transport(e) => write!(f, "transport error: {}", e),
            CacheError::Dataset(e) => write!(f, "{}", e),
            CacheError::SyncStopped => write!(f, "sync task stopped"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<TransportError> for CacheError {
    fn from(e: TransportError) -> Self {
        CacheError::Transport(e)
    }
}

/// Outcome of a hydrate. Displays as `"ok"`, `"absent"` or `"Error ..."`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hydration {
    Loaded { records: usize },
    /// Nothing persisted under the cache's key yet.
    Absent,
    Failed(String),
}

impl Hydration {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Hydration::Loaded { .. })
    }
}

impl std::fmt::Display for Hydration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hydration::Loaded { .. } => write!(f, "ok"),
            Hydration::Absent => write!(f, "absent"),
            Hydration::Failed(e) => write!(f, "{} {}", ERROR_MARKER, e),
        }
    }
}

enum SyncJob {
    Bootstrap,
    /// Persist the current working set, then re-hydrate.
    Mutation,
    /// Caller-requested hydrate; runs behind every mutation queued before it.
    Hydrate(oneshot::Sender<Hydration>),
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct CacheState {
    records: WorkingSet,
    /// Row snapshot taken at the last installed hydrate.
    rows: Vec<Record>,
    /// Working projection handed to filtering; reset to `rows` on demand.
    projection: Vec<Record>,
    /// Bumped on every in-memory mutation.
    revision: u64,
}

struct CacheInner {
    schema: Schema,
    size: usize,
    storage_key: String,
    columns: Vec<ColumnDescriptor>,
    state: RwLock<CacheState>,
    transport: Transport,
    builder: Arc<dyn DatasetBuilder>,
    jobs: mpsc::UnboundedSender<SyncJob>,
    /// Generation counter, bumped after every installed hydrate.
    hydrated: watch::Sender<u64>,
    /// Flips to true once the startup bootstrap has finished, whatever its outcome.
    settled: watch::Sender<bool>,
    last_error: Mutex<Option<String>>,
}

/// Cloneable handle to one cache.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl Cache {
    /// Create a cache over an existing transport and start the bootstrap:
    /// hydrate, and if nothing is persisted yet, build `size` rows, persist
    /// them and hydrate again.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        options: CacheOptions,
        transport: Transport,
        builder: Arc<dyn DatasetBuilder>,
    ) -> Self {
        let CacheOptions { schema, size } = options;
        let (jobs, job_rx) = mpsc::unbounded_channel();
        let (hydrated, _) = watch::channel(0);
        let (settled, _) = watch::channel(false);

        let inner = Arc::new(CacheInner {
            storage_key: schema.storage_key(size),
            columns: schema.columns(),
            schema,
            size,
            state: RwLock::new(CacheState::default()),
            transport,
            builder,
            jobs,
            hydrated,
            settled,
            last_error: Mutex::new(None),
        });

        tokio::spawn(run_sync(Arc::downgrade(&inner), job_rx));
        let cache = Self { inner };
        // the receiver lives in the task just spawned
        let _ = cache.inner.jobs.send(SyncJob::Bootstrap);
        cache
    }

    /// Spawn a storage worker over `store`, connect a transport to it and open
    /// a cache on top.
    pub fn launch<S: DurableStore + 'static>(
        options: CacheOptions,
        store: S,
        builder: Arc<dyn DatasetBuilder>,
        request_timeout: Option<Duration>,
    ) -> Self {
        let channels = StorageWorker::spawn(store);
        let transport = Transport::connect(channels.requests, channels.responses, request_timeout);
        Self::open(options, transport, builder)
    }

    pub fn storage_key(&self) -> &str {
        &self.inner.storage_key
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.inner.columns
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    pub fn keys(&self) -> Vec<i64> {
        self.read().records.keys().collect()
    }

    /// Synchronous lookup; never does I/O.
    pub fn get(&self, key: i64) -> Option<Record> {
        self.read().records.get(key).cloned()
    }

    /// Insert or overwrite in memory and queue a persist + re-hydrate.
    /// Returns the key as a confirmation string, or an error marker if the
    /// sync task is gone (the in-memory write still stands).
    pub fn set(&self, key: i64, record: Record) -> String {
        {
            let mut state = self.write();
            state.records.insert(key, record);
            state.revision += 1;
        }
        match self.enqueue(SyncJob::Mutation) {
            Ok(()) => key.to_string(),
            Err(e) => self.record_error(&e),
        }
    }

    /// Remove `key`. Only an actual removal queues a persist + re-hydrate.
    pub fn delete(&self, key: i64) -> bool {
        {
            let mut state = self.write();
            if state.records.remove(key).is_none() {
                return false;
            }
            state.revision += 1;
        }
        if let Err(e) = self.enqueue(SyncJob::Mutation) {
            self.record_error(&e);
        }
        true
    }

    /// Fetch the persisted blob and, if present, replace the working set,
    /// the row snapshot and the projection with it.
    ///
    /// Queued behind pending mutations, so the blob it loads already holds
    /// every write confirmed before the call. A mutation made while the fetch
    /// is in flight keeps its in-memory value; its own re-hydrate follows.
    pub async fn hydrate(&self) -> Hydration {
        let (tx, rx) = oneshot::channel();
        if let Err(e) = self.enqueue(SyncJob::Hydrate(tx)) {
            return Hydration::Failed(self.record_error(&e));
        }
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Hydration::Failed(self.record_error(&CacheError::SyncStopped)),
        }
    }

    /// Resolves once every mutation queued before this call has been synced.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.enqueue(SyncJob::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Wait for the startup bootstrap to finish. True if data was loaded.
    pub async fn ready(&self) -> bool {
        let mut settled = self.inner.settled.subscribe();
        let _ = settled.wait_for(|done| *done).await;
        self.generation() > 0
    }

    /// Receiver whose value is bumped after every installed hydrate. Rendering
    /// collaborators re-run when it changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.hydrated.subscribe()
    }

    pub fn generation(&self) -> u64 {
        *self.inner.hydrated.borrow()
    }

    /// Most recent background failure, as an error marker string.
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rows as of the last installed hydrate, in working-set order.
    pub fn rows(&self) -> Vec<Record> {
        self.read().rows.clone()
    }

    pub fn projection(&self) -> Vec<Record> {
        self.read().projection.clone()
    }

    pub fn set_projection(&self, rows: Vec<Record>) {
        self.write().projection = rows;
    }

    pub fn retain_projection<F>(&self, mut keep: F)
    where
        F: FnMut(&Record) -> bool,
    {
        self.write().projection.retain(|row| keep(row));
    }

    /// Restore the projection to the full row snapshot.
    pub fn reset_projection(&self) {
        let mut state = self.write();
        state.projection = state.rows.clone();
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, job: SyncJob) -> Result<(), CacheError> {
        self.inner
            .jobs
            .send(job)
            .map_err(|_| CacheError::SyncStopped)
    }

    fn record_error(&self, error: &CacheError) -> String {
        warn!(key = %self.inner.storage_key, error = %error, "cache operation failed");
        let marker = format!("{} {}", ERROR_MARKER, error);
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(marker.clone());
        marker
    }

    /// Blob, record count and revision, taken under one lock.
    fn encode_current(&self) -> Result<(String, usize, u64), CacheError> {
        let state = self.read();
        let blob = state
            .records
            .to_blob()
            .map_err(|e| CacheError::Encode(e.to_string()))?;
        Ok((blob, state.records.len(), state.revision))
    }

    async fn persist_blob(&self, blob: String, records: usize) -> Result<String, CacheError> {
        let started = Instant::now();
        let key = &self.inner.storage_key;
        let ack = self
            .inner
            .transport
            .call(Payload::set(key.clone(), blob))
            .await?;
        info!(
            key = %key,
            records,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "persisted working set"
        );
        Ok(match ack {
            Value::String(ack) => ack,
            other => other.to_string(),
        })
    }

    async fn fetch_snapshot(&self) -> Result<Option<WorkingSet>, CacheError> {
        let started = Instant::now();
        let key = &self.inner.storage_key;
        let result = self.inner.transport.call(Payload::get(key.clone())).await?;
        let blob = match result {
            Value::String(s) if s == NOT_FOUND => {
                debug!(key = %key, "nothing persisted");
                return Ok(None);
            }
            Value::String(blob) => blob,
            other => return Err(CacheError::UnexpectedResult(other.to_string())),
        };
        let fetched_ms = started.elapsed().as_millis() as u64;
        let records =
            WorkingSet::from_blob(&blob).map_err(|e| CacheError::Decode(e.to_string()))?;
        info!(
            key = %key,
            records = records.len(),
            fetch_ms = fetched_ms,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "hydrated working set"
        );
        Ok(Some(records))
    }

    /// Fetch and install on the sync task. `guarded` skips the install when
    /// a mutation lands during the fetch.
    async fn load(&self, guarded: bool) -> Hydration {
        let revision = guarded.then(|| self.read().revision);
        match self.fetch_snapshot().await {
            Ok(Some(records)) => {
                let count = records.len();
                self.install(records, revision);
                Hydration::Loaded { records: count }
            }
            Ok(None) => Hydration::Absent,
            Err(e) => Hydration::Failed(self.record_error(&e)),
        }
    }

    /// Replace the working set. With `expected_revision`, only when no
    /// mutation happened since that revision was snapshotted.
    fn install(&self, records: WorkingSet, expected_revision: Option<u64>) -> bool {
        {
            let mut state = self.write();
            if let Some(expected) = expected_revision {
                if state.revision != expected {
                    debug!(
                        expected,
                        current = state.revision,
                        "skipping stale re-hydrate"
                    );
                    return false;
                }
            }
            let rows: Vec<Record> = records.values().cloned().collect();
            state.projection = rows.clone();
            state.rows = rows;
            state.records = records;
        }
        self.inner.hydrated.send_modify(|generation| *generation += 1);
        true
    }

    async fn bootstrap(&self) {
        // writes made before the first load are replaced by it
        if self.load(false).await != Hydration::Absent {
            return;
        }

        info!(
            key = %self.inner.storage_key,
            size = self.inner.size,
            "no persisted dataset, building one"
        );
        let seed = match self
            .inner
            .builder
            .build(&self.inner.schema, self.inner.size)
            .await
        {
            Ok(seed) => seed,
            Err(e) => {
                self.record_error(&CacheError::Dataset(e));
                return;
            }
        };

        let persisted = match seed.to_blob() {
            Ok(blob) => self.persist_blob(blob, seed.len()).await,
            Err(e) => Err(CacheError::Encode(e.to_string())),
        };
        match persisted {
            Ok(_) => {
                self.load(false).await;
            }
            Err(e) => {
                self.record_error(&e);
            }
        }
    }

    async fn sync_mutation(&self) {
        let revision = match self.encode_current() {
            Ok((blob, count, revision)) => match self.persist_blob(blob, count).await {
                Ok(_) => revision,
                Err(e) => {
                    // memory keeps the mutation; re-hydrating now would roll it back
                    self.record_error(&e);
                    return;
                }
            },
            Err(e) => {
                self.record_error(&e);
                return;
            }
        };

        match self.fetch_snapshot().await {
            Ok(Some(records)) => {
                self.install(records, Some(revision));
            }
            Ok(None) => warn!(key = %self.inner.storage_key, "persisted data vanished"),
            Err(e) => {
                self.record_error(&e);
            }
        }
    }
}

async fn run_sync(inner: Weak<CacheInner>, mut jobs: mpsc::UnboundedReceiver<SyncJob>) {
    while let Some(job) = jobs.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let cache = Cache { inner };
        match job {
            SyncJob::Bootstrap => {
                cache.bootstrap().await;
                cache.inner.settled.send_replace(true);
            }
            SyncJob::Mutation => cache.sync_mutation().await,
            SyncJob::Hydrate(done) => {
                let _ = done.send(cache.load(true).await);
            }
            SyncJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("cache sync task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SyntheticDataset;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn options(size: usize) -> CacheOptions {
        CacheOptions {
            schema: Schema::new("X", record(json!({"ID": -1, "Name": " "}))),
            size,
        }
    }

    fn launch(store: MemoryStore, size: usize) -> Cache {
        Cache::launch(
            options(size),
            store,
            Arc::new(SyntheticDataset::default()),
            None,
        )
    }

    #[test]
    fn test_hydration_display() {
        assert_eq!(Hydration::Loaded { records: 3 }.to_string(), "ok");
        assert_eq!(Hydration::Absent.to_string(), "absent");
        assert_eq!(
            Hydration::Failed("transport error: boom".to_string()).to_string(),
            "Error transport error: boom"
        );
    }

    #[tokio::test]
    async fn test_get_reads_memory_without_io() {
        let cache = launch(MemoryStore::new(), 3);
        assert!(cache.ready().await);
        let pending_before = cache.transport().pending_len();
        assert_eq!(cache.get(1).unwrap()["ID"], 1);
        assert!(cache.get(42).is_none());
        assert_eq!(cache.transport().pending_len(), pending_before);
    }

    #[tokio::test]
    async fn test_set_is_visible_before_persist() {
        let store = MemoryStore::new();
        let cache = launch(store.clone(), 3);
        assert!(cache.ready().await);

        let confirmation = cache.set(9, record(json!({"ID": 9, "Name": "new"})));
        assert_eq!(confirmation, "9");
        assert_eq!(cache.get(9).unwrap()["Name"], "new");

        cache.flush().await;
        let blob = store.snapshot("X-3").unwrap();
        assert!(WorkingSet::from_blob(&blob).unwrap().contains_key(9));
    }

    #[tokio::test]
    async fn test_delete_absent_key_is_noop() {
        let store = MemoryStore::new();
        let cache = launch(store.clone(), 3);
        assert!(cache.ready().await);
        let before = store.snapshot("X-3");
        let generation = cache.generation();

        assert!(!cache.delete(77));
        cache.flush().await;

        assert_eq!(store.snapshot("X-3"), before);
        assert_eq!(cache.generation(), generation);
    }

    #[tokio::test]
    async fn test_delete_persists_and_rehydrates() {
        let store = MemoryStore::new();
        let cache = launch(store.clone(), 3);
        assert!(cache.ready().await);
        let generation = cache.generation();

        assert!(cache.delete(0));
        assert!(cache.get(0).is_none());
        cache.flush().await;

        let persisted = WorkingSet::from_blob(&store.snapshot("X-3").unwrap()).unwrap();
        assert_eq!(persisted.keys().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(cache.generation(), generation + 1);
        assert_eq!(cache.rows().len(), 2);
    }

    #[tokio::test]
    async fn test_back_to_back_sets_all_persist() {
        let store = MemoryStore::new();
        let cache = launch(store.clone(), 2);
        assert!(cache.ready().await);

        cache.set(5, record(json!({"ID": 5})));
        cache.set(6, record(json!({"ID": 6})));
        cache.flush().await;

        assert!(cache.get(5).is_some());
        assert!(cache.get(6).is_some());
        let persisted = WorkingSet::from_blob(&store.snapshot("X-2").unwrap()).unwrap();
        assert_eq!(persisted.len(), 4);
    }

    #[tokio::test]
    async fn test_projection_reset_restores_rows() {
        let cache = launch(MemoryStore::new(), 4);
        assert!(cache.ready().await);

        cache.retain_projection(|row| row["ID"].as_i64().map_or(false, |id| id % 2 == 0));
        assert_eq!(cache.projection().len(), 2);
        assert_eq!(cache.rows().len(), 4);

        cache.reset_projection();
        assert_eq!(cache.projection(), cache.rows());
    }

    #[tokio::test]
    async fn test_set_projection_then_reset() {
        let cache = launch(MemoryStore::new(), 3);
        assert!(cache.ready().await);

        let mut reordered = cache.rows();
        reordered.reverse();
        reordered.pop();
        cache.set_projection(reordered.clone());
        assert_eq!(cache.projection(), reordered);
        assert_eq!(cache.projection()[0]["ID"], 2);

        cache.reset_projection();
        assert_eq!(cache.projection(), cache.rows());
        assert_eq!(cache.projection().len(), 3);
    }

    #[tokio::test]
    async fn test_columns_computed_once_from_sample() {
        let cache = launch(MemoryStore::new(), 1);
        let names: Vec<&str> = cache.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["ID", "Name"]);
        assert!(cache.columns()[0].read_only);
        assert_eq!(cache.storage_key(), "X-1");
    }
}
