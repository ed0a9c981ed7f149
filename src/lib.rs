// src/lib.rs
//! Persisted in-memory record cache.
//!
//! A [`Cache`] keeps the working set of rows in memory for synchronous reads
//! and persists the whole set, as one blob, through a [`StorageWorker`] that
//! runs on its own task and owns the durable store. The two sides only talk
//! through request/response envelopes correlated by the [`Transport`].

pub mod cache;
pub mod cli;
pub mod dataset;
pub mod logging;
pub mod protocol;
pub mod record;
pub mod schema;
pub mod store;
pub mod transport;
pub mod worker;

pub use cache::{Cache, CacheError, CacheOptions, Hydration};
pub use dataset::{DatasetBuilder, DatasetError, JsonFileDataset, SyntheticDataset};
pub use protocol::{Payload, Procedure, Request, Response, NOT_FOUND};
pub use record::{Record, WorkingSet};
pub use schema::{ColumnDescriptor, ColumnType, Schema, SortState};
pub use store::{DurableStore, FileStore, MemoryStore, StoreError};
pub use transport::{Transport, TransportError};
pub use worker::{StorageWorker, WorkerChannels};

// Re-export tracing for use in other modules
pub use tracing;
