//! Storage layer
//!
//! The local durable store keeps domain records with their dirty flag and a
//! FIFO queue of replayable mutations.
//!
//! ## Architecture
//!
//! - `RecordStore`: what the orchestrator needs (dirty snapshot, mark-synced)
//! - `QueueStore`: what the replayer needs (FIFO queue of mutations)
//! - `LocalStore`: both of the above
//! - `SqliteStore`: the shipped implementation
//!
//! The traits are the seams where tests substitute fakes.

pub mod error;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{NewQueueEntry, QueueEntry, StoredRecord};

pub use error::{StoreError, StoreResult};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use sqlite::SqliteStore;

/// Durable storage for domain records and their sync state
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Snapshot of every dirty record, oldest mutation first
    async fn get_dirty_records(&self) -> StoreResult<Vec<StoredRecord>>;

    /// Clear the dirty flag if `acked_last_modified` is still current
    ///
    /// Returns false when the record was modified after the acknowledged
    /// version was sent, or no longer exists.
    async fn mark_synced(&self, id: &str, acked_last_modified: DateTime<Utc>)
        -> StoreResult<bool>;

    /// Insert or replace a record's payload and mark it dirty
    async fn upsert(&self, id: &str, payload: &Value) -> StoreResult<StoredRecord>;

    async fn get(&self, id: &str) -> StoreResult<Option<StoredRecord>>;

    async fn list_records(&self) -> StoreResult<Vec<StoredRecord>>;

    async fn delete(&self, id: &str) -> StoreResult<bool>;

    async fn count_dirty(&self) -> StoreResult<usize>;
}

/// Durable FIFO queue of replayable mutations
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(&self, entry: NewQueueEntry) -> StoreResult<Uuid>;

    /// Every queued entry in replay order
    async fn list_queue(&self) -> StoreResult<Vec<QueueEntry>>;

    async fn dequeue(&self, id: Uuid) -> StoreResult<bool>;

    /// Bump an entry's retry count after a failed delivery, returning the new count
    async fn record_queue_failure(&self, id: Uuid) -> StoreResult<u32>;

    async fn count_queue(&self) -> StoreResult<usize>;
}

/// A store that holds both records and the mutation queue
pub trait LocalStore: RecordStore + QueueStore {}

impl<T: RecordStore + QueueStore> LocalStore for T {}
