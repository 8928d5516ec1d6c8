//! SQLite-backed local durable store
//!
//! One connection behind a mutex gives a single-writer discipline; every
//! write runs inside a transaction. On-disk databases use WAL so readers
//! in other processes (e.g. `fieldsync status`) are not blocked by a write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::schema::{init_schema, needs_init};
use super::{QueueStore, RecordStore};
use crate::config::Config;
use crate::models::{HttpMethod, NewQueueEntry, QueueEntry, StoredRecord};

/// Local durable store on SQLite
///
/// Queries run on tokio's blocking pool so a busy database never stalls the
/// async workers.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database configured for this device
    pub fn open(config: &Config) -> StoreResult<Self> {
        Self::open_path(&config.sqlite_path())
    }

    /// Open or create a database at `path`
    pub fn open_path(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path).map_err(|source| StoreError::Unavailable {
            path: path.to_path_buf(),
            source,
        })?;

        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        debug!("Opened store at {:?}", path);
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Unavailable {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `op` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            op(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

// ==================== Records ====================

const RECORD_COLUMNS: &str = "SELECT id, payload, dirty, last_modified, updated_at FROM records";

fn upsert_record(conn: &mut Connection, id: &str, payload: &Value) -> StoreResult<StoredRecord> {
    let payload_text = serde_json::to_string(payload)?;
    let tx = conn.transaction()?;

    let now = Utc::now().timestamp_millis();
    let previous: Option<i64> = tx
        .query_row(
            "SELECT last_modified FROM records WHERE id = ?",
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    // last_modified must strictly increase so an in-flight ack for the
    // previous version never matches this one
    let last_modified = match previous {
        Some(prev) if prev >= now => prev + 1,
        _ => now,
    };

    tx.execute(
        r#"
        INSERT INTO records (id, payload, dirty, last_modified, updated_at)
        VALUES (?1, ?2, 1, ?3, ?4)
        ON CONFLICT(id) DO UPDATE SET
            payload = excluded.payload,
            dirty = 1,
            last_modified = excluded.last_modified,
            updated_at = excluded.updated_at
        "#,
        params![id, payload_text, last_modified, now],
    )?;
    tx.commit()?;

    Ok(StoredRecord {
        id: id.to_string(),
        payload: payload.clone(),
        dirty: true,
        last_modified: from_millis("records", last_modified)?,
        updated_at: from_millis("records", now)?,
    })
}

fn mark_record_synced(conn: &mut Connection, id: &str, acked: DateTime<Utc>) -> StoreResult<bool> {
    let tx = conn.transaction()?;
    let changed = tx.execute(
        "UPDATE records SET dirty = 0, updated_at = ?1
         WHERE id = ?2 AND last_modified = ?3 AND dirty = 1",
        params![Utc::now().timestamp_millis(), id, acked.timestamp_millis()],
    )?;
    tx.commit()?;
    Ok(changed == 1)
}

fn query_records(
    conn: &Connection,
    filter: &str,
    args: &[&dyn rusqlite::ToSql],
) -> StoreResult<Vec<StoredRecord>> {
    let mut stmt = conn.prepare(&format!("{} {}", RECORD_COLUMNS, filter))?;
    let rows = stmt
        .query_map(args, |row| {
            Ok(RecordRow {
                id: row.get(0)?,
                payload: row.get(1)?,
                dirty: row.get(2)?,
                last_modified: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(RecordRow::hydrate).collect()
}

fn delete_record(conn: &mut Connection, id: &str) -> StoreResult<bool> {
    let tx = conn.transaction()?;
    let changed = tx.execute("DELETE FROM records WHERE id = ?", params![id])?;
    tx.commit()?;
    Ok(changed == 1)
}

fn count(conn: &Connection, sql: &str) -> StoreResult<usize> {
    let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(count as usize)
}

// ==================== Queue ====================

fn enqueue_entry(conn: &mut Connection, entry: NewQueueEntry) -> StoreResult<Uuid> {
    let id = Uuid::new_v4();
    let headers = serde_json::to_string(&entry.headers)?;
    let tx = conn.transaction()?;
    tx.execute(
        r#"
        INSERT INTO queue (id, target_endpoint, method, headers, body, category, enqueued_at, retry_count)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
        "#,
        params![
            id.to_string(),
            entry.target_endpoint,
            entry.method.as_str(),
            headers,
            entry.body,
            entry.category,
            Utc::now().timestamp_millis(),
        ],
    )?;
    tx.commit()?;
    Ok(id)
}

fn list_queue_entries(conn: &Connection) -> StoreResult<Vec<QueueEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, target_endpoint, method, headers, body, category, enqueued_at, retry_count
         FROM queue ORDER BY enqueued_at, seq",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(QueueRow {
                id: row.get(0)?,
                target_endpoint: row.get(1)?,
                method: row.get(2)?,
                headers: row.get(3)?,
                body: row.get(4)?,
                category: row.get(5)?,
                enqueued_at: row.get(6)?,
                retry_count: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(QueueRow::hydrate).collect()
}

fn dequeue_entry(conn: &mut Connection, id: Uuid) -> StoreResult<bool> {
    let tx = conn.transaction()?;
    let changed = tx.execute("DELETE FROM queue WHERE id = ?", params![id.to_string()])?;
    tx.commit()?;
    Ok(changed == 1)
}

fn bump_retry_count(conn: &mut Connection, id: Uuid) -> StoreResult<u32> {
    let tx = conn.transaction()?;
    tx.execute(
        "UPDATE queue SET retry_count = retry_count + 1 WHERE id = ?",
        params![id.to_string()],
    )?;
    let count: Option<i64> = tx
        .query_row(
            "SELECT retry_count FROM queue WHERE id = ?",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    tx.commit()?;
    Ok(count.unwrap_or(0) as u32)
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get_dirty_records(&self) -> StoreResult<Vec<StoredRecord>> {
        self.with_conn(|conn| query_records(conn, "WHERE dirty = 1 ORDER BY last_modified, id", &[]))
            .await
    }

    async fn mark_synced(&self, id: &str, acked_last_modified: DateTime<Utc>) -> StoreResult<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| mark_record_synced(conn, &id, acked_last_modified))
            .await
    }

    async fn upsert(&self, id: &str, payload: &Value) -> StoreResult<StoredRecord> {
        let id = id.to_string();
        let payload = payload.clone();
        self.with_conn(move |conn| upsert_record(conn, &id, &payload))
            .await
    }

    async fn get(&self, id: &str) -> StoreResult<Option<StoredRecord>> {
        let id = id.to_string();
        let mut records = self
            .with_conn(move |conn| query_records(conn, "WHERE id = ?", &[&id]))
            .await?;
        Ok(records.pop())
    }

    async fn list_records(&self) -> StoreResult<Vec<StoredRecord>> {
        self.with_conn(|conn| query_records(conn, "ORDER BY last_modified DESC, id", &[]))
            .await
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| delete_record(conn, &id)).await
    }

    async fn count_dirty(&self) -> StoreResult<usize> {
        self.with_conn(|conn| count(conn, "SELECT COUNT(*) FROM records WHERE dirty = 1"))
            .await
    }
}

#[async_trait]
impl QueueStore for SqliteStore {
    async fn enqueue(&self, entry: NewQueueEntry) -> StoreResult<Uuid> {
        self.with_conn(move |conn| enqueue_entry(conn, entry)).await
    }

    async fn list_queue(&self) -> StoreResult<Vec<QueueEntry>> {
        self.with_conn(|conn| list_queue_entries(conn)).await
    }

    async fn dequeue(&self, id: Uuid) -> StoreResult<bool> {
        self.with_conn(move |conn| dequeue_entry(conn, id)).await
    }

    async fn record_queue_failure(&self, id: Uuid) -> StoreResult<u32> {
        self.with_conn(move |conn| bump_retry_count(conn, id)).await
    }

    async fn count_queue(&self) -> StoreResult<usize> {
        self.with_conn(|conn| count(conn, "SELECT COUNT(*) FROM queue")).await
    }
}

// ==================== Row Hydration ====================

struct RecordRow {
    id: String,
    payload: String,
    dirty: bool,
    last_modified: i64,
    updated_at: i64,
}

impl RecordRow {
    fn hydrate(self) -> StoreResult<StoredRecord> {
        Ok(StoredRecord {
            payload: serde_json::from_str(&self.payload)?,
            dirty: self.dirty,
            last_modified: from_millis("records", self.last_modified)?,
            updated_at: from_millis("records", self.updated_at)?,
            id: self.id,
        })
    }
}

struct QueueRow {
    id: String,
    target_endpoint: String,
    method: String,
    headers: String,
    body: String,
    category: String,
    enqueued_at: i64,
    retry_count: i64,
}

impl QueueRow {
    fn hydrate(self) -> StoreResult<QueueEntry> {
        let id = Uuid::parse_str(&self.id).map_err(|e| StoreError::CorruptRow {
            table: "queue",
            details: format!("invalid id '{}': {}", self.id, e),
        })?;
        let method: HttpMethod = self
            .method
            .parse()
            .map_err(|details| StoreError::CorruptRow {
                table: "queue",
                details,
            })?;
        let headers: BTreeMap<String, String> = serde_json::from_str(&self.headers)?;

        Ok(QueueEntry {
            id,
            target_endpoint: self.target_endpoint,
            method,
            headers,
            body: self.body,
            category: self.category,
            enqueued_at: from_millis("queue", self.enqueued_at)?,
            retry_count: self.retry_count.max(0) as u32,
        })
    }
}

fn from_millis(table: &'static str, millis: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| StoreError::CorruptRow {
        table,
        details: format!("timestamp out of range: {}", millis),
    })
}
