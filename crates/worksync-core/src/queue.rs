use crate::error::StorageError;
use crate::model::{OperationDraft, OperationKind, PendingOperation};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Crash-safe store for pending mutations and time-bounded cache entries.
///
/// One SQLite connection guarded by a mutex; every transaction is serialized
/// by the engine, so this is the only locking the system needs. The store is
/// the sole owner of its tables; the orchestrator and peer transport only
/// ever go through this interface.
pub struct QueueStore {
    conn: Mutex<Connection>,
}

impl QueueStore {
    /// Open the store at the given path, creating the schema on first run.
    ///
    /// Safe to call against an existing database: schema creation is
    /// idempotent.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path).map_err(|source| StorageError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests; nothing survives drop.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pending_operations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                collection TEXT NOT NULL,
                record_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                synced_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_pending_drain
                ON pending_operations(synced, enqueued_at, id);
            CREATE INDEX IF NOT EXISTS idx_pending_fingerprint
                ON pending_operations(fingerprint);
            CREATE TABLE IF NOT EXISTS cached_data (
                key TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                cached_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means another thread panicked mid-statement;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a mutation to the queue, returning its assigned id.
    pub fn enqueue(&self, draft: &OperationDraft) -> Result<i64, StorageError> {
        self.enqueue_at(draft, Utc::now())
    }

    fn enqueue_at(&self, draft: &OperationDraft, now: DateTime<Utc>) -> Result<i64, StorageError> {
        let conn = self.lock();
        Self::insert_draft(&conn, draft, now)
    }

    fn insert_draft(
        conn: &Connection,
        draft: &OperationDraft,
        now: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        let payload = serde_json::to_string(&draft.payload)?;
        conn.execute(
            "INSERT INTO pending_operations
                (kind, collection, record_id, payload, fingerprint, enqueued_at, synced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                draft.kind.as_str(),
                draft.collection,
                draft.record_id,
                payload,
                draft.fingerprint(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append a mutation unless an identical one (same kind, target and
    /// payload) is already stored, pending or synced. Used for peer-delivered
    /// batches so a snapshot bouncing between devices cannot multiply.
    pub fn enqueue_if_absent(
        &self,
        draft: &OperationDraft,
    ) -> Result<Option<i64>, StorageError> {
        let conn = self.lock();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM pending_operations WHERE fingerprint = ?1 LIMIT 1",
                params![draft.fingerprint()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Ok(None);
        }
        Self::insert_draft(&conn, draft, Utc::now()).map(Some)
    }

    /// Snapshot of every unsynced operation, oldest first.
    pub fn list_pending(&self) -> Result<Vec<PendingOperation>, StorageError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, kind, collection, record_id, payload, enqueued_at, synced, synced_at
             FROM pending_operations
             WHERE synced = 0
             ORDER BY enqueued_at ASC, id ASC",
        )?;
        let raw: Vec<RawOperation> = stmt
            .query_map([], RawOperation::from_row)?
            .collect::<Result<_, _>>()?;
        raw.into_iter().map(RawOperation::into_pending).collect()
    }

    /// Number of unsynced operations.
    pub fn pending_count(&self) -> Result<usize, StorageError> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_operations WHERE synced = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Mark an operation as applied to the remote store.
    ///
    /// A no-op when the row was already marked or removed: a late retry or a
    /// peer-delivered duplicate must not crash the orchestrator.
    pub fn mark_synced(&self, id: i64) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute(
            "UPDATE pending_operations SET synced = 1, synced_at = ?2
             WHERE id = ?1 AND synced = 0",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Physically delete an operation; no-op when absent.
    pub fn remove(&self, id: i64) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute("DELETE FROM pending_operations WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Delete synced rows whose confirmation is older than the cutoff,
    /// keeping the audit trail bounded. Returns how many rows were removed.
    pub fn prune_synced(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, synced_at FROM pending_operations
             WHERE synced = 1 AND synced_at IS NOT NULL",
        )?;
        let rows: Vec<(i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        let mut removed = 0;
        for (id, synced_at) in rows {
            if parse_timestamp(&synced_at)? < older_than {
                conn.execute("DELETE FROM pending_operations WHERE id = ?1", params![id])?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Store a value under `key` for `ttl`; overwrites any previous entry.
    pub fn cache_put(&self, key: &str, data: &Value, ttl: Duration) -> Result<(), StorageError> {
        self.cache_put_at(key, data, ttl, Utc::now())
    }

    fn cache_put_at(
        &self,
        key: &str,
        data: &Value,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO cached_data (key, data, cached_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                cached_at = excluded.cached_at,
                expires_at = excluded.expires_at",
            params![
                key,
                serde_json::to_string(data)?,
                now.to_rfc3339(),
                expiry(now, ttl).to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Read a cached value. Returns `None` once the entry has expired, even
    /// if no sweep ever ran; the stale row is left for the sweep.
    pub fn cache_get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.cache_get_at(key, Utc::now())
    }

    fn cache_get_at(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Value>, StorageError> {
        let conn = self.lock();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT data, expires_at FROM cached_data WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((data, expires_at)) = row else {
            return Ok(None);
        };
        if now > parse_timestamp(&expires_at)? {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Physically remove expired cache entries, returning how many went.
    pub fn cache_sweep_expired(&self) -> Result<usize, StorageError> {
        self.cache_sweep_expired_at(Utc::now())
    }

    fn cache_sweep_expired_at(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT key, expires_at FROM cached_data")?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        let mut removed = 0;
        for (key, expires_at) in rows {
            if now > parse_timestamp(&expires_at)? {
                conn.execute("DELETE FROM cached_data WHERE key = ?1", params![key])?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StorageError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::max_value());
    now.checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

struct RawOperation {
    id: i64,
    kind: String,
    collection: String,
    record_id: String,
    payload: String,
    enqueued_at: String,
    synced: i64,
    synced_at: Option<String>,
}

impl RawOperation {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            collection: row.get(2)?,
            record_id: row.get(3)?,
            payload: row.get(4)?,
            enqueued_at: row.get(5)?,
            synced: row.get(6)?,
            synced_at: row.get(7)?,
        })
    }

    fn into_pending(self) -> Result<PendingOperation, StorageError> {
        let kind = OperationKind::from_str(&self.kind)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown operation kind {:?}", self.kind)))?;
        let synced_at = match self.synced_at {
            Some(ref s) => Some(parse_timestamp(s)?),
            None => None,
        };
        Ok(PendingOperation {
            id: self.id,
            kind,
            collection: self.collection,
            record_id: self.record_id,
            payload: serde_json::from_str(&self.payload)?,
            enqueued_at: parse_timestamp(&self.enqueued_at)?,
            synced: self.synced != 0,
            synced_at,
        })
    }
}
