//! SQLite backend for the local store.
//!
//! One table per collection (auto-increment `local_id` plus the sync
//! envelope columns and a JSON payload), one `sync_meta` row per collection
//! holding the pull cursor. The connection is protected by a
//! `parking_lot::ReentrantMutex<RefCell<Connection>>` so that `transaction()`
//! can hold the lock while calling the closure, which also needs to lock in
//! order to execute SQL.

use std::cell::{Cell, RefCell};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::ReentrantMutex;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::error::{ProteeError, Result, StorageError};
use crate::types::{format_ts, parse_ts, Collection, LocalId, RawRecord, SyncId};

/// Map a rusqlite error to a `ProteeError`.
fn storage_err(e: rusqlite::Error) -> ProteeError {
    ProteeError::Storage(StorageError::Sqlite(e))
}

const ENVELOPE_COLS: &str =
    "local_id, sync_id, owner_id, updated_at, pushed_at, deleted_at, payload";

/// Raw column values before timestamp/JSON parsing.
type RowTuple = (
    i64,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    String,
);

// ============================================================================
// SqliteBackend
// ============================================================================

/// Embedded per-device datastore.
pub struct SqliteBackend {
    conn: ReentrantMutex<RefCell<rusqlite::Connection>>,
    initialized: bool,
}

impl SqliteBackend {
    /// Open a file-backed database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = rusqlite::Connection::open(path).map_err(storage_err)?;
        Ok(Self {
            conn: ReentrantMutex::new(RefCell::new(conn)),
            initialized: false,
        })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(storage_err)?;
        Ok(Self {
            conn: ReentrantMutex::new(RefCell::new(conn)),
            initialized: false,
        })
    }

    /// Create tables, pragmas, and indexes for every collection.
    pub fn initialize(&mut self) -> Result<()> {
        {
            let guard = self.conn.lock();
            let conn = guard.borrow();

            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA busy_timeout=5000;",
            )
            .map_err(storage_err)?;

            for collection in Collection::ALL {
                let table = collection.table();
                conn.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        local_id   INTEGER PRIMARY KEY AUTOINCREMENT,
                        sync_id    TEXT UNIQUE,
                        owner_id   TEXT,
                        updated_at TEXT NOT NULL,
                        pushed_at  TEXT,
                        deleted_at TEXT,
                        payload    TEXT NOT NULL DEFAULT '{{}}'
                    );
                    CREATE INDEX IF NOT EXISTS idx_{table}_updated
                        ON {table}(updated_at);"
                ))
                .map_err(storage_err)?;

                // Date-keyed reads (daily lists, charts) go through this index.
                if !collection.is_singleton() {
                    conn.execute_batch(&format!(
                        "CREATE INDEX IF NOT EXISTS idx_{table}_date
                            ON {table}(json_extract(payload, '$.date'));"
                    ))
                    .map_err(storage_err)?;
                }
            }

            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sync_meta (
                    collection     TEXT PRIMARY KEY,
                    last_synced_at TEXT NOT NULL
                );",
            )
            .map_err(storage_err)?;
        }

        self.initialized = true;
        Ok(())
    }

    /// Returns whether `initialize()` has been called.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Execute `f` with a shared reference to the underlying connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>,
    {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        f(&conn).map_err(storage_err)
    }

    fn check_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(ProteeError::Storage(StorageError::NotInitialized));
        }
        Ok(())
    }

    /// Extract raw column values from a row; parsing happens in `hydrate`.
    fn row_to_tuple(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowTuple> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    /// Parse raw column values into a `RawRecord`.
    fn hydrate(collection: Collection, tuple: RowTuple) -> Result<RawRecord> {
        let (local_id, sync_id, owner_id, updated_at, pushed_at, deleted_at, payload) = tuple;

        let corruption = |field: &str, source: Box<dyn std::error::Error + Send + Sync>| {
            ProteeError::Storage(StorageError::Corruption {
                collection: collection.table().to_string(),
                local_id,
                field: field.to_string(),
                source,
            })
        };

        let parse_col = |field: &str, s: &str| -> Result<DateTime<Utc>> {
            parse_ts(s).ok_or_else(|| corruption(field, format!("bad timestamp: {s}").into()))
        };

        let updated_at = parse_col("updated_at", &updated_at)?;
        let pushed_at = pushed_at
            .as_deref()
            .map(|s| parse_col("pushed_at", s))
            .transpose()?;
        let deleted_at = deleted_at
            .as_deref()
            .map(|s| parse_col("deleted_at", s))
            .transpose()?;
        let payload: Value =
            serde_json::from_str(&payload).map_err(|e| corruption("payload", Box::new(e)))?;

        Ok(RawRecord {
            local_id: LocalId(local_id),
            sync_id: sync_id.map(SyncId),
            owner_id,
            updated_at,
            pushed_at,
            deleted_at,
            payload,
        })
    }

    fn query_records(
        &self,
        collection: Collection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<RawRecord>> {
        let tuples: Vec<RowTuple> = {
            let guard = self.conn.lock();
            let conn = guard.borrow();
            let mut stmt = conn.prepare_cached(sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(params, Self::row_to_tuple)
                .map_err(storage_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage_err)?
        };
        tuples
            .into_iter()
            .map(|t| Self::hydrate(collection, t))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Record I/O
    // -----------------------------------------------------------------------

    /// Fetch a record by its device-local id, tombstones included.
    pub fn get_raw(&self, collection: Collection, local_id: LocalId) -> Result<Option<RawRecord>> {
        self.check_initialized()?;
        let sql = format!(
            "SELECT {ENVELOPE_COLS} FROM {} WHERE local_id = ?1",
            collection.table()
        );
        let tuple = {
            let guard = self.conn.lock();
            let conn = guard.borrow();
            let mut stmt = conn.prepare_cached(&sql).map_err(storage_err)?;
            stmt.query_row(params![local_id.0], Self::row_to_tuple)
                .optional()
                .map_err(storage_err)?
        };
        tuple.map(|t| Self::hydrate(collection, t)).transpose()
    }

    /// Fetch a record by its sync id — the only lookup the pull merge uses.
    pub fn get_by_sync_id(
        &self,
        collection: Collection,
        sync_id: &SyncId,
    ) -> Result<Option<RawRecord>> {
        self.check_initialized()?;
        let sql = format!(
            "SELECT {ENVELOPE_COLS} FROM {} WHERE sync_id = ?1",
            collection.table()
        );
        let tuple = {
            let guard = self.conn.lock();
            let conn = guard.borrow();
            let mut stmt = conn.prepare_cached(&sql).map_err(storage_err)?;
            stmt.query_row(params![sync_id.0], Self::row_to_tuple)
                .optional()
                .map_err(storage_err)?
        };
        tuple.map(|t| Self::hydrate(collection, t)).transpose()
    }

    /// Insert a new record, assigning a fresh `local_id` (the `local_id`
    /// field of `record` is ignored). Returns the assigned id.
    pub fn insert_raw(&self, collection: Collection, record: &RawRecord) -> Result<LocalId> {
        self.check_initialized()?;
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| ProteeError::Internal(format!("serialize payload: {e}")))?;
        let sql = format!(
            "INSERT INTO {} (sync_id, owner_id, updated_at, pushed_at, deleted_at, payload) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            collection.table()
        );
        self.with_conn(|conn| {
            conn.execute(
                &sql,
                params![
                    record.sync_id.as_ref().map(|s| s.as_str()),
                    record.owner_id,
                    format_ts(record.updated_at),
                    record.pushed_at.map(format_ts),
                    record.deleted_at.map(format_ts),
                    payload,
                ],
            )?;
            Ok(LocalId(conn.last_insert_rowid()))
        })
    }

    /// Overwrite an existing record's envelope and payload.
    pub fn update_raw(&self, collection: Collection, record: &RawRecord) -> Result<()> {
        self.check_initialized()?;
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| ProteeError::Internal(format!("serialize payload: {e}")))?;
        let sql = format!(
            "UPDATE {} SET sync_id = ?1, owner_id = ?2, updated_at = ?3, \
             pushed_at = ?4, deleted_at = ?5, payload = ?6 WHERE local_id = ?7",
            collection.table()
        );
        let changed = self.with_conn(|conn| {
            conn.execute(
                &sql,
                params![
                    record.sync_id.as_ref().map(|s| s.as_str()),
                    record.owner_id,
                    format_ts(record.updated_at),
                    record.pushed_at.map(format_ts),
                    record.deleted_at.map(format_ts),
                    payload,
                    record.local_id.0,
                ],
            )
        })?;
        if changed == 0 {
            return Err(ProteeError::Storage(StorageError::NotFound {
                collection: collection.table().to_string(),
                local_id: record.local_id.0,
            }));
        }
        Ok(())
    }

    /// Confirm a push: store the server identity and advance the watermark.
    ///
    /// Touches only `sync_id`/`owner_id`/`pushed_at` — a record edited while
    /// the push was in flight keeps its newer `updated_at` and therefore
    /// stays dirty.
    pub fn mark_pushed(
        &self,
        collection: Collection,
        local_id: LocalId,
        sync_id: &SyncId,
        owner_id: Option<&str>,
        watermark: DateTime<Utc>,
    ) -> Result<()> {
        self.check_initialized()?;
        let sql = format!(
            "UPDATE {} SET sync_id = ?1, owner_id = COALESCE(?2, owner_id), pushed_at = ?3 \
             WHERE local_id = ?4",
            collection.table()
        );
        let changed = self.with_conn(|conn| {
            conn.execute(
                &sql,
                params![sync_id.0, owner_id, format_ts(watermark), local_id.0],
            )
        })?;
        if changed == 0 {
            return Err(ProteeError::Storage(StorageError::NotFound {
                collection: collection.table().to_string(),
                local_id: local_id.0,
            }));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scans
    // -----------------------------------------------------------------------

    /// Scan a collection. Tombstones excluded unless `include_deleted`.
    pub fn scan_raw(
        &self,
        collection: Collection,
        include_deleted: bool,
    ) -> Result<Vec<RawRecord>> {
        self.check_initialized()?;
        let table = collection.table();
        let sql = if include_deleted {
            format!("SELECT {ENVELOPE_COLS} FROM {table} ORDER BY local_id")
        } else {
            format!(
                "SELECT {ENVELOPE_COLS} FROM {table} WHERE deleted_at IS NULL ORDER BY local_id"
            )
        };
        self.query_records(collection, &sql, [])
    }

    /// Records needing push: never pushed, or edited past the watermark.
    /// Pure query — this is the change tracker.
    pub fn scan_dirty_raw(&self, collection: Collection) -> Result<Vec<RawRecord>> {
        self.check_initialized()?;
        let sql = format!(
            "SELECT {ENVELOPE_COLS} FROM {} \
             WHERE sync_id IS NULL OR pushed_at IS NULL OR updated_at > pushed_at \
             ORDER BY local_id",
            collection.table()
        );
        self.query_records(collection, &sql, [])
    }

    /// Active records for one calendar date.
    pub fn scan_by_date_raw(
        &self,
        collection: Collection,
        date: NaiveDate,
    ) -> Result<Vec<RawRecord>> {
        self.check_initialized()?;
        let sql = format!(
            "SELECT {ENVELOPE_COLS} FROM {} \
             WHERE deleted_at IS NULL AND json_extract(payload, '$.date') = ?1 \
             ORDER BY local_id",
            collection.table()
        );
        self.query_records(collection, &sql, params![date.to_string()])
    }

    /// Active records for an inclusive date range.
    pub fn scan_date_range_raw(
        &self,
        collection: Collection,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>> {
        self.check_initialized()?;
        let sql = format!(
            "SELECT {ENVELOPE_COLS} FROM {} \
             WHERE deleted_at IS NULL \
               AND json_extract(payload, '$.date') >= ?1 \
               AND json_extract(payload, '$.date') <= ?2 \
             ORDER BY json_extract(payload, '$.date'), local_id",
            collection.table()
        );
        self.query_records(
            collection,
            &sql,
            params![start.to_string(), end.to_string()],
        )
    }

    /// Count live (non-tombstoned) records.
    pub fn count_raw(&self, collection: Collection) -> Result<usize> {
        self.check_initialized()?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE deleted_at IS NULL",
            collection.table()
        );
        self.with_conn(|conn| {
            conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
        })
    }

    // -----------------------------------------------------------------------
    // Sync cursors
    // -----------------------------------------------------------------------

    /// Read the pull cursor for a collection. `None` means never synced
    /// (treat as epoch — full pull).
    pub fn get_cursor(&self, collection: Collection) -> Result<Option<DateTime<Utc>>> {
        self.check_initialized()?;
        let stored: Option<String> = {
            let guard = self.conn.lock();
            let conn = guard.borrow();
            let mut stmt = conn
                .prepare_cached("SELECT last_synced_at FROM sync_meta WHERE collection = ?1")
                .map_err(storage_err)?;
            stmt.query_row(params![collection.table()], |row| row.get(0))
                .optional()
                .map_err(storage_err)?
        };
        match stored {
            None => Ok(None),
            Some(s) => parse_ts(&s).map(Some).ok_or_else(|| {
                ProteeError::Internal(format!("invalid cursor for {collection}: {s}"))
            }),
        }
    }

    /// Persist the pull cursor. Call inside the same `transaction()` that
    /// applied the page's rows.
    pub fn set_cursor(&self, collection: Collection, ts: DateTime<Utc>) -> Result<()> {
        self.check_initialized()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sync_meta (collection, last_synced_at) VALUES (?1, ?2)",
                params![collection.table(), format_ts(ts)],
            )
            .map(|_| ())
        })
    }

    /// Drop every cursor — the next sync re-pulls all history.
    pub fn reset_cursors(&self) -> Result<()> {
        self.check_initialized()?;
        self.with_conn(|conn| conn.execute("DELETE FROM sync_meta", []).map(|_| ()))
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Clear every collection table and every cursor in one transaction.
    /// The substrate of force-full-resync: the next sync re-derives local
    /// state entirely from the remote store.
    pub fn wipe_all(&self) -> Result<()> {
        self.check_initialized()?;
        self.transaction(|backend| {
            backend.with_conn(|conn| {
                for collection in Collection::ALL {
                    conn.execute(&format!("DELETE FROM {}", collection.table()), [])?;
                }
                conn.execute("DELETE FROM sync_meta", [])?;
                Ok(())
            })
        })
    }

    /// Physically remove tombstones. Never called by sync (tombstones are
    /// retained indefinitely); exposed for explicit maintenance only.
    pub fn purge_tombstones(&self, collection: Collection) -> Result<usize> {
        self.check_initialized()?;
        let sql = format!(
            "DELETE FROM {} WHERE deleted_at IS NOT NULL",
            collection.table()
        );
        self.with_conn(|conn| conn.execute(&sql, []))
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Execute a closure inside a SAVEPOINT so it composes with outer
    /// transactions. Each invocation gets a unique name to avoid collisions
    /// when nested. `ReentrantMutex` lets the closure re-acquire the lock
    /// for its SQL calls.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        thread_local! {
            static SP_COUNTER: Cell<u64> = const { Cell::new(0) };
        }
        let sp_name = SP_COUNTER.with(|c| {
            let n = c.get();
            c.set(n + 1);
            format!("sp_{n}")
        });

        {
            let guard = self.conn.lock();
            guard
                .borrow()
                .execute(&format!("SAVEPOINT {sp_name}"), [])
                .map_err(storage_err)?;
        }

        match f(self) {
            Ok(v) => {
                let guard = self.conn.lock();
                let release_ok = guard
                    .borrow()
                    .execute(&format!("RELEASE SAVEPOINT {sp_name}"), [])
                    .is_ok();
                drop(guard);
                if release_ok {
                    Ok(v)
                } else {
                    let guard = self.conn.lock();
                    let _ = guard
                        .borrow()
                        .execute(&format!("ROLLBACK TO SAVEPOINT {sp_name}"), []);
                    Err(ProteeError::Storage(StorageError::Transaction {
                        message: "RELEASE SAVEPOINT failed".to_string(),
                        source: None,
                    }))
                }
            }
            Err(e) => {
                let guard = self.conn.lock();
                let _ = guard
                    .borrow()
                    .execute(&format!("ROLLBACK TO SAVEPOINT {sp_name}"), []);
                Err(e)
            }
        }
    }
}
