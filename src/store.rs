//! Spatial record store over a relational backing database.
//!
//! One row per indexed fragment, keyed by `(document_key, node_id)`, with
//! the bounding envelope flattened into indexed columns so the database's own
//! indexes accelerate the envelope pre-filter. Every operation acquires a
//! connection for its own duration through [`ConnectionPool::acquire`] and
//! the RAII guard returns it on every exit path; connections are never held
//! across calls or shared between concurrent callers.

use crate::error::{GeodexError, Result};
use crate::types::{Envelope, IndexConfig, SpatialRecord};
use bytes::Bytes;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, params, params_from_iter};
use std::ops::Deref;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS spatial_index (
    document_key TEXT NOT NULL,
    node_id      INTEGER NOT NULL,
    min_x        REAL NOT NULL,
    min_y        REAL NOT NULL,
    max_x        REAL NOT NULL,
    max_y        REAL NOT NULL,
    geometry     BLOB NOT NULL,
    srs          TEXT NOT NULL,
    PRIMARY KEY (document_key, node_id)
);
CREATE INDEX IF NOT EXISTS spatial_index_bbox ON spatial_index (min_x, min_y, max_x, max_y);
CREATE INDEX IF NOT EXISTS spatial_index_doc ON spatial_index (document_key);
";

/// Pool of SQLite connections with acquire/release semantics.
struct ConnectionPool {
    uri: String,
    in_memory: bool,
    max_idle: usize,
    busy_timeout: Duration,
    idle: Mutex<Vec<Connection>>,
    // A shared-cache in-memory database is dropped when its last connection
    // closes; this one pins it for the pool's lifetime.
    _anchor: Mutex<Connection>,
}

impl ConnectionPool {
    fn new(uri: String, in_memory: bool, config: &IndexConfig) -> Result<Self> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let anchor = open_connection(&uri, in_memory, busy_timeout)?;
        anchor
            .execute_batch(SCHEMA)
            .map_err(|e| GeodexError::StoreUnavailable(format!("schema creation failed: {e}")))?;
        log::debug!("spatial index schema ready at {uri}");
        Ok(Self {
            uri,
            in_memory,
            max_idle: config.max_idle_connections,
            busy_timeout,
            idle: Mutex::new(Vec::new()),
            _anchor: Mutex::new(anchor),
        })
    }

    /// Obtain a private connection for the duration of one call.
    fn acquire(&self) -> Result<PooledConnection<'_>> {
        let reused = self.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => open_connection(&self.uri, self.in_memory, self.busy_timeout)?,
        };
        Ok(PooledConnection {
            pool: self,
            conn: Some(conn),
        })
    }

    fn release(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
        // Above the cap the connection just closes on drop.
    }

    #[cfg(test)]
    fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }
}

fn open_connection(uri: &str, in_memory: bool, busy_timeout: Duration) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(uri, flags)
        .map_err(|e| GeodexError::StoreUnavailable(format!("cannot open {uri}: {e}")))?;
    conn.busy_timeout(busy_timeout)?;
    if !in_memory {
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    }
    Ok(conn)
}

/// RAII guard: the connection goes back to the pool when the guard drops,
/// whether the call returned normally or erred out.
struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// Persistence layer for [`SpatialRecord`]s.
pub struct SpatialStore {
    pool: ConnectionPool,
}

impl SpatialStore {
    /// Open (or create) a file-backed store.
    pub fn open<P: AsRef<Path>>(path: P, config: &IndexConfig) -> Result<Self> {
        let uri = path.as_ref().to_string_lossy().into_owned();
        Ok(Self {
            pool: ConnectionPool::new(uri, false, config)?,
        })
    }

    /// Open a private in-memory store (shared across the pool's connections).
    pub fn memory(config: &IndexConfig) -> Result<Self> {
        let uri = format!("file:geodex-{}?mode=memory&cache=shared", Uuid::new_v4());
        Ok(Self {
            pool: ConnectionPool::new(uri, true, config)?,
        })
    }

    /// Database URI, usable for out-of-band inspection.
    pub fn uri(&self) -> &str {
        &self.pool.uri
    }

    /// Append one record.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if no connection can be obtained or the write
    /// fails; a failed insert is never silently dropped.
    pub fn insert(&self, record: &SpatialRecord) -> Result<()> {
        let conn = self.pool.acquire()?;
        conn.execute(
            "INSERT INTO spatial_index \
             (document_key, node_id, min_x, min_y, max_x, max_y, geometry, srs) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.document_key,
                record.node_id as i64,
                record.envelope.min_x,
                record.envelope.min_y,
                record.envelope.max_x,
                record.envelope.max_y,
                record.geometry.as_ref(),
                record.srs,
            ],
        )?;
        Ok(())
    }

    /// Remove all rows for a document. Idempotent: zero rows removed is not
    /// an error.
    pub fn delete_by_document(&self, document_key: &str) -> Result<usize> {
        let conn = self.pool.acquire()?;
        let removed = conn.execute(
            "DELETE FROM spatial_index WHERE document_key = ?1",
            params![document_key],
        )?;
        Ok(removed)
    }

    /// Look up one record by its node identity.
    pub fn get(&self, document_key: &str, node_id: u64) -> Result<Option<SpatialRecord>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT document_key, node_id, min_x, min_y, max_x, max_y, geometry, srs \
             FROM spatial_index WHERE document_key = ?1 AND node_id = ?2",
        )?;
        let mut rows = stmt.query_map(params![document_key, node_id as i64], row_to_record)?;
        rows.next().transpose().map_err(GeodexError::from)
    }

    /// All records for one document, in node order.
    pub fn scan_by_document(&self, document_key: &str) -> Result<Vec<SpatialRecord>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT document_key, node_id, min_x, min_y, max_x, max_y, geometry, srs \
             FROM spatial_index WHERE document_key = ?1 ORDER BY node_id",
        )?;
        let rows = stmt.query_map(params![document_key], row_to_record)?;
        collect_records(rows)
    }

    /// Total row count.
    pub fn count(&self) -> Result<u64> {
        let conn = self.pool.acquire()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM spatial_index", [], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }

    /// Scan records, optionally restricted to envelopes intersecting `envelope`
    /// and to a document scope. The envelope restriction runs as SQL so the
    /// bbox-column indexes do the pruning.
    ///
    /// An empty scope slice means "all documents", same as `None`.
    pub fn scan_region(
        &self,
        envelope: Option<&Envelope>,
        scope: Option<&[&str]>,
    ) -> Result<Vec<SpatialRecord>> {
        let mut sql = String::from(
            "SELECT document_key, node_id, min_x, min_y, max_x, max_y, geometry, srs \
             FROM spatial_index",
        );
        let mut clauses: Vec<String> = Vec::new();
        let mut bind: Vec<Value> = Vec::new();

        if let Some(env) = envelope {
            clauses
                .push("max_x >= ? AND min_x <= ? AND max_y >= ? AND min_y <= ?".to_string());
            bind.push(Value::Real(env.min_x));
            bind.push(Value::Real(env.max_x));
            bind.push(Value::Real(env.min_y));
            bind.push(Value::Real(env.max_y));
        }
        if let Some(scope) = scope
            && !scope.is_empty()
        {
            let marks = vec!["?"; scope.len()].join(", ");
            clauses.push(format!("document_key IN ({marks})"));
            for key in scope {
                bind.push(Value::Text((*key).to_string()));
            }
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY document_key, node_id");

        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bind), row_to_record)?;
        collect_records(rows)
    }

    #[cfg(test)]
    fn idle_connections(&self) -> usize {
        self.pool.idle_len()
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SpatialRecord> {
    let envelope = Envelope {
        min_x: row.get(2)?,
        min_y: row.get(3)?,
        max_x: row.get(4)?,
        max_y: row.get(5)?,
    };
    Ok(SpatialRecord {
        document_key: row.get(0)?,
        node_id: row.get::<_, i64>(1)? as u64,
        envelope,
        geometry: Bytes::from(row.get::<_, Vec<u8>>(6)?),
        srs: row.get(7)?,
    })
}

fn collect_records<I>(rows: I) -> Result<Vec<SpatialRecord>>
where
    I: Iterator<Item = rusqlite::Result<SpatialRecord>>,
{
    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}
