//! lxref-storage: SQLite persistence for the cross-reference database.
//!
//! Uses rusqlite with bundled SQLite, WAL mode, and an embedded schema.
//! The six logical maps of the data model each persist as one table
//! whose primary key reproduces the ordered key/value layout; batches
//! are SQLite transactions, so a crash mid-tag rolls back to the last
//! committed batch and the tag stays retriable.

mod blobs;
mod xref;

pub use blobs::TreeEntry;
pub use xref::{StoreStats, TagState};

use lxref_core::LxrefError;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const SCHEMA: &str = include_str!("schema.sql");
const SCHEMA_VERSION: &str = "1";

const BUSY_RETRIES: u32 = 6;
const BUSY_BACKOFF_MS: u64 = 20;

/// Which extraction pass a state query refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Defs,
    Refs,
}

impl Pass {
    pub(crate) fn column(self) -> &'static str {
        match self {
            Self::Defs => "defs",
            Self::Refs => "refs",
        }
    }
}

/// Outcome of one extraction pass over one blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Pending,
    Done,
    Partial,
}

impl PassState {
    pub(crate) fn code(self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Done => 1,
            Self::Partial => 2,
        }
    }
}

/// SQLite-backed store for the blob identity maps and the
/// cross-reference maps.
///
/// Wraps the connection in a `Mutex`; the update coordinator is the only
/// writer, readers share the same handle.
pub struct Store {
    conn: Mutex<Connection>,
}

pub(crate) fn store_err(e: rusqlite::Error) -> LxrefError {
    LxrefError::Storage(e.to_string())
}

impl Store {
    pub(crate) fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("Store mutex poisoned")
    }

    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, LxrefError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(store_err)?;

        // WAL mode for concurrent readers during an update run.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(store_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(store_err)?;
        conn.pragma_update(None, "cache_size", -64000i64)
            .map_err(store_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(store_err)?;

        Self::init(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, LxrefError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, LxrefError> {
        conn.execute_batch(SCHEMA).map_err(store_err)?;

        let version: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
                row.get(0)
            })
            .map(Some)
            .or_else(ignore_no_rows)
            .map_err(store_err)?;
        match version {
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                    [SCHEMA_VERSION],
                )
                .map_err(store_err)?;
            }
            Some(v) if v == SCHEMA_VERSION => {}
            Some(v) => {
                return Err(LxrefError::Storage(format!(
                    "schema version mismatch: found {v}, expected {SCHEMA_VERSION}"
                )))
            }
        }

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.reconcile_counter()?;
        Ok(store)
    }

    /// Run a write closure, retrying transient busy failures with
    /// bounded backoff before escalating to `DatabaseBusy`.
    pub(crate) fn write<T>(
        &self,
        f: impl Fn(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, LxrefError> {
        let conn = self.conn();
        let mut backoff = Duration::from_millis(BUSY_BACKOFF_MS);
        for attempt in 0..BUSY_RETRIES {
            match f(&conn) {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) => {
                    tracing::debug!("database busy (attempt {}), backing off", attempt + 1);
                    std::thread::sleep(backoff);
                    backoff *= 2;
                }
                Err(e) => return Err(store_err(e)),
            }
        }
        Err(LxrefError::DatabaseBusy(BUSY_RETRIES))
    }

    /// Ordered dump of every map, keyed by map name. Used by the
    /// determinism and idempotence tests to compare whole databases.
    pub fn snapshot(&self) -> Result<BTreeMap<String, Vec<String>>, LxrefError> {
        let conn = self.conn();
        let mut out = BTreeMap::new();
        let dumps: [(&str, &str); 7] = [
            ("blobs", "SELECT lower(hex(hash)), num FROM blobs ORDER BY hash"),
            ("hashes", "SELECT num, lower(hex(hash)) FROM hashes ORDER BY num"),
            ("paths", "SELECT num, path FROM paths ORDER BY num, path"),
            ("trees", "SELECT tag, seq, path, num FROM trees ORDER BY tag, seq"),
            (
                "defs",
                "SELECT ident, num, line, kind, family FROM defs ORDER BY ident, num, line, kind, family",
            ),
            (
                "refs",
                "SELECT ident, num, family, lines FROM refs ORDER BY ident, num, family",
            ),
            ("tags", "SELECT name, indexed FROM tags ORDER BY name"),
        ];
        for (name, sql) in dumps {
            let mut stmt = conn.prepare(sql).map_err(store_err)?;
            let column_count = stmt.column_count();
            let rows = stmt
                .query_map([], |row| {
                    let mut fields = Vec::with_capacity(column_count);
                    for i in 0..column_count {
                        let value: rusqlite::types::Value = row.get(i)?;
                        fields.push(match value {
                            rusqlite::types::Value::Null => String::new(),
                            rusqlite::types::Value::Integer(v) => v.to_string(),
                            rusqlite::types::Value::Real(v) => v.to_string(),
                            rusqlite::types::Value::Text(v) => v,
                            rusqlite::types::Value::Blob(v) => format!("{v:02x?}"),
                        });
                    }
                    Ok(fields.join("\t"))
                })
                .map_err(store_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(store_err)?;
            out.insert(name.to_string(), rows);
        }
        Ok(out)
    }
}

pub(crate) fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

pub(crate) fn ignore_no_rows<T>(e: rusqlite::Error) -> Result<Option<T>, rusqlite::Error> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}
