//! Blob identity store: the bijective hash/number maps, the path set,
//! and the per-blob extraction state.

use crate::{ignore_no_rows, store_err, Pass, PassState, Store};
use lxref_core::{BlobHash, BlobNum, LxrefError};
use rusqlite::params;

/// One tree entry after interning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub num: BlobNum,
    pub is_new: bool,
}

impl Store {
    /// Intern every `(path, hash)` pair of a tag tree in one transaction:
    /// allocate blob numbers for unseen hashes, record path observations,
    /// and advance the persisted counter. The counter, both identity maps
    /// and the extraction rows commit as a single unit.
    pub fn intern_tree(
        &self,
        entries: &[(String, BlobHash)],
    ) -> Result<Vec<TreeEntry>, LxrefError> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut next: BlobNum = {
                let mut stmt =
                    tx.prepare("SELECT value FROM meta WHERE key = 'next_blob_num'")?;
                let value: Option<String> =
                    stmt.query_row([], |row| row.get(0)).map(Some).or_else(ignore_no_rows)?;
                value.and_then(|v| v.parse().ok()).unwrap_or(1)
            };

            let mut out = Vec::with_capacity(entries.len());
            {
                let mut lookup = tx.prepare("SELECT num FROM blobs WHERE hash = ?1")?;
                let mut insert_blob =
                    tx.prepare("INSERT INTO blobs (hash, num) VALUES (?1, ?2)")?;
                let mut insert_hash =
                    tx.prepare("INSERT INTO hashes (num, hash) VALUES (?1, ?2)")?;
                let mut insert_state =
                    tx.prepare("INSERT INTO extraction (num, defs, refs) VALUES (?1, 0, 0)")?;
                let mut insert_path =
                    tx.prepare("INSERT OR IGNORE INTO paths (num, path) VALUES (?1, ?2)")?;

                for (path, hash) in entries {
                    let existing: Option<i64> = lookup
                        .query_row([hash.as_bytes()], |row| row.get(0))
                        .map(Some)
                        .or_else(ignore_no_rows)?;
                    let (num, is_new) = match existing {
                        Some(num) => (num as BlobNum, false),
                        None => {
                            let num = next;
                            insert_blob.execute(params![hash.as_bytes(), num])?;
                            insert_hash.execute(params![num, hash.as_bytes()])?;
                            insert_state.execute(params![num])?;
                            next += 1;
                            (num, true)
                        }
                    };
                    insert_path.execute(params![num, path])?;
                    out.push(TreeEntry {
                        path: path.clone(),
                        num,
                        is_new,
                    });
                }
            }

            tx.execute(
                "INSERT INTO meta (key, value) VALUES ('next_blob_num', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [next.to_string()],
            )?;
            tx.commit()?;
            Ok(out)
        })
    }

    /// Inverse lookup: blob number to hash. A number that escaped into
    /// the downstream maps without an identity row is a broken invariant.
    pub fn resolve(&self, num: BlobNum) -> Result<BlobHash, LxrefError> {
        let conn = self.conn();
        let bytes: Option<Vec<u8>> = conn
            .query_row("SELECT hash FROM hashes WHERE num = ?1", [num], |row| row.get(0))
            .map(Some)
            .or_else(ignore_no_rows)
            .map_err(store_err)?;
        match bytes {
            Some(bytes) => BlobHash::from_slice(&bytes),
            None => Err(LxrefError::DatabaseCorrupt(format!(
                "blob number {num} has no hash entry"
            ))),
        }
    }

    pub fn blob_num(&self, hash: &BlobHash) -> Result<Option<BlobNum>, LxrefError> {
        let conn = self.conn();
        let num: Option<i64> = conn
            .query_row(
                "SELECT num FROM blobs WHERE hash = ?1",
                [hash.as_bytes()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)
            .map_err(store_err)?;
        Ok(num.map(|n| n as BlobNum))
    }

    /// All paths this blob has appeared under, across every indexed tag.
    pub fn paths_for(&self, num: BlobNum) -> Result<Vec<String>, LxrefError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT path FROM paths WHERE num = ?1 ORDER BY path")
            .map_err(store_err)?;
        let paths = stmt
            .query_map([num], |row| row.get(0))
            .map_err(store_err)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(store_err)?;
        Ok(paths)
    }

    /// Filter `nums` down to blobs the given pass has not completed.
    /// Partial blobs count as pending so later runs retry them.
    pub fn pending(&self, nums: &[BlobNum], pass: Pass) -> Result<Vec<BlobNum>, LxrefError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {col} FROM extraction WHERE num = ?1",
            col = pass.column()
        );
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let mut out = Vec::new();
        for &num in nums {
            let state: Option<i64> = stmt
                .query_row([num], |row| row.get(0))
                .map(Some)
                .or_else(ignore_no_rows)
                .map_err(store_err)?;
            if state.unwrap_or(0) != PassState::Done.code() {
                out.push(num);
            }
        }
        Ok(out)
    }

    /// Blobs currently marked partial in either pass, with their paths.
    pub fn partial_blobs(&self) -> Result<Vec<BlobNum>, LxrefError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT num FROM extraction WHERE defs = 2 OR refs = 2 ORDER BY num")
            .map_err(store_err)?;
        let nums = stmt
            .query_map([], |row| row.get::<_, i64>(0).map(|n| n as BlobNum))
            .map_err(store_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)?;
        Ok(nums)
    }

    /// Reconcile the persisted counter with the identity maps after a
    /// partial commit: `next_blob_num` becomes `max(num) + 1`.
    pub(crate) fn reconcile_counter(&self) -> Result<(), LxrefError> {
        self.write(|conn| {
            let max: i64 =
                conn.query_row("SELECT COALESCE(MAX(num), 0) FROM hashes", [], |row| {
                    row.get(0)
                })?;
            let stored: Option<String> = conn
                .query_row(
                    "SELECT value FROM meta WHERE key = 'next_blob_num'",
                    [],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(ignore_no_rows)?;
            let had_record = stored.is_some();
            let stored_next: i64 = stored.and_then(|v| v.parse().ok()).unwrap_or(1);
            let expected = max + 1;
            if stored_next != expected {
                if had_record {
                    tracing::warn!(
                        "blob counter out of step ({stored_next} vs {expected}), reconciling"
                    );
                }
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('next_blob_num', ?1)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    [expected.to_string()],
                )?;
            }
            Ok(())
        })
    }
}
