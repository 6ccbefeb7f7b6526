//! Cross-reference map operations: definition and reference batches,
//! tag trees and flags, query-side reads, and the invariant sweep.

use crate::{ignore_no_rows, store_err, PassState, Store};
use lxref_core::{BlobNum, DefKind, DefRecord, Family, LxrefError, RefRecord};
use rusqlite::params;
use std::collections::{HashMap, HashSet};

/// A tag name with its durable indexed flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagState {
    pub name: String,
    pub indexed: bool,
}

/// Row counts of the persisted maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub blobs: u64,
    pub paths: u64,
    pub tags: u64,
    pub indexed_tags: u64,
    pub defs: u64,
    pub def_idents: u64,
    pub refs: u64,
    pub partial_blobs: u64,
}

impl Store {
    /// Append one blob's definition tuples and advance its defs-pass
    /// state, all in one transaction. Tuples are deduplicated by the
    /// table's primary key.
    pub fn apply_def_batch(
        &self,
        outcomes: &[(BlobNum, PassState, Vec<DefRecord>)],
    ) -> Result<(), LxrefError> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut insert = tx.prepare(
                    "INSERT OR IGNORE INTO defs (ident, num, line, kind, family)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                let mut state =
                    tx.prepare("UPDATE extraction SET defs = ?2 WHERE num = ?1")?;
                for (num, outcome, defs) in outcomes {
                    for def in defs {
                        insert.execute(params![
                            def.ident,
                            def.num,
                            def.line,
                            def.kind.to_string(),
                            def.family.code(),
                        ])?;
                    }
                    state.execute(params![num, outcome.code()])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Append one blob's reference rows and advance its refs-pass state.
    pub fn apply_ref_batch(
        &self,
        outcomes: &[(BlobNum, PassState, Vec<RefRecord>)],
    ) -> Result<(), LxrefError> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut insert = tx.prepare(
                    "INSERT OR REPLACE INTO refs (ident, num, family, lines)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                let mut state =
                    tx.prepare("UPDATE extraction SET refs = ?2 WHERE num = ?1")?;
                for (num, outcome, refs) in outcomes {
                    for r in refs {
                        insert.execute(params![r.ident, r.num, r.family.code(), r.lines])?;
                    }
                    state.execute(params![num, outcome.code()])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Final batch of a tag: write its tree and set the indexed flag as
    /// a single unit, so an interrupted tag is never half-visible.
    pub fn finalize_tag(
        &self,
        tag: &str,
        tree: &[(String, BlobNum)],
    ) -> Result<(), LxrefError> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM trees WHERE tag = ?1", [tag])?;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO trees (tag, seq, path, num) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (seq, (path, num)) in tree.iter().enumerate() {
                    insert.execute(params![tag, seq as i64, path, num])?;
                }
            }
            tx.execute(
                "INSERT INTO tags (name, indexed) VALUES (?1, 1)
                 ON CONFLICT(name) DO UPDATE SET indexed = 1",
                [tag],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn is_tag_indexed(&self, tag: &str) -> Result<bool, LxrefError> {
        let conn = self.conn();
        let indexed: Option<i64> = conn
            .query_row("SELECT indexed FROM tags WHERE name = ?1", [tag], |row| {
                row.get(0)
            })
            .map(Some)
            .or_else(ignore_no_rows)
            .map_err(store_err)?;
        Ok(indexed == Some(1))
    }

    pub fn tags(&self) -> Result<Vec<TagState>, LxrefError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT name, indexed FROM tags ORDER BY name")
            .map_err(store_err)?;
        let tags = stmt
            .query_map([], |row| {
                Ok(TagState {
                    name: row.get(0)?,
                    indexed: row.get::<_, i64>(1)? == 1,
                })
            })
            .map_err(store_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)?;
        Ok(tags)
    }

    /// The ordered `(path, num)` tree of a tag.
    pub fn tag_tree(&self, tag: &str) -> Result<Vec<(String, BlobNum)>, LxrefError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT path, num FROM trees WHERE tag = ?1 ORDER BY seq")
            .map_err(store_err)?;
        let tree = stmt
            .query_map([tag], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as BlobNum))
            })
            .map_err(store_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)?;
        Ok(tree)
    }

    /// Key set of the defs map; the reference pass filters against it.
    pub fn known_idents(&self) -> Result<HashSet<String>, LxrefError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT DISTINCT ident FROM defs")
            .map_err(store_err)?;
        let idents = stmt
            .query_map([], |row| row.get(0))
            .map_err(store_err)?
            .collect::<Result<HashSet<String>, _>>()
            .map_err(store_err)?;
        Ok(idents)
    }

    /// Definition lines per identifier within one blob, for same-line
    /// reference suppression on retry.
    pub fn def_line_sites(
        &self,
        num: BlobNum,
    ) -> Result<HashMap<String, Vec<u32>>, LxrefError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT ident, line FROM defs WHERE num = ?1")
            .map_err(store_err)?;
        let mut sites: HashMap<String, Vec<u32>> = HashMap::new();
        let rows = stmt
            .query_map([num], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32))
            })
            .map_err(store_err)?;
        for row in rows {
            let (ident, line) = row.map_err(store_err)?;
            sites.entry(ident).or_default().push(line);
        }
        Ok(sites)
    }

    pub fn defs_for_ident(&self, ident: &str) -> Result<Vec<DefRecord>, LxrefError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT ident, num, line, kind, family FROM defs
                 WHERE ident = ?1 ORDER BY num, line, kind, family",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([ident], def_row)
            .map_err(store_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)?;
        rows.into_iter().collect()
    }

    pub fn defs_for_blob(&self, num: BlobNum) -> Result<Vec<DefRecord>, LxrefError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT ident, num, line, kind, family FROM defs
                 WHERE num = ?1 ORDER BY line, ident",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([num], def_row)
            .map_err(store_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)?;
        rows.into_iter().collect()
    }

    pub fn refs_for_ident(&self, ident: &str) -> Result<Vec<RefRecord>, LxrefError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT ident, num, family, lines FROM refs
                 WHERE ident = ?1 ORDER BY num, family",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([ident], ref_row)
            .map_err(store_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)?;
        rows.into_iter().collect()
    }

    pub fn refs_for_blob(&self, num: BlobNum) -> Result<Vec<RefRecord>, LxrefError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT ident, num, family, lines FROM refs
                 WHERE num = ?1 ORDER BY ident, family",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([num], ref_row)
            .map_err(store_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)?;
        rows.into_iter().collect()
    }

    /// Identifiers in the defs map starting with `prefix`, ascending.
    pub fn idents_with_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<String>, LxrefError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT ident FROM defs
                 WHERE ident >= ?1 AND ident < ?2 ORDER BY ident LIMIT ?3",
            )
            .map_err(store_err)?;
        let upper = prefix_upper_bound(prefix);
        let idents = stmt
            .query_map(params![prefix, upper, limit as i64], |row| row.get(0))
            .map_err(store_err)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(store_err)?;
        Ok(idents)
    }

    /// Identifiers starting with `prefix` that are defined in at least
    /// one blob of the tag's tree, ascending. The tag filter runs in
    /// SQL so the limit applies to tag-resident matches, not to a
    /// window of the global ordering.
    pub fn idents_with_prefix_in_tag(
        &self,
        tag: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<String>, LxrefError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT d.ident FROM defs d
                 WHERE d.ident >= ?1 AND d.ident < ?2
                   AND EXISTS (SELECT 1 FROM trees t WHERE t.tag = ?3 AND t.num = d.num)
                 ORDER BY d.ident LIMIT ?4",
            )
            .map_err(store_err)?;
        let upper = prefix_upper_bound(prefix);
        let idents = stmt
            .query_map(params![prefix, upper, tag, limit as i64], |row| row.get(0))
            .map_err(store_err)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(store_err)?;
        Ok(idents)
    }

    pub fn stats(&self) -> Result<StoreStats, LxrefError> {
        let conn = self.conn();
        let count = |sql: &str| -> Result<u64, LxrefError> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(store_err)
        };
        Ok(StoreStats {
            blobs: count("SELECT COUNT(*) FROM hashes")?,
            paths: count("SELECT COUNT(*) FROM paths")?,
            tags: count("SELECT COUNT(*) FROM tags")?,
            indexed_tags: count("SELECT COUNT(*) FROM tags WHERE indexed = 1")?,
            defs: count("SELECT COUNT(*) FROM defs")?,
            def_idents: count("SELECT COUNT(DISTINCT ident) FROM defs")?,
            refs: count("SELECT COUNT(*) FROM refs")?,
            partial_blobs: count("SELECT COUNT(*) FROM extraction WHERE defs = 2 OR refs = 2")?,
        })
    }

    /// Sweep the cross-map invariants; the first violation surfaces as
    /// `DatabaseCorrupt`.
    pub fn check_invariants(&self) -> Result<(), LxrefError> {
        let conn = self.conn();
        let count = |sql: &str| -> Result<i64, LxrefError> {
            conn.query_row(sql, [], |row| row.get(0)).map_err(store_err)
        };

        let blobs = count("SELECT COUNT(*) FROM blobs")?;
        let hashes = count("SELECT COUNT(*) FROM hashes")?;
        let joined = count(
            "SELECT COUNT(*) FROM blobs b JOIN hashes h ON b.num = h.num AND b.hash = h.hash",
        )?;
        if blobs != hashes || joined != blobs {
            return Err(LxrefError::DatabaseCorrupt(format!(
                "hash/number maps disagree: {blobs} forward, {hashes} inverse, {joined} aligned"
            )));
        }

        let max_num = count("SELECT COALESCE(MAX(num), 0) FROM hashes")?;
        if max_num != hashes {
            return Err(LxrefError::DatabaseCorrupt(format!(
                "blob numbering not dense: {hashes} blobs, max number {max_num}"
            )));
        }

        for map in ["paths", "trees", "defs", "refs"] {
            let orphans = count(&format!(
                "SELECT COUNT(*) FROM {map} m
                 WHERE NOT EXISTS (SELECT 1 FROM hashes h WHERE h.num = m.num)"
            ))?;
            if orphans != 0 {
                return Err(LxrefError::DatabaseCorrupt(format!(
                    "{orphans} rows in {map} name unknown blob numbers"
                )));
            }
        }

        let unclosed = count(
            "SELECT COUNT(*) FROM refs r
             WHERE NOT EXISTS (SELECT 1 FROM defs d WHERE d.ident = r.ident)",
        )?;
        if unclosed != 0 {
            return Err(LxrefError::DatabaseCorrupt(format!(
                "{unclosed} reference idents have no definition"
            )));
        }

        Ok(())
    }
}

fn def_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<DefRecord, LxrefError>> {
    let kind: String = row.get(3)?;
    let family: String = row.get(4)?;
    Ok((|| {
        Ok(DefRecord {
            ident: row.get::<_, String>(0).map_err(store_err)?,
            num: row.get::<_, i64>(1).map_err(store_err)? as BlobNum,
            line: row.get::<_, i64>(2).map_err(store_err)? as u32,
            kind: kind.parse::<DefKind>()?,
            family: family.parse::<Family>()?,
        })
    })())
}

fn ref_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<RefRecord, LxrefError>> {
    let family: String = row.get(2)?;
    Ok((|| {
        Ok(RefRecord {
            ident: row.get::<_, String>(0).map_err(store_err)?,
            num: row.get::<_, i64>(1).map_err(store_err)? as BlobNum,
            family: family.parse::<Family>()?,
            lines: row.get::<_, String>(3).map_err(store_err)?,
        })
    })())
}

/// Smallest string strictly greater than every string with `prefix`.
fn prefix_upper_bound(prefix: &str) -> String {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(&last) = bytes.last() {
        if last < 0xff {
            *bytes.last_mut().unwrap() += 1;
            return String::from_utf8_lossy(&bytes).into_owned();
        }
        bytes.pop();
    }
    // All-0xff prefix: scan to the end of the keyspace.
    "\u{10FFFF}".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pass;
    use lxref_core::BlobHash;

    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .intern_tree(&[
                ("a.c".to_string(), BlobHash([1; 20])),
                ("Kconfig".to_string(), BlobHash([2; 20])),
            ])
            .unwrap();
        store
    }

    fn def(ident: &str, num: BlobNum, line: u32, kind: DefKind, family: Family) -> DefRecord {
        DefRecord {
            ident: ident.to_string(),
            num,
            line,
            kind,
            family,
        }
    }

    #[test]
    fn def_batch_appends_and_marks_state() {
        let store = seeded_store();
        store
            .apply_def_batch(&[(
                1,
                PassState::Done,
                vec![
                    def("probe", 1, 10, DefKind::Function, Family::C),
                    def("probe", 1, 10, DefKind::Function, Family::C), // duplicate
                ],
            )])
            .unwrap();
        let defs = store.defs_for_ident("probe").unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].line, 10);
        assert!(store.pending(&[1], Pass::Defs).unwrap().is_empty());
        assert_eq!(store.pending(&[2], Pass::Defs).unwrap(), vec![2]);
    }

    #[test]
    fn ref_batch_stores_line_strings() {
        let store = seeded_store();
        store
            .apply_def_batch(&[(
                1,
                PassState::Done,
                vec![def("probe", 1, 10, DefKind::Function, Family::C)],
            )])
            .unwrap();
        store
            .apply_ref_batch(&[(
                2,
                PassState::Done,
                vec![RefRecord {
                    ident: "probe".to_string(),
                    num: 2,
                    family: Family::K,
                    lines: "4,9,12".to_string(),
                }],
            )])
            .unwrap();
        let refs = store.refs_for_ident("probe").unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].lines, "4,9,12");
        assert_eq!(refs[0].family, Family::K);
    }

    #[test]
    fn finalize_makes_tag_visible() {
        let store = seeded_store();
        assert!(!store.is_tag_indexed("v1").unwrap());
        store
            .finalize_tag("v1", &[("Kconfig".to_string(), 2), ("a.c".to_string(), 1)])
            .unwrap();
        assert!(store.is_tag_indexed("v1").unwrap());
        // Tree order preserved as written, not path-sorted.
        let tree = store.tag_tree("v1").unwrap();
        assert_eq!(tree[0].0, "Kconfig");
        assert_eq!(tree[1].0, "a.c");
    }

    #[test]
    fn prefix_scan_is_bounded() {
        let store = seeded_store();
        store
            .apply_def_batch(&[(
                1,
                PassState::Done,
                vec![
                    def("spin_lock", 1, 1, DefKind::Function, Family::C),
                    def("spin_unlock", 1, 2, DefKind::Function, Family::C),
                    def("spa", 1, 3, DefKind::Variable, Family::C),
                ],
            )])
            .unwrap();
        let idents = store.idents_with_prefix("spin_", 10).unwrap();
        assert_eq!(idents, vec!["spin_lock", "spin_unlock"]);
    }

    #[test]
    fn tag_scoped_prefix_scan_ignores_foreign_blobs() {
        let store = seeded_store();
        store
            .apply_def_batch(&[
                (
                    1,
                    PassState::Done,
                    vec![
                        def("spin_lock", 1, 1, DefKind::Function, Family::C),
                        def("spin_unlock", 1, 2, DefKind::Function, Family::C),
                    ],
                ),
                (
                    2,
                    PassState::Done,
                    vec![
                        // Sorts before every blob-1 ident with this prefix.
                        def("spin_init", 2, 1, DefKind::Function, Family::C),
                    ],
                ),
            ])
            .unwrap();
        // The tag's tree holds blob 1 only.
        store.finalize_tag("v1", &[("a.c".to_string(), 1)]).unwrap();

        let idents = store.idents_with_prefix_in_tag("v1", "spin_", 10).unwrap();
        assert_eq!(idents, vec!["spin_lock", "spin_unlock"]);
        // The limit counts tag-resident matches.
        let idents = store.idents_with_prefix_in_tag("v1", "spin_", 1).unwrap();
        assert_eq!(idents, vec!["spin_lock"]);
    }

    #[test]
    fn invariant_sweep_passes_on_consistent_store() {
        let store = seeded_store();
        store
            .apply_def_batch(&[(
                1,
                PassState::Done,
                vec![def("x", 1, 1, DefKind::Variable, Family::C)],
            )])
            .unwrap();
        store.check_invariants().unwrap();
    }

    #[test]
    fn invariant_sweep_catches_unclosed_refs() {
        let store = seeded_store();
        store
            .conn()
            .execute(
                "INSERT INTO refs (ident, num, family, lines) VALUES ('ghost', 1, 'C', '3')",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.check_invariants(),
            Err(LxrefError::DatabaseCorrupt(_))
        ));
    }

    #[test]
    fn stats_count_rows() {
        let store = seeded_store();
        store
            .apply_def_batch(&[(
                1,
                PassState::Done,
                vec![def("x", 1, 1, DefKind::Variable, Family::C)],
            )])
            .unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.blobs, 2);
        assert_eq!(stats.defs, 1);
        assert_eq!(stats.def_idents, 1);
        assert_eq!(stats.partial_blobs, 0);
    }
}
