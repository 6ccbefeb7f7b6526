//! lxref-query: the read-only surface the browsing and REST layers
//! consume.
//!
//! Results are always computed against fully-committed tags; a tag
//! whose index is still in progress is invisible here.

use lxref_core::{decode_lines, BlobNum, DefKind, Family, LxrefError};
use lxref_repo::SourceRepo;
use lxref_storage::Store;
use serde::Serialize;
use std::collections::HashMap;

/// One definition site of an identifier, resolved to a path within a tag.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DefSite {
    pub path: String,
    pub line: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub family: String,
}

/// One referencing blob, with its comma-joined line list verbatim.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RefSite {
    pub path: String,
    pub line: String,
    pub family: String,
}

/// Everything known about one identifier within one tag.
#[derive(Debug, Clone, Serialize, Default)]
pub struct IdentDoc {
    pub definitions: Vec<DefSite>,
    pub references: Vec<RefSite>,
}

/// A line-level annotation overlaying a browsed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub line: u32,
    pub ident: String,
    /// `Some` for definition sites, `None` for references.
    pub kind: Option<DefKind>,
}

/// A file of a tag with its annotation spans.
#[derive(Debug, Clone)]
pub struct FileView {
    pub num: BlobNum,
    pub bytes: Vec<u8>,
    pub annotations: Vec<Annotation>,
}

/// Read-only queries over the cross-reference database.
pub struct QueryEngine<'a> {
    store: &'a Store,
    repo: &'a dyn SourceRepo,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a Store, repo: &'a dyn SourceRepo) -> Self {
        Self { store, repo }
    }

    fn require_indexed(&self, tag: &str) -> Result<(), LxrefError> {
        if self.store.is_tag_indexed(tag)? {
            Ok(())
        } else {
            Err(LxrefError::TagNotIndexed(tag.to_string()))
        }
    }

    /// A file's content plus its definition and reference annotations.
    pub fn file(&self, tag: &str, path: &str) -> Result<FileView, LxrefError> {
        self.require_indexed(tag)?;
        let num = self
            .store
            .tag_tree(tag)?
            .into_iter()
            .find(|(tree_path, _)| tree_path == path)
            .map(|(_, num)| num)
            .ok_or_else(|| LxrefError::PathNotFound(format!("{tag}:{path}")))?;

        let hash = self.store.resolve(num)?;
        let bytes = self.repo.open_reader()?.blob_bytes(&hash)?;

        let mut annotations = Vec::new();
        for def in self.store.defs_for_blob(num)? {
            annotations.push(Annotation {
                line: def.line,
                ident: def.ident,
                kind: Some(def.kind),
            });
        }
        for reference in self.store.refs_for_blob(num)? {
            for line in decode_lines(&reference.lines) {
                annotations.push(Annotation {
                    line,
                    ident: reference.ident.clone(),
                    kind: None,
                });
            }
        }
        annotations.sort_by(|a, b| (a.line, &a.ident).cmp(&(b.line, &b.ident)));

        Ok(FileView {
            num,
            bytes,
            annotations,
        })
    }

    /// Definitions and references of an identifier within a tag, for
    /// one family. Reference line lists come back in storage form.
    pub fn ident(&self, tag: &str, ident: &str, family: Family) -> Result<IdentDoc, LxrefError> {
        self.require_indexed(tag)?;
        let paths = self.tree_paths(tag)?;

        let mut doc = IdentDoc::default();
        for def in self.store.defs_for_ident(ident)? {
            if def.family != family {
                continue;
            }
            let Some(blob_paths) = paths.get(&def.num) else { continue };
            for path in blob_paths {
                doc.definitions.push(DefSite {
                    path: path.clone(),
                    line: def.line,
                    kind: def.kind.to_string(),
                    family: def.family.code().to_string(),
                });
            }
        }
        for reference in self.store.refs_for_ident(ident)? {
            if reference.family != family {
                continue;
            }
            let Some(blob_paths) = paths.get(&reference.num) else { continue };
            for path in blob_paths {
                doc.references.push(RefSite {
                    path: path.clone(),
                    line: reference.lines.clone(),
                    family: reference.family.code().to_string(),
                });
            }
        }
        Ok(doc)
    }

    /// Identifiers defined somewhere in this tag, by prefix. The tag
    /// filter is part of the scan, so the limit never starves on
    /// matches defined only in other releases.
    pub fn search(
        &self,
        tag: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<String>, LxrefError> {
        self.require_indexed(tag)?;
        self.store.idents_with_prefix_in_tag(tag, prefix, limit)
    }

    /// The tag's tree inverted into blob number -> paths.
    fn tree_paths(&self, tag: &str) -> Result<HashMap<BlobNum, Vec<String>>, LxrefError> {
        let mut paths: HashMap<BlobNum, Vec<String>> = HashMap::new();
        for (path, num) in self.store.tag_tree(tag)? {
            paths.entry(num).or_default().push(path);
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxref_core::ProjectConfig;
    use lxref_index::{UpdateOptions, Updater};
    use lxref_repo::MemoryRepo;
    use std::sync::atomic::AtomicBool;

    const MAIN_C: &str = "int counter;\n\
                          int bump(void)\n\
                          {\n\
                          \treturn counter++;\n\
                          }\n";

    fn indexed_fixture() -> (MemoryRepo, Store) {
        let repo = MemoryRepo::new();
        repo.add_tag(
            "v1",
            &[
                ("Kconfig", "config FOO\n\tbool \"foo\"\n"),
                ("main.c", MAIN_C),
            ],
        );
        let store = Store::open_in_memory().unwrap();
        let config = ProjectConfig::default();
        let updater = Updater::new(&repo, &store, &config, UpdateOptions::default());
        let summary = updater.run(&AtomicBool::new(false)).unwrap();
        assert!(summary.ok());
        (repo, store)
    }

    #[test]
    fn file_view_carries_bytes_and_annotations() {
        let (repo, store) = indexed_fixture();
        let engine = QueryEngine::new(&store, &repo);
        let view = engine.file("v1", "main.c").unwrap();
        assert_eq!(view.bytes, MAIN_C.as_bytes());

        let def_lines: Vec<u32> = view
            .annotations
            .iter()
            .filter(|a| a.kind.is_some())
            .map(|a| a.line)
            .collect();
        assert_eq!(def_lines, vec![1, 2]);
        // counter referenced on line 4.
        assert!(view
            .annotations
            .iter()
            .any(|a| a.kind.is_none() && a.ident == "counter" && a.line == 4));
    }

    #[test]
    fn ident_filters_by_family() {
        let (repo, store) = indexed_fixture();
        let engine = QueryEngine::new(&store, &repo);

        let doc = engine.ident("v1", "FOO", Family::K).unwrap();
        assert_eq!(doc.definitions.len(), 1);
        assert_eq!(doc.definitions[0].path, "Kconfig");
        assert_eq!(doc.definitions[0].kind, "config");

        let doc = engine.ident("v1", "FOO", Family::C).unwrap();
        assert!(doc.definitions.is_empty());
    }

    #[test]
    fn ident_references_keep_storage_line_form() {
        let (repo, store) = indexed_fixture();
        let engine = QueryEngine::new(&store, &repo);
        let doc = engine.ident("v1", "counter", Family::C).unwrap();
        assert_eq!(doc.references.len(), 1);
        assert_eq!(doc.references[0].path, "main.c");
        assert_eq!(doc.references[0].line, "4");
    }

    #[test]
    fn json_shape_matches_the_rest_contract() {
        let (repo, store) = indexed_fixture();
        let engine = QueryEngine::new(&store, &repo);
        let doc = engine.ident("v1", "counter", Family::C).unwrap();
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["definitions"][0]["type"].is_string());
        assert!(json["references"][0]["line"].is_string());
    }

    #[test]
    fn search_is_scoped_to_the_tag() {
        let (repo, store) = indexed_fixture();
        let engine = QueryEngine::new(&store, &repo);
        assert_eq!(engine.search("v1", "bu", 10).unwrap(), vec!["bump"]);
        assert!(engine.search("v1", "zz", 10).unwrap().is_empty());
    }

    #[test]
    fn search_survives_lexicographically_earlier_foreign_matches() {
        const V1_C: &str = "int probe_late;\n\
                            int probe_now(void)\n\
                            {\n\
                            \treturn probe_late;\n\
                            }\n";
        const V2_C: &str = "int probe_alpha;\n\
                            int probe_beta;\n\
                            int probe_gamma;\n\
                            int probe_delta;\n";
        let repo = MemoryRepo::new();
        repo.add_tag("v1", &[("a.c", V1_C)]);
        repo.add_tag("v2", &[("a.c", V1_C), ("b.c", V2_C)]);
        let store = Store::open_in_memory().unwrap();
        let config = ProjectConfig::default();
        let updater = Updater::new(&repo, &store, &config, UpdateOptions::default());
        assert!(updater.run(&AtomicBool::new(false)).unwrap().ok());

        let engine = QueryEngine::new(&store, &repo);
        // v2's probe_* idents sort before v1's, but must not displace
        // or hide v1's own matches.
        assert_eq!(
            engine.search("v1", "probe_", 10).unwrap(),
            vec!["probe_late", "probe_now"]
        );
        assert_eq!(engine.search("v1", "probe_", 1).unwrap(), vec!["probe_late"]);
        assert_eq!(engine.search("v2", "probe_", 10).unwrap().len(), 6);
    }

    #[test]
    fn unindexed_tag_is_invisible() {
        let (repo, store) = indexed_fixture();
        let engine = QueryEngine::new(&store, &repo);
        assert!(matches!(
            engine.file("v2", "main.c"),
            Err(LxrefError::TagNotIndexed(_))
        ));
    }

    #[test]
    fn missing_path_is_reported() {
        let (repo, store) = indexed_fixture();
        let engine = QueryEngine::new(&store, &repo);
        assert!(matches!(
            engine.file("v1", "nope.c"),
            Err(LxrefError::PathNotFound(_))
        ));
    }
}
