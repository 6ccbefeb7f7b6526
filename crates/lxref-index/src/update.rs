//! Update coordinator: drives each unindexed tag through tree
//! enumeration, the definition pass, the reference pass, and
//! finalisation.
//!
//! Only new blobs are extracted; a tag reusing an earlier tag's blob
//! set costs tree-write work only. Within a tag, every definition
//! commit happens before the reference pass reads the known-identifier
//! set, and the tag's indexed flag lands in the final batch so a crash
//! leaves the tag cleanly retriable.

use crate::extractor::extractor_for;
use crate::pool::run_pass;
use crate::refs::extract_refs;
use lxref_core::{
    BlobHash, BlobNum, DefRecord, Family, LxrefError, ProjectConfig, RefRecord, TagName,
};
use lxref_repo::{BlobReader, SourceRepo};
use lxref_storage::{Pass, PassState, Store, TreeEntry};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tunables for one update run.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Worker pool size.
    pub workers: usize,
    /// Per-blob extraction budget.
    pub timeout: Duration,
    /// Blobs larger than this are marked partial, not extracted.
    pub max_blob_bytes: usize,
    /// Blob outcomes per database batch.
    pub chunk_size: usize,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            workers: 10,
            timeout: Duration::from_secs(30),
            max_blob_bytes: 4 * 1024 * 1024,
            chunk_size: 256,
        }
    }
}

impl UpdateOptions {
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.extraction_timeout_secs),
            max_blob_bytes: config.max_blob_bytes,
            ..Self::default()
        }
    }
}

/// What indexing one tag accomplished.
#[derive(Debug, Clone)]
pub struct TagReport {
    pub tag: TagName,
    /// Files in the tag's tree.
    pub files: usize,
    /// Blobs first observed in this tag.
    pub new_blobs: usize,
    /// Blobs left partial by either pass.
    pub partial: usize,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default)]
pub struct UpdateSummary {
    pub indexed: Vec<TagReport>,
    /// Tags already indexed before this run.
    pub skipped: usize,
    pub failed: Vec<(TagName, String)>,
}

impl UpdateSummary {
    pub fn ok(&self) -> bool {
        self.failed.is_empty()
    }
}

struct DefJob {
    num: BlobNum,
    hash: BlobHash,
    families: Vec<Family>,
}

struct DefOutcome {
    num: BlobNum,
    state: PassState,
    defs: Vec<DefRecord>,
    note: Option<String>,
}

struct RefJob {
    num: BlobNum,
    hash: BlobHash,
    families: Vec<Family>,
    def_sites: Arc<HashMap<String, Vec<u32>>>,
}

struct RefOutcome {
    num: BlobNum,
    state: PassState,
    refs: Vec<RefRecord>,
    note: Option<String>,
}

/// Drives the index forward over every tag not yet marked indexed.
pub struct Updater<'a> {
    repo: &'a dyn SourceRepo,
    store: &'a Store,
    config: &'a ProjectConfig,
    opts: UpdateOptions,
}

impl<'a> Updater<'a> {
    pub fn new(
        repo: &'a dyn SourceRepo,
        store: &'a Store,
        config: &'a ProjectConfig,
        opts: UpdateOptions,
    ) -> Self {
        Self {
            repo,
            store,
            config,
            opts,
        }
    }

    pub fn run(&self, cancel: &AtomicBool) -> Result<UpdateSummary, LxrefError> {
        self.run_with(cancel, |_| {})
    }

    /// Run the update, invoking `on_tag` after each tag commits.
    pub fn run_with(
        &self,
        cancel: &AtomicBool,
        mut on_tag: impl FnMut(&TagReport),
    ) -> Result<UpdateSummary, LxrefError> {
        let mut summary = UpdateSummary::default();
        let mut tags = self.repo.list_tags()?;
        tags.retain(|tag| self.config.tag_matches(tag));

        // The listing is newest-first; index oldest first so earlier
        // releases' definitions are visible to later reference passes.
        for tag in tags.iter().rev() {
            if self.store.is_tag_indexed(tag)? {
                summary.skipped += 1;
                continue;
            }
            if cancel.load(Ordering::Relaxed) {
                summary.failed.push((tag.clone(), "cancelled before start".to_string()));
                break;
            }
            tracing::info!("indexing {tag}");
            match self.index_tag(tag, cancel) {
                Ok(report) => {
                    tracing::info!(
                        "{}: {} files, {} new blobs, {} partial",
                        report.tag,
                        report.files,
                        report.new_blobs,
                        report.partial,
                    );
                    on_tag(&report);
                    summary.indexed.push(report);
                }
                Err(
                    e @ (LxrefError::RepoUnavailable(_)
                    | LxrefError::DatabaseCorrupt(_)
                    | LxrefError::DatabaseBusy(_)),
                ) => return Err(e),
                Err(LxrefError::TagAborted(name)) => {
                    tracing::warn!("{name}: aborted, left unindexed");
                    summary.failed.push((name, "aborted".to_string()));
                    break;
                }
                Err(e) => {
                    tracing::error!("{tag}: failed, left unindexed: {e}");
                    summary.failed.push((tag.clone(), e.to_string()));
                }
            }
        }
        Ok(summary)
    }

    fn index_tag(&self, tag: &str, cancel: &AtomicBool) -> Result<TagReport, LxrefError> {
        // Tree enumeration: intern every (path, hash) pair.
        let tree = self.repo.tag_tree(tag)?;
        let interned = self.store.intern_tree(&tree)?;
        let new_blobs = interned.iter().filter(|entry| entry.is_new).count();
        let mem_tree: Vec<(String, BlobNum)> = interned
            .iter()
            .map(|entry| (entry.path.clone(), entry.num))
            .collect();
        let families = self.blob_families(&interned)?;
        let mut nums: Vec<BlobNum> = interned.iter().map(|entry| entry.num).collect();
        nums.sort_unstable();
        nums.dedup();

        let mut partial: BTreeSet<BlobNum> = BTreeSet::new();

        self.check_cancelled(tag, cancel)?;
        let def_sites = self.definition_pass(tag, &nums, &families, &mut partial, cancel)?;

        self.check_cancelled(tag, cancel)?;
        self.reference_pass(tag, &nums, &families, def_sites, &mut partial, cancel)?;

        self.check_cancelled(tag, cancel)?;
        self.store.finalize_tag(tag, &mem_tree)?;

        Ok(TagReport {
            tag: tag.to_string(),
            files: mem_tree.len(),
            new_blobs,
            partial: partial.len(),
        })
    }

    /// Family set of each blob, derived from every path it has ever
    /// appeared under (committed by the tree enumeration just before).
    fn blob_families(
        &self,
        interned: &[TreeEntry],
    ) -> Result<HashMap<BlobNum, Vec<Family>>, LxrefError> {
        let mut families = HashMap::new();
        for entry in interned {
            if families.contains_key(&entry.num) {
                continue;
            }
            let mut set = BTreeSet::new();
            for path in self.store.paths_for(entry.num)? {
                if let Some(family) = self.config.classify(&path) {
                    set.insert(family);
                }
            }
            families.insert(entry.num, set.into_iter().collect::<Vec<Family>>());
        }
        Ok(families)
    }

    fn definition_pass(
        &self,
        tag: &str,
        nums: &[BlobNum],
        families: &HashMap<BlobNum, Vec<Family>>,
        partial: &mut BTreeSet<BlobNum>,
        cancel: &AtomicBool,
    ) -> Result<HashMap<BlobNum, Arc<HashMap<String, Vec<u32>>>>, LxrefError> {
        let pending = self.store.pending(nums, Pass::Defs)?;
        let (active, inert): (Vec<BlobNum>, Vec<BlobNum>) = pending
            .into_iter()
            .partition(|num| !families[num].is_empty());

        // Blobs outside every family have nothing to extract.
        if !inert.is_empty() {
            let marks: Vec<(BlobNum, PassState, Vec<DefRecord>)> = inert
                .into_iter()
                .map(|num| (num, PassState::Done, Vec::new()))
                .collect();
            self.store.apply_def_batch(&marks)?;
        }

        let jobs = active
            .iter()
            .map(|&num| {
                Ok(DefJob {
                    num,
                    hash: self.store.resolve(num)?,
                    families: families[&num].clone(),
                })
            })
            .collect::<Result<Vec<_>, LxrefError>>()?;
        tracing::debug!("{tag}: definition pass over {} blobs", jobs.len());

        let timeout = self.opts.timeout;
        let cap = self.opts.max_blob_bytes;
        let mut def_sites = HashMap::new();
        let mut chunk: Vec<(BlobNum, PassState, Vec<DefRecord>)> = Vec::new();

        run_pass(
            self.repo,
            jobs,
            self.opts.workers,
            cancel,
            move |reader, job| def_worker(reader, job, timeout, cap),
            |outcome: DefOutcome| {
                if outcome.state == PassState::Partial {
                    partial.insert(outcome.num);
                    tracing::warn!(
                        "blob {} partial in definition pass: {}",
                        outcome.num,
                        outcome.note.as_deref().unwrap_or("unknown"),
                    );
                } else {
                    let mut sites: HashMap<String, Vec<u32>> = HashMap::new();
                    for def in &outcome.defs {
                        sites.entry(def.ident.clone()).or_default().push(def.line);
                    }
                    def_sites.insert(outcome.num, Arc::new(sites));
                }
                chunk.push((outcome.num, outcome.state, outcome.defs));
                if chunk.len() >= self.opts.chunk_size {
                    self.store.apply_def_batch(&chunk)?;
                    chunk.clear();
                }
                Ok(())
            },
        )?;
        if !chunk.is_empty() {
            self.store.apply_def_batch(&chunk)?;
        }
        Ok(def_sites)
    }

    fn reference_pass(
        &self,
        tag: &str,
        nums: &[BlobNum],
        families: &HashMap<BlobNum, Vec<Family>>,
        def_sites: HashMap<BlobNum, Arc<HashMap<String, Vec<u32>>>>,
        partial: &mut BTreeSet<BlobNum>,
        cancel: &AtomicBool,
    ) -> Result<(), LxrefError> {
        // The known set is the defs key set at this moment: every
        // definition of this tag and of all earlier tags is visible.
        let known = self.store.known_idents()?;

        let pending = self.store.pending(nums, Pass::Refs)?;
        let (active, inert): (Vec<BlobNum>, Vec<BlobNum>) = pending
            .into_iter()
            .partition(|num| !families[num].is_empty());

        if !inert.is_empty() {
            let marks: Vec<(BlobNum, PassState, Vec<RefRecord>)> = inert
                .into_iter()
                .map(|num| (num, PassState::Done, Vec::new()))
                .collect();
            self.store.apply_ref_batch(&marks)?;
        }

        let jobs = active
            .iter()
            .map(|&num| {
                let sites = match def_sites.get(&num) {
                    Some(sites) => Arc::clone(sites),
                    // Defs for this blob committed in an earlier run.
                    None => Arc::new(self.store.def_line_sites(num)?),
                };
                Ok(RefJob {
                    num,
                    hash: self.store.resolve(num)?,
                    families: families[&num].clone(),
                    def_sites: sites,
                })
            })
            .collect::<Result<Vec<_>, LxrefError>>()?;
        tracing::debug!("{tag}: reference pass over {} blobs", jobs.len());

        let timeout = self.opts.timeout;
        let cap = self.opts.max_blob_bytes;
        let known_ref = &known;
        let mut chunk: Vec<(BlobNum, PassState, Vec<RefRecord>)> = Vec::new();

        run_pass(
            self.repo,
            jobs,
            self.opts.workers,
            cancel,
            move |reader, job| ref_worker(reader, job, known_ref, timeout, cap),
            |outcome: RefOutcome| {
                if outcome.state == PassState::Partial {
                    partial.insert(outcome.num);
                    tracing::warn!(
                        "blob {} partial in reference pass: {}",
                        outcome.num,
                        outcome.note.as_deref().unwrap_or("unknown"),
                    );
                }
                chunk.push((outcome.num, outcome.state, outcome.refs));
                if chunk.len() >= self.opts.chunk_size {
                    self.store.apply_ref_batch(&chunk)?;
                    chunk.clear();
                }
                Ok(())
            },
        )?;
        if !chunk.is_empty() {
            self.store.apply_ref_batch(&chunk)?;
        }
        Ok(())
    }

    fn check_cancelled(&self, tag: &str, cancel: &AtomicBool) -> Result<(), LxrefError> {
        if cancel.load(Ordering::Relaxed) {
            Err(LxrefError::TagAborted(tag.to_string()))
        } else {
            Ok(())
        }
    }
}

fn def_worker(
    reader: &mut dyn BlobReader,
    job: DefJob,
    timeout: Duration,
    cap: usize,
) -> DefOutcome {
    let started = Instant::now();
    let partial = |note: String| DefOutcome {
        num: job.num,
        state: PassState::Partial,
        defs: Vec::new(),
        note: Some(note),
    };

    let bytes = match reader.blob_bytes(&job.hash) {
        Ok(bytes) => bytes,
        Err(e) => return partial(e.to_string()),
    };
    if bytes.len() > cap {
        return partial(format!("{} bytes exceeds blob size cap", bytes.len()));
    }

    let mut defs = Vec::new();
    for family in &job.families {
        match extractor_for(*family).extract(&bytes) {
            Ok(raw) => defs.extend(raw.into_iter().map(|def| DefRecord {
                ident: def.ident,
                num: job.num,
                line: def.line,
                kind: def.kind,
                family: *family,
            })),
            Err(e) => return partial(e.to_string()),
        }
        if started.elapsed() > timeout {
            return partial("extraction budget exceeded".to_string());
        }
    }

    defs.sort_by(|a, b| {
        (&a.ident, a.line, a.kind, a.family).cmp(&(&b.ident, b.line, b.kind, b.family))
    });
    defs.dedup();
    DefOutcome {
        num: job.num,
        state: PassState::Done,
        defs,
        note: None,
    }
}

fn ref_worker(
    reader: &mut dyn BlobReader,
    job: RefJob,
    known: &HashSet<String>,
    timeout: Duration,
    cap: usize,
) -> RefOutcome {
    let started = Instant::now();
    let partial = |note: String| RefOutcome {
        num: job.num,
        state: PassState::Partial,
        refs: Vec::new(),
        note: Some(note),
    };

    let bytes = match reader.blob_bytes(&job.hash) {
        Ok(bytes) => bytes,
        Err(e) => return partial(e.to_string()),
    };
    if bytes.len() > cap {
        return partial(format!("{} bytes exceeds blob size cap", bytes.len()));
    }

    let mut refs = Vec::new();
    for family in &job.families {
        refs.extend(
            extract_refs(&bytes, *family, known, &job.def_sites)
                .into_iter()
                .map(|(ident, lines)| RefRecord {
                    ident,
                    num: job.num,
                    family: *family,
                    lines,
                }),
        );
        if started.elapsed() > timeout {
            return partial("extraction budget exceeded".to_string());
        }
    }

    refs.sort_by(|a, b| (&a.ident, a.family).cmp(&(&b.ident, b.family)));
    RefOutcome {
        num: job.num,
        state: PassState::Done,
        refs,
        note: None,
    }
}
