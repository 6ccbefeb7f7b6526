//! git2-backed implementation of the repo adapter.

use crate::{version_cmp, BlobReader, SourceRepo};
use git2::{ObjectType, Oid, Repository, TreeWalkMode, TreeWalkResult};
use lxref_core::{BlobHash, LxrefError, TagName};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

const MODE_SYMLINK: i32 = 0o120000;

/// Adapter over a local git repository (bare or checked out).
///
/// Tag and tree listings go through one shared handle behind a lock;
/// blob reads open a fresh handle per worker via [`SourceRepo::open_reader`].
pub struct GitRepo {
    git_dir: PathBuf,
    repo: Mutex<Repository>,
    tag_prefix: Option<String>,
}

impl GitRepo {
    /// Open the repository at `path`.
    pub fn open(path: &Path) -> Result<Self, LxrefError> {
        let repo = Repository::open(path).map_err(|e| {
            LxrefError::RepoUnavailable(format!("{}: {}", path.display(), e.message()))
        })?;
        Ok(Self {
            git_dir: path.to_path_buf(),
            repo: Mutex::new(repo),
            tag_prefix: None,
        })
    }

    /// Restrict tag listings to names starting with `prefix`.
    pub fn with_tag_prefix(mut self, prefix: Option<String>) -> Self {
        self.tag_prefix = prefix;
        self
    }

    fn tag_commit_tree<'r>(
        repo: &'r Repository,
        tag: &str,
    ) -> Result<git2::Tree<'r>, LxrefError> {
        let object = repo
            .revparse_single(&format!("refs/tags/{tag}"))
            .map_err(|_| LxrefError::TagNotFound(tag.to_string()))?;
        let commit = object
            .peel_to_commit()
            .map_err(|e| LxrefError::TagNotFound(format!("{tag}: {}", e.message())))?;
        commit
            .tree()
            .map_err(|e| LxrefError::Storage(format!("tree of {tag}: {}", e.message())))
    }
}

impl SourceRepo for GitRepo {
    fn list_tags(&self) -> Result<Vec<TagName>, LxrefError> {
        let repo = self.repo.lock();
        let names = repo
            .tag_names(None)
            .map_err(|e| LxrefError::RepoUnavailable(e.message().to_string()))?;
        let mut tags: Vec<TagName> = names
            .iter()
            .flatten()
            .filter(|name| {
                self.tag_prefix
                    .as_deref()
                    .map_or(true, |prefix| name.starts_with(prefix))
            })
            .map(str::to_string)
            .collect();
        // Newest first.
        tags.sort_by(|a, b| version_cmp(b, a));
        Ok(tags)
    }

    fn tag_tree(&self, tag: &str) -> Result<Vec<(String, BlobHash)>, LxrefError> {
        let repo = self.repo.lock();
        let tree = Self::tag_commit_tree(&repo, tag)?;

        let mut entries = Vec::new();
        let mut walk_err = None;
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() != Some(ObjectType::Blob) || entry.filemode() == MODE_SYMLINK {
                return TreeWalkResult::Ok;
            }
            let Some(name) = entry.name() else {
                tracing::warn!("skipping non-utf8 path under {root:?}");
                return TreeWalkResult::Ok;
            };
            match BlobHash::from_slice(entry.id().as_bytes()) {
                Ok(hash) => entries.push((format!("{root}{name}"), hash)),
                Err(e) => {
                    walk_err = Some(e);
                    return TreeWalkResult::Abort;
                }
            }
            TreeWalkResult::Ok
        })
        .map_err(|e| LxrefError::Storage(format!("walking {tag}: {}", e.message())))?;

        match walk_err {
            Some(e) => Err(e),
            None => Ok(entries),
        }
    }

    fn open_reader(&self) -> Result<Box<dyn BlobReader + Send>, LxrefError> {
        let repo = Repository::open(&self.git_dir).map_err(|e| {
            LxrefError::RepoUnavailable(format!("{}: {}", self.git_dir.display(), e.message()))
        })?;
        Ok(Box::new(GitBlobReader { repo }))
    }
}

struct GitBlobReader {
    repo: Repository,
}

impl BlobReader for GitBlobReader {
    fn blob_bytes(&mut self, hash: &BlobHash) -> Result<Vec<u8>, LxrefError> {
        let oid = Oid::from_bytes(hash.as_bytes())
            .map_err(|e| LxrefError::Storage(format!("bad oid {hash}: {}", e.message())))?;
        let blob = self
            .repo
            .find_blob(oid)
            .map_err(|_| LxrefError::BlobMissing(hash.to_string()))?;
        Ok(blob.content().to_vec())
    }
}
