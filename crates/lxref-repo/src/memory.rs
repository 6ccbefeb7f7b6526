//! In-memory repository fixture.
//!
//! Deterministic stand-in for a real store, used by the coordinator and
//! query test suites. Blob identities are content-derived so identical
//! file bodies dedupe across tags exactly like real VCS objects.

use crate::{BlobReader, SourceRepo};
use lxref_core::{BlobHash, LxrefError, TagName};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    /// Tags in insertion order (oldest first).
    tags: Vec<(TagName, Vec<(String, BlobHash)>)>,
    blobs: HashMap<BlobHash, Vec<u8>>,
}

/// Shareable in-memory repo; clones see the same underlying store.
#[derive(Clone, Default)]
pub struct MemoryRepo {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash of a file body as this fixture assigns it.
    pub fn content_hash(content: &[u8]) -> BlobHash {
        let digest = Sha256::digest(content);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[..20]);
        BlobHash(out)
    }

    /// Add a tag whose tree holds the given files. Paths are sorted for
    /// a stable tree order; repeated content reuses the same blob id.
    pub fn add_tag(&self, name: &str, files: &[(&str, &str)]) {
        let mut inner = self.inner.write();
        let mut tree: Vec<(String, BlobHash)> = files
            .iter()
            .map(|(path, content)| {
                let hash = Self::content_hash(content.as_bytes());
                inner.blobs.insert(hash, content.as_bytes().to_vec());
                (path.to_string(), hash)
            })
            .collect();
        tree.sort();
        inner.tags.push((name.to_string(), tree));
    }

    /// Drop a blob's content while leaving tree references in place,
    /// simulating a store that lost an object.
    pub fn drop_blob(&self, hash: &BlobHash) {
        self.inner.write().blobs.remove(hash);
    }
}

impl SourceRepo for MemoryRepo {
    fn list_tags(&self) -> Result<Vec<TagName>, LxrefError> {
        let inner = self.inner.read();
        Ok(inner.tags.iter().rev().map(|(name, _)| name.clone()).collect())
    }

    fn tag_tree(&self, tag: &str) -> Result<Vec<(String, BlobHash)>, LxrefError> {
        let inner = self.inner.read();
        inner
            .tags
            .iter()
            .find(|(name, _)| name == tag)
            .map(|(_, tree)| tree.clone())
            .ok_or_else(|| LxrefError::TagNotFound(tag.to_string()))
    }

    fn open_reader(&self) -> Result<Box<dyn BlobReader + Send>, LxrefError> {
        Ok(Box::new(MemoryReader {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryReader {
    inner: Arc<RwLock<Inner>>,
}

impl BlobReader for MemoryReader {
    fn blob_bytes(&mut self, hash: &BlobHash) -> Result<Vec<u8>, LxrefError> {
        self.inner
            .read()
            .blobs
            .get(hash)
            .cloned()
            .ok_or_else(|| LxrefError::BlobMissing(hash.to_string()))
    }
}
