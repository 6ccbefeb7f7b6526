//! lxref-repo: read-only adapter over the external version-control store.
//!
//! The adapter is stateless with respect to the cross-reference database;
//! it reads tags, resolves tag trees to `(path, hash)` listings, and
//! streams blob contents. Everything above this crate sees opaque
//! 20-byte hashes and never touches the VCS directly.

mod git;
mod memory;

pub use git::GitRepo;
pub use memory::MemoryRepo;

use lxref_core::{BlobHash, LxrefError, TagName};
use std::cmp::Ordering;

/// Read surface of the external repository.
///
/// Shared across the coordinator and many workers, so implementations
/// must tolerate concurrent calls. Blob content is read through
/// per-worker [`BlobReader`] handles instead of `&self` because the
/// underlying git handle is `Send` but not `Sync`.
pub trait SourceRepo: Send + Sync {
    /// All release tags, newest first by the project's ordering policy.
    fn list_tags(&self) -> Result<Vec<TagName>, LxrefError>;

    /// The tag considered current.
    fn latest(&self) -> Result<TagName, LxrefError> {
        self.list_tags()?
            .into_iter()
            .next()
            .ok_or_else(|| LxrefError::TagNotFound("repository has no tags".to_string()))
    }

    /// Every regular file of the tag's tree, in stable order.
    /// Symlinks and submodule entries are filtered here.
    fn tag_tree(&self, tag: &str) -> Result<Vec<(String, BlobHash)>, LxrefError>;

    /// Open a blob-content handle owned by one worker.
    fn open_reader(&self) -> Result<Box<dyn BlobReader + Send>, LxrefError>;
}

/// Per-worker blob content access.
pub trait BlobReader {
    /// Raw bytes of a blob; `BlobMissing` if the store no longer has it.
    fn blob_bytes(&mut self, hash: &BlobHash) -> Result<Vec<u8>, LxrefError>;
}

/// Version-aware tag comparison: digit runs compare numerically, other
/// runs lexicographically, so `v2.10` sorts after `v2.9`.
pub fn version_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.as_bytes();
    let mut right = b.as_bytes();

    while !left.is_empty() && !right.is_empty() {
        if left[0].is_ascii_digit() && right[0].is_ascii_digit() {
            let (l_num, l_rest) = take_number(left);
            let (r_num, r_rest) = take_number(right);
            match l_num.cmp(&r_num) {
                Ordering::Equal => {
                    left = l_rest;
                    right = r_rest;
                }
                other => return other,
            }
        } else {
            match left[0].cmp(&right[0]) {
                Ordering::Equal => {
                    left = &left[1..];
                    right = &right[1..];
                }
                other => return other,
            }
        }
    }
    left.len().cmp(&right.len())
}

fn take_number(bytes: &[u8]) -> (u64, &[u8]) {
    let end = bytes
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(bytes.len());
    let value = std::str::from_utf8(&bytes[..end])
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(u64::MAX);
    (value, &bytes[end..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_runs_compare_numerically() {
        assert_eq!(version_cmp("v2.9", "v2.10"), Ordering::Less);
        assert_eq!(version_cmp("v2.10", "v2.10"), Ordering::Equal);
        assert_eq!(version_cmp("v10.0", "v9.9"), Ordering::Greater);
    }

    #[test]
    fn mixed_runs_fall_back_to_bytes() {
        assert_eq!(version_cmp("v4.19-rc1", "v4.19"), Ordering::Greater);
        assert_eq!(version_cmp("u1", "v1"), Ordering::Less);
    }
}
