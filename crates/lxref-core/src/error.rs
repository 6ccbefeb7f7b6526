/// Unified error type for lxref.
#[derive(Debug, thiserror::Error)]
pub enum LxrefError {
    /// The external object store cannot be reached at all. Fatal.
    #[error("Repository unavailable: {0}")]
    RepoUnavailable(String),

    /// A hash named by a tag tree has no retrievable content.
    #[error("Blob {0} missing from object store")]
    BlobMissing(String),

    /// The tags tool or lexer failed on one blob.
    #[error("Extractor failed: {0}")]
    ExtractorFailed(String),

    /// Write contention outlived the retry budget.
    #[error("Database busy after {0} retries")]
    DatabaseBusy(u32),

    /// A cross-map invariant is broken. Fatal, no recovery attempted.
    #[error("Database corrupt: {0}")]
    DatabaseCorrupt(String),

    /// The update run was cancelled mid-tag.
    #[error("Tag {0} aborted")]
    TagAborted(String),

    #[error("Tag not found: {0}")]
    TagNotFound(String),

    #[error("Tag not indexed: {0}")]
    TagNotIndexed(String),

    #[error("Path not found in tag: {0}")]
    PathNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid family: {0}")]
    InvalidFamily(String),

    #[error("Invalid definition kind: {0}")]
    InvalidDefKind(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
