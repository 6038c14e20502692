use thiserror::Error;

/// Failures an administrative caller is expected to act on.
///
/// Read-side problems (missing or corrupt artifacts, unknown query terms,
/// unreadable pages) are logged and degraded instead of showing up here.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("cannot cluster: {available} documents with content, {requested} clusters requested")]
    InsufficientCorpus { requested: usize, available: usize },

    #[error("cannot cluster: the index holds no documents")]
    EmptyCorpus,

    #[error("number of clusters must be at least 1")]
    InvalidClusterCount,

    #[error("unknown document: {0}")]
    UnknownDocument(String),

    #[error("an index rebuild is already in progress")]
    RebuildInProgress,

    #[error("page store error: {0}")]
    PageStore(String),

    #[error("failed to write index artifacts: {0:#}")]
    Persist(#[from] anyhow::Error),
}

pub type IndexResult<T> = std::result::Result<T, IndexError>;
