use thiserror::Error;

/// Errors surfaced by storage backends and the metadata cache.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found in cache: {0}")]
    NotFound(String),

    #[error("Link target not found: {0}")]
    TargetNotFound(String),

    #[error("Link target is itself a link: {0}")]
    NestedLink(String),

    #[error("No parent node cached for {0}")]
    NoParent(String),

    #[error("Not a file: {0}")]
    NotFile(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Cache error: {0}")]
    Cache(#[from] sqlx::Error),

    #[error("Corrupt cache record: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Corrupt cache entry {0}")]
    CorruptEntry(String),

    #[error("Cache commit failed (rolled back): {0}")]
    CommitFailed(#[source] sqlx::Error),

    #[error("Cache commit failed ({commit}) and rollback failed ({rollback})")]
    RollbackFailed {
        commit: sqlx::Error,
        rollback: sqlx::Error,
    },

    #[error("Cache bucket missing: {0}")]
    BucketMissing(String),

    #[error("Storage is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Cache-miss classes a caller may treat as "create" rather than "replace".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound(_) | StorageError::TargetNotFound(_)
        )
    }
}
