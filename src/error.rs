use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error(
        "invalid chunk parameters: chunk size {chunk_size}, overlap {overlap} \
         (need chunk size > 0 and overlap < chunk size)"
    )]
    InvalidChunkParameters { chunk_size: usize, overlap: usize },

    #[error("index error: {0}")]
    Index(String),

    #[error("index database error: {0}")]
    IndexDatabase(#[from] redb::DatabaseError),

    #[error("index error: {0}")]
    Redb(#[from] redb::Error),

    #[error("index storage error: {0}")]
    IndexStorage(#[from] redb::StorageError),

    #[error("index transaction error: {0}")]
    IndexTransaction(#[from] redb::TransactionError),

    #[error("index table error: {0}")]
    IndexTable(#[from] redb::TableError),

    #[error("index commit error: {0}")]
    IndexCommit(#[from] redb::CommitError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{failed} of {total} document(s) failed to index")]
    BatchFailed { failed: usize, total: usize },

    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Error {
    /// True for failures of the vector store itself.
    ///
    /// Index writes are delete-then-insert, so these are safe to retry.
    pub fn is_index(&self) -> bool {
        matches!(
            self,
            Error::Index(_)
                | Error::IndexDatabase(_)
                | Error::Redb(_)
                | Error::IndexStorage(_)
                | Error::IndexTransaction(_)
                | Error::IndexTable(_)
                | Error::IndexCommit(_)
        )
    }
}
