//! Storage Error Types
//!
//! ## Error Categories
//!
//! ### Format Errors
//! - `BlockHeader`: a block header or timestamps header cannot be decoded
//! - `ColumnsHeader`: a columns header, column header or columns header index is malformed
//! - `Ordering`: persisted block headers are not sorted by `(stream_id, min_timestamp)`
//! - `TooManyColumns`: a block references more columns than a block may hold
//! - `Compression`: an lz4 block cannot be decompressed or exceeds its size limit
//!
//! ### Persistence Errors
//! - `DeleteTask`: the delete tasks file is unreadable or refers to an unknown task
//! - `Io` / `Json`: file system and JSON failures
//!
//! Format errors found while reading a part are never skipped: the caller
//! either returns them or panics with a `FATAL:` message naming the part.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Core(#[from] logstore_core::Error),

    #[error("cannot unmarshal block header: {0}")]
    BlockHeader(String),

    #[error("cannot unmarshal columns header: {0}")]
    ColumnsHeader(String),

    #[error("{0}")]
    Ordering(String),

    #[error("too many columns: {count}; mustn't exceed {max}; columns: {columns:?}")]
    TooManyColumns {
        count: usize,
        max: usize,
        columns: Vec<String>,
    },

    #[error("compression error: {0}")]
    Compression(String),

    #[error("delete task error: {0}")]
    DeleteTask(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
