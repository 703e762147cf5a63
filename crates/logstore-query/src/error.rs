//! Query Error Types
//!
//! ## Error Categories
//!
//! ### User Errors
//! - `Parse`: the LogsQL text cannot be parsed. The context holds the tail of
//!   the consumed query text so the user can see where parsing stopped.
//! - `InvalidQuery`: the query parses but cannot be used for the requested
//!   operation (for example a stats introspection over a query without stats)
//!
//! ### Execution Errors
//! - `Storage`: a part cannot be read
//! - `ResourceLimit`: a stats, sort, top or uniq pipe needs more memory than allowed
//!
//! Early termination (a `limit` pipe that has enough rows, a cancelled query)
//! is not an error: the query returns `Ok` with the rows produced so far.

use logstore_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

/// Maximum number of trailing query characters shown in parse errors.
pub const MAX_ERROR_CONTEXT_LEN: usize = 50;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{message}; context: [{context}]")]
    Parse { message: String, context: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),
}

impl QueryError {
    pub fn parse(message: impl Into<String>, context: impl Into<String>) -> Self {
        QueryError::Parse {
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, QueryError::Parse { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = QueryError::parse("missing ')'", "foo and (bar");
        assert_eq!(err.to_string(), "missing ')'; context: [foo and (bar]");
        assert!(err.is_parse());
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: QueryError = StorageError::Ordering("bad".to_string()).into();
        assert!(matches!(err, QueryError::Storage(_)));
        assert!(!err.is_parse());
    }
}
