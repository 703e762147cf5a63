//! Error Types for the logstore core codecs
//!
//! Every `unmarshal`-style function in this crate returns [`Result`]. The
//! error carries enough context to tell which field of which structure was
//! malformed, since on-disk corruption must be diagnosable from the log alone.
//!
//! ## Error Categories
//!
//! ### Decode Errors
//! - `UnexpectedEof`: the input ended before a fixed-width or length-prefixed field
//! - `Decode`: a field was present but malformed (bad varint, bad utf-8, bad tag)
//!
//! ### Value Errors
//! - `InvalidValue`: a textual value (timestamp, duration, number) cannot be parsed
//!
//! ### Wrapped Errors
//! - `Io`: file system operations (delete task persistence, CLI input files)
//! - `Json`: JSON encoding of persisted structures

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot unmarshal {what}: need {need} bytes; got {have} bytes")]
    UnexpectedEof {
        what: &'static str,
        need: usize,
        have: usize,
    },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
