//! Logstore Core
//!
//! Shared building blocks for the logstore workspace: the error type, the
//! byte codec used by every persisted structure, log fields, stream
//! identities and the textual value helpers used by both the storage and the
//! query layers.
//!
//! ## Modules
//!
//! - [`encoding`]: varints, fixed-width big-endian integers, length-prefixed bytes
//! - [`field`]: `name=value` pairs and the reserved field names (`_msg`, `_time`, ...)
//! - [`stream`]: [`TenantId`], [`StreamId`] and canonical [`StreamTags`]
//! - [`data_block`]: [`DataBlock`], the columnar transfer format for query results
//! - [`values`]: strict parsing and formatting of numbers, IPv4, timestamps and durations

pub mod data_block;
pub mod encoding;
pub mod error;
pub mod field;
pub mod stream;
pub mod values;

pub use data_block::{BlockColumn, DataBlock};
pub use error::{Error, Result};
pub use field::{
    get_canonical_column_name, is_msg_field_name, Field, MSG_FIELD_NAME, STREAM_FIELD_NAME,
    STREAM_ID_FIELD_NAME, TIME_FIELD_NAME,
};
pub use stream::{StreamId, StreamTag, StreamTags, TenantId};
