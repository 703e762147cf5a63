//! Logstore Storage Layer
//!
//! This crate implements the on-disk block format of logstore and the
//! machinery that builds, reads and merges parts.
//!
//! ## What is a Part?
//!
//! A part is an immutable set of blocks. Each block holds log entries of a
//! single stream, sorted by timestamp and stored column by column:
//!
//! 1. **Timestamps**: delta-encoded, wrapped in an optionally compressed bytes block
//! 2. **Columns**: values encoded with the narrowest fitting type (dict, uintN, float64, ipv4, iso8601)
//! 3. **Const columns**: fields with the same value in every row, stored once in the header
//! 4. **Bloom filters**: token bloom filters per column for fast phrase lookups
//! 5. **Index**: block headers grouped into index blocks, summarized by the metaindex
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────┐
//! │  LogRows    │  ingestion batch, sorted by (stream_id, timestamp)
//! └──────┬──────┘
//!        │ rows
//!        ▼
//! ┌───────────────────┐
//! │ BlockStreamWriter │  Block::from_rows -> BlockData -> part streams
//! └────────┬──────────┘
//!          │ InMemoryPart
//!          ▼
//! ┌───────────────────┐
//! │ Part              │  checksum, metaindex and column names validated on open
//! └────────┬──────────┘
//!          │ blocks in (stream_id, min_timestamp) order
//!          ▼
//! ┌───────────────────┐
//! │ BlockStreamReader │ ──► merge_block_streams ──► BlockStreamWriter
//! └───────────────────┘
//! ```
//!
//! ## Format Versions
//!
//! | Version | Column names |
//! |---------|--------------|
//! | 0 | embedded in every column header and const column |
//! | 1 | part-level dictionary plus a columns header index per block |
//!
//! Both versions are readable. New parts use [`PART_FORMAT_LATEST_VERSION`].
//!
//! ## Error Policy
//!
//! Decoding functions return [`StorageError`] and never consume input on
//! failure. Ordering violations while writing are programming errors and
//! panic with a `BUG:` prefix. Corruption found while merging panics with a
//! `FATAL:` prefix naming the parts involved.

pub mod block;
pub mod block_data;
pub mod block_header;
pub mod block_stream_merger;
pub mod block_stream_reader;
pub mod block_stream_writer;
pub mod bloom;
pub mod column_names;
pub mod config;
pub mod consts;
pub mod delete_task;
pub mod error;
pub mod log_rows;
pub mod part;
pub mod rows;
pub mod strings_block;
pub mod timestamps;
pub mod values_encoder;

pub use block::{Block, Column};
pub use block_data::{BlockData, ColumnData};
pub use block_header::{
    BlockHeader, ColumnHeader, ColumnHeaderRef, ColumnsHeader, ColumnsHeaderIndex, TimestampsHeader,
};
pub use block_stream_merger::{merge_block_streams, MergeStats, RowDropFilter};
pub use block_stream_reader::BlockStreamReader;
pub use block_stream_writer::BlockStreamWriter;
pub use bloom::{tokenize, TokenBloomFilter};
pub use column_names::ColumnNameIdGenerator;
pub use config::StorageConfig;
pub use consts::PART_FORMAT_LATEST_VERSION;
pub use delete_task::{DeleteTask, DeleteTasks};
pub use error::{Result, StorageError};
pub use log_rows::{LogRow, LogRows, StreamInfo};
pub use part::{InMemoryPart, IndexBlockHeader, Part, PartHeader};
pub use rows::Rows;
pub use timestamps::TimestampsData;
pub use values_encoder::{EncodedColumn, EncodedValues, ValueType, ValuesDict, ValuesEncoder};
