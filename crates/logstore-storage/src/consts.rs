//! Size limits and format constants shared by the block format, the
//! ingestion path and the merger.

/// Maximum number of rows in a single block.
pub const MAX_ROWS_PER_BLOCK: u64 = 8 * 1024 * 1024;

/// Maximum number of distinct columns (regular plus const) in a single block.
pub const MAX_COLUMNS_PER_BLOCK: usize = 2000;

/// Blocks are flushed once their uncompressed size reaches this limit.
pub const MAX_UNCOMPRESSED_BLOCK_SIZE: u64 = 2 * 1024 * 1024;

pub const MAX_VALUES_BLOCK_SIZE: u64 = 8 * 1024 * 1024;
pub const MAX_BLOOM_FILTER_BLOCK_SIZE: u64 = 8 * 1024 * 1024;
pub const MAX_COLUMNS_HEADER_SIZE: u64 = 8 * 1024 * 1024;
pub const MAX_COLUMNS_HEADER_INDEX_SIZE: u64 = 8 * 1024 * 1024;
pub const MAX_TIMESTAMPS_BLOCK_SIZE: u64 = 8 * 1024 * 1024;
pub const MAX_INDEX_BLOCK_SIZE: u64 = 8 * 1024 * 1024;

/// Maximum number of distinct values in a dict-encoded column.
pub const MAX_DICT_LEN: usize = 8;

/// Maximum total size of the values in a dict-encoded column.
pub const MAX_DICT_SIZE_BYTES: usize = 256;

/// Values longer than this are never stored as const columns.
pub const MAX_CONST_COLUMN_VALUE_SIZE: usize = 256;

/// Maximum length of a field name accepted at ingestion.
pub const MAX_FIELD_NAME_SIZE: usize = 128;

/// Maximum number of block headers packed into a single index block.
pub const MAX_BLOCK_HEADERS_PER_INDEX_BLOCK: usize = 64;

/// Part format version written by this crate.
pub const PART_FORMAT_LATEST_VERSION: u32 = 1;
