//! Block Stream Writer - Building Parts
//!
//! [`BlockStreamWriter`] appends blocks to the byte streams of an
//! [`InMemoryPart`] and builds its index on the fly.
//!
//! ## Ordering
//!
//! Blocks must arrive sorted by `stream_id`, and blocks of the same stream
//! sorted by `min_timestamp`. Violations are programming errors and panic.
//!
//! ## Index
//!
//! Block headers are buffered until [`MAX_BLOCK_HEADERS_PER_INDEX_BLOCK`] of
//! them are collected, then written as one compressed index block. Each index
//! block gets an [`IndexBlockHeader`] in the metaindex holding the first
//! stream id and the time range of its blocks.

use crate::block::Block;
use crate::block_data::BlockData;
use crate::block_header::{BlockHeader, ColumnHeader, ColumnsHeader, ColumnsHeaderIndex, TimestampsHeader};
use crate::column_names::{marshal_column_names, ColumnNameIdGenerator};
use crate::consts::{
    MAX_BLOCK_HEADERS_PER_INDEX_BLOCK, MAX_BLOOM_FILTER_BLOCK_SIZE, MAX_COLUMNS_HEADER_INDEX_SIZE,
    MAX_COLUMNS_HEADER_SIZE, MAX_VALUES_BLOCK_SIZE, PART_FORMAT_LATEST_VERSION,
};
use crate::part::{InMemoryPart, IndexBlockHeader};
use crate::strings_block::marshal_bytes_block;
use logstore_core::{Field, StreamId};

/// Writes sorted blocks into a new part.
#[derive(Debug)]
pub struct BlockStreamWriter {
    format_version: u32,
    part: InMemoryPart,
    column_name_ids: ColumnNameIdGenerator,
    columns_header_index: ColumnsHeaderIndex,

    // Pending index block.
    index_block_data: Vec<u8>,
    index_block_blocks: u64,
    index_block_first_sid: StreamId,
    index_block_min_timestamp: i64,
    index_block_max_timestamp: i64,
    metaindex_data: Vec<u8>,

    last_sid: Option<StreamId>,
    last_min_timestamp: i64,

    rows_count: u64,
    blocks_count: u64,
    uncompressed_size_bytes: u64,
    min_timestamp: i64,
    max_timestamp: i64,
}

impl Default for BlockStreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStreamWriter {
    pub fn new() -> Self {
        Self::with_format_version(PART_FORMAT_LATEST_VERSION)
    }

    pub fn with_format_version(format_version: u32) -> Self {
        if format_version > PART_FORMAT_LATEST_VERSION {
            panic!("BUG: unsupported part format version {format_version}; max version is {PART_FORMAT_LATEST_VERSION}");
        }
        Self {
            format_version,
            part: InMemoryPart::default(),
            column_name_ids: ColumnNameIdGenerator::new(),
            columns_header_index: ColumnsHeaderIndex::default(),
            index_block_data: Vec::new(),
            index_block_blocks: 0,
            index_block_first_sid: StreamId::default(),
            index_block_min_timestamp: 0,
            index_block_max_timestamp: 0,
            metaindex_data: Vec::new(),
            last_sid: None,
            last_min_timestamp: 0,
            rows_count: 0,
            blocks_count: 0,
            uncompressed_size_bytes: 0,
            min_timestamp: 0,
            max_timestamp: 0,
        }
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn rows_count(&self) -> u64 {
        self.rows_count
    }

    pub fn blocks_count(&self) -> u64 {
        self.blocks_count
    }

    /// Writes rows sorted by timestamp as a single block. Empty input is ignored.
    pub fn write_rows(&mut self, stream_id: StreamId, timestamps: &[i64], rows: &[Vec<Field>]) {
        if timestamps.is_empty() {
            return;
        }
        let b = Block::from_rows(timestamps, rows);
        self.write_block(stream_id, &b);
    }

    pub fn write_block(&mut self, stream_id: StreamId, b: &Block) {
        if b.is_empty() {
            return;
        }
        let bd = b.to_block_data(stream_id);
        self.write_block_data(&bd);
    }

    /// Writes an already packed block. Blocks without rows are ignored.
    pub fn write_block_data(&mut self, bd: &BlockData) {
        if bd.rows_count == 0 {
            return;
        }
        let sid = bd.stream_id;
        let min_ts = bd.min_timestamp();
        let max_ts = bd.max_timestamp();

        let is_seen_sid = match self.last_sid {
            Some(last) if sid < last => {
                panic!("BUG: the sid={sid} cannot be smaller than the previously written sid={last}");
            }
            Some(last) => last == sid,
            None => false,
        };
        if is_seen_sid && min_ts < self.last_min_timestamp {
            panic!(
                "BUG: the block for sid={sid} cannot contain timestamp smaller than {}, but it contains timestamp {min_ts}",
                self.last_min_timestamp
            );
        }
        self.last_sid = Some(sid);
        self.last_min_timestamp = min_ts;

        let bh = self.write_block_streams(bd);

        if self.rows_count == 0 || min_ts < self.min_timestamp {
            self.min_timestamp = min_ts;
        }
        if self.rows_count == 0 || max_ts > self.max_timestamp {
            self.max_timestamp = max_ts;
        }
        if self.index_block_blocks == 0 {
            self.index_block_first_sid = sid;
            self.index_block_min_timestamp = min_ts;
            self.index_block_max_timestamp = max_ts;
        } else {
            self.index_block_min_timestamp = self.index_block_min_timestamp.min(min_ts);
            self.index_block_max_timestamp = self.index_block_max_timestamp.max(max_ts);
        }

        self.rows_count += bd.rows_count;
        self.blocks_count += 1;
        self.uncompressed_size_bytes += bd.uncompressed_size_bytes;

        bh.marshal(&mut self.index_block_data, self.format_version);
        self.index_block_blocks += 1;
        if self.index_block_blocks as usize >= MAX_BLOCK_HEADERS_PER_INDEX_BLOCK {
            self.flush_index_block();
        }
    }

    fn write_block_streams(&mut self, bd: &BlockData) -> BlockHeader {
        let part = &mut self.part;

        let td = &bd.timestamps_data;
        let timestamps_header = TimestampsHeader {
            block_offset: part.timestamps.len() as u64,
            block_size: td.data.len() as u64,
            min_timestamp: td.min_timestamp,
            max_timestamp: td.max_timestamp,
            marshal_type: td.marshal_type as u8,
        };
        part.timestamps.extend_from_slice(&td.data);

        let mut csh = ColumnsHeader::default();
        for cd in &bd.columns_data {
            if cd.values_data.len() as u64 > MAX_VALUES_BLOCK_SIZE {
                panic!(
                    "BUG: too big values block for column {:?}: {} bytes; mustn't exceed {MAX_VALUES_BLOCK_SIZE} bytes",
                    cd.name,
                    cd.values_data.len()
                );
            }
            if cd.bloom_filter_data.len() as u64 > MAX_BLOOM_FILTER_BLOCK_SIZE {
                panic!(
                    "BUG: too big bloom filter for column {:?}: {} bytes; mustn't exceed {MAX_BLOOM_FILTER_BLOCK_SIZE} bytes",
                    cd.name,
                    cd.bloom_filter_data.len()
                );
            }
            let (values, blooms) = if cd.name.is_empty() {
                (&mut part.message_values, &mut part.message_blooms)
            } else {
                (&mut part.field_values, &mut part.field_blooms)
            };
            csh.column_headers.push(ColumnHeader {
                name: cd.name.clone(),
                value_type: cd.value_type,
                min_value: cd.min_value,
                max_value: cd.max_value,
                values_dict: cd.values_dict.clone(),
                values_offset: values.len() as u64,
                values_size: cd.values_data.len() as u64,
                bloom_filter_offset: blooms.len() as u64,
                bloom_filter_size: cd.bloom_filter_data.len() as u64,
            });
            values.extend_from_slice(&cd.values_data);
            blooms.extend_from_slice(&cd.bloom_filter_data);
        }
        csh.const_columns = bd.const_columns.clone();

        let mut csh_data = Vec::new();
        csh.marshal(
            &mut csh_data,
            self.format_version,
            &mut self.columns_header_index,
            &mut self.column_name_ids,
        );
        if csh_data.len() as u64 > MAX_COLUMNS_HEADER_SIZE {
            panic!(
                "BUG: too big columns header: {} bytes; mustn't exceed {MAX_COLUMNS_HEADER_SIZE} bytes",
                csh_data.len()
            );
        }
        let columns_header_offset = part.columns_header.len() as u64;
        part.columns_header.extend_from_slice(&csh_data);

        let mut columns_header_index_offset = 0;
        let mut columns_header_index_size = 0;
        if self.format_version >= 1 {
            let mut index_data = Vec::new();
            self.columns_header_index.marshal(&mut index_data);
            if index_data.len() as u64 > MAX_COLUMNS_HEADER_INDEX_SIZE {
                panic!(
                    "BUG: too big columns header index: {} bytes; mustn't exceed {MAX_COLUMNS_HEADER_INDEX_SIZE} bytes",
                    index_data.len()
                );
            }
            columns_header_index_offset = part.columns_header_index.len() as u64;
            columns_header_index_size = index_data.len() as u64;
            part.columns_header_index.extend_from_slice(&index_data);
        }

        BlockHeader {
            stream_id: bd.stream_id,
            uncompressed_size_bytes: bd.uncompressed_size_bytes,
            rows_count: bd.rows_count,
            timestamps_header,
            columns_header_index_offset,
            columns_header_index_size,
            columns_header_offset,
            columns_header_size: csh_data.len() as u64,
        }
    }

    fn flush_index_block(&mut self) {
        if self.index_block_blocks == 0 {
            return;
        }
        let index_block_offset = self.part.index.len() as u64;
        marshal_bytes_block(&mut self.part.index, &self.index_block_data);
        let ibh = IndexBlockHeader {
            stream_id: self.index_block_first_sid,
            min_timestamp: self.index_block_min_timestamp,
            max_timestamp: self.index_block_max_timestamp,
            index_block_offset,
            index_block_size: self.part.index.len() as u64 - index_block_offset,
            blocks_count: self.index_block_blocks,
        };
        ibh.marshal(&mut self.metaindex_data);
        self.index_block_data.clear();
        self.index_block_blocks = 0;
    }

    /// Flushes pending index data and returns the finished part.
    pub fn finalize(mut self) -> InMemoryPart {
        self.flush_index_block();

        if !self.metaindex_data.is_empty() {
            marshal_bytes_block(&mut self.part.metaindex, &self.metaindex_data);
        }
        if self.format_version >= 1 && !self.column_name_ids.is_empty() {
            marshal_column_names(&mut self.part.column_names, self.column_name_ids.names());
        }

        let mut part = self.part;
        part.header.format_version = self.format_version;
        part.header.rows_count = self.rows_count;
        part.header.blocks_count = self.blocks_count;
        part.header.uncompressed_size_bytes = self.uncompressed_size_bytes;
        part.header.compressed_size_bytes = part.size_bytes();
        part.header.min_timestamp = self.min_timestamp;
        part.header.max_timestamp = self.max_timestamp;
        part.header.checksum = part.compute_checksum();
        part
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::part::Part;

    fn rows_for(timestamps: &[i64]) -> Vec<Vec<Field>> {
        timestamps
            .iter()
            .map(|ts| vec![Field::new("", format!("msg {ts}"))])
            .collect()
    }

    #[test]
    fn test_empty_part() {
        let part = BlockStreamWriter::new().finalize();
        assert_eq!(part.header.rows_count, 0);
        assert_eq!(part.header.blocks_count, 0);
        let part = Part::open("empty", part).unwrap();
        assert!(part.all_block_headers().unwrap().is_empty());
    }

    #[test]
    fn test_many_index_blocks() {
        let mut bsw = BlockStreamWriter::new();
        let blocks = MAX_BLOCK_HEADERS_PER_INDEX_BLOCK * 2 + 5;
        for i in 0..blocks {
            let ts = [i as i64 * 10, i as i64 * 10 + 1];
            bsw.write_rows(StreamId(i as u128 / 3), &ts, &rows_for(&ts));
        }
        let part = Part::open("many", bsw.finalize()).unwrap();
        assert_eq!(part.index_block_headers().len(), 3);
        assert_eq!(part.index_block_headers()[0].blocks_count, MAX_BLOCK_HEADERS_PER_INDEX_BLOCK as u64);
        assert_eq!(part.index_block_headers()[2].blocks_count, 5);
        assert_eq!(part.header().rows_count, blocks as u64 * 2);
        assert_eq!(part.header().min_timestamp, 0);
        assert_eq!(part.header().max_timestamp, (blocks as i64 - 1) * 10 + 1);
        assert_eq!(part.all_block_headers().unwrap().len(), blocks);
    }

    #[test]
    #[should_panic(expected = "cannot be smaller than the previously written sid")]
    fn test_stream_order_violation() {
        let mut bsw = BlockStreamWriter::new();
        bsw.write_rows(StreamId(2), &[1], &rows_for(&[1]));
        bsw.write_rows(StreamId(1), &[2], &rows_for(&[2]));
    }

    #[test]
    #[should_panic(expected = "cannot contain timestamp smaller than 5")]
    fn test_timestamp_order_violation() {
        let mut bsw = BlockStreamWriter::new();
        bsw.write_rows(StreamId(1), &[5, 6], &rows_for(&[5, 6]));
        bsw.write_rows(StreamId(1), &[4], &rows_for(&[4]));
    }

    #[test]
    fn test_same_min_timestamp_allowed() {
        let mut bsw = BlockStreamWriter::new();
        bsw.write_rows(StreamId(1), &[5], &rows_for(&[5]));
        bsw.write_rows(StreamId(1), &[5], &rows_for(&[5]));
        assert_eq!(bsw.blocks_count(), 2);
    }
}
