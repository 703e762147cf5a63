//! Sequential reader over the blocks of a part.
//!
//! The reader checks that the timestamps and columns header of every block
//! start exactly where the previous block ended. A mismatch means the part is corrupted and the reader
//! panics with a `FATAL:` message naming the part.

use crate::block_data::BlockData;
use crate::block_header::BlockHeader;
use crate::part::Part;
use std::sync::Arc;

#[derive(Debug, Default)]
struct StreamOffsets {
    timestamps: u64,
    columns_header: u64,
    columns_header_index: u64,
}

/// Yields the blocks of a part in `(stream_id, min_timestamp)` order.
#[derive(Debug)]
pub struct BlockStreamReader {
    part: Arc<Part>,
    block_headers: Vec<BlockHeader>,
    next_index_block: usize,
    next_block: usize,
    offsets: StreamOffsets,
    block_data: BlockData,
    blocks_read: u64,
    rows_read: u64,
}

impl BlockStreamReader {
    pub fn new(part: Arc<Part>) -> Self {
        Self {
            part,
            block_headers: Vec::new(),
            next_index_block: 0,
            next_block: 0,
            offsets: StreamOffsets::default(),
            block_data: BlockData::default(),
            blocks_read: 0,
            rows_read: 0,
        }
    }

    pub fn part_name(&self) -> &str {
        self.part.name()
    }

    /// The block loaded by the last successful [`next_block`](Self::next_block) call.
    pub fn block_data(&self) -> &BlockData {
        &self.block_data
    }

    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Loads the next block. Returns false once the part is exhausted.
    pub fn next_block(&mut self) -> bool {
        while self.next_block >= self.block_headers.len() {
            let Some(ibh) = self.part.index_block_headers().get(self.next_index_block).copied() else {
                self.check_totals();
                return false;
            };
            self.next_index_block += 1;
            self.next_block = 0;
            self.block_headers = match self.part.read_block_headers(&ibh) {
                Ok(bhs) => bhs,
                Err(err) => panic!(
                    "FATAL: cannot read index block #{} of part {}: {err}",
                    self.next_index_block - 1,
                    self.part.name()
                ),
            };
        }

        let bh = self.block_headers[self.next_block];
        self.next_block += 1;
        self.check_offsets(&bh);
        self.block_data = match self.part.read_block_data(&bh) {
            Ok(bd) => bd,
            Err(err) => panic!(
                "FATAL: cannot read block #{} for sid={} of part {}: {err}",
                self.blocks_read,
                bh.stream_id,
                self.part.name()
            ),
        };
        self.blocks_read += 1;
        self.rows_read += bh.rows_count;
        true
    }

    fn check_offset(&self, what: &str, got: u64, want: u64) {
        if got != want {
            panic!(
                "FATAL: unexpected {what} offset for block #{} of part {}: got {got}; want {want}",
                self.blocks_read,
                self.part.name()
            );
        }
    }

    fn check_offsets(&mut self, bh: &BlockHeader) {
        let th = &bh.timestamps_header;
        self.check_offset("timestamps", th.block_offset, self.offsets.timestamps);
        self.check_offset("columns header", bh.columns_header_offset, self.offsets.columns_header);
        self.offsets.timestamps += th.block_size;
        self.offsets.columns_header += bh.columns_header_size;
        if self.part.format_version() >= 1 {
            self.check_offset(
                "columns header index",
                bh.columns_header_index_offset,
                self.offsets.columns_header_index,
            );
            self.offsets.columns_header_index += bh.columns_header_index_size;
        }
    }

    fn check_totals(&self) {
        let ph = self.part.header();
        if self.blocks_read != ph.blocks_count || self.rows_read != ph.rows_count {
            panic!(
                "FATAL: part {} declares {} blocks with {} rows; read {} blocks with {} rows",
                self.part.name(),
                ph.blocks_count,
                ph.rows_count,
                self.blocks_read,
                self.rows_read
            );
        }
    }
}
