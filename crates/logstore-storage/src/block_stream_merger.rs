//! Block Stream Merger - Combining Parts
//!
//! Merges the blocks of several parts into a single [`BlockStreamWriter`],
//! keeping the output sorted by `(stream_id, min_timestamp)` and packing small
//! blocks of the same stream into blocks close to
//! [`MAX_UNCOMPRESSED_BLOCK_SIZE`].
//!
//! ## Algorithm
//!
//! Readers sit in a min-heap keyed by the `(stream_id, min_timestamp)` of
//! their current block. The merger pops the smallest block and decides:
//!
//! 1. **New stream**: flush whatever is pending, then take the block.
//! 2. **Nothing pending, block is full**: copy the block as is.
//! 3. **Pending plus block too big**: flush, then take the block.
//! 4. **Otherwise**: decode both and merge their rows by timestamp.
//!
//! Taking a block means copying it straight to the output when it is full and
//! keeping it packed as the pending block otherwise. Packed blocks are only
//! decoded when rows from two blocks must be interleaved or when a
//! [`RowDropFilter`] matches them.
//!
//! ## Row Deletion
//!
//! A [`RowDropFilter`] removes rows while merging. Blocks whose stream and
//! time range do not match it are never decoded. When the filter matches whole
//! streams only, matching blocks are dropped without decoding.
//!
//! ## Cancellation
//!
//! The merge checks the stop flag before every block. A stopped merge still
//! flushes the rows it has buffered, so the writer holds a valid part with a
//! subset of the input rows.

use crate::block_data::BlockData;
use crate::block_stream_reader::BlockStreamReader;
use crate::block_stream_writer::BlockStreamWriter;
use crate::consts::MAX_UNCOMPRESSED_BLOCK_SIZE;
use crate::rows::{uncompressed_row_size_bytes, Rows};
use logstore_core::StreamId;
use logstore_observability::metrics::{MERGED_BLOCKS_TOTAL, MERGED_ROWS_TOTAL, MERGES_TOTAL, ROWS_DELETED_TOTAL};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Instant;
use tracing::{debug, info};

/// Selects rows to remove while merging.
pub trait RowDropFilter: Send + Sync {
    /// Returns true if rows of the stream may be dropped.
    fn match_stream_id(&self, stream_id: StreamId) -> bool;

    /// Returns true if rows in `[min_timestamp, max_timestamp]` may be dropped.
    fn match_time_range(&self, min_timestamp: i64, max_timestamp: i64) -> bool;

    /// Returns true if every row of a matching stream and time range must be dropped.
    fn drops_whole_block(&self) -> bool;

    /// Removes the matching rows and returns how many were removed.
    fn drop_rows(&self, stream_id: StreamId, rows: &mut Rows) -> usize;
}

/// Outcome of [`merge_block_streams`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub blocks_read: u64,
    pub rows_read: u64,
    pub rows_dropped: u64,
    pub stopped: bool,
}

struct HeapEntry(BlockStreamReader);

impl HeapEntry {
    fn key(&self) -> (StreamId, i64) {
        let bd = self.0.block_data();
        (bd.stream_id, bd.min_timestamp())
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Reversed so that BinaryHeap pops the smallest block first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

struct BlockStreamMerger<'a> {
    bsw: &'a mut BlockStreamWriter,
    drop_filter: Option<&'a dyn RowDropFilter>,
    readers_paths: String,

    stream_id: StreamId,
    // At most one of `bd` and `rows` holds data.
    bd: BlockData,
    rows: Rows,
    uncompressed_rows_size_bytes: u64,
    rows_dropped: u64,
}

impl<'a> BlockStreamMerger<'a> {
    fn must_write_block(&mut self, bd: &BlockData) {
        self.check_next_block(bd);
        let pending_size = self.uncompressed_rows_size_bytes + self.pending_bd_size();
        if bd.stream_id != self.stream_id {
            self.must_flush_rows();
            self.stream_id = bd.stream_id;
            self.must_write_block_data(bd);
        } else if pending_size == 0 && self.bd.rows_count == 0 && bd.uncompressed_size_bytes >= MAX_UNCOMPRESSED_BLOCK_SIZE {
            self.must_write_block_data(bd);
        } else if pending_size + bd.uncompressed_size_bytes >= 2 * MAX_UNCOMPRESSED_BLOCK_SIZE {
            self.must_flush_rows();
            self.must_write_block_data(bd);
        } else {
            self.must_merge_rows(bd);
        }
    }

    fn pending_bd_size(&self) -> u64 {
        if self.bd.rows_count == 0 {
            0
        } else {
            self.bd.uncompressed_size_bytes
        }
    }

    fn check_next_block(&self, bd: &BlockData) {
        if !self.rows.is_empty() && self.bd.rows_count > 0 {
            panic!(
                "BUG: the pending block must be empty when pending rows exist; got {} log entries in the pending block",
                self.bd.rows_count
            );
        }
        if bd.stream_id < self.stream_id {
            panic!(
                "FATAL: cannot merge {}: the streamID={} for the next block is smaller than the streamID={} for the current block",
                self.readers_paths, bd.stream_id, self.stream_id
            );
        }
        if bd.stream_id != self.stream_id || bd.rows_count == 0 {
            return;
        }
        let next_min_timestamp = bd.min_timestamp();
        if let Some(&min_timestamp) = self.rows.timestamps.first() {
            if next_min_timestamp < min_timestamp {
                panic!(
                    "FATAL: cannot merge {}: the next block's minTimestamp={next_min_timestamp} is smaller than the minTimestamp={min_timestamp} for log entries for the current block",
                    self.readers_paths
                );
            }
        } else if self.bd.rows_count > 0 {
            let min_timestamp = self.bd.min_timestamp();
            if next_min_timestamp < min_timestamp {
                panic!(
                    "FATAL: cannot merge {}: the next block's minTimestamp={next_min_timestamp} is smaller than the minTimestamp={min_timestamp} for the current block",
                    self.readers_paths
                );
            }
        }
    }

    fn need_drop_rows(&self, bd: &BlockData) -> Option<&'a dyn RowDropFilter> {
        self.drop_filter.filter(|f| {
            f.match_stream_id(bd.stream_id) && f.match_time_range(bd.min_timestamp(), bd.max_timestamp())
        })
    }

    fn must_write_block_data(&mut self, bd: &BlockData) {
        if !self.rows.is_empty() {
            panic!("BUG: pending rows must be flushed before taking a new block; got {} rows", self.rows.len());
        }
        if let Some(f) = self.need_drop_rows(bd) {
            if f.drops_whole_block() {
                self.rows_dropped += bd.rows_count;
                return;
            }
            self.must_merge_rows(bd);
            return;
        }
        if bd.uncompressed_size_bytes >= MAX_UNCOMPRESSED_BLOCK_SIZE {
            self.bsw.write_block_data(bd);
            return;
        }
        self.bd = bd.clone();
    }

    fn must_merge_rows(&mut self, bd: &BlockData) {
        if self.bd.rows_count > 0 {
            let pending = std::mem::take(&mut self.bd);
            let rows = self.must_unmarshal_rows(&pending);
            self.rows = Rows::merge(std::mem::take(&mut self.rows), rows);
        }
        let rows = self.must_unmarshal_rows(bd);
        self.rows = Rows::merge(std::mem::take(&mut self.rows), rows);

        if self.uncompressed_rows_size_bytes >= MAX_UNCOMPRESSED_BLOCK_SIZE {
            self.must_flush_rows();
        }
    }

    fn must_unmarshal_rows(&mut self, bd: &BlockData) -> Rows {
        let mut rows = Rows::new();
        if let Err(err) = bd.unmarshal_rows(&mut rows) {
            panic!(
                "FATAL: cannot merge {}: cannot unmarshal log entries from block data: {err}",
                self.readers_paths
            );
        }
        if let Some(f) = self.need_drop_rows(bd) {
            self.rows_dropped += f.drop_rows(bd.stream_id, &mut rows) as u64;
        }
        self.uncompressed_rows_size_bytes += rows.uncompressed_size_bytes();
        rows
    }

    fn must_flush_rows(&mut self) {
        if self.rows.is_empty() {
            self.bsw.write_block_data(&self.bd);
        } else if self.rows.has_non_empty_rows() {
            let timestamps = &self.rows.timestamps;
            let rows = &self.rows.rows;
            let mut start = 0;
            let mut size = 0;
            for (i, fields) in rows.iter().enumerate() {
                size += uncompressed_row_size_bytes(fields);
                if size >= MAX_UNCOMPRESSED_BLOCK_SIZE {
                    self.bsw.write_rows(self.stream_id, &timestamps[start..=i], &rows[start..=i]);
                    start = i + 1;
                    size = 0;
                }
            }
            self.bsw.write_rows(self.stream_id, &timestamps[start..], &rows[start..]);
        }
        self.bd = BlockData::default();
        self.rows.reset();
        self.uncompressed_rows_size_bytes = 0;
    }
}

/// Merges the blocks of `readers` into `bsw`.
///
/// Stops early when `stop` is set; [`MergeStats::stopped`] reports it. The
/// output is valid in both cases.
pub fn merge_block_streams(
    bsw: &mut BlockStreamWriter,
    readers: Vec<BlockStreamReader>,
    drop_filter: Option<&dyn RowDropFilter>,
    stop: &AtomicBool,
) -> MergeStats {
    let start = Instant::now();
    let readers_paths = format!(
        "[{}]",
        readers.iter().map(|r| r.part_name()).collect::<Vec<_>>().join(",")
    );

    let mut heap = BinaryHeap::with_capacity(readers.len());
    let mut finished = Vec::new();
    for mut bsr in readers {
        if bsr.next_block() {
            heap.push(HeapEntry(bsr));
        } else {
            finished.push(bsr);
        }
    }

    let mut bsm = BlockStreamMerger {
        bsw,
        drop_filter,
        readers_paths,
        stream_id: StreamId::default(),
        bd: BlockData::default(),
        rows: Rows::new(),
        uncompressed_rows_size_bytes: 0,
        rows_dropped: 0,
    };

    let mut stats = MergeStats::default();
    while let Some(HeapEntry(mut bsr)) = heap.pop() {
        if stop.load(AtomicOrdering::Relaxed) {
            stats.stopped = true;
            debug!(readers = %bsm.readers_paths, "merge stopped");
            finished.push(bsr);
            finished.extend(heap.drain().map(|HeapEntry(bsr)| bsr));
            break;
        }
        bsm.must_write_block(bsr.block_data());
        if bsr.next_block() {
            heap.push(HeapEntry(bsr));
        } else {
            finished.push(bsr);
        }
    }
    bsm.must_flush_rows();

    stats.rows_dropped = bsm.rows_dropped;
    for bsr in &finished {
        stats.blocks_read += bsr.blocks_read();
        stats.rows_read += bsr.rows_read();
    }

    MERGES_TOTAL.inc();
    MERGED_BLOCKS_TOTAL.inc_by(stats.blocks_read);
    MERGED_ROWS_TOTAL.inc_by(stats.rows_read.saturating_sub(stats.rows_dropped));
    ROWS_DELETED_TOTAL.inc_by(stats.rows_dropped);

    info!(
        readers = %bsm.readers_paths,
        blocks = stats.blocks_read,
        rows = stats.rows_read,
        rows_dropped = stats.rows_dropped,
        duration_ms = start.elapsed().as_millis() as u64,
        "merged parts"
    );
    stats
}
