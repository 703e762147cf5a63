//! Search over a single on-disk block.
//!
//! [`BlockSearch`] gives filters lazy access to the pieces of a block: the
//! columns header, the timestamps, per-column values and bloom filters. Each
//! piece is read from the part at most once per block.
//!
//! Read failures mean the part is corrupt. They panic with a `FATAL:` message
//! naming the part instead of silently skipping data.

use logstore_core::{get_canonical_column_name, StreamId, StreamTags, MSG_FIELD_NAME};
use logstore_storage::{BlockHeader, ColumnHeader, ColumnsHeader, EncodedValues, Part, TokenBloomFilter};
use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;

/// How a field is stored in a block.
#[derive(Debug, Clone, Copy)]
pub enum BlockColumnRef<'a> {
    Const(&'a str),
    Header(&'a ColumnHeader),
    Missing,
}

pub struct BlockSearch<'a> {
    part: &'a Part,
    bh: &'a BlockHeader,
    stream_tags: Option<&'a StreamTags>,

    csh: OnceCell<ColumnsHeader>,
    timestamps: OnceCell<Vec<i64>>,
    values: RefCell<HashMap<String, Arc<EncodedValues>>>,
    blooms: RefCell<HashMap<String, Option<Arc<TokenBloomFilter>>>>,
}

impl<'a> BlockSearch<'a> {
    pub fn new(part: &'a Part, bh: &'a BlockHeader, stream_tags: Option<&'a StreamTags>) -> Self {
        Self {
            part,
            bh,
            stream_tags,
            csh: OnceCell::new(),
            timestamps: OnceCell::new(),
            values: RefCell::new(HashMap::new()),
            blooms: RefCell::new(HashMap::new()),
        }
    }

    pub fn part_name(&self) -> &str {
        self.part.name()
    }

    pub fn block_header(&self) -> &BlockHeader {
        self.bh
    }

    pub fn stream_id(&self) -> StreamId {
        self.bh.stream_id
    }

    pub fn stream_tags(&self) -> Option<&'a StreamTags> {
        self.stream_tags
    }

    pub fn rows_count(&self) -> usize {
        self.bh.rows_count as usize
    }

    pub fn min_timestamp(&self) -> i64 {
        self.bh.timestamps_header.min_timestamp
    }

    pub fn max_timestamp(&self) -> i64 {
        self.bh.timestamps_header.max_timestamp
    }

    pub fn columns_header(&self) -> &ColumnsHeader {
        self.csh.get_or_init(|| match self.part.read_columns_header(self.bh) {
            Ok(csh) => csh,
            Err(err) => panic!(
                "FATAL: cannot read columns header for block of stream {} in part {}: {err}",
                self.bh.stream_id,
                self.part.name()
            ),
        })
    }

    pub fn timestamps(&self) -> &[i64] {
        self.timestamps.get_or_init(|| match self.part.read_timestamps(self.bh) {
            Ok(ts) => ts,
            Err(err) => panic!(
                "FATAL: cannot read timestamps for block of stream {} in part {}: {err}",
                self.bh.stream_id,
                self.part.name()
            ),
        })
    }

    /// Resolves `name` against the columns of the block. `_msg` maps to the stored empty name.
    pub fn column(&self, name: &str) -> BlockColumnRef<'_> {
        let stored = if name == MSG_FIELD_NAME { "" } else { name };
        let csh = self.columns_header();
        if let Some(cc) = csh.get_const_column(stored) {
            return BlockColumnRef::Const(&cc.value);
        }
        if let Some(ch) = csh.get_column_header(stored) {
            return BlockColumnRef::Header(ch);
        }
        BlockColumnRef::Missing
    }

    /// Returns the canonical names of every stored column of the block.
    pub fn column_names(&self) -> Vec<String> {
        self.columns_header()
            .column_names()
            .iter()
            .map(|n| get_canonical_column_name(n).to_string())
            .collect()
    }

    pub fn values(&self, ch: &ColumnHeader) -> Arc<EncodedValues> {
        if let Some(v) = self.values.borrow().get(&ch.name) {
            return v.clone();
        }
        let values = match self.part.read_values(self.bh, ch) {
            Ok(v) => Arc::new(v),
            Err(err) => panic!(
                "FATAL: cannot read values for column {:?} in part {}: {err}",
                get_canonical_column_name(&ch.name),
                self.part.name()
            ),
        };
        self.values.borrow_mut().insert(ch.name.clone(), values.clone());
        values
    }

    /// Returns the token bloom filter of the column, or `None` for dict columns.
    pub fn bloom_filter(&self, ch: &ColumnHeader) -> Option<Arc<TokenBloomFilter>> {
        if let Some(b) = self.blooms.borrow().get(&ch.name) {
            return b.clone();
        }
        let bloom = match self.part.read_bloom_filter(ch) {
            Ok(b) => b.map(Arc::new),
            Err(err) => panic!(
                "FATAL: cannot read bloom filter for column {:?} in part {}: {err}",
                get_canonical_column_name(&ch.name),
                self.part.name()
            ),
        };
        self.blooms.borrow_mut().insert(ch.name.clone(), bloom.clone());
        bloom
    }
}
