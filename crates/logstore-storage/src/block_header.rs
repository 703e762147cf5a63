//! Block Header Format
//!
//! Every block in a part is described by a [`BlockHeader`] stored in the part
//! index. The header locates the block's timestamps and its [`ColumnsHeader`],
//! which in turn locates the values and bloom filter of every column.
//!
//! ## Wire Format
//!
//! ```text
//! BlockHeader:
//!   u128(stream_id) varint(uncompressed_size) varint(rows_count)
//!   TimestampsHeader
//!   [v1+] varint(columns_header_index_offset) varint(columns_header_index_size)
//!   varint(columns_header_offset) varint(columns_header_size)
//!
//! TimestampsHeader (33 bytes):
//!   u64(block_offset) u64(block_size) i64(min_timestamp) i64(max_timestamp) u8(marshal_type)
//!
//! ColumnHeader:
//!   [v0] bytes(name)
//!   u8(value_type) min/max (type-specific width)
//!   dict                          -- dict columns only
//!   varint(values_offset) varint(values_size)
//!   varint(bloom_offset) varint(bloom_size)   -- omitted for dict columns
//! ```
//!
//! ## Format Versions
//!
//! Version 0 embeds column names in every column header and const column.
//! Version 1 drops them and stores a [`ColumnsHeaderIndex`] next to the
//! columns header, mapping every column to an id in the part-level column
//! names dictionary plus its offset inside the marshaled columns header.
//!
//! ## Invariants
//!
//! - Unmarshaling never advances the source on error.
//! - Block headers of a part are sorted by `(stream_id, min_timestamp)`.
//! - `min_value <= max_value` under the natural ordering of the value type.

use crate::column_names::ColumnNameIdGenerator;
use crate::consts::{
    MAX_BLOOM_FILTER_BLOCK_SIZE, MAX_COLUMNS_HEADER_INDEX_SIZE, MAX_COLUMNS_HEADER_SIZE,
    MAX_COLUMNS_PER_BLOCK, MAX_ROWS_PER_BLOCK, MAX_VALUES_BLOCK_SIZE,
};
use crate::error::{Result, StorageError};
use crate::values_encoder::{ValueType, ValuesDict};
use logstore_core::encoding::{
    marshal_bytes, marshal_var_u64, unmarshal_string, unmarshal_u16, unmarshal_u32, unmarshal_u64,
    unmarshal_u8, unmarshal_var_u64,
};
use logstore_core::{Field, StreamId};

/// Upper bound on item counts accepted while parsing a columns header.
const MAX_COLUMNS_HEADER_ITEMS: u64 = 1_000_000;

fn read_var_u64(src: &mut &[u8], what: &str) -> Result<u64> {
    unmarshal_var_u64(src).map_err(|err| StorageError::BlockHeader(format!("cannot unmarshal {what}: {err}")))
}

/// Location and bounds of the timestamps block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampsHeader {
    pub block_offset: u64,
    pub block_size: u64,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    pub marshal_type: u8,
}

impl TimestampsHeader {
    pub const SIZE: usize = 33;

    pub fn marshal(&self, dst: &mut Vec<u8>) {
        dst.extend_from_slice(&self.block_offset.to_be_bytes());
        dst.extend_from_slice(&self.block_size.to_be_bytes());
        dst.extend_from_slice(&self.min_timestamp.to_be_bytes());
        dst.extend_from_slice(&self.max_timestamp.to_be_bytes());
        dst.push(self.marshal_type);
    }

    pub fn unmarshal(src: &mut &[u8]) -> Result<Self> {
        if src.len() < Self::SIZE {
            return Err(StorageError::BlockHeader(format!(
                "cannot unmarshal timestampsHeader from {} bytes; need at least {} bytes",
                src.len(),
                Self::SIZE
            )));
        }
        let mut cursor = *src;
        let th = Self {
            block_offset: unmarshal_u64(&mut cursor)?,
            block_size: unmarshal_u64(&mut cursor)?,
            min_timestamp: unmarshal_u64(&mut cursor)? as i64,
            max_timestamp: unmarshal_u64(&mut cursor)? as i64,
            marshal_type: unmarshal_u8(&mut cursor)?,
        };
        *src = cursor;
        Ok(th)
    }
}

/// Header of a single block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub stream_id: StreamId,
    pub uncompressed_size_bytes: u64,
    pub rows_count: u64,
    pub timestamps_header: TimestampsHeader,
    pub columns_header_index_offset: u64,
    pub columns_header_index_size: u64,
    pub columns_header_offset: u64,
    pub columns_header_size: u64,
}

impl BlockHeader {
    pub fn marshal(&self, dst: &mut Vec<u8>, format_version: u32) {
        self.stream_id.marshal(dst);
        marshal_var_u64(dst, self.uncompressed_size_bytes);
        marshal_var_u64(dst, self.rows_count);
        self.timestamps_header.marshal(dst);
        if format_version >= 1 {
            marshal_var_u64(dst, self.columns_header_index_offset);
            marshal_var_u64(dst, self.columns_header_index_size);
        }
        marshal_var_u64(dst, self.columns_header_offset);
        marshal_var_u64(dst, self.columns_header_size);
    }

    pub fn unmarshal(src: &mut &[u8], format_version: u32) -> Result<Self> {
        let mut cursor = *src;
        let mut bh = Self {
            stream_id: StreamId::unmarshal(&mut cursor)
                .map_err(|err| StorageError::BlockHeader(format!("cannot unmarshal streamID: {err}")))?,
            uncompressed_size_bytes: read_var_u64(&mut cursor, "uncompressedSizeBytes")?,
            ..Default::default()
        };

        let rows_count = read_var_u64(&mut cursor, "rowsCount")?;
        if rows_count > MAX_ROWS_PER_BLOCK {
            return Err(StorageError::BlockHeader(format!(
                "too big value for rowsCount: {rows_count}; mustn't exceed {MAX_ROWS_PER_BLOCK}"
            )));
        }
        bh.rows_count = rows_count;
        bh.timestamps_header = TimestampsHeader::unmarshal(&mut cursor)?;

        if format_version >= 1 {
            bh.columns_header_index_offset = read_var_u64(&mut cursor, "columnsHeaderIndexOffset")?;
            let size = read_var_u64(&mut cursor, "columnsHeaderIndexSize")?;
            if size > MAX_COLUMNS_HEADER_INDEX_SIZE {
                return Err(StorageError::BlockHeader(format!(
                    "too big value for columnsHeaderIndexSize: {size}; mustn't exceed {MAX_COLUMNS_HEADER_INDEX_SIZE}"
                )));
            }
            bh.columns_header_index_size = size;
        }

        bh.columns_header_offset = read_var_u64(&mut cursor, "columnsHeaderOffset")?;
        let size = read_var_u64(&mut cursor, "columnsHeaderSize")?;
        if size > MAX_COLUMNS_HEADER_SIZE {
            return Err(StorageError::BlockHeader(format!(
                "too big value for columnsHeaderSize: {size}; mustn't exceed {MAX_COLUMNS_HEADER_SIZE}"
            )));
        }
        bh.columns_header_size = size;

        *src = cursor;
        Ok(bh)
    }
}

/// Appends all block headers found in `src` to `dst` and validates their order.
///
/// `dst` is left unchanged on error.
pub fn unmarshal_block_headers(
    dst: &mut Vec<BlockHeader>,
    src: &[u8],
    format_version: u32,
) -> Result<()> {
    let start = dst.len();
    let mut cursor = src;
    while !cursor.is_empty() {
        match BlockHeader::unmarshal(&mut cursor, format_version) {
            Ok(bh) => dst.push(bh),
            Err(err) => {
                let parsed = dst.len() - start;
                dst.truncate(start);
                return Err(StorageError::BlockHeader(format!(
                    "cannot unmarshal block header #{parsed} at offset {}: {err}",
                    src.len() - cursor.len()
                )));
            }
        }
    }
    if let Err(err) = validate_block_headers(&dst[start..]) {
        dst.truncate(start);
        return Err(err);
    }
    Ok(())
}

/// Verifies that `bhs` are sorted by `(stream_id, min_timestamp)`.
pub fn validate_block_headers(bhs: &[BlockHeader]) -> Result<()> {
    for (i, pair) in bhs.windows(2).enumerate() {
        let (prev, bh) = (&pair[0], &pair[1]);
        if bh.stream_id < prev.stream_id {
            return Err(StorageError::Ordering(format!(
                "unexpected blockHeader with smaller streamID={} after bigger streamID={} at position {}",
                bh.stream_id,
                prev.stream_id,
                i + 1
            )));
        }
        if bh.stream_id == prev.stream_id
            && bh.timestamps_header.min_timestamp < prev.timestamps_header.min_timestamp
        {
            return Err(StorageError::Ordering(format!(
                "unexpected blockHeader with smaller timestamp={} after bigger timestamp={} at position {}",
                bh.timestamps_header.min_timestamp,
                prev.timestamps_header.min_timestamp,
                i + 1
            )));
        }
    }
    Ok(())
}

/// Reference from the columns header index to a column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnHeaderRef {
    pub column_name_id: u64,
    pub offset: u64,
}

/// Maps the columns of a v1 columns header to their names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnsHeaderIndex {
    pub column_headers_refs: Vec<ColumnHeaderRef>,
    pub const_columns_refs: Vec<ColumnHeaderRef>,
}

impl ColumnsHeaderIndex {
    pub fn reset(&mut self) {
        self.column_headers_refs.clear();
        self.const_columns_refs.clear();
    }

    pub fn marshal(&self, dst: &mut Vec<u8>) {
        marshal_refs(dst, &self.column_headers_refs);
        marshal_refs(dst, &self.const_columns_refs);
    }

    pub fn unmarshal(src: &[u8]) -> Result<Self> {
        let mut cursor = src;
        let column_headers_refs = unmarshal_refs(&mut cursor).map_err(|err| {
            StorageError::ColumnsHeader(format!("cannot unmarshal columnHeadersRefs: {err}"))
        })?;
        let const_columns_refs = unmarshal_refs(&mut cursor).map_err(|err| {
            StorageError::ColumnsHeader(format!("cannot unmarshal constColumnsRefs: {err}"))
        })?;
        if !cursor.is_empty() {
            return Err(StorageError::ColumnsHeader(format!(
                "unexpected non-empty tail left after unmarshaling columnsHeaderIndex; len(tail)={}",
                cursor.len()
            )));
        }
        Ok(Self {
            column_headers_refs,
            const_columns_refs,
        })
    }
}

fn marshal_refs(dst: &mut Vec<u8>, refs: &[ColumnHeaderRef]) {
    marshal_var_u64(dst, refs.len() as u64);
    for r in refs {
        marshal_var_u64(dst, r.column_name_id);
        marshal_var_u64(dst, r.offset);
    }
}

fn unmarshal_refs(src: &mut &[u8]) -> Result<Vec<ColumnHeaderRef>> {
    let mut cursor = *src;
    let n = read_var_u64(&mut cursor, "the number of columnHeaderRef items")?;
    if n > cursor.len() as u64 {
        return Err(StorageError::ColumnsHeader(format!(
            "too big number of columnHeaderRef items: {n}; only {} bytes left",
            cursor.len()
        )));
    }
    let mut refs = Vec::with_capacity(n as usize);
    for i in 0..n {
        let column_name_id =
            read_var_u64(&mut cursor, &format!("column name ID number {i} out of {n}"))?;
        let offset = read_var_u64(&mut cursor, &format!("offset number {i} out of {n}"))?;
        refs.push(ColumnHeaderRef {
            column_name_id,
            offset,
        });
    }
    *src = cursor;
    Ok(refs)
}

/// Describes a single non-const column of a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnHeader {
    pub name: String,
    pub value_type: ValueType,
    pub min_value: u64,
    pub max_value: u64,
    pub values_dict: ValuesDict,
    pub values_offset: u64,
    pub values_size: u64,
    pub bloom_filter_offset: u64,
    pub bloom_filter_size: u64,
}

impl ColumnHeader {
    /// Appends the marshaled header to `dst`.
    ///
    /// # Panics
    ///
    /// Panics on an unknown value type or when `min_value > max_value`.
    pub fn marshal(&self, dst: &mut Vec<u8>, format_version: u32) {
        let vt = self.value_type;
        if !vt.is_valid_min_max(self.min_value, self.max_value) {
            match vt {
                ValueType::Int64 | ValueType::TimestampIso8601 => panic!(
                    "BUG: minValue={} must be smaller than maxValue={} for valueType={vt}",
                    self.min_value as i64, self.max_value as i64
                ),
                ValueType::Float64 => panic!(
                    "BUG: minValue={} must be smaller than maxValue={} for valueType={vt}",
                    f64::from_bits(self.min_value),
                    f64::from_bits(self.max_value)
                ),
                _ => panic!(
                    "BUG: minValue={} must be smaller than maxValue={} for valueType={vt}",
                    self.min_value, self.max_value
                ),
            }
        }

        if format_version < 1 {
            marshal_bytes(dst, self.name.as_bytes());
        }
        dst.push(vt as u8);
        match vt {
            ValueType::String => {}
            ValueType::Dict => {
                self.values_dict.marshal(dst);
                marshal_var_u64(dst, self.values_offset);
                marshal_var_u64(dst, self.values_size);
                return;
            }
            ValueType::Uint8 => {
                dst.push(self.min_value as u8);
                dst.push(self.max_value as u8);
            }
            ValueType::Uint16 => {
                dst.extend_from_slice(&(self.min_value as u16).to_be_bytes());
                dst.extend_from_slice(&(self.max_value as u16).to_be_bytes());
            }
            ValueType::Uint32 | ValueType::IPv4 => {
                dst.extend_from_slice(&(self.min_value as u32).to_be_bytes());
                dst.extend_from_slice(&(self.max_value as u32).to_be_bytes());
            }
            ValueType::Uint64 | ValueType::Int64 | ValueType::Float64 | ValueType::TimestampIso8601 => {
                dst.extend_from_slice(&self.min_value.to_be_bytes());
                dst.extend_from_slice(&self.max_value.to_be_bytes());
            }
            ValueType::Unknown => panic!("BUG: unknown valueType={}", vt as u8),
        }
        marshal_var_u64(dst, self.values_offset);
        marshal_var_u64(dst, self.values_size);
        marshal_var_u64(dst, self.bloom_filter_offset);
        marshal_var_u64(dst, self.bloom_filter_size);
    }

    pub fn unmarshal(src: &mut &[u8], format_version: u32) -> Result<Self> {
        let mut cursor = *src;
        let mut ch = Self::default();

        if format_version < 1 {
            ch.name = unmarshal_string(&mut cursor)
                .map_err(|err| StorageError::ColumnsHeader(format!("cannot unmarshal column name: {err}")))?;
        }

        let raw_type = unmarshal_u8(&mut cursor).map_err(|_| {
            StorageError::ColumnsHeader(format!(
                "cannot unmarshal valueType from 0 bytes for column {:?}; need at least 1 byte",
                ch.name
            ))
        })?;
        let vt = match ValueType::from_u8(raw_type) {
            Some(vt) if vt != ValueType::Unknown => vt,
            _ => {
                return Err(StorageError::ColumnsHeader(format!(
                    "unexpected valueType={raw_type} for column {:?}",
                    ch.name
                )))
            }
        };
        ch.value_type = vt;

        let min_max = |cursor: &mut &[u8], name: &str| -> Result<(u64, u64)> {
            let need = match vt {
                ValueType::Uint8 => 2,
                ValueType::Uint16 => 4,
                ValueType::Uint32 | ValueType::IPv4 => 8,
                _ => 16,
            };
            if cursor.len() < need {
                return Err(StorageError::ColumnsHeader(format!(
                    "cannot unmarshal min/max values for valueType={vt} from {} bytes for column {name:?}; need at least {need} bytes",
                    cursor.len()
                )));
            }
            Ok(match vt {
                ValueType::Uint8 => (
                    u64::from(unmarshal_u8(cursor)?),
                    u64::from(unmarshal_u8(cursor)?),
                ),
                ValueType::Uint16 => (
                    u64::from(unmarshal_u16(cursor)?),
                    u64::from(unmarshal_u16(cursor)?),
                ),
                ValueType::Uint32 | ValueType::IPv4 => (
                    u64::from(unmarshal_u32(cursor)?),
                    u64::from(unmarshal_u32(cursor)?),
                ),
                _ => (unmarshal_u64(cursor)?, unmarshal_u64(cursor)?),
            })
        };

        match vt {
            ValueType::String => {}
            ValueType::Dict => {
                ch.values_dict = ValuesDict::unmarshal(&mut cursor).map_err(|err| {
                    StorageError::ColumnsHeader(format!(
                        "cannot unmarshal dict at valueTypeDict for column {:?}: {err}",
                        ch.name
                    ))
                })?;
            }
            _ => {
                let (min_value, max_value) = min_max(&mut cursor, &ch.name)?;
                ch.min_value = min_value;
                ch.max_value = max_value;
            }
        }

        ch.values_offset = read_var_u64(&mut cursor, "valuesOffset")?;
        ch.values_size = read_var_u64(&mut cursor, "valuesSize")?;
        if ch.values_size > MAX_VALUES_BLOCK_SIZE {
            return Err(StorageError::ColumnsHeader(format!(
                "too big valuesSize: {} bytes; mustn't exceed {MAX_VALUES_BLOCK_SIZE} bytes",
                ch.values_size
            )));
        }
        if vt != ValueType::Dict {
            ch.bloom_filter_offset = read_var_u64(&mut cursor, "bloomFilterOffset")?;
            ch.bloom_filter_size = read_var_u64(&mut cursor, "bloomFilterSize")?;
            if ch.bloom_filter_size > MAX_BLOOM_FILTER_BLOCK_SIZE {
                return Err(StorageError::ColumnsHeader(format!(
                    "too big bloomFilterSize: {} bytes; mustn't exceed {MAX_BLOOM_FILTER_BLOCK_SIZE} bytes",
                    ch.bloom_filter_size
                )));
            }
        }

        *src = cursor;
        Ok(ch)
    }
}

/// Column headers and const columns of a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnsHeader {
    pub column_headers: Vec<ColumnHeader>,
    pub const_columns: Vec<Field>,
}

impl ColumnsHeader {
    pub fn reset(&mut self) {
        self.column_headers.clear();
        self.const_columns.clear();
    }

    /// Appends the marshaled header to `dst`.
    ///
    /// For v1 the column names go to `index` as ids assigned by `names`.
    pub fn marshal(
        &self,
        dst: &mut Vec<u8>,
        format_version: u32,
        index: &mut ColumnsHeaderIndex,
        names: &mut ColumnNameIdGenerator,
    ) {
        index.reset();
        let start = dst.len();

        marshal_var_u64(dst, self.column_headers.len() as u64);
        for ch in &self.column_headers {
            index.column_headers_refs.push(ColumnHeaderRef {
                column_name_id: names.get_or_add(&ch.name),
                offset: (dst.len() - start) as u64,
            });
            ch.marshal(dst, format_version);
        }

        marshal_var_u64(dst, self.const_columns.len() as u64);
        for cc in &self.const_columns {
            index.const_columns_refs.push(ColumnHeaderRef {
                column_name_id: names.get_or_add(&cc.name),
                offset: (dst.len() - start) as u64,
            });
            if format_version < 1 {
                cc.marshal(dst);
            } else {
                marshal_bytes(dst, cc.value.as_bytes());
            }
        }
    }

    pub fn unmarshal(src: &[u8], format_version: u32) -> Result<Self> {
        let mut cursor = src;
        let mut csh = Self::default();

        let n = read_var_u64(&mut cursor, "columnHeaders len")?;
        if n > MAX_COLUMNS_HEADER_ITEMS {
            return Err(StorageError::ColumnsHeader(format!(
                "too big number of columnHeaders: {n}"
            )));
        }
        for i in 0..n {
            let ch = ColumnHeader::unmarshal(&mut cursor, format_version).map_err(|err| {
                StorageError::ColumnsHeader(format!(
                    "cannot unmarshal columnHeader {i} out of {n} columnHeaders: {err}"
                ))
            })?;
            csh.column_headers.push(ch);
        }
        if csh.column_headers.len() > MAX_COLUMNS_PER_BLOCK {
            return Err(StorageError::TooManyColumns {
                count: csh.column_headers.len(),
                max: MAX_COLUMNS_PER_BLOCK,
                columns: csh.column_names(),
            });
        }

        let n = read_var_u64(&mut cursor, "constColumns len")?;
        if n > MAX_COLUMNS_HEADER_ITEMS {
            return Err(StorageError::ColumnsHeader(format!(
                "too big number of constColumns: {n}"
            )));
        }
        for i in 0..n {
            let cc = if format_version < 1 {
                Field::unmarshal(&mut cursor)
            } else {
                unmarshal_string(&mut cursor).map(|value| Field::new("", value))
            }
            .map_err(|err| {
                StorageError::ColumnsHeader(format!(
                    "cannot unmarshal constColumn {i} out of {n} columns: {err}"
                ))
            })?;
            csh.const_columns.push(cc);
        }

        let total = csh.column_headers.len() + csh.const_columns.len();
        if total > MAX_COLUMNS_PER_BLOCK {
            return Err(StorageError::TooManyColumns {
                count: total,
                max: MAX_COLUMNS_PER_BLOCK,
                columns: csh.column_names(),
            });
        }

        if !cursor.is_empty() {
            return Err(StorageError::ColumnsHeader(format!(
                "unexpected non-empty tail left after unmarshaling columnsHeader: len(tail)={}",
                cursor.len()
            )));
        }
        Ok(csh)
    }

    /// Resolves v1 column names through the part-level names dictionary.
    pub fn set_column_names(&mut self, index: &ColumnsHeaderIndex, names: &[String]) -> Result<()> {
        fn resolve(refs: &[ColumnHeaderRef], i: usize, names: &[String], kind: &str) -> Result<String> {
            let id = refs[i].column_name_id;
            names.get(id as usize).cloned().ok_or_else(|| {
                StorageError::ColumnsHeader(format!(
                    "unexpected columnNameID={id} in {kind}; len(columnNames)={}; columnNames={names:?}",
                    names.len()
                ))
            })
        }

        if index.column_headers_refs.len() != self.column_headers.len() {
            return Err(StorageError::ColumnsHeader(format!(
                "unexpected number of column headers; got {}; want {}",
                index.column_headers_refs.len(),
                self.column_headers.len()
            )));
        }
        if index.const_columns_refs.len() != self.const_columns.len() {
            return Err(StorageError::ColumnsHeader(format!(
                "unexpected number of const columns; got {}; want {}",
                index.const_columns_refs.len(),
                self.const_columns.len()
            )));
        }
        for i in 0..self.column_headers.len() {
            self.column_headers[i].name =
                resolve(&index.column_headers_refs, i, names, "columnHeadersRefs")?;
        }
        for i in 0..self.const_columns.len() {
            self.const_columns[i].name =
                resolve(&index.const_columns_refs, i, names, "constColumnsRefs")?;
        }
        Ok(())
    }

    pub fn column_names(&self) -> Vec<String> {
        self.column_headers
            .iter()
            .map(|ch| ch.name.clone())
            .chain(self.const_columns.iter().map(|cc| cc.name.clone()))
            .collect()
    }

    pub fn get_column_header(&self, name: &str) -> Option<&ColumnHeader> {
        self.column_headers.iter().find(|ch| ch.name == name)
    }

    pub fn get_const_column(&self, name: &str) -> Option<&Field> {
        self.const_columns.iter().find(|cc| cc.name == name)
    }
}
