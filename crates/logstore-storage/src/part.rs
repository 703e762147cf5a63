//! Parts - Immutable Sets of Blocks
//!
//! A part is the unit produced by ingestion and by merges. It holds blocks
//! sorted by `(stream_id, min_timestamp)` and is never modified after
//! [`BlockStreamWriter::finalize`](crate::BlockStreamWriter::finalize).
//!
//! ## Layout
//!
//! An [`InMemoryPart`] consists of independent byte streams:
//!
//! ```text
//! metaindex            bytes block of IndexBlockHeader entries
//! index                bytes blocks of up to 64 marshaled BlockHeaders each
//! column_names         part-level column names dictionary (v1)
//! columns_header_index ColumnsHeaderIndex per block (v1)
//! columns_header       ColumnsHeader per block
//! timestamps           timestamps blocks
//! message_values       values blocks of the `_msg` column
//! message_blooms       bloom filters of the `_msg` column
//! field_values         values blocks of all other columns
//! field_blooms         bloom filters of all other columns
//! ```
//!
//! Every offset stored in a header is relative to the start of its stream,
//! so blocks can be located without scanning the part.
//!
//! ## Integrity
//!
//! [`PartHeader::checksum`] is a crc32 over all streams. [`Part::open`]
//! rejects parts whose streams do not match it.

use crate::block_data::{decode_values_block, BlockData, ColumnData};
use crate::block_header::{
    unmarshal_block_headers, BlockHeader, ColumnHeader, ColumnsHeader, ColumnsHeaderIndex,
};
use crate::bloom::TokenBloomFilter;
use crate::column_names::unmarshal_column_names;
use crate::consts::{MAX_INDEX_BLOCK_SIZE, PART_FORMAT_LATEST_VERSION};
use crate::error::{Result, StorageError};
use crate::strings_block::unmarshal_bytes_block;
use crate::timestamps::{TimestampsData, TimestampsMarshalType};
use crate::values_encoder::{EncodedValues, ValueType};
use logstore_core::encoding::{marshal_var_u64, unmarshal_i64, unmarshal_u128, unmarshal_var_u64};
use logstore_core::StreamId;
use serde::{Deserialize, Serialize};

/// Summary of a part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartHeader {
    pub format_version: u32,
    pub rows_count: u64,
    pub blocks_count: u64,
    pub uncompressed_size_bytes: u64,
    pub compressed_size_bytes: u64,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    pub checksum: u32,
}

/// Locates an index block and summarizes the block headers it holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexBlockHeader {
    /// Stream id of the first block header in the index block.
    pub stream_id: StreamId,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    pub index_block_offset: u64,
    pub index_block_size: u64,
    pub blocks_count: u64,
}

impl IndexBlockHeader {
    pub fn marshal(&self, dst: &mut Vec<u8>) {
        self.stream_id.marshal(dst);
        dst.extend_from_slice(&self.min_timestamp.to_be_bytes());
        dst.extend_from_slice(&self.max_timestamp.to_be_bytes());
        marshal_var_u64(dst, self.index_block_offset);
        marshal_var_u64(dst, self.index_block_size);
        marshal_var_u64(dst, self.blocks_count);
    }

    pub fn unmarshal(src: &mut &[u8]) -> Result<Self> {
        let mut cursor = *src;
        let ibh = Self {
            stream_id: StreamId(unmarshal_u128(&mut cursor)?),
            min_timestamp: unmarshal_i64(&mut cursor)?,
            max_timestamp: unmarshal_i64(&mut cursor)?,
            index_block_offset: unmarshal_var_u64(&mut cursor)?,
            index_block_size: unmarshal_var_u64(&mut cursor)?,
            blocks_count: unmarshal_var_u64(&mut cursor)?,
        };
        if ibh.min_timestamp > ibh.max_timestamp {
            return Err(StorageError::BlockHeader(format!(
                "min_timestamp={} cannot exceed max_timestamp={} in index block header",
                ibh.min_timestamp, ibh.max_timestamp
            )));
        }
        *src = cursor;
        Ok(ibh)
    }
}

fn unmarshal_index_block_headers(src: &[u8]) -> Result<Vec<IndexBlockHeader>> {
    let mut cursor = src;
    let mut ibhs: Vec<IndexBlockHeader> = Vec::new();
    while !cursor.is_empty() {
        let ibh = IndexBlockHeader::unmarshal(&mut cursor).map_err(|err| {
            StorageError::BlockHeader(format!("cannot unmarshal index block header #{}: {err}", ibhs.len()))
        })?;
        if let Some(prev) = ibhs.last() {
            if ibh.stream_id < prev.stream_id {
                return Err(StorageError::Ordering(format!(
                    "index block header #{} has smaller stream_id={} than the previous one {}",
                    ibhs.len(),
                    ibh.stream_id,
                    prev.stream_id
                )));
            }
        }
        ibhs.push(ibh);
    }
    Ok(ibhs)
}

/// Byte streams of a finalized part.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPart {
    pub header: PartHeader,
    pub metaindex: Vec<u8>,
    pub index: Vec<u8>,
    pub column_names: Vec<u8>,
    pub columns_header_index: Vec<u8>,
    pub columns_header: Vec<u8>,
    pub timestamps: Vec<u8>,
    pub message_values: Vec<u8>,
    pub message_blooms: Vec<u8>,
    pub field_values: Vec<u8>,
    pub field_blooms: Vec<u8>,
}

impl InMemoryPart {
    fn streams(&self) -> [&[u8]; 10] {
        [
            &self.metaindex,
            &self.index,
            &self.column_names,
            &self.columns_header_index,
            &self.columns_header,
            &self.timestamps,
            &self.message_values,
            &self.message_blooms,
            &self.field_values,
            &self.field_blooms,
        ]
    }

    /// Total size of all streams.
    pub fn size_bytes(&self) -> u64 {
        self.streams().iter().map(|s| s.len() as u64).sum()
    }

    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for s in self.streams() {
            hasher.update(&(s.len() as u64).to_be_bytes());
            hasher.update(s);
        }
        hasher.finalize()
    }
}

fn stream_slice<'a>(stream: &'a [u8], offset: u64, size: u64, what: &str) -> Result<&'a [u8]> {
    let end = offset.checked_add(size).unwrap_or(u64::MAX);
    if end > stream.len() as u64 {
        return Err(StorageError::BlockHeader(format!(
            "{what} at offset {offset} with size {size} is out of bounds; stream size is {} bytes",
            stream.len()
        )));
    }
    Ok(&stream[offset as usize..end as usize])
}

/// A validated, read-only view over an [`InMemoryPart`].
#[derive(Debug)]
pub struct Part {
    name: String,
    data: InMemoryPart,
    column_names: Vec<String>,
    index_block_headers: Vec<IndexBlockHeader>,
}

impl Part {
    /// Opens the part, verifying its checksum, metaindex and column names.
    pub fn open(name: impl Into<String>, data: InMemoryPart) -> Result<Self> {
        let name = name.into();
        let ph = &data.header;
        if ph.format_version > PART_FORMAT_LATEST_VERSION {
            return Err(StorageError::BlockHeader(format!(
                "unsupported format_version={} in part {name}; max supported version is {PART_FORMAT_LATEST_VERSION}",
                ph.format_version
            )));
        }
        let checksum = data.compute_checksum();
        if checksum != ph.checksum {
            return Err(StorageError::BlockHeader(format!(
                "checksum mismatch in part {name}: got {checksum:#010x}; want {:#010x}",
                ph.checksum
            )));
        }

        let metaindex = if data.metaindex.is_empty() {
            Vec::new()
        } else {
            let mut src = data.metaindex.as_slice();
            unmarshal_bytes_block(&mut src, MAX_INDEX_BLOCK_SIZE)?
        };
        let index_block_headers = unmarshal_index_block_headers(&metaindex)?;
        let blocks_count: u64 = index_block_headers.iter().map(|ibh| ibh.blocks_count).sum();
        if blocks_count != ph.blocks_count {
            return Err(StorageError::BlockHeader(format!(
                "metaindex of part {name} refers to {blocks_count} blocks; part header declares {}",
                ph.blocks_count
            )));
        }

        let column_names = if ph.format_version >= 1 && !data.column_names.is_empty() {
            unmarshal_column_names(&data.column_names)?
        } else {
            Vec::new()
        };

        Ok(Self {
            name,
            data,
            column_names,
            index_block_headers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &PartHeader {
        &self.data.header
    }

    pub fn format_version(&self) -> u32 {
        self.data.header.format_version
    }

    pub fn index_block_headers(&self) -> &[IndexBlockHeader] {
        &self.index_block_headers
    }

    /// Reads and validates the block headers of an index block.
    pub fn read_block_headers(&self, ibh: &IndexBlockHeader) -> Result<Vec<BlockHeader>> {
        let mut src = stream_slice(&self.data.index, ibh.index_block_offset, ibh.index_block_size, "index block")?;
        let data = unmarshal_bytes_block(&mut src, MAX_INDEX_BLOCK_SIZE)?;
        let mut bhs = Vec::with_capacity(ibh.blocks_count as usize);
        unmarshal_block_headers(&mut bhs, &data, self.format_version())?;
        if bhs.len() as u64 != ibh.blocks_count {
            return Err(StorageError::BlockHeader(format!(
                "unexpected number of block headers in index block: got {}; want {}",
                bhs.len(),
                ibh.blocks_count
            )));
        }
        Ok(bhs)
    }

    /// Reads the columns header of a block with column names resolved.
    pub fn read_columns_header(&self, bh: &BlockHeader) -> Result<ColumnsHeader> {
        let data = stream_slice(
            &self.data.columns_header,
            bh.columns_header_offset,
            bh.columns_header_size,
            "columns header",
        )?;
        let mut csh = ColumnsHeader::unmarshal(data, self.format_version())?;
        if self.format_version() >= 1 {
            let index_data = stream_slice(
                &self.data.columns_header_index,
                bh.columns_header_index_offset,
                bh.columns_header_index_size,
                "columns header index",
            )?;
            let index = ColumnsHeaderIndex::unmarshal(index_data)?;
            csh.set_column_names(&index, &self.column_names)?;
        }
        Ok(csh)
    }

    pub fn read_timestamps(&self, bh: &BlockHeader) -> Result<Vec<i64>> {
        self.read_timestamps_data(bh)?.decode(bh.rows_count as usize)
    }

    fn read_timestamps_data(&self, bh: &BlockHeader) -> Result<TimestampsData> {
        let th = &bh.timestamps_header;
        let data = stream_slice(&self.data.timestamps, th.block_offset, th.block_size, "timestamps block")?;
        let marshal_type = TimestampsMarshalType::from_u8(th.marshal_type).ok_or_else(|| {
            StorageError::BlockHeader(format!("unexpected timestamps marshal type {}", th.marshal_type))
        })?;
        Ok(TimestampsData {
            data: data.to_vec(),
            marshal_type,
            min_timestamp: th.min_timestamp,
            max_timestamp: th.max_timestamp,
        })
    }

    fn column_streams(&self, ch: &ColumnHeader) -> (&[u8], &[u8]) {
        if ch.name.is_empty() {
            (&self.data.message_values, &self.data.message_blooms)
        } else {
            (&self.data.field_values, &self.data.field_blooms)
        }
    }

    fn raw_values(&self, ch: &ColumnHeader) -> Result<&[u8]> {
        let (values, _) = self.column_streams(ch);
        stream_slice(values, ch.values_offset, ch.values_size, "values block")
    }

    fn raw_bloom(&self, ch: &ColumnHeader) -> Result<&[u8]> {
        let (_, blooms) = self.column_streams(ch);
        stream_slice(blooms, ch.bloom_filter_offset, ch.bloom_filter_size, "bloom filter")
    }

    pub fn read_values(&self, bh: &BlockHeader, ch: &ColumnHeader) -> Result<EncodedValues> {
        decode_values_block(self.raw_values(ch)?, ch.value_type, &ch.values_dict, bh.rows_count as usize)
    }

    /// Returns `None` for dict columns, which carry no bloom filter.
    pub fn read_bloom_filter(&self, ch: &ColumnHeader) -> Result<Option<TokenBloomFilter>> {
        if ch.value_type == ValueType::Dict {
            return Ok(None);
        }
        TokenBloomFilter::unmarshal(self.raw_bloom(ch)?).map(Some)
    }

    /// Reads the packed form of a block without decoding its values.
    pub fn read_block_data(&self, bh: &BlockHeader) -> Result<BlockData> {
        let csh = self.read_columns_header(bh)?;
        let mut columns_data = Vec::with_capacity(csh.column_headers.len());
        for ch in &csh.column_headers {
            let bloom_filter_data = if ch.value_type == ValueType::Dict {
                Vec::new()
            } else {
                self.raw_bloom(ch)?.to_vec()
            };
            columns_data.push(ColumnData {
                name: ch.name.clone(),
                value_type: ch.value_type,
                min_value: ch.min_value,
                max_value: ch.max_value,
                values_dict: ch.values_dict.clone(),
                values_data: self.raw_values(ch)?.to_vec(),
                bloom_filter_data,
            });
        }
        Ok(BlockData {
            stream_id: bh.stream_id,
            uncompressed_size_bytes: bh.uncompressed_size_bytes,
            rows_count: bh.rows_count,
            timestamps_data: self.read_timestamps_data(bh)?,
            columns_data,
            const_columns: csh.const_columns,
        })
    }

    /// Reads every block header of the part in order.
    pub fn all_block_headers(&self) -> Result<Vec<BlockHeader>> {
        let mut bhs = Vec::with_capacity(self.data.header.blocks_count as usize);
        for ibh in &self.index_block_headers {
            bhs.extend(self.read_block_headers(ibh)?);
        }
        Ok(bhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_stream_writer::BlockStreamWriter;
    use crate::rows::Rows;
    use logstore_core::Field;

    fn sample_part(format_version: u32) -> InMemoryPart {
        let mut bsw = BlockStreamWriter::with_format_version(format_version);
        for sid in 1..=3u128 {
            let mut rows = Rows::new();
            for i in 0..10i64 {
                rows.push(
                    i * 1000 + sid as i64,
                    vec![
                        Field::new("", format!("request {i} done")),
                        Field::new("level", if i % 3 == 0 { "warn" } else { "info" }),
                        Field::new("host", "h1"),
                        Field::new("duration", (i * 7).to_string()),
                    ],
                );
            }
            bsw.write_rows(StreamId(sid), &rows.timestamps, &rows.rows);
        }
        bsw.finalize()
    }

    #[test]
    fn test_open_and_read_back() {
        for version in [0, 1] {
            let part = Part::open("test", sample_part(version)).unwrap();
            assert_eq!(part.header().rows_count, 30);
            assert_eq!(part.header().blocks_count, 3);
            assert_eq!(part.header().format_version, version);

            let bhs = part.all_block_headers().unwrap();
            assert_eq!(bhs.len(), 3);
            let bh = &bhs[1];
            assert_eq!(bh.stream_id, StreamId(2));

            let csh = part.read_columns_header(bh).unwrap();
            assert_eq!(csh.get_const_column("host").unwrap().value, "h1");
            let level = csh.get_column_header("level").unwrap();
            assert_eq!(level.value_type, ValueType::Dict);
            assert!(part.read_bloom_filter(level).unwrap().is_none());

            let msg = csh.get_column_header("").unwrap();
            let values = part.read_values(bh, msg).unwrap().to_strings();
            assert_eq!(values[4], "request 4 done");
            let bloom = part.read_bloom_filter(msg).unwrap().unwrap();
            assert!(bloom.contains("request"));

            let ts = part.read_timestamps(bh).unwrap();
            assert_eq!(ts[0], 2);
            assert_eq!(ts[9], 9002);
        }
    }

    #[test]
    fn test_read_block_data_unmarshals_rows() {
        let part = Part::open("test", sample_part(1)).unwrap();
        let bhs = part.all_block_headers().unwrap();
        let bd = part.read_block_data(&bhs[0]).unwrap();
        let mut rows = Rows::new();
        bd.unmarshal_rows(&mut rows).unwrap();
        assert_eq!(rows.len(), 10);
        assert!(rows.rows[0].contains(&Field::new("level", "warn")));
        assert!(rows.rows[0].contains(&Field::new("", "request 0 done")));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut data = sample_part(1);
        if let Some(b) = data.field_values.last_mut() {
            *b ^= 0xff;
        }
        let err = Part::open("broken", data).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch in part broken"));
    }

    #[test]
    fn test_index_block_header_unmarshal_short() {
        let ibh = IndexBlockHeader {
            stream_id: StreamId(5),
            min_timestamp: -1,
            max_timestamp: 10,
            index_block_offset: 3,
            index_block_size: 100,
            blocks_count: 2,
        };
        let mut buf = Vec::new();
        ibh.marshal(&mut buf);
        let mut src = buf.as_slice();
        assert_eq!(IndexBlockHeader::unmarshal(&mut src).unwrap(), ibh);
        assert!(src.is_empty());

        let mut short = &buf[..buf.len() - 1];
        let before = short.len();
        assert!(IndexBlockHeader::unmarshal(&mut short).is_err());
        assert_eq!(short.len(), before);
    }

    #[test]
    fn test_unmarshal_index_block_headers_order() {
        let ibh = |sid: u128| IndexBlockHeader {
            stream_id: StreamId(sid),
            min_timestamp: 0,
            max_timestamp: 10,
            index_block_offset: 0,
            index_block_size: 10,
            blocks_count: 1,
        };
        let marshal_all = |ibhs: &[IndexBlockHeader]| {
            let mut buf = Vec::new();
            for h in ibhs {
                h.marshal(&mut buf);
            }
            buf
        };

        let sorted = [ibh(1), ibh(1), ibh(7)];
        let buf = marshal_all(&sorted);
        assert_eq!(unmarshal_index_block_headers(&buf).unwrap(), sorted.to_vec());
        assert!(unmarshal_index_block_headers(&buf[..buf.len() - 1]).is_err());

        let err = unmarshal_index_block_headers(&marshal_all(&[ibh(7), ibh(1)])).unwrap_err();
        assert!(err.to_string().contains("index block header #1"), "{err}");
    }
}
