//! Packed form of a block.
//!
//! [`BlockData`] holds a block exactly as it is laid out in a part: encoded
//! timestamps, per-column values and bloom filter blobs, plus const columns.
//! Merges copy it between parts without decoding when no rows must change.

use crate::consts::{MAX_ROWS_PER_BLOCK, MAX_VALUES_BLOCK_SIZE};
use crate::error::{Result, StorageError};
use crate::rows::Rows;
use crate::strings_block::{marshal_strings_block, unmarshal_strings_block};
use crate::timestamps::TimestampsData;
use crate::bloom::TokenBloomFilter;
use crate::values_encoder::{EncodedValues, ValueType, ValuesDict, ValuesEncoder};
use logstore_core::{Field, StreamId};

/// Encoded values of a single column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnData {
    pub name: String,
    pub value_type: ValueType,
    pub min_value: u64,
    pub max_value: u64,
    pub values_dict: ValuesDict,
    pub values_data: Vec<u8>,
    /// Empty for dict columns.
    pub bloom_filter_data: Vec<u8>,
}

impl ColumnData {
    /// Encodes `values` with the narrowest fitting value type.
    pub fn encode(name: &str, values: &[String]) -> Self {
        let ec = ValuesEncoder::encode(values);
        let mut values_data = Vec::new();
        let raw = ec.raw_values();
        marshal_strings_block(&mut values_data, raw.iter().map(|v| v.as_slice()));

        let value_type = ec.value_type();
        let bloom_filter_data = if value_type == ValueType::Dict {
            Vec::new()
        } else {
            TokenBloomFilter::from_values(values.iter().map(|v| v.as_str())).to_bytes()
        };

        Self {
            name: name.to_string(),
            value_type,
            min_value: ec.min_value,
            max_value: ec.max_value,
            values_dict: ec.dict().cloned().unwrap_or_default(),
            values_data,
            bloom_filter_data,
        }
    }

    pub fn decode_values(&self, rows_count: usize) -> Result<EncodedValues> {
        decode_values_block(&self.values_data, self.value_type, &self.values_dict, rows_count)
    }
}

/// Decodes a values block holding exactly `rows_count` values of the given type.
pub fn decode_values_block(
    data: &[u8],
    value_type: ValueType,
    dict: &ValuesDict,
    rows_count: usize,
) -> Result<EncodedValues> {
    let mut src = data;
    let raw = unmarshal_strings_block(&mut src, rows_count, MAX_VALUES_BLOCK_SIZE)?;
    if !src.is_empty() {
        return Err(StorageError::Compression(format!(
            "unexpected tail after values block: {} bytes",
            src.len()
        )));
    }
    EncodedValues::from_raw(value_type, dict, &raw)
}

/// A block in its packed on-disk form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockData {
    pub stream_id: StreamId,
    pub uncompressed_size_bytes: u64,
    pub rows_count: u64,
    pub timestamps_data: TimestampsData,
    pub columns_data: Vec<ColumnData>,
    pub const_columns: Vec<Field>,
}

impl BlockData {
    pub fn min_timestamp(&self) -> i64 {
        self.timestamps_data.min_timestamp
    }

    pub fn max_timestamp(&self) -> i64 {
        self.timestamps_data.max_timestamp
    }

    /// Appends the rows of the block to `dst`.
    ///
    /// Const columns come first in every row; empty values are skipped.
    pub fn unmarshal_rows(&self, dst: &mut Rows) -> Result<()> {
        if self.rows_count > MAX_ROWS_PER_BLOCK {
            return Err(StorageError::BlockHeader(format!(
                "too many entries found in the block: {}; mustn't exceed {MAX_ROWS_PER_BLOCK}",
                self.rows_count
            )));
        }
        let rows_count = self.rows_count as usize;
        let timestamps = self.timestamps_data.decode(rows_count)?;

        let mut columns = Vec::with_capacity(self.columns_data.len());
        for (i, cd) in self.columns_data.iter().enumerate() {
            let values = cd.decode_values(rows_count).map_err(|err| {
                StorageError::ColumnsHeader(format!("cannot unmarshal column #{i} {:?}: {err}", cd.name))
            })?;
            columns.push((cd.name.as_str(), values.to_strings()));
        }

        for (i, ts) in timestamps.into_iter().enumerate() {
            let mut fields = self.const_columns.clone();
            for (name, values) in &columns {
                let v = &values[i];
                if !v.is_empty() {
                    fields.push(Field::new(*name, v.clone()));
                }
            }
            dst.push(ts, fields);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_column_data_types() {
        let cases: &[(&[&str], ValueType)] = &[
            (&["info", "warn", "info"], ValueType::Dict),
            (&["1", "200", "3"], ValueType::Uint8),
            (&["1.5", "2.25"], ValueType::Float64),
        ];
        for (values, vt) in cases {
            let values = strings(values);
            let cd = ColumnData::encode("x", &values);
            assert_eq!(cd.value_type, *vt);
            assert_eq!(cd.bloom_filter_data.is_empty(), *vt == ValueType::Dict);
            assert_eq!(cd.decode_values(values.len()).unwrap().to_strings(), values);
        }
    }

    #[test]
    fn test_decode_values_wrong_count() {
        let cd = ColumnData::encode("x", &strings(&["a", "b", "c"]));
        assert!(cd.decode_values(2).is_err());
        assert!(cd.decode_values(4).is_err());
    }

    #[test]
    fn test_unmarshal_rows_skips_empty_values() {
        let ts = [10, 20];
        let bd = BlockData {
            stream_id: StreamId(1),
            uncompressed_size_bytes: 0,
            rows_count: 2,
            timestamps_data: TimestampsData::encode(&ts),
            columns_data: vec![ColumnData::encode("a", &strings(&["x", ""]))],
            const_columns: vec![Field::new("host", "h1")],
        };
        let mut rows = Rows::new();
        bd.unmarshal_rows(&mut rows).unwrap();
        assert_eq!(rows.timestamps, vec![10, 20]);
        assert_eq!(rows.rows[0], vec![Field::new("host", "h1"), Field::new("a", "x")]);
        assert_eq!(rows.rows[1], vec![Field::new("host", "h1")]);
    }
}
