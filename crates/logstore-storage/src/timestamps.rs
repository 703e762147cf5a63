//! Timestamp column encoding.
//!
//! Rows in a block are sorted by timestamp, so the deltas between adjacent
//! timestamps are small and non-negative. They are written as zigzag varints
//! starting from `min_timestamp` and wrapped in a bytes block.

use crate::consts::MAX_TIMESTAMPS_BLOCK_SIZE;
use crate::error::{Result, StorageError};
use crate::strings_block::{marshal_bytes_block, unmarshal_bytes_block};
use logstore_core::encoding::{marshal_var_i64, unmarshal_i64, unmarshal_var_i64};

/// Encoding used for a timestamps block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TimestampsMarshalType {
    /// Big-endian i64 per row.
    #[default]
    Plain = 0,
    /// Zigzag varint deltas, the first one relative to `min_timestamp`.
    DeltaVarint = 1,
}

impl TimestampsMarshalType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(TimestampsMarshalType::Plain),
            1 => Some(TimestampsMarshalType::DeltaVarint),
            _ => None,
        }
    }
}

/// Encoded timestamps of a block together with their bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampsData {
    pub data: Vec<u8>,
    pub marshal_type: TimestampsMarshalType,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
}

impl TimestampsData {
    pub fn encode(timestamps: &[i64]) -> Self {
        let min_timestamp = timestamps.iter().copied().min().unwrap_or(0);
        let max_timestamp = timestamps.iter().copied().max().unwrap_or(0);

        let mut raw = Vec::new();
        let marshal_type = if timestamps.len() > 1 {
            let mut prev = min_timestamp;
            for &ts in timestamps {
                marshal_var_i64(&mut raw, ts.wrapping_sub(prev));
                prev = ts;
            }
            TimestampsMarshalType::DeltaVarint
        } else {
            for &ts in timestamps {
                raw.extend_from_slice(&ts.to_be_bytes());
            }
            TimestampsMarshalType::Plain
        };

        let mut data = Vec::new();
        marshal_bytes_block(&mut data, &raw);
        Self {
            data,
            marshal_type,
            min_timestamp,
            max_timestamp,
        }
    }

    /// Decodes `rows_count` timestamps and verifies them against the stored bounds.
    pub fn decode(&self, rows_count: usize) -> Result<Vec<i64>> {
        let mut src = self.data.as_slice();
        let raw = unmarshal_bytes_block(&mut src, MAX_TIMESTAMPS_BLOCK_SIZE)?;
        if !src.is_empty() {
            return Err(StorageError::BlockHeader(format!(
                "unexpected tail after timestamps block: {} bytes",
                src.len()
            )));
        }
        let mut raw = raw.as_slice();
        let mut timestamps = Vec::with_capacity(rows_count.min(raw.len()));
        match self.marshal_type {
            TimestampsMarshalType::Plain => {
                for _ in 0..rows_count {
                    timestamps.push(unmarshal_i64(&mut raw)?);
                }
            }
            TimestampsMarshalType::DeltaVarint => {
                let mut prev = self.min_timestamp;
                for _ in 0..rows_count {
                    prev = prev.wrapping_add(unmarshal_var_i64(&mut raw)?);
                    timestamps.push(prev);
                }
            }
        }
        if !raw.is_empty() {
            return Err(StorageError::BlockHeader(format!(
                "unexpected tail after {rows_count} timestamps: {} bytes",
                raw.len()
            )));
        }
        let min = timestamps.iter().copied().min().unwrap_or(0);
        let max = timestamps.iter().copied().max().unwrap_or(0);
        if rows_count > 0 && (min != self.min_timestamp || max != self.max_timestamp) {
            return Err(StorageError::BlockHeader(format!(
                "timestamps range [{min}..{max}] doesn't match the header range [{}..{}]",
                self.min_timestamp, self.max_timestamp
            )));
        }
        Ok(timestamps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_encoding() {
        let ts = vec![100, 150, 150, 300, 1_000_000];
        let td = TimestampsData::encode(&ts);
        assert_eq!(td.marshal_type, TimestampsMarshalType::DeltaVarint);
        assert_eq!((td.min_timestamp, td.max_timestamp), (100, 1_000_000));
        assert_eq!(td.decode(ts.len()).unwrap(), ts);
    }

    #[test]
    fn test_single_timestamp() {
        let td = TimestampsData::encode(&[-42]);
        assert_eq!(td.marshal_type, TimestampsMarshalType::Plain);
        assert_eq!(td.decode(1).unwrap(), vec![-42]);
    }

    #[test]
    fn test_unsorted_timestamps() {
        let ts = vec![300, 100, 200];
        let td = TimestampsData::encode(&ts);
        assert_eq!(td.decode(3).unwrap(), ts);
    }

    #[test]
    fn test_wrong_rows_count() {
        let td = TimestampsData::encode(&[1, 2, 3]);
        assert!(td.decode(2).is_err());
        assert!(td.decode(4).is_err());
    }

    #[test]
    fn test_bounds_mismatch() {
        let mut td = TimestampsData::encode(&[1, 2, 3]);
        td.max_timestamp = 10;
        assert!(td.decode(3).is_err());
    }
}
