//! Log entries of a single stream in column form.

use crate::block_data::{BlockData, ColumnData};
use crate::consts::{MAX_COLUMNS_PER_BLOCK, MAX_CONST_COLUMN_VALUE_SIZE, MAX_ROWS_PER_BLOCK};
use crate::error::{Result, StorageError};
use crate::rows::{uncompressed_row_size_bytes, Rows};
use crate::timestamps::TimestampsData;
use logstore_core::{Field, StreamId, MSG_FIELD_NAME};
use std::collections::HashMap;
use tracing::warn;

/// Values of a single field across the rows of a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub values: Vec<String>,
}

impl Column {
    fn can_store_in_const_column(&self) -> bool {
        match self.values.split_first() {
            None => true,
            Some((first, rest)) => {
                first.len() <= MAX_CONST_COLUMN_VALUE_SIZE && rest.iter().all(|v| v == first)
            }
        }
    }
}

/// Rows of a single stream sorted by timestamp, stored column by column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    timestamps: Vec<i64>,
    columns: Vec<Column>,
    const_columns: Vec<Field>,
}

impl Block {
    /// Builds a block from rows sorted by timestamp.
    ///
    /// Rows that would push the number of distinct field names over
    /// [`MAX_COLUMNS_PER_BLOCK`] are dropped together with all rows after them.
    ///
    /// # Panics
    ///
    /// Panics if timestamps are unsorted or their count differs from the rows count.
    pub fn from_rows(timestamps: &[i64], rows: &[Vec<Field>]) -> Self {
        if timestamps.len() != rows.len() {
            panic!(
                "BUG: len of timestamps {} and rows {} must be equal",
                timestamps.len(),
                rows.len()
            );
        }
        assert_timestamps_sorted(timestamps);

        let mut column_idxs: HashMap<&str, usize> = HashMap::new();
        let mut rows_processed = 0;
        for fields in rows {
            let new_names = fields
                .iter()
                .filter(|f| !column_idxs.contains_key(f.name.as_str()))
                .count();
            if column_idxs.len() + new_names > MAX_COLUMNS_PER_BLOCK {
                let mut names: Vec<&str> = column_idxs.keys().copied().collect();
                names.sort_unstable();
                warn!(
                    ignored_rows = rows.len() - rows_processed,
                    max_columns = MAX_COLUMNS_PER_BLOCK,
                    columns = ?names,
                    "ignoring rows with too many unique field names in a single block"
                );
                break;
            }
            for f in fields {
                let next = column_idxs.len();
                column_idxs.entry(f.name.as_str()).or_insert(next);
            }
            rows_processed += 1;
        }

        let rows = &rows[..rows_processed];
        let mut columns = vec![Column::default(); column_idxs.len()];
        for (name, &idx) in &column_idxs {
            columns[idx].name = name.to_string();
            columns[idx].values = vec![String::new(); rows.len()];
        }
        for (i, fields) in rows.iter().enumerate() {
            for f in fields {
                let idx = column_idxs[f.name.as_str()];
                columns[idx].values[i] = f.value.clone();
            }
        }

        let mut const_columns = Vec::new();
        columns.retain_mut(|c| {
            if !c.can_store_in_const_column() {
                return true;
            }
            let value = c.values.first().cloned().unwrap_or_default();
            const_columns.push(Field::new(std::mem::take(&mut c.name), value));
            false
        });

        let mut b = Self {
            timestamps: timestamps[..rows_processed].to_vec(),
            columns,
            const_columns,
        };
        b.sort_columns_by_name();
        b
    }

    /// Decodes a packed block.
    pub fn from_block_data(bd: &BlockData) -> Result<Self> {
        if bd.rows_count > MAX_ROWS_PER_BLOCK {
            return Err(StorageError::BlockHeader(format!(
                "too many entries found in the block: {}; mustn't exceed {MAX_ROWS_PER_BLOCK}",
                bd.rows_count
            )));
        }
        let rows_count = bd.rows_count as usize;
        let timestamps = bd.timestamps_data.decode(rows_count)?;
        let mut columns = Vec::with_capacity(bd.columns_data.len());
        for cd in &bd.columns_data {
            columns.push(Column {
                name: cd.name.clone(),
                values: cd.decode_values(rows_count)?.to_strings(),
            });
        }
        Ok(Self {
            timestamps,
            columns,
            const_columns: bd.const_columns.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn const_columns(&self) -> &[Field] {
        &self.const_columns
    }

    /// Returns the size of the block rows in the `timestamp name=value ...` text form.
    pub fn uncompressed_size_bytes(&self) -> u64 {
        let rows_count = self.len() as u64;
        let name_len = |name: &str| {
            if name.is_empty() {
                MSG_FIELD_NAME.len() as u64
            } else {
                name.len() as u64
            }
        };

        let mut n = uncompressed_row_size_bytes(&[]) * rows_count;
        for c in &self.columns {
            let nl = name_len(&c.name);
            for v in c.values.iter().filter(|v| !v.is_empty()) {
                n += nl + 2 + v.len() as u64;
            }
        }
        for cc in &self.const_columns {
            n += rows_count * (2 + name_len(&cc.name) + cc.value.len() as u64);
        }
        n
    }

    /// Appends the rows of the block to `dst`. Empty values are skipped.
    pub fn append_rows_to(&self, dst: &mut Rows) {
        for (i, &ts) in self.timestamps.iter().enumerate() {
            let mut fields = self.const_columns.clone();
            for c in &self.columns {
                let v = &c.values[i];
                if !v.is_empty() {
                    fields.push(Field::new(c.name.clone(), v.clone()));
                }
            }
            dst.push(ts, fields);
        }
    }

    /// Encodes the block for the given stream.
    pub fn to_block_data(&self, stream_id: StreamId) -> BlockData {
        self.assert_valid();
        BlockData {
            stream_id,
            uncompressed_size_bytes: self.uncompressed_size_bytes(),
            rows_count: self.len() as u64,
            timestamps_data: TimestampsData::encode(&self.timestamps),
            columns_data: self
                .columns
                .iter()
                .map(|c| ColumnData::encode(&c.name, &c.values))
                .collect(),
            const_columns: self.const_columns.clone(),
        }
    }

    fn assert_valid(&self) {
        assert_timestamps_sorted(&self.timestamps);
        for c in &self.columns {
            if c.values.len() != self.timestamps.len() {
                panic!(
                    "BUG: unexpected number of values for column {:?}: got {}; want {}",
                    c.name,
                    c.values.len(),
                    self.timestamps.len()
                );
            }
        }
    }

    fn sort_columns_by_name(&mut self) {
        let total = self.columns.len() + self.const_columns.len();
        if total > MAX_COLUMNS_PER_BLOCK {
            let names: Vec<&str> = self
                .columns
                .iter()
                .map(|c| c.name.as_str())
                .chain(self.const_columns.iter().map(|f| f.name.as_str()))
                .collect();
            panic!(
                "BUG: too big number of columns detected in the block: {total}; the number of columns mustn't exceed {MAX_COLUMNS_PER_BLOCK}; columns: {names:?}"
            );
        }
        self.columns.sort_by(|a, b| a.name.cmp(&b.name));
        self.const_columns.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

fn assert_timestamps_sorted(timestamps: &[i64]) {
    for pair in timestamps.windows(2) {
        if pair[0] > pair[1] {
            panic!(
                "BUG: log entries must be sorted by timestamp; got the previous entry with bigger timestamp {} than the current entry with timestamp {}",
                pair[0], pair[1]
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[(&str, &str)]) -> Vec<Field> {
        fields.iter().map(|(n, v)| Field::new(*n, *v)).collect()
    }

    #[test]
    fn test_from_rows_detects_const_columns() {
        let rows = vec![
            row(&[("host", "h1"), ("", "started"), ("level", "info")]),
            row(&[("host", "h1"), ("", "stopped")]),
        ];
        let b = Block::from_rows(&[1, 2], &rows);
        assert_eq!(b.const_columns(), &[Field::new("host", "h1")]);
        let names: Vec<&str> = b.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["", "level"]);
        assert_eq!(b.columns()[1].values, vec!["info".to_string(), String::new()]);
    }

    #[test]
    fn test_append_rows_roundtrip() {
        let rows = vec![
            row(&[("a", "1"), ("b", "x")]),
            row(&[("a", "2")]),
            row(&[("a", "3"), ("c", "y")]),
        ];
        let b = Block::from_rows(&[10, 20, 30], &rows);
        let mut out = Rows::new();
        b.append_rows_to(&mut out);
        assert_eq!(out.timestamps, vec![10, 20, 30]);
        assert_eq!(out.rows, rows);

        let bd = b.to_block_data(StreamId(7));
        assert_eq!(bd.rows_count, 3);
        assert_eq!(bd.uncompressed_size_bytes, b.uncompressed_size_bytes());
        assert_eq!(Block::from_block_data(&bd).unwrap(), b);
    }

    #[test]
    fn test_too_many_columns_truncates_rows() {
        let wide: Vec<Field> = (0..MAX_COLUMNS_PER_BLOCK)
            .map(|i| Field::new(format!("f{i}"), "v"))
            .collect();
        let rows = vec![wide, row(&[("extra", "x")]), row(&[("f0", "v")])];
        let b = Block::from_rows(&[1, 2, 3], &rows);
        assert_eq!(b.len(), 1);
        assert_eq!(b.const_columns().len(), MAX_COLUMNS_PER_BLOCK);
    }

    #[test]
    fn test_uncompressed_size() {
        let b = Block::from_rows(&[1], &[row(&[("", "hello")])]);
        let want = uncompressed_row_size_bytes(&[Field::new("", "hello")]);
        assert_eq!(b.uncompressed_size_bytes(), want);
    }

    #[test]
    #[should_panic(expected = "BUG: log entries must be sorted by timestamp")]
    fn test_unsorted_timestamps_panic() {
        Block::from_rows(&[2, 1], &[row(&[("a", "b")]), row(&[("a", "c")])]);
    }
}
