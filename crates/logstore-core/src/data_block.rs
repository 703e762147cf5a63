//! Columnar block used for transferring query results between processes.
//!
//! Wire format:
//!
//! ```text
//! varint(rows_count) varint(columns_count)
//! per column:
//!   bytes(name)
//!   0x00 bytes(value)                 -- const column
//!   0x01 bytes(value) * rows_count    -- regular column
//! ```

use crate::encoding::{marshal_bytes, marshal_var_u64, unmarshal_string, unmarshal_u8, unmarshal_var_u64};
use crate::error::{Error, Result};
use crate::field::TIME_FIELD_NAME;
use crate::values::try_parse_timestamp_rfc3339_nano;

const VALUES_TYPE_CONST: u8 = 0;
const VALUES_TYPE_REGULAR: u8 = 1;

/// Upper bound on rows accepted by `DataBlock::unmarshal`.
pub const MAX_DATA_BLOCK_ROWS: u64 = 1 << 24;

/// A single named column of a [`DataBlock`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockColumn {
    pub name: String,
    pub values: Vec<String>,
}

impl BlockColumn {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    fn is_const(&self) -> bool {
        match self.values.split_first() {
            Some((first, rest)) => rest.iter().all(|v| v == first),
            None => false,
        }
    }
}

/// A block of rows stored column by column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBlock {
    pub columns: Vec<BlockColumn>,
}

impl DataBlock {
    pub fn new(columns: Vec<BlockColumn>) -> Self {
        Self { columns }
    }

    pub fn reset(&mut self) {
        self.columns.clear();
    }

    pub fn rows_count(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    pub fn get_column_by_name(&self, name: &str) -> Option<&BlockColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns parsed `_time` values, or `None` if the column is missing or malformed.
    pub fn get_timestamps(&self) -> Option<Vec<i64>> {
        let c = self.get_column_by_name(TIME_FIELD_NAME)?;
        c.values
            .iter()
            .map(|v| try_parse_timestamp_rfc3339_nano(v))
            .collect()
    }

    /// Appends the marshaled block to `dst`.
    ///
    /// # Panics
    ///
    /// Panics if the columns have different numbers of values.
    pub fn marshal(&self, dst: &mut Vec<u8>) {
        let rows_count = self.rows_count();
        marshal_var_u64(dst, rows_count as u64);
        marshal_var_u64(dst, self.columns.len() as u64);
        for c in &self.columns {
            marshal_bytes(dst, c.name.as_bytes());
            if c.values.len() != rows_count {
                panic!(
                    "BUG: the column {:?} must contain {} values; got {} values",
                    c.name,
                    rows_count,
                    c.values.len()
                );
            }
            if c.is_const() {
                dst.push(VALUES_TYPE_CONST);
                marshal_bytes(dst, c.values[0].as_bytes());
            } else {
                dst.push(VALUES_TYPE_REGULAR);
                for v in &c.values {
                    marshal_bytes(dst, v.as_bytes());
                }
            }
        }
    }

    /// Parses a block from `src`, advancing it on success.
    pub fn unmarshal(src: &mut &[u8]) -> Result<Self> {
        let mut cursor = *src;

        let rows_count = unmarshal_var_u64(&mut cursor)
            .map_err(|err| Error::decode(format!("cannot unmarshal the number of rows: {err}")))?;
        if rows_count > MAX_DATA_BLOCK_ROWS {
            return Err(Error::decode(format!(
                "too big number of rows in block: {rows_count}; mustn't exceed {MAX_DATA_BLOCK_ROWS}"
            )));
        }
        let rows_count = rows_count as usize;

        let columns_count = unmarshal_var_u64(&mut cursor).map_err(|err| {
            Error::decode(format!("cannot unmarshal the number of columns: {err}"))
        })?;
        if columns_count > cursor.len() as u64 {
            return Err(Error::decode(format!(
                "too big number of columns in block: {columns_count}; only {} bytes left",
                cursor.len()
            )));
        }

        let mut columns = Vec::with_capacity(columns_count as usize);
        for i in 0..columns_count {
            let name = unmarshal_string(&mut cursor)
                .map_err(|err| Error::decode(format!("cannot unmarshal column name: {err}")))?;
            let values_type = unmarshal_u8(&mut cursor)
                .map_err(|_| Error::decode(format!("missing value type for column {name:?}")))?;
            let values = match values_type {
                VALUES_TYPE_CONST => {
                    let v = unmarshal_string(&mut cursor).map_err(|err| {
                        Error::decode(format!(
                            "cannot unmarshal const value for column #{i} with name {name:?}: {err}"
                        ))
                    })?;
                    vec![v; rows_count]
                }
                VALUES_TYPE_REGULAR => {
                    if rows_count > cursor.len() {
                        return Err(Error::decode(format!(
                            "cannot unmarshal {rows_count} values for column {name:?} from {} bytes",
                            cursor.len()
                        )));
                    }
                    let mut values = Vec::with_capacity(rows_count);
                    for j in 0..rows_count {
                        let v = unmarshal_string(&mut cursor).map_err(|err| {
                            Error::decode(format!(
                                "cannot unmarshal value #{j} out of {rows_count} values for column #{i} with name {name:?}: {err}"
                            ))
                        })?;
                        values.push(v);
                    }
                    values
                }
                other => {
                    return Err(Error::decode(format!("unexpected valuesType={other}")));
                }
            };
            columns.push(BlockColumn { name, values });
        }

        *src = cursor;
        Ok(Self { columns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_marshal_unmarshal() {
        let db = DataBlock::new(vec![
            BlockColumn::new("_time", strings(&["2024-01-01T00:00:00Z", "2024-01-01T00:00:01Z"])),
            BlockColumn::new("level", strings(&["info", "info"])),
            BlockColumn::new("_msg", strings(&["started", "stopped"])),
        ]);
        let mut buf = Vec::new();
        db.marshal(&mut buf);

        let mut src = buf.as_slice();
        let decoded = DataBlock::unmarshal(&mut src).unwrap();
        assert!(src.is_empty());
        assert_eq!(decoded, db);
        assert_eq!(decoded.rows_count(), 2);
        assert_eq!(decoded.get_timestamps().unwrap().len(), 2);
    }

    #[test]
    fn test_const_column_is_compact() {
        let db = DataBlock::new(vec![BlockColumn::new("a", vec!["x".to_string(); 100])]);
        let mut buf = Vec::new();
        db.marshal(&mut buf);
        // rows, columns, name, type, value
        assert_eq!(buf.len(), 1 + 1 + 2 + 1 + 2);
    }

    #[test]
    fn test_unmarshal_errors() {
        let db = DataBlock::new(vec![BlockColumn::new("a", strings(&["1", "2"]))]);
        let mut buf = Vec::new();
        db.marshal(&mut buf);
        for n in 0..buf.len() {
            let mut src = &buf[..n];
            assert!(DataBlock::unmarshal(&mut src).is_err(), "n={n}");
            assert_eq!(src.len(), n);
        }

        let mut bad = buf.clone();
        bad[4] = 7;
        let err = DataBlock::unmarshal(&mut bad.as_slice()).unwrap_err();
        assert!(err.to_string().contains("unexpected valuesType=7"));
    }

    #[test]
    #[should_panic(expected = "BUG: the column")]
    fn test_marshal_mismatched_columns_panics() {
        let db = DataBlock::new(vec![
            BlockColumn::new("a", strings(&["1", "2"])),
            BlockColumn::new("b", strings(&["1"])),
        ]);
        db.marshal(&mut Vec::new());
    }

    #[test]
    fn test_get_timestamps_invalid() {
        let db = DataBlock::new(vec![BlockColumn::new("_time", strings(&["not a time"]))]);
        assert!(db.get_timestamps().is_none());
        assert!(DataBlock::default().get_timestamps().is_none());
    }
}
