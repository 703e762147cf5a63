//! Columnar query results.
//!
//! A [`BlockResult`] is the unit of data flowing through the pipes. It holds
//! `rows_len` rows as a list of named columns. A column keeps the cheapest
//! representation it was created with and decodes display strings on demand:
//!
//! | Kind | Source | Decoded strings |
//! |------|--------|-----------------|
//! | `Const` | const block columns, `_stream`, `_stream_id`, missing fields | never materialized per row unless asked |
//! | `Time` | the block timestamps | RFC3339 with nanoseconds |
//! | `Encoded` | typed values read from a part | formatted lazily, adjacent duplicates formatted once |
//! | `Strings` | values synthesized by pipes | as is |
//!
//! ## Construction
//!
//! - [`BlockResult::from_block_search`]: rows of a block selected by a bitmap,
//!   restricted to the needed fields
//! - [`BlockResult::from_filtered`]: rows of another result selected by a bitmap
//! - [`BlockResult::from_result_columns`]: columns built by a pipe
//!
//! A result owns all its data. Pipes that keep rows across blocks simply
//! `clone()` it.

use crate::bitmap::Bitmap;
use crate::block_search::{BlockColumnRef, BlockSearch};
use crate::bucket::Bucket;
use crate::fields_set::{match_any_pattern, FieldsSet};
use logstore_core::values::{
    float64_string, ipv4_string, timestamp_iso8601_string, timestamp_rfc3339nano_string, try_parse_number,
};
use logstore_core::{BlockColumn, DataBlock, STREAM_FIELD_NAME, STREAM_ID_FIELD_NAME, TIME_FIELD_NAME};
use logstore_storage::{EncodedValues, ValueType};
use std::borrow::Cow;
use std::cell::OnceCell;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum ColumnData {
    Const(String),
    Time(Vec<i64>),
    Encoded {
        values: Arc<EncodedValues>,
        min_value: u64,
        max_value: u64,
    },
    Strings(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct BlockResultColumn {
    name: String,
    data: ColumnData,
    rows_len: usize,
    decoded: OnceCell<Vec<String>>,
}

impl BlockResultColumn {
    fn with_data(name: impl Into<String>, data: ColumnData, rows_len: usize) -> Self {
        Self {
            name: name.into(),
            data,
            rows_len,
            decoded: OnceCell::new(),
        }
    }

    pub fn new_const(name: impl Into<String>, value: impl Into<String>, rows_len: usize) -> Self {
        Self::with_data(name, ColumnData::Const(value.into()), rows_len)
    }

    pub fn new_time(name: impl Into<String>, timestamps: Vec<i64>) -> Self {
        let rows_len = timestamps.len();
        Self::with_data(name, ColumnData::Time(timestamps), rows_len)
    }

    pub fn new_encoded(name: impl Into<String>, values: Arc<EncodedValues>, min_value: u64, max_value: u64) -> Self {
        let rows_len = values.len();
        Self::with_data(
            name,
            ColumnData::Encoded {
                values,
                min_value,
                max_value,
            },
            rows_len,
        )
    }

    /// Creates a column from plain values. Uniform non-empty input becomes a const column.
    pub fn new_strings(name: impl Into<String>, values: Vec<String>) -> Self {
        let rows_len = values.len();
        if let Some((first, rest)) = values.split_first() {
            if rest.iter().all(|v| v == first) {
                let first = first.clone();
                return Self::new_const(name, first, rows_len);
            }
        }
        Self::with_data(name, ColumnData::Strings(values), rows_len)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rows_len(&self) -> usize {
        self.rows_len
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn is_const(&self) -> bool {
        matches!(self.data, ColumnData::Const(_))
    }

    pub fn is_time(&self) -> bool {
        matches!(self.data, ColumnData::Time(_))
    }

    pub fn const_value(&self) -> Option<&str> {
        match &self.data {
            ColumnData::Const(v) => Some(v),
            _ => None,
        }
    }

    pub fn timestamps(&self) -> Option<&[i64]> {
        match &self.data {
            ColumnData::Time(ts) => Some(ts),
            _ => None,
        }
    }

    /// Returns the stored value type of columns read from a part.
    pub fn value_type(&self) -> Option<ValueType> {
        match &self.data {
            ColumnData::Encoded { values, .. } => Some(values.value_type()),
            _ => None,
        }
    }

    pub fn encoded(&self) -> Option<&EncodedValues> {
        match &self.data {
            ColumnData::Encoded { values, .. } => Some(values),
            _ => None,
        }
    }

    /// Returns all values as display strings.
    pub fn values(&self) -> &[String] {
        if let ColumnData::Strings(v) = &self.data {
            return v;
        }
        self.decoded.get_or_init(|| match &self.data {
            ColumnData::Const(v) => vec![v.clone(); self.rows_len],
            ColumnData::Time(ts) => {
                let mut out: Vec<String> = Vec::with_capacity(ts.len());
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 && ts[i - 1] == *t {
                        let prev = out[i - 1].clone();
                        out.push(prev);
                    } else {
                        out.push(timestamp_rfc3339nano_string(*t));
                    }
                }
                out
            }
            ColumnData::Encoded { values, .. } => values.to_strings(),
            ColumnData::Strings(v) => v.clone(),
        })
    }

    pub fn value(&self, i: usize) -> &str {
        match &self.data {
            ColumnData::Const(v) => v,
            ColumnData::Strings(v) => &v[i],
            _ => &self.values()[i],
        }
    }

    /// Returns the numeric value of row `i`, if it has one.
    pub fn numeric_value(&self, i: usize) -> Option<f64> {
        match &self.data {
            ColumnData::Encoded { values, .. } => match values.numeric_value(i) {
                Some(f) => Some(f),
                None => match values.value_type() {
                    ValueType::String | ValueType::Dict => try_parse_number(self.value(i)),
                    _ => None,
                },
            },
            ColumnData::Time(_) => None,
            _ => try_parse_number(self.value(i)),
        }
    }

    /// Returns a copy of the column renamed to `name`.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        let mut c = self.clone();
        c.name = name.into();
        c
    }

    /// Returns a column with only the given rows.
    pub fn select(&self, rows: &[usize]) -> Self {
        let data = match &self.data {
            ColumnData::Const(v) => ColumnData::Const(v.clone()),
            ColumnData::Time(ts) => ColumnData::Time(rows.iter().map(|&i| ts[i]).collect()),
            ColumnData::Strings(v) => ColumnData::Strings(rows.iter().map(|&i| v[i].clone()).collect()),
            ColumnData::Encoded {
                values,
                min_value,
                max_value,
            } => match self.decoded.get() {
                Some(decoded) => ColumnData::Strings(rows.iter().map(|&i| decoded[i].clone()).collect()),
                None => ColumnData::Encoded {
                    values: Arc::new(values.select(rows)),
                    min_value: *min_value,
                    max_value: *max_value,
                },
            },
        };
        Self::with_data(self.name.clone(), data, rows.len())
    }

    /// Returns rows `start..end` of the column.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.rows_len);
        let start = start.min(end);
        let data = match &self.data {
            ColumnData::Const(v) => ColumnData::Const(v.clone()),
            ColumnData::Time(ts) => ColumnData::Time(ts[start..end].to_vec()),
            ColumnData::Strings(v) => ColumnData::Strings(v[start..end].to_vec()),
            ColumnData::Encoded {
                values,
                min_value,
                max_value,
            } => match self.decoded.get() {
                Some(decoded) => ColumnData::Strings(decoded[start..end].to_vec()),
                None => ColumnData::Encoded {
                    values: Arc::new(values.slice(start, end)),
                    min_value: *min_value,
                    max_value: *max_value,
                },
            },
        };
        Self::with_data(self.name.clone(), data, end - start)
    }

    /// Returns the column with every value rounded down to its bucket.
    ///
    /// When the column bounds fall into a single bucket the result is a const column.
    pub fn bucketed(&self, bucket: &Bucket) -> Self {
        let name = self.name.clone();
        let rows_len = self.rows_len;
        match &self.data {
            ColumnData::Const(v) => Self::new_const(name, bucket.bucketed_string(v), rows_len),
            ColumnData::Time(ts) => {
                let (Some(&min), Some(&max)) = (ts.iter().min(), ts.iter().max()) else {
                    return self.clone();
                };
                let lo = bucket.truncate_timestamp(min);
                if lo == bucket.truncate_timestamp(max) {
                    return Self::new_const(name, timestamp_rfc3339nano_string(lo), rows_len);
                }
                let values = map_dedup(ts, |t| timestamp_rfc3339nano_string(bucket.truncate_timestamp(t)));
                Self::with_data(name, ColumnData::Strings(values), rows_len)
            }
            ColumnData::Strings(v) => {
                let values = map_dedup_str(v, |s| bucket.bucketed_string(s));
                Self::new_strings(name, values)
            }
            ColumnData::Encoded {
                values,
                min_value,
                max_value,
            } => {
                let (min, max) = (*min_value, *max_value);
                let values = match values.as_ref() {
                    EncodedValues::Strings(a) => map_dedup_str(a, |s| bucket.bucketed_string(s)),
                    EncodedValues::Dict { dict, indexes } => {
                        let bucketed: Vec<String> = dict.values.iter().map(|v| bucket.bucketed_string(v)).collect();
                        indexes.iter().map(|&i| bucketed[i as usize].clone()).collect()
                    }
                    EncodedValues::Uint8(a) => bucket_uints(bucket, min, max, a.iter().map(|&n| n as u64), rows_len),
                    EncodedValues::Uint16(a) => bucket_uints(bucket, min, max, a.iter().map(|&n| n as u64), rows_len),
                    EncodedValues::Uint32(a) => bucket_uints(bucket, min, max, a.iter().map(|&n| n as u64), rows_len),
                    EncodedValues::Uint64(a) => bucket_uints(bucket, min, max, a.iter().copied(), rows_len),
                    EncodedValues::Int64(a) => {
                        let lo = bucket.truncate_int64(min as i64);
                        if lo == bucket.truncate_int64(max as i64) {
                            vec![lo.to_string(); rows_len]
                        } else {
                            map_dedup(a, |n| bucket.truncate_int64(n).to_string())
                        }
                    }
                    EncodedValues::Float64(a) => {
                        let lo = bucket.truncate_float64(f64::from_bits(min));
                        if lo == bucket.truncate_float64(f64::from_bits(max)) {
                            vec![float64_string(lo); rows_len]
                        } else {
                            map_dedup(a, |f| float64_string(bucket.truncate_float64(f)))
                        }
                    }
                    EncodedValues::IPv4(a) => {
                        let lo = bucket.truncate_ipv4(min as u32);
                        if lo == bucket.truncate_ipv4(max as u32) {
                            vec![ipv4_string(lo); rows_len]
                        } else {
                            map_dedup(a, |ip| ipv4_string(bucket.truncate_ipv4(ip)))
                        }
                    }
                    EncodedValues::TimestampIso8601(a) => {
                        let lo = bucket.truncate_timestamp(min as i64);
                        if lo == bucket.truncate_timestamp(max as i64) {
                            vec![timestamp_iso8601_string(lo); rows_len]
                        } else {
                            map_dedup(a, |t| timestamp_iso8601_string(bucket.truncate_timestamp(t)))
                        }
                    }
                };
                Self::new_strings(name, values)
            }
        }
    }

    fn size_bytes(&self) -> usize {
        let data = match &self.data {
            ColumnData::Const(v) => v.len(),
            ColumnData::Time(ts) => ts.len() * 8,
            ColumnData::Encoded { values, .. } => values.len() * 8,
            ColumnData::Strings(v) => v.iter().map(|s| s.len() + std::mem::size_of::<String>()).sum(),
        };
        self.name.len() + data
    }
}

fn map_dedup<T: Copy + PartialEq>(a: &[T], f: impl Fn(T) -> String) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(a.len());
    for (i, v) in a.iter().enumerate() {
        if i > 0 && a[i - 1] == *v {
            let prev = out[i - 1].clone();
            out.push(prev);
        } else {
            out.push(f(*v));
        }
    }
    out
}

fn map_dedup_str(a: &[String], f: impl Fn(&str) -> String) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(a.len());
    for (i, v) in a.iter().enumerate() {
        if i > 0 && a[i - 1] == *v {
            let prev = out[i - 1].clone();
            out.push(prev);
        } else {
            out.push(f(v));
        }
    }
    out
}

fn bucket_uints(bucket: &Bucket, min: u64, max: u64, values: impl Iterator<Item = u64>, rows_len: usize) -> Vec<String> {
    let lo = bucket.truncate_uint64(min);
    if lo == bucket.truncate_uint64(max) {
        return vec![lo.to_string(); rows_len];
    }
    let values: Vec<u64> = values.collect();
    map_dedup(&values, |n| bucket.truncate_uint64(n).to_string())
}

/// Rows of a block as named columns.
#[derive(Debug, Clone, Default)]
pub struct BlockResult {
    rows_len: usize,
    columns: Vec<BlockResultColumn>,
}

impl BlockResult {
    pub fn new(rows_len: usize) -> Self {
        Self {
            rows_len,
            columns: Vec::new(),
        }
    }

    /// Builds the result for the rows of `bs` selected by `bm`, loading only the `needed` fields.
    ///
    /// Fields missing in the block become empty const columns. If `_stream` is
    /// requested by name but the stream tags are unknown, the block yields no rows.
    pub fn from_block_search(bs: &BlockSearch<'_>, bm: &Bitmap, needed: &FieldsSet) -> Self {
        let rows = bm.set_indexes();
        if rows.is_empty() {
            return Self::new(0);
        }
        let stream_tags = bs.stream_tags();
        if stream_tags.is_none() && !needed.is_all() && needed.contains(STREAM_FIELD_NAME) {
            return Self::new(0);
        }
        let all_rows = rows.len() == bs.rows_count();
        let mut br = Self::new(rows.len());

        let mut names: Vec<String> = Vec::new();
        for special in [TIME_FIELD_NAME, STREAM_ID_FIELD_NAME, STREAM_FIELD_NAME] {
            if needed.contains(special) && (special != STREAM_FIELD_NAME || stream_tags.is_some()) {
                names.push(special.to_string());
            }
        }
        for name in bs.column_names() {
            if needed.contains(&name) && !names.contains(&name) {
                names.push(name);
            }
        }
        for name in needed.names() {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }

        for name in names {
            let column = match name.as_str() {
                TIME_FIELD_NAME => {
                    let ts = bs.timestamps();
                    let ts = if all_rows {
                        ts.to_vec()
                    } else {
                        rows.iter().map(|&i| ts[i]).collect()
                    };
                    BlockResultColumn::new_time(name, ts)
                }
                STREAM_ID_FIELD_NAME => BlockResultColumn::new_const(name, bs.stream_id().to_string(), rows.len()),
                STREAM_FIELD_NAME => {
                    let tags = stream_tags.map(|t| t.to_string()).unwrap_or_default();
                    BlockResultColumn::new_const(name, tags, rows.len())
                }
                _ => match bs.column(&name) {
                    BlockColumnRef::Const(v) => BlockResultColumn::new_const(name.clone(), v, rows.len()),
                    BlockColumnRef::Header(ch) => {
                        let values = bs.values(ch);
                        let values = if all_rows { values } else { Arc::new(values.select(&rows)) };
                        BlockResultColumn::new_encoded(name.clone(), values, ch.min_value, ch.max_value)
                    }
                    BlockColumnRef::Missing => BlockResultColumn::new_const(name.clone(), "", rows.len()),
                },
            };
            br.columns.push(column);
        }
        br
    }

    /// Builds the result for the rows of `src` selected by `bm`, keeping every column.
    pub fn from_filtered(src: &BlockResult, bm: &Bitmap) -> Self {
        if bm.are_all_set() {
            return src.clone();
        }
        src.select_rows(&bm.set_indexes())
    }

    /// Builds a result from columns synthesized by a pipe.
    ///
    /// # Panics
    ///
    /// Panics if a column does not hold exactly `rows_len` values.
    pub fn from_result_columns(rows_len: usize, columns: Vec<(String, Vec<String>)>) -> Self {
        let mut br = Self::new(rows_len);
        for (name, values) in columns {
            br.add_result_column(name, values);
        }
        br
    }

    pub fn from_data_block(db: &DataBlock) -> Self {
        let columns = db.columns.iter().map(|c| (c.name.clone(), c.values.clone())).collect();
        Self::from_result_columns(db.rows_count(), columns)
    }

    pub fn rows_len(&self) -> usize {
        self.rows_len
    }

    pub fn is_empty(&self) -> bool {
        self.rows_len == 0
    }

    pub fn columns(&self) -> &[BlockResultColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn get_column(&self, name: &str) -> Option<&BlockResultColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns the named column, or an empty const column if there is no such column.
    pub fn column(&self, name: &str) -> Cow<'_, BlockResultColumn> {
        match self.get_column(name) {
            Some(c) => Cow::Borrowed(c),
            None => Cow::Owned(BlockResultColumn::new_const(name, "", self.rows_len)),
        }
    }

    /// Returns the names of the columns matching any of `patterns`, in column order.
    pub fn matching_column_names<S: AsRef<str>>(&self, patterns: &[S]) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| match_any_pattern(patterns, &c.name))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Adds a column, replacing an existing column with the same name in place.
    ///
    /// # Panics
    ///
    /// Panics if the column length differs from the result length.
    pub fn add_column(&mut self, column: BlockResultColumn) {
        if column.rows_len != self.rows_len {
            panic!(
                "BUG: column {:?} has {} rows; want {} rows",
                column.name, column.rows_len, self.rows_len
            );
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(c) => *c = column,
            None => self.columns.push(column),
        }
    }

    pub fn add_result_column(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.add_column(BlockResultColumn::new_strings(name, values));
    }

    pub fn add_const_column(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let rows_len = self.rows_len;
        self.add_column(BlockResultColumn::new_const(name, value, rows_len));
    }

    pub fn remove_column(&mut self, name: &str) {
        self.columns.retain(|c| c.name != name);
    }

    pub fn remove_columns<S: AsRef<str>>(&mut self, patterns: &[S]) {
        self.columns.retain(|c| !match_any_pattern(patterns, &c.name));
    }

    /// Keeps the columns matching `patterns`, ordered by the first pattern they match.
    pub fn retain_columns<S: AsRef<str>>(&mut self, patterns: &[S]) {
        let mut kept = Vec::with_capacity(self.columns.len());
        let mut columns = std::mem::take(&mut self.columns);
        for p in patterns {
            let (matched, rest): (Vec<_>, Vec<_>) = columns
                .into_iter()
                .partition(|c| crate::fields_set::match_pattern(p.as_ref(), &c.name));
            kept.extend(matched);
            columns = rest;
        }
        self.columns = kept;
    }

    /// Copies column `src` to `dst`. A missing `src` produces an empty `dst`.
    pub fn copy_column(&mut self, src: &str, dst: &str) {
        let column = self.column(src).renamed(dst);
        self.add_column(column);
    }

    /// Renames column `src` to `dst`, replacing any existing `dst`.
    pub fn rename_column(&mut self, src: &str, dst: &str) {
        if src == dst {
            return;
        }
        self.copy_column(src, dst);
        self.remove_column(src);
    }

    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            rows_len: rows.len(),
            columns: self.columns.iter().map(|c| c.select(rows)).collect(),
        }
    }

    /// Drops the first `n` rows.
    pub fn skip_rows(&mut self, n: usize) {
        let n = n.min(self.rows_len);
        if n == 0 {
            return;
        }
        let rows_len = self.rows_len;
        self.columns = self.columns.iter().map(|c| c.slice(n, rows_len)).collect();
        self.rows_len -= n;
    }

    /// Keeps only the first `keep` rows.
    pub fn truncate_rows(&mut self, keep: usize) {
        if keep >= self.rows_len {
            return;
        }
        self.columns = self.columns.iter().map(|c| c.slice(0, keep)).collect();
        self.rows_len = keep;
    }

    pub fn timestamps(&self) -> Option<&[i64]> {
        self.get_column(TIME_FIELD_NAME).and_then(|c| c.timestamps())
    }

    /// Returns `(name, value)` pairs of row `i`.
    pub fn row(&self, i: usize) -> Vec<(&str, &str)> {
        self.columns.iter().map(|c| (c.name(), c.value(i))).collect()
    }

    /// Approximate memory held by the result, for state budgeting.
    pub fn size_bytes(&self) -> usize {
        self.columns.iter().map(|c| c.size_bytes()).sum()
    }

    pub fn to_data_block(&self) -> DataBlock {
        DataBlock::new(
            self.columns
                .iter()
                .map(|c| BlockColumn::new(c.name.clone(), c.values().to_vec()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logstore_core::values::timestamp_from_ymd;
    use logstore_storage::ValuesEncoder;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_result_column_const_detection() {
        let mut br = BlockResult::new(3);
        br.add_result_column("a", strings(&["x", "x", "x"]));
        br.add_result_column("b", strings(&["x", "y", "x"]));
        assert!(br.get_column("a").unwrap().is_const());
        assert!(!br.get_column("b").unwrap().is_const());
        assert_eq!(br.get_column("a").unwrap().values(), &strings(&["x", "x", "x"])[..]);
    }

    #[test]
    fn test_add_column_replaces_in_place() {
        let mut br = BlockResult::from_result_columns(
            2,
            vec![("a".to_string(), strings(&["1", "2"])), ("b".to_string(), strings(&["3", "4"]))],
        );
        br.add_result_column("a", strings(&["5", "6"]));
        assert_eq!(br.column_names(), vec!["a", "b"]);
        assert_eq!(br.column("a").value(1), "6");
    }

    #[test]
    fn test_missing_column_is_empty_const() {
        let br = BlockResult::from_result_columns(2, vec![("a".to_string(), strings(&["1", "2"]))]);
        let c = br.column("missing");
        assert!(c.is_const());
        assert_eq!(c.values(), &strings(&["", ""])[..]);
    }

    #[test]
    fn test_skip_and_truncate_rows() {
        let encoded = ValuesEncoder::encode(&strings(&["10", "20", "30", "40"]));
        let mut br = BlockResult::new(4);
        br.add_column(BlockResultColumn::new_encoded(
            "n",
            Arc::new(encoded.values),
            encoded.min_value,
            encoded.max_value,
        ));
        br.add_column(BlockResultColumn::new_time("_time", vec![1, 2, 3, 4]));
        br.add_const_column("c", "k");

        br.skip_rows(1);
        assert_eq!(br.rows_len(), 3);
        assert_eq!(br.column("n").values(), &strings(&["20", "30", "40"])[..]);
        assert_eq!(br.timestamps(), Some(&[2i64, 3, 4][..]));

        br.truncate_rows(2);
        assert_eq!(br.rows_len(), 2);
        assert_eq!(br.column("n").values(), &strings(&["20", "30"])[..]);
        assert_eq!(br.column("c").values().len(), 2);
    }

    #[test]
    fn test_filtered_keeps_column_kinds() {
        let mut br = BlockResult::new(3);
        br.add_column(BlockResultColumn::new_time("_time", vec![5, 6, 7]));
        br.add_const_column("c", "k");
        let mut bm = Bitmap::new(3);
        bm.set(0);
        bm.set(2);
        let filtered = BlockResult::from_filtered(&br, &bm);
        assert_eq!(filtered.rows_len(), 2);
        assert_eq!(filtered.timestamps(), Some(&[5i64, 7][..]));
        assert!(filtered.column("c").is_const());
    }

    #[test]
    fn test_bucketed_time_fast_path() {
        let base = timestamp_from_ymd(2024, 1, 1).unwrap();
        let minute = 60_000_000_000i64;
        let col = BlockResultColumn::new_time("_time", vec![base + 1, base + minute - 1]);
        let bucket = Bucket::new("5m", "").unwrap();
        let bucketed = col.bucketed(&bucket);
        assert!(bucketed.is_const());
        assert_eq!(bucketed.value(0), "2024-01-01T00:00:00Z");

        let col = BlockResultColumn::new_time("_time", vec![base, base + 6 * minute]);
        let bucketed = col.bucketed(&bucket);
        assert_eq!(bucketed.values(), &strings(&["2024-01-01T00:00:00Z", "2024-01-01T00:05:00Z"])[..]);
    }

    #[test]
    fn test_bucketed_encoded_numbers() {
        let encoded = ValuesEncoder::encode(&strings(&["3", "17", "25"]));
        let col = BlockResultColumn::new_encoded("n", Arc::new(encoded.values), encoded.min_value, encoded.max_value);
        let bucketed = col.bucketed(&Bucket::new("10", "").unwrap());
        assert_eq!(bucketed.values(), &strings(&["0", "10", "20"])[..]);
    }

    #[test]
    fn test_retain_and_rename() {
        let mut br = BlockResult::from_result_columns(
            1,
            vec![
                ("a".to_string(), strings(&["1"])),
                ("b1".to_string(), strings(&["2"])),
                ("c".to_string(), strings(&["3"])),
            ],
        );
        br.retain_columns(&["c", "b*"]);
        assert_eq!(br.column_names(), vec!["c", "b1"]);
        br.rename_column("c", "b1");
        assert_eq!(br.column_names(), vec!["b1"]);
        assert_eq!(br.column("b1").value(0), "3");
    }
}
