//! Log entries in row form.

use logstore_core::Field;

/// Approximate text length of an RFC3339 timestamp with nanoseconds.
const TIMESTAMP_TEXT_LEN: u64 = "2006-01-02T15:04:05.999999999Z07:00".len() as u64;

/// Log entries with their timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rows {
    pub timestamps: Vec<i64>,
    pub rows: Vec<Vec<Field>>,
}

impl Rows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn reset(&mut self) {
        self.timestamps.clear();
        self.rows.clear();
    }

    pub fn push(&mut self, timestamp: i64, fields: Vec<Field>) {
        self.timestamps.push(timestamp);
        self.rows.push(fields);
    }

    /// Returns true if at least one row has a field.
    pub fn has_non_empty_rows(&self) -> bool {
        self.rows.iter().any(|fields| !fields.is_empty())
    }

    /// Keeps only the rows for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(i64, &[Field]) -> bool) -> usize {
        let mut dropped = 0;
        let mut dst = 0;
        for i in 0..self.timestamps.len() {
            if keep(self.timestamps[i], &self.rows[i]) {
                self.timestamps.swap(dst, i);
                self.rows.swap(dst, i);
                dst += 1;
            } else {
                dropped += 1;
            }
        }
        self.timestamps.truncate(dst);
        self.rows.truncate(dst);
        dropped
    }

    pub fn uncompressed_size_bytes(&self) -> u64 {
        self.rows.iter().map(|fields| uncompressed_row_size_bytes(fields)).sum()
    }

    /// Merges two row sets sorted by timestamp into one sorted set.
    ///
    /// Rows from `a` go first among rows with equal timestamps.
    pub fn merge(a: Rows, b: Rows) -> Rows {
        if a.is_empty() {
            return b;
        }
        if b.is_empty() {
            return a;
        }
        let total = a.len() + b.len();
        let mut dst = Rows {
            timestamps: Vec::with_capacity(total),
            rows: Vec::with_capacity(total),
        };
        let mut a_iter = a.timestamps.into_iter().zip(a.rows).peekable();
        let mut b_iter = b.timestamps.into_iter().zip(b.rows).peekable();
        loop {
            let take_a = match (a_iter.peek(), b_iter.peek()) {
                (Some((ta, _)), Some((tb, _))) => ta <= tb,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_a { a_iter.next() } else { b_iter.next() };
            if let Some((ts, fields)) = next {
                dst.push(ts, fields);
            }
        }
        dst
    }
}

/// Returns the size of a row in the `timestamp name=value ...` text form.
pub fn uncompressed_row_size_bytes(fields: &[Field]) -> u64 {
    TIMESTAMP_TEXT_LEN + fields.iter().map(|f| f.text_size() as u64).sum::<u64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(timestamps: &[i64], tag: &str) -> Rows {
        let mut rs = Rows::new();
        for &ts in timestamps {
            rs.push(ts, vec![Field::new("src", tag), Field::new("ts", ts.to_string())]);
        }
        rs
    }

    #[test]
    fn test_merge_sorted() {
        let merged = Rows::merge(rows(&[100, 200, 300], "a"), rows(&[150, 250], "b"));
        assert_eq!(merged.timestamps, vec![100, 150, 200, 250, 300]);
        for (ts, fields) in merged.timestamps.iter().zip(&merged.rows) {
            assert_eq!(fields[1].value, ts.to_string());
        }
    }

    #[test]
    fn test_merge_ties_prefer_first() {
        let merged = Rows::merge(rows(&[5, 5], "a"), rows(&[5], "b"));
        let tags: Vec<&str> = merged.rows.iter().map(|r| r[0].value.as_str()).collect();
        assert_eq!(tags, vec!["a", "a", "b"]);
    }

    #[test]
    fn test_retain() {
        let mut rs = rows(&[1, 2, 3, 4], "x");
        let dropped = rs.retain(|ts, _| ts % 2 == 0);
        assert_eq!(dropped, 2);
        assert_eq!(rs.timestamps, vec![2, 4]);
        assert_eq!(rs.rows[1][1].value, "4");
    }

    #[test]
    fn test_has_non_empty_rows() {
        let mut rs = Rows::new();
        rs.push(1, Vec::new());
        assert!(!rs.has_non_empty_rows());
        rs.push(2, vec![Field::new("a", "b")]);
        assert!(rs.has_non_empty_rows());
    }
}
