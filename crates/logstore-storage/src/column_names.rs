//! Part-level dictionary of column names.
//!
//! Format v1 parts store every distinct column name once and refer to it
//! from the columns header index by a dense id.

use crate::error::{Result, StorageError};
use logstore_core::encoding::{marshal_bytes, marshal_var_u64, unmarshal_string, unmarshal_var_u64};
use std::collections::HashMap;

/// Upper bound on the number of names a dictionary may declare.
const MAX_COLUMN_NAMES: u64 = 1 << 20;

/// Assigns dense ids to column names in order of first use.
#[derive(Debug, Clone, Default)]
pub struct ColumnNameIdGenerator {
    names: Vec<String>,
    ids: HashMap<String, u64>,
}

impl ColumnNameIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_add(&mut self, name: &str) -> u64 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u64;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

pub fn marshal_column_names(dst: &mut Vec<u8>, names: &[String]) {
    marshal_var_u64(dst, names.len() as u64);
    for name in names {
        marshal_bytes(dst, name.as_bytes());
    }
}

pub fn unmarshal_column_names(src: &[u8]) -> Result<Vec<String>> {
    let mut cursor = src;
    let n = unmarshal_var_u64(&mut cursor)?;
    if n > MAX_COLUMN_NAMES || n > cursor.len() as u64 {
        return Err(StorageError::ColumnsHeader(format!(
            "too many column names: {n}; only {} bytes left",
            cursor.len()
        )));
    }
    let mut names = Vec::with_capacity(n as usize);
    let mut seen = HashMap::with_capacity(n as usize);
    for i in 0..n {
        let name = unmarshal_string(&mut cursor)?;
        if let Some(prev) = seen.insert(name.clone(), i) {
            return Err(StorageError::ColumnsHeader(format!(
                "duplicate column name {name:?} at positions {prev} and {i}"
            )));
        }
        names.push(name);
    }
    if !cursor.is_empty() {
        return Err(StorageError::ColumnsHeader(format!(
            "unexpected tail after {n} column names: {} bytes",
            cursor.len()
        )));
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_assigns_dense_ids() {
        let mut g = ColumnNameIdGenerator::new();
        assert_eq!(g.get_or_add("level"), 0);
        assert_eq!(g.get_or_add(""), 1);
        assert_eq!(g.get_or_add("level"), 0);
        assert_eq!(g.get_or_add("host"), 2);
        assert_eq!(g.names(), ["level", "", "host"]);
    }

    #[test]
    fn test_marshal_unmarshal() {
        let names = vec!["a".to_string(), "".to_string(), "host.name".to_string()];
        let mut buf = Vec::new();
        marshal_column_names(&mut buf, &names);
        assert_eq!(unmarshal_column_names(&buf).unwrap(), names);

        for n in 0..buf.len() {
            assert!(unmarshal_column_names(&buf[..n]).is_err(), "n={n}");
        }
    }

    #[test]
    fn test_duplicate_names() {
        let mut buf = Vec::new();
        marshal_column_names(&mut buf, &["x".to_string(), "x".to_string()]);
        let err = unmarshal_column_names(&buf).unwrap_err();
        assert!(err.to_string().contains("duplicate column name"));
    }
}
