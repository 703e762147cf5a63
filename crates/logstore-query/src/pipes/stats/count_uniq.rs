use super::{downcast, stats_columns, StatsProcessor};
use crate::block_result::{BlockResult, BlockResultColumn};
use logstore_core::encoding::{marshal_bytes, marshal_var_u64, unmarshal_string, unmarshal_var_u64};
use std::any::Any;
use std::borrow::Cow;
use std::collections::HashSet;

/// State of `count_uniq(...) [limit N]`.
pub(crate) struct StatsCountUniq {
    fields: Vec<String>,
    limit: u64,
    keys: HashSet<Vec<String>>,
}

impl StatsCountUniq {
    pub(crate) fn new(fields: Vec<String>, limit: u64) -> Self {
        Self {
            fields,
            limit,
            keys: HashSet::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.limit > 0 && self.keys.len() as u64 >= self.limit
    }

    /// Builds the key of `row`. `count_uniq(*)` keys hold names and values of the non-empty columns.
    fn row_key(&self, columns: &[Cow<'_, BlockResultColumn>], row: usize) -> Option<Vec<String>> {
        if columns.iter().all(|c| c.value(row).is_empty()) {
            return None;
        }
        let key = if self.fields.is_empty() {
            columns
                .iter()
                .filter(|c| !c.value(row).is_empty())
                .flat_map(|c| [c.name().to_string(), c.value(row).to_string()])
                .collect()
        } else {
            columns.iter().map(|c| c.value(row).to_string()).collect()
        };
        Some(key)
    }

    fn insert(&mut self, key: Vec<String>) -> usize {
        if self.is_full() || self.keys.contains(&key) {
            return 0;
        }
        let bytes = key_size(&key);
        self.keys.insert(key);
        bytes
    }
}

fn key_size(key: &[String]) -> usize {
    key.iter().map(|s| s.len() + std::mem::size_of::<String>()).sum::<usize>() + std::mem::size_of::<Vec<String>>()
}

impl StatsProcessor for StatsCountUniq {
    fn update_all_rows(&mut self, br: &BlockResult) -> usize {
        let columns = stats_columns(br, &self.fields);
        let rows = if columns.iter().all(|c| c.is_const()) { 1 } else { br.rows_len() };
        let mut bytes = 0;
        for row in 0..rows {
            if self.is_full() {
                break;
            }
            if let Some(key) = self.row_key(&columns, row) {
                bytes += self.insert(key);
            }
        }
        bytes
    }

    fn update_row(&mut self, br: &BlockResult, row: usize) -> usize {
        if self.is_full() {
            return 0;
        }
        let columns = stats_columns(br, &self.fields);
        match self.row_key(&columns, row) {
            Some(key) => self.insert(key),
            None => 0,
        }
    }

    fn merge_state(&mut self, other: &dyn StatsProcessor) -> usize {
        let other = downcast::<Self>(other);
        let mut bytes = 0;
        for key in &other.keys {
            if self.is_full() {
                break;
            }
            bytes += self.insert(key.clone());
        }
        bytes
    }

    fn export_state(&self, dst: &mut Vec<u8>) {
        marshal_var_u64(dst, self.keys.len() as u64);
        for key in &self.keys {
            marshal_var_u64(dst, key.len() as u64);
            for s in key {
                marshal_bytes(dst, s.as_bytes());
            }
        }
    }

    fn import_state(&mut self, src: &mut &[u8]) -> logstore_core::Result<usize> {
        self.keys.clear();
        let mut bytes = 0;
        let n = unmarshal_var_u64(src)?;
        for _ in 0..n {
            let parts = unmarshal_var_u64(src)?;
            let mut key = Vec::new();
            for _ in 0..parts {
                key.push(unmarshal_string(src)?);
            }
            bytes += key_size(&key);
            self.keys.insert(key);
        }
        Ok(bytes)
    }

    fn finalize(&self) -> String {
        self.keys.len().to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
