use super::{downcast, stats_columns, StatsProcessor};
use crate::block_result::BlockResult;
use logstore_core::encoding::{marshal_bytes, marshal_var_u64, unmarshal_string, unmarshal_var_u64};
use std::any::Any;
use std::collections::BTreeSet;

enum Items {
    All(Vec<String>),
    Uniq(BTreeSet<String>),
}

/// State of `values(...)` and `uniq_values(...)`. Both produce a JSON array of the non-empty values.
pub(crate) struct StatsValues {
    fields: Vec<String>,
    limit: u64,
    items: Items,
}

impl StatsValues {
    pub(crate) fn new(fields: Vec<String>, limit: u64, uniq: bool) -> Self {
        let items = if uniq {
            Items::Uniq(BTreeSet::new())
        } else {
            Items::All(Vec::new())
        };
        Self { fields, limit, items }
    }

    fn len(&self) -> usize {
        match &self.items {
            Items::All(v) => v.len(),
            Items::Uniq(set) => set.len(),
        }
    }

    fn is_full(&self) -> bool {
        self.limit > 0 && self.len() as u64 >= self.limit
    }

    fn add(&mut self, v: &str) -> usize {
        if v.is_empty() || self.is_full() {
            return 0;
        }
        match &mut self.items {
            Items::All(items) => items.push(v.to_string()),
            Items::Uniq(set) => {
                if set.contains(v) {
                    return 0;
                }
                set.insert(v.to_string());
            }
        }
        v.len() + std::mem::size_of::<String>()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &String> + '_> {
        match &self.items {
            Items::All(v) => Box::new(v.iter()),
            Items::Uniq(set) => Box::new(set.iter()),
        }
    }
}

impl StatsProcessor for StatsValues {
    fn update_all_rows(&mut self, br: &BlockResult) -> usize {
        let mut bytes = 0;
        for c in stats_columns(br, &self.fields) {
            if c.is_const() && matches!(self.items, Items::Uniq(_)) {
                bytes += self.add(c.value(0));
                continue;
            }
            for row in 0..br.rows_len() {
                if self.is_full() {
                    return bytes;
                }
                bytes += self.add(c.value(row));
            }
        }
        bytes
    }

    fn update_row(&mut self, br: &BlockResult, row: usize) -> usize {
        let mut bytes = 0;
        for c in stats_columns(br, &self.fields) {
            bytes += self.add(c.value(row));
        }
        bytes
    }

    fn merge_state(&mut self, other: &dyn StatsProcessor) -> usize {
        let other = downcast::<Self>(other);
        let mut bytes = 0;
        for v in other.iter() {
            if self.is_full() {
                break;
            }
            bytes += self.add(v);
        }
        bytes
    }

    fn export_state(&self, dst: &mut Vec<u8>) {
        marshal_var_u64(dst, self.len() as u64);
        for v in self.iter() {
            marshal_bytes(dst, v.as_bytes());
        }
    }

    fn import_state(&mut self, src: &mut &[u8]) -> logstore_core::Result<usize> {
        match &mut self.items {
            Items::All(v) => v.clear(),
            Items::Uniq(set) => set.clear(),
        }
        let n = unmarshal_var_u64(src)?;
        let mut bytes = 0;
        for _ in 0..n {
            let v = unmarshal_string(src)?;
            bytes += v.len() + std::mem::size_of::<String>();
            match &mut self.items {
                Items::All(items) => items.push(v),
                Items::Uniq(set) => {
                    set.insert(v);
                }
            }
        }
        Ok(bytes)
    }

    fn finalize(&self) -> String {
        serde_json::Value::from(self.iter().cloned().collect::<Vec<String>>()).to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
