use super::{downcast, stats_columns, StatsProcessor};
use crate::block_result::{BlockResult, BlockResultColumn};
use logstore_core::encoding::{marshal_var_u64, unmarshal_var_u64};
use std::any::Any;

/// State of `count(...)` and `count_empty(...)`.
///
/// Without fields, `count_empty` counts the rows where every field is empty.
pub(crate) struct StatsCount {
    fields: Vec<String>,
    count_empty: bool,
    rows: u64,
}

impl StatsCount {
    pub(crate) fn new(fields: Vec<String>, count_empty: bool) -> Self {
        Self {
            fields,
            count_empty,
            rows: 0,
        }
    }

    fn matches(&self, columns: &[impl AsRef<BlockResultColumn>], row: usize) -> bool {
        let all_empty = columns.iter().all(|c| c.as_ref().value(row).is_empty());
        all_empty == self.count_empty
    }
}

impl StatsProcessor for StatsCount {
    fn update_all_rows(&mut self, br: &BlockResult) -> usize {
        if self.fields.is_empty() && !self.count_empty {
            self.rows += br.rows_len() as u64;
            return 0;
        }
        let columns = stats_columns(br, &self.fields);
        if columns.iter().all(|c| c.is_const()) {
            if self.matches(&columns, 0) {
                self.rows += br.rows_len() as u64;
            }
            return 0;
        }
        self.rows += (0..br.rows_len()).filter(|&row| self.matches(&columns, row)).count() as u64;
        0
    }

    fn update_row(&mut self, br: &BlockResult, row: usize) -> usize {
        if self.fields.is_empty() && !self.count_empty {
            self.rows += 1;
            return 0;
        }
        let columns = stats_columns(br, &self.fields);
        if self.matches(&columns, row) {
            self.rows += 1;
        }
        0
    }

    fn merge_state(&mut self, other: &dyn StatsProcessor) -> usize {
        self.rows += downcast::<Self>(other).rows;
        0
    }

    fn export_state(&self, dst: &mut Vec<u8>) {
        marshal_var_u64(dst, self.rows);
    }

    fn import_state(&mut self, src: &mut &[u8]) -> logstore_core::Result<usize> {
        self.rows = unmarshal_var_u64(src)?;
        Ok(0)
    }

    fn finalize(&self) -> String {
        self.rows.to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
