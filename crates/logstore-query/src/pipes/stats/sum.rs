use super::{downcast, stats_columns, StatsProcessor};
use crate::block_result::BlockResult;
use bytes::BufMut;
use logstore_core::encoding::{marshal_var_u64, unmarshal_u64, unmarshal_var_u64};
use logstore_core::values::float64_string;
use std::any::Any;

/// State of `sum(...)` and `avg(...)`. Values which are not numbers are skipped.
pub(crate) struct StatsSum {
    fields: Vec<String>,
    avg: bool,
    sum: f64,
    count: u64,
}

impl StatsSum {
    pub(crate) fn new(fields: Vec<String>, avg: bool) -> Self {
        Self {
            fields,
            avg,
            sum: 0.0,
            count: 0,
        }
    }

    fn add(&mut self, f: f64) {
        self.sum += f;
        self.count += 1;
    }
}

impl StatsProcessor for StatsSum {
    fn update_all_rows(&mut self, br: &BlockResult) -> usize {
        for c in stats_columns(br, &self.fields) {
            if c.is_const() {
                if let Some(f) = c.numeric_value(0) {
                    self.sum += f * br.rows_len() as f64;
                    self.count += br.rows_len() as u64;
                }
                continue;
            }
            for row in 0..br.rows_len() {
                if let Some(f) = c.numeric_value(row) {
                    self.add(f);
                }
            }
        }
        0
    }

    fn update_row(&mut self, br: &BlockResult, row: usize) -> usize {
        for c in stats_columns(br, &self.fields) {
            if let Some(f) = c.numeric_value(row) {
                self.add(f);
            }
        }
        0
    }

    fn merge_state(&mut self, other: &dyn StatsProcessor) -> usize {
        let other = downcast::<Self>(other);
        self.sum += other.sum;
        self.count += other.count;
        0
    }

    fn export_state(&self, dst: &mut Vec<u8>) {
        marshal_var_u64(dst, self.count);
        dst.put_u64(self.sum.to_bits());
    }

    fn import_state(&mut self, src: &mut &[u8]) -> logstore_core::Result<usize> {
        self.count = unmarshal_var_u64(src)?;
        self.sum = f64::from_bits(unmarshal_u64(src)?);
        Ok(0)
    }

    fn finalize(&self) -> String {
        if self.count == 0 {
            return float64_string(f64::NAN);
        }
        let result = if self.avg { self.sum / self.count as f64 } else { self.sum };
        float64_string(result)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
