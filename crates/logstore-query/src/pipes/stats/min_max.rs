use super::{downcast, stats_columns, StatsProcessor};
use crate::block_result::BlockResult;
use crate::pipes::sort::compare_values;
use logstore_core::encoding::{marshal_bytes, unmarshal_string, unmarshal_u8};
use std::any::Any;
use std::cmp::Ordering;

/// State of `min(...)` and `max(...)`.
///
/// Numbers compare numerically and everything else compares as strings, the
/// same way `sort` orders values. Empty values are ignored.
pub(crate) struct StatsMinMax {
    fields: Vec<String>,
    is_max: bool,
    value: Option<String>,
}

impl StatsMinMax {
    pub(crate) fn new(fields: Vec<String>, is_max: bool) -> Self {
        Self {
            fields,
            is_max,
            value: None,
        }
    }

    fn update(&mut self, v: &str) -> usize {
        if v.is_empty() {
            return 0;
        }
        let want = if self.is_max { Ordering::Greater } else { Ordering::Less };
        match &mut self.value {
            Some(cur) => {
                if compare_values(v, cur) == want {
                    let grown = v.len().saturating_sub(cur.len());
                    cur.clear();
                    cur.push_str(v);
                    return grown;
                }
                0
            }
            None => {
                self.value = Some(v.to_string());
                v.len()
            }
        }
    }
}

impl StatsProcessor for StatsMinMax {
    fn update_all_rows(&mut self, br: &BlockResult) -> usize {
        let mut bytes = 0;
        for c in stats_columns(br, &self.fields) {
            if c.is_const() {
                bytes += self.update(c.value(0));
                continue;
            }
            for v in c.values() {
                bytes += self.update(v);
            }
        }
        bytes
    }

    fn update_row(&mut self, br: &BlockResult, row: usize) -> usize {
        let mut bytes = 0;
        for c in stats_columns(br, &self.fields) {
            bytes += self.update(c.value(row));
        }
        bytes
    }

    fn merge_state(&mut self, other: &dyn StatsProcessor) -> usize {
        match &downcast::<Self>(other).value {
            Some(v) => self.update(v),
            None => 0,
        }
    }

    fn export_state(&self, dst: &mut Vec<u8>) {
        match &self.value {
            Some(v) => {
                dst.push(1);
                marshal_bytes(dst, v.as_bytes());
            }
            None => dst.push(0),
        }
    }

    fn import_state(&mut self, src: &mut &[u8]) -> logstore_core::Result<usize> {
        self.value = match unmarshal_u8(src)? {
            0 => None,
            1 => Some(unmarshal_string(src)?),
            n => return Err(logstore_core::Error::decode(format!("unexpected min/max state marker {n}"))),
        };
        Ok(self.value.as_ref().map_or(0, String::len))
    }

    fn finalize(&self) -> String {
        self.value.clone().unwrap_or_default()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
