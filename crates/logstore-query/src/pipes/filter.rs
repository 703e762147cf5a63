use super::PipeProcessor;
use crate::bitmap::Bitmap;
use crate::block_result::BlockResult;
use crate::error::Result;
use crate::fields_set::FieldsSet;
use crate::filter::Filter;
use crate::lexer::Lexer;
use crate::parser::parse_filter_lex;
use std::fmt;
use std::sync::Arc;

/// `filter <filter>` applied to the rows produced by the previous pipes.
#[derive(Debug, Clone)]
pub struct PipeFilter {
    pub filter: Arc<Filter>,
}

impl PipeFilter {
    /// Parses the filter after the `filter` keyword.
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        let filter = parse_filter_lex(lex, true)?;
        Ok(Self { filter })
    }

    pub(crate) fn update_needed_fields(&self, needed: &mut FieldsSet) {
        self.filter.update_needed_fields(needed);
    }

    pub(crate) fn new_processor(&self, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        Arc::new(FilterProcessor {
            filter: Arc::clone(&self.filter),
            next,
        })
    }
}

impl fmt::Display for PipeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter {}", self.filter)
    }
}

struct FilterProcessor {
    filter: Arc<Filter>,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for FilterProcessor {
    fn write_block(&self, worker_id: usize, br: BlockResult) {
        if br.is_empty() {
            return;
        }
        let mut bm = Bitmap::new_set(br.rows_len());
        self.filter.apply_to_block_result(&br, &mut bm);
        if bm.is_zero() {
            return;
        }
        self.next.write_block(worker_id, BlockResult::from_filtered(&br, &bm));
    }

    fn flush(&self) -> Result<()> {
        self.next.flush()
    }
}

#[cfg(test)]
mod tests {
    use crate::pipes::test_utils::*;

    #[test]
    fn test_filter() {
        let br = block(&[("a", &["1", "5", "10"]), ("b", &["x", "y", "z"])]);
        let rows = run_pipes("* | limit 10 | filter a:>3 b:!z", 1, vec![br]).unwrap();
        assert_eq!(rows, vec![row(&[("a", "5"), ("b", "y")])]);
    }
}
