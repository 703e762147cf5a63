use super::PipeProcessor;
use crate::block_result::BlockResult;
use crate::error::Result;
use crate::lexer::Lexer;
use crate::parser::parse_uint;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// `offset N`, skipping the first N rows.
#[derive(Debug, Clone, PartialEq)]
pub struct PipeOffset {
    pub offset: u64,
}

impl PipeOffset {
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        lex.next_token();
        let s = lex.next_compound_token()?;
        let offset = parse_uint(&s).ok_or_else(|| lex.error(format!("cannot parse 'offset {s}'")))?;
        Ok(Self { offset })
    }

    pub(crate) fn new_processor(&self, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        Arc::new(OffsetProcessor {
            offset: self.offset,
            rows_processed: AtomicU64::new(0),
            next,
        })
    }
}

impl fmt::Display for PipeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offset {}", self.offset)
    }
}

struct OffsetProcessor {
    offset: u64,
    rows_processed: AtomicU64,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for OffsetProcessor {
    fn write_block(&self, worker_id: usize, mut br: BlockResult) {
        let rows_len = br.rows_len() as u64;
        let before = self.rows_processed.fetch_add(rows_len, Ordering::AcqRel);
        if before >= self.offset {
            self.next.write_block(worker_id, br);
            return;
        }
        let after = before + rows_len;
        if after <= self.offset {
            return;
        }
        br.skip_rows((self.offset - before) as usize);
        self.next.write_block(worker_id, br);
    }

    fn flush(&self) -> Result<()> {
        self.next.flush()
    }
}

#[cfg(test)]
mod tests {
    use crate::pipes::test_utils::*;

    #[test]
    fn test_offset() {
        let blocks = vec![block(&[("a", &["1", "2"])]), block(&[("a", &["3", "4"])])];
        let rows = run_pipes("* | offset 3", 1, blocks).unwrap();
        assert_eq!(rows, vec![row(&[("a", "4")])]);
    }
}
