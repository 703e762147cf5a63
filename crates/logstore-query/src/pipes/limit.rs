use super::{PipeProcessor, ProcessorContext};
use crate::block_result::BlockResult;
use crate::error::Result;
use crate::lexer::Lexer;
use crate::parser::parse_uint;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Number of rows returned by a bare `limit`.
pub const DEFAULT_LIMIT: u64 = 10;

/// `limit N`
#[derive(Debug, Clone, PartialEq)]
pub struct PipeLimit {
    pub limit: u64,
}

impl PipeLimit {
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        lex.next_token();
        if lex.is_keyword(&["|", ")", ""]) {
            return Ok(Self { limit: DEFAULT_LIMIT });
        }
        let s = lex.next_compound_token()?;
        let limit = parse_uint(&s).ok_or_else(|| lex.error(format!("cannot parse 'limit {s}'")))?;
        Ok(Self { limit })
    }

    pub(crate) fn new_processor(&self, ctx: ProcessorContext, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        if self.limit == 0 {
            ctx.cancel.stop();
        }
        Arc::new(LimitProcessor {
            limit: self.limit,
            ctx,
            rows_processed: AtomicU64::new(0),
            next,
        })
    }
}

impl fmt::Display for PipeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "limit {}", self.limit)
    }
}

struct LimitProcessor {
    limit: u64,
    ctx: ProcessorContext,
    rows_processed: AtomicU64,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for LimitProcessor {
    fn write_block(&self, worker_id: usize, mut br: BlockResult) {
        let rows_len = br.rows_len() as u64;
        let after = self.rows_processed.fetch_add(rows_len, Ordering::AcqRel) + rows_len;
        if after <= self.limit {
            self.next.write_block(worker_id, br);
            if after == self.limit {
                self.ctx.cancel.stop();
            }
            return;
        }

        let before = after - rows_len;
        if before >= self.limit {
            return;
        }
        br.truncate_rows((self.limit - before) as usize);
        self.next.write_block(worker_id, br);
        self.ctx.cancel.stop();
    }

    fn flush(&self) -> Result<()> {
        self.next.flush()
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_query;
    use crate::pipes::test_utils::*;

    #[test]
    fn test_limit() {
        let blocks = vec![block(&[("a", &["1", "2"])]), block(&[("a", &["3", "4"])])];
        let rows = run_pipes("* | limit 3", 1, blocks).unwrap();
        assert_eq!(rows, vec![row(&[("a", "1")]), row(&[("a", "2")]), row(&[("a", "3")])]);

        let rows = run_pipes("* | limit 0", 1, vec![block(&[("a", &["1"])])]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_query("* | limit").unwrap().to_string(), "* | limit 10");
        assert_eq!(parse_query("* | head 1_000").unwrap().to_string(), "* | limit 1000");
        assert!(parse_query("* | limit -1").is_err());
    }
}
