use super::PipeProcessor;
use crate::block_result::BlockResult;
use crate::error::Result;
use crate::fields_set::FieldsSet;
use crate::lexer::Lexer;
use crate::parser::{parse_field_name, parse_result_name};
use crate::quote::quote_token_if_needed;
use std::fmt;
use std::sync::Arc;

/// `len(field) as result` stores the byte length of `field` into `result`.
#[derive(Debug, Clone)]
pub struct PipeLen {
    pub field: String,
    pub result_field: String,
}

impl PipeLen {
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        lex.next_token();
        if !lex.is_keyword(&["("]) {
            return Err(lex.error(format!("missing '(' after 'len'; got {:?}", lex.token)));
        }
        lex.next_token();
        let field = parse_field_name(lex)?;
        if !lex.is_keyword(&[")"]) {
            return Err(lex.error(format!("missing ')' after 'len({field}'")));
        }
        lex.next_token();

        let result_field = if lex.is_keyword(&["|", ")", ""]) {
            format!("len({})", quote_token_if_needed(&field))
        } else {
            parse_result_name(lex)?
        };
        Ok(Self { field, result_field })
    }

    pub(crate) fn update_needed_fields(&self, needed: &mut FieldsSet) {
        if needed.contains(&self.result_field) {
            needed.remove(&self.result_field);
            needed.add(&self.field);
        }
    }

    pub(crate) fn new_processor(&self, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        Arc::new(LenProcessor {
            pipe: self.clone(),
            next,
        })
    }
}

impl fmt::Display for PipeLen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "len({}) as {}",
            quote_token_if_needed(&self.field),
            quote_token_if_needed(&self.result_field)
        )
    }
}

struct LenProcessor {
    pipe: PipeLen,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for LenProcessor {
    fn write_block(&self, worker_id: usize, mut br: BlockResult) {
        let column = br.column(&self.pipe.field);
        if let Some(v) = column.const_value() {
            let n = v.len().to_string();
            drop(column);
            br.add_const_column(self.pipe.result_field.clone(), n);
        } else {
            let lens = column.values().iter().map(|v| v.len().to_string()).collect();
            drop(column);
            br.add_result_column(self.pipe.result_field.clone(), lens);
        }
        self.next.write_block(worker_id, br);
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
    fn test_len() {
        let br = block(&[("a", &["", "abc", "héllo"])]);
        let rows = run_pipes("* | len(a) as n", 1, vec![br]).unwrap();
        assert_eq!(
            rows,
            vec![
                row(&[("a", ""), ("n", "0")]),
                row(&[("a", "abc"), ("n", "3")]),
                row(&[("a", "héllo"), ("n", "6")]),
            ]
        );
    }

    #[test]
    fn test_parse_len() {
        assert_eq!(parse_query("* | len(a) n").unwrap().to_string(), "* | len(a) as n");
        assert_eq!(parse_query("* | len(a)").unwrap().to_string(), "* | len(a) as \"len(a)\"");
        assert!(parse_query("* | len a").is_err());
    }
}
