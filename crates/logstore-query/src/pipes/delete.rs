use super::PipeProcessor;
use crate::block_result::BlockResult;
use crate::error::Result;
use crate::fields_set::FieldsSet;
use crate::lexer::Lexer;
use crate::parser::{field_names_string, parse_field_patterns_list};
use std::fmt;
use std::sync::Arc;

/// `delete a, b*`
#[derive(Debug, Clone)]
pub struct PipeDelete {
    pub fields: Vec<String>,
}

impl PipeDelete {
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        lex.next_token();
        let fields = parse_field_patterns_list(lex)?;
        Ok(Self { fields })
    }

    pub(crate) fn update_needed_fields(&self, needed: &mut FieldsSet) {
        for f in &self.fields {
            needed.remove_pattern(f);
        }
    }

    pub(crate) fn new_processor(&self, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        Arc::new(DeleteProcessor {
            fields: self.fields.clone(),
            next,
        })
    }
}

impl fmt::Display for PipeDelete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delete {}", field_names_string(&self.fields))
    }
}

struct DeleteProcessor {
    fields: Vec<String>,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for DeleteProcessor {
    fn write_block(&self, worker_id: usize, mut br: BlockResult) {
        br.remove_columns(&self.fields);
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
    fn test_delete() {
        let br = block(&[("a", &["1"]), ("ab", &["2"]), ("c", &["3"])]);
        let rows = run_pipes("* | delete a*", 1, vec![br]).unwrap();
        assert_eq!(rows, vec![row(&[("c", "3")])]);
    }
}
