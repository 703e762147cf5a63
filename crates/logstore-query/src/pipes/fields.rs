use super::PipeProcessor;
use crate::block_result::BlockResult;
use crate::error::Result;
use crate::fields_set::{is_wildcard_pattern, FieldsSet};
use crate::lexer::Lexer;
use crate::parser::{field_names_string, parse_field_patterns_list};
use std::fmt;
use std::sync::Arc;

/// `fields a, b*`
///
/// Fields requested by exact name are always present in the output, empty if missing.
#[derive(Debug, Clone)]
pub struct PipeFields {
    pub fields: Vec<String>,
}

impl PipeFields {
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        lex.next_token();
        let fields = parse_field_patterns_list(lex)?;
        Ok(Self { fields })
    }

    fn keeps_all(&self) -> bool {
        self.fields.iter().any(|f| f == "*")
    }

    pub(crate) fn update_needed_fields(&self, needed: &mut FieldsSet) {
        if !self.keeps_all() {
            needed.retain_patterns(&self.fields);
        }
    }

    pub(crate) fn new_processor(&self, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        Arc::new(FieldsProcessor {
            pipe: self.clone(),
            next,
        })
    }
}

impl fmt::Display for PipeFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fields {}", field_names_string(&self.fields))
    }
}

struct FieldsProcessor {
    pipe: PipeFields,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for FieldsProcessor {
    fn write_block(&self, worker_id: usize, mut br: BlockResult) {
        if !self.pipe.keeps_all() {
            for name in &self.pipe.fields {
                if !is_wildcard_pattern(name) && br.get_column(name).is_none() {
                    br.add_const_column(name.clone(), "");
                }
            }
            br.retain_columns(&self.pipe.fields);
        }
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
    fn test_fields() {
        let br = block(&[("a", &["1"]), ("bx", &["2"]), ("c", &["3"])]);
        let rows = run_pipes("* | fields c, b*, missing", 1, vec![br]).unwrap();
        assert_eq!(rows, vec![row(&[("c", "3"), ("bx", "2"), ("missing", "")])]);

        let br = block(&[("a", &["1"])]);
        let rows = run_pipes("* | fields *", 1, vec![br]).unwrap();
        assert_eq!(rows, vec![row(&[("a", "1")])]);
    }
}
