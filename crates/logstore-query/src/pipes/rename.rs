use super::copy::{field_pairs_string, parse_field_pairs};
use super::PipeProcessor;
use crate::block_result::BlockResult;
use crate::error::Result;
use crate::fields_set::FieldsSet;
use crate::lexer::Lexer;
use std::fmt;
use std::sync::Arc;

/// `rename src1 as dst1, src2 as dst2`
///
/// Renames run in order, so `rename a as b, b as c` moves `a` to `c`.
#[derive(Debug, Clone)]
pub struct PipeRename {
    pub src_fields: Vec<String>,
    pub dst_fields: Vec<String>,
}

impl PipeRename {
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        lex.next_token();
        let (src_fields, dst_fields) = parse_field_pairs(lex, "rename")?;
        Ok(Self { src_fields, dst_fields })
    }

    pub(crate) fn update_needed_fields(&self, needed: &mut FieldsSet) {
        for (src, dst) in self.src_fields.iter().zip(&self.dst_fields).rev() {
            if needed.contains(dst) {
                needed.remove(dst);
                needed.add(src);
            } else {
                needed.remove(src);
            }
        }
    }

    pub(crate) fn new_processor(&self, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        Arc::new(RenameProcessor {
            pipe: self.clone(),
            next,
        })
    }
}

impl fmt::Display for PipeRename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rename {}", field_pairs_string(&self.src_fields, &self.dst_fields))
    }
}

struct RenameProcessor {
    pipe: PipeRename,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for RenameProcessor {
    fn write_block(&self, worker_id: usize, mut br: BlockResult) {
        for (src, dst) in self.pipe.src_fields.iter().zip(&self.pipe.dst_fields) {
            br.rename_column(src, dst);
        }
        self.next.write_block(worker_id, br);
    }

    fn flush(&self) -> Result<()> {
        self.next.flush()
    }
}

#[cfg(test)]
mod tests {
    use crate::fields_set::FieldsSet;
    use crate::parser::parse_query;
    use crate::pipes::test_utils::*;

    #[test]
    fn test_rename() {
        let rows = run_pipes("* | rename a as b, b as c", 1, vec![block(&[("a", &["x"]), ("d", &["y"])])]).unwrap();
        assert_eq!(rows, vec![row(&[("d", "y"), ("c", "x")])]);
    }

    #[test]
    fn test_rename_needed_fields() {
        let q = parse_query("* | rename a as b | fields b").unwrap();
        let mut needed = FieldsSet::all();
        for p in q.pipes.iter().rev() {
            p.update_needed_fields(&mut needed);
        }
        assert_eq!(needed.to_patterns(), vec!["a"]);
    }
}
