use super::PipeProcessor;
use crate::block_result::BlockResult;
use crate::error::Result;
use crate::fields_set::FieldsSet;
use crate::lexer::Lexer;
use crate::parser::parse_field_name;
use crate::quote::quote_token_if_needed;
use std::fmt;
use std::sync::Arc;

/// `copy src1 as dst1, src2 as dst2`
#[derive(Debug, Clone)]
pub struct PipeCopy {
    pub src_fields: Vec<String>,
    pub dst_fields: Vec<String>,
}

/// Parses `src [as] dst, ...` pairs shared by `copy` and `rename`.
pub(crate) fn parse_field_pairs(lex: &mut Lexer<'_>, pipe_name: &str) -> Result<(Vec<String>, Vec<String>)> {
    let mut src_fields = Vec::new();
    let mut dst_fields = Vec::new();
    loop {
        let src = parse_field_name(lex)
            .map_err(|err| lex.error(format!("cannot parse source field name in '{pipe_name}': {err}")))?;
        if lex.is_keyword(&["as"]) {
            lex.next_token();
        }
        let dst = parse_field_name(lex)
            .map_err(|err| lex.error(format!("cannot parse destination field name in '{pipe_name}': {err}")))?;
        src_fields.push(src);
        dst_fields.push(dst);
        if !lex.is_keyword(&[","]) {
            return Ok((src_fields, dst_fields));
        }
        lex.next_token();
    }
}

pub(crate) fn field_pairs_string(src_fields: &[String], dst_fields: &[String]) -> String {
    src_fields
        .iter()
        .zip(dst_fields)
        .map(|(src, dst)| format!("{} as {}", quote_token_if_needed(src), quote_token_if_needed(dst)))
        .collect::<Vec<_>>()
        .join(", ")
}

impl PipeCopy {
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        lex.next_token();
        let (src_fields, dst_fields) = parse_field_pairs(lex, "copy")?;
        Ok(Self { src_fields, dst_fields })
    }

    pub(crate) fn update_needed_fields(&self, needed: &mut FieldsSet) {
        for (src, dst) in self.src_fields.iter().zip(&self.dst_fields).rev() {
            if needed.contains(dst) {
                needed.remove(dst);
                needed.add(src);
            }
        }
    }

    pub(crate) fn new_processor(&self, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        Arc::new(CopyProcessor {
            pipe: self.clone(),
            next,
        })
    }
}

impl fmt::Display for PipeCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "copy {}", field_pairs_string(&self.src_fields, &self.dst_fields))
    }
}

struct CopyProcessor {
    pipe: PipeCopy,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for CopyProcessor {
    fn write_block(&self, worker_id: usize, mut br: BlockResult) {
        for (src, dst) in self.pipe.src_fields.iter().zip(&self.pipe.dst_fields) {
            br.copy_column(src, dst);
        }
        self.next.write_block(worker_id, br);
    }

    fn flush(&self) -> Result<()> {
        self.next.flush()
    }
}
