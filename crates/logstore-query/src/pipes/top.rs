use super::uniq::{parse_by_fields, HitsShard};
use super::{PipeProcessor, ProcessorContext, RowsWriter, Shards, StateBudget};
use crate::block_result::BlockResult;
use crate::error::Result;
use crate::fields_set::FieldsSet;
use crate::lexer::Lexer;
use crate::parser::{field_names_string, parse_field_name, parse_uint};
use crate::quote::{is_number_prefix, quote_token_if_needed};
use std::fmt;
use std::sync::Arc;

/// Number of entries returned by `top` without an explicit limit.
pub const DEFAULT_TOP_LIMIT: u64 = 10;

/// `top [N] [by] (a, b) [hits as h] [rank [as r]]`
///
/// Returns the `N` most frequent value combinations of the `by` fields,
/// ordered by hits. Ties are ordered by the values.
#[derive(Debug, Clone)]
pub struct PipeTop {
    pub by_fields: Vec<String>,
    pub limit: u64,
    pub hits_field: String,
    pub rank_field: Option<String>,
}

impl PipeTop {
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        lex.next_token();

        let mut limit = DEFAULT_TOP_LIMIT;
        if !lex.is_quoted_token() && is_number_prefix(&lex.token) {
            let s = lex.next_compound_token()?;
            limit = parse_uint(&s).ok_or_else(|| lex.error(format!("cannot parse N in 'top {s}'")))?;
        }

        if lex.is_keyword(&["by"]) {
            lex.next_token();
        }
        if lex.is_keyword(&["|", ")", ""]) {
            return Err(lex.error("missing 'by' fields in 'top'"));
        }
        let by_fields = parse_by_fields(lex, "top")?;

        let mut hits_field = "hits".to_string();
        if lex.is_keyword(&["hits"]) {
            lex.next_token();
            if lex.is_keyword(&["as"]) {
                lex.next_token();
            }
            hits_field = parse_field_name(lex)?;
        }
        while by_fields.contains(&hits_field) {
            hits_field.push('s');
        }

        let mut rank_field = None;
        if lex.is_keyword(&["rank"]) {
            lex.next_token();
            let mut name = if lex.is_keyword(&["as"]) {
                lex.next_token();
                parse_field_name(lex)?
            } else {
                "rank".to_string()
            };
            while by_fields.contains(&name) || name == hits_field {
                name.push('s');
            }
            rank_field = Some(name);
        }

        Ok(Self {
            by_fields,
            limit,
            hits_field,
            rank_field,
        })
    }

    pub(crate) fn update_needed_fields(&self, needed: &mut FieldsSet) {
        if needed.is_empty() {
            return;
        }
        *needed = FieldsSet::from_patterns(&self.by_fields);
    }

    pub(crate) fn new_processor(&self, ctx: ProcessorContext, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        Arc::new(TopProcessor {
            pipe: self.clone(),
            shards: Shards::new(ctx.workers),
            budget: StateBudget::new(ctx.max_state_size),
            ctx,
            next,
        })
    }
}

impl fmt::Display for PipeTop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("top")?;
        if self.limit != DEFAULT_TOP_LIMIT {
            write!(f, " {}", self.limit)?;
        }
        write!(f, " by ({})", field_names_string(&self.by_fields))?;
        if self.hits_field != "hits" {
            write!(f, " hits as {}", quote_token_if_needed(&self.hits_field))?;
        }
        if let Some(rank) = &self.rank_field {
            f.write_str(" rank")?;
            if rank != "rank" {
                write!(f, " as {}", quote_token_if_needed(rank))?;
            }
        }
        Ok(())
    }
}

struct TopProcessor {
    pipe: PipeTop,
    ctx: ProcessorContext,
    shards: Shards<HitsShard>,
    budget: StateBudget,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for TopProcessor {
    fn write_block(&self, worker_id: usize, br: BlockResult) {
        if br.is_empty() || self.ctx.query_stop.is_stopped() {
            return;
        }
        let (_, new_bytes) = self.shards.get(worker_id).update(&br, &self.pipe.by_fields);
        self.budget.add(new_bytes, &self.ctx.cancel);
    }

    fn flush(&self) -> Result<()> {
        self.budget.check(&self.pipe)?;
        let mut entries: Vec<(Vec<String>, u64)> = HitsShard::merge(self.shards.take_all()).into_iter().collect();
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(usize::try_from(self.pipe.limit).unwrap_or(usize::MAX));

        let mut names = self.pipe.by_fields.clone();
        names.push(self.pipe.hits_field.clone());
        if let Some(rank) = &self.pipe.rank_field {
            names.push(rank.clone());
        }

        let mut wr = RowsWriter::new(self.next.as_ref());
        for (i, (mut values, hits)) in entries.into_iter().enumerate() {
            if self.ctx.query_stop.is_stopped() {
                break;
            }
            values.push(hits.to_string());
            if self.pipe.rank_field.is_some() {
                values.push((i + 1).to_string());
            }
            wr.write_row(&names, values);
        }
        wr.flush();
        self.next.flush()
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_query;
    use crate::pipes::test_utils::*;

    fn check(s: &str, want: &str) {
        assert_eq!(parse_query(s).unwrap().to_string(), want);
        assert_eq!(parse_query(want).unwrap().to_string(), want);
    }

    #[test]
    fn test_parse_top() {
        check("* | top by (a)", "* | top by (a)");
        check("* | top 10 a, b", "* | top by (a, b)");
        check("* | top 5 (a) hits as n rank", "* | top 5 by (a) hits as n rank");
        check("* | top by (hits)", "* | top by (hits) hits as hitss");
        check("* | top by (a) rank as r", "* | top by (a) rank as r");
        assert!(parse_query("* | top").is_err());
        assert!(parse_query("* | top 5").is_err());
        assert!(parse_query("* | top by (a*)").is_err());
    }

    #[test]
    fn test_top_rows() {
        let blocks = vec![
            block(&[("a", &["x", "y", "x", "z"])]),
            block(&[("a", &["y", "z", "x"])]),
            block(&[("a", &["w"])]),
        ];
        let rows = run_pipes("* | top 3 by (a) rank", 2, blocks).unwrap();
        assert_eq!(
            rows,
            vec![
                row(&[("a", "x"), ("hits", "3"), ("rank", "1")]),
                row(&[("a", "y"), ("hits", "2"), ("rank", "2")]),
                row(&[("a", "z"), ("hits", "2"), ("rank", "3")]),
            ]
        );
    }
}
