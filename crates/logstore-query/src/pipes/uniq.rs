use super::{PipeProcessor, ProcessorContext, RowsWriter, Shards, StateBudget};
use crate::block_result::BlockResult;
use crate::error::Result;
use crate::fields_set::{is_wildcard_pattern, FieldsSet};
use crate::lexer::Lexer;
use crate::parser::{field_names_string, parse_field_names_in_parens, parse_field_patterns_list, parse_uint};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// `uniq [by (a, b)] [with hits] [limit N]`
///
/// Without `by` fields the whole rows are deduplicated.
#[derive(Debug, Clone)]
pub struct PipeUniq {
    pub by_fields: Vec<String>,
    pub hits_field: Option<String>,
    /// Zero means no limit.
    pub limit: u64,
}

/// Parses the `by` fields of `uniq` and `top`, with or without parens.
pub(crate) fn parse_by_fields(lex: &mut Lexer<'_>, pipe_name: &str) -> Result<Vec<String>> {
    let fields = if lex.is_keyword(&["("]) {
        parse_field_names_in_parens(lex)?
    } else {
        parse_field_patterns_list(lex)?
    };
    if let Some(f) = fields.iter().find(|f| is_wildcard_pattern(f)) {
        return Err(lex.error(format!("wildcard field {f:?} cannot be used in '{pipe_name} by'")));
    }
    Ok(fields)
}

impl PipeUniq {
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        lex.next_token();
        let mut pu = PipeUniq {
            by_fields: Vec::new(),
            hits_field: None,
            limit: 0,
        };

        if lex.is_keyword(&["by"]) {
            lex.next_token();
            pu.by_fields = parse_by_fields(lex, "uniq")?;
        } else if lex.is_keyword(&["("]) {
            pu.by_fields = parse_by_fields(lex, "uniq")?;
        }

        if lex.is_keyword(&["with"]) {
            lex.next_token();
            if !lex.is_keyword(&["hits"]) {
                return Err(lex.error(format!("missing 'hits' after 'with'; got {:?}", lex.token)));
            }
        }
        if lex.is_keyword(&["hits"]) {
            lex.next_token();
            let mut name = "hits".to_string();
            while pu.by_fields.contains(&name) {
                name.push('s');
            }
            pu.hits_field = Some(name);
        }

        if lex.is_keyword(&["limit"]) {
            lex.next_token();
            let s = lex.next_compound_token()?;
            pu.limit = parse_uint(&s).ok_or_else(|| lex.error(format!("cannot parse 'limit {s}'")))?;
        }
        Ok(pu)
    }

    pub(crate) fn update_needed_fields(&self, needed: &mut FieldsSet) {
        if needed.is_empty() {
            return;
        }
        *needed = if self.by_fields.is_empty() {
            FieldsSet::all()
        } else {
            FieldsSet::from_patterns(&self.by_fields)
        };
    }

    pub(crate) fn new_processor(&self, ctx: ProcessorContext, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        Arc::new(UniqProcessor {
            pipe: self.clone(),
            shards: Shards::new(ctx.workers),
            budget: StateBudget::new(ctx.max_state_size),
            entries: AtomicU64::new(0),
            ctx,
            next,
        })
    }
}

impl fmt::Display for PipeUniq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("uniq")?;
        if !self.by_fields.is_empty() {
            write!(f, " by ({})", field_names_string(&self.by_fields))?;
        }
        if self.hits_field.is_some() {
            f.write_str(" with hits")?;
        }
        if self.limit > 0 {
            write!(f, " limit {}", self.limit)?;
        }
        Ok(())
    }
}

/// Per-worker hit counters keyed by the values of the grouping fields.
///
/// When grouping by whole rows, keys hold alternating names and values.
#[derive(Default)]
pub(crate) struct HitsShard {
    pub(crate) hits: HashMap<Vec<String>, u64>,
}

impl HitsShard {
    /// Counts the rows of `br`, returning the number of new keys and the bytes they take.
    pub(crate) fn update(&mut self, br: &BlockResult, by_fields: &[String]) -> (u64, usize) {
        let mut new_keys = 0;
        let mut new_bytes = 0;
        let columns: Vec<_> = if by_fields.is_empty() {
            br.columns().iter().map(std::borrow::Cow::Borrowed).collect()
        } else {
            by_fields.iter().map(|f| br.column(f)).collect()
        };
        for row in 0..br.rows_len() {
            let key: Vec<String> = if by_fields.is_empty() {
                columns
                    .iter()
                    .flat_map(|c| [c.name().to_string(), c.value(row).to_string()])
                    .collect()
            } else {
                columns.iter().map(|c| c.value(row).to_string()).collect()
            };
            match self.hits.get_mut(&key) {
                Some(n) => *n += 1,
                None => {
                    new_keys += 1;
                    new_bytes += key.iter().map(|s| s.len() + std::mem::size_of::<String>()).sum::<usize>();
                    self.hits.insert(key, 1);
                }
            }
        }
        (new_keys, new_bytes)
    }

    /// Merges the shards into a single map.
    pub(crate) fn merge(shards: Vec<HitsShard>) -> HashMap<Vec<String>, u64> {
        let mut iter = shards.into_iter();
        let mut merged = iter.next().map(|s| s.hits).unwrap_or_default();
        for shard in iter {
            for (k, n) in shard.hits {
                *merged.entry(k).or_insert(0) += n;
            }
        }
        merged
    }
}

/// Splits a whole-row key back into names and values.
pub(crate) fn split_row_key(key: Vec<String>) -> (Vec<String>, Vec<String>) {
    let mut names = Vec::with_capacity(key.len() / 2);
    let mut values = Vec::with_capacity(key.len() / 2);
    for (i, s) in key.into_iter().enumerate() {
        if i % 2 == 0 {
            names.push(s);
        } else {
            values.push(s);
        }
    }
    (names, values)
}

struct UniqProcessor {
    pipe: PipeUniq,
    ctx: ProcessorContext,
    shards: Shards<HitsShard>,
    budget: StateBudget,
    entries: AtomicU64,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for UniqProcessor {
    fn write_block(&self, worker_id: usize, br: BlockResult) {
        if br.is_empty() || self.ctx.query_stop.is_stopped() {
            return;
        }
        let (new_keys, new_bytes) = self.shards.get(worker_id).update(&br, &self.pipe.by_fields);
        if !self.budget.add(new_bytes, &self.ctx.cancel) {
            return;
        }
        let entries = self.entries.fetch_add(new_keys, Ordering::AcqRel) + new_keys;
        if self.pipe.limit > 0 && entries > self.pipe.limit {
            self.ctx.cancel.stop();
        }
    }

    fn flush(&self) -> Result<()> {
        self.budget.check(&self.pipe)?;
        let mut entries: Vec<(Vec<String>, u64)> = HitsShard::merge(self.shards.take_all()).into_iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        if self.pipe.limit > 0 {
            entries.truncate(usize::try_from(self.pipe.limit).unwrap_or(usize::MAX));
        }

        let mut wr = RowsWriter::new(self.next.as_ref());
        for (key, hits) in entries {
            if self.ctx.query_stop.is_stopped() {
                break;
            }
            let (mut names, mut values) = if self.pipe.by_fields.is_empty() {
                split_row_key(key)
            } else {
                (self.pipe.by_fields.clone(), key)
            };
            if let Some(hits_field) = &self.pipe.hits_field {
                names.push(hits_field.clone());
                values.push(hits.to_string());
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
    fn test_parse_uniq() {
        check("* | uniq", "* | uniq");
        check("* | uniq by (a, b) with hits limit 10", "* | uniq by (a, b) with hits limit 10");
        check("* | uniq by a hits", "* | uniq by (a) with hits");
        check("* | uniq (hits) hits", "* | uniq by (hits) with hits");
        check("* | uniq by (a) | limit 5", "* | uniq by (a) limit 5 | limit 5");
        assert!(parse_query("* | uniq by (a*)").is_err());
        assert!(parse_query("* | uniq with a").is_err());
    }

    #[test]
    fn test_uniq_rows() {
        let blocks = vec![
            block(&[("a", &["x", "y", "x"]), ("b", &["1", "1", "1"])]),
            block(&[("a", &["y", "z"]), ("b", &["1", "2"])]),
        ];
        let rows = run_pipes("* | uniq by (a) with hits", 2, blocks.clone()).unwrap();
        assert_eq!(
            rows,
            vec![
                row(&[("a", "x"), ("hits", "2")]),
                row(&[("a", "y"), ("hits", "2")]),
                row(&[("a", "z"), ("hits", "1")]),
            ]
        );

        let rows = run_pipes("* | uniq", 1, blocks.clone()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], row(&[("a", "x"), ("b", "1")]));

        let rows = run_pipes("* | uniq by (b) limit 1", 1, blocks).unwrap();
        assert_eq!(rows, vec![row(&[("b", "1")])]);
    }
}
