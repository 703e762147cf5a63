//! The `stats` pipe.
//!
//! `stats [by (f1, f2:bucket, ...)] func1(...) [if (filter)] [as] name1, ...`
//!
//! Rows are grouped by the values of the `by` fields, optionally rounded down
//! to buckets, and every group keeps one [`StatsProcessor`] per function.
//! Each query worker owns a shard of groups; the shards are merged at flush.
//!
//! Stats states can be exported into a compact binary form and imported back,
//! which is how partial states computed on different nodes are combined:
//! merging is associative, so any split of the input rows gives the same result
//! as processing all of them at once. `quantile` and `median` keep a bounded
//! random sample and are the only approximate functions.

mod count;
mod count_uniq;
mod min_max;
mod quantile;
mod sum;
mod values;

pub use quantile::MAX_HISTOGRAM_SAMPLES;

use super::{PipeProcessor, ProcessorContext, RowsWriter, Shards, StateBudget};
use crate::bitmap::Bitmap;
use crate::block_result::{BlockResult, BlockResultColumn};
use crate::bucket::Bucket;
use crate::error::Result;
use crate::fields_set::{match_any_pattern, FieldsSet};
use crate::filter::Filter;
use crate::lexer::Lexer;
use crate::parser::{field_names_string, parse_field_pattern, parse_if_filter, parse_result_name, parse_uint};
use crate::quote::{is_stats_func_name, quote_token_if_needed};
use logstore_core::get_canonical_column_name;
use logstore_core::values::try_parse_float64;
use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A `by` field of `stats`, with an optional bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct ByStatsField {
    pub name: String,
    pub bucket: Option<Bucket>,
}

impl ByStatsField {
    /// Returns `None` if `size_str` or `offset_str` cannot be parsed. An empty `size_str` means no bucket.
    pub fn new(name: &str, size_str: &str, offset_str: &str) -> Option<Self> {
        let bucket = if size_str.is_empty() {
            None
        } else {
            Some(Bucket::new(size_str, offset_str)?)
        };
        Some(Self {
            name: name.to_string(),
            bucket,
        })
    }

    fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        if lex.is_keyword(&[",", "(", ")", "|", ":", ""]) {
            return Err(lex.error(format!("unexpected token {:?}; want a 'by' field name", lex.token)));
        }
        let name = get_canonical_column_name(&lex.next_compound_token_ext(&[":"])?).to_string();
        if !lex.is_keyword(&[":"]) {
            return Ok(Self { name, bucket: None });
        }
        lex.next_token();
        let size_str = lex.next_compound_token()?;
        let mut offset_str = String::new();
        if lex.is_keyword(&["offset"]) {
            lex.next_token();
            offset_str = lex.next_compound_token()?;
        }
        Self::new(&name, &size_str, &offset_str).ok_or_else(|| {
            lex.error(format!("cannot parse bucket {size_str:?} with offset {offset_str:?} for the field {name:?}"))
        })
    }

    fn key_column<'a>(&self, br: &'a BlockResult) -> Cow<'a, BlockResultColumn> {
        let c = br.column(&self.name);
        match &self.bucket {
            Some(b) => Cow::Owned(c.bucketed(b)),
            None => c,
        }
    }
}

impl fmt::Display for ByStatsField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote_token_if_needed(&self.name))?;
        if let Some(b) = &self.bucket {
            write!(f, ":{b}")?;
        }
        Ok(())
    }
}

/// The kind of a stats function.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsFuncKind {
    /// Rows with at least one non-empty field; `count(*)` counts every row.
    Count,
    /// Rows where every field is empty.
    CountEmpty,
    /// Distinct non-empty value tuples.
    CountUniq,
    Sum,
    Min,
    Max,
    Avg,
    /// Sorted distinct values as a JSON array.
    UniqValues,
    /// All non-empty values as a JSON array.
    Values,
    /// Approximate `phi` quantile.
    Quantile { phi: f64, phi_str: String },
    Median,
}

impl StatsFuncKind {
    fn name(&self) -> &'static str {
        match self {
            StatsFuncKind::Count => "count",
            StatsFuncKind::CountEmpty => "count_empty",
            StatsFuncKind::CountUniq => "count_uniq",
            StatsFuncKind::Sum => "sum",
            StatsFuncKind::Min => "min",
            StatsFuncKind::Max => "max",
            StatsFuncKind::Avg => "avg",
            StatsFuncKind::UniqValues => "uniq_values",
            StatsFuncKind::Values => "values",
            StatsFuncKind::Quantile { .. } => "quantile",
            StatsFuncKind::Median => "median",
        }
    }

    fn supports_limit(&self) -> bool {
        matches!(self, StatsFuncKind::CountUniq | StatsFuncKind::UniqValues | StatsFuncKind::Values)
    }
}

/// A stats function call such as `count_uniq(a, b) limit 10`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsFunc {
    pub kind: StatsFuncKind,
    /// Field patterns the function reads. Empty means all fields.
    pub fields: Vec<String>,
    /// Zero means no limit.
    pub limit: u64,
}

impl StatsFunc {
    fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        let name = lex.token.to_lowercase();
        if lex.is_quoted_token() || !is_stats_func_name(&name) {
            return Err(lex.error(format!("unknown stats function {:?}", lex.token)));
        }
        lex.next_token();
        if !lex.is_keyword(&["("]) {
            return Err(lex.error(format!("missing '(' after '{name}'")));
        }
        lex.next_token();

        let kind = match name.as_str() {
            "count" => StatsFuncKind::Count,
            "count_empty" => StatsFuncKind::CountEmpty,
            "count_uniq" => StatsFuncKind::CountUniq,
            "sum" => StatsFuncKind::Sum,
            "min" => StatsFuncKind::Min,
            "max" => StatsFuncKind::Max,
            "avg" => StatsFuncKind::Avg,
            "uniq_values" => StatsFuncKind::UniqValues,
            "values" => StatsFuncKind::Values,
            "median" => StatsFuncKind::Median,
            "quantile" => {
                if lex.is_keyword(&[")", ""]) {
                    return Err(lex.error("missing 'phi' arg in 'quantile'"));
                }
                let phi_str = lex.next_compound_token()?;
                let phi = try_parse_float64(&phi_str)
                    .filter(|phi| (0.0..=1.0).contains(phi))
                    .ok_or_else(|| lex.error(format!("'phi' arg in 'quantile' must be in the range [0..1]; got {phi_str:?}")))?;
                if lex.is_keyword(&[","]) {
                    lex.next_token();
                }
                StatsFuncKind::Quantile { phi, phi_str }
            }
            _ => panic!("BUG: unexpected stats function {name:?}"),
        };

        let mut fields = Vec::new();
        loop {
            if lex.is_keyword(&[")"]) {
                lex.next_token();
                break;
            }
            if lex.is_keyword(&[","]) {
                return Err(lex.error(format!("unexpected ',' in '{name}' args")));
            }
            fields.push(parse_field_pattern(lex)?);
            if lex.is_keyword(&[","]) {
                lex.next_token();
                if lex.is_keyword(&[")"]) {
                    return Err(lex.error(format!("missing field after ',' in '{name}' args")));
                }
            } else if !lex.is_keyword(&[")"]) {
                return Err(lex.error(format!("unexpected token {:?} in '{name}' args; want ',' or ')'", lex.token)));
            }
        }
        if fields.iter().any(|f| f == "*") {
            fields.clear();
        }

        let mut limit = 0;
        if kind.supports_limit() && lex.is_keyword(&["limit"]) {
            lex.next_token();
            let s = lex.next_compound_token()?;
            limit = parse_uint(&s).ok_or_else(|| lex.error(format!("cannot parse 'limit {s}' in '{name}'")))?;
        }

        Ok(Self { kind, fields, limit })
    }

    /// Creates an empty state for the function.
    pub fn new_processor(&self) -> Box<dyn StatsProcessor> {
        let fields = self.fields.clone();
        match &self.kind {
            StatsFuncKind::Count => Box::new(count::StatsCount::new(fields, false)),
            StatsFuncKind::CountEmpty => Box::new(count::StatsCount::new(fields, true)),
            StatsFuncKind::CountUniq => Box::new(count_uniq::StatsCountUniq::new(fields, self.limit)),
            StatsFuncKind::Sum => Box::new(sum::StatsSum::new(fields, false)),
            StatsFuncKind::Avg => Box::new(sum::StatsSum::new(fields, true)),
            StatsFuncKind::Min => Box::new(min_max::StatsMinMax::new(fields, false)),
            StatsFuncKind::Max => Box::new(min_max::StatsMinMax::new(fields, true)),
            StatsFuncKind::UniqValues => Box::new(values::StatsValues::new(fields, self.limit, true)),
            StatsFuncKind::Values => Box::new(values::StatsValues::new(fields, self.limit, false)),
            StatsFuncKind::Quantile { phi, .. } => Box::new(quantile::StatsQuantile::new(fields, *phi)),
            StatsFuncKind::Median => Box::new(quantile::StatsQuantile::new(fields, 0.5)),
        }
    }

    fn update_needed_fields(&self, needed: &mut FieldsSet) {
        if self.fields.is_empty() {
            if self.kind != StatsFuncKind::Count {
                needed.add("*");
            }
            return;
        }
        needed.add_all(&self.fields);
    }
}

impl fmt::Display for StatsFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.kind.name())?;
        let fields = if self.fields.is_empty() {
            "*".to_string()
        } else {
            field_names_string(&self.fields)
        };
        match &self.kind {
            StatsFuncKind::Quantile { phi_str, .. } if self.fields.is_empty() => f.write_str(phi_str)?,
            StatsFuncKind::Quantile { phi_str, .. } => write!(f, "{phi_str}, {fields}")?,
            _ => f.write_str(&fields)?,
        }
        f.write_str(")")?;
        if self.limit > 0 {
            write!(f, " limit {}", self.limit)?;
        }
        Ok(())
    }
}

/// A stats function together with its optional row filter and result name.
#[derive(Debug, Clone)]
pub struct PipeStatsFunc {
    pub func: StatsFunc,
    pub iff: Option<Arc<Filter>>,
    pub result_name: String,
}

impl fmt::Display for PipeStatsFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.func.fmt(f)?;
        if let Some(iff) = &self.iff {
            write!(f, " if ({iff})")?;
        }
        write!(f, " as {}", quote_token_if_needed(&self.result_name))
    }
}

#[derive(Debug, Clone)]
pub struct PipeStats {
    pub by_fields: Vec<ByStatsField>,
    pub funcs: Vec<PipeStatsFunc>,
}

impl PipeStats {
    /// Parses the pipe body. The lexer must be right after `stats`, or at `by` or a function name.
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        let mut by_fields = Vec::new();
        if lex.is_keyword(&["by", "("]) {
            if lex.is_keyword(&["by"]) {
                lex.next_token();
            }
            if !lex.is_keyword(&["("]) {
                return Err(lex.error("missing '(' after 'by'"));
            }
            lex.next_token();
            loop {
                if lex.is_keyword(&[")"]) {
                    lex.next_token();
                    break;
                }
                by_fields.push(ByStatsField::parse(lex)?);
                if lex.is_keyword(&[","]) {
                    lex.next_token();
                    if lex.is_keyword(&[")"]) {
                        return Err(lex.error("missing 'by' field after ','"));
                    }
                } else if !lex.is_keyword(&[")"]) {
                    return Err(lex.error(format!("unexpected token {:?} in 'by'; want ',' or ')'", lex.token)));
                }
            }
        }

        let mut funcs: Vec<PipeStatsFunc> = Vec::new();
        loop {
            let func = StatsFunc::parse(lex)?;
            let iff = if lex.is_keyword(&["if"]) {
                Some(parse_if_filter(lex)?)
            } else {
                None
            };
            let result_name = if lex.is_keyword(&[",", "|", ")", ""]) {
                func.to_string()
            } else {
                parse_result_name(lex)?
            };
            if funcs.iter().any(|f| f.result_name == result_name) {
                return Err(lex.error(format!("duplicate stats result name {result_name:?}")));
            }
            funcs.push(PipeStatsFunc { func, iff, result_name });
            if !lex.is_keyword(&[","]) {
                break;
            }
            lex.next_token();
        }

        let ps = Self { by_fields, funcs };
        debug!(pipe = %ps, "parsed stats pipe");
        Ok(ps)
    }

    pub(crate) fn update_needed_fields(&self, needed: &mut FieldsSet) {
        let mut new_needed = FieldsSet::new();
        for bf in &self.by_fields {
            new_needed.add(&bf.name);
        }
        for f in &self.funcs {
            if !needed.contains(&f.result_name) {
                continue;
            }
            f.func.update_needed_fields(&mut new_needed);
            if let Some(iff) = &f.iff {
                iff.update_needed_fields(&mut new_needed);
            }
        }
        *needed = new_needed;
    }

    pub(crate) fn new_processor(&self, ctx: ProcessorContext, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        Arc::new(StatsPipeProcessor {
            pipe: self.clone(),
            shards: Shards::new(ctx.workers),
            budget: StateBudget::new(ctx.max_state_size),
            ctx,
            next,
        })
    }

    fn new_group(&self) -> Vec<Box<dyn StatsProcessor>> {
        self.funcs.iter().map(|f| f.func.new_processor()).collect()
    }

    fn result_names(&self) -> Vec<String> {
        self.by_fields
            .iter()
            .map(|bf| bf.name.clone())
            .chain(self.funcs.iter().map(|f| f.result_name.clone()))
            .collect()
    }
}

impl fmt::Display for PipeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stats ")?;
        if !self.by_fields.is_empty() {
            let by: Vec<String> = self.by_fields.iter().map(|bf| bf.to_string()).collect();
            write!(f, "by ({}) ", by.join(", "))?;
        }
        let funcs: Vec<String> = self.funcs.iter().map(|pf| pf.to_string()).collect();
        f.write_str(&funcs.join(", "))
    }
}

/// Mutable state of a single stats function within a group.
///
/// Every update and merge returns the number of bytes the state grew by.
pub trait StatsProcessor: Send {
    fn update_all_rows(&mut self, br: &BlockResult) -> usize;

    fn update_row(&mut self, br: &BlockResult, row: usize) -> usize;

    /// Merges a state of the same function into `self`.
    ///
    /// # Panics
    ///
    /// Panics if `other` belongs to a different function.
    fn merge_state(&mut self, other: &dyn StatsProcessor) -> usize;

    fn export_state(&self, dst: &mut Vec<u8>);

    /// Reads back a state written by [`StatsProcessor::export_state`], replacing the current one.
    fn import_state(&mut self, src: &mut &[u8]) -> logstore_core::Result<usize>;

    fn finalize(&self) -> String;

    fn as_any(&self) -> &dyn Any;
}

pub(crate) fn downcast<T: 'static>(other: &dyn StatsProcessor) -> &T {
    match other.as_any().downcast_ref::<T>() {
        Some(sp) => sp,
        None => panic!("BUG: cannot merge states of different stats functions"),
    }
}

/// Returns the columns a stats function reads; every column for empty `fields`.
pub(crate) fn stats_columns<'a>(br: &'a BlockResult, fields: &[String]) -> Vec<Cow<'a, BlockResultColumn>> {
    if fields.is_empty() {
        return br.columns().iter().map(Cow::Borrowed).collect();
    }
    let mut columns = Vec::with_capacity(fields.len());
    for f in fields {
        if f.ends_with('*') {
            columns.extend(
                br.columns()
                    .iter()
                    .filter(|c| match_any_pattern(std::slice::from_ref(f), c.name()))
                    .map(Cow::Borrowed),
            );
        } else {
            columns.push(br.column(f));
        }
    }
    columns
}

type Group = Vec<Box<dyn StatsProcessor>>;

#[derive(Default)]
struct StatsShard {
    groups: HashMap<Vec<String>, Group>,
}

impl StatsShard {
    fn group(&mut self, pipe: &PipeStats, key: &[String], bytes: &mut usize) -> &mut Group {
        if !self.groups.contains_key(key) {
            *bytes += key.iter().map(|s| s.len() + std::mem::size_of::<String>()).sum::<usize>()
                + pipe.funcs.len() * std::mem::size_of::<Box<dyn StatsProcessor>>();
            self.groups.insert(key.to_vec(), pipe.new_group());
        }
        match self.groups.get_mut(key) {
            Some(g) => g,
            None => panic!("BUG: missing stats group that was just inserted"),
        }
    }
}

struct StatsPipeProcessor {
    pipe: PipeStats,
    ctx: ProcessorContext,
    shards: Shards<StatsShard>,
    budget: StateBudget,
    next: Arc<dyn PipeProcessor>,
}

impl StatsPipeProcessor {
    /// Returns the rows each function sees; `None` means all rows.
    fn func_bitmaps(&self, br: &BlockResult) -> Vec<Option<Bitmap>> {
        self.pipe
            .funcs
            .iter()
            .map(|f| {
                f.iff.as_ref().map(|iff| {
                    let mut bm = Bitmap::new_set(br.rows_len());
                    iff.apply_to_block_result(br, &mut bm);
                    bm
                })
            })
            .collect()
    }
}

impl PipeProcessor for StatsPipeProcessor {
    fn write_block(&self, worker_id: usize, br: BlockResult) {
        if br.is_empty() || self.ctx.query_stop.is_stopped() {
            return;
        }
        let bitmaps = self.func_bitmaps(&br);
        let key_columns: Vec<_> = self.pipe.by_fields.iter().map(|bf| bf.key_column(&br)).collect();
        let mut shard = self.shards.get(worker_id);
        let mut bytes = 0;

        if key_columns.iter().all(|c| c.is_const()) {
            let key: Vec<String> = key_columns.iter().map(|c| c.value(0).to_string()).collect();
            let group = shard.group(&self.pipe, &key, &mut bytes);
            for (sp, bm) in group.iter_mut().zip(&bitmaps) {
                match bm {
                    None => bytes += sp.update_all_rows(&br),
                    Some(bm) if bm.is_zero() => {}
                    Some(bm) => bytes += sp.update_all_rows(&BlockResult::from_filtered(&br, bm)),
                }
            }
        } else {
            let mut key: Vec<String> = Vec::new();
            for row in 0..br.rows_len() {
                let same_key = row > 0 && key_columns.iter().zip(&key).all(|(c, k)| c.value(row) == k);
                if !same_key {
                    key = key_columns.iter().map(|c| c.value(row).to_string()).collect();
                }
                let group = shard.group(&self.pipe, &key, &mut bytes);
                for (sp, bm) in group.iter_mut().zip(&bitmaps) {
                    if bm.as_ref().map_or(true, |bm| bm.is_set(row)) {
                        bytes += sp.update_row(&br, row);
                    }
                }
            }
        }
        drop(shard);
        self.budget.add(bytes, &self.ctx.cancel);
    }

    fn flush(&self) -> Result<()> {
        self.budget.check(&self.pipe)?;

        let mut shards = self.shards.take_all().into_iter();
        let mut merged = shards.next().map(|s| s.groups).unwrap_or_default();
        for shard in shards {
            for (key, group) in shard.groups {
                match merged.get_mut(&key) {
                    Some(dst) => {
                        for (d, s) in dst.iter_mut().zip(&group) {
                            d.merge_state(s.as_ref());
                        }
                    }
                    None => {
                        merged.insert(key, group);
                    }
                }
            }
        }
        if merged.is_empty() && self.pipe.by_fields.is_empty() {
            merged.insert(Vec::new(), self.pipe.new_group());
        }

        let names = self.pipe.result_names();
        let mut wr = RowsWriter::new(self.next.as_ref());
        for (mut values, group) in merged {
            if self.ctx.query_stop.is_stopped() {
                break;
            }
            values.extend(group.iter().map(|sp| sp.finalize()));
            wr.write_row(&names, values);
        }
        wr.flush();
        self.next.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query;
    use crate::pipes::test_utils::*;

    fn check(s: &str, want: &str) {
        assert_eq!(parse_query(s).unwrap().to_string(), want);
        assert_eq!(parse_query(want).unwrap().to_string(), want);
    }

    fn parse_func(s: &str) -> StatsFunc {
        let q = parse_query(&format!("* | stats {s} as x")).unwrap();
        let Some(crate::pipes::Pipe::Stats(ps)) = q.pipes.first() else {
            panic!("BUG: expected a stats pipe in {q}");
        };
        ps.funcs[0].func.clone()
    }

    /// Runs `q` and orders the output rows, since groups come out in no particular order.
    fn run_sorted(q: &str, workers: usize, blocks: Vec<BlockResult>) -> Vec<Vec<(String, String)>> {
        let mut rows = run_pipes(q, workers, blocks).unwrap();
        rows.sort();
        rows
    }

    /// Feeds the rows of `br` to a new state, one row at a time when `by_row` is set.
    fn compute(func: &StatsFunc, br: &BlockResult, by_row: bool) -> Box<dyn StatsProcessor> {
        let mut sp = func.new_processor();
        if by_row {
            for row in 0..br.rows_len() {
                sp.update_row(br, row);
            }
        } else {
            sp.update_all_rows(br);
        }
        sp
    }

    #[test]
    fn test_parse_stats() {
        check("* | stats count()", "* | stats count(*) as \"count(*)\"");
        check("* | stats count(*) as rows", "* | stats count(*) as rows");
        check(
            "* | stats by (_time:1h offset 30m, ip:/24) count() c, sum(x) s",
            "* | stats by (_time:1h offset 30m, ip:/24) count(*) as c, sum(x) as s",
        );
        check("* | stats (a, b) count_uniq(c) limit 10 n", "* | stats by (a, b) count_uniq(c) limit 10 as n");
        check("* | stats quantile(0.9, a, b) q, median(a) m", "* | stats quantile(0.9, a, b) as q, median(a) as m");
        check("* | stats quantile(0.5) q", "* | stats quantile(0.5) as q");
        check("* | stats count(a*) if (error) errors", "* | stats count(a*) if (error) as errors");
        check("* | stats uniq_values(a) limit 3 u, values(*) v", "* | stats uniq_values(a) limit 3 as u, values(*) as v");
        check("* | stats by (n:10) min(a) as lo, max(a) as hi, avg(a) mean", "* | stats by (n:10) min(a) as lo, max(a) as hi, avg(a) as mean");

        assert!(parse_query("* | stats").is_err());
        assert!(parse_query("* | stats foo()").is_err());
        assert!(parse_query("* | stats count() x, sum(a) x").is_err());
        assert!(parse_query("* | stats quantile(2, a)").is_err());
        assert!(parse_query("* | stats by (a,) count()").is_err());
        assert!(parse_query("* | stats by (n:foo) count()").is_err());
        assert!(parse_query("* | stats count(a,)").is_err());
    }

    #[test]
    fn test_needed_fields() {
        let needed = |s: &str| {
            let q = parse_query(s).unwrap();
            let mut fs = FieldsSet::all();
            for p in q.pipes.iter().rev() {
                p.update_needed_fields(&mut fs);
            }
            fs.names().map(String::from).collect::<Vec<String>>()
        };
        assert_eq!(needed("* | stats count() c"), Vec::<String>::new());
        assert_eq!(needed("* | stats by (a) sum(b) s, count(c) if (d:x) n"), vec!["a", "b", "c", "d"]);
        assert_eq!(needed("* | stats sum(b) s, max(c) m | fields s"), vec!["b"]);
    }

    #[test]
    fn test_stats_group_by() {
        let blocks = vec![
            block(&[("a", &["x", "y", "x"]), ("n", &["1", "2", "3"])]),
            block(&[("a", &["y", "z"]), ("n", &["4", ""])]),
        ];
        let rows = run_sorted(
            "* | stats by (a) count() c, sum(n) s, min(n) lo, max(n) hi, avg(n) mean",
            2,
            blocks,
        );
        assert_eq!(
            rows,
            vec![
                row(&[("a", "x"), ("c", "2"), ("s", "4"), ("lo", "1"), ("hi", "3"), ("mean", "2")]),
                row(&[("a", "y"), ("c", "2"), ("s", "6"), ("lo", "2"), ("hi", "4"), ("mean", "3")]),
                row(&[("a", "z"), ("c", "1"), ("s", "NaN"), ("lo", ""), ("hi", ""), ("mean", "NaN")]),
            ]
        );
    }

    #[test]
    fn test_stats_without_rows() {
        let rows = run_pipes("* | stats count() c, sum(a) s", 2, Vec::new()).unwrap();
        assert_eq!(rows, vec![row(&[("c", "0"), ("s", "NaN")])]);

        let rows = run_pipes("* | stats by (a) count() c", 2, Vec::new()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_stats_buckets() {
        let blocks = vec![block(&[("n", &["1", "7", "12", "19", "25"])])];
        let rows = run_sorted("* | stats by (n:10) count() c", 1, blocks.clone());
        assert_eq!(
            rows,
            vec![
                row(&[("n", "0"), ("c", "2")]),
                row(&[("n", "10"), ("c", "2")]),
                row(&[("n", "20"), ("c", "1")]),
            ]
        );

        let rows = run_sorted("* | stats by (n:10 offset 5) count() c", 1, blocks);
        assert_eq!(
            rows,
            vec![
                row(&[("n", "-5"), ("c", "1")]),
                row(&[("n", "15"), ("c", "1")]),
                row(&[("n", "25"), ("c", "1")]),
                row(&[("n", "5"), ("c", "2")]),
            ]
        );
    }

    #[test]
    fn test_stats_if() {
        let blocks = vec![block(&[("level", &["error", "info", "error", "warn"]), ("a", &["x", "x", "y", "y"])])];
        let rows = run_sorted(
            "* | stats by (a) count() total, count() if (level:error) errors",
            1,
            blocks.clone(),
        );
        assert_eq!(
            rows,
            vec![
                row(&[("a", "x"), ("total", "2"), ("errors", "1")]),
                row(&[("a", "y"), ("total", "2"), ("errors", "1")]),
            ]
        );

        let rows = run_pipes("* | stats count() if (level:warn) w, count_uniq(a) if (level:error) u", 1, blocks).unwrap();
        assert_eq!(rows, vec![row(&[("w", "1"), ("u", "2")])]);
    }

    #[test]
    fn test_stats_funcs() {
        let br = block(&[("a", &["3", "", "1", "3", "b"]), ("b", &["", "", "x", "", ""])]);
        let cases = [
            ("count(a)", "4"),
            ("count(*)", "5"),
            ("count(b)", "1"),
            ("count_empty(a, b)", "1"),
            ("count_empty(b)", "4"),
            ("count_empty()", "1"),
            ("count_empty(*)", "1"),
            ("count_uniq(a)", "3"),
            ("count_uniq(a, b)", "3"),
            ("count_uniq(a) limit 2", "2"),
            ("sum(a)", "7"),
            ("avg(a)", "2.3333333333333335"),
            ("min(a)", "1"),
            ("max(a)", "b"),
            ("min(b)", "x"),
            ("uniq_values(a)", r#"["1","3","b"]"#),
            ("uniq_values(a) limit 2", r#"["1","3"]"#),
            ("values(a)", r#"["3","1","3","b"]"#),
            ("median(a)", "3"),
            ("quantile(0, a)", "1"),
            ("quantile(1, a)", "3"),
        ];
        for (s, want) in cases {
            let func = parse_func(s);
            assert_eq!(compute(&func, &br, false).finalize(), want, "{s}");
            assert_eq!(compute(&func, &br, true).finalize(), want, "{s} by rows");
        }
    }

    #[test]
    fn test_stats_merge_and_export() {
        let first = block(&[("a", &["5", "2", "x"]), ("b", &["1", "", "1"])]);
        let second = block(&[("a", &["2", "", "9"]), ("b", &["3", "4", ""])]);
        let all = block(&[("a", &["5", "2", "x", "2", "", "9"]), ("b", &["1", "", "1", "3", "4", ""])]);
        for s in [
            "count(a)",
            "count_empty(a)",
            "count_uniq(a, b)",
            "sum(a)",
            "avg(a, b)",
            "min(a)",
            "max(b)",
            "uniq_values(a, b)",
            "values(a)",
            "median(a)",
        ] {
            let func = parse_func(s);
            let want = compute(&func, &all, false).finalize();

            let mut sp = compute(&func, &first, false);
            let other = compute(&func, &second, true);
            sp.merge_state(other.as_ref());
            let merged = sp.finalize();
            assert_eq!(merged, want, "{s} merged");

            let mut buf = Vec::new();
            sp.export_state(&mut buf);
            let mut imported = func.new_processor();
            let mut src = buf.as_slice();
            imported.import_state(&mut src).unwrap();
            assert!(src.is_empty(), "{s}: {} trailing bytes", src.len());
            assert_eq!(imported.finalize(), merged, "{s} imported");
        }
    }

    #[test]
    fn test_import_truncated_state() {
        let func = parse_func("uniq_values(a)");
        let sp = compute(&func, &block(&[("a", &["x", "y"])]), false);
        let mut buf = Vec::new();
        sp.export_state(&mut buf);
        let mut src = &buf[..buf.len() - 1];
        assert!(func.new_processor().import_state(&mut src).is_err());
    }

    #[test]
    fn test_stats_state_limit() {
        let q = parse_query("* | stats by (a) count() c").unwrap();
        let collector = Arc::new(Collector::default());
        let stop = crate::stop::StopSignal::new();
        let (first, scope) = crate::pipes::new_processor_chain(&q.pipes, 1, &stop, 100, collector);
        let values: Vec<String> = (0..100).map(|i| format!("value-{i}")).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        first.write_block(0, block(&[("a", &refs)]));
        assert!(scope.is_stopped());
        let err = first.flush().unwrap_err();
        assert!(matches!(err, crate::error::QueryError::ResourceLimit(_)), "{err}");
    }
}
