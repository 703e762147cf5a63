use super::{PipeProcessor, ProcessorContext, RowsWriter, Shards, StateBudget};
use crate::block_result::BlockResult;
use crate::error::Result;
use crate::fields_set::FieldsSet;
use crate::lexer::Lexer;
use crate::parser::{parse_field_name, parse_uint};
use crate::quote::quote_token_if_needed;
use logstore_core::values::try_parse_number;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{self, AtomicU64};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub name: String,
    pub is_desc: bool,
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote_token_if_needed(&self.name))?;
        if self.is_desc {
            f.write_str(" desc")?;
        }
        Ok(())
    }
}

/// `sort [by (a [desc], ...)] [desc] [offset N] [limit N] [rank [as] r]`
///
/// Without `by` fields the rows are ordered by all their fields, in name order.
/// With `by` fields and a limit, every worker keeps only its best
/// `offset + limit` rows in a bounded heap instead of buffering whole blocks.
#[derive(Debug, Clone)]
pub struct PipeSort {
    pub by_fields: Vec<SortField>,
    pub is_desc: bool,
    pub offset: u64,
    /// Zero means no limit.
    pub limit: u64,
    pub rank_field: Option<String>,
}

impl PipeSort {
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        lex.next_token();
        let mut ps = PipeSort {
            by_fields: Vec::new(),
            is_desc: false,
            offset: 0,
            limit: 0,
            rank_field: None,
        };

        if lex.is_keyword(&["by"]) {
            lex.next_token();
            if !lex.is_keyword(&["("]) {
                return Err(lex.error("missing '(' after 'sort by'"));
            }
        }
        if lex.is_keyword(&["("]) {
            ps.by_fields = parse_sort_fields(lex)?;
        }

        loop {
            if lex.is_keyword(&["desc"]) {
                lex.next_token();
                ps.is_desc = true;
            } else if lex.is_keyword(&["offset"]) {
                lex.next_token();
                let s = lex.next_compound_token()?;
                ps.offset = parse_uint(&s).ok_or_else(|| lex.error(format!("cannot parse 'offset {s}'")))?;
            } else if lex.is_keyword(&["limit"]) {
                lex.next_token();
                let s = lex.next_compound_token()?;
                ps.limit = parse_uint(&s).ok_or_else(|| lex.error(format!("cannot parse 'limit {s}'")))?;
            } else if lex.is_keyword(&["rank"]) {
                lex.next_token();
                let name = if lex.is_keyword(&["as"]) {
                    lex.next_token();
                    parse_field_name(lex)?
                } else {
                    "rank".to_string()
                };
                ps.rank_field = Some(name);
            } else {
                return Ok(ps);
            }
        }
    }

    pub(crate) fn update_needed_fields(&self, needed: &mut FieldsSet) {
        if let Some(rank) = &self.rank_field {
            needed.remove(rank);
        }
        if needed.is_empty() {
            return;
        }
        if self.by_fields.is_empty() {
            *needed = FieldsSet::all();
            return;
        }
        for f in &self.by_fields {
            needed.add(&f.name);
        }
    }

    pub(crate) fn new_processor(&self, ctx: ProcessorContext, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        if self.limit > 0 && !self.by_fields.is_empty() {
            let desc: Arc<[bool]> = self.by_fields.iter().map(|f| f.is_desc != self.is_desc).collect();
            return Arc::new(SortTopkProcessor {
                pipe: self.clone(),
                desc,
                max_rows: usize::try_from(self.offset.saturating_add(self.limit)).unwrap_or(usize::MAX),
                next_seq: AtomicU64::new(0),
                shards: Shards::new(ctx.workers),
                budget: StateBudget::new(ctx.max_state_size),
                ctx,
                next,
            });
        }
        Arc::new(SortProcessor {
            pipe: self.clone(),
            shards: Shards::new(ctx.workers),
            budget: StateBudget::new(ctx.max_state_size),
            ctx,
            next,
        })
    }
}

fn parse_sort_fields(lex: &mut Lexer<'_>) -> Result<Vec<SortField>> {
    lex.next_token();
    let mut fields = Vec::new();
    loop {
        if lex.is_keyword(&[")"]) {
            lex.next_token();
            return Ok(fields);
        }
        if lex.is_keyword(&[","]) {
            return Err(lex.error("unexpected ','"));
        }
        let name = parse_field_name(lex)?;
        let mut is_desc = false;
        if lex.is_keyword(&["desc"]) {
            lex.next_token();
            is_desc = true;
        } else if lex.is_keyword(&["asc"]) {
            lex.next_token();
        }
        fields.push(SortField { name, is_desc });
        if lex.is_keyword(&[","]) {
            lex.next_token();
            if lex.is_keyword(&[")"]) {
                return Err(lex.error("missing field name after ','"));
            }
        } else if !lex.is_keyword(&[")"]) {
            return Err(lex.error(format!("unexpected token {:?} in 'sort by'; want ',' or ')'", lex.token)));
        }
    }
}

impl fmt::Display for PipeSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sort")?;
        if !self.by_fields.is_empty() {
            let fields: Vec<String> = self.by_fields.iter().map(|sf| sf.to_string()).collect();
            write!(f, " by ({})", fields.join(", "))?;
        }
        if self.is_desc {
            f.write_str(" desc")?;
        }
        if self.offset > 0 {
            write!(f, " offset {}", self.offset)?;
        }
        if self.limit > 0 {
            write!(f, " limit {}", self.limit)?;
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

/// Orders two values numerically when both are numbers, else as strings.
pub(crate) fn compare_values(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    if let (Some(fa), Some(fb)) = (try_parse_number(a), try_parse_number(b)) {
        if let Some(ord) = fa.partial_cmp(&fb) {
            if ord != Ordering::Equal {
                return ord;
            }
        }
    }
    a.cmp(b)
}

/// Compares sort keys value by value; `desc[i]` reverses the i-th comparison.
fn compare_sort_keys(desc: &[bool], a: &[String], b: &[String]) -> Ordering {
    for (i, &is_desc) in desc.iter().enumerate() {
        let mut ord = compare_values(&a[i], &b[i]);
        if is_desc {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Sets the `rank` field of an output row, appending it when missing.
fn set_rank(names: &mut Vec<String>, values: &mut Vec<String>, rank_field: &str, rank: usize) {
    let rank_value = rank.to_string();
    match names.iter().position(|n| n == rank_field) {
        Some(pos) => values[pos] = rank_value,
        None => {
            names.push(rank_field.to_string());
            values.push(rank_value);
        }
    }
}

fn offset_and_limit(pipe: &PipeSort) -> (usize, usize) {
    let offset = usize::try_from(pipe.offset).unwrap_or(usize::MAX);
    let limit = match pipe.limit {
        0 => usize::MAX,
        n => usize::try_from(n).unwrap_or(usize::MAX),
    };
    (offset, limit)
}

struct SortProcessor {
    pipe: PipeSort,
    ctx: ProcessorContext,
    shards: Shards<Vec<BlockResult>>,
    budget: StateBudget,
    next: Arc<dyn PipeProcessor>,
}

/// A buffered row together with its sort key.
struct SortRow {
    block: usize,
    row: usize,
    key: Vec<String>,
}

impl SortProcessor {
    fn sort_field_names(&self, blocks: &[BlockResult]) -> Vec<SortField> {
        if !self.pipe.by_fields.is_empty() {
            return self.pipe.by_fields.clone();
        }
        let mut names: Vec<String> = blocks.iter().flat_map(|br| br.column_names()).collect();
        names.sort();
        names.dedup();
        names
            .into_iter()
            .map(|name| SortField { name, is_desc: false })
            .collect()
    }
}

impl PipeProcessor for SortProcessor {
    fn write_block(&self, worker_id: usize, br: BlockResult) {
        if br.is_empty() || self.ctx.query_stop.is_stopped() {
            return;
        }
        if !self.budget.add(br.size_bytes(), &self.ctx.cancel) {
            return;
        }
        self.shards.get(worker_id).push(br);
    }

    fn flush(&self) -> Result<()> {
        self.budget.check(&self.pipe)?;
        let blocks: Vec<BlockResult> = self.shards.take_all().into_iter().flatten().collect();
        let fields = self.sort_field_names(&blocks);

        let mut rows = Vec::new();
        for (block_idx, br) in blocks.iter().enumerate() {
            let columns: Vec<_> = fields.iter().map(|f| br.column(&f.name)).collect();
            for row in 0..br.rows_len() {
                rows.push(SortRow {
                    block: block_idx,
                    row,
                    key: columns.iter().map(|c| c.value(row).to_string()).collect(),
                });
            }
        }

        let desc: Vec<bool> = fields.iter().map(|f| f.is_desc != self.pipe.is_desc).collect();
        rows.sort_by(|a, b| compare_sort_keys(&desc, &a.key, &b.key));

        let (offset, limit) = offset_and_limit(&self.pipe);

        let mut wr = RowsWriter::new(self.next.as_ref());
        for (i, r) in rows.iter().enumerate().skip(offset).take(limit) {
            if self.ctx.query_stop.is_stopped() {
                break;
            }
            let br = &blocks[r.block];
            let mut names = br.column_names();
            let mut values: Vec<String> = br.columns().iter().map(|c| c.value(r.row).to_string()).collect();
            if let Some(rank) = &self.pipe.rank_field {
                set_rank(&mut names, &mut values, rank, i + 1);
            }
            wr.write_row(&names, values);
        }
        wr.flush();
        self.next.flush()
    }
}

/// A row kept by [`SortTopkProcessor`].
///
/// Rows order by key, then by arrival, so the heap top is the worst kept row.
struct TopkRow {
    desc: Arc<[bool]>,
    key: Vec<String>,
    seq: u64,
    names: Vec<String>,
    values: Vec<String>,
}

impl TopkRow {
    fn size_bytes(&self) -> usize {
        let strings = self.key.iter().chain(&self.names).chain(&self.values);
        std::mem::size_of::<Self>() + strings.map(|s| s.len() + std::mem::size_of::<String>()).sum::<usize>()
    }
}

impl Ord for TopkRow {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_sort_keys(&self.desc, &self.key, &other.key).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for TopkRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TopkRow {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TopkRow {}

/// `sort by (...) limit N`, keeping the best `offset + limit` rows per worker.
struct SortTopkProcessor {
    pipe: PipeSort,
    desc: Arc<[bool]>,
    max_rows: usize,
    next_seq: AtomicU64,
    ctx: ProcessorContext,
    shards: Shards<BinaryHeap<TopkRow>>,
    budget: StateBudget,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for SortTopkProcessor {
    fn write_block(&self, worker_id: usize, br: BlockResult) {
        if br.is_empty() || self.ctx.query_stop.is_stopped() {
            return;
        }
        let by_columns: Vec<_> = self.pipe.by_fields.iter().map(|f| br.column(&f.name)).collect();
        let names = br.column_names();
        let first_seq = self.next_seq.fetch_add(br.rows_len() as u64, atomic::Ordering::Relaxed);

        let mut heap = self.shards.get(worker_id);
        for row in 0..br.rows_len() {
            let key: Vec<String> = by_columns.iter().map(|c| c.value(row).to_string()).collect();
            if heap.len() >= self.max_rows {
                let worse_than_all = heap
                    .peek()
                    .is_some_and(|worst| compare_sort_keys(&self.desc, &key, &worst.key) != Ordering::Less);
                if worse_than_all {
                    continue;
                }
            }
            let r = TopkRow {
                desc: self.desc.clone(),
                key,
                seq: first_seq + row as u64,
                names: names.clone(),
                values: br.columns().iter().map(|c| c.value(row).to_string()).collect(),
            };
            if !self.budget.add(r.size_bytes(), &self.ctx.cancel) {
                return;
            }
            heap.push(r);
            if heap.len() > self.max_rows {
                if let Some(evicted) = heap.pop() {
                    self.budget.release(evicted.size_bytes());
                }
            }
        }
    }

    fn flush(&self) -> Result<()> {
        self.budget.check(&self.pipe)?;
        let mut rows: Vec<TopkRow> = self.shards.take_all().into_iter().flatten().collect();
        rows.sort_unstable();

        let (offset, limit) = offset_and_limit(&self.pipe);
        let mut wr = RowsWriter::new(self.next.as_ref());
        for (i, r) in rows.into_iter().enumerate().skip(offset).take(limit) {
            if self.ctx.query_stop.is_stopped() {
                break;
            }
            let TopkRow { mut names, mut values, .. } = r;
            if let Some(rank) = &self.pipe.rank_field {
                set_rank(&mut names, &mut values, rank, i + 1);
            }
            wr.write_row(&names, values);
        }
        wr.flush();
        self.next.flush()
    }
}
