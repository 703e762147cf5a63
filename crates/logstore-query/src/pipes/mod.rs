//! Pipes
//!
//! A [`Pipe`] is one `| name ...` stage of a query. Pipes are plain values:
//! they print back to the text they were parsed from and never change after
//! parsing, apart from the optimizer rewriting them.
//!
//! ## Processors
//!
//! At run time every pipe becomes a [`PipeProcessor`]. Query workers call
//! [`PipeProcessor::write_block`] concurrently, each with its own worker id,
//! so processors keep their state in per-worker shards and combine the shards
//! only in [`PipeProcessor::flush`]. `flush` is called once, after all the
//! workers are done, on the first processor of the chain; every processor
//! flushes its own state to the next processor and then flushes the next one.
//!
//! ```text
//! workers ──write_block──▶ p1 ──▶ p2 ──▶ ... ──▶ sink
//!                          flush ─▶ flush ─▶ ... ─▶ flush
//! ```
//!
//! ## Cancellation
//!
//! Every processor gets its own [`StopSignal`] scope. Stopping it stops the
//! processors before it and the workers, but not the processors after it, so
//! `limit` can end the block scan while a later `sort` still flushes.
//!
//! ## Needed Fields
//!
//! [`Pipe::update_needed_fields`] runs backwards over the pipes, starting
//! from all fields. Each pipe removes the fields it produces and adds the
//! fields it reads, and the result is the set of columns loaded from blocks.

pub mod copy;
pub mod delete;
pub mod extract;
pub mod fields;
pub mod filter;
pub mod format;
pub mod len;
pub mod limit;
pub mod math;
pub mod offset;
pub mod rename;
pub mod sort;
pub mod stats;
pub mod top;
pub mod uniq;

pub use copy::PipeCopy;
pub use delete::PipeDelete;
pub use extract::PipeExtract;
pub use fields::PipeFields;
pub use filter::PipeFilter;
pub use format::{FormatStep, PipeFormat};
pub use len::PipeLen;
pub use limit::PipeLimit;
pub use math::{MathEntry, MathExpr, PipeMath};
pub use offset::PipeOffset;
pub use rename::PipeRename;
pub use sort::{PipeSort, SortField};
pub use stats::{ByStatsField, PipeStats, PipeStatsFunc, StatsFunc, StatsFuncKind, StatsProcessor};
pub use top::PipeTop;
pub use uniq::PipeUniq;

use crate::block_result::BlockResult;
use crate::error::{QueryError, Result};
use crate::fields_set::FieldsSet;
use crate::filter::Filter;
use crate::lexer::Lexer;
use crate::parser::parse_filter_lex;
use crate::quote::is_stats_func_name;
use crate::stop::StopSignal;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Maximum number of rows in the blocks produced by buffering pipes.
pub const OUTPUT_BLOCK_ROWS: usize = 1000;

#[derive(Debug, Clone)]
pub enum Pipe {
    /// `copy a as b, ...`
    Copy(PipeCopy),
    /// `delete a, b*`
    Delete(PipeDelete),
    /// `extract "ip=<ip> " from a`, `extract_regexp "ip=(?P<ip>\S+)"`
    Extract(PipeExtract),
    /// `fields a, b*`
    Fields(PipeFields),
    /// `filter <filter>`
    Filter(PipeFilter),
    /// `format "<a>:<b>" as c`
    Format(PipeFormat),
    /// `len(a) as b`
    Len(PipeLen),
    /// `limit N`
    Limit(PipeLimit),
    /// `math a + b as c, ...`
    Math(PipeMath),
    /// `offset N`
    Offset(PipeOffset),
    /// `rename a as b, ...`
    Rename(PipeRename),
    /// `sort by (a desc) limit N`
    Sort(PipeSort),
    /// `stats by (a) count() as c`
    Stats(PipeStats),
    /// `top N by (a)`
    Top(PipeTop),
    /// `uniq by (a) with hits`
    Uniq(PipeUniq),
}

impl Pipe {
    /// Returns true if the pipe can process an endless stream of rows.
    pub fn can_live_tail(&self) -> bool {
        match self {
            Pipe::Copy(_)
            | Pipe::Delete(_)
            | Pipe::Extract(_)
            | Pipe::Fields(_)
            | Pipe::Filter(_)
            | Pipe::Format(_)
            | Pipe::Len(_)
            | Pipe::Math(_)
            | Pipe::Rename(_) => true,
            Pipe::Limit(_) | Pipe::Offset(_) | Pipe::Sort(_) | Pipe::Stats(_) | Pipe::Top(_) | Pipe::Uniq(_) => false,
        }
    }

    /// Returns true if the pipe passes the values of `field` through unchanged.
    pub fn preserves_field(&self, field: &str) -> bool {
        match self {
            Pipe::Copy(pc) => !pc.dst_fields.iter().any(|f| f == field),
            Pipe::Rename(pr) => !pr.src_fields.iter().chain(&pr.dst_fields).any(|f| f == field),
            Pipe::Delete(pd) => !crate::fields_set::match_any_pattern(&pd.fields, field),
            Pipe::Extract(pe) => !pe.result_fields.iter().any(|f| f == field),
            Pipe::Fields(pf) => crate::fields_set::match_any_pattern(&pf.fields, field),
            Pipe::Format(pf) => pf.result_field != field,
            Pipe::Len(pl) => pl.result_field != field,
            Pipe::Math(pm) => !pm.entries.iter().any(|e| e.result_field == field),
            Pipe::Filter(_) | Pipe::Limit(_) | Pipe::Offset(_) | Pipe::Sort(_) => true,
            Pipe::Top(pt) => pt.by_fields.iter().any(|f| f == field),
            Pipe::Uniq(pu) => pu.by_fields.iter().any(|f| f == field),
            Pipe::Stats(_) => false,
        }
    }

    /// Returns the filters embedded into the pipe.
    pub fn filters(&self) -> Vec<&Arc<Filter>> {
        match self {
            Pipe::Extract(pe) => pe.iff.iter().collect(),
            Pipe::Filter(pf) => vec![&pf.filter],
            Pipe::Format(pf) => pf.iff.iter().collect(),
            Pipe::Stats(ps) => ps.funcs.iter().filter_map(|f| f.iff.as_ref()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn filters_mut(&mut self) -> Vec<&mut Arc<Filter>> {
        match self {
            Pipe::Extract(pe) => pe.iff.iter_mut().collect(),
            Pipe::Filter(pf) => vec![&mut pf.filter],
            Pipe::Format(pf) => pf.iff.iter_mut().collect(),
            Pipe::Stats(ps) => ps.funcs.iter_mut().filter_map(|f| f.iff.as_mut()).collect(),
            _ => Vec::new(),
        }
    }

    /// Turns the fields needed after the pipe into the fields needed before it.
    pub fn update_needed_fields(&self, needed: &mut FieldsSet) {
        match self {
            Pipe::Copy(p) => p.update_needed_fields(needed),
            Pipe::Delete(p) => p.update_needed_fields(needed),
            Pipe::Extract(p) => p.update_needed_fields(needed),
            Pipe::Fields(p) => p.update_needed_fields(needed),
            Pipe::Filter(p) => p.update_needed_fields(needed),
            Pipe::Format(p) => p.update_needed_fields(needed),
            Pipe::Len(p) => p.update_needed_fields(needed),
            Pipe::Limit(_) | Pipe::Offset(_) => {}
            Pipe::Math(p) => p.update_needed_fields(needed),
            Pipe::Rename(p) => p.update_needed_fields(needed),
            Pipe::Sort(p) => p.update_needed_fields(needed),
            Pipe::Stats(p) => p.update_needed_fields(needed),
            Pipe::Top(p) => p.update_needed_fields(needed),
            Pipe::Uniq(p) => p.update_needed_fields(needed),
        }
    }

    pub fn new_processor(&self, ctx: ProcessorContext, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        match self {
            Pipe::Copy(p) => p.new_processor(next),
            Pipe::Delete(p) => p.new_processor(next),
            Pipe::Extract(p) => p.new_processor(next),
            Pipe::Fields(p) => p.new_processor(next),
            Pipe::Filter(p) => p.new_processor(next),
            Pipe::Format(p) => p.new_processor(next),
            Pipe::Len(p) => p.new_processor(next),
            Pipe::Limit(p) => p.new_processor(ctx, next),
            Pipe::Math(p) => p.new_processor(next),
            Pipe::Offset(p) => p.new_processor(next),
            Pipe::Rename(p) => p.new_processor(next),
            Pipe::Sort(p) => p.new_processor(ctx, next),
            Pipe::Stats(p) => p.new_processor(ctx, next),
            Pipe::Top(p) => p.new_processor(ctx, next),
            Pipe::Uniq(p) => p.new_processor(ctx, next),
        }
    }
}

impl fmt::Display for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pipe::Copy(p) => p.fmt(f),
            Pipe::Delete(p) => p.fmt(f),
            Pipe::Extract(p) => p.fmt(f),
            Pipe::Fields(p) => p.fmt(f),
            Pipe::Filter(p) => p.fmt(f),
            Pipe::Format(p) => p.fmt(f),
            Pipe::Len(p) => p.fmt(f),
            Pipe::Limit(p) => p.fmt(f),
            Pipe::Math(p) => p.fmt(f),
            Pipe::Offset(p) => p.fmt(f),
            Pipe::Rename(p) => p.fmt(f),
            Pipe::Sort(p) => p.fmt(f),
            Pipe::Stats(p) => p.fmt(f),
            Pipe::Top(p) => p.fmt(f),
            Pipe::Uniq(p) => p.fmt(f),
        }
    }
}

/// Runtime state of a pipe.
pub trait PipeProcessor: Send + Sync {
    /// Processes a block of rows. Called concurrently with distinct `worker_id`s.
    fn write_block(&self, worker_id: usize, br: BlockResult);

    /// Pushes the buffered state to the next processor and flushes it.
    fn flush(&self) -> Result<()>;
}

/// Settings for building a [`PipeProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    /// Number of query workers, which is also the number of state shards.
    pub workers: usize,
    /// Stops the processors before this one and the block workers.
    pub cancel: StopSignal,
    /// Stops the whole query.
    pub query_stop: StopSignal,
    /// Memory budget for buffering pipes such as `stats`, `sort` and `uniq`.
    pub max_state_size: usize,
}

/// Final processor of a chain, handing every non-empty block to a callback.
pub struct PipeSink {
    write: Arc<dyn Fn(usize, BlockResult) + Send + Sync>,
}

impl PipeSink {
    pub fn new(write: impl Fn(usize, BlockResult) + Send + Sync + 'static) -> Self {
        Self { write: Arc::new(write) }
    }
}

impl PipeProcessor for PipeSink {
    fn write_block(&self, worker_id: usize, br: BlockResult) {
        if !br.is_empty() {
            (self.write)(worker_id, br);
        }
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds processors for `pipes` ending at `sink`.
///
/// Returns the first processor and the stop scope block workers must observe.
pub fn new_processor_chain(
    pipes: &[Pipe],
    workers: usize,
    query_stop: &StopSignal,
    max_state_size: usize,
    sink: Arc<dyn PipeProcessor>,
) -> (Arc<dyn PipeProcessor>, StopSignal) {
    let mut next = sink;
    let mut scope = query_stop.clone();
    for p in pipes.iter().rev() {
        let cancel = scope.child();
        let ctx = ProcessorContext {
            workers: workers.max(1),
            cancel: cancel.clone(),
            query_stop: query_stop.clone(),
            max_state_size,
        };
        next = p.new_processor(ctx, next);
        scope = cancel;
    }
    (next, scope)
}

/// Per-worker state of a processor.
pub(crate) struct Shards<T> {
    shards: Vec<Mutex<T>>,
}

impl<T: Default> Shards<T> {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            shards: (0..workers.max(1)).map(|_| Mutex::new(T::default())).collect(),
        }
    }
}

impl<T> Shards<T> {
    pub(crate) fn get(&self, worker_id: usize) -> MutexGuard<'_, T> {
        lock(&self.shards[worker_id % self.shards.len()])
    }

    /// Takes the state out of every shard.
    pub(crate) fn take_all(&self) -> Vec<T>
    where
        T: Default,
    {
        self.shards.iter().map(|m| std::mem::take(&mut *lock(m))).collect()
    }
}

/// Memory accounting shared by the shards of a buffering processor.
pub(crate) struct StateBudget {
    used: AtomicUsize,
    max: usize,
    exceeded: AtomicBool,
}

impl StateBudget {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            used: AtomicUsize::new(0),
            max,
            exceeded: AtomicBool::new(false),
        }
    }

    /// Accounts `n` more bytes. Stops `cancel` and returns false once the budget is exceeded.
    pub(crate) fn add(&self, n: usize, cancel: &StopSignal) -> bool {
        if self.exceeded.load(Ordering::Acquire) {
            return false;
        }
        let used = self.used.fetch_add(n, Ordering::AcqRel) + n;
        if used > self.max {
            self.exceeded.store(true, Ordering::Release);
            cancel.stop();
            return false;
        }
        true
    }

    /// Returns `n` bytes accounted by an earlier [`StateBudget::add`].
    pub(crate) fn release(&self, n: usize) {
        self.used.fetch_sub(n, Ordering::AcqRel);
    }

    pub(crate) fn check(&self, pipe: &dyn fmt::Display) -> Result<()> {
        if self.exceeded.load(Ordering::Acquire) {
            return Err(QueryError::ResourceLimit(format!(
                "cannot calculate [{pipe}], since it requires more than {} bytes of memory",
                self.max
            )));
        }
        Ok(())
    }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Collects rows into blocks of at most [`OUTPUT_BLOCK_ROWS`] rows with the same columns.
pub(crate) struct RowsWriter<'a> {
    next: &'a dyn PipeProcessor,
    names: Vec<String>,
    columns: Vec<Vec<String>>,
    rows_len: usize,
}

impl<'a> RowsWriter<'a> {
    pub(crate) fn new(next: &'a dyn PipeProcessor) -> Self {
        Self {
            next,
            names: Vec::new(),
            columns: Vec::new(),
            rows_len: 0,
        }
    }

    pub(crate) fn write_row(&mut self, names: &[String], values: Vec<String>) {
        if self.names.as_slice() != names {
            self.flush();
            self.names = names.to_vec();
            self.columns = vec![Vec::new(); names.len()];
        }
        for (column, v) in self.columns.iter_mut().zip(values) {
            column.push(v);
        }
        self.rows_len += 1;
        if self.rows_len >= OUTPUT_BLOCK_ROWS {
            self.flush();
        }
    }

    pub(crate) fn flush(&mut self) {
        if self.rows_len == 0 {
            return;
        }
        let columns = self
            .names
            .iter()
            .cloned()
            .zip(self.columns.iter_mut().map(std::mem::take))
            .collect();
        let br = BlockResult::from_result_columns(self.rows_len, columns);
        self.rows_len = 0;
        self.next.write_block(0, br);
    }
}

/// Parses the pipes following the first `|`.
pub(crate) fn parse_pipes(lex: &mut Lexer<'_>) -> Result<Vec<Pipe>> {
    let mut pipes = Vec::new();
    loop {
        pipes.push(parse_pipe(lex)?);
        if lex.is_keyword(&["|"]) {
            lex.next_token();
            continue;
        }
        if lex.is_keyword(&[")", ""]) {
            return Ok(pipes);
        }
        let last = &pipes[pipes.len() - 1];
        return Err(lex.error(format!(
            "unexpected token after [{last}]: {:?}; want '|' or ')'",
            lex.token
        )));
    }
}

fn parse_pipe(lex: &mut Lexer<'_>) -> Result<Pipe> {
    if lex.is_keyword(&["|", ")", ""]) {
        return Err(lex.error("missing pipe"));
    }
    let pipe = if lex.is_keyword(&["copy", "cp"]) {
        Pipe::Copy(PipeCopy::parse(lex)?)
    } else if lex.is_keyword(&["delete", "del", "rm", "drop"]) {
        Pipe::Delete(PipeDelete::parse(lex)?)
    } else if lex.is_keyword(&["extract", "extract_regexp"]) {
        Pipe::Extract(PipeExtract::parse(lex)?)
    } else if lex.is_keyword(&["fields", "keep"]) {
        Pipe::Fields(PipeFields::parse(lex)?)
    } else if lex.is_keyword(&["filter", "where"]) {
        lex.next_token();
        Pipe::Filter(PipeFilter::parse(lex)?)
    } else if lex.is_keyword(&["format"]) {
        Pipe::Format(PipeFormat::parse(lex)?)
    } else if lex.is_keyword(&["len"]) {
        Pipe::Len(PipeLen::parse(lex)?)
    } else if lex.is_keyword(&["limit", "head"]) {
        Pipe::Limit(PipeLimit::parse(lex)?)
    } else if lex.is_keyword(&["math", "eval"]) {
        Pipe::Math(PipeMath::parse(lex)?)
    } else if lex.is_keyword(&["offset", "skip"]) {
        Pipe::Offset(PipeOffset::parse(lex)?)
    } else if lex.is_keyword(&["rename", "mv"]) {
        Pipe::Rename(PipeRename::parse(lex)?)
    } else if lex.is_keyword(&["sort", "order"]) {
        Pipe::Sort(PipeSort::parse(lex)?)
    } else if lex.is_keyword(&["stats"]) {
        lex.next_token();
        Pipe::Stats(PipeStats::parse(lex)?)
    } else if lex.is_keyword(&["top"]) {
        Pipe::Top(PipeTop::parse(lex)?)
    } else if lex.is_keyword(&["uniq"]) {
        Pipe::Uniq(PipeUniq::parse(lex)?)
    } else if !lex.is_quoted_token() && (lex.is_keyword(&["by"]) || is_stats_func_name(&lex.token.to_lowercase())) {
        Pipe::Stats(PipeStats::parse(lex)?)
    } else {
        Pipe::Filter(PipeFilter {
            filter: parse_filter_lex(lex, false)?,
        })
    };
    Ok(pipe)
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::parser::parse_query;

    /// Collects the rows reaching the end of a processor chain.
    #[derive(Default)]
    pub(crate) struct Collector {
        rows: Mutex<Vec<Vec<(String, String)>>>,
    }

    impl Collector {
        pub(crate) fn rows(&self) -> Vec<Vec<(String, String)>> {
            lock(&self.rows).clone()
        }
    }

    impl PipeProcessor for Collector {
        fn write_block(&self, _worker_id: usize, br: BlockResult) {
            let mut rows = lock(&self.rows);
            for i in 0..br.rows_len() {
                rows.push(
                    br.row(i)
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                );
            }
        }

        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    pub(crate) fn block(columns: &[(&str, &[&str])]) -> BlockResult {
        let rows_len = columns.first().map_or(0, |(_, v)| v.len());
        BlockResult::from_result_columns(
            rows_len,
            columns
                .iter()
                .map(|(name, values)| (name.to_string(), values.iter().map(|v| v.to_string()).collect()))
                .collect(),
        )
    }

    /// Runs the pipes of `q` over `blocks`, writing block `i` from worker `i % workers`.
    pub(crate) fn run_pipes(q: &str, workers: usize, blocks: Vec<BlockResult>) -> Result<Vec<Vec<(String, String)>>> {
        let q = parse_query(q)?;
        let collector = Arc::new(Collector::default());
        let stop = StopSignal::new();
        let (first, scope) = new_processor_chain(&q.pipes, workers, &stop, 1 << 30, collector.clone());
        for (i, br) in blocks.into_iter().enumerate() {
            if scope.is_stopped() {
                break;
            }
            first.write_block(i % workers, br);
        }
        first.flush()?;
        Ok(collector.rows())
    }

    pub(crate) fn row(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use crate::parser::parse_query;

    fn check(s: &str, want: &str) {
        let q = parse_query(s).unwrap_or_else(|err| panic!("cannot parse {s:?}: {err}"));
        assert_eq!(q.to_string(), want);
        let q2 = parse_query(want).unwrap_or_else(|err| panic!("cannot reparse {want:?}: {err}"));
        assert_eq!(q2.to_string(), want);
    }

    #[test]
    fn test_parse_pipe_aliases() {
        check("* | keep a, b*", "* | fields a, b*");
        check("* | drop a", "* | delete a");
        check("* | cp a b", "* | copy a as b");
        check("* | mv a as b, c d", "* | rename a as b, c as d");
        check("* | head 3", "* | limit 3");
        check("* | skip 3", "* | offset 3");
        check("* | limit 1 | where foo", "* | limit 1 | filter foo");
        check("* | order by (a desc)", "* | sort by (a desc)");
        check("* | eval a + 1 as b", "* | math (a + 1) as b");
    }

    #[test]
    fn test_parse_pipe_fallbacks() {
        check("* | count()", "* | stats count(*) as \"count(*)\"");
        check("* | by (a) count() x", "* | stats by (a) count(*) as x");
        check("a | foo:bar", "a foo:bar");
        check("* | limit 5 | foo:bar", "* | limit 5 | filter foo:bar");
        assert!(parse_query("* | count").is_err());
        assert!(parse_query("* | limit 1 foo").is_err());
        assert!(parse_query("* |").is_err());
    }

    #[test]
    fn test_chain_cancels_upstream() {
        let blocks = (0..10).map(|i| block(&[("a", &[&*i.to_string()])])).collect();
        let rows = run_pipes("* | limit 2", 1, blocks).unwrap();
        assert_eq!(rows, vec![row(&[("a", "0")]), row(&[("a", "1")])]);
    }
}
