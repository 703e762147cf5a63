//! Parsed LogsQL queries.
//!
//! A [`Query`] is a filter tree followed by a list of pipes, plus the
//! `options(...)` it was written with and the reference timestamp used for
//! relative time filters.
//!
//! ## Optimization
//!
//! [`Query::optimize`] runs after parsing and after every programmatic change
//! to the filter or the pipes. It never changes the result of a query:
//!
//! - `offset`/`limit` pipes are merged with each other and into `sort`
//! - a `limit` after `uniq` bounds the number of collected entries
//! - consecutive `filter` pipes are merged, and a leading `filter` pipe joins
//!   the query filter
//! - nested `and`/`or` filters are flattened and `*` filters are dropped
//! - `{...}` stream filters joined by `and` become a single stream filter
//!
//! Every rewrite is applied to `in(<query>)` subqueries too.

use crate::error::{QueryError, Result};
use crate::fields_set::match_any_pattern;
use crate::filter::stream_filter::StreamFilter;
use crate::filter::time::sub_no_overflow;
use crate::filter::{copy_filter, Filter, InValues};
use crate::pipes::{ByStatsField, Pipe, PipeLimit, PipeOffset};
use logstore_core::values::{duration_string, timestamp_rfc3339nano_string};
use logstore_core::{StreamId, MSG_FIELD_NAME, TIME_FIELD_NAME};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Upper bound for the number of workers of a single query.
pub const MAX_CONCURRENCY: usize = 1024;

/// Options set by the `options(...)` prefix of a query.
///
/// Subqueries start from the options of the enclosing query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Maximum number of workers; 0 means the number of available CPUs.
    pub concurrency: u64,
    /// Number of parallel part readers; 0 means derived from `concurrency`.
    pub parallel_readers: u64,
    pub ignore_global_time_filter: Option<bool>,
    pub allow_partial_response: Option<bool>,
    /// Shift in nanoseconds subtracted from the bounds of every `_time` filter.
    pub time_offset: i64,
    pub time_offset_str: String,

    /// Set when the options were written explicitly in this query.
    pub(crate) need_print: bool,
}

impl fmt::Display for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.need_print {
            return Ok(());
        }
        let mut a = Vec::new();
        if self.concurrency > 0 {
            a.push(format!("concurrency={}", self.concurrency));
        }
        if self.parallel_readers > 0 {
            a.push(format!("parallel_readers={}", self.parallel_readers));
        }
        if let Some(v) = self.ignore_global_time_filter {
            a.push(format!("ignore_global_time_filter={v}"));
        }
        if let Some(v) = self.allow_partial_response {
            a.push(format!("allow_partial_response={v}"));
        }
        if !self.time_offset_str.is_empty() {
            a.push(format!("time_offset={}", self.time_offset_str));
        }
        if a.is_empty() {
            return Ok(());
        }
        write!(f, "options({})", a.join(", "))
    }
}

#[derive(Debug, Clone)]
pub struct Query {
    pub opts: QueryOptions,
    pub filter: Arc<Filter>,
    pub pipes: Vec<Pipe>,

    /// Reference timestamp in nanoseconds for relative time filters such as `_time:5m`.
    pub timestamp: i64,
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opts = self.opts.to_string();
        if !opts.is_empty() {
            write!(f, "{opts} ")?;
        }
        write!(f, "{}", self.filter)?;
        for p in &self.pipes {
            write!(f, " | {p}")?;
        }
        Ok(())
    }
}

fn available_cpus() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

impl Query {
    /// Returns the number of workers for running the query.
    pub fn get_concurrency(&self) -> usize {
        let mut concurrency = available_cpus();
        if self.opts.concurrency > 0 && concurrency as u64 > self.opts.concurrency {
            concurrency = self.opts.concurrency as usize;
        }
        concurrency.min(MAX_CONCURRENCY)
    }

    /// Returns the number of parallel part readers, falling back to `default_parallel_readers`.
    pub fn get_parallel_readers(&self, default_parallel_readers: usize) -> usize {
        let n = if self.opts.parallel_readers > 0 {
            self.opts.parallel_readers as usize
        } else if self.opts.concurrency > 0 {
            self.opts.concurrency as usize
        } else if default_parallel_readers > 0 {
            default_parallel_readers
        } else {
            2 * available_cpus()
        };
        n.min(MAX_CONCURRENCY)
    }

    /// Returns true if every pipe can process an unbounded stream of new rows.
    pub fn can_live_tail(&self) -> bool {
        self.pipes.iter().all(Pipe::can_live_tail)
    }

    /// Returns the `[min, max]` time range implied by the top-level `_time` filters.
    pub fn get_filter_time_range(&self) -> (i64, i64) {
        match self.filter.as_ref() {
            Filter::Time { min, max, .. } => (*min, *max),
            Filter::And(filters) => {
                let mut min_ts = i64::MIN;
                let mut max_ts = i64::MAX;
                for f in filters {
                    if let Filter::Time { min, max, .. } = f.as_ref() {
                        min_ts = min_ts.max(*min);
                        max_ts = max_ts.min(*max);
                    }
                }
                (min_ts, max_ts)
            }
            _ => (i64::MIN, i64::MAX),
        }
    }

    /// Calls `visit` on the query and on every `in(<query>)` subquery nested in it.
    pub fn visit_subqueries(&mut self, visit: &mut dyn FnMut(&mut Query)) {
        visit(self);
        self.filter = visit_filter_subqueries(&self.filter, visit);
        for p in &mut self.pipes {
            for f in p.filters_mut() {
                *f = visit_filter_subqueries(f, visit);
            }
        }
    }

    /// Applies the result-preserving rewrites to the query and its subqueries.
    pub fn optimize(&mut self) {
        self.visit_subqueries(&mut |q| q.optimize_no_subqueries());
    }

    fn optimize_no_subqueries(&mut self) {
        optimize_offset_limit_pipes(&mut self.pipes);
        optimize_uniq_limit_pipes(&mut self.pipes);
        merge_filter_pipes(&mut self.pipes);

        if let Some(Pipe::Filter(pf)) = self.pipes.first() {
            self.filter = merge_filters_and(&self.filter, &pf.filter);
            self.pipes.remove(0);
        }

        self.filter = optimize_filter(&self.filter);
        for p in &mut self.pipes {
            for f in p.filters_mut() {
                *f = optimize_filter(f);
            }
        }
    }

    /// Restricts the query and its subqueries to `[start, end]`.
    ///
    /// Queries with `ignore_global_time_filter=true` are left as is.
    pub fn add_time_filter(&mut self, start: i64, end: i64) {
        self.visit_subqueries(&mut |q| q.add_time_filter_no_subqueries(start, end));
    }

    fn add_time_filter_no_subqueries(&mut self, start: i64, end: i64) {
        if self.opts.ignore_global_time_filter == Some(true) {
            return;
        }
        let ft = Arc::new(Filter::Time {
            min: sub_no_overflow(start, self.opts.time_offset),
            max: sub_no_overflow(end, self.opts.time_offset),
            repr: format!(
                "[{},{}]",
                timestamp_rfc3339nano_string(start),
                timestamp_rfc3339nano_string(end)
            ),
        });
        self.filter = prepend_filter_and(ft, &self.filter);
        self.filter = remove_star_filters(&flatten_filters(&self.filter));
    }

    /// Adds `f` to the filters of the query and its subqueries.
    pub fn add_extra_filters(&mut self, f: Filter) {
        let f = Arc::new(f);
        self.visit_subqueries(&mut |q| {
            q.filter = prepend_filter_and(Arc::clone(&f), &q.filter);
            q.optimize_no_subqueries();
        });
    }

    /// Appends `| offset N | limit M` to the query.
    pub fn add_pipe_offset_limit(&mut self, offset: u64, limit: u64) {
        self.pipes.push(Pipe::Offset(PipeOffset { offset }));
        self.pipes.push(Pipe::Limit(PipeLimit { limit }));
        optimize_offset_limit_pipes(&mut self.pipes);
    }

    /// Appends `| limit N` to the query.
    pub fn add_pipe_limit(&mut self, limit: u64) {
        self.pipes.push(Pipe::Limit(PipeLimit { limit }));
        optimize_offset_limit_pipes(&mut self.pipes);
    }

    /// Returns true if some `in(<query>)` filter still waits for its subquery results.
    pub fn has_filter_in_with_query(&self) -> bool {
        let mut found = false;
        self.for_each_filter(&mut |f| {
            found = found || f.visit_filter_recursive(&mut |f| in_values(f).is_some_and(InValues::needs_subquery));
        });
        found
    }

    /// Returns the subqueries of the unresolved `in(<query>)` filters together with the field to collect.
    pub fn filter_in_subqueries(&self) -> Vec<(Query, String)> {
        let mut out: Vec<(Query, String)> = Vec::new();
        self.for_each_filter(&mut |f| {
            f.visit_filter_recursive(&mut |f| {
                if let Some(values) = in_values(f).filter(|v| v.needs_subquery()) {
                    if let Some(q) = &values.subquery {
                        let key = subquery_cache_key(q, &values.subquery_field);
                        if !out.iter().any(|(q, field)| subquery_cache_key(q, field) == key) {
                            out.push((q.as_ref().clone(), values.subquery_field.clone()));
                        }
                    }
                }
                false
            });
        });
        out
    }

    /// Returns a copy of the query with the `in(<query>)` filters filled from `cache`.
    ///
    /// `cache` maps [`subquery_cache_key`] to the values collected by running the subquery.
    pub fn init_filter_in_values(&self, cache: &HashMap<String, Vec<String>>) -> Result<Query> {
        let mut q = self.clone();
        q.filter = resolve_filter_in_values(&q.filter, cache)?;
        for p in &mut q.pipes {
            for f in p.filters_mut() {
                *f = resolve_filter_in_values(f, cache)?;
            }
        }
        Ok(q)
    }

    fn for_each_filter(&self, visit: &mut dyn FnMut(&Filter)) {
        visit(&self.filter);
        for p in &self.pipes {
            for f in p.filters() {
                visit(f);
            }
        }
    }

    /// Returns the `by` fields of the last `stats` pipe that survive the pipes after it.
    pub fn get_stats_by_fields(&self) -> Result<Vec<String>> {
        self.stats_by_fields()
    }

    /// Like [`Query::get_stats_by_fields`], additionally grouping every `stats` pipe by `_time:step`.
    ///
    /// A zero `step` leaves the query unchanged.
    pub fn get_stats_by_fields_add_grouping_by_time(&mut self, step: i64) -> Result<Vec<String>> {
        let idx = self.last_stats_pipe_idx()?;
        if step > 0 {
            for p in &self.pipes[..idx] {
                if !matches!(p, Pipe::Stats(_)) && !p.preserves_field(TIME_FIELD_NAME) {
                    return Err(QueryError::InvalidQuery(format!(
                        "the pipe [{p}] cannot be put in front of the stats pipe, since it changes the {TIME_FIELD_NAME} field"
                    )));
                }
            }
            let step_str = duration_string(step);
            for p in &mut self.pipes {
                if let Pipe::Stats(ps) = p {
                    let bf = ByStatsField::new(TIME_FIELD_NAME, &step_str, "").ok_or_else(|| {
                        QueryError::InvalidQuery(format!("cannot use {step_str:?} as a bucket for the {TIME_FIELD_NAME} field"))
                    })?;
                    ps.by_fields.retain(|f| f.name != TIME_FIELD_NAME);
                    ps.by_fields.insert(0, bf);
                }
            }
        }
        self.stats_by_fields()
    }

    fn last_stats_pipe_idx(&self) -> Result<usize> {
        self.pipes
            .iter()
            .rposition(|p| matches!(p, Pipe::Stats(_)))
            .ok_or_else(|| QueryError::InvalidQuery(format!("missing `| stats ...` pipe in the query [{self}]")))
    }

    fn stats_by_fields(&self) -> Result<Vec<String>> {
        let idx = self.last_stats_pipe_idx()?;
        let Pipe::Stats(ps) = &self.pipes[idx] else {
            panic!("BUG: pipe #{idx} must be a stats pipe");
        };

        let mut by_fields: Vec<String> = ps.by_fields.iter().map(|f| f.name.clone()).collect();
        let mut metrics: Vec<String> = ps.funcs.iter().map(|f| f.result_name.clone()).collect();
        if let Some(m) = metrics.iter().find(|m| by_fields.contains(m)) {
            return Err(QueryError::InvalidQuery(format!(
                "the result of stats function {m:?} overrides the by field with the same name in [{ps}]"
            )));
        }

        let override_err = |p: &Pipe, field: &str| {
            QueryError::InvalidQuery(format!("the pipe [{p}] cannot override the by field {field:?} of the stats pipe"))
        };

        for p in &self.pipes[idx + 1..] {
            match p {
                Pipe::Filter(_) | Pipe::Sort(_) => {}
                Pipe::Math(pm) => {
                    for e in &pm.entries {
                        if by_fields.contains(&e.result_field) {
                            return Err(override_err(p, &e.result_field));
                        }
                        if !metrics.contains(&e.result_field) {
                            metrics.push(e.result_field.clone());
                        }
                    }
                }
                Pipe::Fields(pf) => {
                    if pf.fields.iter().any(|f| f == "*") {
                        continue;
                    }
                    if let Some(bf) = by_fields.iter().find(|bf| !match_any_pattern(&pf.fields, bf)) {
                        return Err(QueryError::InvalidQuery(format!(
                            "the pipe [{p}] drops the by field {bf:?} of the stats pipe"
                        )));
                    }
                    metrics.retain(|m| match_any_pattern(&pf.fields, m));
                }
                Pipe::Delete(pd) => {
                    if let Some(bf) = by_fields.iter().find(|bf| match_any_pattern(&pd.fields, bf)) {
                        return Err(QueryError::InvalidQuery(format!(
                            "the pipe [{p}] deletes the by field {bf:?} of the stats pipe"
                        )));
                    }
                    metrics.retain(|m| !match_any_pattern(&pd.fields, m));
                }
                Pipe::Copy(pc) => {
                    for (src, dst) in pc.src_fields.iter().zip(&pc.dst_fields) {
                        if by_fields.contains(dst) {
                            return Err(override_err(p, dst));
                        }
                        metrics.retain(|m| m != dst);
                        if by_fields.contains(src) {
                            by_fields.push(dst.clone());
                        } else if metrics.contains(src) {
                            metrics.push(dst.clone());
                        }
                    }
                }
                Pipe::Rename(pr) => {
                    for (src, dst) in pr.src_fields.iter().zip(&pr.dst_fields) {
                        if by_fields.contains(dst) {
                            return Err(override_err(p, dst));
                        }
                        metrics.retain(|m| m != dst);
                        if let Some(pos) = by_fields.iter().position(|f| f == src) {
                            by_fields[pos] = dst.clone();
                        } else if let Some(pos) = metrics.iter().position(|f| f == src) {
                            metrics[pos] = dst.clone();
                        }
                    }
                }
                Pipe::Extract(pe) => {
                    for f in &pe.result_fields {
                        if by_fields.contains(f) {
                            return Err(override_err(p, f));
                        }
                        metrics.retain(|m| m != f);
                        by_fields.push(f.clone());
                    }
                }
                Pipe::Format(pf) => {
                    if by_fields.contains(&pf.result_field) {
                        return Err(override_err(p, &pf.result_field));
                    }
                    metrics.retain(|m| *m != pf.result_field);
                    by_fields.push(pf.result_field.clone());
                }
                _ => {
                    return Err(QueryError::InvalidQuery(format!(
                        "the pipe [{p}] cannot be put after the stats pipe"
                    )))
                }
            }
        }

        if metrics.is_empty() {
            return Err(QueryError::InvalidQuery(format!(
                "missing metric fields in the results of query [{self}]"
            )));
        }
        Ok(by_fields)
    }
}

/// Returns the key under which the values of `field` collected by `q` are cached.
pub fn subquery_cache_key(q: &Query, field: &str) -> String {
    format!("{field}\u{0}{q}")
}

/// Returns the values of a filter taking `in(...)`-style values.
fn in_values(f: &Filter) -> Option<&InValues> {
    match f {
        Filter::In { values, .. }
        | Filter::ContainsAll { values, .. }
        | Filter::ContainsAny { values, .. }
        | Filter::StreamId { values, .. } => Some(values),
        _ => None,
    }
}

fn with_in_values(f: &Filter, values: InValues) -> Filter {
    match f {
        Filter::In { field, .. } => Filter::In {
            field: field.clone(),
            values,
        },
        Filter::ContainsAll { field, .. } => Filter::ContainsAll {
            field: field.clone(),
            values,
        },
        Filter::ContainsAny { field, .. } => Filter::ContainsAny {
            field: field.clone(),
            values,
        },
        Filter::StreamId { .. } => {
            let ids = values.values.iter().filter_map(|v| StreamId::try_parse(v)).collect();
            Filter::StreamId { ids, values }
        }
        other => other.clone(),
    }
}

fn has_subquery(f: &Filter) -> bool {
    in_values(f).is_some_and(|v| v.subquery.is_some())
}

/// Rewrites the subqueries of `in(<query>)` filters with `visit`.
pub(crate) fn visit_filter_subqueries(f: &Arc<Filter>, visit: &mut dyn FnMut(&mut Query)) -> Arc<Filter> {
    if !f.visit_filter_recursive(&mut has_subquery) {
        return Arc::clone(f);
    }
    match f.as_ref() {
        Filter::And(filters) => Arc::new(Filter::And(
            filters.iter().map(|f| visit_filter_subqueries(f, visit)).collect(),
        )),
        Filter::Or(filters) => Arc::new(Filter::Or(
            filters.iter().map(|f| visit_filter_subqueries(f, visit)).collect(),
        )),
        Filter::Not(inner) => Arc::new(Filter::Not(visit_filter_subqueries(inner, visit))),
        leaf => {
            let Some(values) = in_values(leaf) else {
                return Arc::clone(f);
            };
            let Some(sub) = &values.subquery else {
                return Arc::clone(f);
            };
            let mut q = sub.as_ref().clone();
            q.visit_subqueries(visit);
            let mut values = values.clone();
            values.subquery = Some(Arc::new(q));
            Arc::new(with_in_values(leaf, values))
        }
    }
}

fn resolve_filter_in_values(f: &Arc<Filter>, cache: &HashMap<String, Vec<String>>) -> Result<Arc<Filter>> {
    copy_filter(
        f,
        &mut |f| in_values(f).is_some_and(InValues::needs_subquery),
        &mut |f| {
            let Some(values) = in_values(f) else {
                return Ok(Arc::new(f.clone()));
            };
            let Some(q) = &values.subquery else {
                return Ok(Arc::new(f.clone()));
            };
            let key = subquery_cache_key(q, &values.subquery_field);
            let resolved = cache.get(&key).ok_or_else(|| {
                QueryError::InvalidQuery(format!(
                    "missing results for subquery [{q}] collecting the field {:?}",
                    values.subquery_field
                ))
            })?;
            Ok(Arc::new(with_in_values(f, values.with_resolved_values(resolved.clone()))))
        },
    )
}

fn prepend_filter_and(head: Arc<Filter>, f: &Arc<Filter>) -> Arc<Filter> {
    match f.as_ref() {
        Filter::And(filters) => {
            let mut out = Vec::with_capacity(filters.len() + 1);
            out.push(head);
            out.extend(filters.iter().cloned());
            Arc::new(Filter::And(out))
        }
        _ => Arc::new(Filter::And(vec![head, Arc::clone(f)])),
    }
}

/// Joins two filters with `and`, reusing the children of an `and` on either side.
fn merge_filters_and(f1: &Arc<Filter>, f2: &Arc<Filter>) -> Arc<Filter> {
    match (f1.as_ref(), f2.as_ref()) {
        (Filter::And(a), _) => {
            let mut out = a.clone();
            out.push(Arc::clone(f2));
            Arc::new(Filter::And(out))
        }
        (_, Filter::And(_)) => prepend_filter_and(Arc::clone(f1), f2),
        _ => Arc::new(Filter::And(vec![Arc::clone(f1), Arc::clone(f2)])),
    }
}

fn optimize_filter(f: &Arc<Filter>) -> Arc<Filter> {
    let f = flatten_filters(f);
    let f = remove_star_filters(&f);
    merge_filters_stream(&f)
}

/// Splices nested `and` into `and` and nested `or` into `or`.
fn flatten_filters(f: &Arc<Filter>) -> Arc<Filter> {
    match f.as_ref() {
        Filter::And(filters) => {
            let mut out = Vec::with_capacity(filters.len());
            for child in filters {
                let child = flatten_filters(child);
                match child.as_ref() {
                    Filter::And(inner) => out.extend(inner.iter().cloned()),
                    _ => out.push(child),
                }
            }
            Arc::new(Filter::And(out))
        }
        Filter::Or(filters) => {
            let mut out = Vec::with_capacity(filters.len());
            for child in filters {
                let child = flatten_filters(child);
                match child.as_ref() {
                    Filter::Or(inner) => out.extend(inner.iter().cloned()),
                    _ => out.push(child),
                }
            }
            Arc::new(Filter::Or(out))
        }
        Filter::Not(inner) => Arc::new(Filter::Not(flatten_filters(inner))),
        _ => Arc::clone(f),
    }
}

/// Replaces `*` with a no-op filter and drops no-op filters from `and`/`or`.
fn remove_star_filters(f: &Arc<Filter>) -> Arc<Filter> {
    match f.as_ref() {
        Filter::Prefix { field, prefix } if prefix.is_empty() && field == MSG_FIELD_NAME => Arc::new(Filter::Noop),
        Filter::And(filters) => {
            let mut out: Vec<Arc<Filter>> = filters
                .iter()
                .map(remove_star_filters)
                .filter(|f| !f.is_noop())
                .collect();
            match out.len() {
                0 => Arc::new(Filter::Noop),
                1 => out.remove(0),
                _ => Arc::new(Filter::And(out)),
            }
        }
        Filter::Or(filters) => {
            let out: Vec<Arc<Filter>> = filters.iter().map(remove_star_filters).collect();
            if out.iter().any(|f| f.is_noop()) {
                return Arc::new(Filter::Noop);
            }
            Arc::new(Filter::Or(out))
        }
        Filter::Not(inner) => Arc::new(Filter::Not(remove_star_filters(inner))),
        _ => Arc::clone(f),
    }
}

/// Merges `{...}` filters joined by a top-level `and` into one.
fn merge_filters_stream(f: &Arc<Filter>) -> Arc<Filter> {
    let Filter::And(filters) = f.as_ref() else {
        return Arc::clone(f);
    };
    let mut streams = Vec::new();
    let mut others = Vec::new();
    for child in filters {
        match child.as_ref() {
            Filter::Stream(sf) if sf.or_filters.len() == 1 => streams.push(sf),
            _ => others.push(Arc::clone(child)),
        }
    }
    if streams.len() <= 1 {
        return Arc::clone(f);
    }

    let tag_filters = streams.iter().flat_map(|sf| sf.or_filters[0].iter().cloned()).collect();
    let merged = Arc::new(Filter::Stream(StreamFilter {
        or_filters: vec![tag_filters],
    }));
    if others.is_empty() {
        return merged;
    }
    others.insert(0, merged);
    Arc::new(Filter::And(others))
}

fn merge_filter_pipes(pipes: &mut Vec<Pipe>) {
    let mut i = 1;
    while i < pipes.len() {
        if let (Pipe::Filter(prev), Pipe::Filter(cur)) = (&pipes[i - 1], &pipes[i]) {
            let merged = merge_filters_and(&prev.filter, &cur.filter);
            if let Pipe::Filter(prev) = &mut pipes[i - 1] {
                prev.filter = merged;
            }
            pipes.remove(i);
            continue;
        }
        i += 1;
    }
}

/// Moves `limit` into `uniq` when it follows it.
fn optimize_uniq_limit_pipes(pipes: &mut [Pipe]) {
    for i in 1..pipes.len() {
        let Pipe::Limit(pl) = &pipes[i] else {
            continue;
        };
        let limit = pl.limit;
        if let Pipe::Uniq(pu) = &mut pipes[i - 1] {
            if pu.limit == 0 || limit < pu.limit {
                pu.limit = limit;
            }
        }
    }
}

/// Merges adjacent `offset`, `limit` and `sort` pipes until nothing changes.
fn optimize_offset_limit_pipes(pipes: &mut Vec<Pipe>) {
    while optimize_offset_limit_pipes_once(pipes) {}
}

fn optimize_offset_limit_pipes_once(pipes: &mut Vec<Pipe>) -> bool {
    let mut changed = false;
    let mut i = 0;
    while i < pipes.len() {
        if let Pipe::Offset(po) = &pipes[i] {
            if po.offset == 0 {
                pipes.remove(i);
                changed = true;
                continue;
            }
        }
        if i + 1 >= pipes.len() {
            break;
        }
        let (head, tail) = pipes.split_at_mut(i + 1);
        let (a, b) = (&mut head[i], &mut tail[0]);
        match (a, b) {
            (Pipe::Offset(po), Pipe::Limit(pl)) => {
                let (offset, limit) = (po.offset, pl.limit);
                pipes[i] = Pipe::Limit(PipeLimit {
                    limit: offset.saturating_add(limit),
                });
                pipes[i + 1] = Pipe::Offset(PipeOffset { offset });
                changed = true;
            }
            (Pipe::Offset(po), Pipe::Offset(next)) => {
                po.offset = po.offset.saturating_add(next.offset);
                pipes.remove(i + 1);
                changed = true;
                continue;
            }
            (Pipe::Limit(pl), Pipe::Limit(next)) => {
                pl.limit = pl.limit.min(next.limit);
                pipes.remove(i + 1);
                changed = true;
                continue;
            }
            (Pipe::Limit(pl), Pipe::Offset(po)) => {
                if po.offset >= pl.limit {
                    pl.limit = 0;
                    pipes.remove(i + 1);
                    changed = true;
                    continue;
                }
            }
            (Pipe::Sort(ps), Pipe::Offset(po)) => {
                let offset = po.offset;
                if ps.limit > 0 && offset >= ps.limit {
                    pipes[i] = Pipe::Limit(PipeLimit { limit: 0 });
                } else {
                    ps.offset = ps.offset.saturating_add(offset);
                    if ps.limit > 0 {
                        ps.limit -= offset;
                    }
                }
                pipes.remove(i + 1);
                changed = true;
                continue;
            }
            (Pipe::Sort(ps), Pipe::Limit(pl)) => {
                if pl.limit == 0 {
                    pipes.remove(i);
                    changed = true;
                    continue;
                }
                if ps.limit == 0 || pl.limit < ps.limit {
                    ps.limit = pl.limit;
                }
                pipes.remove(i + 1);
                changed = true;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_query, parse_query_at_timestamp};

    fn optimized(s: &str) -> String {
        parse_query(s).unwrap().to_string()
    }

    #[test]
    fn test_options_string() {
        assert_eq!(
            optimized("options(concurrency=2, ignore_global_time_filter=true) foo"),
            "options(concurrency=2, ignore_global_time_filter=true) foo"
        );
        assert_eq!(optimized("options() foo"), "foo");
        assert_eq!(optimized("options(time_offset=1h) foo"), "options(time_offset=1h) foo");
    }

    #[test]
    fn test_optimize_offset_limit() {
        assert_eq!(optimized("* | offset 10 | limit 5"), "* | limit 15 | offset 10");
        assert_eq!(optimized("* | offset 2 | offset 3"), "* | offset 5");
        assert_eq!(optimized("* | limit 5 | limit 3"), "* | limit 3");
        assert_eq!(optimized("* | limit 5 | offset 5"), "* | limit 0");
        assert_eq!(optimized("* | offset 0"), "*");
        assert_eq!(optimized("* | sort by (a) | offset 3 | limit 4"), "* | sort by (a) offset 3 limit 4");
        assert_eq!(optimized("* | sort by (a) limit 3 | offset 5"), "* | limit 0");
        assert_eq!(optimized("* | sort by (a) | limit 0"), "* | limit 0");
        assert_eq!(optimized("* | uniq by (a) | limit 7"), "* | uniq by (a) limit 7 | limit 7");
    }

    #[test]
    fn test_optimize_filters() {
        assert_eq!(optimized("foo | filter bar | filter baz"), "foo bar baz");
        assert_eq!(optimized("* | filter a:x"), "a:x");
        assert_eq!(optimized("(a (b c)) or (d or e)"), "a b c or d or e");
        assert_eq!(optimized("* foo *"), "foo");
        assert_eq!(optimized("foo or *"), "*");
        assert_eq!(optimized("foo {a=\"b\"} {c=\"d\"}"), "_stream:{a=\"b\",c=\"d\"} foo");
        assert_eq!(
            optimized("{a=\"b\" or a=\"c\"} {c=\"d\"}"),
            "_stream:{a=\"b\" or a=\"c\"} _stream:{c=\"d\"}"
        );
    }

    #[test]
    fn test_add_time_filter() {
        let mut q = parse_query("foo").unwrap();
        q.add_time_filter(0, 1_000_000_000);
        assert_eq!(
            q.to_string(),
            "_time:[1970-01-01T00:00:00Z,1970-01-01T00:00:01Z] foo"
        );
        assert_eq!(q.get_filter_time_range(), (0, 1_000_000_000));

        let mut q = parse_query("options(ignore_global_time_filter=true) foo").unwrap();
        q.add_time_filter(0, 1);
        assert_eq!(q.get_filter_time_range(), (i64::MIN, i64::MAX));

        let mut q = parse_query("a:in(* | fields b)").unwrap();
        q.add_time_filter(0, 1_000_000_000);
        assert_eq!(
            q.to_string(),
            "_time:[1970-01-01T00:00:00Z,1970-01-01T00:00:01Z] a:in(_time:[1970-01-01T00:00:00Z,1970-01-01T00:00:01Z] | fields b)"
        );
    }

    #[test]
    fn test_add_extra_filters_and_limits() {
        let mut q = parse_query("foo | fields a").unwrap();
        q.add_extra_filters(Filter::Phrase {
            field: "host".to_string(),
            phrase: "x".to_string(),
        });
        assert_eq!(q.to_string(), "host:x foo | fields a");

        q.add_pipe_offset_limit(2, 3);
        assert_eq!(q.to_string(), "host:x foo | fields a | limit 5 | offset 2");
        q.add_pipe_limit(4);
        assert_eq!(q.to_string(), "host:x foo | fields a | limit 5 | offset 2");
    }

    #[test]
    fn test_time_range_and_concurrency() {
        let q = parse_query_at_timestamp("_time:>2024-01-01Z _time:<2024-02-01Z foo", 0).unwrap();
        let (min, max) = q.get_filter_time_range();
        assert!(min > 0 && max > min);

        let q = parse_query("options(concurrency=1) *").unwrap();
        assert_eq!(q.get_concurrency(), 1);
        assert_eq!(q.get_parallel_readers(0), 1);
        let q = parse_query("options(parallel_readers=5000) *").unwrap();
        assert_eq!(q.get_parallel_readers(0), MAX_CONCURRENCY);
        assert!(parse_query("*").unwrap().get_concurrency() >= 1);
    }

    #[test]
    fn test_can_live_tail() {
        assert!(parse_query("foo | fields a | filter b").unwrap().can_live_tail());
        assert!(!parse_query("foo | sort by (a)").unwrap().can_live_tail());
        assert!(!parse_query("foo | stats count()").unwrap().can_live_tail());
    }

    #[test]
    fn test_get_stats_by_fields() {
        let by = |s: &str| parse_query(s).unwrap().get_stats_by_fields();
        assert_eq!(by("* | stats by (a, b) count() x").unwrap(), vec!["a", "b"]);
        assert_eq!(
            by("* | stats by (a) count() x | extract \"<p>-<q>\" from a").unwrap(),
            vec!["a", "p", "q"]
        );
        assert!(by("* | stats by (a) count() x | extract \"<a>-\" from x").is_err());
        assert_eq!(
            by("* | stats by (a) count() x | rename a as c | copy c as d").unwrap(),
            vec!["c", "d"]
        );
        assert_eq!(
            by("* | stats by (a) count() x | math x*2 as y | fields a, y").unwrap(),
            vec!["a"]
        );
        assert!(by("* | fields a").is_err());
        assert!(by("* | stats by (a) count() x | delete a").is_err());
        assert!(by("* | stats by (a) count() x | fields a").is_err());
        assert!(by("* | stats by (a) count() a").is_err());
        assert!(by("* | stats by (a) count() x | limit 5").is_err());
        assert!(by("* | stats by (a) count() x | math 1 as a").is_err());
    }

    #[test]
    fn test_get_stats_by_fields_add_grouping_by_time() {
        let mut q = parse_query("* | stats by (a) count() x").unwrap();
        let by = q.get_stats_by_fields_add_grouping_by_time(5 * 60 * 1_000_000_000).unwrap();
        assert_eq!(by, vec!["_time", "a"]);
        assert_eq!(q.to_string(), "* | stats by (_time:5m, a) count(*) as x");

        let mut q = parse_query("* | rename a as _time | stats count() x").unwrap();
        assert!(q.get_stats_by_fields_add_grouping_by_time(1_000_000_000).is_err());
    }

    #[test]
    fn test_filter_in_subqueries() {
        let q = parse_query("a:in(b:x | fields c) c:in(b:x | fields c)").unwrap();
        assert!(q.has_filter_in_with_query());
        let subqueries = q.filter_in_subqueries();
        assert_eq!(subqueries.len(), 1);
        let (sub, field) = &subqueries[0];
        assert_eq!(field, "c");

        let mut cache = HashMap::new();
        cache.insert(subquery_cache_key(sub, field), vec!["1".to_string(), "2".to_string()]);
        let resolved = q.init_filter_in_values(&cache).unwrap();
        assert!(!resolved.has_filter_in_with_query());
        assert!(q.init_filter_in_values(&HashMap::new()).is_err());
    }
}
