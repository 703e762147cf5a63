//! LogsQL parser.
//!
//! ```text
//! query    := [options(...)] or ['|' pipe {'|' pipe}]
//! or       := and {'or' and}
//! and      := generic {['and'] generic}
//! generic  := '{' stream '}' | '*' | '(' or ')' | ('not' | '!' | '-') generic
//!           | comparison | function '(' args ')' | [field ':'] phrase
//! ```
//!
//! Every production consumes the tokens it recognizes and leaves the lexer at
//! the first token after them. Productions that try an alternative first
//! (a function call versus a phrase with the same name, a list of values
//! versus a subquery) save the lexer state and restore it on mismatch.

use crate::error::{QueryError, Result};
use crate::filter::stream_filter::{StreamFilter, TagFilter};
use crate::filter::time::{adjust_end_timestamp, parse_time_at, parse_weekday, starts_with_year, sub_no_overflow, try_parse_hhmm};
use crate::filter::{copy_filter, string_range_repr, Filter, InValues};
use crate::lexer::Lexer;
use crate::pipes::{parse_pipes, Pipe};
use crate::query::{Query, QueryOptions};
use crate::quote::{is_pipe_name, is_stats_func_name, quote_field_pattern_if_needed, quote_token_if_needed};
use chrono::Utc;
use logstore_core::values::{
    try_parse_bytes, try_parse_duration, try_parse_ipv4, try_parse_ipv4_cidr, try_parse_number,
    try_parse_timestamp_rfc3339_nano, try_parse_uint64, NSECS_PER_DAY,
};
use logstore_core::{get_canonical_column_name, StreamId, MSG_FIELD_NAME, STREAM_FIELD_NAME};
use logstore_observability::metrics::QUERY_PARSE_ERRORS_TOTAL;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// Upper bound of `>"str"` string ranges; sorts after every valid UTF-8 value.
const MAX_STRING_RANGE_VALUE: &str = "\u{10ffff}\u{10ffff}\u{10ffff}\u{10ffff}";

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Parses a LogsQL query with relative time filters anchored at the current time.
pub fn parse_query(s: &str) -> Result<Query> {
    parse_query_at_timestamp(s, now_nanos())
}

/// Parses a LogsQL query with relative time filters anchored at `timestamp` nanoseconds.
pub fn parse_query_at_timestamp(s: &str, timestamp: i64) -> Result<Query> {
    match parse_query_text(s, timestamp) {
        Ok(q) => {
            debug!(query = %q, "parsed query");
            Ok(q)
        }
        Err(err) => {
            QUERY_PARSE_ERRORS_TOTAL.inc();
            debug!(query = s, error = %err, "cannot parse query");
            Err(err)
        }
    }
}

fn parse_query_text(s: &str, timestamp: i64) -> Result<Query> {
    let mut lex = Lexer::new(s, timestamp);
    let mut q = parse_query_lex(&mut lex)?;
    if !lex.is_end() {
        return Err(lex.error("unexpected unparsed tail"));
    }
    q.optimize();
    Ok(q)
}

/// Parses a filter without pipes.
pub fn parse_filter(s: &str) -> Result<Arc<Filter>> {
    let q = parse_query(s)?;
    if !q.pipes.is_empty() {
        return Err(QueryError::parse("unexpected pipes after the filter", s));
    }
    Ok(q.filter)
}

fn parse_query_lex(lex: &mut Lexer<'_>) -> Result<Query> {
    let opts = parse_query_options(lex)?;
    lex.push_query_options(opts.clone());
    let result = parse_query_body(lex, opts);
    lex.pop_query_options();
    result
}

fn parse_query_body(lex: &mut Lexer<'_>, opts: QueryOptions) -> Result<Query> {
    let mut filter = parse_filter_lex(lex, true)?;
    if opts.time_offset != 0 {
        let offset = opts.time_offset;
        filter = copy_filter(
            &filter,
            &mut |f| matches!(f, Filter::Time { .. }),
            &mut |f| match f {
                Filter::Time { min, max, repr } => Ok(Arc::new(Filter::Time {
                    min: sub_no_overflow(*min, offset),
                    max: sub_no_overflow(*max, offset),
                    repr: repr.clone(),
                })),
                other => Ok(Arc::new(other.clone())),
            },
        )?;
    }

    let mut q = Query {
        opts,
        filter,
        pipes: Vec::new(),
        timestamp: lex.current_timestamp,
    };
    if lex.is_keyword(&["|"]) {
        lex.next_token();
        q.pipes = parse_pipes(lex)?;
    }
    Ok(q)
}

/// Parses `(query)`.
pub(crate) fn parse_query_in_parens(lex: &mut Lexer<'_>) -> Result<Query> {
    if !lex.is_keyword(&["("]) {
        return Err(lex.error("missing '('"));
    }
    lex.next_token();
    let q = parse_query_lex(lex)?;
    if !lex.is_keyword(&[")"]) {
        return Err(lex.error("missing ')' after the query"));
    }
    lex.next_token();
    Ok(q)
}

fn parse_query_options(lex: &mut Lexer<'_>) -> Result<QueryOptions> {
    let mut opts = lex.query_options().cloned().unwrap_or_default();
    opts.need_print = false;
    if !lex.is_keyword(&["options"]) {
        return Ok(opts);
    }
    lex.next_token();
    if !lex.is_keyword(&["("]) {
        return Err(lex.error("missing '(' after 'options'"));
    }
    lex.next_token();
    opts.need_print = true;

    loop {
        if lex.is_keyword(&[")"]) {
            lex.next_token();
            return Ok(opts);
        }
        let key = lex.next_compound_token()?;
        if !lex.is_keyword(&["="]) {
            return Err(lex.error(format!("missing '=' after the option {key:?}")));
        }
        lex.next_token();
        let value = lex.next_compound_token()?;

        match key.as_str() {
            "concurrency" => opts.concurrency = parse_option_uint(lex, &key, &value)?,
            "parallel_readers" => opts.parallel_readers = parse_option_uint(lex, &key, &value)?,
            "ignore_global_time_filter" => opts.ignore_global_time_filter = Some(parse_option_bool(lex, &key, &value)?),
            "allow_partial_response" => opts.allow_partial_response = Some(parse_option_bool(lex, &key, &value)?),
            "time_offset" => {
                let d = try_parse_duration(&value)
                    .ok_or_else(|| lex.error(format!("cannot parse time_offset={value:?} as a duration")))?;
                opts.time_offset = d;
                opts.time_offset_str = value;
            }
            _ => return Err(lex.error(format!("unexpected option {key:?}"))),
        }

        if lex.is_keyword(&[","]) {
            lex.next_token();
        } else if !lex.is_keyword(&[")"]) {
            return Err(lex.error(format!("unexpected token {:?} after options; want ',' or ')'", lex.token)));
        }
    }
}

fn parse_option_uint(lex: &Lexer<'_>, key: &str, value: &str) -> Result<u64> {
    try_parse_uint64(value).ok_or_else(|| lex.error(format!("cannot parse {key}={value:?} as an unsigned integer")))
}

fn parse_option_bool(lex: &Lexer<'_>, key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(lex.error(format!("cannot parse {key}={value:?}; want true or false"))),
    }
}

/// Parses the filter part of a query.
///
/// A filter starting with a pipe keyword is rejected unless `allow_pipe_keywords` is set,
/// so `| count()` is not mistaken for a `count()` phrase filter.
pub(crate) fn parse_filter_lex(lex: &mut Lexer<'_>, allow_pipe_keywords: bool) -> Result<Arc<Filter>> {
    if lex.is_keyword(&["|", ")", ""]) {
        return Err(lex.error("missing query"));
    }
    if !allow_pipe_keywords && !lex.is_quoted_token() {
        let t = lex.raw_token.to_lowercase();
        if t == "by" || is_pipe_name(&t) || is_stats_func_name(&t) {
            return Err(lex.error(format!(
                "query filter cannot start with pipe keyword {:?}; put it into quotes if needed",
                lex.token
            )));
        }
    }
    parse_filter_or(lex, "")
}

fn parse_filter_or(lex: &mut Lexer<'_>, field: &str) -> Result<Arc<Filter>> {
    let mut filters = Vec::new();
    loop {
        filters.push(parse_filter_and(lex, field)?);
        if lex.is_keyword(&["|", ")", ""]) {
            break;
        }
        if lex.is_keyword(&["or"]) {
            lex.next_token();
            if lex.is_end() {
                return Err(lex.error("missing filter after 'or'"));
            }
        }
    }
    if filters.len() == 1 {
        return Ok(filters.remove(0));
    }
    Ok(Arc::new(Filter::Or(filters)))
}

fn parse_filter_and(lex: &mut Lexer<'_>, field: &str) -> Result<Arc<Filter>> {
    let mut filters = Vec::new();
    loop {
        filters.push(parse_filter_generic(lex, field)?);
        if lex.is_keyword(&["or", "|", ")", ""]) {
            break;
        }
        if lex.is_keyword(&["and"]) {
            lex.next_token();
            if lex.is_end() {
                return Err(lex.error("missing filter after 'and'"));
            }
        }
    }
    if filters.len() == 1 {
        return Ok(filters.remove(0));
    }
    Ok(Arc::new(Filter::And(filters)))
}

fn canonical(field: &str) -> String {
    get_canonical_column_name(field).to_string()
}

fn parse_filter_generic(lex: &mut Lexer<'_>, field: &str) -> Result<Arc<Filter>> {
    if lex.is_keyword(&["("]) {
        lex.check_prev_adjacent_token(&["|", ":", "(", "!", "-", "not", "and", "or"])?;
    } else {
        lex.check_prev_adjacent_token(&["|", ":", "(", "!", "-"])?;
    }

    let f = if lex.is_keyword(&["{"]) {
        if !field.is_empty() && field != STREAM_FIELD_NAME {
            return Err(lex.error(format!(
                "stream filter cannot be applied to the {field:?} field; it can be applied only to {STREAM_FIELD_NAME}"
            )));
        }
        Filter::Stream(parse_stream_filter(lex)?)
    } else if lex.is_keyword(&["*"]) {
        parse_filter_star(lex, field)?
    } else if lex.is_keyword(&["("]) {
        lex.next_token();
        let f = parse_filter_or(lex, field)?;
        if !lex.is_keyword(&[")"]) {
            return Err(lex.error("missing ')'"));
        }
        lex.next_token();
        return Ok(f);
    } else if lex.is_keyword(&[">"]) {
        parse_filter_gt(lex, field)?
    } else if lex.is_keyword(&["<"]) {
        parse_filter_lt(lex, field)?
    } else if lex.is_keyword(&["="]) {
        parse_filter_eq(lex, field)?
    } else if lex.is_keyword(&["!="]) {
        Filter::not(parse_filter_eq(lex, field)?)
    } else if lex.is_keyword(&["~"]) {
        parse_filter_tilda(lex, field)?
    } else if lex.is_keyword(&["!~"]) {
        Filter::not(parse_filter_tilda(lex, field)?)
    } else if lex.is_keyword(&["not", "!", "-"]) {
        return parse_filter_not(lex, field);
    } else if lex.is_keyword(&["contains_all", "contains_any", "in"]) {
        return parse_filter_in_values(lex, field);
    } else if lex.is_keyword(&["exact"]) {
        return parse_func_arg_maybe_prefix(lex, "exact", field, |field, arg, is_prefix| {
            if is_prefix {
                Filter::ExactPrefix { field, prefix: arg }
            } else {
                Filter::Exact { field, value: arg }
            }
        });
    } else if lex.is_keyword(&["i"]) {
        return parse_func_arg_maybe_prefix(lex, "i", field, |field, arg, is_prefix| {
            if is_prefix {
                Filter::any_case_prefix(field, arg)
            } else {
                Filter::any_case_phrase(field, arg)
            }
        });
    } else if lex.is_keyword(&[
        "eq_field",
        "ipv4_range",
        "le_field",
        "len_range",
        "lt_field",
        "re",
        "seq",
        "string_range",
        "value_type",
    ]) {
        return parse_filter_func(lex, field);
    } else if lex.is_keyword(&["range"]) {
        return parse_filter_range(lex, field);
    } else if lex.is_keyword(&["_time"]) {
        return parse_filter_time_generic(lex, field);
    } else if lex.is_keyword(&["_stream_id"]) {
        return parse_filter_stream_id(lex, field);
    } else if lex.is_keyword(&[STREAM_FIELD_NAME]) {
        return parse_filter_stream_generic(lex, field);
    } else {
        return parse_filter_phrase(lex, field);
    };
    Ok(Arc::new(f))
}

fn parse_filter_not(lex: &mut Lexer<'_>, field: &str) -> Result<Arc<Filter>> {
    lex.next_token();
    if lex.is_end() {
        return Err(lex.error("missing filter after 'not'"));
    }
    let f = parse_filter_generic(lex, field)?;
    if let Filter::Not(inner) = f.as_ref() {
        return Ok(Arc::clone(inner));
    }
    Ok(Arc::new(Filter::Not(f)))
}

fn parse_filter_phrase(lex: &mut Lexer<'_>, field: &str) -> Result<Arc<Filter>> {
    let stop_tokens: &[&str] = if field.is_empty() { &[":"] } else { &[] };
    let phrase = lex.next_compound_token_ext(stop_tokens)?;

    if field.is_empty() && lex.is_keyword(&[":"]) {
        lex.next_token();
        let field = canonical(&phrase);
        return parse_filter_generic(lex, &field);
    }

    let field = canonical(field);
    if !lex.is_skipped_space && lex.is_keyword(&["*"]) {
        lex.next_token();
        return Ok(Arc::new(Filter::Prefix { field, prefix: phrase }));
    }
    Ok(Arc::new(Filter::Phrase { field, phrase }))
}

fn parse_filter_star(lex: &mut Lexer<'_>, field: &str) -> Result<Filter> {
    lex.next_token();
    let field = canonical(field);
    if lex.is_skipped_space || lex.is_keyword(&["", ")", "|"]) {
        return Ok(Filter::Prefix {
            field,
            prefix: String::new(),
        });
    }

    let substring = lex.next_compound_token()?;
    if lex.is_skipped_space || !lex.is_keyword(&["*"]) {
        return Err(lex.error(format!("missing ending '*' in the *{substring:?}* filter")));
    }
    lex.next_token();
    if !lex.is_skipped_space && !lex.is_keyword(&["", ")", "|"]) {
        return Err(lex.error(format!(
            "missing whitespace between *{substring:?}* and {:?}",
            lex.token
        )));
    }
    Ok(Filter::Substring { field, substring })
}

fn deny_missing_colon(lex: &Lexer<'_>, field: &str, op: &str) -> Result<()> {
    if lex.is_skipped_space && field.is_empty() {
        return Err(lex.error(format!("missing ':' in front of {op:?}")));
    }
    Ok(())
}

fn parse_filter_tilda(lex: &mut Lexer<'_>, field: &str) -> Result<Filter> {
    let op = lex.token.clone();
    lex.next_token();
    if lex.is_keyword(&["-"]) {
        return Err(lex.error("regexp starting with '-' must be put in quotes"));
    }
    deny_missing_colon(lex, field, &op)?;
    let re = lex.next_compound_token()?;
    new_filter_regexp(lex, field, &re)
}

fn new_filter_regexp(lex: &Lexer<'_>, field: &str, re: &str) -> Result<Filter> {
    let field = canonical(field);
    match re {
        "" | ".*" => return Ok(Filter::Noop),
        ".+" => {
            return Ok(Filter::Prefix {
                field,
                prefix: String::new(),
            })
        }
        _ => {}
    }
    let re = Regex::new(re).map_err(|err| lex.error(format!("invalid regexp {re:?}: {err}")))?;
    Ok(Filter::Regexp { field, re })
}

fn parse_filter_eq(lex: &mut Lexer<'_>, field: &str) -> Result<Filter> {
    let op = lex.token.clone();
    lex.next_token();
    deny_missing_colon(lex, field, &op)?;
    let value = lex.next_compound_token()?;
    let field = canonical(field);
    if !lex.is_skipped_space && lex.is_keyword(&["*"]) {
        lex.next_token();
        return Ok(Filter::ExactPrefix { field, prefix: value });
    }
    Ok(Filter::Exact { field, value })
}

fn next_up(f: f64) -> f64 {
    if f.is_nan() || f == f64::INFINITY {
        return f;
    }
    if f == 0.0 {
        return f64::from_bits(1);
    }
    let bits = f.to_bits();
    if f > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

fn next_down(f: f64) -> f64 {
    -next_up(-f)
}

fn parse_filter_gt(lex: &mut Lexer<'_>, field: &str) -> Result<Filter> {
    lex.next_token();
    let mut include_min = false;
    let mut op = ">";
    if !lex.is_skipped_space && lex.is_keyword(&["="]) {
        lex.next_token();
        include_min = true;
        op = ">=";
    }
    deny_missing_colon(lex, field, op)?;

    let state = lex.backup_state();
    match parse_number(lex) {
        Ok((mut min, s)) => {
            if !include_min {
                min = next_up(min);
            }
            Ok(Filter::Range {
                field: canonical(field),
                min,
                max: f64::INFINITY,
                repr: format!("{op}{s}"),
            })
        }
        Err(err) => {
            lex.restore_state(state);
            let Ok(orig) = lex.next_compound_token() else {
                return Err(err);
            };
            let mut min = orig.clone();
            if !include_min {
                min.push('\0');
            }
            Ok(Filter::StringRange {
                field: canonical(field),
                min,
                max: MAX_STRING_RANGE_VALUE.to_string(),
                repr: string_range_repr(op, &orig),
            })
        }
    }
}

fn parse_filter_lt(lex: &mut Lexer<'_>, field: &str) -> Result<Filter> {
    lex.next_token();
    let mut include_max = false;
    let mut op = "<";
    if !lex.is_skipped_space && lex.is_keyword(&["="]) {
        lex.next_token();
        include_max = true;
        op = "<=";
    }
    deny_missing_colon(lex, field, op)?;

    let state = lex.backup_state();
    match parse_number(lex) {
        Ok((mut max, s)) => {
            if !include_max {
                max = next_down(max);
            }
            Ok(Filter::Range {
                field: canonical(field),
                min: f64::NEG_INFINITY,
                max,
                repr: format!("{op}{s}"),
            })
        }
        Err(err) => {
            lex.restore_state(state);
            let Ok(orig) = lex.next_compound_token() else {
                return Err(err);
            };
            let mut max = orig.clone();
            if include_max {
                max.push('\0');
            }
            Ok(Filter::StringRange {
                field: canonical(field),
                min: String::new(),
                max,
                repr: string_range_repr(op, &orig),
            })
        }
    }
}

fn parse_filter_range(lex: &mut Lexer<'_>, field: &str) -> Result<Arc<Filter>> {
    let state = lex.backup_state();
    let func_name = lex.next_compound_token()?;
    let include_min = if lex.is_keyword(&["["]) {
        true
    } else if lex.is_keyword(&["("]) {
        false
    } else {
        lex.restore_state(state);
        return parse_filter_phrase(lex, field);
    };
    lex.next_token();

    let (mut min, min_str) = parse_number(lex)?;
    if !lex.is_keyword(&[","]) {
        return Err(lex.error(format!(
            "unexpected token {:?} after {min_str:?} in {func_name}(); want ','",
            lex.token
        )));
    }
    lex.next_token();
    let (mut max, max_str) = parse_number(lex)?;
    let include_max = if lex.is_keyword(&["]"]) {
        true
    } else if lex.is_keyword(&[")"]) {
        false
    } else {
        return Err(lex.error(format!(
            "unexpected closing token {:?} in {func_name}(); want ')' or ']'",
            lex.token
        )));
    };
    lex.next_token();

    let mut repr = String::from("range");
    if include_min {
        repr.push('[');
    } else {
        repr.push('(');
        min = next_up(min);
    }
    repr.push_str(&format!("{min_str}, {max_str}"));
    if include_max {
        repr.push(']');
    } else {
        repr.push(')');
        max = next_down(max);
    }
    Ok(Arc::new(Filter::Range {
        field: canonical(field),
        min,
        max,
        repr,
    }))
}

/// Parses a number accepted by math expressions and range filters.
///
/// Besides plain numbers this accepts durations, byte sizes, RFC3339 timestamps and IPv4 addresses.
pub(crate) fn parse_math_number(s: &str) -> Option<f64> {
    if let Some(f) = try_parse_number(s) {
        return Some(f);
    }
    if let Some(ts) = try_parse_timestamp_rfc3339_nano(s) {
        return Some(ts as f64);
    }
    try_parse_ipv4(s).map(f64::from)
}

/// Reads a number token, returning the value and the token text.
pub(crate) fn parse_number(lex: &mut Lexer<'_>) -> Result<(f64, String)> {
    let s = lex.next_compound_token()?;
    match parse_math_number(&s) {
        Some(f) => Ok((f, s)),
        None => Err(lex.error(format!("cannot parse {s:?} as a number"))),
    }
}

/// Parses an unsigned integer such as `10`, `0x1F`, `1KiB`, `5s` or `inf`.
pub(crate) fn parse_uint(s: &str) -> Option<u64> {
    if s.eq_ignore_ascii_case("inf") {
        return Some(u64::MAX);
    }
    if let Some(n) = try_parse_uint64(s) {
        return Some(n);
    }
    let lower = s.to_lowercase();
    for (prefix, radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        if let Some(digits) = lower.strip_prefix(prefix) {
            return u64::from_str_radix(&digits.replace('_', ""), radix).ok();
        }
    }
    if let Some(n) = try_parse_bytes(s) {
        return u64::try_from(n).ok();
    }
    try_parse_duration(s).and_then(|d| u64::try_from(d).ok())
}

/// Parses `(arg1, arg2, ...)`. A bare `*` is kept as an argument.
pub(crate) fn parse_args_in_parens(lex: &mut Lexer<'_>) -> Result<Vec<String>> {
    if !lex.is_keyword(&["("]) {
        return Err(lex.error(format!("missing '('; got {:?}", lex.token)));
    }
    lex.next_token();
    let mut args = Vec::new();
    while !lex.is_keyword(&[")"]) {
        if lex.is_keyword(&[","]) {
            return Err(lex.error("unexpected ','"));
        }
        if lex.is_keyword(&["("]) {
            return Err(lex.error("unexpected '('"));
        }
        if lex.is_end() {
            return Err(lex.error("missing ')'"));
        }
        if lex.is_keyword(&["*"]) {
            lex.next_token();
            args.push("*".to_string());
        } else {
            args.push(lex.next_compound_token()?);
        }
        if lex.is_keyword(&[")"]) {
            break;
        }
        if !lex.is_keyword(&[","]) {
            return Err(lex.error(format!("missing ',' after {:?}", args[args.len() - 1])));
        }
        lex.next_token();
    }
    lex.next_token();
    Ok(args)
}

/// Reads `func(args)` when the current token starts a function call.
///
/// Returns `None` with the lexer restored when the name is not followed by `(`.
fn parse_func_args(lex: &mut Lexer<'_>) -> Result<Option<(String, Vec<String>)>> {
    let state = lex.backup_state();
    let func_name = lex.next_compound_token()?;
    if !lex.is_keyword(&["("]) {
        lex.restore_state(state);
        return Ok(None);
    }
    let args = parse_args_in_parens(lex)?;
    Ok(Some((func_name.to_lowercase(), args)))
}

fn parse_func_arg_maybe_prefix(
    lex: &mut Lexer<'_>,
    func_name: &str,
    field: &str,
    build: impl FnOnce(String, String, bool) -> Filter,
) -> Result<Arc<Filter>> {
    let state = lex.backup_state();
    lex.next_compound_token()?;
    if !lex.is_keyword(&["("]) {
        lex.restore_state(state);
        return parse_filter_phrase(lex, field);
    }
    lex.next_token();

    let (arg, is_prefix) = if lex.is_keyword(&["*"]) {
        lex.next_token();
        (String::new(), true)
    } else {
        let arg = lex.next_compound_token()?;
        if !lex.is_skipped_space && lex.is_keyword(&["*"]) {
            lex.next_token();
            (arg, true)
        } else {
            (arg, false)
        }
    };
    if !lex.is_keyword(&[")"]) {
        return Err(lex.error(format!("missing ')' after {func_name}()")));
    }
    lex.next_token();
    Ok(Arc::new(build(canonical(field), arg, is_prefix)))
}

fn want_args(lex: &Lexer<'_>, func_name: &str, args: &[String], n: usize) -> Result<()> {
    if args.len() != n {
        return Err(lex.error(format!(
            "unexpected number of args for {func_name}(); got {}; want {n}",
            args.len()
        )));
    }
    Ok(())
}

fn parse_filter_func(lex: &mut Lexer<'_>, field: &str) -> Result<Arc<Filter>> {
    let Some((func_name, args)) = parse_func_args(lex)? else {
        return parse_filter_phrase(lex, field);
    };
    let field = canonical(field);
    let f = match func_name.as_str() {
        "seq" => Filter::Sequence { field, phrases: args },
        "re" => {
            want_args(lex, &func_name, &args, 1)?;
            new_filter_regexp(lex, &field, &args[0])?
        }
        "eq_field" => {
            want_args(lex, &func_name, &args, 1)?;
            Filter::EqField {
                field,
                other: canonical(&args[0]),
            }
        }
        "le_field" | "lt_field" => {
            want_args(lex, &func_name, &args, 1)?;
            Filter::LeField {
                field,
                other: canonical(&args[0]),
                exclude: func_name == "lt_field",
            }
        }
        "value_type" => {
            want_args(lex, &func_name, &args, 1)?;
            Filter::ValueType {
                field,
                value_type: args[0].clone(),
            }
        }
        "len_range" => {
            want_args(lex, &func_name, &args, 2)?;
            let min = parse_uint(&args[0])
                .ok_or_else(|| lex.error(format!("cannot parse min value {:?} in len_range()", args[0])))?;
            let max = parse_uint(&args[1])
                .ok_or_else(|| lex.error(format!("cannot parse max value {:?} in len_range()", args[1])))?;
            Filter::LenRange {
                field,
                min,
                max,
                repr: format!(
                    "len_range({}, {})",
                    quote_token_if_needed(&args[0]),
                    quote_token_if_needed(&args[1])
                ),
            }
        }
        "string_range" => {
            want_args(lex, &func_name, &args, 2)?;
            Filter::StringRange {
                field,
                min: args[0].clone(),
                max: args[1].clone(),
                repr: format!(
                    "string_range({}, {})",
                    quote_token_if_needed(&args[0]),
                    quote_token_if_needed(&args[1])
                ),
            }
        }
        "ipv4_range" => {
            let (min, max) = match args.as_slice() {
                [s] if s.contains('/') => try_parse_ipv4_cidr(s)
                    .ok_or_else(|| lex.error(format!("cannot parse IPv4 subnet {s:?} in ipv4_range()")))?,
                [s] => {
                    let ip = try_parse_ipv4(s)
                        .ok_or_else(|| lex.error(format!("cannot parse IPv4 address {s:?} in ipv4_range()")))?;
                    (ip, ip)
                }
                [a, b] => {
                    let min = try_parse_ipv4(a)
                        .ok_or_else(|| lex.error(format!("cannot parse lower bound {a:?} in ipv4_range()")))?;
                    let max = try_parse_ipv4(b)
                        .ok_or_else(|| lex.error(format!("cannot parse upper bound {b:?} in ipv4_range()")))?;
                    (min, max)
                }
                _ => {
                    return Err(lex.error(format!(
                        "unexpected number of args for ipv4_range(); got {}; want 1 or 2",
                        args.len()
                    )))
                }
            };
            Filter::Ipv4Range { field, min, max }
        }
        _ => return Err(lex.error(format!("unexpected function {func_name}()"))),
    };
    Ok(Arc::new(f))
}

fn parse_filter_in_values(lex: &mut Lexer<'_>, field: &str) -> Result<Arc<Filter>> {
    let state = lex.backup_state();
    let func_name = lex.next_compound_token()?.to_lowercase();
    if !lex.is_keyword(&["("]) {
        lex.restore_state(state);
        return parse_filter_phrase(lex, field);
    }
    let field = canonical(field);
    let make = |values: InValues| match func_name.as_str() {
        "contains_all" => Filter::ContainsAll {
            field: field.clone(),
            values,
        },
        "contains_any" => Filter::ContainsAny {
            field: field.clone(),
            values,
        },
        _ => Filter::In {
            field: field.clone(),
            values,
        },
    };

    let args_state = lex.backup_state();
    let args_err = match parse_args_in_parens(lex) {
        Ok(mut args) => {
            if args.iter().any(|a| a == "*") {
                if func_name != "contains_all" {
                    return Ok(Arc::new(Filter::Noop));
                }
                args.retain(|a| a != "*");
                if args.is_empty() {
                    return Ok(Arc::new(Filter::Noop));
                }
            }
            return Ok(Arc::new(make(InValues::new(args))));
        }
        Err(err) => err,
    };

    lex.restore_state(args_state);
    match parse_in_query(lex) {
        Ok(Some((q, subquery_field))) => Ok(Arc::new(make(InValues::from_subquery(q, subquery_field)))),
        Ok(None) => Ok(Arc::new(Filter::Noop)),
        Err(_) => Err(args_err),
    }
}

/// Parses `(query)` of `in(<query>)`, returning `None` for a query matching everything.
fn parse_in_query(lex: &mut Lexer<'_>) -> Result<Option<(Query, String)>> {
    let q = parse_query_in_parens(lex)?;
    if q.pipes.is_empty() && is_star_filter(&q.filter) {
        return Ok(None);
    }
    let field = subquery_result_field(&q)
        .ok_or_else(|| lex.error("the subquery must end with `| fields <field>` or `| uniq by (<field>)`"))?;
    Ok(Some((q, field)))
}

fn is_star_filter(f: &Filter) -> bool {
    match f {
        Filter::Noop => true,
        Filter::Prefix { field, prefix } => prefix.is_empty() && field == MSG_FIELD_NAME,
        _ => false,
    }
}

fn subquery_result_field(q: &Query) -> Option<String> {
    match q.pipes.last()? {
        Pipe::Fields(pf) if pf.fields.len() == 1 && !pf.fields[0].ends_with('*') => Some(pf.fields[0].clone()),
        Pipe::Uniq(pu) if pu.by_fields.len() == 1 => Some(pu.by_fields[0].clone()),
        _ => None,
    }
}

fn parse_filter_time_generic(lex: &mut Lexer<'_>, field: &str) -> Result<Arc<Filter>> {
    if !field.is_empty() {
        return parse_filter_phrase(lex, field);
    }
    let state = lex.backup_state();
    lex.next_token();
    if !lex.is_keyword(&[":"]) {
        lex.restore_state(state);
        return parse_filter_phrase(lex, "");
    }
    lex.next_token();

    let f = if lex.is_keyword(&["day_range"]) {
        parse_filter_day_range(lex)?
    } else if lex.is_keyword(&["week_range"]) {
        parse_filter_week_range(lex)?
    } else {
        parse_filter_time_range(lex)?
    };
    Ok(Arc::new(f))
}

/// Parses `[start, end]` bounds of day_range/week_range filters with an optional `offset`.
fn parse_range_bounds(
    lex: &mut Lexer<'_>,
    name: &str,
    parse_arg: impl Fn(&Lexer<'_>, &str) -> Result<i64>,
) -> Result<(i64, i64, i64, String)> {
    lex.next_token();
    let start_brace = if lex.is_keyword(&["["]) {
        "["
    } else if lex.is_keyword(&["("]) {
        "("
    } else {
        return Err(lex.error(format!("missing '[' or '(' in {name} filter")));
    };
    lex.next_token();

    let start_str = lex.next_compound_token()?;
    let mut start = parse_arg(lex, &start_str)?;
    if !lex.is_keyword(&[","]) {
        return Err(lex.error(format!("unexpected token {:?} in {name} filter; want ','", lex.token)));
    }
    lex.next_token();
    let end_str = lex.next_compound_token()?;
    let mut end = parse_arg(lex, &end_str)?;

    let end_brace = if lex.is_keyword(&["]"]) {
        "]"
    } else if lex.is_keyword(&[")"]) {
        ")"
    } else {
        return Err(lex.error(format!("missing ']' or ')' in {name} filter")));
    };
    lex.next_token();

    let mut offset = 0;
    let mut offset_str = String::new();
    if lex.is_keyword(&["offset"]) {
        lex.next_token();
        let (d, s) = parse_duration(lex)?;
        offset = d;
        offset_str = format!(" offset {s}");
    }

    if start_brace == "(" {
        start += 1;
    }
    if end_brace == ")" {
        end -= 1;
    }
    let repr = format!("{start_brace}{start_str}, {end_str}{end_brace}{offset_str}");
    Ok((start, end, offset, repr))
}

fn parse_filter_day_range(lex: &mut Lexer<'_>) -> Result<Filter> {
    let (start, end, offset, repr) = parse_range_bounds(lex, "day_range", |lex, s| {
        let nsecs = try_parse_hhmm(s).ok_or_else(|| lex.error(format!("cannot parse {s:?} as 'hh:mm'")))?;
        Ok(nsecs.min(NSECS_PER_DAY - 1))
    })?;
    Ok(Filter::DayRange {
        start,
        end,
        offset,
        repr,
    })
}

fn parse_filter_week_range(lex: &mut Lexer<'_>) -> Result<Filter> {
    let (start_day, end_day, offset, repr) = parse_range_bounds(lex, "week_range", |lex, s| {
        parse_weekday(s).ok_or_else(|| lex.error(format!("cannot parse {s:?} as a day of the week")))
    })?;
    Ok(Filter::WeekRange {
        start_day,
        end_day,
        offset,
        repr,
    })
}

fn parse_duration(lex: &mut Lexer<'_>) -> Result<(i64, String)> {
    let s = lex.next_compound_token()?;
    match try_parse_duration(&s) {
        Some(d) => Ok((d, s)),
        None => Err(lex.error(format!("cannot parse {s:?} as a duration"))),
    }
}

fn parse_time(lex: &mut Lexer<'_>) -> Result<(i64, String)> {
    let s = lex.next_compound_token()?;
    match parse_time_at(&s, lex.current_timestamp) {
        Some(t) => Ok((t, s)),
        None => Err(lex.error(format!("cannot parse {s:?} as a timestamp"))),
    }
}

fn is_likely_timestamp(lex: &Lexer<'_>) -> bool {
    lex.is_keyword(&["now"]) || starts_with_year(&lex.token)
}

fn parse_filter_time_range(lex: &mut Lexer<'_>) -> Result<Filter> {
    if lex.is_keyword(&["offset"]) {
        lex.next_token();
        let (offset, s) = parse_duration(lex)?;
        return Ok(Filter::Time {
            min: i64::MIN,
            max: sub_no_overflow(lex.current_timestamp, offset),
            repr: format!("offset {s}"),
        });
    }

    let (mut min, mut max, mut repr) = parse_filter_time(lex)?;
    if lex.is_keyword(&["offset"]) {
        lex.next_token();
        let (offset, s) = parse_duration(lex)?;
        min = sub_no_overflow(min, offset);
        max = sub_no_overflow(max, offset);
        repr.push_str(&format!(" offset {s}"));
    }
    Ok(Filter::Time { min, max, repr })
}

fn parse_filter_time(lex: &mut Lexer<'_>) -> Result<(i64, i64, String)> {
    let include_start = if lex.is_keyword(&[">"]) {
        return parse_filter_time_gt(lex);
    } else if lex.is_keyword(&["<"]) {
        return parse_filter_time_lt(lex);
    } else if lex.is_keyword(&["["]) {
        true
    } else if lex.is_keyword(&["("]) {
        false
    } else {
        return parse_filter_time_eq(lex);
    };
    lex.next_token();

    let (mut start, start_str) = parse_time(lex)?;
    if !lex.is_keyword(&[","]) {
        return Err(lex.error(format!(
            "unexpected token {:?} after the start time in _time filter; want ','",
            lex.token
        )));
    }
    lex.next_token();
    let (mut end, end_str) = parse_time(lex)?;
    let include_end = if lex.is_keyword(&["]"]) {
        true
    } else if lex.is_keyword(&[")"]) {
        false
    } else {
        return Err(lex.error(format!(
            "_time filter ends with unexpected token {:?}; want ']' or ')'",
            lex.token
        )));
    };
    lex.next_token();

    let mut repr = String::new();
    if include_start {
        repr.push('[');
    } else {
        repr.push('(');
        start = start.saturating_add(1);
    }
    repr.push_str(&format!("{start_str},{end_str}"));
    if include_end {
        repr.push(']');
        end = adjust_end_timestamp(end, &end_str);
    } else {
        repr.push(')');
        end = end.saturating_sub(1);
    }
    Ok((start, end, repr))
}

fn parse_filter_time_gt(lex: &mut Lexer<'_>) -> Result<(i64, i64, String)> {
    lex.next_token();
    let mut prefix = ">";
    if lex.is_keyword(&["="]) {
        lex.next_token();
        prefix = ">=";
    }

    if is_likely_timestamp(lex) {
        let (mut start, s) = parse_time(lex)?;
        if prefix == ">" {
            start = start.saturating_add(1);
        }
        return Ok((start, i64::MAX, format!("{prefix}{s}")));
    }

    let (d, s) = parse_duration(lex)?;
    let mut d = d.saturating_abs();
    if prefix == ">" {
        d = d.saturating_add(1);
    }
    Ok((i64::MIN, sub_no_overflow(lex.current_timestamp, d), format!("{prefix}{s}")))
}

fn parse_filter_time_lt(lex: &mut Lexer<'_>) -> Result<(i64, i64, String)> {
    lex.next_token();
    let mut prefix = "<";
    if lex.is_keyword(&["="]) {
        lex.next_token();
        prefix = "<=";
    }

    if is_likely_timestamp(lex) {
        let (end, s) = parse_time(lex)?;
        let end = if prefix == "<" {
            end.saturating_sub(1)
        } else {
            adjust_end_timestamp(end, &s)
        };
        return Ok((i64::MIN, end, format!("{prefix}{s}")));
    }

    let (d, s) = parse_duration(lex)?;
    let mut d = d.saturating_abs();
    if prefix == "<" {
        d -= 1;
    }
    Ok((
        sub_no_overflow(lex.current_timestamp, d),
        lex.current_timestamp,
        format!("{prefix}{s}"),
    ))
}

fn parse_filter_time_eq(lex: &mut Lexer<'_>) -> Result<(i64, i64, String)> {
    let mut prefix = "";
    if lex.is_keyword(&["="]) {
        lex.next_token();
        prefix = "=";
    }

    if is_likely_timestamp(lex) {
        let (start, s) = parse_time(lex)?;
        let end = adjust_end_timestamp(start, &s);
        return Ok((start, end, format!("{prefix}{s}")));
    }

    let (d, s) = parse_duration(lex)?;
    let d = d.saturating_abs();
    Ok((
        sub_no_overflow(lex.current_timestamp, d),
        lex.current_timestamp,
        format!("{prefix}{s}"),
    ))
}

fn parse_filter_stream_generic(lex: &mut Lexer<'_>, field: &str) -> Result<Arc<Filter>> {
    if !field.is_empty() {
        return parse_filter_phrase(lex, field);
    }
    let state = lex.backup_state();
    lex.next_token();
    if !lex.is_keyword(&[":"]) {
        lex.restore_state(state);
        return parse_filter_phrase(lex, "");
    }
    lex.next_token();
    parse_filter_generic(lex, STREAM_FIELD_NAME)
}

/// Parses `{name="value", name=~"re" or ...}`.
fn parse_stream_filter(lex: &mut Lexer<'_>) -> Result<StreamFilter> {
    if !lex.is_keyword(&["{"]) {
        return Err(lex.error("missing '{' in stream filter"));
    }
    lex.next_token();

    let mut or_filters = Vec::new();
    let mut and_filters = Vec::new();
    loop {
        if lex.is_keyword(&["}"]) {
            lex.next_token();
            break;
        }
        let name = lex.next_compound_token()?;
        if !lex.is_keyword(&["=", "!=", "=~", "!~"]) {
            return Err(lex.error(format!(
                "unexpected token {:?} after {name:?} in stream filter; want one of '=', '!=', '=~', '!~'",
                lex.token
            )));
        }
        let op = lex.token.clone();
        lex.next_token();
        let value = lex.next_compound_token()?;
        and_filters.push(TagFilter::new(&name, &op, &value).map_err(|err| lex.error(err))?);

        if lex.is_keyword(&[","]) {
            lex.next_token();
        } else if lex.is_keyword(&["or"]) {
            lex.next_token();
            or_filters.push(std::mem::take(&mut and_filters));
        } else if lex.is_keyword(&["}"]) {
            lex.next_token();
            break;
        } else {
            return Err(lex.error(format!(
                "unexpected token {:?} in stream filter; want ',', 'or' or '}}'",
                lex.token
            )));
        }
    }
    if !and_filters.is_empty() {
        or_filters.push(and_filters);
    }
    Ok(StreamFilter { or_filters })
}

fn parse_stream_id(lex: &Lexer<'_>, s: &str) -> Result<StreamId> {
    StreamId::try_parse(s).ok_or_else(|| lex.error(format!("cannot parse _stream_id {s:?}")))
}

fn parse_filter_stream_id(lex: &mut Lexer<'_>, field: &str) -> Result<Arc<Filter>> {
    if !field.is_empty() {
        return parse_filter_phrase(lex, field);
    }
    let state = lex.backup_state();
    lex.next_token();
    if !lex.is_keyword(&[":"]) {
        lex.restore_state(state);
        return parse_filter_phrase(lex, "");
    }
    lex.next_token();

    if !lex.is_keyword(&["in"]) {
        let s = lex.next_compound_token()?;
        let id = parse_stream_id(lex, &s)?;
        return Ok(Arc::new(Filter::StreamId {
            ids: vec![id],
            values: InValues::new(vec![s]),
        }));
    }
    lex.next_token();

    let args_state = lex.backup_state();
    let args_err = match parse_args_in_parens(lex) {
        Ok(args) => {
            let ids = args
                .iter()
                .map(|s| parse_stream_id(lex, s))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Arc::new(Filter::StreamId {
                ids,
                values: InValues::new(args),
            }));
        }
        Err(err) => err,
    };
    lex.restore_state(args_state);
    match parse_in_query(lex) {
        Ok(Some((q, subquery_field))) => Ok(Arc::new(Filter::StreamId {
            ids: Vec::new(),
            values: InValues::from_subquery(q, subquery_field),
        })),
        Ok(None) => Ok(Arc::new(Filter::Noop)),
        Err(_) => Err(args_err),
    }
}

/// Parses a field name. `_msg` may be written as `""`.
pub(crate) fn parse_field_name(lex: &mut Lexer<'_>) -> Result<String> {
    if lex.is_keyword(&[",", "(", ")", "[", "]", "|", ""]) {
        return Err(lex.error(format!("unexpected token {:?}; want a field name", lex.token)));
    }
    let name = lex.next_compound_token()?;
    Ok(canonical(&name))
}

/// Parses a field name or a `prefix*` field pattern.
pub(crate) fn parse_field_pattern(lex: &mut Lexer<'_>) -> Result<String> {
    if lex.is_keyword(&["*"]) {
        lex.next_token();
        return Ok("*".to_string());
    }
    let name = parse_field_name(lex)?;
    if !lex.is_skipped_space && lex.is_keyword(&["*"]) {
        lex.next_token();
        return Ok(format!("{name}*"));
    }
    Ok(name)
}

/// Parses a comma-separated list of field patterns ending at `|`, `)` or the end of the query.
pub(crate) fn parse_field_patterns_list(lex: &mut Lexer<'_>) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    loop {
        fields.push(parse_field_pattern(lex)?);
        if !lex.is_keyword(&[","]) {
            return Ok(fields);
        }
        lex.next_token();
    }
}

/// Parses `(field1, field2*, ...)`.
pub(crate) fn parse_field_names_in_parens(lex: &mut Lexer<'_>) -> Result<Vec<String>> {
    if !lex.is_keyword(&["("]) {
        return Err(lex.error(format!("missing '('; got {:?}", lex.token)));
    }
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
        fields.push(parse_field_pattern(lex)?);
        if lex.is_keyword(&[","]) {
            lex.next_token();
        } else if !lex.is_keyword(&[")"]) {
            return Err(lex.error(format!("unexpected token {:?}; want ',' or ')'", lex.token)));
        }
    }
}

/// Parses the result name of `... [as] name`.
pub(crate) fn parse_result_name(lex: &mut Lexer<'_>) -> Result<String> {
    if lex.is_keyword(&["as"]) {
        lex.next_token();
    }
    parse_field_name(lex)
}

/// Parses `if (filter)`. The lexer must be at `if`.
pub(crate) fn parse_if_filter(lex: &mut Lexer<'_>) -> Result<Arc<Filter>> {
    lex.next_token();
    if !lex.is_keyword(&["("]) {
        return Err(lex.error("missing '(' after 'if'"));
    }
    lex.next_token();
    if lex.is_keyword(&[")"]) {
        lex.next_token();
        return Ok(Arc::new(Filter::Noop));
    }
    let f = parse_filter_or(lex, "")?;
    if !lex.is_keyword(&[")"]) {
        return Err(lex.error("missing ')' after the 'if' filter"));
    }
    lex.next_token();
    Ok(f)
}

/// Formats field names for pipes, quoting them when needed.
pub(crate) fn field_names_string(names: &[String]) -> String {
    names
        .iter()
        .map(|n| if n == "*" { n.clone() } else { quote_field_pattern_if_needed(n) })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use logstore_core::values::NSECS_PER_HOUR;

    fn check(s: &str, want: &str) {
        let q = parse_query_at_timestamp(s, 0).unwrap_or_else(|err| panic!("cannot parse {s:?}: {err}"));
        assert_eq!(q.to_string(), want, "query {s:?}");
        let q2 = parse_query_at_timestamp(want, 0).unwrap_or_else(|err| panic!("cannot reparse {want:?}: {err}"));
        assert_eq!(q2.to_string(), want, "reparsed query {want:?}");
    }

    fn check_err(s: &str) {
        assert!(parse_query_at_timestamp(s, 0).is_err(), "expecting error for {s:?}");
    }

    #[test]
    fn test_parse_phrases() {
        check("foo", "foo");
        check("foo bar", "foo bar");
        check("foo and bar", "foo bar");
        check("\"foo bar\"", "\"foo bar\"");
        check("'and'", "\"and\"");
        check("foo*", "foo*");
        check("foo *", "foo");
        check("*foo*", "*foo*");
        check("host:foo-1.bar", "host:\"foo-1.bar\"");
        check("\"\":foo", "foo");
        check("_msg:foo", "foo");
        check("a:(b or c)", "a:b or a:c");
        check("foo # comment\n bar", "foo bar");
        check("x:*", "x:*");
    }

    #[test]
    fn test_parse_boolean() {
        check("a or b and c", "a or b c");
        check("(a or b) c", "(a or b) c");
        check("not a", "!a");
        check("!a", "!a");
        check("-a", "!a");
        check("!!a", "a");
        check("not (a or b)", "!(a or b)");
        check("a -b", "a !b");
    }

    #[test]
    fn test_parse_comparisons() {
        check("n:>5", "n:>5");
        check("n:>=5.5", "n:>=5.5");
        check("n:<-3", "n:<-3");
        check("n:<=1KB", "n:<=1KB");
        check("s:>abc", "s:>abc");
        check("s:<=\"10 x\"", "s:<=\"10 x\"");
        check("a:=b", "a:=b");
        check("a:=b*", "a:=b*");
        check("a:!=b", "a:!=b");
        check("a:~\"x.+y\"", "a:~\"x.+y\"");
        check("a:!~\"x\"", "a:!~\"x\"");
        check("a:~\".*\"", "*");
        check("a:~\".+\"", "a:*");
    }

    #[test]
    fn test_parse_functions() {
        check("i(FoO)", "i(FoO)");
        check("a:i(foo*)", "a:i(foo*)");
        check("a:i(*)", "a:i(*)");
        check("exact(\"foo bar\")", "=\"foo bar\"");
        check("exact(foo*)", "=foo*");
        check("a:in(x, \"y z\")", "a:in(x,\"y z\")");
        check("a:in(*)", "*");
        check("contains_all(a, b)", "contains_all(a,b)");
        check("contains_any(a)", "contains_any(a)");
        check("seq(a, \"b c\")", "seq(a,\"b c\")");
        check("n:range[1, 5)", "n:range[1, 5)");
        check("n:range(1, 10]", "n:range(1, 10]");
        check("s:string_range(a, b)", "s:string_range(a, b)");
        check("len_range(5, inf)", "len_range(5, inf)");
        check("ip:ipv4_range(10.0.0.0/8)", "ip:ipv4_range(10.0.0.0, 10.255.255.255)");
        check("ip:ipv4_range(1.2.3.4, 1.2.3.5)", "ip:ipv4_range(1.2.3.4, 1.2.3.5)");
        check("re(\"a+\")", "~\"a+\"");
        check("x:value_type(uint64)", "x:value_type(uint64)");
        check("a:eq_field(b)", "a:eq_field(b)");
        check("a:le_field(b) a:lt_field(c)", "a:le_field(b) a:lt_field(c)");
        check("range", "\"range\"");
        check("in", "\"in\"");
        check("seq-x", "\"seq-x\"");
    }

    #[test]
    fn test_parse_subquery() {
        check("a:in(b:x | fields c)", "a:in(b:x | fields c)");
        check("a:in(* | uniq by (c))", "a:in(* | uniq by (c))");
        check("a:in(*)", "*");
        check_err("a:in(b:x | fields c, d)");
    }

    #[test]
    fn test_parse_time() {
        let q = parse_query_at_timestamp("_time:1h", 10 * NSECS_PER_HOUR).unwrap();
        assert_eq!(q.get_filter_time_range(), (9 * NSECS_PER_HOUR, 10 * NSECS_PER_HOUR));
        assert_eq!(q.to_string(), "_time:1h");

        let q = parse_query_at_timestamp("_time:1h offset 1h", 10 * NSECS_PER_HOUR).unwrap();
        assert_eq!(q.get_filter_time_range(), (8 * NSECS_PER_HOUR, 9 * NSECS_PER_HOUR));
        assert_eq!(q.to_string(), "_time:1h offset 1h");

        let q = parse_query_at_timestamp("_time:[1970-01-01T01:00:00Z, 1970-01-01T02:00:00Z)", 0).unwrap();
        assert_eq!(q.get_filter_time_range(), (NSECS_PER_HOUR, 2 * NSECS_PER_HOUR - 1));
        assert_eq!(q.to_string(), "_time:[1970-01-01T01:00:00Z,1970-01-01T02:00:00Z)");

        let q = parse_query_at_timestamp("_time:1970", 0).unwrap();
        assert_eq!(q.get_filter_time_range(), (0, 365 * NSECS_PER_DAY - 1));

        let q = parse_query_at_timestamp("_time:>1970-01-02Z", 0).unwrap();
        assert_eq!(q.get_filter_time_range(), (NSECS_PER_DAY + 1, i64::MAX));

        let q = parse_query_at_timestamp("_time:<=2h", 10 * NSECS_PER_HOUR).unwrap();
        assert_eq!(q.get_filter_time_range(), (8 * NSECS_PER_HOUR, 10 * NSECS_PER_HOUR));

        let q = parse_query_at_timestamp("options(time_offset=1h) _time:1970-01-01T05Z", 0).unwrap();
        assert_eq!(q.get_filter_time_range(), (4 * NSECS_PER_HOUR, 5 * NSECS_PER_HOUR - 1));

        check("_time:offset 1h", "_time:offset 1h");
        check("_time:day_range[08:00, 18:00) offset 2h", "_time:day_range[08:00, 18:00) offset 2h");
        check("_time:week_range[Mon, Fri]", "_time:week_range[Mon, Fri]");
        check("_time:5m foo", "_time:5m foo");
        check("_time", "_time");
        check_err("_time:week_range[Mon, Someday]");
        check_err("_time:day_range[8, 18]");
        check_err("_time:[2024, foo]");
    }

    #[test]
    fn test_parse_streams() {
        check("{app=\"nginx\"}", "_stream:{app=\"nginx\"}");
        check("_stream:{app=~\"ng.*\", env!=dev or x!~\"y\"}", "_stream:{app=~\"ng.*\",env!=\"dev\" or x!~\"y\"}");
        check("{}", "_stream:{}");
        check("_stream:foo", "_stream:foo");
        check("_stream_id:0000000000000000000000000000000a", "_stream_id:0000000000000000000000000000000a");
        check(
            "_stream_id:in(0000000000000000000000000000000a, 0000000000000000000000000000000b)",
            "_stream_id:in(0000000000000000000000000000000a,0000000000000000000000000000000b)",
        );
        check("_stream_id:in(x:y | fields _stream_id)", "_stream_id:in(x:y | fields _stream_id)");
        check_err("_stream_id:xyz");
        check_err("a:{b=\"c\"}");
        check_err("{a~\"b\"}");
    }

    #[test]
    fn test_parse_options() {
        check("options(concurrency=4) foo", "options(concurrency=4) foo");
        check(
            "options(allow_partial_response=false, parallel_readers=3) foo",
            "options(parallel_readers=3, allow_partial_response=false) foo",
        );
        check_err("options(concurrency=x) foo");
        check_err("options(foo=1) foo");
        check_err("options(concurrency=1 foo");

        let q = parse_query("options(concurrency=2) a:in(options(ignore_global_time_filter=true) * | fields a)").unwrap();
        let subqueries = q.filter_in_subqueries();
        assert_eq!(subqueries[0].0.opts.concurrency, 2);
        assert_eq!(subqueries[0].0.opts.ignore_global_time_filter, Some(true));
    }

    #[test]
    fn test_parse_errors() {
        check_err("");
        check_err("foo (");
        check_err("(foo");
        check_err("foo)");
        check_err("foo |");
        check_err("a = b");
        check_err("a ~ b");
        check_err("> 5");
        check_err("*foo");
        check_err("*foo*bar");
        check_err("not");
        check_err("foo and");
        check_err("a:range[1, x]");
        check_err("a:len_range(x, 2)");
        check_err("a:re(\"(\")");
        check_err("a:eq_field(b, c)");
        check_err("foo(bar)");

        let err = parse_query("foo | limit x").unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(parse_filter("foo bar").unwrap().to_string(), "foo bar");
        assert!(parse_filter("foo | limit 1").is_err());
    }

    #[test]
    fn test_parse_uint() {
        assert_eq!(parse_uint("10"), Some(10));
        assert_eq!(parse_uint("0x10"), Some(16));
        assert_eq!(parse_uint("1KiB"), Some(1024));
        assert_eq!(parse_uint("1s"), Some(1_000_000_000));
        assert_eq!(parse_uint("inf"), Some(u64::MAX));
        assert_eq!(parse_uint("-1"), None);
        assert_eq!(parse_uint("x"), None);
    }
}
