//! Filter Engine
//!
//! A [`Filter`] is the parsed form of the filter part of a LogsQL query. It
//! narrows a [`Bitmap`] of candidate rows in two settings:
//!
//! - [`Filter::apply_to_block_search`] runs against a block of a part. It
//!   prunes whole blocks by column min/max bounds and token bloom filters
//!   before decoding any values.
//! - [`Filter::apply_to_block_result`] runs against rows already loaded into a
//!   [`BlockResult`], as done by the `filter` pipe and by `if (...)` clauses.
//!
//! Both settings produce identical bitmaps for identical rows.
//!
//! ## Boolean Filters
//!
//! ```text
//! And:  bm = f1(bm); bm = f2(bm); ...        stops once bm is empty
//! Or:   rest = bm & !matched; matched |= fi(rest)   stops once rest is empty
//! Not:  bm = bm & !f(bm)
//! ```
//!
//! ## Tree Rewrites
//!
//! Children are held in `Arc`s. [`copy_filter`] rebuilds only the path from the
//! root to the rewritten leaves and shares every untouched subtree with the
//! original tree.

pub mod matchers;
pub mod stream_filter;
pub mod time;

use crate::bitmap::Bitmap;
use crate::block_result::{BlockResult, BlockResultColumn, ColumnData};
use crate::block_search::{BlockColumnRef, BlockSearch};
use crate::error::Result;
use crate::fields_set::FieldsSet;
use crate::query::Query;
use crate::quote::{quote, quote_field_name_if_needed, quote_string_token_if_needed, quote_token_if_needed};
use logstore_core::values::{
    marshal_timestamp_rfc3339nano_string, try_parse_number, try_parse_timestamp_rfc3339_nano, NSECS_PER_DAY,
};
use logstore_core::{StreamId, StreamTags, STREAM_FIELD_NAME, STREAM_ID_FIELD_NAME, TIME_FIELD_NAME};
use logstore_storage::{tokenize, ColumnHeader, EncodedValues, ValueType};
use matchers::*;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use stream_filter::{parse_stream_tags, StreamFilter};

/// Values of `in(...)`, `contains_all(...)` and `contains_any(...)`.
///
/// The values may come from a subquery, in which case they are filled in by
/// the query runner before the filter is applied.
#[derive(Debug, Clone, Default)]
pub struct InValues {
    pub values: Vec<String>,
    set: HashSet<String>,
    tokens: Vec<Vec<String>>,
    pub subquery: Option<Arc<Query>>,
    pub subquery_field: String,
    pub resolved: bool,
}

impl InValues {
    pub fn new(values: Vec<String>) -> Self {
        let set = values.iter().cloned().collect();
        let tokens = values.iter().map(|v| owned_tokens(v)).collect();
        Self {
            values,
            set,
            tokens,
            subquery: None,
            subquery_field: String::new(),
            resolved: false,
        }
    }

    pub fn from_subquery(query: Query, field: String) -> Self {
        Self {
            subquery: Some(Arc::new(query)),
            subquery_field: field,
            ..Self::default()
        }
    }

    /// Returns true if the values must still be fetched by running the subquery.
    pub fn needs_subquery(&self) -> bool {
        self.subquery.is_some() && !self.resolved
    }

    /// Returns a copy holding the values produced by the subquery.
    pub fn with_resolved_values(&self, values: Vec<String>) -> Self {
        let mut iv = Self::new(values);
        iv.subquery = self.subquery.clone();
        iv.subquery_field = self.subquery_field.clone();
        iv.resolved = true;
        iv
    }

    fn contains(&self, v: &str) -> bool {
        self.set.contains(v)
    }
}

impl fmt::Display for InValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(q) = &self.subquery {
            return write!(f, "({q})");
        }
        f.write_str("(")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(&quote_token_if_needed(v))?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone)]
pub enum Filter {
    /// `*`, matching every row
    Noop,
    /// `f1 f2` or `f1 and f2`
    And(Vec<Arc<Filter>>),
    /// `f1 or f2`
    Or(Vec<Arc<Filter>>),
    /// `!f`, `not f` or `-f`
    Not(Arc<Filter>),
    /// `field:phrase`
    Phrase { field: String, phrase: String },
    /// `field:prefix*`
    Prefix { field: String, prefix: String },
    /// `field:*substring*`
    Substring { field: String, substring: String },
    /// `field:=value`
    Exact { field: String, value: String },
    /// `field:=prefix*`
    ExactPrefix { field: String, prefix: String },
    /// `field:i(phrase)`
    AnyCasePhrase {
        field: String,
        phrase: String,
        phrase_lowercase: String,
    },
    /// `field:i(prefix*)`
    AnyCasePrefix {
        field: String,
        prefix: String,
        prefix_lowercase: String,
    },
    /// `field:in(v1, v2)` or `field:in(<query>)`
    In { field: String, values: InValues },
    /// `field:contains_all(p1, p2)`
    ContainsAll { field: String, values: InValues },
    /// `field:contains_any(p1, p2)`
    ContainsAny { field: String, values: InValues },
    /// `field:seq(p1, p2)`
    Sequence { field: String, phrases: Vec<String> },
    /// `field:range[min, max)` or `field:>min`
    Range {
        field: String,
        min: f64,
        max: f64,
        repr: String,
    },
    /// `field:string_range(min, max)`
    StringRange {
        field: String,
        min: String,
        max: String,
        repr: String,
    },
    /// `field:len_range(min, max)`
    LenRange {
        field: String,
        min: u64,
        max: u64,
        repr: String,
    },
    /// `field:ipv4_range(min, max)`
    Ipv4Range { field: String, min: u32, max: u32 },
    /// `field:~"regexp"`
    Regexp { field: String, re: Regex },
    /// `field:value_type(uint64)`
    ValueType { field: String, value_type: String },
    /// `field:eq_field(other)`
    EqField { field: String, other: String },
    /// `field:le_field(other)`, or `field:lt_field(other)` when `exclude` is set
    LeField {
        field: String,
        other: String,
        exclude: bool,
    },
    /// `_time:[min, max]` and its relative forms
    Time { min: i64, max: i64, repr: String },
    /// `_time:day_range[start, end] offset d`
    DayRange {
        start: i64,
        end: i64,
        offset: i64,
        repr: String,
    },
    /// `_time:week_range[start, end] offset d`
    WeekRange {
        start_day: i64,
        end_day: i64,
        offset: i64,
        repr: String,
    },
    /// `_stream:{...}`
    Stream(StreamFilter),
    /// `_stream_id:id` or `_stream_id:in(...)`
    StreamId { ids: Vec<StreamId>, values: InValues },
}

/// Tokens which must be present in a column's bloom filter for a value filter to match.
enum BloomTokens<'a> {
    Unknown,
    All(Vec<String>),
    AnyOf(&'a [Vec<String>]),
}

fn owned_tokens(s: &str) -> Vec<String> {
    tokenize(s).into_iter().map(str::to_string).collect()
}

/// Tokens of `s`, skipping the first or last token when it may be cut in the middle.
fn complete_tokens(s: &str, first_may_be_partial: bool, last_may_be_partial: bool) -> Vec<String> {
    let mut tokens = owned_tokens(s);
    let starts_with_token = s.chars().next().is_some_and(crate::quote::is_token_rune);
    let ends_with_token = s.chars().next_back().is_some_and(crate::quote::is_token_rune);
    if last_may_be_partial && ends_with_token {
        tokens.pop();
    }
    if first_may_be_partial && starts_with_token && !tokens.is_empty() {
        tokens.remove(0);
    }
    tokens
}

/// Returns the numeric bounds of a column with numeric values.
fn numeric_bounds(ch: &ColumnHeader) -> Option<(f64, f64)> {
    match ch.value_type {
        ValueType::Uint8 | ValueType::Uint16 | ValueType::Uint32 | ValueType::Uint64 => {
            Some((ch.min_value as f64, ch.max_value as f64))
        }
        ValueType::Int64 => Some((ch.min_value as i64 as f64, ch.max_value as i64 as f64)),
        ValueType::Float64 => Some((f64::from_bits(ch.min_value), f64::from_bits(ch.max_value))),
        _ => None,
    }
}

fn column_value_type(col: &BlockResultColumn) -> &'static str {
    match col.data() {
        ColumnData::Const(_) => "const",
        ColumnData::Time(_) => "time",
        ColumnData::Encoded { values, .. } => values.value_type().as_str(),
        ColumnData::Strings(_) => "string",
    }
}

/// Clears the rows of `col` for which `pred` is false, testing const columns once.
fn apply_to_column(col: &BlockResultColumn, bm: &mut Bitmap, pred: impl Fn(&str) -> bool) {
    if let Some(v) = col.const_value() {
        if !pred(v) {
            bm.reset_all();
        }
        return;
    }
    bm.for_each_set_bit(|i| pred(col.value(i)));
}

fn less_or_equal(a: &str, b: &str, exclude: bool) -> bool {
    match (try_parse_number(a), try_parse_number(b)) {
        (Some(x), Some(y)) => {
            if exclude {
                x < y
            } else {
                x <= y
            }
        }
        _ => {
            if exclude {
                a < b
            } else {
                a <= b
            }
        }
    }
}

impl Filter {
    pub fn and(filters: Vec<Filter>) -> Filter {
        Filter::And(filters.into_iter().map(Arc::new).collect())
    }

    pub fn or(filters: Vec<Filter>) -> Filter {
        Filter::Or(filters.into_iter().map(Arc::new).collect())
    }

    pub fn not(f: Filter) -> Filter {
        Filter::Not(Arc::new(f))
    }

    pub fn any_case_phrase(field: String, phrase: String) -> Filter {
        let phrase_lowercase = phrase.to_lowercase();
        Filter::AnyCasePhrase {
            field,
            phrase,
            phrase_lowercase,
        }
    }

    pub fn any_case_prefix(field: String, prefix: String) -> Filter {
        let prefix_lowercase = prefix.to_lowercase();
        Filter::AnyCasePrefix {
            field,
            prefix,
            prefix_lowercase,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Filter::Noop)
    }

    /// Returns the field tested by a single-field value filter.
    fn value_field(&self) -> Option<&str> {
        match self {
            Filter::Phrase { field, .. }
            | Filter::Prefix { field, .. }
            | Filter::Substring { field, .. }
            | Filter::Exact { field, .. }
            | Filter::ExactPrefix { field, .. }
            | Filter::AnyCasePhrase { field, .. }
            | Filter::AnyCasePrefix { field, .. }
            | Filter::In { field, .. }
            | Filter::ContainsAll { field, .. }
            | Filter::ContainsAny { field, .. }
            | Filter::Sequence { field, .. }
            | Filter::Range { field, .. }
            | Filter::StringRange { field, .. }
            | Filter::LenRange { field, .. }
            | Filter::Ipv4Range { field, .. }
            | Filter::Regexp { field, .. } => Some(field),
            _ => None,
        }
    }

    fn match_value(&self, v: &str) -> bool {
        match self {
            Filter::Phrase { phrase, .. } => match_phrase(v, phrase),
            Filter::Prefix { prefix, .. } => match_prefix(v, prefix),
            Filter::Substring { substring, .. } => match_substring(v, substring),
            Filter::Exact { value, .. } => v == value,
            Filter::ExactPrefix { prefix, .. } => match_exact_prefix(v, prefix),
            Filter::AnyCasePhrase { phrase_lowercase, .. } => match_any_case_phrase(v, phrase_lowercase),
            Filter::AnyCasePrefix { prefix_lowercase, .. } => match_any_case_prefix(v, prefix_lowercase),
            Filter::In { values, .. } => values.contains(v),
            Filter::ContainsAll { values, .. } => values.values.iter().all(|p| match_phrase(v, p)),
            Filter::ContainsAny { values, .. } => values.values.iter().any(|p| match_phrase(v, p)),
            Filter::Sequence { phrases, .. } => match_sequence(v, phrases),
            Filter::Range { min, max, .. } => match_range(v, *min, *max),
            Filter::StringRange { min, max, .. } => match_string_range(v, min, max),
            Filter::LenRange { min, max, .. } => match_len_range(v, *min, *max),
            Filter::Ipv4Range { min, max, .. } => match_ipv4_range(v, *min, *max),
            Filter::Regexp { re, .. } => re.is_match(v),
            _ => panic!("BUG: {self} is not a value filter"),
        }
    }

    fn bloom_tokens(&self) -> BloomTokens<'_> {
        match self {
            Filter::Phrase { phrase, .. } => BloomTokens::All(owned_tokens(phrase)),
            Filter::Prefix { prefix, .. } => BloomTokens::All(complete_tokens(prefix, false, true)),
            Filter::Substring { substring, .. } => BloomTokens::All(complete_tokens(substring, true, true)),
            Filter::Exact { value, .. } => BloomTokens::All(owned_tokens(value)),
            Filter::ExactPrefix { prefix, .. } => BloomTokens::All(complete_tokens(prefix, false, true)),
            Filter::Sequence { phrases, .. } => {
                BloomTokens::All(phrases.iter().flat_map(|p| owned_tokens(p)).collect())
            }
            Filter::In { values, .. } | Filter::ContainsAny { values, .. } => BloomTokens::AnyOf(&values.tokens),
            Filter::ContainsAll { values, .. } => BloomTokens::All(values.tokens.concat()),
            _ => BloomTokens::Unknown,
        }
    }

    /// Returns true if the column bounds prove that no row of the block can match.
    fn can_skip_by_min_max(&self, ch: &ColumnHeader) -> bool {
        match self {
            Filter::Range { min, max, .. } => match numeric_bounds(ch) {
                Some((lo, hi)) => hi < *min || lo > *max,
                None => false,
            },
            Filter::Ipv4Range { min, max, .. } if ch.value_type == ValueType::IPv4 => {
                (ch.max_value as u32) < *min || (ch.min_value as u32) > *max
            }
            _ => false,
        }
    }

    fn bloom_may_match(&self, bs: &BlockSearch<'_>, ch: &ColumnHeader) -> bool {
        let tokens = self.bloom_tokens();
        if matches!(tokens, BloomTokens::Unknown) {
            return true;
        }
        let Some(bloom) = bs.bloom_filter(ch) else {
            return true;
        };
        match tokens {
            BloomTokens::Unknown => true,
            BloomTokens::All(tokens) => bloom.contains_all(&tokens),
            BloomTokens::AnyOf(groups) => groups.iter().any(|g| bloom.contains_all(g)),
        }
    }

    fn apply_const(&self, v: &str, bm: &mut Bitmap) {
        if !self.match_value(v) {
            bm.reset_all();
        }
    }

    fn match_encoded(&self, values: &EncodedValues, bm: &mut Bitmap) {
        match values {
            EncodedValues::Dict { dict, indexes } => {
                let matches: Vec<bool> = dict.values.iter().map(|v| self.match_value(v)).collect();
                bm.for_each_set_bit(|i| matches[indexes[i] as usize]);
            }
            EncodedValues::Strings(a) => bm.for_each_set_bit(|i| self.match_value(&a[i])),
            _ => {
                if let Filter::Range { min, max, .. } = self {
                    if !matches!(values, EncodedValues::IPv4(_) | EncodedValues::TimestampIso8601(_)) {
                        bm.for_each_set_bit(|i| values.numeric_value(i).is_some_and(|f| f >= *min && f <= *max));
                        return;
                    }
                }
                let mut buf = String::new();
                bm.for_each_set_bit(|i| {
                    buf.clear();
                    values.append_value(i, &mut buf);
                    self.match_value(&buf)
                });
            }
        }
    }

    fn apply_value_filter_to_block_search(&self, field: &str, bs: &BlockSearch<'_>, bm: &mut Bitmap) {
        match field {
            TIME_FIELD_NAME => {
                let ts = bs.timestamps();
                let mut buf = String::new();
                bm.for_each_set_bit(|i| {
                    buf.clear();
                    marshal_timestamp_rfc3339nano_string(&mut buf, ts[i]);
                    self.match_value(&buf)
                });
            }
            STREAM_ID_FIELD_NAME => self.apply_const(&bs.stream_id().to_string(), bm),
            STREAM_FIELD_NAME => {
                let tags = bs.stream_tags().map(|t| t.to_string()).unwrap_or_default();
                self.apply_const(&tags, bm);
            }
            _ => match bs.column(field) {
                BlockColumnRef::Const(v) => self.apply_const(v, bm),
                BlockColumnRef::Missing => self.apply_const("", bm),
                BlockColumnRef::Header(ch) => {
                    if self.can_skip_by_min_max(ch) || !self.bloom_may_match(bs, ch) {
                        bm.reset_all();
                        return;
                    }
                    let values = bs.values(ch);
                    self.match_encoded(&values, bm);
                }
            },
        }
    }

    fn match_timestamp(&self, ts: i64) -> bool {
        match self {
            Filter::Time { min, max, .. } => ts >= *min && ts <= *max,
            Filter::DayRange { start, end, offset, .. } => {
                let day_offset = ts.wrapping_add(*offset).rem_euclid(NSECS_PER_DAY);
                day_offset >= *start && day_offset <= *end
            }
            Filter::WeekRange {
                start_day,
                end_day,
                offset,
                ..
            } => {
                let day = time::weekday(ts.wrapping_add(*offset));
                day >= *start_day && day <= *end_day
            }
            _ => panic!("BUG: {self} is not a time filter"),
        }
    }

    fn apply_time_to_block_search(&self, bs: &BlockSearch<'_>, bm: &mut Bitmap) {
        if let Filter::Time { min, max, .. } = self {
            if bs.max_timestamp() < *min || bs.min_timestamp() > *max {
                bm.reset_all();
                return;
            }
            if bs.min_timestamp() >= *min && bs.max_timestamp() <= *max {
                return;
            }
        }
        let ts = bs.timestamps();
        bm.for_each_set_bit(|i| self.match_timestamp(ts[i]));
    }

    /// Loads `fields` of every row of the block and applies the filter to the loaded rows.
    fn apply_via_block_result(&self, fields: &[&str], bs: &BlockSearch<'_>, bm: &mut Bitmap) {
        let all = Bitmap::new_set(bs.rows_count());
        let br = BlockResult::from_block_search(bs, &all, &FieldsSet::from_patterns(fields));
        if br.rows_len() != bs.rows_count() {
            bm.reset_all();
            return;
        }
        self.apply_to_block_result(&br, bm);
    }

    /// Clears the bits of `bm` for the block rows not matching the filter.
    pub fn apply_to_block_search(&self, bs: &BlockSearch<'_>, bm: &mut Bitmap) {
        match self {
            Filter::Noop => {}
            Filter::And(filters) => {
                for f in filters {
                    if bm.is_zero() {
                        break;
                    }
                    f.apply_to_block_search(bs, bm);
                }
            }
            Filter::Or(filters) => {
                let mut matched = Bitmap::new(bm.len());
                let mut rest = Bitmap::new(bm.len());
                for f in filters {
                    rest.copy_from(bm);
                    rest.and_not(&matched);
                    if rest.is_zero() {
                        break;
                    }
                    f.apply_to_block_search(bs, &mut rest);
                    matched.or(&rest);
                }
                bm.copy_from(&matched);
            }
            Filter::Not(f) => {
                let mut tmp = bm.clone();
                f.apply_to_block_search(bs, &mut tmp);
                bm.and_not(&tmp);
            }
            Filter::Time { .. } | Filter::DayRange { .. } | Filter::WeekRange { .. } => {
                self.apply_time_to_block_search(bs, bm)
            }
            Filter::Stream(sf) => {
                let empty = StreamTags::new();
                if !sf.matches(bs.stream_tags().unwrap_or(&empty)) {
                    bm.reset_all();
                }
            }
            Filter::StreamId { ids, .. } => {
                if !ids.contains(&bs.stream_id()) {
                    bm.reset_all();
                }
            }
            Filter::ValueType { field, value_type } => {
                let vt = match field.as_str() {
                    TIME_FIELD_NAME => "time",
                    STREAM_FIELD_NAME | STREAM_ID_FIELD_NAME => "const",
                    _ => match bs.column(field) {
                        BlockColumnRef::Const(_) => "const",
                        BlockColumnRef::Header(ch) => ch.value_type.as_str(),
                        BlockColumnRef::Missing => "",
                    },
                };
                if vt != value_type {
                    bm.reset_all();
                }
            }
            Filter::EqField { field, other } | Filter::LeField { field, other, .. } => {
                self.apply_via_block_result(&[field.as_str(), other.as_str()], bs, bm)
            }
            _ => {
                let Some(field) = self.value_field() else {
                    panic!("BUG: unexpected filter {self}");
                };
                self.apply_value_filter_to_block_search(field, bs, bm);
            }
        }
    }

    /// Clears the bits of `bm` for the rows of `br` not matching the filter.
    pub fn apply_to_block_result(&self, br: &BlockResult, bm: &mut Bitmap) {
        match self {
            Filter::Noop => {}
            Filter::And(filters) => {
                for f in filters {
                    if bm.is_zero() {
                        break;
                    }
                    f.apply_to_block_result(br, bm);
                }
            }
            Filter::Or(filters) => {
                let mut matched = Bitmap::new(bm.len());
                let mut rest = Bitmap::new(bm.len());
                for f in filters {
                    rest.copy_from(bm);
                    rest.and_not(&matched);
                    if rest.is_zero() {
                        break;
                    }
                    f.apply_to_block_result(br, &mut rest);
                    matched.or(&rest);
                }
                bm.copy_from(&matched);
            }
            Filter::Not(f) => {
                let mut tmp = bm.clone();
                f.apply_to_block_result(br, &mut tmp);
                bm.and_not(&tmp);
            }
            Filter::Time { .. } | Filter::DayRange { .. } | Filter::WeekRange { .. } => {
                let col = br.column(TIME_FIELD_NAME);
                match col.timestamps() {
                    Some(ts) => bm.for_each_set_bit(|i| self.match_timestamp(ts[i])),
                    None => apply_to_column(&col, bm, |v| {
                        try_parse_timestamp_rfc3339_nano(v).is_some_and(|ts| self.match_timestamp(ts))
                    }),
                }
            }
            Filter::Stream(sf) => {
                let col = br.column(STREAM_FIELD_NAME);
                apply_to_column(&col, bm, |v| {
                    let tags = parse_stream_tags(v).unwrap_or_default();
                    sf.matches(&tags)
                });
            }
            Filter::StreamId { ids, .. } => {
                let col = br.column(STREAM_ID_FIELD_NAME);
                apply_to_column(&col, bm, |v| StreamId::try_parse(v).is_some_and(|id| ids.contains(&id)));
            }
            Filter::ValueType { field, value_type } => {
                let col = br.column(field);
                let vt = match br.get_column(field) {
                    Some(_) => column_value_type(&col),
                    None => "",
                };
                if vt != value_type {
                    bm.reset_all();
                }
            }
            Filter::EqField { field, other } => {
                let a = br.column(field);
                let b = br.column(other);
                bm.for_each_set_bit(|i| a.value(i) == b.value(i));
            }
            Filter::LeField { field, other, exclude } => {
                let a = br.column(field);
                let b = br.column(other);
                bm.for_each_set_bit(|i| less_or_equal(a.value(i), b.value(i), *exclude));
            }
            _ => {
                let Some(field) = self.value_field() else {
                    panic!("BUG: unexpected filter {self}");
                };
                let col = br.column(field);
                match col.data() {
                    ColumnData::Encoded { values, .. } => self.match_encoded(values, bm),
                    _ => apply_to_column(&col, bm, |v| self.match_value(v)),
                }
            }
        }
    }

    /// Adds the fields read by the filter to `needed`.
    pub fn update_needed_fields(&self, needed: &mut FieldsSet) {
        match self {
            Filter::Noop => {}
            Filter::And(filters) | Filter::Or(filters) => {
                for f in filters {
                    f.update_needed_fields(needed);
                }
            }
            Filter::Not(f) => f.update_needed_fields(needed),
            Filter::Time { .. } | Filter::DayRange { .. } | Filter::WeekRange { .. } => needed.add(TIME_FIELD_NAME),
            Filter::Stream(_) => needed.add(STREAM_FIELD_NAME),
            Filter::StreamId { .. } => needed.add(STREAM_ID_FIELD_NAME),
            Filter::ValueType { field, .. } => needed.add(field),
            Filter::EqField { field, other } | Filter::LeField { field, other, .. } => {
                needed.add(field);
                needed.add(other);
            }
            _ => {
                if let Some(field) = self.value_field() {
                    needed.add(field);
                }
            }
        }
    }

    /// Returns true if `visit` returns true for this filter or any filter nested in it.
    ///
    /// Children are visited before their parent.
    pub fn visit_filter_recursive(&self, visit: &mut dyn FnMut(&Filter) -> bool) -> bool {
        match self {
            Filter::And(filters) | Filter::Or(filters) => {
                for f in filters {
                    if f.visit_filter_recursive(visit) {
                        return true;
                    }
                }
            }
            Filter::Not(f) => {
                if f.visit_filter_recursive(visit) {
                    return true;
                }
            }
            _ => {}
        }
        visit(self)
    }
}

fn copy_filters(
    filters: &[Arc<Filter>],
    visit: &mut dyn FnMut(&Filter) -> bool,
    copy: &mut dyn FnMut(&Filter) -> Result<Arc<Filter>>,
) -> Result<Vec<Arc<Filter>>> {
    filters.iter().map(|f| copy_filter(f, visit, copy)).collect()
}

/// Returns `f` with every leaf for which `visit` returns true replaced by `copy(leaf)`.
///
/// Untouched subtrees are shared with `f`; an untouched `f` is returned as is.
pub fn copy_filter(
    f: &Arc<Filter>,
    visit: &mut dyn FnMut(&Filter) -> bool,
    copy: &mut dyn FnMut(&Filter) -> Result<Arc<Filter>>,
) -> Result<Arc<Filter>> {
    if !f.visit_filter_recursive(visit) {
        return Ok(Arc::clone(f));
    }
    match f.as_ref() {
        Filter::And(filters) => Ok(Arc::new(Filter::And(copy_filters(filters, visit, copy)?))),
        Filter::Or(filters) => Ok(Arc::new(Filter::Or(copy_filters(filters, visit, copy)?))),
        Filter::Not(inner) => Ok(Arc::new(Filter::Not(copy_filter(inner, visit, copy)?))),
        leaf => copy(leaf),
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Noop => f.write_str("*"),
            Filter::And(filters) => {
                for (i, child) in filters.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    match child.as_ref() {
                        Filter::Or(_) => write!(f, "({child})")?,
                        _ => write!(f, "{child}")?,
                    }
                }
                Ok(())
            }
            Filter::Or(filters) => {
                for (i, child) in filters.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" or ")?;
                    }
                    write!(f, "{child}")?;
                }
                Ok(())
            }
            Filter::Not(child) => match child.as_ref() {
                Filter::And(_) | Filter::Or(_) => write!(f, "!({child})"),
                _ => write!(f, "!{child}"),
            },
            Filter::Phrase { field, phrase } => {
                write!(f, "{}{}", quote_field_name_if_needed(field), quote_token_if_needed(phrase))
            }
            Filter::Prefix { field, prefix } => {
                if prefix.is_empty() {
                    write!(f, "{}*", quote_field_name_if_needed(field))
                } else {
                    write!(f, "{}{}*", quote_field_name_if_needed(field), quote_token_if_needed(prefix))
                }
            }
            Filter::Substring { field, substring } => write!(
                f,
                "{}*{}*",
                quote_field_name_if_needed(field),
                quote_token_if_needed(substring)
            ),
            Filter::Exact { field, value } => {
                write!(f, "{}={}", quote_field_name_if_needed(field), quote_token_if_needed(value))
            }
            Filter::ExactPrefix { field, prefix } => {
                write!(f, "{}={}*", quote_field_name_if_needed(field), quote_token_if_needed(prefix))
            }
            Filter::AnyCasePhrase { field, phrase, .. } => {
                write!(f, "{}i({})", quote_field_name_if_needed(field), quote_token_if_needed(phrase))
            }
            Filter::AnyCasePrefix { field, prefix, .. } => {
                if prefix.is_empty() {
                    write!(f, "{}i(*)", quote_field_name_if_needed(field))
                } else {
                    write!(f, "{}i({}*)", quote_field_name_if_needed(field), quote_token_if_needed(prefix))
                }
            }
            Filter::In { field, values } => write!(f, "{}in{values}", quote_field_name_if_needed(field)),
            Filter::ContainsAll { field, values } => {
                write!(f, "{}contains_all{values}", quote_field_name_if_needed(field))
            }
            Filter::ContainsAny { field, values } => {
                write!(f, "{}contains_any{values}", quote_field_name_if_needed(field))
            }
            Filter::Sequence { field, phrases } => {
                let args: Vec<String> = phrases.iter().map(|p| quote_token_if_needed(p)).collect();
                write!(f, "{}seq({})", quote_field_name_if_needed(field), args.join(","))
            }
            Filter::Range { field, repr, .. }
            | Filter::StringRange { field, repr, .. }
            | Filter::LenRange { field, repr, .. } => {
                write!(f, "{}{repr}", quote_field_name_if_needed(field))
            }
            Filter::Ipv4Range { field, min, max } => write!(
                f,
                "{}ipv4_range({}, {})",
                quote_field_name_if_needed(field),
                logstore_core::values::ipv4_string(*min),
                logstore_core::values::ipv4_string(*max)
            ),
            Filter::Regexp { field, re } => {
                write!(f, "{}~{}", quote_field_name_if_needed(field), quote(re.as_str()))
            }
            Filter::ValueType { field, value_type } => write!(
                f,
                "{}value_type({})",
                quote_field_name_if_needed(field),
                quote_token_if_needed(value_type)
            ),
            Filter::EqField { field, other } => write!(
                f,
                "{}eq_field({})",
                quote_field_name_if_needed(field),
                quote_token_if_needed(other)
            ),
            Filter::LeField { field, other, exclude } => write!(
                f,
                "{}{}({})",
                quote_field_name_if_needed(field),
                if *exclude { "lt_field" } else { "le_field" },
                quote_token_if_needed(other)
            ),
            Filter::Time { repr, .. } => write!(f, "_time:{repr}"),
            Filter::DayRange { repr, .. } => write!(f, "_time:day_range{repr}"),
            Filter::WeekRange { repr, .. } => write!(f, "_time:week_range{repr}"),
            Filter::Stream(sf) => write!(f, "_stream:{sf}"),
            Filter::StreamId { ids, values } => {
                if values.subquery.is_some() {
                    return write!(f, "_stream_id:in{values}");
                }
                if ids.len() == 1 {
                    return write!(f, "_stream_id:{}", ids[0]);
                }
                let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                write!(f, "_stream_id:in({})", ids.join(","))
            }
        }
    }
}

/// Returns the text form of a string range bound for `>`/`<` filters.
pub fn string_range_repr(op: &str, value: &str) -> String {
    format!("{op}{}", quote_string_token_if_needed(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_result::BlockResult;

    fn br() -> BlockResult {
        BlockResult::from_result_columns(
            5,
            vec![
                (
                    "_msg".to_string(),
                    vec![
                        "an error occurred".to_string(),
                        "all good".to_string(),
                        "ERROR: disk full".to_string(),
                        "errors everywhere".to_string(),
                        "".to_string(),
                    ],
                ),
                (
                    "n".to_string(),
                    vec!["1".to_string(), "5".to_string(), "10".to_string(), "x".to_string(), "7".to_string()],
                ),
                (
                    "m".to_string(),
                    vec!["1".to_string(), "6".to_string(), "2".to_string(), "x".to_string(), "7".to_string()],
                ),
            ],
        )
    }

    fn eval(f: &Filter) -> Vec<usize> {
        let br = br();
        let mut bm = Bitmap::new_set(br.rows_len());
        f.apply_to_block_result(&br, &mut bm);
        bm.set_indexes()
    }

    fn phrase(field: &str, p: &str) -> Filter {
        Filter::Phrase {
            field: field.to_string(),
            phrase: p.to_string(),
        }
    }

    fn range(min: f64, max: f64) -> Filter {
        Filter::Range {
            field: "n".to_string(),
            min,
            max,
            repr: format!("range[{min}, {max}]"),
        }
    }

    #[test]
    fn test_value_filters() {
        assert_eq!(eval(&phrase("_msg", "error")), vec![0]);
        assert_eq!(eval(&Filter::any_case_phrase("_msg".into(), "Error".into())), vec![0, 2]);
        assert_eq!(
            eval(&Filter::Prefix {
                field: "_msg".into(),
                prefix: "err".into()
            }),
            vec![0, 3]
        );
        assert_eq!(
            eval(&Filter::Exact {
                field: "_msg".into(),
                value: "".into()
            }),
            vec![4]
        );
        assert_eq!(eval(&range(5.0, 10.0)), vec![1, 2, 4]);
        assert_eq!(
            eval(&Filter::In {
                field: "n".into(),
                values: InValues::new(vec!["x".into(), "1".into()])
            }),
            vec![0, 3]
        );
        assert_eq!(eval(&phrase("missing", "")), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_field_comparisons() {
        let eq = Filter::EqField {
            field: "n".into(),
            other: "m".into(),
        };
        assert_eq!(eval(&eq), vec![0, 3, 4]);
        let lt = Filter::LeField {
            field: "n".into(),
            other: "m".into(),
            exclude: true,
        };
        assert_eq!(eval(&lt), vec![1]);
    }

    #[test]
    fn test_boolean_laws() {
        let filters = [
            phrase("_msg", "error"),
            range(2.0, 7.0),
            Filter::or(vec![phrase("_msg", "good"), range(10.0, 10.0)]),
        ];
        for a in &filters {
            assert_eq!(eval(&Filter::not(Filter::not(a.clone()))), eval(a));
            assert_eq!(eval(&Filter::and(vec![a.clone(), a.clone()])), eval(a));
            for b in &filters {
                let lhs = Filter::not(Filter::and(vec![a.clone(), b.clone()]));
                let rhs = Filter::or(vec![Filter::not(a.clone()), Filter::not(b.clone())]);
                assert_eq!(eval(&lhs), eval(&rhs));
            }
        }
    }

    #[test]
    fn test_copy_filter_shares_untouched_subtrees() {
        let untouched = Arc::new(Filter::or(vec![range(1.0, 2.0), phrase("_msg", "b")]));
        let root = Arc::new(Filter::And(vec![
            untouched.clone(),
            Arc::new(Filter::not(phrase("_msg", "target"))),
        ]));
        let copied = copy_filter(
            &root,
            &mut |f| matches!(f, Filter::Phrase { phrase, .. } if phrase == "target"),
            &mut |_| Ok(Arc::new(phrase("_msg", "replaced"))),
        )
        .unwrap();
        assert_eq!(copied.to_string(), "(n:range[1, 2] or b) !replaced");
        let Filter::And(children) = copied.as_ref() else {
            panic!("expected and filter");
        };
        assert!(Arc::ptr_eq(&children[0], &untouched));

        let same = copy_filter(&root, &mut |_| false, &mut |_| unreachable!()).unwrap();
        assert!(Arc::ptr_eq(&same, &root));
    }

    #[test]
    fn test_visit_filter_recursive_order() {
        let f = Filter::and(vec![phrase("_msg", "a"), Filter::not(phrase("_msg", "b"))]);
        let mut seen = Vec::new();
        f.visit_filter_recursive(&mut |f| {
            seen.push(f.to_string());
            false
        });
        assert_eq!(seen, vec!["a", "b", "!b", "a !b"]);
    }

    #[test]
    fn test_display() {
        assert_eq!(phrase("host", "a b").to_string(), "host:\"a b\"");
        assert_eq!(
            Filter::Prefix {
                field: "_msg".into(),
                prefix: "".into()
            }
            .to_string(),
            "*"
        );
        assert_eq!(
            Filter::Substring {
                field: "x".into(),
                substring: "oo".into()
            }
            .to_string(),
            "x:*oo*"
        );
        assert_eq!(Filter::any_case_prefix("_msg".into(), "".into()).to_string(), "i(*)");
        assert_eq!(
            Filter::In {
                field: "f".into(),
                values: InValues::new(vec!["a".into(), "b c".into()])
            }
            .to_string(),
            "f:in(a,\"b c\")"
        );
        assert_eq!(string_range_repr(">", "10"), ">\"10\"");
    }
}
