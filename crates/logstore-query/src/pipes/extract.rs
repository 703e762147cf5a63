//! `extract` and `extract_regexp` pipes.
//!
//! ```text
//! extract [if (filter)] "pattern" [from field] [keep_original_fields|skip_empty_results]
//! extract_regexp [if (filter)] "regexp" [from field] [keep_original_fields|skip_empty_results]
//! ```
//!
//! An `extract` pattern is literal text with `<field>` placeholders, such as
//! `ip=<ip> user=<user>`. Matching starts at the first occurrence of the text
//! before the first placeholder. Each placeholder captures everything up to
//! the text following it, or the rest of the value when nothing follows it.
//! A captured value starting with a quote is unquoted unless the placeholder
//! is written as `<plain:field>`. `<_>` skips text without storing it.
//!
//! `extract_regexp` stores the named groups `(?P<name>...)` of a regexp.
//!
//! Placeholders which are not reached get empty values. The source field is
//! `_msg` unless `from` names another one.

use super::format::{parse_pattern_steps, FormatStep};
use super::PipeProcessor;
use crate::bitmap::Bitmap;
use crate::block_result::BlockResult;
use crate::error::Result;
use crate::fields_set::FieldsSet;
use crate::filter::Filter;
use crate::lexer::Lexer;
use crate::parser::{parse_field_name, parse_if_filter};
use crate::quote::{quote_token_if_needed, unquote_prefix};
use logstore_core::MSG_FIELD_NAME;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Placeholder name which matches text without storing it.
const SKIPPED_FIELD: &str = "_";

#[derive(Debug, Clone)]
struct PatternStep {
    prefix: String,
    /// Index into `PipeExtract::result_fields`.
    field: Option<usize>,
    plain: bool,
}

#[derive(Debug, Clone)]
enum Extractor {
    Pattern(Vec<PatternStep>),
    Regexp(Regex),
}

#[derive(Debug, Clone)]
pub struct PipeExtract {
    pub is_regexp: bool,
    pub pattern_str: String,
    pub from_field: String,
    /// Distinct fields the pattern stores, in pattern order.
    pub result_fields: Vec<String>,
    pub keep_original_fields: bool,
    pub skip_empty_results: bool,
    pub iff: Option<Arc<Filter>>,
    extractor: Extractor,
}

impl PipeExtract {
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        let is_regexp = lex.is_keyword(&["extract_regexp"]);
        let name = if is_regexp { "extract_regexp" } else { "extract" };
        lex.next_token();

        let iff = if lex.is_keyword(&["if"]) {
            Some(parse_if_filter(lex)?)
        } else {
            None
        };

        if lex.is_keyword(&["|", ")", "", "from", "keep_original_fields", "skip_empty_results"]) {
            return Err(lex.error(format!("missing pattern after '{name}'")));
        }
        let pattern_str = lex.next_compound_token()?;
        let (extractor, result_fields) = if is_regexp {
            new_regexp_extractor(&pattern_str)
        } else {
            new_pattern_extractor(&pattern_str)
        }
        .map_err(|err| lex.error(format!("cannot parse '{name}' pattern {pattern_str:?}: {err}")))?;

        let from_field = if lex.is_keyword(&["from"]) {
            lex.next_token();
            parse_field_name(lex)?
        } else {
            MSG_FIELD_NAME.to_string()
        };

        let mut keep_original_fields = false;
        let mut skip_empty_results = false;
        if lex.is_keyword(&["keep_original_fields"]) {
            lex.next_token();
            keep_original_fields = true;
        } else if lex.is_keyword(&["skip_empty_results"]) {
            lex.next_token();
            skip_empty_results = true;
        }

        Ok(Self {
            is_regexp,
            pattern_str,
            from_field,
            result_fields,
            keep_original_fields,
            skip_empty_results,
            iff,
            extractor,
        })
    }

    pub(crate) fn update_needed_fields(&self, needed: &mut FieldsSet) {
        let mut need_from = false;
        for f in &self.result_fields {
            if !needed.contains(f) {
                continue;
            }
            need_from = true;
            if !self.keep_original_fields && !self.skip_empty_results && self.iff.is_none() {
                needed.remove(f);
            }
        }
        if need_from {
            if let Some(iff) = &self.iff {
                iff.update_needed_fields(needed);
            }
            needed.add(&self.from_field);
        }
    }

    pub(crate) fn new_processor(&self, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        Arc::new(ExtractProcessor {
            pipe: self.clone(),
            next,
        })
    }

    /// Stores the values extracted from `s` into `matches`, one per result field.
    fn apply(&self, s: &str, matches: &mut [String]) {
        matches.iter_mut().for_each(String::clear);
        match &self.extractor {
            Extractor::Pattern(steps) => apply_pattern(steps, s, matches),
            Extractor::Regexp(re) => {
                let Some(caps) = re.captures(s) else {
                    return;
                };
                for (m, name) in matches.iter_mut().zip(&self.result_fields) {
                    if let Some(v) = caps.name(name) {
                        m.push_str(v.as_str());
                    }
                }
            }
        }
    }
}

fn new_pattern_extractor(s: &str) -> std::result::Result<(Extractor, Vec<String>), String> {
    let format_steps = parse_pattern_steps(s, &["plain"])?;
    let mut result_fields: Vec<String> = Vec::new();
    let mut steps = Vec::with_capacity(format_steps.len());
    for (i, FormatStep { prefix, field, opt }) in format_steps.into_iter().enumerate() {
        if i > 0 && prefix.is_empty() && !field.is_empty() {
            return Err(format!("missing delimiter text before <{field}>"));
        }
        let field = if field.is_empty() || field == SKIPPED_FIELD {
            None
        } else {
            match result_fields.iter().position(|f| *f == field) {
                Some(pos) => Some(pos),
                None => {
                    result_fields.push(field);
                    Some(result_fields.len() - 1)
                }
            }
        };
        steps.push(PatternStep {
            prefix,
            field,
            plain: opt == "plain",
        });
    }
    if result_fields.is_empty() {
        return Err("the pattern must contain at least one named <field> placeholder".to_string());
    }
    Ok((Extractor::Pattern(steps), result_fields))
}

fn new_regexp_extractor(s: &str) -> std::result::Result<(Extractor, Vec<String>), String> {
    let re = Regex::new(s).map_err(|err| err.to_string())?;
    let mut result_fields: Vec<String> = Vec::new();
    for name in re.capture_names().flatten() {
        if !result_fields.iter().any(|f| f == name) {
            result_fields.push(name.to_string());
        }
    }
    if result_fields.is_empty() {
        return Err("the regexp must contain at least one named group (?P<name>...)".to_string());
    }
    Ok((Extractor::Regexp(re), result_fields))
}

fn apply_pattern(steps: &[PatternStep], s: &str, matches: &mut [String]) {
    let Some(first) = steps.first() else {
        return;
    };
    let Some(n) = s.find(first.prefix.as_str()) else {
        return;
    };
    let mut tail = &s[n + first.prefix.len()..];

    for (i, step) in steps.iter().enumerate() {
        let next_prefix = steps.get(i + 1).map_or("", |next| next.prefix.as_str());
        let quoted = if step.plain { None } else { unquote_prefix(tail) };
        match quoted {
            Some((value, quoted_len)) => {
                store(matches, step.field, &value);
                match tail[quoted_len..].strip_prefix(next_prefix) {
                    Some(rest) => tail = rest,
                    None => return,
                }
            }
            None if next_prefix.is_empty() => {
                store(matches, step.field, tail);
                return;
            }
            None => {
                let Some(n) = tail.find(next_prefix) else {
                    return;
                };
                store(matches, step.field, &tail[..n]);
                tail = &tail[n + next_prefix.len()..];
            }
        }
    }
}

fn store(matches: &mut [String], field: Option<usize>, value: &str) {
    if let Some(i) = field {
        matches[i].push_str(value);
    }
}

impl fmt::Display for PipeExtract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_regexp { "extract_regexp" } else { "extract" })?;
        if let Some(iff) = &self.iff {
            write!(f, " if ({iff})")?;
        }
        write!(f, " {}", quote_token_if_needed(&self.pattern_str))?;
        if self.from_field != MSG_FIELD_NAME {
            write!(f, " from {}", quote_token_if_needed(&self.from_field))?;
        }
        if self.keep_original_fields {
            f.write_str(" keep_original_fields")?;
        }
        if self.skip_empty_results {
            f.write_str(" skip_empty_results")?;
        }
        Ok(())
    }
}

struct ExtractProcessor {
    pipe: PipeExtract,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for ExtractProcessor {
    fn write_block(&self, worker_id: usize, mut br: BlockResult) {
        if br.is_empty() {
            return;
        }
        let pe = &self.pipe;

        let mut bm = Bitmap::new_set(br.rows_len());
        if let Some(iff) = &pe.iff {
            iff.apply_to_block_result(&br, &mut bm);
            if bm.is_zero() {
                self.next.write_block(worker_id, br);
                return;
            }
        }

        let columns: Vec<Vec<String>> = {
            let src = br.column(&pe.from_field);
            let originals: Vec<_> = pe.result_fields.iter().map(|f| br.column(f)).collect();
            let mut columns = vec![Vec::with_capacity(br.rows_len()); pe.result_fields.len()];
            let mut matches = vec![String::new(); pe.result_fields.len()];
            for row in 0..br.rows_len() {
                let selected = bm.is_set(row);
                if selected {
                    pe.apply(src.value(row), &mut matches);
                }
                for ((column, orig), m) in columns.iter_mut().zip(&originals).zip(&matches) {
                    let orig = orig.value(row);
                    let keep_orig = !selected
                        || ((pe.keep_original_fields || (m.is_empty() && pe.skip_empty_results)) && !orig.is_empty());
                    column.push(if keep_orig { orig.to_string() } else { m.clone() });
                }
            }
            columns
        };
        for (name, values) in pe.result_fields.iter().zip(columns) {
            br.add_result_column(name.clone(), values);
        }
        self.next.write_block(worker_id, br);
    }

    fn flush(&self) -> Result<()> {
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

    #[test]
    fn test_parse_extract() {
        check("* | extract \"ip=<ip> \"", "* | extract \"ip=<ip> \"");
        check(
            "* | extract if (x:y) 'a=<a>,<_>,b=<plain:b>' from src skip_empty_results",
            "* | extract if (x:y) \"a=<a>,<_>,b=<plain:b>\" from src skip_empty_results",
        );
        check(
            "* | extract_regexp \"foo(?P<bar>.*)\" from _msg keep_original_fields",
            "* | extract_regexp \"foo(?P<bar>.*)\" keep_original_fields",
        );

        assert!(parse_query("* | extract").is_err());
        assert!(parse_query("* | extract from x").is_err());
        assert!(parse_query("* | extract from x \"<a>\"").is_err());
        assert!(parse_query("* | extract \"no placeholders\"").is_err());
        assert!(parse_query("* | extract \"<_> <_>\"").is_err());
        assert!(parse_query("* | extract \"<a><b>\"").is_err());
        assert!(parse_query("* | extract \"<a>\" if (x:y)").is_err());
        assert!(parse_query("* | extract_regexp \"a\"").is_err());
        assert!(parse_query("* | extract_regexp \"(foo)\"").is_err());
        assert!(parse_query("* | extract_regexp \"(?P<a>\"").is_err());
    }

    #[test]
    fn test_extract_pattern() {
        let br = block(&[(
            "_msg",
            &[
                "ip=1.2.3.4 user=\"John Doe\" status=200",
                "ip=5.6.7.8 user=bob",
                "no match here",
            ],
        )]);
        let rows = run_pipes("* | extract \"ip=<ip> user=<user> \" | fields ip, user", 1, vec![br]).unwrap();
        assert_eq!(
            rows,
            vec![
                row(&[("ip", "1.2.3.4"), ("user", "John Doe")]),
                row(&[("ip", "5.6.7.8"), ("user", "")]),
                row(&[("ip", ""), ("user", "")]),
            ]
        );
    }

    #[test]
    fn test_extract_plain_and_skipped() {
        let br = block(&[("src", &["a=\"x y\" skip=1 b=\"q\""])]);
        let rows = run_pipes("* | extract \"a=<plain:a> skip=<_> b=<b>\" from src | fields a, b", 1, vec![br]).unwrap();
        assert_eq!(rows, vec![row(&[("a", "\"x y\""), ("b", "q")])]);
    }

    #[test]
    fn test_extract_regexp() {
        let msg = "foo=bar baz=\"x y=z\" a=";
        let br = block(&[("_msg", &[msg]), ("aa", &["foobar"]), ("abc", &["ippl"])]);
        let q = "* | extract_regexp \"baz=(?P<abc>.*) a=(?P<aa>.*)\" skip_empty_results";
        let rows = run_pipes(q, 1, vec![br.clone()]).unwrap();
        assert_eq!(rows, vec![row(&[("_msg", msg), ("aa", "foobar"), ("abc", "\"x y=z\"")])]);

        let q = "* | extract_regexp \"baz=(?P<abc>.*) a=(?P<aa>.*)\"";
        let rows = run_pipes(q, 1, vec![br]).unwrap();
        assert_eq!(rows, vec![row(&[("_msg", msg), ("aa", ""), ("abc", "\"x y=z\"")])]);
    }

    #[test]
    fn test_extract_if_and_keep_original() {
        let br = block(&[("_msg", &["n=1", "n=2"]), ("level", &["error", "info"]), ("n", &["old", ""])]);
        let rows = run_pipes("* | extract if (level:error) \"n=<n>\" | fields n", 1, vec![br.clone()]).unwrap();
        assert_eq!(rows, vec![row(&[("n", "1")]), row(&[("n", "")])]);

        let rows = run_pipes("* | extract \"n=<n>\" keep_original_fields | fields n", 1, vec![br]).unwrap();
        assert_eq!(rows, vec![row(&[("n", "old")]), row(&[("n", "2")])]);
    }

    #[test]
    fn test_extract_needed_fields() {
        let q = parse_query("* | extract \"a=<a>\" from src | fields a").unwrap();
        let mut needed = FieldsSet::all();
        for p in q.pipes.iter().rev() {
            p.update_needed_fields(&mut needed);
        }
        assert_eq!(needed.to_patterns(), vec!["src".to_string()]);
    }
}
