//! `format` pipe.
//!
//! ```text
//! format [if (filter)] "pattern" [as result] [keep_original_fields|skip_empty_results]
//! ```
//!
//! The pattern is literal text with `<field>` placeholders. A placeholder may
//! carry an option which transforms the field value, as in `<uc:level>`:
//!
//! | option             | result                                              |
//! |--------------------|-----------------------------------------------------|
//! | `q`                | JSON-quoted value                                   |
//! | `lc`, `uc`         | lowercase / uppercase value                         |
//! | `hexencode`        | uppercase hex of the value bytes                    |
//! | `hexdecode`        | decoded hex, or the value as is if it isn't hex     |
//! | `duration`         | nanoseconds formatted as a duration such as `1h5m`  |
//! | `duration_seconds` | a duration such as `1m30s` as fractional seconds    |
//! | `ipv4`             | a 32-bit integer formatted as `a.b.c.d`             |
//! | `time`             | a unix timestamp formatted as RFC3339               |
//!
//! Values which cannot be transformed are written unchanged. The result goes
//! to `_msg` unless `as` names another field.

use super::PipeProcessor;
use crate::bitmap::Bitmap;
use crate::block_result::{BlockResult, BlockResultColumn};
use crate::error::Result;
use crate::fields_set::{is_wildcard_pattern, FieldsSet};
use crate::filter::time::parse_unix_timestamp;
use crate::filter::Filter;
use crate::lexer::Lexer;
use crate::parser::{parse_field_name, parse_if_filter};
use crate::quote::quote_token_if_needed;
use logstore_core::values::{
    duration_string, float64_string, ipv4_string, timestamp_rfc3339nano_string, try_parse_duration,
    try_parse_int64, try_parse_uint64, NSECS_PER_SECOND,
};
use logstore_core::{get_canonical_column_name, MSG_FIELD_NAME};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

const FIELD_OPTIONS: &[&str] = &[
    "q",
    "lc",
    "uc",
    "hexencode",
    "hexdecode",
    "duration",
    "duration_seconds",
    "ipv4",
    "time",
];

/// Literal text followed by an optional field placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatStep {
    pub prefix: String,
    /// Empty for the trailing literal text.
    pub field: String,
    pub opt: String,
}

/// Splits `s` into steps, one per `<field>` placeholder plus the trailing text.
pub fn parse_format_steps(s: &str) -> std::result::Result<Vec<FormatStep>, String> {
    parse_pattern_steps(s, FIELD_OPTIONS)
}

/// Like [`parse_format_steps`], accepting the placeholder options in `options`.
pub(crate) fn parse_pattern_steps(s: &str, options: &[&str]) -> std::result::Result<Vec<FormatStep>, String> {
    let mut steps = Vec::new();
    let mut prefix = String::new();
    let mut tail = s;
    while let Some(n) = tail.find('<') {
        prefix.push_str(&tail[..n]);
        let rest = &tail[n + 1..];
        let Some(end) = rest.find('>') else {
            prefix.push('<');
            tail = rest;
            continue;
        };
        let inner = &rest[..end];
        if inner.is_empty() || inner.contains('<') {
            prefix.push('<');
            tail = rest;
            continue;
        }
        let (opt, field) = match inner.split_once(':') {
            Some((opt, field)) if options.contains(&opt) => (opt, field),
            _ => ("", inner),
        };
        if field.is_empty() {
            return Err(format!("missing field name in <{inner}>"));
        }
        if is_wildcard_pattern(field) {
            return Err(format!("wildcard field <{inner}> cannot be used"));
        }
        steps.push(FormatStep {
            prefix: std::mem::take(&mut prefix),
            field: get_canonical_column_name(field).to_string(),
            opt: opt.to_string(),
        });
        tail = &rest[end + 1..];
    }
    prefix.push_str(tail);
    if !prefix.is_empty() {
        steps.push(FormatStep {
            prefix,
            field: String::new(),
            opt: String::new(),
        });
    }
    Ok(steps)
}

#[derive(Debug, Clone)]
pub struct PipeFormat {
    pub format_str: String,
    pub steps: Vec<FormatStep>,
    pub result_field: String,
    pub keep_original_fields: bool,
    pub skip_empty_results: bool,
    pub iff: Option<Arc<Filter>>,
}

impl PipeFormat {
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        lex.next_token();

        let iff = if lex.is_keyword(&["if"]) {
            Some(parse_if_filter(lex)?)
        } else {
            None
        };

        if lex.is_keyword(&["|", ")", ""]) {
            return Err(lex.error("missing pattern after 'format'"));
        }
        let format_str = lex.next_compound_token()?;
        let steps =
            parse_format_steps(&format_str).map_err(|err| lex.error(format!("cannot parse pattern {format_str:?}: {err}")))?;

        let result_field = if lex.is_keyword(&["as"]) {
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
            format_str,
            steps,
            result_field,
            keep_original_fields,
            skip_empty_results,
            iff,
        })
    }

    pub(crate) fn update_needed_fields(&self, needed: &mut FieldsSet) {
        if !needed.contains(&self.result_field) {
            return;
        }
        if !self.keep_original_fields && !self.skip_empty_results && self.iff.is_none() {
            needed.remove(&self.result_field);
        }
        if let Some(iff) = &self.iff {
            iff.update_needed_fields(needed);
        }
        for step in &self.steps {
            if !step.field.is_empty() {
                needed.add(&step.field);
            }
        }
    }

    pub(crate) fn new_processor(&self, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        Arc::new(FormatProcessor {
            pipe: self.clone(),
            next,
        })
    }

    fn format_row(&self, columns: &[Cow<'_, BlockResultColumn>], row: usize) -> String {
        let mut b = String::new();
        for (step, column) in self.steps.iter().zip(columns) {
            b.push_str(&step.prefix);
            if step.field.is_empty() {
                continue;
            }
            append_field_value(&mut b, &step.opt, column.value(row));
        }
        b
    }
}

impl fmt::Display for PipeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("format")?;
        if let Some(iff) = &self.iff {
            write!(f, " if ({iff})")?;
        }
        write!(f, " {}", quote_token_if_needed(&self.format_str))?;
        if self.result_field != MSG_FIELD_NAME {
            write!(f, " as {}", quote_token_if_needed(&self.result_field))?;
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

fn append_field_value(dst: &mut String, opt: &str, v: &str) {
    match opt {
        "q" => dst.push_str(&serde_json::Value::String(v.to_string()).to_string()),
        "lc" => dst.extend(v.chars().flat_map(char::to_lowercase)),
        "uc" => dst.extend(v.chars().flat_map(char::to_uppercase)),
        "hexencode" => {
            for b in v.bytes() {
                dst.push_str(&format!("{b:02X}"));
            }
        }
        "hexdecode" => match hex_decode(v) {
            Some(bytes) => dst.push_str(&String::from_utf8_lossy(&bytes)),
            None => dst.push_str(v),
        },
        "duration" => match try_parse_int64(v) {
            Some(nsecs) => dst.push_str(&duration_string(nsecs)),
            None => dst.push_str(v),
        },
        "duration_seconds" => match try_parse_duration(v) {
            Some(nsecs) => dst.push_str(&float64_string(nsecs as f64 / NSECS_PER_SECOND as f64)),
            None => dst.push_str(v),
        },
        "ipv4" => match try_parse_uint64(v).and_then(|n| u32::try_from(n).ok()) {
            Some(ip) => dst.push_str(&ipv4_string(ip)),
            None => dst.push_str(v),
        },
        "time" => match parse_unix_timestamp(v) {
            Some(nsecs) => dst.push_str(&timestamp_rfc3339nano_string(nsecs)),
            None => dst.push_str(v),
        },
        _ => dst.push_str(v),
    }
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|h| u8::from_str_radix(h, 16).ok()))
        .collect()
}

struct FormatProcessor {
    pipe: PipeFormat,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for FormatProcessor {
    fn write_block(&self, worker_id: usize, mut br: BlockResult) {
        if br.is_empty() {
            return;
        }
        let pf = &self.pipe;

        let mut bm = Bitmap::new_set(br.rows_len());
        if let Some(iff) = &pf.iff {
            iff.apply_to_block_result(&br, &mut bm);
            if bm.is_zero() {
                self.next.write_block(worker_id, br);
                return;
            }
        }

        let values: Vec<String> = {
            let columns: Vec<_> = pf.steps.iter().map(|step| br.column(&step.field)).collect();
            let orig = br.column(&pf.result_field);
            (0..br.rows_len())
                .map(|row| {
                    let orig_value = orig.value(row);
                    if !bm.is_set(row) {
                        return orig_value.to_string();
                    }
                    let v = pf.format_row(&columns, row);
                    if (pf.keep_original_fields || (v.is_empty() && pf.skip_empty_results)) && !orig_value.is_empty() {
                        return orig_value.to_string();
                    }
                    v
                })
                .collect()
        };
        br.add_result_column(pf.result_field.clone(), values);
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

    #[test]
    fn test_parse_format_steps() {
        let steps = parse_format_steps("a=<a>, <uc:b>!").unwrap();
        assert_eq!(
            steps,
            vec![
                FormatStep {
                    prefix: "a=".to_string(),
                    field: "a".to_string(),
                    opt: String::new(),
                },
                FormatStep {
                    prefix: ", ".to_string(),
                    field: "b".to_string(),
                    opt: "uc".to_string(),
                },
                FormatStep {
                    prefix: "!".to_string(),
                    field: String::new(),
                    opt: String::new(),
                },
            ]
        );
        assert_eq!(parse_format_steps("x < y").unwrap().len(), 1);
        assert_eq!(parse_format_steps("<foo:bar>").unwrap()[0].field, "foo:bar");
        assert!(parse_format_steps("<a*>").is_err());
        assert!(parse_format_steps("<q:>").is_err());
    }

    #[test]
    fn test_parse_format() {
        let check = |s: &str, want: &str| {
            assert_eq!(parse_query(s).unwrap().to_string(), want);
            assert_eq!(parse_query(want).unwrap().to_string(), want);
        };
        check("* | format \"<a>\"", "* | format \"<a>\"");
        check("* | format if (x:y) '<a>-<b>' as c skip_empty_results", "* | format if (x:y) \"<a>-<b>\" as c skip_empty_results");
        check("* | format \"<q:a>\" as _msg keep_original_fields", "* | format \"<q:a>\" keep_original_fields");
        assert!(parse_query("* | format").is_err());
    }

    #[test]
    fn test_format_options() {
        let br = block(&[
            ("a", &["Foo \"x\""]),
            ("d", &["3600000000000"]),
            ("ip", &["3232235777"]),
            ("h", &["4142"]),
        ]);
        let q = "* | format \"<q:a>|<lc:a>|<duration:d>|<ipv4:ip>|<hexdecode:h>|<hexencode:h>\" as r | fields r";
        let rows = run_pipes(q, 1, vec![br]).unwrap();
        assert_eq!(
            rows,
            vec![row(&[("r", "\"Foo \\\"x\\\"\"|foo \"x\"|1h|192.168.1.1|AB|34313432")])]
        );
    }

    #[test]
    fn test_format_if_and_keep_original() {
        let br = block(&[("a", &["1", "2", "3"]), ("r", &["old", "", "old"])]);
        let rows = run_pipes("* | format if (a:<3) \"n=<a>\" as r | fields r", 1, vec![br.clone()]).unwrap();
        assert_eq!(rows, vec![row(&[("r", "n=1")]), row(&[("r", "n=2")]), row(&[("r", "old")])]);

        let rows = run_pipes("* | format \"n=<a>\" as r keep_original_fields | fields r", 1, vec![br.clone()]).unwrap();
        assert_eq!(rows, vec![row(&[("r", "old")]), row(&[("r", "n=2")]), row(&[("r", "old")])]);

        let br = block(&[("a", &["", "x"]), ("r", &["old", "old"])]);
        let rows = run_pipes("* | format \"<a>\" as r skip_empty_results | fields r", 1, vec![br]).unwrap();
        assert_eq!(rows, vec![row(&[("r", "old")]), row(&[("r", "x")])]);
    }
}
