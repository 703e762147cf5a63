//! `{...}` stream selectors.
//!
//! A stream filter is an OR of AND groups of tag matchers:
//!
//! ```text
//! {app="nginx", env!="dev" or app=~"api-.*"}
//! ```
//!
//! Regexp matchers are anchored at both ends. A tag missing from the stream
//! matches as the empty string.

use crate::lexer::Lexer;
use crate::quote::{quote, quote_token_if_needed};
use logstore_core::StreamTags;
use regex::Regex;
use std::fmt;

#[derive(Debug, Clone)]
pub enum TagOp {
    /// `name="value"`
    Eq,
    /// `name!="value"`
    Ne,
    /// `name=~"regexp"`
    Re(Regex),
    /// `name!~"regexp"`
    NotRe(Regex),
}

#[derive(Debug, Clone)]
pub struct TagFilter {
    pub name: String,
    pub value: String,
    pub op: TagOp,
}

impl TagFilter {
    /// Creates a matcher for one of the `=`, `!=`, `=~`, `!~` operators.
    pub fn new(name: &str, op: &str, value: &str) -> Result<Self, String> {
        let op = match op {
            "=" => TagOp::Eq,
            "!=" => TagOp::Ne,
            "=~" | "!~" => {
                let re = Regex::new(&format!("^(?:{value})$"))
                    .map_err(|err| format!("invalid regexp {value:?} for stream filter: {err}"))?;
                if op == "=~" {
                    TagOp::Re(re)
                } else {
                    TagOp::NotRe(re)
                }
            }
            _ => {
                return Err(format!(
                    "unsupported operation {op:?} in _stream filter for {name:?} field; supported operations: =, !=, =~, !~"
                ))
            }
        };
        Ok(Self {
            name: name.to_string(),
            value: value.to_string(),
            op,
        })
    }

    pub fn op_str(&self) -> &'static str {
        match self.op {
            TagOp::Eq => "=",
            TagOp::Ne => "!=",
            TagOp::Re(_) => "=~",
            TagOp::NotRe(_) => "!~",
        }
    }

    pub fn matches(&self, tags: &StreamTags) -> bool {
        let v = tags.get(&self.name).unwrap_or("");
        match &self.op {
            TagOp::Eq => v == self.value,
            TagOp::Ne => v != self.value,
            TagOp::Re(re) => re.is_match(v),
            TagOp::NotRe(re) => !re.is_match(v),
        }
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            quote_token_if_needed(&self.name),
            self.op_str(),
            quote(&self.value)
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamFilter {
    pub or_filters: Vec<Vec<TagFilter>>,
}

impl StreamFilter {
    /// Returns true if the filter is `{}`, which matches every stream.
    pub fn is_empty(&self) -> bool {
        self.or_filters.is_empty() || self.or_filters.iter().any(|and| and.is_empty())
    }

    pub fn matches(&self, tags: &StreamTags) -> bool {
        if self.or_filters.is_empty() {
            return true;
        }
        self.or_filters.iter().any(|and| and.iter().all(|tf| tf.matches(tags)))
    }
}

impl fmt::Display for StreamFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, and) in self.or_filters.iter().enumerate() {
            if i > 0 {
                f.write_str(" or ")?;
            }
            for (j, tf) in and.iter().enumerate() {
                if j > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{tf}")?;
            }
        }
        f.write_str("}")
    }
}

/// Parses the `{name="value",...}` text form of stream tags, as found in the `_stream` field.
pub fn parse_stream_tags(s: &str) -> Option<StreamTags> {
    let mut lex = Lexer::new(s, 0);
    if !lex.is_keyword(&["{"]) {
        return None;
    }
    lex.next_token();
    let mut tags = StreamTags::new();
    while !lex.is_keyword(&["}"]) {
        let name = lex.token.clone();
        lex.next_token();
        if !lex.is_keyword(&["="]) {
            return None;
        }
        lex.next_token();
        tags.add(name, lex.token.clone());
        lex.next_token();
        if lex.is_keyword(&[","]) {
            lex.next_token();
        } else if !lex.is_keyword(&["}"]) {
            return None;
        }
    }
    lex.next_token();
    lex.is_end().then_some(tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> StreamTags {
        let mut st = StreamTags::new();
        st.add("app", "nginx");
        st.add("env", "prod");
        st
    }

    #[test]
    fn test_stream_filter_matches() {
        let sf = StreamFilter {
            or_filters: vec![
                vec![
                    TagFilter::new("app", "=", "api").unwrap(),
                    TagFilter::new("env", "=", "prod").unwrap(),
                ],
                vec![TagFilter::new("app", "=~", "ngi.*").unwrap()],
            ],
        };
        assert!(sf.matches(&tags()));
        assert_eq!(sf.to_string(), r#"{app="api",env="prod" or app=~"ngi.*"}"#);

        let anchored = TagFilter::new("app", "=~", "ngi").unwrap();
        assert!(!anchored.matches(&tags()));

        let missing = TagFilter::new("host", "!=", "").unwrap();
        assert!(!missing.matches(&tags()));
        assert!(TagFilter::new("host", "=", "").unwrap().matches(&tags()));

        assert!(TagFilter::new("a", "~", "b").is_err());
        assert_eq!(parse_stream_tags(&tags().to_string()), Some(tags()));
        assert_eq!(parse_stream_tags("{}"), Some(StreamTags::new()));
        assert_eq!(parse_stream_tags("{a=}"), None);
        assert!(TagFilter::new("a", "=~", "(").is_err());
    }
}
