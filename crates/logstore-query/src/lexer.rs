//! LogsQL lexer.
//!
//! The lexer yields one token at a time. A token is either a run of token
//! runes (letters, digits and `_`), a quoted string, one of the two-char
//! operators `=~`, `!~`, `!=`, or any other single char.
//!
//! ## Raw and unquoted tokens
//!
//! `token` holds the unquoted text while `raw_token` holds the text as
//! written. A quoted token never matches a keyword, so `"and"` is a phrase
//! while `and` is the boolean operator.
//!
//! ## Whitespace
//!
//! `is_skipped_space` records whether whitespace preceded the current token.
//! It tells `foo*` (a prefix filter) apart from `foo *` (two filters), and
//! decides where compound tokens such as `host-1.example.com:8080` end.
//!
//! `#` starts a comment running to the end of the line.

use crate::error::{QueryError, Result, MAX_ERROR_CONTEXT_LEN};
use crate::query::QueryOptions;
use crate::quote::{is_token_rune, is_word, unquote_char, unquote_prefix};

/// Tokens that may not start a compound token glued to a preceding word.
const DENIED_FIRST_COMPOUND_TOKENS: &[&str] = &["/", ".", "$"];

/// Punctuation allowed inside unquoted compound tokens.
const GLUE_COMPOUND_TOKENS: &[&str] = &["+", "-", "/", ":", ".", "$"];

/// Glue tokens which act as operators inside math expressions.
pub const MATH_STOP_COMPOUND_TOKENS: &[&str] = &["+", "-", "/"];

#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    /// Unparsed tail of `orig`.
    s: &'a str,
    orig: &'a str,

    pub token: String,
    pub raw_token: &'a str,
    pub prev_raw_token: &'a str,
    pub is_skipped_space: bool,

    /// Reference timestamp in nanoseconds for relative time filters such as `_time:1h`.
    pub current_timestamp: i64,

    opts_stack: Vec<QueryOptions>,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer positioned at the first token of `s`.
    pub fn new(s: &'a str, timestamp: i64) -> Self {
        let mut lex = Self {
            s,
            orig: s,
            token: String::new(),
            raw_token: "",
            prev_raw_token: "",
            is_skipped_space: false,
            current_timestamp: timestamp,
            opts_stack: Vec::new(),
        };
        lex.next_token();
        lex
    }

    pub fn backup_state(&self) -> Self {
        self.clone()
    }

    pub fn restore_state(&mut self, state: Self) {
        *self = state;
    }

    pub fn push_query_options(&mut self, opts: QueryOptions) {
        self.opts_stack.push(opts);
    }

    pub fn pop_query_options(&mut self) {
        self.opts_stack.pop();
    }

    /// Options of the innermost query being parsed.
    pub fn query_options(&self) -> Option<&QueryOptions> {
        self.opts_stack.last()
    }

    pub fn is_end(&self) -> bool {
        self.s.is_empty() && self.token.is_empty() && self.raw_token.is_empty()
    }

    pub fn is_quoted_token(&self) -> bool {
        self.token != self.raw_token
    }

    /// Returns true if the current unquoted token equals one of `keywords`, ignoring case.
    pub fn is_keyword(&self, keywords: &[&str]) -> bool {
        if self.is_quoted_token() {
            return false;
        }
        let lower = self.token.to_lowercase();
        keywords.iter().any(|kw| *kw == lower)
    }

    fn is_prev_raw_token(&self, tokens: &[&str]) -> bool {
        let lower = self.prev_raw_token.to_lowercase();
        tokens.iter().any(|t| *t == lower)
    }

    /// Fails if the current token is glued to a previous token other than `tokens`.
    pub fn check_prev_adjacent_token(&self, tokens: &[&str]) -> Result<()> {
        if self.is_skipped_space || self.prev_raw_token.is_empty() {
            return Ok(());
        }
        if !self.is_prev_raw_token(tokens) {
            return Err(self.error(format!(
                "missing whitespace or ':' between {:?} and {:?}; probably, the whole string must be put into quotes",
                self.prev_raw_token, self.token
            )));
        }
        Ok(())
    }

    /// Returns the tail of the consumed text, for error messages.
    pub fn context(&self) -> String {
        let consumed = &self.orig[..self.orig.len() - self.s.len()];
        let mut start = consumed.len().saturating_sub(MAX_ERROR_CONTEXT_LEN);
        while !consumed.is_char_boundary(start) {
            start += 1;
        }
        consumed[start..].to_string()
    }

    pub fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::parse(message, self.context())
    }

    fn next_char_token(&mut self, s: &'a str, size: usize) {
        self.raw_token = &s[..size];
        self.token = self.raw_token.to_string();
        self.s = &s[size..];
    }

    /// Advances to the next token.
    pub fn next_token(&mut self) {
        let mut s = self.s;
        self.prev_raw_token = self.raw_token;
        self.token.clear();
        self.raw_token = "";
        self.is_skipped_space = false;

        loop {
            let trimmed = s.trim_start();
            if trimmed.len() != s.len() {
                self.is_skipped_space = true;
                s = trimmed;
            }
            if !s.starts_with('#') {
                break;
            }
            s = match s.find('\n') {
                Some(n) => &s[n + 1..],
                None => "",
            };
        }
        self.s = s;

        let Some(c) = s.chars().next() else {
            return;
        };

        let token_len: usize = s
            .chars()
            .take_while(|c| is_token_rune(*c))
            .map(char::len_utf8)
            .sum();
        if token_len > 0 {
            self.next_char_token(s, token_len);
            return;
        }

        match c {
            '"' | '`' => match unquote_prefix(s) {
                Some((token, n)) => {
                    self.token = token;
                    self.raw_token = &s[..n];
                    self.s = &s[n..];
                }
                None => self.next_char_token(s, 1),
            },
            '\'' => {
                let mut tail = &s[1..];
                let mut value = String::new();
                loop {
                    if let Some(rest) = tail.strip_prefix('\'') {
                        let n = s.len() - rest.len();
                        self.token = value;
                        self.raw_token = &s[..n];
                        self.s = rest;
                        return;
                    }
                    match unquote_char(tail, '\'') {
                        Some((c, rest)) => {
                            value.push(c);
                            tail = rest;
                        }
                        None => {
                            self.next_char_token(s, 1);
                            return;
                        }
                    }
                }
            }
            '=' if s[1..].starts_with('~') => self.next_char_token(s, 2),
            '!' if s[1..].starts_with('~') || s[1..].starts_with('=') => self.next_char_token(s, 2),
            c => self.next_char_token(s, c.len_utf8()),
        }
    }

    /// Reads a token made of adjacent words and glue chars, such as `foo-bar.baz:123`.
    pub fn next_compound_token(&mut self) -> Result<String> {
        self.next_compound_token_ext(&[])
    }

    /// Like [`Lexer::next_compound_token`], but stops at math operators.
    pub fn next_compound_math_token(&mut self) -> Result<String> {
        self.next_compound_token_ext(MATH_STOP_COMPOUND_TOKENS)
    }

    pub fn next_compound_token_ext(&mut self, stop_tokens: &[&str]) -> Result<String> {
        if self.is_quoted_token() {
            let s = std::mem::take(&mut self.token);
            self.next_token();
            return Ok(s);
        }

        if !self.is_skipped_space && self.is_keyword(DENIED_FIRST_COMPOUND_TOKENS) && is_word(self.prev_raw_token) {
            return Err(self.error(format!(
                "missing whitespace between {:?} and {:?}",
                self.prev_raw_token, self.token
            )));
        }

        if !self.is_allowed_compound_token(stop_tokens) {
            return Err(self.error(format!(
                "compound token cannot start with {:?}; put it into quotes if needed",
                self.token
            )));
        }

        let mut s = self.token.clone();
        self.next_token();
        while !self.is_skipped_space && self.is_allowed_compound_token(stop_tokens) {
            s.push_str(self.raw_token);
            self.next_token();
        }

        if GLUE_COMPOUND_TOKENS.contains(&s.as_str()) {
            return Err(self.error(format!(
                "compound token cannot be equal to {s:?}; put it into quotes if needed"
            )));
        }
        Ok(s)
    }

    fn is_allowed_compound_token(&self, stop_tokens: &[&str]) -> bool {
        if self.is_quoted_token() || self.token.is_empty() {
            return false;
        }
        if self.is_keyword(stop_tokens) {
            return false;
        }
        if self.is_keyword(GLUE_COMPOUND_TOKENS) {
            return true;
        }
        is_word(&self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<String> {
        let mut lex = Lexer::new(s, 0);
        let mut out = Vec::new();
        while !lex.is_end() {
            out.push(lex.token.clone());
            lex.next_token();
        }
        out
    }

    #[test]
    fn test_tokens() {
        assert_eq!(tokens("foo bar"), vec!["foo", "bar"]);
        assert_eq!(tokens("a:=b"), vec!["a", ":", "=", "b"]);
        assert_eq!(tokens("x=~\"y\" z!~w q!=1"), vec!["x", "=~", "y", "z", "!~", "w", "q", "!=", "1"]);
        assert_eq!(tokens("'single' `raw\\n`"), vec!["single", "raw\\n"]);
        assert_eq!(tokens("foo # comment\nbar"), vec!["foo", "bar"]);
        assert_eq!(tokens("привет,мир"), vec!["привет", ",", "мир"]);
        assert_eq!(tokens("\"unterminated"), vec!["\"", "unterminated"]);
    }

    #[test]
    fn test_quoted_keyword() {
        let mut lex = Lexer::new("\"and\" and", 0);
        assert!(lex.is_quoted_token());
        assert!(!lex.is_keyword(&["and"]));
        lex.next_token();
        assert!(lex.is_keyword(&["AND", "and"]));
        assert!(lex.is_skipped_space);
    }

    #[test]
    fn test_compound_token() {
        let mut lex = Lexer::new("host-1.example.com:8080 next", 0);
        assert_eq!(lex.next_compound_token().unwrap(), "host-1.example.com:8080");
        assert_eq!(lex.token, "next");

        let mut lex = Lexer::new("a+b", 0);
        assert_eq!(lex.next_compound_math_token().unwrap(), "a");
        assert_eq!(lex.token, "+");

        let mut lex = Lexer::new("- x", 0);
        assert!(lex.next_compound_token().is_err());
    }

    #[test]
    fn test_context() {
        let long = "x".repeat(80);
        let mut lex = Lexer::new(&long, 0);
        lex.next_token();
        assert_eq!(lex.context().len(), MAX_ERROR_CONTEXT_LEN);
        assert!(lex.is_end());
    }
}
