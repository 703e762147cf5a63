//! Value predicates shared by the filters.
//!
//! Phrase and prefix matching respect token boundaries: `error` matches
//! `an error occurred` but not `errors`, while the prefix `err` matches both.
//! A boundary is only required at a phrase edge that is itself a token rune,
//! so `:8080` matches inside `host:8080`.

use crate::quote::is_token_rune;
use logstore_core::values::{try_parse_float64, try_parse_ipv4};

fn prev_char(s: &str, pos: usize) -> Option<char> {
    s[..pos].chars().next_back()
}

fn next_char(s: &str, pos: usize) -> Option<char> {
    s[pos..].chars().next()
}

/// Returns the byte position of the first occurrence of `phrase` in `s` at token boundaries.
pub fn phrase_pos(s: &str, phrase: &str) -> Option<usize> {
    let first = phrase.chars().next()?;
    let last = phrase.chars().next_back()?;
    let starts_with_token = is_token_rune(first);
    let ends_with_token = is_token_rune(last);

    let mut pos = 0;
    while pos <= s.len() {
        let n = s[pos..].find(phrase)?;
        pos += n;
        if starts_with_token && prev_char(s, pos).is_some_and(is_token_rune) {
            pos += next_char(s, pos).map_or(1, char::len_utf8);
            continue;
        }
        let end = pos + phrase.len();
        if ends_with_token && next_char(s, end).is_some_and(is_token_rune) {
            pos += next_char(s, pos).map_or(1, char::len_utf8);
            continue;
        }
        return Some(pos);
    }
    None
}

/// Matches a whole-token phrase. The empty phrase matches only the empty string.
pub fn match_phrase(s: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return s.is_empty();
    }
    phrase_pos(s, phrase).is_some()
}

/// Matches a phrase whose last token may be incomplete. The empty prefix matches any non-empty string.
pub fn match_prefix(s: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return !s.is_empty();
    }
    let Some(first) = prefix.chars().next() else {
        return false;
    };
    let starts_with_token = is_token_rune(first);
    let mut pos = 0;
    while pos <= s.len() {
        let Some(n) = s[pos..].find(prefix) else {
            return false;
        };
        pos += n;
        if starts_with_token && prev_char(s, pos).is_some_and(is_token_rune) {
            pos += next_char(s, pos).map_or(1, char::len_utf8);
            continue;
        }
        return true;
    }
    false
}

pub fn match_substring(s: &str, substring: &str) -> bool {
    s.contains(substring)
}

pub fn match_exact_prefix(s: &str, prefix: &str) -> bool {
    s.starts_with(prefix)
}

/// Matches phrases appearing in the given order. Empty phrases are ignored.
pub fn match_sequence(s: &str, phrases: &[String]) -> bool {
    let mut tail = s;
    for phrase in phrases {
        if phrase.is_empty() {
            continue;
        }
        match phrase_pos(tail, phrase) {
            Some(n) => tail = &tail[n + phrase.len()..],
            None => return false,
        }
    }
    true
}

pub fn match_any_case_phrase(s: &str, phrase_lowercase: &str) -> bool {
    if phrase_lowercase.is_empty() {
        return s.is_empty();
    }
    match_phrase(&s.to_lowercase(), phrase_lowercase)
}

pub fn match_any_case_prefix(s: &str, prefix_lowercase: &str) -> bool {
    if prefix_lowercase.is_empty() {
        return !s.is_empty();
    }
    match_prefix(&s.to_lowercase(), prefix_lowercase)
}

/// Matches numbers in the closed range `[min, max]`.
pub fn match_range(s: &str, min: f64, max: f64) -> bool {
    try_parse_float64(s).is_some_and(|f| f >= min && f <= max)
}

/// Matches strings in the half-open range `[min, max)`.
pub fn match_string_range(s: &str, min: &str, max: &str) -> bool {
    s >= min && s < max
}

/// Matches strings whose length in chars is in `[min, max]`.
pub fn match_len_range(s: &str, min: u64, max: u64) -> bool {
    let n = s.chars().count() as u64;
    n >= min && n <= max
}

pub fn match_ipv4_range(s: &str, min: u32, max: u32) -> bool {
    try_parse_ipv4(s).is_some_and(|ip| ip >= min && ip <= max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_phrase() {
        assert!(match_phrase("an error occurred", "error"));
        assert!(!match_phrase("errors", "error"));
        assert!(!match_phrase("an_error", "error"));
        assert!(match_phrase("error: disk", "error:"));
        assert!(match_phrase("host:8080", ":8080"));
        assert!(match_phrase("errors, error", "error"));
        assert!(match_phrase("", ""));
        assert!(!match_phrase("x", ""));
        assert!(match_phrase("привет мир", "мир"));
        assert!(!match_phrase("примир", "мир"));
    }

    #[test]
    fn test_match_prefix() {
        assert!(match_prefix("errors", "err"));
        assert!(!match_prefix("xerr", "err"));
        assert!(match_prefix("xerr err", "err"));
        assert!(match_prefix("x", ""));
        assert!(!match_prefix("", ""));
        assert!(!match_prefix("ab", "abc"));
    }

    #[test]
    fn test_match_sequence() {
        let phrases = vec!["foo".to_string(), "bar".to_string()];
        assert!(match_sequence("foo x bar", &phrases));
        assert!(!match_sequence("bar x foo", &phrases));
        assert!(match_sequence("anything", &[String::new()]));
    }

    #[test]
    fn test_match_ranges() {
        assert!(match_range("1.5", 1.0, 2.0));
        assert!(!match_range("abc", f64::NEG_INFINITY, f64::INFINITY));
        assert!(match_string_range("b", "a", "c"));
        assert!(!match_string_range("c", "a", "c"));
        assert!(match_len_range("ёж", 2, 2));
        assert!(match_ipv4_range("10.0.0.5", 0x0a000000, 0x0a0000ff));
        assert!(!match_ipv4_range("10.0.1.5", 0x0a000000, 0x0a0000ff));
        assert!(match_any_case_phrase("An ERROR", "error"));
        assert!(match_any_case_prefix("ERRORS", "err"));
    }
}
