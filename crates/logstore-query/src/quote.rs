//! Quoting of LogsQL tokens.
//!
//! The text form of every filter and pipe must parse back into the same
//! query, so tokens that the lexer would split, or that it would read as a
//! keyword, are written in double quotes. Escapes follow the usual
//! backslash conventions (`\n`, `\t`, `\"`, `\xNN`, `\u{...}` as `\uNNNN`).

use logstore_storage::bloom::is_token_char;

/// Keywords with a special meaning in the filter grammar.
const RESERVED_KEYWORDS: &[&str] = &[
    "",
    "and",
    "or",
    "not",
    "!",
    "(",
    ")",
    "{",
    "}",
    "=",
    "!=",
    "=~",
    "!~",
    ",",
    "|",
    ":",
    "*",
    "[",
    "]",
    "now",
    "offset",
    "-",
    "contains_all",
    "contains_any",
    "eq_field",
    "exact",
    "i",
    "in",
    "ipv4_range",
    "le_field",
    "len_range",
    "lt_field",
    "range",
    "re",
    "seq",
    "string_range",
    "value_type",
    "options",
    "if",
    "by",
    "as",
];

/// Names and aliases of the supported pipes.
pub const PIPE_NAMES: &[&str] = &[
    "copy", "cp", "delete", "del", "rm", "drop", "eval", "extract", "extract_regexp", "fields", "keep", "filter", "where", "format", "head",
    "len", "limit", "math", "mv", "offset", "order", "rename", "skip", "sort", "stats", "top", "uniq",
];

/// Names of the supported stats functions.
pub const STATS_FUNC_NAMES: &[&str] = &[
    "avg",
    "count",
    "count_empty",
    "count_uniq",
    "max",
    "median",
    "min",
    "quantile",
    "sum",
    "uniq_values",
    "values",
];

pub fn is_pipe_name(s: &str) -> bool {
    PIPE_NAMES.contains(&s)
}

pub fn is_stats_func_name(s: &str) -> bool {
    STATS_FUNC_NAMES.contains(&s)
}

pub fn is_token_rune(c: char) -> bool {
    is_token_char(c)
}

/// Returns true if `s` is a non-empty run of token runes.
pub fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_token_rune)
}

pub fn need_quote_token(s: &str) -> bool {
    let lower = s.to_lowercase();
    if RESERVED_KEYWORDS.contains(&lower.as_str()) {
        return true;
    }
    if is_pipe_name(&lower) || is_stats_func_name(&lower) {
        return true;
    }
    s.chars().any(|c| !is_token_rune(c) && c != '.')
}

/// Like [`need_quote_token`], additionally quoting values which the parser would read as numbers.
pub fn need_quote_string_token(s: &str) -> bool {
    is_number_prefix(s) || need_quote_token(s)
}

pub(crate) fn is_number_prefix(s: &str) -> bool {
    let mut s = s;
    if s.is_empty() {
        return false;
    }
    if let Some(tail) = s.strip_prefix(['-', '+']) {
        if tail.is_empty() {
            return false;
        }
        s = tail;
    }
    if s.len() >= 3 && s.eq_ignore_ascii_case("inf") {
        return true;
    }
    if let Some(tail) = s.strip_prefix('.') {
        if tail.is_empty() {
            return false;
        }
        s = tail;
    }
    s.as_bytes()[0].is_ascii_digit()
}

pub fn quote_token_if_needed(s: &str) -> String {
    if need_quote_token(s) {
        quote(s)
    } else {
        s.to_string()
    }
}

pub fn quote_string_token_if_needed(s: &str) -> String {
    if need_quote_string_token(s) {
        quote(s)
    } else {
        s.to_string()
    }
}

/// Quotes a field name or a `prefix*` field pattern.
pub fn quote_field_pattern_if_needed(s: &str) -> String {
    let Some(prefix) = s.strip_suffix('*') else {
        return quote_token_if_needed(s);
    };
    if prefix.is_empty() || !need_quote_token(prefix) {
        return s.to_string();
    }
    quote(s)
}

/// Returns the `field:` prefix for a filter, which is empty for `_msg`.
pub fn quote_field_name_if_needed(field: &str) -> String {
    if field.is_empty() || field == logstore_core::MSG_FIELD_NAME {
        return String::new();
    }
    format!("{}:", quote_token_if_needed(field))
}

/// Wraps `s` in double quotes, escaping it.
pub fn quote(s: &str) -> String {
    let mut dst = String::with_capacity(s.len() + 2);
    dst.push('"');
    for c in s.chars() {
        match c {
            '"' => dst.push_str("\\\""),
            '\\' => dst.push_str("\\\\"),
            '\n' => dst.push_str("\\n"),
            '\r' => dst.push_str("\\r"),
            '\t' => dst.push_str("\\t"),
            '\x07' => dst.push_str("\\a"),
            '\x08' => dst.push_str("\\b"),
            '\x0c' => dst.push_str("\\f"),
            '\x0b' => dst.push_str("\\v"),
            c if (c as u32) < 0x20 || c == '\x7f' => {
                dst.push_str(&format!("\\x{:02x}", c as u32));
            }
            c if c.is_control() => {
                if (c as u32) < 0x10000 {
                    dst.push_str(&format!("\\u{:04x}", c as u32));
                } else {
                    dst.push_str(&format!("\\U{:08x}", c as u32));
                }
            }
            c => dst.push(c),
        }
    }
    dst.push('"');
    dst
}

/// Decodes a single, possibly escaped, char at the start of `s`.
///
/// Returns the char and the rest of `s`. An unescaped `quote` char is an error.
pub fn unquote_char(s: &str, quote: char) -> Option<(char, &str)> {
    let mut chars = s.chars();
    let c = chars.next()?;
    if c == quote && (quote == '\'' || quote == '"') {
        return None;
    }
    if c != '\\' {
        return Some((c, chars.as_str()));
    }
    let esc = chars.next()?;
    let tail = chars.as_str();
    let simple = match esc {
        'a' => Some('\x07'),
        'b' => Some('\x08'),
        'f' => Some('\x0c'),
        'n' => Some('\n'),
        'r' => Some('\r'),
        't' => Some('\t'),
        'v' => Some('\x0b'),
        '\\' => Some('\\'),
        '\'' | '"' => {
            if esc != quote {
                return None;
            }
            Some(esc)
        }
        _ => None,
    };
    if let Some(c) = simple {
        return Some((c, tail));
    }
    let hex_len = match esc {
        'x' => 2,
        'u' => 4,
        'U' => 8,
        '0'..='7' => {
            let digits = s.get(1..4)?;
            let n = u32::from_str_radix(digits, 8).ok()?;
            if n > 255 {
                return None;
            }
            return Some((char::from_u32(n)?, &s[4..]));
        }
        _ => return None,
    };
    let digits = tail.get(..hex_len)?;
    let n = u32::from_str_radix(digits, 16).ok()?;
    if esc == 'x' && n > 0x7f {
        // Non-ascii bytes cannot be represented in a utf-8 string.
        return None;
    }
    Some((char::from_u32(n)?, &tail[hex_len..]))
}

/// Reads a quoted string (`"..."` or `` `...` ``) at the start of `s`.
///
/// Returns the unquoted value and the length of the quoted prefix.
pub fn unquote_prefix(s: &str) -> Option<(String, usize)> {
    let mut chars = s.chars();
    let quote = chars.next()?;
    match quote {
        '`' => {
            let end = s[1..].find('`')?;
            let value = &s[1..1 + end];
            Some((value.replace('\r', ""), end + 2))
        }
        '"' | '\'' => {
            let mut tail = &s[1..];
            let mut value = String::new();
            loop {
                if let Some(rest) = tail.strip_prefix(quote) {
                    return Some((value, s.len() - rest.len()));
                }
                if tail.starts_with('\n') {
                    return None;
                }
                let (c, rest) = unquote_char(tail, quote)?;
                value.push(c);
                tail = rest;
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_need_quote_token() {
        assert!(need_quote_token(""));
        assert!(need_quote_token("AND"));
        assert!(need_quote_token("stats"));
        assert!(need_quote_token("count"));
        assert!(need_quote_token("foo bar"));
        assert!(need_quote_token("a:b"));
        assert!(!need_quote_token("foo.bar"));
        assert!(!need_quote_token("foo_123"));
        assert!(!need_quote_token("123"));

        assert!(need_quote_string_token("123"));
        assert!(need_quote_string_token("-1.5"));
        assert!(need_quote_string_token("inf"));
        assert!(need_quote_string_token(".5"));
        assert!(!need_quote_string_token("abc"));
    }

    #[test]
    fn test_quote_field_pattern() {
        assert_eq!(quote_field_pattern_if_needed("foo*"), "foo*");
        assert_eq!(quote_field_pattern_if_needed("*"), "*");
        assert_eq!(quote_field_pattern_if_needed("a b*"), "\"a b*\"");
        assert_eq!(quote_field_pattern_if_needed("a-b"), "\"a-b\"");
        assert_eq!(quote_field_name_if_needed("_msg"), "");
        assert_eq!(quote_field_name_if_needed("host"), "host:");
        assert_eq!(quote_field_name_if_needed("in"), "\"in\":");
    }

    #[test]
    fn test_quote_unquote() {
        for s in ["", "foo", "a\"b", "tab\there", "new\nline", "back\\slash", "юникод", "\x01"] {
            let q = quote(s);
            let (v, n) = unquote_prefix(&q).unwrap();
            assert_eq!(v, s);
            assert_eq!(n, q.len());
        }
        assert_eq!(unquote_prefix("`a\\nb` tail"), Some(("a\\nb".to_string(), 6)));
        assert_eq!(unquote_prefix("'it\\'s' x"), Some(("it's".to_string(), 7)));
        assert_eq!(unquote_prefix("\"\\x41\\u00e9\\101\""), Some(("AéA".to_string(), 16)));
        assert_eq!(unquote_prefix("\"unterminated"), None);
        assert_eq!(unquote_prefix("\"bad \\q escape\""), None);
    }
}
