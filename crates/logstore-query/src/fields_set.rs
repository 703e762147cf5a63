//! Sets of field names and field name patterns.
//!
//! A pattern is either an exact field name, a prefix ending with `*`
//! (`kubernetes.*`), or the bare `*` matching every field. The needed-fields
//! analysis propagates a [`FieldsSet`] backwards through the pipes to decide
//! which columns must be read from a block.

use std::collections::BTreeSet;

/// Returns true if `name` matches `pattern`.
pub fn match_pattern(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

pub fn is_wildcard_pattern(pattern: &str) -> bool {
    pattern.ends_with('*')
}

/// Returns true if `name` matches any of `patterns`.
pub fn match_any_pattern<S: AsRef<str>>(patterns: &[S], name: &str) -> bool {
    patterns.iter().any(|p| match_pattern(p.as_ref(), name))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldsSet {
    all: bool,
    names: BTreeSet<String>,
    prefixes: BTreeSet<String>,
}

impl FieldsSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a set matching every field.
    pub fn all() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut fs = Self::new();
        fs.add_all(patterns);
        fs
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.names.is_empty() && self.prefixes.is_empty()
    }

    pub fn add(&mut self, pattern: &str) {
        if self.all {
            return;
        }
        if pattern == "*" {
            self.all = true;
            self.names.clear();
            self.prefixes.clear();
            return;
        }
        match pattern.strip_suffix('*') {
            Some(prefix) => {
                self.prefixes.insert(prefix.to_string());
            }
            None => {
                self.names.insert(pattern.to_string());
            }
        }
    }

    pub fn add_all<S: AsRef<str>>(&mut self, patterns: &[S]) {
        for p in patterns {
            self.add(p.as_ref());
        }
    }

    /// Removes an exact field name. Removing from a set matching all fields is a no-op.
    pub fn remove(&mut self, name: &str) {
        self.names.remove(name);
    }

    /// Removes the field names matching `pattern`.
    pub fn remove_pattern(&mut self, pattern: &str) {
        if pattern == "*" {
            if !self.all {
                self.names.clear();
                self.prefixes.clear();
            }
            return;
        }
        self.names.retain(|n| !match_pattern(pattern, n));
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.prefixes.retain(|p| !p.starts_with(prefix));
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.all || self.names.contains(name) || self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// Narrows the set to the fields matching `patterns`.
    pub fn retain_patterns<S: AsRef<str>>(&mut self, patterns: &[S]) {
        if self.all {
            *self = Self::from_patterns(patterns);
            return;
        }
        self.names.retain(|n| match_any_pattern(patterns, n));
    }

    /// Exact names in the set, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Returns the set as patterns, sorted with exact names first.
    pub fn to_patterns(&self) -> Vec<String> {
        if self.all {
            return vec!["*".to_string()];
        }
        let mut out: Vec<String> = self.names.iter().cloned().collect();
        out.extend(self.prefixes.iter().map(|p| format!("{p}*")));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_pattern() {
        assert!(match_pattern("*", "foo"));
        assert!(match_pattern("foo*", "foobar"));
        assert!(match_pattern("foo", "foo"));
        assert!(!match_pattern("foo", "foobar"));
        assert!(!match_pattern("bar*", "foo"));
    }

    #[test]
    fn test_fields_set() {
        let mut fs = FieldsSet::new();
        fs.add_all(&["a", "k8s.*"]);
        assert!(fs.contains("a"));
        assert!(fs.contains("k8s.pod"));
        assert!(!fs.contains("b"));
        assert_eq!(fs.to_patterns(), vec!["a", "k8s.*"]);

        fs.remove("a");
        assert!(!fs.contains("a"));

        fs.add("*");
        assert!(fs.is_all());
        fs.remove("x");
        assert!(fs.contains("x"));
        assert_eq!(fs.to_patterns(), vec!["*"]);
    }

    #[test]
    fn test_retain_patterns() {
        let mut fs = FieldsSet::all();
        fs.retain_patterns(&["a", "b*"]);
        assert!(fs.contains("bx"));
        assert!(!fs.contains("c"));

        let mut fs = FieldsSet::from_patterns(&["a", "c"]);
        fs.retain_patterns(&["a", "b*"]);
        assert_eq!(fs.to_patterns(), vec!["a"]);
    }
}
