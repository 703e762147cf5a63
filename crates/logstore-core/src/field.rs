//! Log fields
//!
//! A log entry is a timestamp plus a list of `name=value` fields. The message
//! field is stored under the empty name and exposed to queries as `_msg`.

use crate::encoding::{marshal_bytes, unmarshal_string};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name used by queries for the message field.
pub const MSG_FIELD_NAME: &str = "_msg";

/// Name of the timestamp field.
pub const TIME_FIELD_NAME: &str = "_time";

/// Name of the synthesized stream field.
pub const STREAM_FIELD_NAME: &str = "_stream";

/// Name of the synthesized stream id field.
pub const STREAM_ID_FIELD_NAME: &str = "_stream_id";

/// A single `name=value` pair of a log entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn marshal(&self, dst: &mut Vec<u8>) {
        marshal_bytes(dst, self.name.as_bytes());
        marshal_bytes(dst, self.value.as_bytes());
    }

    pub fn unmarshal(src: &mut &[u8]) -> Result<Self> {
        let mut cursor = *src;
        let name = unmarshal_string(&mut cursor)?;
        let value = unmarshal_string(&mut cursor)?;
        *src = cursor;
        Ok(Self { name, value })
    }

    /// Returns the approximate size of the field in a `name=value` text form.
    pub fn text_size(&self) -> usize {
        let name_len = if self.name.is_empty() {
            MSG_FIELD_NAME.len()
        } else {
            self.name.len()
        };
        2 + name_len + self.value.len()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={:?}",
            get_canonical_column_name(&self.name),
            self.value
        )
    }
}

/// Maps the stored message name `""` to `_msg`.
pub fn get_canonical_column_name(name: &str) -> &str {
    if name.is_empty() {
        MSG_FIELD_NAME
    } else {
        name
    }
}

/// Returns true if `name` refers to the message field.
pub fn is_msg_field_name(name: &str) -> bool {
    name.is_empty() || name == MSG_FIELD_NAME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_roundtrip() {
        let f = Field::new("level", "error");
        let mut buf = Vec::new();
        f.marshal(&mut buf);

        let mut src = buf.as_slice();
        assert_eq!(Field::unmarshal(&mut src).unwrap(), f);
        assert!(src.is_empty());
    }

    #[test]
    fn test_field_truncated() {
        let f = Field::new("level", "error");
        let mut buf = Vec::new();
        f.marshal(&mut buf);
        buf.pop();

        let mut src = buf.as_slice();
        assert!(Field::unmarshal(&mut src).is_err());
        assert_eq!(src.len(), buf.len());
    }

    #[test]
    fn test_canonical_names() {
        assert_eq!(get_canonical_column_name(""), "_msg");
        assert_eq!(get_canonical_column_name("foo"), "foo");
        assert!(is_msg_field_name(""));
        assert!(is_msg_field_name("_msg"));
        assert!(!is_msg_field_name("msg"));
        assert_eq!(Field::new("", "x").text_size(), 2 + 4 + 1);
        assert_eq!(Field::new("", "x").to_string(), "_msg=\"x\"");
    }
}
