//! Streams, Stream Tags and Tenants
//!
//! A log stream is the set of log entries sharing the same tenant and the same
//! stream tags (for example `{app="nginx",host="h1"}`). Every stream is
//! identified by a 128-bit [`StreamId`] derived from the tenant and the
//! canonical form of its tags. Blocks and parts are sorted by
//! `(stream_id, timestamp)`, so the id ordering is also the on-disk ordering.
//!
//! ## Canonical Tags Format
//!
//! ```text
//! varint(tag_count) { bytes(name) bytes(value) }*
//! ```
//!
//! Tags are sorted by `(name, value)` before marshaling, so two tag sets with
//! the same contents always produce the same bytes and the same stream id.

use crate::encoding::{marshal_bytes, marshal_var_u64, unmarshal_string, unmarshal_var_u64};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use siphasher::sip128::{Hasher128, SipHasher13};
use std::fmt;
use std::hash::Hasher;

/// Identifies the owner of log streams.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TenantId {
    pub account_id: u32,
    pub project_id: u32,
}

impl TenantId {
    pub fn new(account_id: u32, project_id: u32) -> Self {
        Self {
            account_id,
            project_id,
        }
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account_id, self.project_id)
    }
}

/// Unique 128-bit identifier of a log stream.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StreamId(pub u128);

impl StreamId {
    /// Size of the marshaled stream id in bytes.
    pub const SIZE: usize = 16;

    /// Derives the stream id from the tenant and the canonical tags bytes.
    pub fn from_canonical_tags(tenant_id: TenantId, canonical_tags: &[u8]) -> Self {
        let mut hasher = SipHasher13::new();
        hasher.write_u32(tenant_id.account_id);
        hasher.write_u32(tenant_id.project_id);
        hasher.write(canonical_tags);
        StreamId(hasher.finish128().as_u128())
    }

    pub fn marshal(&self, dst: &mut Vec<u8>) {
        dst.extend_from_slice(&self.0.to_be_bytes());
    }

    pub fn unmarshal(src: &mut &[u8]) -> Result<Self> {
        let id = crate::encoding::unmarshal_u128(src)?;
        Ok(StreamId(id))
    }

    /// Parses the 32-char hex form returned by `Display`.
    pub fn try_parse(s: &str) -> Option<Self> {
        if s.len() != 32 {
            return None;
        }
        u128::from_str_radix(s, 16).ok().map(StreamId)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A single stream tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamTag {
    pub name: String,
    pub value: String,
}

/// Set of tags identifying a log stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamTags {
    tags: Vec<StreamTag>,
}

impl StreamTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tag. Tags with empty values are skipped.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.tags.push(StreamTag {
            name: name.into(),
            value,
        });
    }

    pub fn tags(&self) -> &[StreamTag] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Returns the value of the tag with the given name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }

    /// Appends the canonical form of the tags to `dst`.
    pub fn marshal_canonical(&self, dst: &mut Vec<u8>) {
        let mut tags: Vec<&StreamTag> = self.tags.iter().collect();
        tags.sort();
        marshal_var_u64(dst, tags.len() as u64);
        for tag in tags {
            marshal_bytes(dst, tag.name.as_bytes());
            marshal_bytes(dst, tag.value.as_bytes());
        }
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.marshal_canonical(&mut buf);
        buf
    }

    /// Parses the canonical form produced by `marshal_canonical`.
    pub fn unmarshal_canonical(src: &mut &[u8]) -> Result<Self> {
        let mut cursor = *src;
        let count = unmarshal_var_u64(&mut cursor)?;
        if count > cursor.len() as u64 {
            return Err(Error::decode(format!(
                "too many stream tags: {count}; only {} bytes left",
                cursor.len()
            )));
        }
        let mut tags = Vec::with_capacity(count as usize);
        for i in 0..count {
            let name = unmarshal_string(&mut cursor)
                .map_err(|err| Error::decode(format!("cannot unmarshal tag #{i} name: {err}")))?;
            let value = unmarshal_string(&mut cursor)
                .map_err(|err| Error::decode(format!("cannot unmarshal tag #{i} value: {err}")))?;
            tags.push(StreamTag { name, value });
        }
        *src = cursor;
        Ok(Self { tags })
    }

    /// Computes the stream id for these tags under the given tenant.
    pub fn stream_id(&self, tenant_id: TenantId) -> StreamId {
        StreamId::from_canonical_tags(tenant_id, &self.canonical_bytes())
    }
}

impl fmt::Display for StreamTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&StreamTag> = self.tags.iter().collect();
        tags.sort();
        f.write_str("{")?;
        for (i, tag) in tags.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={:?}", tag.name, tag.value)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> StreamTags {
        let mut st = StreamTags::new();
        for (name, value) in pairs {
            st.add(*name, *value);
        }
        st
    }

    #[test]
    fn test_canonical_is_order_independent() {
        let a = tags(&[("host", "h1"), ("app", "nginx")]);
        let b = tags(&[("app", "nginx"), ("host", "h1")]);
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
        assert_eq!(
            a.stream_id(TenantId::default()),
            b.stream_id(TenantId::default())
        );
        assert_ne!(
            a.stream_id(TenantId::new(1, 0)),
            a.stream_id(TenantId::default())
        );
    }

    #[test]
    fn test_canonical_roundtrip_sorts_tags() {
        let st = tags(&[("z", "1"), ("a", "2"), ("a", "1")]);
        let buf = st.canonical_bytes();

        let mut src = buf.as_slice();
        let decoded = StreamTags::unmarshal_canonical(&mut src).unwrap();
        assert!(src.is_empty());
        let names: Vec<_> = decoded
            .tags()
            .iter()
            .map(|t| (t.name.as_str(), t.value.as_str()))
            .collect();
        assert_eq!(names, vec![("a", "1"), ("a", "2"), ("z", "1")]);
    }

    #[test]
    fn test_canonical_truncated() {
        let buf = tags(&[("app", "nginx")]).canonical_bytes();
        for n in 0..buf.len() {
            let mut src = &buf[..n];
            assert!(StreamTags::unmarshal_canonical(&mut src).is_err(), "n={n}");
        }
    }

    #[test]
    fn test_empty_values_skipped() {
        let st = tags(&[("app", ""), ("host", "h1")]);
        assert_eq!(st.len(), 1);
        assert_eq!(st.to_string(), "{host=\"h1\"}");
        assert_eq!(st.get("host"), Some("h1"));
        assert_eq!(st.get("app"), None);
    }

    #[test]
    fn test_stream_id_string() {
        let sid = StreamId(0xabc);
        let s = sid.to_string();
        assert_eq!(s.len(), 32);
        assert_eq!(StreamId::try_parse(&s), Some(sid));
        assert_eq!(StreamId::try_parse("xyz"), None);

        let mut buf = Vec::new();
        sid.marshal(&mut buf);
        assert_eq!(buf.len(), StreamId::SIZE);
        let mut src = buf.as_slice();
        assert_eq!(StreamId::unmarshal(&mut src).unwrap(), sid);
    }
}
