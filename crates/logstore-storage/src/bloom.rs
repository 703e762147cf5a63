//! Token Bloom Filters
//!
//! Every non-dict column of a block carries a bloom filter over the tokens of
//! its values. Word and phrase filters check the tokens of their needle
//! against it and skip the whole block without reading the values when any
//! token is definitely missing.
//!
//! A token is a maximal run of unicode letters, digits or `_`.
//!
//! ## Format
//!
//! ```text
//! varint(bits) u8(hashes) u64(sip_0_0) u64(sip_0_1) u64(sip_1_0) u64(sip_1_1) bitmap
//! ```

use crate::error::{Result, StorageError};
use bloomfilter::Bloom;
use logstore_core::encoding::{marshal_var_u64, unmarshal_u64, unmarshal_u8, unmarshal_var_u64};
use std::collections::HashSet;

/// Target false positive rate per column.
const FALSE_POSITIVE_RATE: f64 = 0.01;

const MAX_HASH_FUNCTIONS: u32 = 32;

pub fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Splits `s` into tokens, appending them to `dst` in order of appearance.
pub fn tokenize_into<'a>(dst: &mut Vec<&'a str>, s: &'a str) {
    let mut start = None;
    for (i, c) in s.char_indices() {
        match (is_token_char(c), start) {
            (true, None) => start = Some(i),
            (false, Some(st)) => {
                dst.push(&s[st..i]);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(st) = start {
        dst.push(&s[st..]);
    }
}

pub fn tokenize(s: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    tokenize_into(&mut tokens, s);
    tokens
}

/// Bloom filter over the tokens of a column.
pub struct TokenBloomFilter {
    bloom: Bloom<[u8]>,
}

impl std::fmt::Debug for TokenBloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBloomFilter")
            .field("bits", &self.bloom.number_of_bits())
            .field("hashes", &self.bloom.number_of_hash_functions())
            .finish()
    }
}

impl TokenBloomFilter {
    /// Builds a filter holding every token of `values`.
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut tokens = HashSet::new();
        let mut buf = Vec::new();
        for v in values {
            buf.clear();
            tokenize_into(&mut buf, v);
            tokens.extend(buf.iter().copied());
        }

        let mut bloom = Bloom::new_for_fp_rate(tokens.len().max(1), FALSE_POSITIVE_RATE);
        for token in &tokens {
            bloom.set(token.as_bytes());
        }

        tracing::trace!(
            tokens = tokens.len(),
            bitmap_bits = bloom.number_of_bits(),
            num_hashes = bloom.number_of_hash_functions(),
            "built token bloom filter"
        );

        Self { bloom }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.bloom.check(token.as_bytes())
    }

    /// Returns false if at least one of `tokens` is definitely missing.
    pub fn contains_all<S: AsRef<str>>(&self, tokens: &[S]) -> bool {
        tokens.iter().all(|t| self.contains(t.as_ref()))
    }

    /// Returns false if every one of `tokens` is definitely missing.
    pub fn contains_any<S: AsRef<str>>(&self, tokens: &[S]) -> bool {
        tokens.iter().any(|t| self.contains(t.as_ref()))
    }

    pub fn marshal(&self, dst: &mut Vec<u8>) {
        marshal_var_u64(dst, self.bloom.number_of_bits());
        dst.push(self.bloom.number_of_hash_functions() as u8);
        for (k0, k1) in self.bloom.sip_keys() {
            dst.extend_from_slice(&k0.to_be_bytes());
            dst.extend_from_slice(&k1.to_be_bytes());
        }
        dst.extend_from_slice(&self.bloom.bitmap());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.marshal(&mut buf);
        buf
    }

    pub fn unmarshal(src: &[u8]) -> Result<Self> {
        let mut cursor = src;
        let bits = unmarshal_var_u64(&mut cursor)?;
        let hashes = u32::from(unmarshal_u8(&mut cursor)?);
        let mut sip_keys = [(0u64, 0u64); 2];
        for key in sip_keys.iter_mut() {
            *key = (unmarshal_u64(&mut cursor)?, unmarshal_u64(&mut cursor)?);
        }
        if bits == 0 {
            return Err(StorageError::ColumnsHeader(
                "bloom filter must contain at least one bit".to_string(),
            ));
        }
        if hashes == 0 || hashes > MAX_HASH_FUNCTIONS {
            return Err(StorageError::ColumnsHeader(format!(
                "unexpected number of bloom filter hash functions: {hashes}; must be in range [1..{MAX_HASH_FUNCTIONS}]"
            )));
        }
        let want_len = bits.div_ceil(8);
        if cursor.len() as u64 != want_len {
            return Err(StorageError::ColumnsHeader(format!(
                "unexpected bloom filter bitmap size: {} bytes; want {want_len} bytes for {bits} bits",
                cursor.len()
            )));
        }
        let bloom = Bloom::from_existing(cursor, bits, hashes, sip_keys);
        Ok(Self { bloom })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("foo bar,baz"), vec!["foo", "bar", "baz"]);
        assert_eq!(tokenize("  error: cannot open /var/log_1"), vec![
            "error", "cannot", "open", "var", "log_1"
        ]);
        assert_eq!(tokenize("привет, мир!"), vec!["привет", "мир"]);
        assert!(tokenize("").is_empty());
        assert!(tokenize(" ,.;").is_empty());
    }

    #[test]
    fn test_bloom_contains_tokens() {
        let values = ["GET /api/users 200", "POST /api/orders 500"];
        let bf = TokenBloomFilter::from_values(values.iter().copied());
        for token in ["GET", "api", "users", "200", "POST", "orders", "500"] {
            assert!(bf.contains(token), "token {token}");
        }
        assert!(bf.contains_all(&["api", "orders"]));
        assert!(bf.contains_any(&["missing-token-xyz", "GET"]));
    }

    #[test]
    fn test_bloom_serialization() {
        let values: Vec<String> = (0..1000).map(|i| format!("user_{i} logged in")).collect();
        let bf = TokenBloomFilter::from_values(values.iter().map(|s| s.as_str()));
        let data = bf.to_bytes();

        let decoded = TokenBloomFilter::unmarshal(&data).unwrap();
        for v in &values {
            for token in tokenize(v) {
                assert!(decoded.contains(token));
            }
        }
        let misses = (0..1000)
            .filter(|i| decoded.contains(&format!("absent_{i}")))
            .count();
        assert!(misses < 100, "too many false positives: {misses}");
    }

    #[test]
    fn test_bloom_unmarshal_errors() {
        let bf = TokenBloomFilter::from_values(["a b c"]);
        let data = bf.to_bytes();
        for n in 0..data.len() {
            assert!(TokenBloomFilter::unmarshal(&data[..n]).is_err(), "n={n}");
        }
        let mut extra = data.clone();
        extra.push(0);
        assert!(TokenBloomFilter::unmarshal(&extra).is_err());
    }
}
