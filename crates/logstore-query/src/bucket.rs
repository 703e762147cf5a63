//! Value bucketing for `stats by (field:bucket offset o)`.
//!
//! Every `truncate_*` function rounds a value down to the nearest multiple of
//! the bucket size counted from the bucket offset:
//!
//! ```text
//! truncate(x) = floor((x - offset) / size) * size + offset
//! ```
//!
//! Bucket sizes below 1 for integer domains are treated as 1, so truncation
//! is always idempotent. Floats are truncated in a decimal-scaled integer
//! domain, which keeps `0.1`-sized buckets free of binary rounding drift.
//!
//! Timestamps additionally accept the calendar units `week`, `month` and
//! `year`. Week buckets start on Monday.

use logstore_core::values::{
    float64_string, ipv4_string, timestamp_from_ymd, timestamp_iso8601_string, timestamp_rfc3339nano_string,
    timestamp_to_ymd, try_parse_bytes, try_parse_duration, try_parse_float64, try_parse_ipv4, try_parse_ipv4_mask,
    try_parse_timestamp_iso8601, try_parse_timestamp_rfc3339_nano, NSECS_PER_DAY, NSECS_PER_WEEK, NSECS_PER_YEAR,
};
use std::fmt;

/// Bucket configuration of a single `by` field.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub size_str: String,
    pub size: f64,
    pub offset_str: String,
    pub offset: f64,
}

impl Bucket {
    /// Parses a bucket size such as `5m`, `month`, `/24`, `10` or `1KiB`.
    pub fn parse_size(s: &str) -> Option<f64> {
        match s {
            "week" => return Some(NSECS_PER_WEEK as f64),
            "month" => return Some((31 * NSECS_PER_DAY) as f64),
            "year" => return Some(NSECS_PER_YEAR as f64),
            _ => {}
        }
        if s.starts_with('/') {
            return try_parse_ipv4_mask(s).map(|n| n as f64);
        }
        if let Some(f) = try_parse_float64(s) {
            return Some(f);
        }
        if let Some(d) = try_parse_duration(s) {
            return Some(d as f64);
        }
        try_parse_bytes(s).map(|n| n as f64)
    }

    pub fn parse_offset(s: &str) -> Option<f64> {
        if let Some(f) = try_parse_float64(s) {
            return Some(f);
        }
        if let Some(d) = try_parse_duration(s) {
            return Some(d as f64);
        }
        try_parse_bytes(s).map(|n| n as f64)
    }

    pub fn new(size_str: &str, offset_str: &str) -> Option<Self> {
        let size = Self::parse_size(size_str)?;
        let offset = if offset_str.is_empty() {
            0.0
        } else {
            Self::parse_offset(offset_str)?
        };
        Some(Self {
            size_str: size_str.to_string(),
            size,
            offset_str: offset_str.to_string(),
            offset,
        })
    }

    fn int_size(&self) -> i64 {
        (self.size as i64).max(1)
    }

    /// Truncates a nanosecond timestamp.
    pub fn truncate_timestamp(&self, ts: i64) -> i64 {
        truncate_timestamp(ts, self.int_size(), self.offset as i64, &self.size_str)
    }

    pub fn truncate_uint64(&self, n: u64) -> u64 {
        truncate_uint64(n, self.int_size() as u64, self.offset as i64 as u64)
    }

    pub fn truncate_int64(&self, n: i64) -> i64 {
        truncate_int64(n, self.int_size(), self.offset as i64)
    }

    pub fn truncate_float64(&self, f: f64) -> f64 {
        truncate_float64(f, self.size, self.offset)
    }

    pub fn truncate_ipv4(&self, ip: u32) -> u32 {
        truncate_uint32(ip, self.int_size() as u32, self.offset as i64 as u32)
    }

    /// Buckets a value of unknown type by sniffing its text form.
    ///
    /// Values which are neither numbers, timestamps nor IPv4 addresses are returned unchanged.
    pub fn bucketed_string(&self, s: &str) -> String {
        let Some(c) = s.bytes().next() else {
            return String::new();
        };
        if !c.is_ascii_digit() && c != b'-' {
            return s.to_string();
        }
        if let Some(f) = try_parse_float64(s) {
            return float64_string(self.truncate_float64(f));
        }
        if let Some(ts) = try_parse_timestamp_iso8601(s) {
            return timestamp_iso8601_string(self.truncate_timestamp(ts));
        }
        if let Some(ts) = try_parse_timestamp_rfc3339_nano(s) {
            return timestamp_rfc3339nano_string(self.truncate_timestamp(ts));
        }
        if let Some(ip) = try_parse_ipv4(s) {
            return ipv4_string(self.truncate_ipv4(ip));
        }
        s.to_string()
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.size_str)?;
        if !self.offset_str.is_empty() {
            write!(f, " offset {}", self.offset_str)?;
        }
        Ok(())
    }
}

pub fn truncate_int64(n: i64, bucket_size: i64, bucket_offset: i64) -> i64 {
    let bucket_size = bucket_size.max(1);
    let shifted = n.wrapping_sub(bucket_offset);
    shifted
        .wrapping_sub(shifted.rem_euclid(bucket_size))
        .wrapping_add(bucket_offset)
}

pub fn truncate_uint64(n: u64, bucket_size: u64, bucket_offset: u64) -> u64 {
    let bucket_size = bucket_size.max(1);
    let shifted = n.wrapping_sub(bucket_offset);
    shifted.wrapping_sub(shifted % bucket_size).wrapping_add(bucket_offset)
}

pub fn truncate_uint32(n: u32, bucket_size: u32, bucket_offset: u32) -> u32 {
    let bucket_size = bucket_size.max(1);
    let shifted = n.wrapping_sub(bucket_offset);
    shifted.wrapping_sub(shifted % bucket_size).wrapping_add(bucket_offset)
}

/// Returns `e` such that `f = m * 10^e` for the integer `m` with the fewest digits.
fn decimal_exponent(f: f64) -> i32 {
    let s = format!("{f:e}");
    let Some((mantissa, exp)) = s.split_once('e') else {
        return 0;
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    let frac_digits = mantissa.split_once('.').map_or(0, |(_, frac)| frac.len() as i32);
    exp - frac_digits
}

pub fn truncate_float64(f: f64, bucket_size: f64, bucket_offset: f64) -> f64 {
    if !f.is_finite() {
        return f;
    }
    let bucket_size = if bucket_size <= 0.0 { 1.0 } else { bucket_size };
    let e = decimal_exponent(bucket_size);
    let (scale_up, scale_down) = if e < 0 {
        (10f64.powi(-e), 1.0)
    } else {
        (1.0, 10f64.powi(e))
    };
    let bucket_size_p10 = ((bucket_size * scale_up / scale_down).round() as i64).max(1);
    let scaled = (f - bucket_offset) * scale_up / scale_down;
    let rounded = scaled.round();
    let f_p10 = if (scaled - rounded).abs() < 1e-9 {
        rounded as i64
    } else {
        scaled.floor() as i64
    };
    let f_p10 = f_p10 - f_p10.rem_euclid(bucket_size_p10);
    f_p10 as f64 * scale_down / scale_up + bucket_offset
}

/// Truncates a timestamp to the bucket named by `bucket_size_str`, falling back to `bucket_size` nanoseconds.
pub fn truncate_timestamp(ts: i64, bucket_size: i64, bucket_offset: i64, bucket_size_str: &str) -> i64 {
    match bucket_size_str {
        "week" => truncate_int64(ts, NSECS_PER_WEEK, bucket_offset + 4 * NSECS_PER_DAY),
        "month" => {
            let shifted = ts.wrapping_sub(bucket_offset);
            let (y, m, _) = timestamp_to_ymd(shifted);
            timestamp_from_ymd(y, m, 1).unwrap_or(shifted) + bucket_offset
        }
        "year" => {
            let shifted = ts.wrapping_sub(bucket_offset);
            let (y, _, _) = timestamp_to_ymd(shifted);
            timestamp_from_ymd(y, 1, 1).unwrap_or(shifted) + bucket_offset
        }
        _ => truncate_int64(ts, bucket_size, bucket_offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_int64() {
        assert_eq!(truncate_int64(1234, 100, 0), 1200);
        assert_eq!(truncate_int64(-50, 100, 0), -100);
        assert_eq!(truncate_int64(-100, 100, 0), -100);
        assert_eq!(truncate_int64(1234, 100, 5), 1205);
        assert_eq!(truncate_int64(7, 0, 0), 7);
        assert_eq!(truncate_int64(7, -3, 0), 7);
    }

    #[test]
    fn test_truncate_is_idempotent() {
        for n in [-1001i64, -1, 0, 1, 99, 12345] {
            for size in [1i64, 3, 10, 100] {
                for offset in [0i64, 7, -2] {
                    let t = truncate_int64(n, size, offset);
                    assert_eq!(truncate_int64(t, size, offset), t);
                    assert!(t <= n);
                }
            }
        }
        for n in [0u64, 5, 255, 1 << 40] {
            let t = truncate_uint64(n, 10, 3);
            assert_eq!(truncate_uint64(t, 10, 3), t);
        }
        for f in [-3.7f64, 0.0, 0.25, 12.34] {
            let t = truncate_float64(f, 0.1, 0.0);
            assert_eq!(truncate_float64(t, 0.1, 0.0), t);
        }
    }

    #[test]
    fn test_truncate_float64() {
        assert_eq!(truncate_float64(12.34, 0.1, 0.0), 12.3);
        assert_eq!(truncate_float64(12.34, 10.0, 0.0), 10.0);
        assert_eq!(truncate_float64(-0.5, 1.0, 0.0), -1.0);
        assert_eq!(truncate_float64(7.5, 0.0, 0.0), 7.0);
    }

    #[test]
    fn test_truncate_timestamp_calendar() {
        let ts = timestamp_from_ymd(2024, 3, 17).unwrap() + 5 * 3600 * 1_000_000_000;
        let month = truncate_timestamp(ts, 0, 0, "month");
        assert_eq!(month, timestamp_from_ymd(2024, 3, 1).unwrap());
        let year = truncate_timestamp(ts, 0, 0, "year");
        assert_eq!(year, timestamp_from_ymd(2024, 1, 1).unwrap());

        // 2024-03-17 is a Sunday; its week starts on Monday 2024-03-11.
        let week = truncate_timestamp(ts, NSECS_PER_WEEK, 0, "week");
        assert_eq!(week, timestamp_from_ymd(2024, 3, 11).unwrap());
    }

    #[test]
    fn test_bucket_parse_and_string() {
        let b = Bucket::new("5m", "1m").unwrap();
        assert_eq!(b.size, 300e9);
        assert_eq!(b.offset, 60e9);
        assert_eq!(b.to_string(), "5m offset 1m");

        let ip = Bucket::new("/24", "").unwrap();
        assert_eq!(ip.size, 256.0);
        assert_eq!(ip.bucketed_string("10.1.2.3"), "10.1.2.0");

        let n = Bucket::new("10", "").unwrap();
        assert_eq!(n.bucketed_string("123"), "120");
        assert_eq!(n.bucketed_string("foo"), "foo");
        assert!(Bucket::new("bogus", "").is_none());
    }
}
