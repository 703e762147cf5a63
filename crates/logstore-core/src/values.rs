//! Textual Value Parsing and Formatting
//!
//! Log field values are strings. The storage layer packs them into typed
//! columns when every value of a column parses as a number, an IPv4 address
//! or an ISO8601 timestamp, and the query layer parses durations, byte sizes
//! and timestamps out of LogsQL literals.
//!
//! Every `try_parse_*` function here is strict: a value is accepted only when
//! the matching `marshal_*_string` function can reproduce the same text. This
//! is what lets the values encoder store a column as numbers and still return
//! the exact original strings to queries.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

pub const NSECS_PER_MICROSECOND: i64 = 1_000;
pub const NSECS_PER_MILLISECOND: i64 = 1_000_000;
pub const NSECS_PER_SECOND: i64 = 1_000_000_000;
pub const NSECS_PER_MINUTE: i64 = 60 * NSECS_PER_SECOND;
pub const NSECS_PER_HOUR: i64 = 60 * NSECS_PER_MINUTE;
pub const NSECS_PER_DAY: i64 = 24 * NSECS_PER_HOUR;
pub const NSECS_PER_WEEK: i64 = 7 * NSECS_PER_DAY;
pub const NSECS_PER_YEAR: i64 = 365 * NSECS_PER_DAY;

/// Parses a decimal unsigned integer. `_` digit separators are allowed.
pub fn try_parse_uint64(s: &str) -> Option<u64> {
    if s.is_empty() || s.len() > "18_446_744_073_709_551_615".len() {
        return None;
    }
    let mut n: u64 = 0;
    let mut seen_digit = false;
    for ch in s.bytes() {
        if ch == b'_' {
            continue;
        }
        if !ch.is_ascii_digit() {
            return None;
        }
        n = n.checked_mul(10)?.checked_add(u64::from(ch - b'0'))?;
        seen_digit = true;
    }
    if !seen_digit {
        return None;
    }
    Some(n)
}

/// Parses a decimal signed integer with an optional leading `-`.
pub fn try_parse_int64(s: &str) -> Option<i64> {
    match s.strip_prefix('-') {
        Some(tail) => {
            let n = try_parse_uint64(tail)?;
            if n > (i64::MAX as u64) + 1 {
                return None;
            }
            Some((n as i64).wrapping_neg())
        }
        None => {
            let n = try_parse_uint64(s)?;
            i64::try_from(n).ok()
        }
    }
}

/// Parses a decimal floating-point number.
///
/// Exponent notation and dots at either end are rejected, since such values
/// cannot be formatted back to the same text.
pub fn try_parse_float64(s: &str) -> Option<f64> {
    if s.is_empty() || s.len() > 20 {
        return None;
    }
    let (minus, s) = match s.strip_prefix('-') {
        Some(tail) => (true, tail),
        None => (false, s),
    };
    let f = match s.find('.') {
        None => try_parse_uint64(s)? as f64,
        Some(n) => {
            if n == 0 || n == s.len() - 1 {
                return None;
            }
            let (s_int, s_frac) = (&s[..n], &s[n + 1..]);
            let n_int = try_parse_uint64(s_int)?;
            let n_frac = try_parse_uint64(s_frac)?;
            let frac_digits = s_frac.bytes().filter(|&b| b != b'_').count() as i32;
            (n_frac as f64).mul_add(10f64.powi(-frac_digits), n_int as f64)
        }
    };
    Some(if minus { -f } else { f })
}

/// Parses a float prefix of `s` made of digits, dots and `_`, returning the tail.
pub fn try_parse_float64_prefix(s: &str) -> Option<(f64, &str)> {
    let i = s
        .bytes()
        .take_while(|&b| b.is_ascii_digit() || b == b'.' || b == b'_')
        .count();
    if i == 0 {
        return None;
    }
    let f = try_parse_float64(&s[..i])?;
    Some((f, &s[i..]))
}

/// Parses any number accepted by LogsQL: integers, floats, durations and byte sizes.
pub fn try_parse_number(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    if let Some(f) = try_parse_float64(s) {
        return Some(f);
    }
    if let Some(nsecs) = try_parse_duration(s) {
        return Some(nsecs as f64);
    }
    if let Some(n) = try_parse_bytes(s) {
        return Some(n as f64);
    }
    match s {
        "inf" | "+inf" | "Inf" | "+Inf" => Some(f64::INFINITY),
        "-inf" | "-Inf" => Some(f64::NEG_INFINITY),
        "nan" | "NaN" => Some(f64::NAN),
        _ => None,
    }
}

/// Parses a dotted-quad IPv4 address into its big-endian u32 form.
pub fn try_parse_ipv4(s: &str) -> Option<u32> {
    if s.len() < "1.1.1.1".len() || s.len() > "255.255.255.255".len() {
        return None;
    }
    let mut octets = [0u8; 4];
    let mut parts = s.split('.');
    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 {
            return None;
        }
        let v = try_parse_uint64(part)?;
        if v > 255 {
            return None;
        }
        *octet = v as u8;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(u32::from_be_bytes(octets))
}

/// Parses `/N` IPv4 mask notation into the bucket size `1 << (32 - N)`.
pub fn try_parse_ipv4_mask(s: &str) -> Option<u64> {
    let n = try_parse_uint64(s.strip_prefix('/')?)?;
    if n > 32 {
        return None;
    }
    Some(1u64 << (32 - n))
}

/// Parses `a.b.c.d/N` into `(min_ip, max_ip)`.
pub fn try_parse_ipv4_cidr(s: &str) -> Option<(u32, u32)> {
    let n = s.find('/')?;
    let ip = try_parse_ipv4(&s[..n])?;
    let mask_bits = try_parse_uint64(&s[n + 1..])?;
    if mask_bits > 32 {
        return None;
    }
    let mask = if mask_bits == 0 {
        0
    } else {
        u32::MAX << (32 - mask_bits)
    };
    let min_ip = ip & mask;
    let max_ip = min_ip | !mask;
    Some((min_ip, max_ip))
}

/// Parses human-readable byte sizes like `1.5KiB`, `10MB` or `3G`.
pub fn try_parse_bytes(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    let (minus, mut s) = match s.strip_prefix('-') {
        Some(tail) => (true, tail),
        None => (false, s),
    };
    const UNITS: &[(&str, f64)] = &[
        ("KiB", (1u64 << 10) as f64),
        ("MiB", (1u64 << 20) as f64),
        ("GiB", (1u64 << 30) as f64),
        ("TiB", (1u64 << 40) as f64),
        ("Ki", (1u64 << 10) as f64),
        ("Mi", (1u64 << 20) as f64),
        ("Gi", (1u64 << 30) as f64),
        ("Ti", (1u64 << 40) as f64),
        ("KB", 1e3),
        ("MB", 1e6),
        ("GB", 1e9),
        ("TB", 1e12),
        ("B", 1.0),
        ("K", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
    ];
    let mut n: i64 = 0;
    while !s.is_empty() {
        let (f, tail) = try_parse_float64_prefix(s)?;
        s = tail;
        if s.is_empty() {
            if f.fract() != 0.0 {
                return None;
            }
            n += f as i64;
            continue;
        }
        let (unit, mult) = UNITS.iter().find(|(unit, _)| s.starts_with(unit))?;
        n += (f * mult) as i64;
        s = &s[unit.len()..];
    }
    Some(if minus { -n } else { n })
}

/// Parses durations like `5m`, `1h30m`, `1.5s` or `-2d` into nanoseconds.
pub fn try_parse_duration(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    let (minus, mut s) = match s.strip_prefix('-') {
        Some(tail) => (true, tail),
        None => (false, s),
    };
    const UNITS: &[(&str, i64)] = &[
        ("µs", NSECS_PER_MICROSECOND),
        ("ms", NSECS_PER_MILLISECOND),
        ("ns", 1),
        ("y", NSECS_PER_YEAR),
        ("w", NSECS_PER_WEEK),
        ("d", NSECS_PER_DAY),
        ("h", NSECS_PER_HOUR),
        ("m", NSECS_PER_MINUTE),
        ("s", NSECS_PER_SECOND),
    ];
    let mut nsecs: i64 = 0;
    while !s.is_empty() {
        let (f, tail) = try_parse_float64_prefix(s)?;
        if tail.is_empty() {
            return None;
        }
        let (unit, mult) = UNITS.iter().find(|(unit, _)| tail.starts_with(unit))?;
        nsecs = nsecs.saturating_add((f * *mult as f64) as i64);
        s = &tail[unit.len()..];
    }
    Some(if minus { -nsecs } else { nsecs })
}

/// Formats a duration in nanoseconds the way `try_parse_duration` accepts it.
pub fn marshal_duration_string(dst: &mut String, mut nsecs: i64) {
    use std::fmt::Write;

    if nsecs == 0 {
        dst.push('0');
        return;
    }
    if nsecs < 0 {
        dst.push('-');
        nsecs = nsecs.saturating_neg();
    }
    let float_seconds = nsecs >= NSECS_PER_SECOND;
    for (unit, mult) in [
        ("w", NSECS_PER_WEEK),
        ("d", NSECS_PER_DAY),
        ("h", NSECS_PER_HOUR),
        ("m", NSECS_PER_MINUTE),
    ] {
        if nsecs >= mult {
            let n = nsecs / mult;
            nsecs -= n * mult;
            let _ = write!(dst, "{n}{unit}");
        }
    }
    if nsecs >= NSECS_PER_SECOND {
        if float_seconds {
            let seconds = nsecs as f64 / NSECS_PER_SECOND as f64;
            marshal_float64_string(dst, seconds);
            dst.push('s');
            return;
        }
        let n = nsecs / NSECS_PER_SECOND;
        nsecs -= n * NSECS_PER_SECOND;
        let _ = write!(dst, "{n}s");
    }
    for (unit, mult) in [("ms", NSECS_PER_MILLISECOND), ("µs", NSECS_PER_MICROSECOND)] {
        if nsecs >= mult {
            let n = nsecs / mult;
            nsecs -= n * mult;
            let _ = write!(dst, "{n}{unit}");
        }
    }
    if nsecs > 0 {
        let _ = write!(dst, "{nsecs}ns");
    }
}

pub fn duration_string(nsecs: i64) -> String {
    let mut s = String::new();
    marshal_duration_string(&mut s, nsecs);
    s
}

/// Formats a float in the shortest form that parses back to the same value.
pub fn marshal_float64_string(dst: &mut String, f: f64) {
    use std::fmt::Write;

    if f.is_infinite() {
        dst.push_str(if f > 0.0 { "+Inf" } else { "-Inf" });
        return;
    }
    let _ = write!(dst, "{f}");
}

pub fn float64_string(f: f64) -> String {
    let mut s = String::new();
    marshal_float64_string(&mut s, f);
    s
}

pub fn marshal_ipv4_string(dst: &mut String, ip: u32) {
    use std::fmt::Write;

    let [a, b, c, d] = ip.to_be_bytes();
    let _ = write!(dst, "{a}.{b}.{c}.{d}");
}

pub fn ipv4_string(ip: u32) -> String {
    let mut s = String::new();
    marshal_ipv4_string(&mut s, ip);
    s
}

fn datetime_from_nsecs(nsecs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(nsecs.div_euclid(NSECS_PER_SECOND), 0).unwrap_or_default()
}

/// Formats a timestamp as `YYYY-MM-DDThh:mm:ss.sssZ`.
pub fn marshal_timestamp_iso8601_string(dst: &mut String, nsecs: i64) {
    use std::fmt::Write;

    let dt = datetime_from_nsecs(nsecs);
    let msecs = nsecs.rem_euclid(NSECS_PER_SECOND) / NSECS_PER_MILLISECOND;
    let _ = write!(dst, "{}.{msecs:03}Z", dt.format("%Y-%m-%dT%H:%M:%S"));
}

pub fn timestamp_iso8601_string(nsecs: i64) -> String {
    let mut s = String::new();
    marshal_timestamp_iso8601_string(&mut s, nsecs);
    s
}

/// Formats a timestamp in RFC3339 with nanoseconds, trimming trailing zeros.
pub fn marshal_timestamp_rfc3339nano_string(dst: &mut String, nsecs: i64) {
    use std::fmt::Write;

    let dt = datetime_from_nsecs(nsecs);
    let _ = write!(dst, "{}", dt.format("%Y-%m-%dT%H:%M:%S"));
    let frac = nsecs.rem_euclid(NSECS_PER_SECOND);
    if frac != 0 {
        let digits = format!("{frac:09}");
        dst.push('.');
        dst.push_str(digits.trim_end_matches('0'));
    }
    dst.push('Z');
}

pub fn timestamp_rfc3339nano_string(nsecs: i64) -> String {
    let mut s = String::new();
    marshal_timestamp_rfc3339nano_string(&mut s, nsecs);
    s
}

/// Parses `YYYY-MM-DDThh:mm:ss` at the start of `s` into unix seconds.
fn try_parse_timestamp_secs(s: &str) -> Option<(i64, &str)> {
    let b = s.as_bytes();
    if b.len() < "YYYY-MM-DDThh:mm:ss".len() {
        return None;
    }
    if b[4] != b'-' || b[7] != b'-' || (b[10] != b'T' && b[10] != b' ') {
        return None;
    }
    if b[13] != b':' || b[16] != b':' {
        return None;
    }
    let year = try_parse_uint64(s.get(0..4)?)?;
    if !(1677..=2262).contains(&year) {
        return None;
    }
    let month = try_parse_uint64(s.get(5..7)?)?;
    let day = try_parse_uint64(s.get(8..10)?)?;
    let hour = try_parse_uint64(s.get(11..13)?)?;
    let minute = try_parse_uint64(s.get(14..16)?)?;
    let second = try_parse_uint64(s.get(17..19)?)?;
    let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?;
    let dt = date.and_hms_opt(hour as u32, minute as u32, second as u32)?;
    let secs = dt.and_utc().timestamp();
    if secs <= i64::MIN / NSECS_PER_SECOND || secs >= i64::MAX / NSECS_PER_SECOND {
        return None;
    }
    Some((secs, &s[19..]))
}

fn try_parse_timezone_offset(s: &str) -> Option<i64> {
    let n = s.find(':')?;
    let hours = try_parse_uint64(&s[..n])?;
    let minutes = try_parse_uint64(&s[n + 1..])?;
    if hours > 24 || minutes > 60 {
        return None;
    }
    Some(hours as i64 * NSECS_PER_HOUR + minutes as i64 * NSECS_PER_MINUTE)
}

/// Parses RFC3339 timestamps with an optional fraction and timezone offset.
///
/// A timestamp without an offset is treated as UTC.
pub fn try_parse_timestamp_rfc3339_nano(s: &str) -> Option<i64> {
    let (secs, mut tail) = try_parse_timestamp_secs(s)?;
    let mut nsecs = secs * NSECS_PER_SECOND;

    if let Some(n) = tail.find(&['Z', '+', '-'][..]) {
        let offset_str = &tail[n + 1..];
        match tail.as_bytes()[n] {
            b'Z' => {
                if !offset_str.is_empty() {
                    return None;
                }
            }
            sign => {
                let offset = try_parse_timezone_offset(offset_str)?;
                nsecs -= if sign == b'-' { -offset } else { offset };
            }
        }
        tail = &tail[..n];
    }

    if tail.is_empty() {
        return Some(nsecs);
    }
    let frac = tail.strip_prefix('.')?;
    if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n = try_parse_uint64(frac)?;
    Some(nsecs + (n * 10u64.pow(9 - frac.len() as u32)) as i64)
}

/// Parses exactly `YYYY-MM-DDThh:mm:ss.sssZ`.
pub fn try_parse_timestamp_iso8601(s: &str) -> Option<i64> {
    if s.len() != "2006-01-02T15:04:05.000Z".len() {
        return None;
    }
    let (secs, tail) = try_parse_timestamp_secs(s)?;
    let b = tail.as_bytes();
    if b[0] != b'.' || b[4] != b'Z' {
        return None;
    }
    let msecs_str = &tail[1..4];
    if !msecs_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let msecs = try_parse_uint64(msecs_str)?;
    Some(secs * NSECS_PER_SECOND + msecs as i64 * NSECS_PER_MILLISECOND)
}

/// Returns the calendar fields of a timestamp, used by month/year bucketing.
pub fn timestamp_to_ymd(nsecs: i64) -> (i32, u32, u32) {
    let dt = datetime_from_nsecs(nsecs);
    (dt.year(), dt.month(), dt.day())
}

/// Returns nanoseconds since midnight UTC.
pub fn timestamp_day_offset(nsecs: i64) -> i64 {
    let dt = datetime_from_nsecs(nsecs);
    dt.num_seconds_from_midnight() as i64 * NSECS_PER_SECOND + nsecs.rem_euclid(NSECS_PER_SECOND)
}

/// Returns the unix timestamp in nanoseconds for midnight UTC of the given date.
pub fn timestamp_from_ymd(year: i32, month: u32, day: u32) -> Option<i64> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let secs = date.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
    secs.checked_mul(NSECS_PER_SECOND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_parse_uint64() {
        assert_eq!(try_parse_uint64("0"), Some(0));
        assert_eq!(try_parse_uint64("1_000"), Some(1000));
        assert_eq!(try_parse_uint64("18446744073709551615"), Some(u64::MAX));
        assert_eq!(try_parse_uint64("18446744073709551616"), None);
        assert_eq!(try_parse_uint64(""), None);
        assert_eq!(try_parse_uint64("_"), None);
        assert_eq!(try_parse_uint64("-1"), None);
        assert_eq!(try_parse_uint64("12a"), None);
    }

    #[test]
    fn test_try_parse_int64() {
        assert_eq!(try_parse_int64("-5"), Some(-5));
        assert_eq!(try_parse_int64("-9223372036854775808"), Some(i64::MIN));
        assert_eq!(try_parse_int64("9223372036854775808"), None);
        assert_eq!(try_parse_int64("-"), None);
    }

    #[test]
    fn test_try_parse_float64() {
        assert_eq!(try_parse_float64("1.5"), Some(1.5));
        assert_eq!(try_parse_float64("-0.25"), Some(-0.25));
        assert_eq!(try_parse_float64("42"), Some(42.0));
        assert_eq!(try_parse_float64(".5"), None);
        assert_eq!(try_parse_float64("5."), None);
        assert_eq!(try_parse_float64("1e5"), None);
        assert_eq!(try_parse_float64("123456789012345678901"), None);
    }

    #[test]
    fn test_float64_string() {
        assert_eq!(float64_string(1.5), "1.5");
        assert_eq!(float64_string(100.0), "100");
        assert_eq!(float64_string(-0.001), "-0.001");
        assert_eq!(float64_string(f64::INFINITY), "+Inf");
        assert_eq!(float64_string(f64::NEG_INFINITY), "-Inf");
    }

    #[test]
    fn test_ipv4() {
        assert_eq!(try_parse_ipv4("1.2.3.4"), Some(0x01020304));
        assert_eq!(try_parse_ipv4("255.255.255.255"), Some(u32::MAX));
        assert_eq!(try_parse_ipv4("1.2.3"), None);
        assert_eq!(try_parse_ipv4("1.2.3.4.5"), None);
        assert_eq!(try_parse_ipv4("1.2.3.256"), None);
        assert_eq!(try_parse_ipv4("1..2.3"), None);
        assert_eq!(ipv4_string(0x7f000001), "127.0.0.1");
        assert_eq!(try_parse_ipv4_mask("/24"), Some(256));
        assert_eq!(try_parse_ipv4_mask("/33"), None);
        assert_eq!(
            try_parse_ipv4_cidr("10.1.2.3/8"),
            Some((0x0a000000, 0x0affffff))
        );
        assert_eq!(try_parse_ipv4_cidr("0.0.0.0/0"), Some((0, u32::MAX)));
    }

    #[test]
    fn test_bytes() {
        assert_eq!(try_parse_bytes("1KiB"), Some(1024));
        assert_eq!(try_parse_bytes("1.5KB"), Some(1500));
        assert_eq!(try_parse_bytes("2MB"), Some(2_000_000));
        assert_eq!(try_parse_bytes("1G"), Some(1_000_000_000));
        assert_eq!(try_parse_bytes("-10B"), Some(-10));
        assert_eq!(try_parse_bytes("1.5"), None);
        assert_eq!(try_parse_bytes("3X"), None);
    }

    #[test]
    fn test_duration() {
        assert_eq!(try_parse_duration("5m"), Some(5 * NSECS_PER_MINUTE));
        assert_eq!(
            try_parse_duration("1h30m"),
            Some(NSECS_PER_HOUR + 30 * NSECS_PER_MINUTE)
        );
        assert_eq!(try_parse_duration("1.5s"), Some(1_500_000_000));
        assert_eq!(try_parse_duration("-2d"), Some(-2 * NSECS_PER_DAY));
        assert_eq!(try_parse_duration("10µs"), Some(10_000));
        assert_eq!(try_parse_duration("1y"), Some(NSECS_PER_YEAR));
        assert_eq!(try_parse_duration("5"), None);
        assert_eq!(try_parse_duration("5x"), None);
    }

    #[test]
    fn test_duration_string() {
        assert_eq!(duration_string(0), "0");
        assert_eq!(duration_string(5 * NSECS_PER_MINUTE), "5m");
        assert_eq!(duration_string(NSECS_PER_WEEK + NSECS_PER_DAY), "1w1d");
        assert_eq!(duration_string(1_500_000_000), "1.5s");
        assert_eq!(duration_string(1_500_000), "1ms500µs");
        assert_eq!(duration_string(-NSECS_PER_HOUR), "-1h");
        for s in ["5m", "1h30m", "1.5s", "3w2d", "250ms"] {
            let nsecs = try_parse_duration(s).unwrap();
            assert_eq!(try_parse_duration(&duration_string(nsecs)), Some(nsecs));
        }
    }

    #[test]
    fn test_timestamp_iso8601() {
        let ts = try_parse_timestamp_iso8601("2024-01-15T10:20:30.123Z").unwrap();
        assert_eq!(timestamp_iso8601_string(ts), "2024-01-15T10:20:30.123Z");
        assert_eq!(try_parse_timestamp_iso8601("2024-01-15T10:20:30Z"), None);
        assert_eq!(try_parse_timestamp_iso8601("2024-01-15T10:20:30.12aZ"), None);
        assert_eq!(try_parse_timestamp_iso8601("2024-13-15T10:20:30.123Z"), None);

        let before_epoch = try_parse_timestamp_iso8601("1969-12-31T23:59:59.500Z").unwrap();
        assert_eq!(before_epoch, -500_000_000);
        assert_eq!(
            timestamp_iso8601_string(before_epoch),
            "1969-12-31T23:59:59.500Z"
        );
    }

    #[test]
    fn test_timestamp_rfc3339_nano() {
        assert_eq!(try_parse_timestamp_rfc3339_nano("1970-01-01T00:00:00Z"), Some(0));
        assert_eq!(
            try_parse_timestamp_rfc3339_nano("1970-01-01T00:00:01.5Z"),
            Some(1_500_000_000)
        );
        assert_eq!(
            try_parse_timestamp_rfc3339_nano("1970-01-01T02:00:00+02:00"),
            Some(0)
        );
        assert_eq!(
            try_parse_timestamp_rfc3339_nano("1970-01-01 00:00:00.000000001"),
            Some(1)
        );
        assert_eq!(try_parse_timestamp_rfc3339_nano("1970-01-01T00:00:00Zx"), None);
        assert_eq!(try_parse_timestamp_rfc3339_nano("1500-01-01T00:00:00Z"), None);
        assert_eq!(timestamp_rfc3339nano_string(1_500_000_000), "1970-01-01T00:00:01.5Z");
        assert_eq!(timestamp_rfc3339nano_string(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_calendar_helpers() {
        let ts = try_parse_timestamp_rfc3339_nano("2024-02-29T12:00:00Z").unwrap();
        assert_eq!(timestamp_to_ymd(ts), (2024, 2, 29));
        assert_eq!(timestamp_day_offset(ts), 12 * NSECS_PER_HOUR);
        assert_eq!(timestamp_from_ymd(2024, 2, 29), Some(ts - 12 * NSECS_PER_HOUR));
    }

    #[test]
    fn test_try_parse_number() {
        assert_eq!(try_parse_number("12"), Some(12.0));
        assert_eq!(try_parse_number("1KB"), Some(1000.0));
        assert_eq!(try_parse_number("1s"), Some(1e9));
        assert_eq!(try_parse_number("-inf"), Some(f64::NEG_INFINITY));
        assert_eq!(try_parse_number("abc"), None);
    }
}
