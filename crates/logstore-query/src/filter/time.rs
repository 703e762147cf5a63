//! Time literals of `_time` filters.
//!
//! A literal may be `now`, `now-1h`, a unix timestamp in seconds,
//! milliseconds, microseconds or nanoseconds (picked by digit count), or an
//! RFC3339 prefix such as `2024`, `2024-05`, `2024-05-20T10` with an optional
//! `Z` or `±hh:mm` suffix. A literal without a timezone is UTC.
//!
//! The end of an inclusive range covers the whole period the literal names:
//!
//! | Literal | Inclusive end |
//! |---------|---------------|
//! | `2024` | last nanosecond of 2024 |
//! | `2024-05` | last nanosecond of May 2024 |
//! | `2024-05-20` | last nanosecond of the day |
//! | `2024-05-20T10` | `10:59:59.999999999` |
//! | `2024-05-20T10:20` | `10:20:59.999999999` |
//! | `2024-05-20T10:20:30` | `10:20:30.999999999` |
//! | `2024-05-20T10:20:30.123` | `10:20:30.123999999` |
//! | `1716200000` | one second minus 1ns later |

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use logstore_core::values::{
    try_parse_duration, NSECS_PER_DAY, NSECS_PER_HOUR, NSECS_PER_MICROSECOND, NSECS_PER_MILLISECOND,
    NSECS_PER_MINUTE, NSECS_PER_SECOND,
};

/// Subtracts `b` from `a`, saturating at the i64 bounds. The bounds themselves stand for infinity.
pub fn sub_no_overflow(a: i64, b: i64) -> i64 {
    if a == i64::MIN || a == i64::MAX {
        return a;
    }
    a.saturating_sub(b)
}

/// Returns true if `s` starts with a 4-digit year.
pub fn starts_with_year(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() < 4 || !b[..4].iter().all(u8::is_ascii_digit) {
        return false;
    }
    match b.get(4) {
        None => true,
        Some(c) => matches!(c, b'-' | b'+' | b'Z' | b'z'),
    }
}

fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Removes a trailing `Z` or `±hh:mm`, returning the rest and the offset in nanoseconds east of UTC.
fn split_timezone(s: &str) -> (&str, i64) {
    if let Some(rest) = s.strip_suffix(['Z', 'z']) {
        return (rest, 0);
    }
    if s.len() < 6 || !s.is_char_boundary(s.len() - 6) {
        return (s, 0);
    }
    let (rest, tz) = s.split_at(s.len() - 6);
    let b = tz.as_bytes();
    if (b[0] != b'-' && b[0] != b'+') || b[3] != b':' {
        return (s, 0);
    }
    let (Ok(h), Ok(m)) = (tz[1..3].parse::<i64>(), tz[4..6].parse::<i64>()) else {
        return (s, 0);
    };
    let offset = h * NSECS_PER_HOUR + m * NSECS_PER_MINUTE;
    (rest, if b[0] == b'-' { -offset } else { offset })
}

pub(crate) fn parse_unix_timestamp(s: &str) -> Option<i64> {
    if is_all_digits(s) {
        let n: i64 = s.parse().ok()?;
        return match s.len() {
            0..=10 => n.checked_mul(NSECS_PER_SECOND),
            11..=13 => n.checked_mul(NSECS_PER_MILLISECOND),
            14..=16 => n.checked_mul(NSECS_PER_MICROSECOND),
            _ => Some(n),
        };
    }
    let (secs, frac) = s.split_once('.')?;
    if !is_all_digits(secs) || !is_all_digits(frac) || frac.len() > 9 {
        return None;
    }
    let secs: i64 = secs.parse().ok()?;
    let frac_nsecs: i64 = format!("{frac:0<9}").parse().ok()?;
    secs.checked_mul(NSECS_PER_SECOND)?.checked_add(frac_nsecs)
}

fn parse_rfc3339_prefix(s: &str) -> Option<i64> {
    let (s, tz_offset) = split_timezone(s);
    let b = s.as_bytes();
    let num = |range: std::ops::Range<usize>| -> Option<u32> {
        let part = s.get(range)?;
        if !is_all_digits(part) {
            return None;
        }
        part.parse().ok()
    };
    let year = num(0..4)? as i32;
    let mut month = 1;
    let mut day = 1;
    let mut hour = 0;
    let mut minute = 0;
    let mut second = 0;
    let mut nanos = 0i64;
    if b.len() > 4 {
        if b[4] != b'-' || b.len() < 7 {
            return None;
        }
        month = num(5..7)?;
    }
    if b.len() > 7 {
        if b[7] != b'-' || b.len() < 10 {
            return None;
        }
        day = num(8..10)?;
    }
    if b.len() > 10 {
        if (b[10] != b'T' && b[10] != b' ') || b.len() < 13 {
            return None;
        }
        hour = num(11..13)?;
    }
    if b.len() > 13 {
        if b[13] != b':' || b.len() < 16 {
            return None;
        }
        minute = num(14..16)?;
    }
    if b.len() > 16 {
        if b[16] != b':' || b.len() < 19 {
            return None;
        }
        second = num(17..19)?;
    }
    if b.len() > 19 {
        let frac = s.get(20..)?;
        if b[19] != b'.' || !is_all_digits(frac) || frac.len() > 9 {
            return None;
        }
        nanos = format!("{frac:0<9}").parse().ok()?;
    }
    let dt = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    let secs = dt.and_utc().timestamp();
    let nsecs = secs.checked_mul(NSECS_PER_SECOND)?.checked_add(nanos)?;
    Some(nsecs - tz_offset)
}

/// Parses a time literal relative to `now`.
pub fn parse_time_at(s: &str, now: i64) -> Option<i64> {
    if s.eq_ignore_ascii_case("now") {
        return Some(now);
    }
    if let Some(rest) = s.strip_prefix("now") {
        if let Some(d) = rest.strip_prefix('-') {
            return Some(sub_no_overflow(now, try_parse_duration(d)?));
        }
        if let Some(d) = rest.strip_prefix('+') {
            return Some(now.saturating_add(try_parse_duration(d)?));
        }
        return None;
    }
    if s.len() != 4 {
        if let Some(ts) = parse_unix_timestamp(s) {
            return Some(ts);
        }
    }
    if starts_with_year(s) {
        return parse_rfc3339_prefix(s);
    }
    None
}

fn datetime(t: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(t.div_euclid(NSECS_PER_SECOND), t.rem_euclid(NSECS_PER_SECOND) as u32)
}

fn nanos(dt: DateTime<Utc>) -> Option<i64> {
    dt.timestamp_nanos_opt()
}

/// Returns the last nanosecond of the period named by the literal `s` starting at `t`.
pub fn adjust_end_timestamp(t: i64, s: &str) -> i64 {
    let (s, _) = split_timezone(s);

    let step = if s.len() == 4 {
        let end = datetime(t).and_then(|dt| dt.with_year(dt.year() + 1)).and_then(nanos);
        return end.map_or(t, |end| end - 1);
    } else if is_all_digits(s) {
        match s.len() {
            0..=10 => NSECS_PER_SECOND,
            11..=13 => NSECS_PER_MILLISECOND,
            14..=16 => NSECS_PER_MICROSECOND,
            _ => 1,
        }
    } else if s.as_bytes().get(4) != Some(&b'-') {
        let Some((secs, frac)) = s.split_once('.') else {
            return t;
        };
        if !is_all_digits(secs) || !is_all_digits(frac) {
            return t;
        }
        match frac.len() {
            3 => NSECS_PER_MILLISECOND,
            6 => NSECS_PER_MICROSECOND,
            _ => 1,
        }
    } else {
        match s.len() {
            7 => {
                let end = datetime(t)
                    .and_then(|dt| dt.checked_add_months(Months::new(1)))
                    .and_then(nanos);
                return end.map_or(t, |end| end - 1);
            }
            10 => NSECS_PER_DAY,
            13 => NSECS_PER_HOUR,
            16 => NSECS_PER_MINUTE,
            19 => NSECS_PER_SECOND,
            23 => NSECS_PER_MILLISECOND,
            26 => NSECS_PER_MICROSECOND,
            _ => 1,
        }
    };
    t.saturating_add(step) - 1
}

/// Parses `hh:mm` into nanoseconds since midnight.
pub fn try_parse_hhmm(s: &str) -> Option<i64> {
    let (h, m) = s.split_once(':')?;
    if h.len() != 2 || m.len() != 2 || !is_all_digits(h) || !is_all_digits(m) {
        return None;
    }
    let h: i64 = h.parse().ok()?;
    let m: i64 = m.parse().ok()?;
    if h > 24 || m > 59 {
        return None;
    }
    Some(h * NSECS_PER_HOUR + m * NSECS_PER_MINUTE)
}

/// Parses a weekday name. Sunday is 0.
pub fn parse_weekday(s: &str) -> Option<i64> {
    Some(match s.to_lowercase().as_str() {
        "sun" | "sunday" => 0,
        "mon" | "monday" => 1,
        "tue" | "tuesday" => 2,
        "wed" | "wednesday" => 3,
        "thu" | "thursday" => 4,
        "fri" | "friday" => 5,
        "sat" | "saturday" => 6,
        _ => return None,
    })
}

/// Returns the weekday of a timestamp. Sunday is 0.
pub fn weekday(ts: i64) -> i64 {
    // 1970-01-01 was a Thursday.
    (ts.div_euclid(NSECS_PER_DAY) + 4).rem_euclid(7)
}

#[cfg(test)]
mod tests {
    use super::*;
    use logstore_core::values::timestamp_from_ymd;

    #[test]
    fn test_parse_time_at() {
        let day = timestamp_from_ymd(2024, 5, 20).unwrap();
        assert_eq!(parse_time_at("2024-05-20", 0), Some(day));
        assert_eq!(parse_time_at("2024-05-20T00:00:00Z", 0), Some(day));
        assert_eq!(parse_time_at("2024-05-20T02:00:00+02:00", 0), Some(day));
        assert_eq!(parse_time_at("2024", 0), timestamp_from_ymd(2024, 1, 1));
        assert_eq!(parse_time_at("2024-05-20T10", 0), Some(day + 10 * NSECS_PER_HOUR));
        assert_eq!(parse_time_at("2024-05-20T00:00:00.5Z", 0), Some(day + NSECS_PER_SECOND / 2));
        assert_eq!(parse_time_at("1716163200", 0), Some(day));
        assert_eq!(parse_time_at("1716163200000", 0), Some(day));
        assert_eq!(parse_time_at("1716163200.25", 0), Some(day + NSECS_PER_SECOND / 4));
        assert_eq!(parse_time_at("now", 42), Some(42));
        assert_eq!(parse_time_at("now-1s", 5 * NSECS_PER_SECOND), Some(4 * NSECS_PER_SECOND));
        assert_eq!(parse_time_at("yesterday", 0), None);
        assert_eq!(parse_time_at("2024-13", 0), None);
    }

    #[test]
    fn test_adjust_end_timestamp() {
        let day = timestamp_from_ymd(2024, 5, 20).unwrap();
        assert_eq!(adjust_end_timestamp(day, "2024-05-20"), day + NSECS_PER_DAY - 1);
        assert_eq!(adjust_end_timestamp(day, "2024-05-20Z"), day + NSECS_PER_DAY - 1);
        assert_eq!(adjust_end_timestamp(day, "2024-05-20T00"), day + NSECS_PER_HOUR - 1);
        assert_eq!(adjust_end_timestamp(day, "2024-05-20T00:00"), day + NSECS_PER_MINUTE - 1);
        assert_eq!(adjust_end_timestamp(day, "2024-05-20T00:00:00"), day + NSECS_PER_SECOND - 1);
        assert_eq!(
            adjust_end_timestamp(day, "2024-05-20T00:00:00.000"),
            day + NSECS_PER_MILLISECOND - 1
        );
        assert_eq!(adjust_end_timestamp(day, "1716163200"), day + NSECS_PER_SECOND - 1);

        let year = timestamp_from_ymd(2024, 1, 1).unwrap();
        assert_eq!(adjust_end_timestamp(year, "2024"), timestamp_from_ymd(2025, 1, 1).unwrap() - 1);
        let month = timestamp_from_ymd(2024, 2, 1).unwrap();
        assert_eq!(adjust_end_timestamp(month, "2024-02"), timestamp_from_ymd(2024, 3, 1).unwrap() - 1);
    }

    #[test]
    fn test_sub_no_overflow() {
        assert_eq!(sub_no_overflow(i64::MIN, 10), i64::MIN);
        assert_eq!(sub_no_overflow(i64::MAX, -10), i64::MAX);
        assert_eq!(sub_no_overflow(i64::MIN + 5, 10), i64::MIN);
        assert_eq!(sub_no_overflow(100, 10), 90);
    }

    #[test]
    fn test_weekday_and_hhmm() {
        assert_eq!(weekday(timestamp_from_ymd(2024, 3, 17).unwrap()), 0);
        assert_eq!(weekday(timestamp_from_ymd(2024, 3, 18).unwrap()), 1);
        assert_eq!(weekday(-1), 3);
        assert_eq!(try_parse_hhmm("08:30"), Some(8 * NSECS_PER_HOUR + 30 * NSECS_PER_MINUTE));
        assert_eq!(try_parse_hhmm("8:30"), None);
        assert_eq!(parse_weekday("Mon"), Some(1));
        assert_eq!(parse_weekday("funday"), None);
    }
}
