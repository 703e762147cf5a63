//! JSON-lines ingestion.
//!
//! Every line holds one JSON object. Nested objects are flattened into dotted
//! field names, arrays are kept as JSON text and `null` fields are skipped.
//! `_time` may be an RFC3339 string or a number of seconds since the epoch;
//! entries without a usable `_time` get the ingestion time.

use anyhow::{bail, Context, Result};
use logstore_core::values::try_parse_timestamp_rfc3339_nano;
use logstore_core::{Field, TenantId, TIME_FIELD_NAME};
use logstore_storage::{LogRows, StorageConfig};
use serde_json::{Map, Value};
use std::io::BufRead;
use std::path::Path;
use tracing::warn;

/// Entries per ingested batch, and so per part.
pub const ROWS_PER_BATCH: usize = 100_000;

/// Parses `account:project`; a bare number is an account id.
pub fn parse_tenant(s: &str) -> Result<TenantId> {
    let (account, project) = s.split_once(':').unwrap_or((s, "0"));
    let account_id = account
        .parse()
        .with_context(|| format!("invalid account id in tenant {s:?}"))?;
    let project_id = project
        .parse()
        .with_context(|| format!("invalid project id in tenant {s:?}"))?;
    Ok(TenantId::new(account_id, project_id))
}

/// Reads the JSON-lines file at `path`, calling `flush` for every full batch.
///
/// Returns the number of entries read.
pub fn read_json_lines(
    path: &Path,
    config: &StorageConfig,
    tenant_id: TenantId,
    stream_fields: &[String],
    mut flush: impl FnMut(LogRows) -> Result<()>,
) -> Result<usize> {
    let file = std::fs::File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let reader = std::io::BufReader::new(file);
    let stream_fields: Vec<&str> = stream_fields.iter().map(String::as_str).collect();
    let now = now_nanos();

    let mut lr = LogRows::new(config);
    let mut entries = 0;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("cannot read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let (timestamp, fields) = match parse_line(&line) {
            Ok(v) => v,
            Err(err) => {
                warn!(path = %path.display(), line = line_no + 1, error = %err, "Skipping invalid JSON line");
                continue;
            }
        };
        lr.must_add(tenant_id, timestamp.unwrap_or(now), fields, &stream_fields);
        entries += 1;
        if lr.len() >= ROWS_PER_BATCH {
            flush(std::mem::replace(&mut lr, LogRows::new(config)))?;
        }
    }
    if !lr.is_empty() {
        flush(lr)?;
    }
    Ok(entries)
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Converts a JSON line into the entry timestamp and its fields.
fn parse_line(line: &str) -> Result<(Option<i64>, Vec<Field>)> {
    let obj: Map<String, Value> = match serde_json::from_str(line).context("cannot parse JSON")? {
        Value::Object(obj) => obj,
        other => bail!("expecting JSON object; got {other}"),
    };
    let mut fields = Vec::with_capacity(obj.len());
    flatten_object("", obj, &mut fields);

    let mut timestamp = None;
    if let Some(pos) = fields.iter().position(|f| f.name == TIME_FIELD_NAME) {
        let f = fields.remove(pos);
        timestamp = parse_timestamp(&f.value);
        if timestamp.is_none() {
            warn!(value = %f.value, "Cannot parse _time; using the ingestion time");
        }
    }
    Ok((timestamp, fields))
}

fn flatten_object(prefix: &str, obj: Map<String, Value>, dst: &mut Vec<Field>) {
    for (key, value) in obj {
        let name = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Null => {}
            Value::String(s) => dst.push(Field::new(name, s)),
            Value::Object(obj) => flatten_object(&name, obj, dst),
            other => dst.push(Field::new(name, other.to_string())),
        }
    }
}

fn parse_timestamp(s: &str) -> Option<i64> {
    if let Some(ts) = try_parse_timestamp_rfc3339_nano(s) {
        return Some(ts);
    }
    let secs: f64 = s.parse().ok()?;
    if !secs.is_finite() {
        return None;
    }
    Some((secs * 1e9).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_tenant() {
        assert_eq!(parse_tenant("12:34").unwrap(), TenantId::new(12, 34));
        assert_eq!(parse_tenant("7").unwrap(), TenantId::new(7, 0));
        assert!(parse_tenant("a:b").is_err());
    }

    #[test]
    fn test_parse_line() {
        let (ts, fields) =
            parse_line(r#"{"_time":"2024-01-02T03:04:05Z","_msg":"hello","req":{"id":5,"ok":true},"tags":["a"],"x":null}"#)
                .unwrap();
        assert_eq!(ts, Some(1_704_164_645_000_000_000));
        let pairs: Vec<(&str, &str)> = fields.iter().map(|f| (f.name.as_str(), f.value.as_str())).collect();
        assert_eq!(
            pairs,
            vec![("_msg", "hello"), ("req.id", "5"), ("req.ok", "true"), ("tags", r#"["a"]"#)]
        );

        let (ts, _) = parse_line(r#"{"_time":1.5}"#).unwrap();
        assert_eq!(ts, Some(1_500_000_000));
        assert!(parse_line("[1, 2]").is_err());
    }

    #[test]
    fn test_read_json_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"_msg":"one","host":"a"}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"_msg":"two","host":"b"}}"#).unwrap();

        let mut batches = Vec::new();
        let entries = read_json_lines(
            file.path(),
            &StorageConfig::default(),
            TenantId::new(0, 0),
            &["host".to_string()],
            |lr| {
                batches.push(lr);
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(entries, 2);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0].streams().len(), 2);
    }
}
