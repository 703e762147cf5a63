//! Ingestion batches.
//!
//! [`LogRows`] collects log entries, assigns them to streams and turns them
//! into an [`InMemoryPart`]. Entries outside the retention window are dropped
//! at [`LogRows::must_add`].

use crate::block_stream_writer::BlockStreamWriter;
use crate::config::StorageConfig;
use crate::consts::{MAX_ROWS_PER_BLOCK, MAX_UNCOMPRESSED_BLOCK_SIZE};
use crate::part::InMemoryPart;
use crate::rows::uncompressed_row_size_bytes;
use logstore_core::{is_msg_field_name, Field, StreamId, StreamTags, TenantId, TIME_FIELD_NAME};
use logstore_observability::metrics::{ROWS_DROPPED_TOTAL, ROWS_INGESTED_TOTAL};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// A single ingested log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub stream_id: StreamId,
    pub timestamp: i64,
    pub fields: Vec<Field>,
}

/// Stream identity recorded for every stream seen in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub tenant_id: TenantId,
    pub tags: StreamTags,
}

/// A batch of log entries waiting to be written as a part.
#[derive(Debug, Clone, Default)]
pub struct LogRows {
    rows: Vec<LogRow>,
    streams: HashMap<StreamId, StreamInfo>,
    min_allowed_timestamp: i64,
    max_allowed_timestamp: i64,
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

impl LogRows {
    /// Creates a batch accepting timestamps within the retention window around now.
    pub fn new(config: &StorageConfig) -> Self {
        let now = now_nanos();
        Self::with_time_bounds(
            now.saturating_sub(config.retention.as_nanos() as i64),
            now.saturating_add(config.future_retention.as_nanos() as i64),
        )
    }

    pub fn with_time_bounds(min_allowed_timestamp: i64, max_allowed_timestamp: i64) -> Self {
        Self {
            rows: Vec::new(),
            streams: HashMap::new(),
            min_allowed_timestamp,
            max_allowed_timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[LogRow] {
        &self.rows
    }

    pub fn streams(&self) -> &HashMap<StreamId, StreamInfo> {
        &self.streams
    }

    /// Adds a log entry.
    ///
    /// Fields named in `stream_fields` form the stream tags. Empty values are
    /// dropped and `_msg` is stored under the empty name.
    pub fn must_add(&mut self, tenant_id: TenantId, timestamp: i64, fields: Vec<Field>, stream_fields: &[&str]) {
        if timestamp < self.min_allowed_timestamp {
            warn!(
                timestamp,
                min_allowed_timestamp = self.min_allowed_timestamp,
                "skipping log entry with too small timestamp; it is outside the retention window"
            );
            ROWS_DROPPED_TOTAL.with_label_values(&["too_small_timestamp"]).inc();
            return;
        }
        if timestamp > self.max_allowed_timestamp {
            warn!(
                timestamp,
                max_allowed_timestamp = self.max_allowed_timestamp,
                "skipping log entry with too big timestamp; it is too far in the future"
            );
            ROWS_DROPPED_TOTAL.with_label_values(&["too_big_timestamp"]).inc();
            return;
        }

        let mut tags = StreamTags::new();
        for name in stream_fields {
            if let Some(f) = fields.iter().find(|f| f.name == *name) {
                tags.add(f.name.clone(), f.value.clone());
            }
        }
        let stream_id = tags.stream_id(tenant_id);
        self.streams
            .entry(stream_id)
            .or_insert_with(|| StreamInfo { tenant_id, tags });

        let fields = fields
            .into_iter()
            .filter(|f| !f.value.is_empty() && f.name != TIME_FIELD_NAME)
            .map(|mut f| {
                if is_msg_field_name(&f.name) {
                    f.name.clear();
                }
                f
            })
            .collect();
        self.rows.push(LogRow {
            stream_id,
            timestamp,
            fields,
        });
        ROWS_INGESTED_TOTAL.inc();
    }

    /// Orders rows by `(stream_id, timestamp)`, keeping insertion order for ties.
    pub fn sort(&mut self) {
        self.rows.sort_by_key(|r| (r.stream_id, r.timestamp));
    }

    /// Sorts the batch and writes it as a new part.
    pub fn to_in_memory_part(&mut self) -> InMemoryPart {
        self.sort();
        let mut bsw = BlockStreamWriter::new();
        let mut timestamps = Vec::new();
        let mut rows = Vec::new();
        let mut size = 0;
        let mut current = None;
        for r in &self.rows {
            if current != Some(r.stream_id)
                || size >= MAX_UNCOMPRESSED_BLOCK_SIZE
                || timestamps.len() as u64 >= MAX_ROWS_PER_BLOCK
            {
                if let Some(sid) = current {
                    bsw.write_rows(sid, &timestamps, &rows);
                }
                timestamps.clear();
                rows.clear();
                size = 0;
                current = Some(r.stream_id);
            }
            size += uncompressed_row_size_bytes(&r.fields);
            timestamps.push(r.timestamp);
            rows.push(r.fields.clone());
        }
        if let Some(sid) = current {
            bsw.write_rows(sid, &timestamps, &rows);
        }
        bsw.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_stream_reader::BlockStreamReader;
    use crate::part::Part;
    use crate::rows::Rows;
    use std::sync::Arc;

    fn fields(host: &str, msg: &str) -> Vec<Field> {
        vec![Field::new("host", host), Field::new("_msg", msg), Field::new("empty", "")]
    }

    #[test]
    fn test_must_add_assigns_streams() {
        let mut lr = LogRows::with_time_bounds(0, 1000);
        let tenant = TenantId::new(0, 0);
        lr.must_add(tenant, 10, fields("a", "x"), &["host"]);
        lr.must_add(tenant, 5, fields("b", "y"), &["host"]);
        lr.must_add(tenant, 7, fields("a", "z"), &["host"]);
        assert_eq!(lr.len(), 3);
        assert_eq!(lr.streams().len(), 2);

        let row = &lr.rows()[0];
        assert_eq!(row.fields, vec![Field::new("host", "a"), Field::new("", "x")]);
        let info = &lr.streams()[&row.stream_id];
        assert_eq!(info.tags.get("host"), Some("a"));

        lr.sort();
        let sid_a = lr.rows().iter().find(|r| r.timestamp == 10).map(|r| r.stream_id);
        let a_ts: Vec<i64> = lr
            .rows()
            .iter()
            .filter(|r| Some(r.stream_id) == sid_a)
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(a_ts, vec![7, 10]);
    }

    #[test]
    fn test_retention_drops() {
        let mut lr = LogRows::with_time_bounds(100, 200);
        let tenant = TenantId::default();
        lr.must_add(tenant, 99, fields("a", "old"), &[]);
        lr.must_add(tenant, 201, fields("a", "future"), &[]);
        lr.must_add(tenant, 150, fields("a", "ok"), &[]);
        assert_eq!(lr.len(), 1);
        assert_eq!(lr.rows()[0].timestamp, 150);
    }

    #[test]
    fn test_to_in_memory_part() {
        let mut lr = LogRows::with_time_bounds(i64::MIN, i64::MAX);
        let tenant = TenantId::default();
        for i in 0..20 {
            lr.must_add(tenant, 100 - i, fields(&format!("h{}", i % 4), "msg"), &["host"]);
        }
        let part = Arc::new(Part::open("ingested", lr.to_in_memory_part()).unwrap());
        assert_eq!(part.header().rows_count, 20);
        assert_eq!(part.header().blocks_count, 4);

        let mut bsr = BlockStreamReader::new(part);
        while bsr.next_block() {
            let mut rows = Rows::new();
            bsr.block_data().unmarshal_rows(&mut rows).unwrap();
            assert!(rows.timestamps.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
