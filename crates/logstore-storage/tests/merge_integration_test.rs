//! Merge Integration Tests
//!
//! These tests build parts through the public ingestion API, merge them and
//! read the result back block by block.

use logstore_core::{Field, StreamId, TenantId};
use logstore_storage::{
    merge_block_streams, BlockStreamReader, BlockStreamWriter, InMemoryPart, LogRows, Part, Rows,
    RowDropFilter,
};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Helper to build a part from `(host, timestamp, message)` entries
fn ingest(entries: &[(&str, i64, &str)]) -> InMemoryPart {
    let mut lr = LogRows::with_time_bounds(i64::MIN, i64::MAX);
    for (host, ts, msg) in entries {
        lr.must_add(
            TenantId::default(),
            *ts,
            vec![Field::new("host", *host), Field::new("_msg", *msg)],
            &["host"],
        );
    }
    lr.to_in_memory_part()
}

fn reader(name: &str, data: InMemoryPart) -> BlockStreamReader {
    BlockStreamReader::new(Arc::new(Part::open(name, data).expect("part must open")))
}

/// Helper to read all rows of a part grouped by stream
fn read_rows(data: InMemoryPart) -> BTreeMap<StreamId, Rows> {
    let mut bsr = reader("merged", data);
    let mut out: BTreeMap<StreamId, Rows> = BTreeMap::new();
    let mut last_key = None;
    while bsr.next_block() {
        let bd = bsr.block_data();
        let key = (bd.stream_id, bd.min_timestamp());
        if let Some(last) = last_key {
            assert!(last <= key, "blocks must be sorted by (stream_id, min_timestamp)");
        }
        last_key = Some(key);
        let rows = out.entry(bd.stream_id).or_default();
        bd.unmarshal_rows(rows).unwrap();
    }
    out
}

fn merge(parts: Vec<(&str, InMemoryPart)>, drop_filter: Option<&dyn RowDropFilter>) -> InMemoryPart {
    let readers = parts.into_iter().map(|(name, data)| reader(name, data)).collect();
    let mut bsw = BlockStreamWriter::new();
    let stats = merge_block_streams(&mut bsw, readers, drop_filter, &AtomicBool::new(false));
    assert!(!stats.stopped);
    bsw.finalize()
}

#[test]
fn test_merge_two_parts_same_stream() {
    let a = ingest(&[("h1", 100, "a1"), ("h1", 200, "a2"), ("h1", 300, "a3")]);
    let b = ingest(&[("h1", 150, "b1"), ("h1", 250, "b2")]);
    let merged = merge(vec![("a", a), ("b", b)], None);

    let part = Part::open("merged", merged.clone()).unwrap();
    assert_eq!(part.header().rows_count, 5);
    assert_eq!(part.header().min_timestamp, 100);
    assert_eq!(part.header().max_timestamp, 300);

    let rows = read_rows(merged);
    assert_eq!(rows.len(), 1);
    let rows = rows.values().next().unwrap();
    assert_eq!(rows.timestamps, vec![100, 150, 200, 250, 300]);
    let msgs: Vec<&str> = rows
        .rows
        .iter()
        .map(|r| r.iter().find(|f| f.name.is_empty()).unwrap().value.as_str())
        .collect();
    assert_eq!(msgs, vec!["a1", "b1", "a2", "b2", "a3"]);
}

#[test]
fn test_merge_many_parts_preserves_rows() {
    let hosts = ["h1", "h2", "h3"];
    let mut parts = Vec::new();
    let mut total = 0;
    for p in 0..5i64 {
        let entries: Vec<(&str, i64, String)> = (0..50i64)
            .map(|i| (hosts[(i % 3) as usize], i * 10 + p, format!("part {p} row {i}")))
            .collect();
        let refs: Vec<(&str, i64, &str)> = entries.iter().map(|(h, t, m)| (*h, *t, m.as_str())).collect();
        total += refs.len();
        parts.push(ingest(&refs));
    }
    let named = parts.into_iter().map(|p| ("p", p)).collect();
    let rows = read_rows(merge(named, None));

    assert_eq!(rows.len(), 3);
    assert_eq!(rows.values().map(|r| r.len()).sum::<usize>(), total);
    for r in rows.values() {
        assert!(r.timestamps.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[test]
fn test_merge_is_idempotent_for_single_part() {
    let data = ingest(&[("h1", 1, "x"), ("h2", 2, "y")]);
    let before = read_rows(data.clone());
    let after = read_rows(merge(vec![("single", data)], None));
    assert_eq!(before, after);
}

struct DropStream(StreamId);

impl RowDropFilter for DropStream {
    fn match_stream_id(&self, stream_id: StreamId) -> bool {
        stream_id == self.0
    }

    fn match_time_range(&self, _min_timestamp: i64, _max_timestamp: i64) -> bool {
        true
    }

    fn drops_whole_block(&self) -> bool {
        true
    }

    fn drop_rows(&self, _stream_id: StreamId, rows: &mut Rows) -> usize {
        let n = rows.len();
        rows.reset();
        n
    }
}

#[test]
fn test_merge_drops_whole_stream() {
    let data = ingest(&[("h1", 1, "x"), ("h2", 2, "y"), ("h1", 3, "z")]);
    let streams = read_rows(data.clone());
    let (&h1, _) = streams.iter().find(|(_, r)| r.len() == 2).unwrap();

    let filter = DropStream(h1);
    let rows = read_rows(merge(vec![("p", data)], Some(&filter)));
    assert_eq!(rows.len(), 1);
    assert!(!rows.contains_key(&h1));
}
