//! Block Format Benchmarks
//!
//! ## What We Benchmark
//!
//! ### 1. Block header codec (`bench_block_header`)
//! - Marshal and unmarshal of a single block header in both format versions
//!
//! ### 2. Part building (`bench_part_write`)
//! - Rows/second for turning rows into blocks and writing a part
//!
//! ### 3. Merging (`bench_merge`)
//! - Rows/second for merging parts with interleaved timestamps
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench -p logstore-storage --bench block_bench
//! cargo bench -p logstore-storage --bench block_bench merge
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use logstore_core::{Field, StreamId};
use logstore_storage::{
    merge_block_streams, BlockHeader, BlockStreamReader, BlockStreamWriter, InMemoryPart, Part,
    TimestampsHeader,
};
use rand::Rng;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn sample_rows(count: usize, start: i64, step: i64) -> (Vec<i64>, Vec<Vec<Field>>) {
    let mut rng = rand::thread_rng();
    let levels = ["info", "warn", "error"];
    let mut timestamps = Vec::with_capacity(count);
    let mut rows = Vec::with_capacity(count);
    for i in 0..count {
        timestamps.push(start + i as i64 * step);
        rows.push(vec![
            Field::new("", format!("GET /api/v1/items/{} completed", rng.gen_range(0..10_000))),
            Field::new("level", levels[rng.gen_range(0..levels.len())]),
            Field::new("duration_ms", rng.gen_range(0..5000u32).to_string()),
            Field::new("host", "web-1"),
        ]);
    }
    (timestamps, rows)
}

fn build_part(streams: u128, rows_per_stream: usize, start: i64, step: i64) -> InMemoryPart {
    let mut bsw = BlockStreamWriter::new();
    for sid in 0..streams {
        let (timestamps, rows) = sample_rows(rows_per_stream, start, step);
        bsw.write_rows(StreamId(sid), &timestamps, &rows);
    }
    bsw.finalize()
}

fn bench_block_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_header");
    let bh = BlockHeader {
        stream_id: StreamId(0x1234_5678_9abc_def0),
        uncompressed_size_bytes: 1_234_567,
        rows_count: 8192,
        timestamps_header: TimestampsHeader {
            block_offset: 4096,
            block_size: 777,
            min_timestamp: 1_700_000_000_000_000_000,
            max_timestamp: 1_700_000_060_000_000_000,
            marshal_type: 1,
        },
        columns_header_index_offset: 100,
        columns_header_index_size: 40,
        columns_header_offset: 2000,
        columns_header_size: 300,
    };

    for version in [0u32, 1] {
        group.bench_with_input(BenchmarkId::new("marshal", version), &version, |b, &v| {
            let mut buf = Vec::with_capacity(128);
            b.iter(|| {
                buf.clear();
                bh.marshal(&mut buf, v);
                black_box(buf.len());
            });
        });

        let mut data = Vec::new();
        bh.marshal(&mut data, version);
        group.bench_with_input(BenchmarkId::new("unmarshal", version), &version, |b, &v| {
            b.iter(|| {
                let mut src = data.as_slice();
                black_box(BlockHeader::unmarshal(&mut src, v).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_part_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("part_write");
    for rows in [1_000usize, 10_000] {
        let (timestamps, data) = sample_rows(rows, 0, 1_000_000);
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| {
                let mut bsw = BlockStreamWriter::new();
                bsw.write_rows(StreamId(1), &timestamps, &data);
                black_box(bsw.finalize());
            });
        });
    }
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    let a = build_part(10, 1_000, 0, 2);
    let b = build_part(10, 1_000, 1, 2);
    group.throughput(Throughput::Elements(20_000));
    group.bench_function("interleaved", |bench| {
        bench.iter(|| {
            let readers = vec![
                BlockStreamReader::new(Arc::new(Part::open("a", a.clone()).unwrap())),
                BlockStreamReader::new(Arc::new(Part::open("b", b.clone()).unwrap())),
            ];
            let mut bsw = BlockStreamWriter::new();
            let stats = merge_block_streams(&mut bsw, readers, None, &AtomicBool::new(false));
            black_box(stats);
            black_box(bsw.finalize());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_block_header, bench_part_write, bench_merge);
criterion_main!(benches);
