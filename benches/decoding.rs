// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Benchmarks for FTDC block decoding and series derivation

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ftdc::bson::DocumentBuilder;
use ftdc::encoder::DEFAULT_SAMPLES_PER_BLOCK;
use ftdc::reader::inflate_payload;
use ftdc::{decode_block, parse_metrics_file, BlockEncoder, FtdcStats, MetricsFileWriter, ReaderConfig};

fn sample(i: i64) -> Vec<u8> {
    let counters = (0..20).fold(DocumentBuilder::new(), |doc, k| {
        // half the counters stay flat so zero runs show up
        let value = if k % 2 == 0 { i * (k + 1) } else { 1000 };
        doc.int64(&format!("c{}", k), value)
    });
    DocumentBuilder::new()
        .document(
            "serverStatus",
            DocumentBuilder::new()
                .datetime("localTime", i * 1000)
                .int64("uptime", 100 + i)
                .document("opcounters", DocumentBuilder::new().int64("query", 37 * i).int64("insert", 5 * i))
                .document("metrics", counters),
        )
        .document(
            "systemMetrics",
            DocumentBuilder::new().document(
                "cpu",
                DocumentBuilder::new()
                    .int64("user_ms", 400 * i)
                    .int64("system_ms", 100 * i)
                    .int64("idle_ms", 500 * i),
            ),
        )
        .build()
}

fn generate_block() -> BlockEncoder {
    let mut encoder = BlockEncoder::new(sample(0)).unwrap();
    for i in 1..DEFAULT_SAMPLES_PER_BLOCK as i64 {
        encoder.push_document(&sample(i)).unwrap();
    }
    encoder
}

fn generate_file(samples: i64) -> Vec<u8> {
    let mut writer = MetricsFileWriter::default();
    for i in 0..samples {
        writer.write_sample(i * 1000, sample(i)).unwrap();
    }
    writer.finish().unwrap()
}

fn bench_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("block");

    let encoder = generate_block();
    let inflated = encoder.encode();
    let compressed = encoder.compress().unwrap();

    group.throughput(Throughput::Elements(DEFAULT_SAMPLES_PER_BLOCK as u64));

    group.bench_function("decode_300_samples", |b| {
        b.iter(|| black_box(decode_block(black_box(&inflated)).unwrap()))
    });

    group.bench_function("inflate_and_decode_300_samples", |b| {
        b.iter(|| {
            let block = inflate_payload(black_box(&compressed)).unwrap();
            black_box(decode_block(&block).unwrap())
        })
    });

    group.finish();
}

fn bench_file(c: &mut Criterion) {
    let mut group = c.benchmark_group("file");

    let bytes = generate_file(3600);
    let config = ReaderConfig::default();

    group.throughput(Throughput::Elements(3600));

    group.bench_function("parse_one_hour", |b| {
        b.iter(|| black_box(parse_metrics_file(black_box(&bytes), &config).unwrap()))
    });

    let data = parse_metrics_file(&bytes, &config).unwrap();
    group.bench_function("derive_one_hour", |b| {
        b.iter(|| black_box(FtdcStats::from_data(data.clone())))
    });

    group.finish();
}

criterion_group!(benches, bench_block, bench_file);
criterion_main!(benches);
