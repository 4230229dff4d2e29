// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Block codec integration tests
//!
//! Hand-built blocks check the wire format bit for bit; writer-produced
//! files check that what the encoder emits is what the reader projects.

use ftdc::bson::DocumentBuilder;
use ftdc::encoder::{compress_block, encode_varint, metrics_envelope};
use ftdc::{decode_block, parse_metrics_file, BlockEncoder, DecodeError, MetricsFileWriter, ReaderConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn block(reference: Vec<u8>, num_attribs: u32, num_deltas: u32, stream: &[u64]) -> Vec<u8> {
    let mut out = reference;
    out.extend_from_slice(&num_attribs.to_le_bytes());
    out.extend_from_slice(&num_deltas.to_le_bytes());
    for v in stream {
        encode_varint(*v, &mut out);
    }
    out
}

fn server_status(t: i64, uptime: i64, inserts: i64) -> Vec<u8> {
    DocumentBuilder::new()
        .document(
            "serverStatus",
            DocumentBuilder::new()
                .datetime("localTime", t)
                .int64("uptime", uptime)
                .document("opcounters", DocumentBuilder::new().int64("insert", inserts)),
        )
        .build()
}

// ============================================================================
// Section 1: Reference block layouts
// ============================================================================

#[test]
fn test_scenario_a_bool_true_seeds_one() {
    let reference = DocumentBuilder::new().int32("a", 1).bool("b", true).build();
    // a: [0, 5] as zero + run of 0, then 5; b: [1, 0] as 1, then zero + run of 0
    let bytes = block(reference, 2, 2, &[0, 0, 5, 1, 0, 0]);

    let decoded = decode_block(&bytes).unwrap();
    assert_eq!(decoded.sample_count(), 3);
    assert_eq!(decoded.series("a").unwrap(), &[1, 1, 6]);
    assert_eq!(decoded.series("b").unwrap(), &[1, 2, 2]);
}

#[test]
fn test_scenario_a_bool_false_seeds_zero() {
    let reference = DocumentBuilder::new().int32("a", 1).bool("b", false).build();
    let bytes = block(reference, 2, 2, &[0, 0, 5, 1, 0, 0]);

    let decoded = decode_block(&bytes).unwrap();
    assert_eq!(decoded.series("a").unwrap(), &[1, 1, 6]);
    assert_eq!(decoded.series("b").unwrap(), &[0, 1, 1]);
}

#[test]
fn test_zero_run_spans_three_attributes() {
    let reference = DocumentBuilder::new()
        .int64("a", 10)
        .int64("b", 20)
        .int64("c", 30)
        .build();
    // deltas a=[3,0] b=[0,0] c=[0,2]; the four zeros collapse into one run
    let bytes = block(reference, 3, 2, &[3, 0, 3, 2]);

    let decoded = decode_block(&bytes).unwrap();
    assert_eq!(decoded.series("a").unwrap(), &[10, 13, 13]);
    assert_eq!(decoded.series("b").unwrap(), &[20, 20, 20]);
    assert_eq!(decoded.series("c").unwrap(), &[30, 30, 32]);
}

#[test]
fn test_nested_paths_use_slash_separator() {
    let reference = DocumentBuilder::new()
        .document(
            "serverStatus",
            DocumentBuilder::new().document("mem", DocumentBuilder::new().int64("resident", 512)),
        )
        .build();
    let bytes = block(reference, 1, 1, &[8]);

    let decoded = decode_block(&bytes).unwrap();
    assert_eq!(decoded.attributes, vec!["serverStatus/mem/resident"]);
    assert_eq!(decoded.value("serverStatus/mem/resident", 1), 520);
    assert_eq!(decoded.value("serverStatus/mem/virtual", 1), 0);
    assert_eq!(decoded.series("serverStatus/mem/resident").unwrap(), &[512, 520]);
    assert!(decoded.series("serverStatus/mem/virtual").is_none());
}

#[test]
fn test_block_without_deltas() {
    let reference = DocumentBuilder::new().int64("a", 7).build();
    let decoded = decode_block(&block(reference, 1, 0, &[])).unwrap();
    assert_eq!(decoded.sample_count(), 1);
    assert_eq!(decoded.series("a").unwrap(), &[7]);
}

// ============================================================================
// Section 2: Malformed blocks
// ============================================================================

#[test]
fn test_attribute_count_mismatch() {
    let reference = DocumentBuilder::new().int64("a", 1).build();
    let err = decode_block(&block(reference, 2, 1, &[1, 1])).unwrap_err();
    assert_eq!(err, DecodeError::InconsistentData { expected: 2, actual: 1 });
}

#[test]
fn test_delta_stream_ends_early() {
    let reference = DocumentBuilder::new().int64("a", 1).int64("b", 2).build();
    let err = decode_block(&block(reference, 2, 3, &[1, 1, 1])).unwrap_err();
    assert!(matches!(err, DecodeError::BufferTooShort { .. }));
}

#[test]
fn test_header_cut_off() {
    let mut bytes = DocumentBuilder::new().int64("a", 1).build();
    bytes.extend_from_slice(&[1, 0, 0]);
    assert!(decode_block(&bytes).is_err());
}

#[test]
fn test_corrupt_payload_fails_file() {
    let garbage = compress_block(b"not a block").unwrap();
    let bytes = metrics_envelope(0, &garbage);
    assert!(parse_metrics_file(&bytes, &ReaderConfig::default()).is_err());
}

// ============================================================================
// Section 3: Writer output
// ============================================================================

#[test]
fn test_every_series_has_sample_count_values() {
    let mut encoder = BlockEncoder::new(server_status(0, 100, 0)).unwrap();
    for i in 1..=4 {
        encoder.push_document(&server_status(i * 1000, 100 + i, 3 * i)).unwrap();
    }
    let decoded = decode_block(&encoder.encode()).unwrap();

    assert_eq!(decoded.num_deltas, 4);
    for path in &decoded.attributes {
        assert_eq!(decoded.series(path).unwrap().len(), decoded.sample_count(), "{}", path);
    }
    assert_eq!(decoded.series("serverStatus/opcounters/insert").unwrap(), &[0, 3, 6, 9, 12]);
}

#[test]
fn test_random_counters_survive_file_round_trip() {
    let mut rng = StdRng::seed_from_u64(0xF7DC);
    let mut writer = MetricsFileWriter::new(64);
    let mut expected = Vec::new();
    let mut inserts = 0i64;

    for i in 0..500i64 {
        // idle periods produce long zero runs
        if rng.gen_bool(0.7) {
            inserts += rng.gen_range(1..10_000);
        }
        expected.push(inserts as u64);
        writer.write_sample(i * 1000, server_status(i * 1000, i, inserts)).unwrap();
    }
    assert_eq!(writer.blocks_written(), 7);
    let bytes = writer.finish().unwrap();

    let data = parse_metrics_file(&bytes, &ReaderConfig::with_workers(2)).unwrap();
    let decoded: Vec<u64> = data.server_status.iter().map(|s| s.opcounters.insert).collect();
    assert_eq!(decoded, expected);
    assert_eq!(data.server_status.len(), data.system_metrics.len());
    assert!(data
        .server_status
        .windows(2)
        .all(|w| w[0].local_time_ms < w[1].local_time_ms));
}

#[test]
fn test_layout_change_starts_new_block() {
    let mut writer = MetricsFileWriter::new(100);
    writer.write_sample(0, server_status(0, 1, 0)).unwrap();
    writer.write_sample(1000, server_status(1000, 2, 5)).unwrap();
    let wider = DocumentBuilder::new()
        .document(
            "serverStatus",
            DocumentBuilder::new()
                .datetime("localTime", 2000)
                .int64("uptime", 3)
                .document("opcounters", DocumentBuilder::new().int64("insert", 9).int64("query", 1)),
        )
        .build();
    writer.write_sample(2000, wider).unwrap();
    let bytes = writer.finish().unwrap();

    let data = parse_metrics_file(&bytes, &ReaderConfig::default()).unwrap();
    let queries: Vec<u64> = data.server_status.iter().map(|s| s.opcounters.query).collect();
    assert_eq!(queries, vec![0, 0, 1]);
}
