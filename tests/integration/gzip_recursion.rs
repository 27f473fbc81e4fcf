//! Decoder recursion: provenance paths, self-recursion, depth limit, and
//! dedup of identical decoded content.

use forensic_scanner::{AddressedBuffer, BypassReason, EngineConfig, ForensicPath, MAX_DEPTH_ALERT};

use crate::support::{filler, gzip, keyword_paths, started_engine};

const INNER: &[u8] = b"hidden: secret here";

fn input_with(member: &[u8]) -> AddressedBuffer {
    let mut bytes = filler(1000);
    bytes.extend_from_slice(member);
    bytes.extend_from_slice(&filler(50));
    AddressedBuffer::from_vec(ForensicPath::from_offset(0), bytes)
}

#[test]
fn feature_inside_gzip_is_addressed_through_decoder() {
    let (engine, mem) = started_engine(EngineConfig::single_threaded(), false);
    engine.process(input_with(&gzip(INNER))).unwrap();
    let report = engine.shutdown().unwrap();

    assert_eq!(keyword_paths(&mem), vec!["1000-GZIP-8"]);
    assert_eq!(report.max_depth_seen, 1);
    assert_eq!(report.buffers_processed, 2);
    assert!(mem.alerts().is_empty());
}

#[test]
fn nested_gzip_decodes_when_scanner_recurses_into_itself() {
    let (engine, mem) = started_engine(EngineConfig::single_threaded(), true);
    engine.process(input_with(&gzip(&gzip(INNER)))).unwrap();
    let report = engine.shutdown().unwrap();

    assert_eq!(keyword_paths(&mem), vec!["1000-GZIP-0-GZIP-8"]);
    assert_eq!(report.max_depth_seen, 2);
}

#[test]
fn decoder_skips_its_own_output_by_default() {
    let (engine, mem) = started_engine(EngineConfig::single_threaded(), false);
    engine.process(input_with(&gzip(&gzip(INNER)))).unwrap();
    let report = engine.shutdown().unwrap();

    assert!(keyword_paths(&mem).is_empty());
    assert_eq!(report.bypassed(BypassReason::SelfRecursion), 1);
    assert_eq!(report.max_depth_seen, 1);
}

#[test]
fn deep_nesting_stops_at_max_depth() {
    let mut member = INNER.to_vec();
    for _ in 0..6 {
        member = gzip(&member);
    }
    let config = EngineConfig {
        max_depth: 3,
        ..EngineConfig::single_threaded()
    };
    let (engine, mem) = started_engine(config, true);
    engine.process(input_with(&member)).unwrap();
    let report = engine.shutdown().unwrap();

    assert!(keyword_paths(&mem).is_empty());
    let alerts = mem.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].feature, MAX_DEPTH_ALERT);
    assert_eq!(alerts[0].pos.to_string(), "1000-GZIP-0-GZIP-0-GZIP-0");
    assert_eq!(report.depth_limit_hits, 1);
    assert_eq!(report.max_depth_seen, 2);
}

#[test]
fn identical_decoded_members_are_scanned_once() {
    let member = gzip(INNER);
    let mut bytes = filler(100);
    bytes.extend_from_slice(&member);
    bytes.extend_from_slice(&filler(100));
    bytes.extend_from_slice(&member);
    let (engine, mem) = started_engine(EngineConfig::single_threaded(), false);
    engine
        .process(AddressedBuffer::from_vec(ForensicPath::from_offset(0), bytes))
        .unwrap();
    let report = engine.shutdown().unwrap();

    // the second copy is decoded but its content was already scanned
    assert_eq!(keyword_paths(&mem), vec!["100-GZIP-8"]);
    assert_eq!(report.dedup.duplicate_buffers, 1);
    assert_eq!(report.dedup.dup_bytes, INNER.len() as u64);
}
