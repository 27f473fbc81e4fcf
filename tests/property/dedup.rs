//! Duplicate-intolerant scanners see each distinct content exactly once,
//! whatever the order and threading of the input.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use forensic_scanner::{
    AddressedBuffer, Engine, EngineConfig, ForensicPath, MemoryRecorders, ScannerFn, ScannerParams,
};

fn run(contents: &[Vec<u8>], threads: usize) -> (usize, usize, u64) {
    let once = Arc::new(AtomicUsize::new(0));
    let every = Arc::new(AtomicUsize::new(0));
    let (o, e) = (Arc::clone(&once), Arc::clone(&every));

    let config = EngineConfig {
        threads,
        ..EngineConfig::default()
    };
    let engine = Engine::with_recorders(config, Arc::new(MemoryRecorders::new())).unwrap();
    engine
        .register(
            ScannerFn::new("once", move |_p: &ScannerParams<'_>| {
                o.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .configure(|i| i.flags.scan_ngram_buffer = true),
        )
        .unwrap();
    engine
        .register(
            ScannerFn::new("every", move |_p: &ScannerParams<'_>| {
                e.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .configure(|i| {
                i.flags.scan_seen_before = true;
                i.flags.scan_ngram_buffer = true;
            }),
        )
        .unwrap();
    engine.apply_enable_disable_policy(&[]).unwrap();
    engine.start_scan().unwrap();
    for (i, bytes) in contents.iter().enumerate() {
        let pos = ForensicPath::from_offset(i as u64 * 4096);
        engine.process(AddressedBuffer::from_vec(pos, bytes.clone())).unwrap();
    }
    let report = engine.shutdown().unwrap();
    (
        once.load(Ordering::SeqCst),
        every.load(Ordering::SeqCst),
        report.dedup.dup_bytes,
    )
}

fn contents() -> impl Strategy<Value = Vec<Vec<u8>>> {
    // a small alphabet of contents so duplicates are common
    prop::collection::vec(
        prop::sample::select(vec![
            b"alpha".to_vec(),
            b"bravo bravo".to_vec(),
            b"charlie".to_vec(),
            vec![0u8; 32],
        ]),
        1..40,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn each_distinct_content_is_scanned_once(contents in contents(), threads in 0usize..4) {
        let distinct: HashSet<&Vec<u8>> = contents.iter().collect();
        let total: u64 = contents.iter().map(|c| c.len() as u64).sum();
        let unique: u64 = distinct.iter().map(|c| c.len() as u64).sum();

        let (once, every, dup_bytes) = run(&contents, threads);
        prop_assert_eq!(once, distinct.len());
        prop_assert_eq!(every, contents.len());
        prop_assert_eq!(dup_bytes, total - unique);
    }
}
