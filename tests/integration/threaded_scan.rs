//! Threaded scanning produces the same features as single-threaded
//! scanning, and shutdown drains work queued by workers.

use forensic_scanner::{AddressedBuffer, EngineConfig, ForensicPath};

use crate::support::{filler, gzip, keyword_paths, started_engine};

const BUFFERS: u64 = 40;
const STRIDE: u64 = 10_000;

fn corpus() -> Vec<AddressedBuffer> {
    (0..BUFFERS)
        .map(|i| {
            let mut bytes = filler(100);
            bytes.extend_from_slice(&gzip(format!("hidden: secret #{i}").as_bytes()));
            bytes.extend_from_slice(format!(" tail {i} secret").as_bytes());
            AddressedBuffer::from_vec(ForensicPath::from_offset(i * STRIDE), bytes)
        })
        .collect()
}

fn scan(config: EngineConfig) -> Vec<String> {
    let (engine, mem) = started_engine(config, false);
    for buffer in corpus() {
        engine.process(buffer).unwrap();
    }
    let report = engine.shutdown().unwrap();
    assert_eq!(report.buffers_processed, 2 * BUFFERS);
    assert!(mem.alerts().is_empty());
    keyword_paths(&mem)
}

fn threaded() -> EngineConfig {
    EngineConfig {
        threads: 4,
        ..EngineConfig::default()
    }
}

#[test]
fn threaded_results_match_single_threaded() {
    let expected = scan(EngineConfig::single_threaded());
    assert_eq!(expected.len(), 2 * BUFFERS as usize);
    assert!(expected.contains(&"100-GZIP-8".to_string()));
    assert_eq!(scan(threaded()), expected);
}

#[test]
fn fanout_results_match_single_threaded() {
    let expected = scan(EngineConfig::single_threaded());
    let config = EngineConfig {
        fanout: true,
        ..threaded()
    };
    assert_eq!(scan(config), expected);
}

#[test]
fn shutdown_drains_recursive_work_queued_by_workers() {
    // every derived buffer goes through the queue
    let config = EngineConfig {
        same_thread_max: 0,
        ..threaded()
    };
    let expected = scan(EngineConfig::single_threaded());
    assert_eq!(scan(config), expected);
}

#[test]
fn debug_single_threaded_flag_overrides_thread_count() {
    let mut config = threaded();
    config.debug.single_threaded = true;
    let (engine, mem) = started_engine(config, false);
    for buffer in corpus() {
        engine.process(buffer).unwrap();
    }
    let report = engine.shutdown().unwrap();
    assert!(report.pool.is_none());
    assert_eq!(keyword_paths(&mem).len(), 2 * BUFFERS as usize);
}
