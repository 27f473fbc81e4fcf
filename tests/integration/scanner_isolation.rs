//! Scanner failures under the worker pool never abort a scan.

use std::sync::Arc;

use forensic_scanner::{
    AddressedBuffer, Engine, EngineConfig, ForensicPath, MemoryRecorders, Scanner, ScannerError,
    ScannerFn, ScannerInfo, ScannerParams,
};

use crate::support::keyword_scanner;

fn panicking() -> impl Scanner + 'static {
    ScannerFn::new("boom", |p: &ScannerParams<'_>| -> Result<(), ScannerError> {
        panic!("boom at {}", p.buffer().pos0())
    })
}

#[test]
fn panics_become_alerts_on_worker_threads() {
    let mem = Arc::new(MemoryRecorders::new());
    let engine = Engine::with_recorders(
        EngineConfig {
            threads: 3,
            ..EngineConfig::default()
        },
        mem.clone(),
    )
    .unwrap();
    engine.register(panicking()).unwrap();
    engine.register(keyword_scanner()).unwrap();
    engine.apply_enable_disable_policy(&[]).unwrap();
    engine.start_scan().unwrap();
    for i in 0..20u64 {
        let bytes = format!("record {i} has a secret").into_bytes();
        engine
            .process(AddressedBuffer::from_vec(ForensicPath::from_offset(i * 100), bytes))
            .unwrap();
    }
    let report = engine.shutdown().unwrap();

    assert_eq!(mem.features("keyword").len(), 20);
    let alerts = mem.alerts();
    assert_eq!(alerts.len(), 20);
    assert!(alerts.iter().all(|a| a.feature == "scanner=boom"));
    assert!(alerts.iter().all(|a| a.context.starts_with("<exception>boom at ")));
    assert_eq!(report.scanner("boom").unwrap().panics, 20);
    assert_eq!(report.scanner_errors, 20);
    assert_eq!(report.pool.unwrap().panics, 0);
}

struct FailingShutdown;

impl Scanner for FailingShutdown {
    fn init(&self, info: &mut ScannerInfo) {
        info.name = "closer".into();
    }

    fn scan(&self, _params: &ScannerParams<'_>) -> Result<(), ScannerError> {
        Ok(())
    }

    fn shutdown(&self, _engine: &Engine) {
        panic!("could not close report");
    }
}

#[test]
fn panicking_shutdown_hook_is_reported() {
    let mem = Arc::new(MemoryRecorders::new());
    let engine = Engine::with_recorders(EngineConfig::single_threaded(), mem.clone()).unwrap();
    engine.register(FailingShutdown).unwrap();
    engine.apply_enable_disable_policy(&[]).unwrap();
    engine.start_scan().unwrap();
    engine.shutdown().unwrap();

    let alerts = mem.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].feature, "scanner=closer");
    assert_eq!(alerts[0].context, "<shutdown>could not close report</shutdown>");
    assert_eq!(engine.phase(), forensic_scanner::Phase::Cleaned);
}
