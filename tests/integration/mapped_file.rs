//! Scanning memory-mapped evidence files through page slices.

use std::fs;

use forensic_scanner::{AddressedBuffer, EngineConfig, Ownership};

use crate::support::{filler, gzip, keyword_paths, started_engine};

const PAGE: usize = 4096;

#[test]
fn pages_of_a_mapped_file_keep_absolute_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evidence.bin");
    let mut bytes = filler(5000);
    bytes.extend_from_slice(&gzip(b"hidden: secret here"));
    bytes.extend_from_slice(&filler(3000));
    bytes.extend_from_slice(b"plain secret");
    fs::write(&path, &bytes).unwrap();

    let image = AddressedBuffer::map_file(&path).unwrap();
    assert_eq!(image.ownership(), Ownership::Mapped);
    assert_eq!(image.len(), bytes.len());

    let (engine, mem) = started_engine(
        EngineConfig {
            threads: 2,
            ..EngineConfig::default()
        },
        false,
    );
    let mut start = 0;
    while start < image.len() {
        let len = PAGE.min(image.len() - start);
        let page = image.slice(start, len).unwrap();
        assert!(page.is_borrowed());
        engine.process(page).unwrap();
        start += len;
    }
    engine.shutdown().unwrap();

    let plain_at = (bytes.len() - "secret".len()).to_string();
    assert_eq!(keyword_paths(&mem), vec!["5000-GZIP-8".to_string(), plain_at]);
    assert_eq!(image.children(), 0);
}

#[test]
fn empty_file_scans_cleanly() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let image = AddressedBuffer::map_file(file.path()).unwrap();
    assert!(image.is_empty());

    let (engine, mem) = started_engine(EngineConfig::single_threaded(), false);
    engine.process(image).unwrap();
    let report = engine.shutdown().unwrap();
    assert!(keyword_paths(&mem).is_empty());
    assert_eq!(report.buffers_processed, 1);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = AddressedBuffer::map_file(dir.path().join("absent")).unwrap_err();
    assert!(matches!(err, forensic_scanner::BufferError::Io(_)));
}
