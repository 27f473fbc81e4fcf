//! Scanners and fixtures shared by the integration tests.

use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use forensic_scanner::{
    AddressedBuffer, Engine, EngineConfig, MemoryRecorders, Scanner, ScannerFn, ScannerParams,
};

pub const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];
pub const KEYWORD: &[u8] = b"secret";

/// Compresses `data` into a single gzip member.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Non-repeating filler that never contains the gzip magic or the keyword.
pub fn filler(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'a' + (i % 23) as u8).collect()
}

/// Decodes every gzip member it finds and hands the output back to the
/// engine under a `GZIP` decoder segment.
pub fn gzip_scanner(recurse_into_self: bool) -> impl Scanner + 'static {
    ScannerFn::new("gzip", |p: &ScannerParams<'_>| {
        let buf = p.buffer();
        let mut from = 0;
        while let Some(off) = buf.find(&GZIP_MAGIC, from) {
            from = off + 1;
            let mut out = Vec::new();
            let mut dec = GzDecoder::new(&buf.as_bytes()[off..]);
            if dec.read_to_end(&mut out).is_err() || out.is_empty() {
                continue;
            }
            let child = AddressedBuffer::from_vec((buf.pos0() + off as u64).append("GZIP"), out);
            p.recurse(child)?;
        }
        Ok(())
    })
    .configure(move |info| {
        info.flags.recurse = true;
        info.flags.recurse_into_self = recurse_into_self;
        info.min_buffer_size = GZIP_MAGIC.len();
    })
}

/// Records every occurrence of [`KEYWORD`] on the `keyword` channel.
pub fn keyword_scanner() -> impl Scanner + 'static {
    ScannerFn::new("keyword", |p: &ScannerParams<'_>| {
        let buf = p.buffer();
        let mut from = 0;
        while let Some(off) = buf.find(KEYWORD, from) {
            p.record("keyword", &(buf.pos0() + off as u64), "secret", "")?;
            from = off + 1;
        }
        Ok(())
    })
    .configure(|info| {
        info.add_feature("keyword");
    })
}

/// An engine with the gzip and keyword scanners, started and ready.
pub fn started_engine(
    config: EngineConfig,
    recurse_into_self: bool,
) -> (Arc<Engine>, Arc<MemoryRecorders>) {
    let mem = Arc::new(MemoryRecorders::new());
    let engine = Engine::with_recorders(config, mem.clone()).unwrap();
    engine.register(gzip_scanner(recurse_into_self)).unwrap();
    engine.register(keyword_scanner()).unwrap();
    engine.apply_enable_disable_policy(&[]).unwrap();
    engine.start_scan().unwrap();
    (engine, mem)
}

/// Keyword feature addresses, sorted.
pub fn keyword_paths(mem: &MemoryRecorders) -> Vec<String> {
    let mut paths: Vec<String> = mem
        .features("keyword")
        .into_iter()
        .map(|f| f.pos.to_string())
        .collect();
    paths.sort();
    paths
}
