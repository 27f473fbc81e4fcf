//! Integration tests for the forensic scanning core.
//!
//! Run with: `cargo test --test integration`

mod gzip_recursion;
mod mapped_file;
mod scanner_isolation;
mod support;
mod threaded_scan;
