//! Property-based tests for addressing, slicing, and de-duplication.
//!
//! Run with: `cargo test --test property`

mod buffer_slicing;
mod dedup;
mod forensic_path;
