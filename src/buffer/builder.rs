//! Writable staging buffer that freezes into an [`AddressedBuffer`].
//!
//! Decoders fill a `MutableBuffer` (decompressed output, reassembled
//! fragments) and then [`freeze`](MutableBuffer::freeze) it into an
//! immutable buffer addressed at the decoder's forensic path.

use std::io;

use crate::error::BufferError;
use crate::path::ForensicPath;

use super::{AddressedBuffer, ContentHints};

/// Heap-owned, writable buffer with a forensic address.
#[derive(Debug)]
pub struct MutableBuffer {
    pos0: ForensicPath,
    bytes: Vec<u8>,
    page_size: Option<usize>,
    hints: ContentHints,
}

impl MutableBuffer {
    /// Zero-filled buffer of `size` bytes.
    pub fn new(pos0: ForensicPath, size: usize) -> Self {
        Self::from_vec(pos0, vec![0u8; size])
    }

    /// Empty buffer with room for `capacity` bytes.
    pub fn with_capacity(pos0: ForensicPath, capacity: usize) -> Self {
        Self::from_vec(pos0, Vec::with_capacity(capacity))
    }

    /// Adopts `bytes`.
    pub fn from_vec(pos0: ForensicPath, bytes: Vec<u8>) -> Self {
        Self {
            pos0,
            bytes,
            page_size: None,
            hints: ContentHints::NONE,
        }
    }

    pub fn pos0(&self) -> &ForensicPath {
        &self.pos0
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Overwrites bytes at `offset`. The write must fit inside the current
    /// length; use [`extend_from_slice`](Self::extend_from_slice) to grow.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<(), BufferError> {
        let size = self.bytes.len();
        match offset.checked_add(data.len()) {
            Some(end) if end <= size => {
                self.bytes[offset..end].copy_from_slice(data);
                Ok(())
            }
            _ => Err(BufferError::range(offset, data.len(), size)),
        }
    }

    pub fn put_u8(&mut self, offset: usize, v: u8) -> Result<(), BufferError> {
        self.write_at(offset, &[v])
    }

    pub fn put_u16_le(&mut self, offset: usize, v: u16) -> Result<(), BufferError> {
        self.write_at(offset, &v.to_le_bytes())
    }

    pub fn put_u32_le(&mut self, offset: usize, v: u32) -> Result<(), BufferError> {
        self.write_at(offset, &v.to_le_bytes())
    }

    pub fn put_u64_le(&mut self, offset: usize, v: u64) -> Result<(), BufferError> {
        self.write_at(offset, &v.to_le_bytes())
    }

    pub fn put_u32_be(&mut self, offset: usize, v: u32) -> Result<(), BufferError> {
        self.write_at(offset, &v.to_be_bytes())
    }

    /// Appends `data`.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Grows (zero-filled) or shrinks to `size` bytes.
    pub fn resize(&mut self, size: usize) {
        self.bytes.resize(size, 0);
    }

    /// Shrinks to at most `size` bytes.
    pub fn truncate(&mut self, size: usize) {
        self.bytes.truncate(size);
    }

    /// Sets the page size of the frozen buffer (clamped to its length at
    /// freeze time). Without it the page is the whole buffer.
    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = Some(page_size);
    }

    pub fn set_hints(&mut self, hints: ContentHints) {
        self.hints = hints;
    }

    /// Freezes into an immutable heap-owned buffer.
    pub fn freeze(self) -> AddressedBuffer {
        let size = self.bytes.len();
        let page_size = self.page_size.unwrap_or(size);
        let buf = AddressedBuffer::from_vec_with_page_size(self.pos0, self.bytes, page_size);
        if !self.hints.is_empty() {
            buf.add_hints(self.hints);
        }
        buf
    }
}

impl io::Write for MutableBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
