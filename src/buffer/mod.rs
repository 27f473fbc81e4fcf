//! Provenance-addressed, immutable byte buffers.
//!
//! An [`AddressedBuffer`] is a read-only view over a byte range tagged with
//! the [`ForensicPath`] of its first byte. Buffers are created by mapping a
//! file, adopting heap memory, wrapping external `'static` bytes, or slicing
//! another buffer without copying.
//!
//! # Ownership model
//! ```text
//!   AddressedBuffer ──Arc──► Inner { pos0, size, page_size, storage, children, cache }
//!                                          │
//!                     ┌────────────────────┼─────────────────────┬──────────────┐
//!                     ▼                    ▼                     ▼              ▼
//!               Heap(Box<[u8]>)      Mapped(Mmap)      Borrowed{parent,start}  External(&'static)
//!                                                             │
//!                                                             └──Arc──► parent Inner
//! ```
//! - Cloning a buffer retains it (reference count); the last clone to drop
//!   destroys it.
//! - A borrowed slice holds a shared owner of its parent, so a parent can
//!   never be destroyed while a child is alive. The parent's live-child
//!   counter mirrors this and is debug-asserted to be zero at destruction.
//!
//! # Invariants
//! - `page_size <= size`; bytes past `page_size` are margin shared with the
//!   next page.
//! - Readers never observe bytes outside `[0, size)`: every accessor is
//!   bounds-checked and returns [`BufferError::Range`] instead of truncating.
//! - Cached analyses (digest per algorithm, histogram, ngram size) are each
//!   computed at most once, guarded per field, and safe to race on.

mod analysis;
mod builder;
mod hash;

#[cfg(test)]
mod tests;

use std::fmt;
use std::fs::File;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use memchr::memmem;
use memmap2::Mmap;

use crate::error::BufferError;
use crate::path::ForensicPath;

pub use analysis::{is_constant, repeating_ngram_size, ByteHistogram};
pub use builder::MutableBuffer;
pub use hash::{Digest, HashAlgorithm};

/// How a buffer holds its bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Owns a heap allocation.
    Heap,
    /// Owns a read-only memory map of a file.
    Mapped,
    /// Borrows a range of a parent buffer.
    Borrowed,
    /// Borrows external bytes it does not own.
    External,
}

/// Advisory flags describing what a buffer might contain.
///
/// Producers (e.g. a decompressor that recognized a disk image) set these so
/// scanners that only understand memory or filesystem structures are not run
/// on arbitrary data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ContentHints(u8);

impl ContentHints {
    /// No hints.
    pub const NONE: ContentHints = ContentHints(0);
    /// May contain a memory image.
    pub const MEMORY: ContentHints = ContentHints(1 << 0);
    /// May contain a filesystem.
    pub const FILESYSTEM: ContentHints = ContentHints(1 << 1);

    /// True when every hint in `other` is set.
    #[inline]
    pub fn contains(self, other: ContentHints) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of both hint sets.
    #[inline]
    pub fn union(self, other: ContentHints) -> ContentHints {
        ContentHints(self.0 | other.0)
    }

    /// True when no hint is set.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

enum Storage {
    Heap(Box<[u8]>),
    Mapped(Mmap),
    Borrowed { parent: AddressedBuffer, start: usize },
    External(&'static [u8]),
}

/// Lazily computed, per-field memoized analyses.
#[derive(Default)]
struct AnalysisCache {
    digests: [OnceLock<Digest>; HashAlgorithm::COUNT],
    histogram: OnceLock<ByteHistogram>,
    // (max_ngram the value was computed for, result)
    ngram: OnceLock<(usize, usize)>,
}

impl AnalysisCache {
    fn is_populated(&self) -> bool {
        self.histogram.get().is_some()
            || self.ngram.get().is_some()
            || self.digests.iter().any(|d| d.get().is_some())
    }
}

struct Inner {
    pos0: ForensicPath,
    size: usize,
    page_size: usize,
    storage: Storage,
    children: AtomicUsize,
    hints: AtomicU8,
    cache: AnalysisCache,
}

impl Drop for Inner {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.children.load(Ordering::Acquire),
            0,
            "buffer {} destroyed with live children",
            self.pos0
        );
        if let Storage::Borrowed { parent, .. } = &self.storage {
            parent.inner.children.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Immutable, provenance-addressed view over a byte range.
///
/// `Clone` retains the buffer (bumps the reference count); it never copies
/// bytes.
#[derive(Clone)]
pub struct AddressedBuffer {
    inner: Arc<Inner>,
}

macro_rules! scalar_readers {
    ($($(#[$doc:meta])* $name:ident => $ty:ty, $conv:ident;)*) => {
        $(
            $(#[$doc])*
            #[inline]
            pub fn $name(&self, offset: usize) -> Result<$ty, BufferError> {
                self.array::<{ std::mem::size_of::<$ty>() }>(offset).map(<$ty>::$conv)
            }
        )*
    };
}

impl AddressedBuffer {
    fn from_parts(
        pos0: ForensicPath,
        size: usize,
        page_size: usize,
        storage: Storage,
        hints: ContentHints,
    ) -> Self {
        debug_assert!(page_size <= size);
        Self {
            inner: Arc::new(Inner {
                pos0,
                size,
                page_size,
                storage,
                children: AtomicUsize::new(0),
                hints: AtomicU8::new(hints.0),
                cache: AnalysisCache::default(),
            }),
        }
    }

    // --------------------------
    // Construction
    // --------------------------

    /// Adopts `bytes` as a heap-owned buffer whose page is the whole buffer.
    pub fn from_vec(pos0: ForensicPath, bytes: Vec<u8>) -> Self {
        let size = bytes.len();
        Self::from_vec_with_page_size(pos0, bytes, size)
    }

    /// Adopts `bytes` with an explicit page size; the remainder is margin.
    ///
    /// `page_size` is clamped to the buffer size.
    pub fn from_vec_with_page_size(pos0: ForensicPath, bytes: Vec<u8>, page_size: usize) -> Self {
        let size = bytes.len();
        Self::from_parts(
            pos0,
            size,
            page_size.min(size),
            Storage::Heap(bytes.into_boxed_slice()),
            ContentHints::NONE,
        )
    }

    /// Wraps external bytes without taking ownership.
    pub fn from_static(pos0: ForensicPath, bytes: &'static [u8]) -> Self {
        Self::from_parts(
            pos0,
            bytes.len(),
            bytes.len(),
            Storage::External(bytes),
            ContentHints::NONE,
        )
    }

    /// Memory-maps `path` read-only. The buffer is addressed at offset 0 of
    /// the top-level stream.
    pub fn map_file(path: impl AsRef<Path>) -> Result<Self, BufferError> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            // Zero-length mappings are rejected by some platforms.
            return Ok(Self::from_vec(ForensicPath::from_offset(0), Vec::new()));
        }
        // SAFETY: the map is read-only. As with any mmap, concurrent
        // truncation of the file by another process is outside our control;
        // forensic inputs are treated as quiescent evidence files.
        let mmap = unsafe { Mmap::map(&file)? };
        let size = mmap.len();
        Ok(Self::from_parts(
            ForensicPath::from_offset(0),
            size,
            size,
            Storage::Mapped(mmap),
            ContentHints::NONE,
        ))
    }

    /// Reads `path` into a heap-owned buffer.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, BufferError> {
        let bytes = std::fs::read(path.as_ref())?;
        Ok(Self::from_vec(ForensicPath::from_offset(0), bytes))
    }

    // --------------------------
    // Metadata
    // --------------------------

    /// Forensic address of byte 0.
    #[inline]
    pub fn pos0(&self) -> &ForensicPath {
        &self.inner.pos0
    }

    /// Recursion depth of this buffer's address.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.inner.pos0.depth()
    }

    /// Logical size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.size
    }

    /// True when the buffer holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.size == 0
    }

    /// Size of the substantive page (`<= len()`).
    #[inline]
    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    /// Bytes past the page, duplicated from the following page.
    #[inline]
    pub fn margin(&self) -> usize {
        self.inner.size - self.inner.page_size
    }

    /// How the bytes are held.
    pub fn ownership(&self) -> Ownership {
        match self.inner.storage {
            Storage::Heap(_) => Ownership::Heap,
            Storage::Mapped(_) => Ownership::Mapped,
            Storage::Borrowed { .. } => Ownership::Borrowed,
            Storage::External(_) => Ownership::External,
        }
    }

    /// True when this buffer borrows from a parent buffer.
    #[inline]
    pub fn is_borrowed(&self) -> bool {
        matches!(self.inner.storage, Storage::Borrowed { .. })
    }

    /// The buffer this one was sliced from, if any.
    pub fn parent(&self) -> Option<&AddressedBuffer> {
        match &self.inner.storage {
            Storage::Borrowed { parent, .. } => Some(parent),
            _ => None,
        }
    }

    /// Number of live zero-copy slices of this buffer.
    #[inline]
    pub fn children(&self) -> usize {
        self.inner.children.load(Ordering::Acquire)
    }

    /// Number of live handles to this buffer (including `self`).
    #[inline]
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Content hints set by the producer (inherited by slices).
    #[inline]
    pub fn hints(&self) -> ContentHints {
        ContentHints(self.inner.hints.load(Ordering::Acquire))
    }

    /// Adds content hints. Hints are advisory and only ever accumulate.
    pub fn add_hints(&self, hints: ContentHints) {
        self.inner.hints.fetch_or(hints.0, Ordering::AcqRel);
    }

    // --------------------------
    // Byte access
    // --------------------------

    /// The full byte range, margin included.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match &self.inner.storage {
            Storage::Heap(b) => b,
            Storage::Mapped(m) => m.as_ref(),
            Storage::Borrowed { parent, start } => {
                &parent.as_bytes()[*start..*start + self.inner.size]
            }
            Storage::External(b) => b,
        }
    }

    /// The page bytes, margin excluded.
    #[inline]
    pub fn page_bytes(&self) -> &[u8] {
        &self.as_bytes()[..self.inner.page_size]
    }

    /// Fails with a range error unless `[offset, offset + len)` lies within
    /// the buffer.
    #[inline]
    pub fn check_range(&self, offset: usize, len: usize) -> Result<Range<usize>, BufferError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.inner.size => Ok(offset..end),
            _ => Err(BufferError::range(offset, len, self.inner.size)),
        }
    }

    /// `len` bytes starting at `offset`.
    #[inline]
    pub fn get_bytes(&self, offset: usize, len: usize) -> Result<&[u8], BufferError> {
        let r = self.check_range(offset, len)?;
        Ok(&self.as_bytes()[r])
    }

    #[inline]
    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N], BufferError> {
        let r = self.check_range(offset, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.as_bytes()[r]);
        Ok(out)
    }

    scalar_readers! {
        /// Byte at `offset`.
        get_u8 => u8, from_le_bytes;
        /// Signed byte at `offset`.
        get_i8 => i8, from_le_bytes;
        /// Little-endian `u16` at `offset`.
        get_u16_le => u16, from_le_bytes;
        /// Big-endian `u16` at `offset`.
        get_u16_be => u16, from_be_bytes;
        /// Little-endian `i16` at `offset`.
        get_i16_le => i16, from_le_bytes;
        /// Big-endian `i16` at `offset`.
        get_i16_be => i16, from_be_bytes;
        /// Little-endian `u32` at `offset`.
        get_u32_le => u32, from_le_bytes;
        /// Big-endian `u32` at `offset`.
        get_u32_be => u32, from_be_bytes;
        /// Little-endian `i32` at `offset`.
        get_i32_le => i32, from_le_bytes;
        /// Big-endian `i32` at `offset`.
        get_i32_be => i32, from_be_bytes;
        /// Little-endian `u64` at `offset`.
        get_u64_le => u64, from_le_bytes;
        /// Big-endian `u64` at `offset`.
        get_u64_be => u64, from_be_bytes;
        /// Little-endian `i64` at `offset`.
        get_i64_le => i64, from_le_bytes;
        /// Big-endian `i64` at `offset`.
        get_i64_be => i64, from_be_bytes;
    }

    // --------------------------
    // Slicing
    // --------------------------

    /// Zero-copy view of `len` bytes at `offset`.
    ///
    /// The child is addressed at `pos0 + offset`, its page is the part of
    /// the parent's page it covers, and it inherits the parent's hints. The
    /// parent's child counter stays raised until the child is dropped.
    pub fn slice(&self, offset: usize, len: usize) -> Result<AddressedBuffer, BufferError> {
        self.check_range(offset, len)?;
        let page_size = self.inner.page_size.saturating_sub(offset).min(len);
        self.inner.children.fetch_add(1, Ordering::AcqRel);
        Ok(Self::from_parts(
            self.pos0() + offset as u64,
            len,
            page_size,
            Storage::Borrowed {
                parent: self.clone(),
                start: offset,
            },
            self.hints(),
        ))
    }

    /// Zero-copy view from `offset` to the end.
    pub fn slice_from(&self, offset: usize) -> Result<AddressedBuffer, BufferError> {
        let len = self
            .inner
            .size
            .checked_sub(offset)
            .ok_or_else(|| BufferError::range(offset, 0, self.inner.size))?;
        self.slice(offset, len)
    }

    /// Owning copy of `len` bytes at `offset`, independent of this buffer's
    /// lifetime (safe to hand to another thread without pinning the parent).
    pub fn copy_slice(&self, offset: usize, len: usize) -> Result<AddressedBuffer, BufferError> {
        let r = self.check_range(offset, len)?;
        let page_size = self.inner.page_size.saturating_sub(offset).min(len);
        Ok(Self::from_parts(
            self.pos0() + offset as u64,
            len,
            page_size,
            Storage::Heap(self.as_bytes()[r].into()),
            self.hints(),
        ))
    }

    /// Reopens a uniquely owned heap buffer for writing.
    ///
    /// Refused when the buffer is shared or has live children
    /// ([`BufferError::Shared`]), when it already produced cached analyses
    /// ([`BufferError::Frozen`]), or when it does not own heap memory
    /// ([`BufferError::NotOwned`]).
    pub fn into_mutable(self) -> Result<MutableBuffer, BufferError> {
        if !matches!(self.inner.storage, Storage::Heap(_)) {
            return Err(BufferError::NotOwned);
        }
        if self.inner.cache.is_populated() {
            return Err(BufferError::Frozen);
        }
        let children = self.children();
        if children > 0 {
            return Err(BufferError::Shared {
                references: self.reference_count(),
                children,
            });
        }
        let mut inner = Arc::try_unwrap(self.inner).map_err(|arc| BufferError::Shared {
            references: Arc::strong_count(&arc),
            children: arc.children.load(Ordering::Acquire),
        })?;
        let storage = std::mem::replace(&mut inner.storage, Storage::External(&[]));
        let Storage::Heap(bytes) = storage else {
            unreachable!("storage kind checked above");
        };
        let mut out = MutableBuffer::from_vec(inner.pos0.clone(), bytes.into_vec());
        out.set_page_size(inner.page_size);
        out.set_hints(ContentHints(inner.hints.load(Ordering::Acquire)));
        Ok(out)
    }

    // --------------------------
    // Search and shape analysis
    // --------------------------

    /// Offset of the first `byte` at or after `start`.
    pub fn find_byte(&self, byte: u8, start: usize) -> Option<usize> {
        let hay = self.as_bytes().get(start..)?;
        memchr::memchr(byte, hay).map(|i| i + start)
    }

    /// Offset of the first occurrence of `pattern` at or after `start`.
    ///
    /// An empty pattern matches at `start` when `start <= len()`.
    pub fn find(&self, pattern: &[u8], start: usize) -> Option<usize> {
        let hay = self.as_bytes().get(start..)?;
        memmem::find(hay, pattern).map(|i| i + start)
    }

    /// True when every byte in `range` equals `byte`.
    pub fn is_constant(&self, range: Range<usize>, byte: u8) -> Result<bool, BufferError> {
        let bytes = self.range_bytes(range)?;
        Ok(analysis::is_constant(bytes, byte))
    }

    /// Number of distinct byte values in `range`.
    ///
    /// Whole-buffer queries reuse the cached histogram.
    pub fn distinct_byte_count(&self, range: Range<usize>) -> Result<usize, BufferError> {
        if range.start == 0 && range.end == self.inner.size {
            return Ok(self.histogram().distinct());
        }
        let bytes = self.range_bytes(range)?;
        Ok(ByteHistogram::of(bytes).distinct())
    }

    /// Histogram of the whole buffer, computed once.
    pub fn histogram(&self) -> &ByteHistogram {
        self.inner
            .cache
            .histogram
            .get_or_init(|| ByteHistogram::of(self.as_bytes()))
    }

    /// Smallest n-gram (`1..max_ngram`) the page is a pure repetition of,
    /// or 0.
    ///
    /// The first call's result is cached; later calls with the same
    /// `max_ngram` reuse it.
    pub fn repeating_ngram_size(&self, max_ngram: usize) -> usize {
        let &(cached_max, cached) = self
            .inner
            .cache
            .ngram
            .get_or_init(|| (max_ngram, repeating_ngram_size(self.page_bytes(), max_ngram)));
        if cached_max == max_ngram {
            cached
        } else {
            repeating_ngram_size(self.page_bytes(), max_ngram)
        }
    }

    fn range_bytes(&self, range: Range<usize>) -> Result<&[u8], BufferError> {
        let len = range
            .end
            .checked_sub(range.start)
            .ok_or_else(|| BufferError::range(range.start, 0, self.inner.size))?;
        self.get_bytes(range.start, len)
    }

    // --------------------------
    // Hashing
    // --------------------------

    /// Digest of the whole buffer with the default algorithm, computed once.
    pub fn content_hash(&self) -> Digest {
        self.digest(HashAlgorithm::default())
    }

    /// Digest of the whole buffer with `alg`, computed once per algorithm.
    pub fn digest(&self, alg: HashAlgorithm) -> Digest {
        *self.inner.cache.digests[alg.index()].get_or_init(|| alg.digest(self.as_bytes()))
    }

    // --------------------------
    // Diagnostics
    // --------------------------

    /// Classic 16-bytes-per-line hex dump of at most `max_bytes` bytes.
    pub fn hex_dump(&self, max_bytes: usize) -> String {
        use std::fmt::Write as _;

        let bytes = &self.as_bytes()[..self.inner.size.min(max_bytes)];
        let mut out = String::with_capacity(bytes.len() * 4 + 16);
        for (line, chunk) in bytes.chunks(16).enumerate() {
            let _ = write!(out, "{:08x}: ", line * 16);
            for i in 0..16 {
                match chunk.get(i) {
                    Some(b) => {
                        let _ = write!(out, "{b:02x} ");
                    }
                    None => out.push_str("   "),
                }
            }
            out.push(' ');
            for &b in chunk {
                out.push(if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                });
            }
            out.push('\n');
        }
        out
    }
}

impl AsRef<[u8]> for AddressedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for AddressedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressedBuffer")
            .field("pos0", &self.inner.pos0)
            .field("size", &self.inner.size)
            .field("page_size", &self.inner.page_size)
            .field("ownership", &self.ownership())
            .field("children", &self.children())
            .finish()
    }
}
