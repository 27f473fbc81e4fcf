//! Content-shape analyses over raw byte slices.
//!
//! These are the pure kernels behind the cached accessors on
//! [`AddressedBuffer`](super::AddressedBuffer). The engine uses them to decide
//! which scanners a buffer is worth handing to.

/// Byte-value histogram of a slice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ByteHistogram {
    counts: [u64; 256],
    total: u64,
    distinct: usize,
}

impl ByteHistogram {
    /// Counts every byte of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let mut counts = [0u64; 256];
        for &b in bytes {
            counts[b as usize] += 1;
        }
        let distinct = counts.iter().filter(|&&c| c > 0).count();
        Self {
            counts,
            total: bytes.len() as u64,
            distinct,
        }
    }

    /// Occurrences of `byte`.
    #[inline]
    pub fn count(&self, byte: u8) -> u64 {
        self.counts[byte as usize]
    }

    /// Total bytes counted.
    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of distinct byte values present.
    #[inline]
    pub fn distinct(&self) -> usize {
        self.distinct
    }

    /// Most frequent byte and its count; ties resolve to the smaller value.
    pub fn most_common(&self) -> Option<(u8, u64)> {
        let mut best: Option<(u8, u64)> = None;
        for (b, &c) in self.counts.iter().enumerate() {
            if c > 0 && best.is_none_or(|(_, bc)| c > bc) {
                best = Some((b as u8, c));
            }
        }
        best
    }

    /// Present byte values with their counts, in byte order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c > 0)
            .map(|(b, &c)| (b as u8, c))
    }

    /// Shannon entropy in bits per byte (0.0 for empty input).
    pub fn entropy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let total = self.total as f64;
        self.counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / total;
                -p * p.log2()
            })
            .sum()
    }
}

/// Smallest `n` in `1..max_ngram` such that `page` is a repetition of its
/// first `n` bytes, or 0 when there is none.
///
/// A page only counts as repeating when it holds at least two full copies of
/// the n-gram, so empty and single-byte pages report 0.
pub fn repeating_ngram_size(page: &[u8], max_ngram: usize) -> usize {
    for n in 1..max_ngram {
        if n.saturating_mul(2) > page.len() {
            break;
        }
        // n-periodic <=> every byte equals the byte n positions earlier.
        if page[n..] == page[..page.len() - n] {
            return n;
        }
    }
    0
}

/// True when every byte of `bytes` equals `byte` (vacuously true when empty).
#[inline]
pub fn is_constant(bytes: &[u8], byte: u8) -> bool {
    bytes.iter().all(|&b| b == byte)
}
