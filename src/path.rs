//! Forensic provenance addresses.
//!
//! A [`ForensicPath`] records how a byte was reached: the chain of decoders
//! applied and the offsets taken at each level, plus the leaf offset inside
//! the innermost stream.
//!
//! # Format
//! ```text
//! path   = ""                      (top level)
//!        | <offset>-<DECODER>      (one decoder deep)
//!        | <path>-<offset>-<DECODER>
//! display = <offset>               when path is empty
//!         | <path>-<offset>        otherwise
//! ```
//! For example `1000-GZIP-200` is byte 200 of the gzip stream that starts at
//! byte 1000 of the top-level input.
//!
//! # Invariants
//! - Paths are immutable; every operation returns a new value.
//! - Order is lexicographic by path, then numeric by offset.
//! - `depth` is the number of decoder segments and is computed once at
//!   construction.
//! - The display form parses back to an equal value, and is the serde form.

use std::fmt;
use std::ops::Add;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Segment separator inside a forensic path.
pub const SEPARATOR: char = '-';

/// Error returned when parsing a malformed forensic path string.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("malformed forensic path '{0}'")]
pub struct PathParseError(pub String);

/// Provenance address of byte 0 of a buffer.
///
/// Cloning is cheap: the path text is reference-counted.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ForensicPath {
    path: Arc<str>,
    offset: u64,
    depth: u32,
}

impl ForensicPath {
    /// Creates a path from its textual decoder chain and leaf offset.
    pub fn new(path: impl Into<Arc<str>>, offset: u64) -> Self {
        let path = path.into();
        let depth = path.split(SEPARATOR).filter(|s| is_decoder(s)).count() as u32;
        Self {
            path,
            offset,
            depth,
        }
    }

    /// Creates a top-level path at `offset`.
    pub fn from_offset(offset: u64) -> Self {
        Self::new("", offset)
    }

    /// Decoder chain text (empty for top-level input).
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Leaf offset within the addressed stream.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of decoders applied to reach this address.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// True when at least one decoder was applied.
    #[inline]
    pub fn is_recursive(&self) -> bool {
        !self.path.is_empty()
    }

    /// Returns a path one decoder deeper, rooted at the current offset.
    ///
    /// `1000` + `GZIP` becomes `1000-GZIP-0`; `1000-GZIP-200` + `ZIP` becomes
    /// `1000-GZIP-200-ZIP-0`.
    pub fn append(&self, decoder: &str) -> Self {
        let mut s = String::with_capacity(self.path.len() + decoder.len() + 24);
        if !self.path.is_empty() {
            s.push_str(&self.path);
            s.push(SEPARATOR);
        }
        s.push_str(&self.offset.to_string());
        s.push(SEPARATOR);
        s.push_str(decoder);
        Self::new(s, 0)
    }

    /// Rebases the address by `delta` bytes in the top-level stream.
    ///
    /// Used when input is split into chunks processed with a local origin
    /// and later corrected to global offsets. A top-level path moves its
    /// offset; a decoded path moves the numeric prefix of its first segment,
    /// since that is where the decoder chain was entered. A decoded path
    /// whose first segment is not numeric moves its leaf offset instead.
    pub fn shift(&self, delta: u64) -> Self {
        if self.path.is_empty() {
            return Self::new("", self.offset.saturating_add(delta));
        }
        let (head, rest) = match self.path.split_once(SEPARATOR) {
            Some((head, rest)) => (head, Some(rest)),
            None => (&*self.path, None),
        };
        match head.parse::<u64>() {
            Ok(base) => {
                let mut s = base.saturating_add(delta).to_string();
                if let Some(rest) = rest {
                    s.push(SEPARATOR);
                    s.push_str(rest);
                }
                Self {
                    path: Arc::from(s),
                    offset: self.offset,
                    depth: self.depth,
                }
            }
            Err(_) => Self {
                path: Arc::clone(&self.path),
                offset: self.offset.saturating_add(delta),
                depth: self.depth,
            },
        }
    }

    /// Decoder names in application order.
    pub fn decoder_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.path.split(SEPARATOR).filter(|s| is_decoder(s))
    }

    /// Innermost decoder, if any.
    pub fn last_decoder(&self) -> Option<&str> {
        self.decoder_names().last()
    }

    /// True when `decoder` appears as a segment of the path.
    pub fn contains_decoder(&self, decoder: &str) -> bool {
        self.decoder_names().any(|d| d == decoder)
    }

    /// Decoder names joined by the separator (e.g. `GZIP-ZIP`).
    pub fn alpha_part(&self) -> String {
        let mut out = String::new();
        for name in self.decoder_names() {
            if !out.is_empty() {
                out.push(SEPARATOR);
            }
            out.push_str(name);
        }
        out
    }
}

/// A segment is a decoder name unless it is purely numeric.
#[inline]
fn is_decoder(segment: &str) -> bool {
    !segment.is_empty() && !segment.bytes().all(|b| b.is_ascii_digit())
}

/// Returns true when `prefix` can be embedded as a decoder segment.
///
/// The prefix must be non-empty, contain no separator, and not be numeric
/// (otherwise it would read back as an offset).
pub fn is_valid_decoder_name(prefix: &str) -> bool {
    is_decoder(prefix)
        && !prefix.contains(SEPARATOR)
        && prefix.bytes().all(|b| b.is_ascii_graphic())
}

impl Default for ForensicPath {
    fn default() -> Self {
        Self::from_offset(0)
    }
}

impl Add<u64> for &ForensicPath {
    type Output = ForensicPath;

    fn add(self, delta: u64) -> ForensicPath {
        ForensicPath {
            path: Arc::clone(&self.path),
            offset: self.offset.saturating_add(delta),
            depth: self.depth,
        }
    }
}

impl Add<u64> for ForensicPath {
    type Output = ForensicPath;

    fn add(self, delta: u64) -> ForensicPath {
        &self + delta
    }
}

impl fmt::Display for ForensicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.offset)
        } else {
            write!(f, "{}{}{}", self.path, SEPARATOR, self.offset)
        }
    }
}

impl fmt::Debug for ForensicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForensicPath({self})")
    }
}

impl FromStr for ForensicPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || PathParseError(s.to_string());
        match s.rsplit_once(SEPARATOR) {
            None => s.parse::<u64>().map(Self::from_offset).map_err(|_| bad()),
            Some((path, offset)) => {
                let offset = offset.parse::<u64>().map_err(|_| bad())?;
                if path.is_empty() || path.split(SEPARATOR).any(str::is_empty) {
                    return Err(bad());
                }
                Ok(Self::new(path, offset))
            }
        }
    }
}

impl Serialize for ForensicPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ForensicPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
