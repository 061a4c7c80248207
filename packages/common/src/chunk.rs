//! Fixed-size chunking of a file into index-addressed byte ranges.
//!
//! Only ranges are computed here; bytes are read when a chunk is sent.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// Default chunk size: 2 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("invalid chunk id: {0}")]
    InvalidId(String),
}

/// Identifier of one chunk within a fingerprint's chunk set.
///
/// Textual form is `{fingerprint}-{index}`. The index is the numeric suffix
/// after the last `-`, which is what ordering during merge relies on.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId {
    fingerprint: Fingerprint,
    index: u64,
}

impl ChunkId {
    pub fn new(fingerprint: Fingerprint, index: u64) -> Self {
        Self { fingerprint, index }
    }

    pub fn parse(s: &str) -> Result<Self, ChunkError> {
        let (fp, index) = s
            .rsplit_once('-')
            .ok_or_else(|| ChunkError::InvalidId(s.to_string()))?;
        let fingerprint =
            Fingerprint::from_hex(fp).map_err(|_| ChunkError::InvalidId(s.to_string()))?;
        // Reject "+1", "01" and friends so each index has exactly one spelling.
        if index.is_empty()
            || !index.bytes().all(|b| b.is_ascii_digit())
            || (index.len() > 1 && index.starts_with('0'))
        {
            return Err(ChunkError::InvalidId(s.to_string()));
        }
        let index = index
            .parse()
            .map_err(|_| ChunkError::InvalidId(s.to_string()))?;
        Ok(Self { fingerprint, index })
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn index(&self) -> u64 {
        self.index
    }
}

impl FromStr for ChunkId {
    type Err = ChunkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.fingerprint, self.index)
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({self})")
    }
}

impl Serialize for ChunkId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChunkId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// One contiguous byte range `[start, end)` of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub fingerprint: Fingerprint,
    pub index: u64,
    pub total_chunks: u64,
    pub start: u64,
    pub end: u64,
    pub filename: String,
}

impl ChunkDescriptor {
    pub fn id(&self) -> ChunkId {
        ChunkId::new(self.fingerprint, self.index)
    }

    pub fn range(&self) -> Range<u64> {
        self.start..self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Number of chunks a file of `file_size` bytes splits into.
pub fn total_chunks(file_size: u64, chunk_size: u64) -> Result<u64, ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::ZeroChunkSize);
    }
    Ok(file_size.div_ceil(chunk_size))
}

/// Split a file into chunk descriptors.
///
/// Every chunk except the last is exactly `chunk_size` bytes; the last holds
/// the remainder. The result depends only on the arguments.
pub fn split(
    file_size: u64,
    chunk_size: u64,
    fingerprint: &Fingerprint,
    filename: &str,
) -> Result<Vec<ChunkDescriptor>, ChunkError> {
    let total = total_chunks(file_size, chunk_size)?;
    Ok((0..total)
        .map(|index| {
            let start = index * chunk_size;
            ChunkDescriptor {
                fingerprint: *fingerprint,
                index,
                total_chunks: total,
                start,
                end: (start + chunk_size).min(file_size),
                filename: filename.to_string(),
            }
        })
        .collect())
}
