use std::fmt;

use common::Fingerprint;

/// Errors that can occur while persisting or merging chunks.
#[derive(Debug)]
pub enum StorageError {
    /// An I/O error occurred.
    Io(std::io::Error),
    /// The chunk-set manifest could not be read or written.
    Manifest(String),
    /// The chunk does not belong to the declared fingerprint or index range.
    InvalidChunk(String),
    /// The merged artifact name is not a flat filename.
    InvalidFilename(String),
    /// The chunk exceeds the configured size limit.
    ChunkTooLarge { actual: u64, limit: u64 },
    /// A chunk declared a different total than the one already recorded.
    TotalMismatch { recorded: u64, received: u64 },
    /// No chunk directory exists for the fingerprint.
    NoChunks(Fingerprint),
    /// The chunk directory exists but holds no chunks.
    EmptyChunkList(Fingerprint),
    /// Some chunk indices are missing.
    Incomplete { expected: u64, missing: Vec<u64> },
    /// The merged bytes do not hash to the fingerprint they were uploaded under.
    FingerprintMismatch {
        expected: Fingerprint,
        actual: Fingerprint,
    },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "storage IO error: {err}"),
            Self::Manifest(msg) => write!(f, "chunk manifest error: {msg}"),
            Self::InvalidChunk(msg) => write!(f, "invalid chunk: {msg}"),
            Self::InvalidFilename(msg) => write!(f, "{msg}"),
            Self::ChunkTooLarge { actual, limit } => {
                write!(f, "chunk exceeds size limit ({actual} > {limit} bytes)")
            }
            Self::TotalMismatch { recorded, received } => write!(
                f,
                "total_chunks {received} conflicts with previously recorded {recorded}"
            ),
            Self::NoChunks(fp) => write!(f, "no chunk data found for {fp}"),
            Self::EmptyChunkList(_) => write!(f, "chunk list empty, cannot merge"),
            Self::Incomplete { expected, missing } => write!(
                f,
                "chunk set incomplete: {} of {expected} chunks missing (first missing index {})",
                missing.len(),
                missing.first().map_or_else(|| "n/a".to_string(), u64::to_string)
            ),
            Self::FingerprintMismatch { expected, actual } => write!(
                f,
                "merged content hashes to {actual}, expected {expected}; chunks discarded"
            ),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
