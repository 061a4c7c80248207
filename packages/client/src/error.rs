use std::io;

use common::ChunkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("hashing cancelled")]
    Cancelled,
    #[error("failed to read file: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with `success: false`.
    #[error("{0}")]
    Rejected(String),
    #[error("unexpected response (status {status}): {body}")]
    Unexpected { status: u16, body: String },
    #[error("server returned an invalid chunk id: {0}")]
    InvalidChunkId(#[from] ChunkError),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("cannot upload an empty file")]
    EmptyFile,
    #[error("cancelled")]
    Cancelled,
    #[error("an upload is already in progress")]
    Busy,
    #[error("upload is not paused")]
    NotPaused,
    #[error("failed to read file: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Chunking(#[from] ChunkError),
    #[error("failed to query uploaded chunks: {0}")]
    Check(#[source] TransportError),
    /// `index` is zero-based; the message names the one-based chunk number.
    #[error("chunk {} of {total} failed to upload: {source}", .index + 1)]
    ChunkFailed {
        index: u64,
        total: u64,
        #[source]
        source: TransportError,
    },
    #[error("failed to read chunk {} from disk: {source}", .index + 1)]
    ChunkRead {
        index: u64,
        #[source]
        source: io::Error,
    },
    #[error("merge failed: {0}")]
    Merge(#[source] TransportError),
    #[error("upload task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<HashError> for UploadError {
    fn from(err: HashError) -> Self {
        match err {
            HashError::Cancelled => UploadError::Cancelled,
            HashError::Io(e) => UploadError::Io(e),
        }
    }
}
