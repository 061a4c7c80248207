pub mod api;
pub mod chunk;
pub mod config;
pub mod fingerprint;

pub use api::{ApiResponse, MergeRequest, MergeResult};
pub use chunk::{ChunkDescriptor, ChunkError, ChunkId, split, total_chunks};
pub use config::TransferConfig;
pub use fingerprint::{Fingerprint, FingerprintError};
