use serde::Deserialize;

use crate::chunk::DEFAULT_CHUNK_SIZE;

/// Default number of chunk uploads in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 6;

/// Client-side transfer tuning.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Bytes per chunk. Default: 2 MiB.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Maximum concurrent chunk uploads. Default: 6.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}
fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
        }
    }
}
