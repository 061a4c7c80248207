mod chunk_store;
mod error;
mod merge;

pub use chunk_store::{ChunkStore, ChunkUpload, ReceiveOutcome};
pub use error::StorageError;
pub use merge::MergeOutcome;
