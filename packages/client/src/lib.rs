//! Client side of resumable chunked uploads: hashing, chunk scheduling and
//! the upload state machine.

pub mod config;
pub mod error;
pub mod hasher;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use error::{HashError, TransportError, UploadError};
pub use scheduler::{ChunkState, ChunkStatus, SchedulePass, ScheduleProgress, Scheduler};
pub use session::{UploadOutcome, UploadSnapshot, UploadStatus, Uploader, UploaderOptions};
pub use transport::{ChunkOutcome, HttpTransport, ProgressFn, Transport};
