use std::path::Path;

use common::Fingerprint;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::error::HashError;

/// Whole-percent progress of `done` out of `total` bytes, capped at 100.
fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (u128::from(done) * 100 / u128::from(total)).min(100) as u8
}

/// Stream a file through SHA-256 in `read_size` reads.
///
/// `on_progress` receives 0..=100 after every read; an empty file reports
/// 100 once. Cancellation is observed between reads.
pub async fn hash_file(
    path: &Path,
    read_size: usize,
    mut on_progress: impl FnMut(u8) + Send,
    cancel: &CancellationToken,
) -> Result<Fingerprint, HashError> {
    let mut file = File::open(path).await?;
    let total = file.metadata().await?.len();

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; read_size.max(1)];
    let mut done = 0u64;

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HashError::Cancelled),
            n = file.read(&mut buf) => n?,
        };
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        done += n as u64;
        on_progress(percent(done, total));
    }

    if total == 0 {
        on_progress(100);
    }
    Ok(Fingerprint::from_bytes(hasher.finalize().into()))
}

/// Fingerprint of an in-memory buffer; identical to hashing the same bytes
/// from disk.
pub fn hash_bytes(data: &[u8]) -> Fingerprint {
    Fingerprint::compute(data)
}
