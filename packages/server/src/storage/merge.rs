use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{ChunkId, Fingerprint};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use super::chunk_store::ChunkStore;
use super::error::StorageError;
use crate::utils::filename::validate_flat_filename;

/// A successfully merged artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub path: PathBuf,
    pub size: u64,
}

impl ChunkStore {
    /// Concatenate all chunks of `fingerprint` in index order into the merged
    /// artifact, then drop the chunk directory.
    ///
    /// Refuses to merge unless every index in `0..total_chunks` is present.
    /// Merges of the same fingerprint run one at a time.
    pub async fn merge(
        &self,
        fingerprint: &Fingerprint,
        filename: &str,
    ) -> Result<MergeOutcome, StorageError> {
        let filename = validate_flat_filename(filename)
            .map_err(|e| StorageError::InvalidFilename(e.message()))?;

        let lock = self.merge_locks.entry(*fingerprint).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.merge_locked(fingerprint, filename).await
        };
        drop(lock);
        self.merge_locks
            .remove_if(fingerprint, |_, l| Arc::strong_count(l) == 1);

        result
    }

    async fn merge_locked(
        &self,
        fingerprint: &Fingerprint,
        filename: &str,
    ) -> Result<MergeOutcome, StorageError> {
        let Some(chunks) = self.read_chunk_dir(fingerprint).await? else {
            return Err(StorageError::NoChunks(*fingerprint));
        };
        if chunks.is_empty() {
            return Err(StorageError::EmptyChunkList(*fingerprint));
        }

        // Without a manifest the best we can demand is a gap-free 0..n.
        let expected = self
            .recorded_total(fingerprint)
            .await?
            .unwrap_or(chunks.len() as u64);
        check_complete(&chunks, expected)?;

        fs::create_dir_all(self.merged_root()).await?;
        let dest = self.merged_path(fingerprint, filename);
        match fs::remove_file(&dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let (size, actual) = self.concatenate(&chunks, &dest).await?;

        if self.verify_merged && actual != *fingerprint {
            let _ = fs::remove_file(&dest).await;
            // The stored chunks are bad; dropping them lets the client start over.
            self.discard_chunks(fingerprint).await;
            return Err(StorageError::FingerprintMismatch {
                expected: *fingerprint,
                actual,
            });
        }

        self.discard_chunks(fingerprint).await;
        info!(
            fingerprint = %fingerprint,
            chunks = chunks.len(),
            size,
            path = %dest.display(),
            "Merged chunks"
        );

        Ok(MergeOutcome { path: dest, size })
    }

    /// Stream chunks into `dest` in the given order, hashing along the way.
    async fn concatenate(
        &self,
        chunks: &[ChunkId],
        dest: &Path,
    ) -> Result<(u64, Fingerprint), StorageError> {
        let mut out = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dest)
            .await?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024]; // 64KB copy buffer

        for id in chunks {
            let mut input = fs::File::open(self.chunk_path(id)).await?;
            loop {
                let n = input.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                out.write_all(&buf[..n]).await?;
                size += n as u64;
            }
        }

        out.flush().await?;
        out.sync_all().await?;

        Ok((size, Fingerprint::from_bytes(hasher.finalize().into())))
    }

    async fn discard_chunks(&self, fingerprint: &Fingerprint) {
        let dir = self.chunk_dir(fingerprint);
        if let Err(e) = fs::remove_dir_all(&dir).await {
            warn!(
                fingerprint = %fingerprint,
                error = %e,
                "Failed to remove chunk directory"
            );
        }
    }
}

/// `chunks` must be sorted by index.
fn check_complete(chunks: &[ChunkId], expected: u64) -> Result<(), StorageError> {
    let present: HashSet<u64> = chunks.iter().map(ChunkId::index).collect();
    let missing: Vec<u64> = (0..expected).filter(|i| !present.contains(i)).collect();
    let stray = chunks.iter().any(|id| id.index() >= expected);

    if missing.is_empty() && !stray {
        Ok(())
    } else {
        Err(StorageError::Incomplete { expected, missing })
    }
}
