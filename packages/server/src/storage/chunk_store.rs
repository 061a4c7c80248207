use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{ChunkId, Fingerprint};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::error::StorageError;
use crate::config::StorageConfig;

/// Hidden file recording the declared chunk count of a fingerprint.
const MANIFEST_FILE: &str = ".manifest.json";

#[derive(Debug, Serialize, Deserialize)]
struct ChunkManifest {
    total_chunks: u64,
}

/// A chunk received from a client, not yet persisted.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub fingerprint: Fingerprint,
    pub chunk_id: ChunkId,
    pub index: u64,
    pub total_chunks: u64,
    pub data: Vec<u8>,
}

impl ChunkUpload {
    fn validate(&self, max_size: u64) -> Result<(), StorageError> {
        if *self.chunk_id.fingerprint() != self.fingerprint {
            return Err(StorageError::InvalidChunk(format!(
                "chunk id {} does not belong to fingerprint {}",
                self.chunk_id, self.fingerprint
            )));
        }
        if self.chunk_id.index() != self.index {
            return Err(StorageError::InvalidChunk(format!(
                "chunk id {} does not match chunk index {}",
                self.chunk_id, self.index
            )));
        }
        if self.index >= self.total_chunks {
            return Err(StorageError::InvalidChunk(format!(
                "chunk index {} out of range for {} chunks",
                self.index, self.total_chunks
            )));
        }
        let size = self.data.len() as u64;
        if size > max_size {
            return Err(StorageError::ChunkTooLarge {
                actual: size,
                limit: max_size,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Stored,
    AlreadyPresent,
}

/// Filesystem-backed chunk storage.
///
/// Layout under the configured root:
/// `chunks/{fingerprint}/{fingerprint}-{index}` for received chunks and
/// `merged/{fingerprint}-{filename}` for merged artifacts. A chunk file is
/// written once and never rewritten.
pub struct ChunkStore {
    chunk_root: PathBuf,
    merged_root: PathBuf,
    max_chunk_size: u64,
    pub(super) verify_merged: bool,
    pub(super) merge_locks: DashMap<Fingerprint, Arc<Mutex<()>>>,
}

impl ChunkStore {
    /// Create the store, making sure its directories exist.
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let chunk_root = config.root.join("chunks");
        let merged_root = config.root.join("merged");
        fs::create_dir_all(&chunk_root).await?;
        fs::create_dir_all(&merged_root).await?;
        Ok(Self {
            chunk_root,
            merged_root,
            max_chunk_size: config.max_chunk_size,
            verify_merged: config.verify_merged,
            merge_locks: DashMap::new(),
        })
    }

    pub fn max_chunk_size(&self) -> u64 {
        self.max_chunk_size
    }

    pub(super) fn chunk_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.chunk_root.join(fingerprint.to_hex())
    }

    pub(super) fn chunk_path(&self, id: &ChunkId) -> PathBuf {
        self.chunk_dir(id.fingerprint()).join(id.to_string())
    }

    fn manifest_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.chunk_dir(fingerprint).join(MANIFEST_FILE)
    }

    pub(super) fn merged_root(&self) -> &Path {
        &self.merged_root
    }

    /// Path of the merged artifact for a fingerprint and filename.
    pub fn merged_path(&self, fingerprint: &Fingerprint, filename: &str) -> PathBuf {
        self.merged_root.join(format!("{fingerprint}-{filename}"))
    }

    /// Chunk ids already persisted for `fingerprint`, in index order.
    ///
    /// A fingerprint nothing was received for yields an empty list.
    pub async fn list_uploaded_chunks(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<ChunkId>, StorageError> {
        Ok(self.read_chunk_dir(fingerprint).await?.unwrap_or_default())
    }

    /// Persist a chunk unless a chunk with the same id already exists.
    pub async fn receive_chunk(&self, upload: &ChunkUpload) -> Result<ReceiveOutcome, StorageError> {
        upload.validate(self.max_chunk_size)?;

        let dir = self.chunk_dir(&upload.fingerprint);
        fs::create_dir_all(&dir).await?;
        self.record_total(&upload.fingerprint, upload.total_chunks)
            .await?;

        let path = self.chunk_path(&upload.chunk_id);
        if fs::try_exists(&path).await? {
            debug!(chunk_id = %upload.chunk_id, "Chunk already present");
            return Ok(ReceiveOutcome::AlreadyPresent);
        }

        write_atomically(&dir, &path, &upload.data).await?;
        info!(
            fingerprint = %upload.fingerprint,
            index = upload.index,
            total = upload.total_chunks,
            size = upload.data.len(),
            "Stored chunk"
        );
        Ok(ReceiveOutcome::Stored)
    }

    /// Read the chunk directory. `None` if it does not exist.
    pub(super) async fn read_chunk_dir(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<Vec<ChunkId>>, StorageError> {
        let mut entries = match fs::read_dir(self.chunk_dir(fingerprint)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Manifest and in-flight temp files.
            if name.starts_with('.') {
                continue;
            }
            match ChunkId::parse(name) {
                Ok(id) if id.fingerprint() == fingerprint => ids.push(id),
                _ => debug!(file = name, "Ignoring unexpected file in chunk directory"),
            }
        }
        ids.sort_by_key(ChunkId::index);
        Ok(Some(ids))
    }

    /// The chunk count declared by the first chunk received, if any.
    pub(super) async fn recorded_total(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<u64>, StorageError> {
        match fs::read(self.manifest_path(fingerprint)).await {
            Ok(bytes) => serde_json::from_slice::<ChunkManifest>(&bytes)
                .map(|m| Some(m.total_chunks))
                .map_err(|e| StorageError::Manifest(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Record `total` for `fingerprint`, or check it against the recorded one.
    ///
    /// The manifest is published with a hard link, so exactly one of several
    /// concurrent first chunks gets to record its total.
    async fn record_total(&self, fingerprint: &Fingerprint, total: u64) -> Result<(), StorageError> {
        if let Some(recorded) = self.recorded_total(fingerprint).await? {
            return check_total(recorded, total);
        }

        let json = serde_json::to_vec(&ChunkManifest {
            total_chunks: total,
        })
        .map_err(|e| StorageError::Manifest(e.to_string()))?;
        let published = write_new(
            &self.chunk_dir(fingerprint),
            &self.manifest_path(fingerprint),
            &json,
        )
        .await;

        match published {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match self.recorded_total(fingerprint).await? {
                    Some(recorded) => check_total(recorded, total),
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn check_total(recorded: u64, received: u64) -> Result<(), StorageError> {
    if recorded == received {
        Ok(())
    } else {
        Err(StorageError::TotalMismatch { recorded, received })
    }
}

/// Write `data` to a temp file in `dir`, then link it to `path`.
/// Fails with `AlreadyExists` if `path` is already there.
async fn write_new(dir: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    let temp_path = dir.join(format!(".{}.part", uuid::Uuid::new_v4()));

    if let Err(e) = fs::write(&temp_path, data).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    let linked = fs::hard_link(&temp_path, path).await;
    let _ = fs::remove_file(&temp_path).await;
    linked
}

/// Write `data` to a temp file in `dir`, then rename it onto `path`.
async fn write_atomically(dir: &Path, path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let temp_path = dir.join(format!(".{}.part", uuid::Uuid::new_v4()));

    if let Err(e) = fs::write(&temp_path, data).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    Ok(())
}
