//! Bounded-concurrency chunk upload with pause and resume.
//!
//! A pass drives every chunk that has not succeeded yet through the
//! [`Transport`], at most `concurrency` at a time. Each in-flight chunk holds a
//! child of the pass's root [`CancellationToken`]; pausing cancels them and the
//! affected chunks fall back to `Pending` with their progress reverted.

use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::{ChunkDescriptor, ChunkId};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::transport::{ChunkOutcome, ProgressFn, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Uploading,
    Success,
    Error,
}

/// Client-side view of one chunk.
#[derive(Debug, Clone)]
pub struct ChunkState {
    pub descriptor: ChunkDescriptor,
    /// Bytes confirmed sent, `0..=size`.
    pub loaded: u64,
    pub status: ChunkStatus,
}

impl ChunkState {
    pub fn size(&self) -> u64 {
        self.descriptor.len()
    }
}

/// Aggregate progress over all chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleProgress {
    /// `round(uploaded_bytes / total_bytes * 100)`, capped at 100.
    pub percentage: u8,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub pending: usize,
    pub uploading: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// How a pass ended when no chunk failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePass {
    /// Every chunk is `Success`.
    Completed,
    /// The pass was paused; unfinished chunks are `Pending`.
    Paused,
}

/// Called with the new aggregate after every change, under the state lock.
/// Must not call back into the scheduler.
pub type ProgressListener = Arc<dyn Fn(ScheduleProgress) + Send + Sync>;

struct PassState {
    chunks: Vec<ChunkState>,
    /// Abort handles of in-flight chunks, by index.
    active: HashMap<u64, CancellationToken>,
    paused: bool,
    root: CancellationToken,
}

struct Shared {
    state: Mutex<PassState>,
    total_bytes: u64,
    listener: Option<ProgressListener>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PassState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to the state and publish the resulting progress.
    fn update<R>(&self, f: impl FnOnce(&mut PassState) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut state);
        if let Some(listener) = &self.listener {
            listener(progress_of(&state.chunks, self.total_bytes));
        }
        result
    }
}

fn progress_of(chunks: &[ChunkState], total_bytes: u64) -> ScheduleProgress {
    let mut progress = ScheduleProgress {
        total_bytes,
        ..Default::default()
    };
    for chunk in chunks {
        progress.uploaded_bytes += chunk.loaded;
        match chunk.status {
            ChunkStatus::Pending => progress.pending += 1,
            ChunkStatus::Uploading => progress.uploading += 1,
            ChunkStatus::Success => progress.succeeded += 1,
            ChunkStatus::Error => progress.failed += 1,
        }
    }
    progress.percentage = if total_bytes == 0 {
        100
    } else {
        let uploaded = u128::from(progress.uploaded_bytes);
        let total = u128::from(total_bytes);
        ((uploaded * 100 + total / 2) / total).min(100) as u8
    };
    progress
}

pub struct Scheduler {
    transport: Arc<dyn Transport>,
    source: PathBuf,
    concurrency: usize,
    shared: Arc<Shared>,
}

impl Scheduler {
    /// `chunks` must be the output of [`common::split`] for the file at `source`.
    pub fn new(
        transport: Arc<dyn Transport>,
        source: impl Into<PathBuf>,
        chunks: Vec<ChunkDescriptor>,
        concurrency: usize,
        listener: Option<ProgressListener>,
    ) -> Self {
        let total_bytes = chunks.iter().map(ChunkDescriptor::len).sum();
        let chunks = chunks
            .into_iter()
            .map(|descriptor| ChunkState {
                descriptor,
                loaded: 0,
                status: ChunkStatus::Pending,
            })
            .collect();

        Self {
            transport,
            source: source.into(),
            concurrency: concurrency.max(1),
            shared: Arc::new(Shared {
                state: Mutex::new(PassState {
                    chunks,
                    active: HashMap::new(),
                    paused: false,
                    root: CancellationToken::new(),
                }),
                total_bytes,
                listener,
            }),
        }
    }

    pub fn chunks(&self) -> Vec<ChunkState> {
        self.shared.lock().chunks.clone()
    }

    pub fn progress(&self) -> ScheduleProgress {
        progress_of(&self.shared.lock().chunks, self.shared.total_bytes)
    }

    pub fn is_complete(&self) -> bool {
        self.shared
            .lock()
            .chunks
            .iter()
            .all(|c| c.status == ChunkStatus::Success)
    }

    /// Mark chunks the server already holds as done. Returns how many chunks
    /// changed state; ids of other files are ignored.
    pub fn mark_uploaded(&self, ids: &[ChunkId]) -> usize {
        self.shared.update(|state| {
            let mut marked = 0;
            for id in ids {
                let Some(chunk) = state.chunks.get_mut(id.index() as usize) else {
                    continue;
                };
                if chunk.descriptor.fingerprint != *id.fingerprint()
                    || chunk.status == ChunkStatus::Success
                {
                    continue;
                }
                chunk.status = ChunkStatus::Success;
                chunk.loaded = chunk.size();
                marked += 1;
            }
            marked
        })
    }

    /// Abort every in-flight chunk and stop the running pass.
    pub fn pause(&self) {
        let mut state = self.shared.lock();
        state.paused = true;
        for token in state.active.values() {
            token.cancel();
        }
        state.root.cancel();
        debug!(in_flight = state.active.len(), "Upload paused");
    }

    /// Drop a pause request that arrived after the last pass ended.
    pub fn clear_pause(&self) {
        self.shared.lock().paused = false;
    }

    /// Upload every chunk that is not `Success` yet.
    ///
    /// Also the resume path: each call starts a fresh pass with a new
    /// concurrency gate. The first explicit chunk failure aborts the other
    /// in-flight chunks and is returned. A pause requested before the pass
    /// starts is honored immediately.
    pub async fn run(&self) -> Result<SchedulePass, UploadError> {
        let (root, pending) = {
            let mut state = self.shared.lock();
            if std::mem::take(&mut state.paused) {
                return Ok(SchedulePass::Paused);
            }
            state.root = CancellationToken::new();
            let pending: Vec<ChunkDescriptor> = state
                .chunks
                .iter()
                .filter(|c| c.status != ChunkStatus::Success)
                .map(|c| c.descriptor.clone())
                .collect();
            (state.root.clone(), pending)
        };

        if pending.is_empty() {
            return Ok(SchedulePass::Completed);
        }
        info!(
            pending = pending.len(),
            concurrency = self.concurrency,
            "Starting upload pass"
        );

        let gate = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for descriptor in pending {
            let permit = tokio::select! {
                biased;
                _ = root.cancelled() => break,
                permit = gate.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let task = ChunkTask {
                transport: self.transport.clone(),
                source: self.source.clone(),
                shared: self.shared.clone(),
                token: root.child_token(),
                root: root.clone(),
                descriptor,
            };
            tasks.spawn(async move {
                let _permit = permit;
                task.run().await
            });
        }

        let mut failure: Option<UploadError> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(UploadError::from).and_then(|r| r);
            if let Err(err) = result {
                root.cancel();
                if failure.is_none() {
                    failure = Some(err);
                } else {
                    debug!("Further chunk failure: {err}");
                }
            }
        }

        let paused = self.shared.update(|state| {
            // Tasks that panicked never settled their chunk.
            for chunk in &mut state.chunks {
                if chunk.status == ChunkStatus::Uploading {
                    chunk.status = ChunkStatus::Pending;
                    chunk.loaded = 0;
                }
            }
            state.active.clear();
            std::mem::take(&mut state.paused)
        });

        if let Some(err) = failure {
            warn!("Upload pass failed: {err}");
            return Err(err);
        }
        if self.is_complete() {
            return Ok(SchedulePass::Completed);
        }
        if !paused {
            debug!("Upload pass stopped without pause or failure");
        }
        Ok(SchedulePass::Paused)
    }
}

/// One chunk's trip through the transport.
struct ChunkTask {
    transport: Arc<dyn Transport>,
    source: PathBuf,
    shared: Arc<Shared>,
    token: CancellationToken,
    root: CancellationToken,
    descriptor: ChunkDescriptor,
}

impl ChunkTask {
    fn slot(state: &mut PassState, index: u64) -> Option<&mut ChunkState> {
        state.chunks.get_mut(index as usize)
    }

    /// Leave the in-flight set with the given status and byte count.
    fn settle(&self, status: ChunkStatus, loaded: u64) {
        let index = self.descriptor.index;
        self.shared.update(|state| {
            state.active.remove(&index);
            if let Some(chunk) = Self::slot(state, index) {
                chunk.status = status;
                chunk.loaded = loaded;
            }
        });
    }

    async fn run(self) -> Result<(), UploadError> {
        let index = self.descriptor.index;
        let size = self.descriptor.len();

        self.shared.update(|state| {
            state.active.insert(index, self.token.clone());
            if let Some(chunk) = Self::slot(state, index) {
                chunk.status = ChunkStatus::Uploading;
                chunk.loaded = 0;
            }
        });

        let data = tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                self.settle(ChunkStatus::Pending, 0);
                return Ok(());
            }
            data = read_range(&self.source, &self.descriptor) => data,
        };
        let data = match data {
            Ok(data) => data,
            Err(source) => {
                self.settle(ChunkStatus::Error, 0);
                self.root.cancel();
                return Err(UploadError::ChunkRead { index, source });
            }
        };

        let shared = self.shared.clone();
        let on_progress: ProgressFn = Arc::new(move |sent| {
            shared.update(|state| {
                if let Some(chunk) = Self::slot(state, index) {
                    if chunk.status == ChunkStatus::Uploading {
                        chunk.loaded = chunk.loaded.max(sent.min(size));
                    }
                }
            });
        });

        let outcome = self
            .transport
            .upload_chunk(&self.descriptor, data, on_progress, self.token.clone())
            .await;

        match outcome {
            Ok(ChunkOutcome::Sent) => {
                debug!(index, "Chunk uploaded");
                self.settle(ChunkStatus::Success, size);
                Ok(())
            }
            Ok(ChunkOutcome::Cancelled) => {
                self.settle(ChunkStatus::Pending, 0);
                Ok(())
            }
            Err(_) if self.token.is_cancelled() => {
                self.settle(ChunkStatus::Pending, 0);
                Ok(())
            }
            Err(source) => {
                self.settle(ChunkStatus::Error, 0);
                self.root.cancel();
                Err(UploadError::ChunkFailed {
                    index,
                    total: self.descriptor.total_chunks,
                    source,
                })
            }
        }
    }
}

/// Read the chunk's byte range from the source file.
async fn read_range(path: &Path, chunk: &ChunkDescriptor) -> io::Result<Vec<u8>> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(chunk.start)).await?;
    let mut data = vec![0u8; chunk.len() as usize];
    file.read_exact(&mut data).await?;
    Ok(data)
}
