//! Upload state machine.
//!
//! `Idle → Hashing → Checking → Uploading ⇄ Paused → Success`, with `Error`
//! reachable from every active state. The current state is published as an
//! [`UploadSnapshot`] on a `watch` channel.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::{Fingerprint, TransferConfig, split};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::UploadError;
use crate::hasher::hash_file;
use crate::scheduler::{ProgressListener, SchedulePass, ScheduleProgress, Scheduler};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStatus {
    #[default]
    Idle,
    Hashing,
    Checking,
    Uploading,
    Paused,
    Success,
    Error,
}

impl UploadStatus {
    /// Whether an `upload()` call is still driving this session.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Hashing | Self::Checking | Self::Uploading)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSnapshot {
    pub status: UploadStatus,
    /// Hashing progress, 0..=100.
    pub hash_progress: u8,
    /// Upload progress, 0..=100.
    pub percentage: u8,
    pub fingerprint: Option<Fingerprint>,
    pub error_message: Option<String>,
}

/// Knobs fixed when the uploader is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploaderOptions {
    /// Bytes per chunk. Default: 2 MiB.
    pub chunk_size: u64,
    /// Chunk uploads in flight at once. Default: 6.
    pub concurrency: usize,
}

impl Default for UploaderOptions {
    fn default() -> Self {
        TransferConfig::default().into()
    }
}

impl From<TransferConfig> for UploaderOptions {
    fn from(config: TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            concurrency: config.concurrency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Merged on the server at `file_path`.
    Completed { file_path: String },
    /// Stopped by [`Uploader::pause`]; continue with [`Uploader::resume`].
    Paused,
}

/// State of the file currently being uploaded.
struct Session {
    fingerprint: Fingerprint,
    filename: String,
    scheduler: Arc<Scheduler>,
}

pub struct Uploader {
    transport: Arc<dyn Transport>,
    options: UploaderOptions,
    snapshot: watch::Sender<UploadSnapshot>,
    session: Mutex<Option<Session>>,
    hash_cancel: Mutex<CancellationToken>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Uploader {
    pub fn new(transport: Arc<dyn Transport>, options: UploaderOptions) -> Self {
        let (snapshot, _) = watch::channel(UploadSnapshot::default());
        Self {
            transport,
            options,
            snapshot,
            session: Mutex::new(None),
            hash_cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn options(&self) -> &UploaderOptions {
        &self.options
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn status(&self) -> UploadStatus {
        self.snapshot.borrow().status
    }

    fn set_status(&self, status: UploadStatus) {
        self.snapshot.send_modify(|s| s.status = status);
    }

    /// Record `err` as the session's failure and hand it back.
    fn fail(&self, err: UploadError) -> UploadError {
        warn!("Upload failed: {err}");
        let message = err.to_string();
        self.snapshot.send_modify(|s| {
            s.status = UploadStatus::Error;
            s.error_message = Some(message);
        });
        err
    }

    /// Upload `path` from scratch, skipping chunks the server already has.
    ///
    /// Returns [`UploadOutcome::Paused`] if [`pause`](Self::pause) interrupts
    /// the transfer.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn upload(&self, path: &Path) -> Result<UploadOutcome, UploadError> {
        let hash_cancel = {
            let mut started = false;
            self.snapshot.send_if_modified(|s| {
                if s.status.is_busy() {
                    return false;
                }
                *s = UploadSnapshot {
                    status: UploadStatus::Hashing,
                    ..Default::default()
                };
                started = true;
                true
            });
            if !started {
                return Err(UploadError::Busy);
            }
            *lock(&self.session) = None;
            let token = CancellationToken::new();
            *lock(&self.hash_cancel) = token.clone();
            token
        };

        match self.prepare(path, &hash_cancel).await {
            Ok(()) => self.drive().await,
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Hashing and Checking: builds the session for `path`.
    async fn prepare(
        &self,
        path: &Path,
        hash_cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let file_size = tokio::fs::metadata(path).await?.len();
        if file_size == 0 {
            return Err(UploadError::EmptyFile);
        }
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());

        let read_size = usize::try_from(self.options.chunk_size).unwrap_or(usize::MAX);
        let fingerprint = hash_file(
            path,
            read_size,
            |p| self.snapshot.send_modify(|s| s.hash_progress = p),
            hash_cancel,
        )
        .await?;
        info!(%fingerprint, size = file_size, "File hashed");

        self.snapshot.send_modify(|s| {
            s.status = UploadStatus::Checking;
            s.hash_progress = 100;
            s.fingerprint = Some(fingerprint);
        });

        let chunks = split(file_size, self.options.chunk_size, &fingerprint, &filename)?;
        let snapshot = self.snapshot.clone();
        let listener: ProgressListener = Arc::new(move |p: ScheduleProgress| {
            snapshot.send_modify(|s| s.percentage = p.percentage);
        });
        let scheduler = Scheduler::new(
            self.transport.clone(),
            PathBuf::from(path),
            chunks,
            self.options.concurrency,
            Some(listener),
        );

        let uploaded = self
            .transport
            .uploaded_chunks(&fingerprint)
            .await
            .map_err(UploadError::Check)?;
        let skipped = scheduler.mark_uploaded(&uploaded);
        if skipped > 0 {
            info!(skipped, "Resuming upload, server already holds some chunks");
        }

        *lock(&self.session) = Some(Session {
            fingerprint,
            filename,
            scheduler: Arc::new(scheduler),
        });
        Ok(())
    }

    /// Uploading: one scheduler pass, then merge when it completes.
    async fn drive(&self) -> Result<UploadOutcome, UploadError> {
        let Some((scheduler, fingerprint, filename)) = lock(&self.session)
            .as_ref()
            .map(|s| (s.scheduler.clone(), s.fingerprint, s.filename.clone()))
        else {
            return Err(self.fail(UploadError::NotPaused));
        };

        self.set_status(UploadStatus::Uploading);
        match scheduler.run().await {
            Ok(SchedulePass::Paused) => {
                self.set_status(UploadStatus::Paused);
                Ok(UploadOutcome::Paused)
            }
            Ok(SchedulePass::Completed) => self.merge(&fingerprint, &filename).await,
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn merge(
        &self,
        fingerprint: &Fingerprint,
        filename: &str,
    ) -> Result<UploadOutcome, UploadError> {
        let result = self
            .transport
            .merge(fingerprint, filename)
            .await
            .map_err(|e| self.fail(UploadError::Merge(e)))?;

        info!(file_path = %result.file_path, size = result.size, "Upload complete");
        self.snapshot.send_modify(|s| {
            s.status = UploadStatus::Success;
            s.percentage = 100;
        });
        Ok(UploadOutcome::Completed {
            file_path: result.file_path,
        })
    }

    /// Abort in-flight chunk transfers. Only valid while uploading.
    pub fn pause(&self) -> bool {
        let paused = self.snapshot.send_if_modified(|s| {
            if s.status != UploadStatus::Uploading {
                return false;
            }
            s.status = UploadStatus::Paused;
            true
        });
        if paused {
            if let Some(session) = lock(&self.session).as_ref() {
                session.scheduler.pause();
            }
        }
        paused
    }

    /// Re-drive the chunks that are not uploaded yet.
    ///
    /// Fails with [`UploadError::NotPaused`] without touching the session
    /// unless the upload is paused.
    pub async fn resume(&self) -> Result<UploadOutcome, UploadError> {
        // Stale pause requests are dropped before the status leaves `Paused`.
        let resumed = self.snapshot.send_if_modified(|s| {
            if s.status != UploadStatus::Paused {
                return false;
            }
            if let Some(session) = lock(&self.session).as_ref() {
                session.scheduler.clear_pause();
            }
            s.status = UploadStatus::Uploading;
            true
        });
        if !resumed {
            return Err(UploadError::NotPaused);
        }
        self.drive().await
    }

    /// Stop hashing. The running `upload()` fails with
    /// [`UploadError::Cancelled`]. Returns whether hashing was in progress.
    pub fn cancel(&self) -> bool {
        let hashing = self.status() == UploadStatus::Hashing;
        lock(&self.hash_cancel).cancel();
        hashing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use crate::scheduler::tests::{MockTransport, pattern};

    struct Fixture {
        _dir: tempfile::TempDir,
        path: PathBuf,
        data: Vec<u8>,
        transport: Arc<MockTransport>,
        uploader: Arc<Uploader>,
    }

    fn fixture(len: usize, transport: MockTransport) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mp4");
        let data = pattern(len);
        std::fs::write(&path, &data).unwrap();

        let transport = Arc::new(transport);
        let uploader = Arc::new(Uploader::new(
            transport.clone(),
            UploaderOptions {
                chunk_size: 1000,
                concurrency: 2,
            },
        ));
        Fixture {
            _dir: dir,
            path,
            data,
            transport,
            uploader,
        }
    }

    #[tokio::test]
    async fn upload_runs_to_success() {
        let f = fixture(4500, MockTransport::default());
        let mut rx = f.uploader.subscribe();

        let outcome = f.uploader.upload(&f.path).await.unwrap();

        assert_eq!(
            outcome,
            UploadOutcome::Completed {
                file_path: "merged/video.mp4".into()
            }
        );
        assert_eq!(*f.transport.merged.lock().unwrap(), f.data);
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.status, UploadStatus::Success);
        assert_eq!(snapshot.percentage, 100);
        assert_eq!(snapshot.hash_progress, 100);
        assert_eq!(snapshot.fingerprint, Some(Fingerprint::compute(&f.data)));
        assert!(snapshot.error_message.is_none());
    }

    #[tokio::test]
    async fn resumes_from_chunks_already_on_server() {
        let f = fixture(5000, MockTransport::default());
        {
            let mut stored = f.transport.stored.lock().unwrap();
            stored.insert(0, f.data[..1000].to_vec());
            stored.insert(2, f.data[2000..3000].to_vec());
        }

        f.uploader.upload(&f.path).await.unwrap();

        assert_eq!(f.transport.sends.load(Ordering::SeqCst), 3);
        assert_eq!(*f.transport.merged.lock().unwrap(), f.data);
    }

    #[tokio::test]
    async fn empty_file_is_an_error() {
        let f = fixture(0, MockTransport::default());

        let err = f.uploader.upload(&f.path).await.unwrap_err();

        assert!(matches!(err, UploadError::EmptyFile));
        let snapshot = f.uploader.snapshot();
        assert_eq!(snapshot.status, UploadStatus::Error);
        assert!(snapshot.error_message.is_some());
    }

    #[tokio::test]
    async fn chunk_failure_sets_error_state() {
        let transport = MockTransport::default();
        *transport.fail_index.lock().unwrap() = Some(1);
        let f = fixture(3000, transport);

        let err = f.uploader.upload(&f.path).await.unwrap_err();

        assert!(matches!(err, UploadError::ChunkFailed { index: 1, .. }));
        let snapshot = f.uploader.snapshot();
        assert_eq!(snapshot.status, UploadStatus::Error);
        assert!(snapshot.error_message.unwrap().contains("chunk 2"));
        assert!(f.transport.merged.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pause_and_resume() {
        let f = fixture(6000, MockTransport::default());
        f.transport.hang.store(true, Ordering::SeqCst);

        assert!(!f.uploader.pause(), "nothing to pause while idle");

        let runner = {
            let uploader = f.uploader.clone();
            let path = f.path.clone();
            tokio::spawn(async move { uploader.upload(&path).await })
        };
        let mut rx = f.uploader.subscribe();
        rx.wait_for(|s| s.status == UploadStatus::Uploading && s.percentage > 0)
            .await
            .unwrap();

        assert!(f.uploader.pause());
        assert_eq!(runner.await.unwrap().unwrap(), UploadOutcome::Paused);
        let snapshot = f.uploader.snapshot();
        assert_eq!(snapshot.status, UploadStatus::Paused);
        assert!(snapshot.error_message.is_none());
        assert!(f.transport.stored_indices().is_empty());

        f.transport.hang.store(false, Ordering::SeqCst);
        let outcome = f.uploader.resume().await.unwrap();

        assert!(matches!(outcome, UploadOutcome::Completed { .. }));
        assert_eq!(f.uploader.status(), UploadStatus::Success);
        assert_eq!(*f.transport.merged.lock().unwrap(), f.data);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pause_right_after_resume_stops_the_pass() {
        let f = fixture(6000, MockTransport::default());
        f.transport.hang.store(true, Ordering::SeqCst);

        let runner = {
            let uploader = f.uploader.clone();
            let path = f.path.clone();
            tokio::spawn(async move { uploader.upload(&path).await })
        };
        let mut rx = f.uploader.subscribe();
        rx.wait_for(|s| s.status == UploadStatus::Uploading)
            .await
            .unwrap();
        assert!(f.uploader.pause());
        assert_eq!(runner.await.unwrap().unwrap(), UploadOutcome::Paused);

        let resumer = {
            let uploader = f.uploader.clone();
            tokio::spawn(async move { uploader.resume().await })
        };
        // Pause as soon as the resumed session reports `Uploading`.
        while !f.uploader.pause() {
            tokio::task::yield_now().await;
        }

        let outcome = tokio::time::timeout(Duration::from_secs(5), resumer)
            .await
            .expect("resumed pass ignored the pause")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Paused);
        assert_eq!(f.uploader.status(), UploadStatus::Paused);
        assert!(f.transport.merged.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resume_requires_pause() {
        let f = fixture(1000, MockTransport::default());

        assert!(matches!(
            f.uploader.resume().await,
            Err(UploadError::NotPaused)
        ));
        assert_eq!(f.uploader.status(), UploadStatus::Idle);
    }

    #[tokio::test]
    async fn cancel_during_hashing() {
        let f = fixture(1000, MockTransport::default());
        let mut rx = f.uploader.subscribe();

        let runner = {
            let uploader = f.uploader.clone();
            let path = f.path.clone();
            tokio::spawn(async move { uploader.upload(&path).await })
        };
        rx.wait_for(|s| s.status != UploadStatus::Idle).await.unwrap();
        f.uploader.cancel();

        // Hashing a tiny file may finish before the token is observed.
        match runner.await.unwrap() {
            Err(UploadError::Cancelled) => {
                let snapshot = f.uploader.snapshot();
                assert_eq!(snapshot.status, UploadStatus::Error);
                assert_eq!(snapshot.error_message.as_deref(), Some("cancelled"));
            }
            Ok(UploadOutcome::Completed { .. }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_upload_while_busy_is_refused() {
        let f = fixture(3000, MockTransport::with_delay(Duration::from_millis(50)));
        let mut rx = f.uploader.subscribe();

        let runner = {
            let uploader = f.uploader.clone();
            let path = f.path.clone();
            tokio::spawn(async move { uploader.upload(&path).await })
        };
        rx.wait_for(|s| s.status == UploadStatus::Uploading).await.unwrap();

        assert!(matches!(
            f.uploader.upload(&f.path).await,
            Err(UploadError::Busy)
        ));
        assert!(runner.await.unwrap().is_ok());
    }

    #[test]
    fn options_default_to_transfer_defaults() {
        let options = UploaderOptions::default();
        assert_eq!(options.chunk_size, 2 * 1024 * 1024);
        assert_eq!(options.concurrency, 6);
    }
}
