use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::api::{fields, paths};
use common::{ApiResponse, ChunkDescriptor, ChunkId, Fingerprint, MergeRequest, MergeResult};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TransportError;

/// Size of the body slices whose hand-off is reported as upload progress.
const PROGRESS_SLICE: usize = 64 * 1024;

/// Receives the cumulative number of bytes of a chunk sent so far.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// How a chunk request ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Sent,
    /// The cancellation token fired before the server answered.
    Cancelled,
}

/// The three server operations an upload needs.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ids of the chunks the server already holds for `fingerprint`.
    async fn uploaded_chunks(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<ChunkId>, TransportError>;

    /// Send one chunk. Must return promptly with [`ChunkOutcome::Cancelled`]
    /// once `cancel` fires.
    async fn upload_chunk(
        &self,
        chunk: &ChunkDescriptor,
        data: Vec<u8>,
        on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<ChunkOutcome, TransportError>;

    async fn merge(
        &self,
        fingerprint: &Fingerprint,
        filename: &str,
    ) -> Result<MergeResult, TransportError>;
}

/// [`Transport`] over the server's HTTP API.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Decode the response envelope, turning `success: false` into an error.
async fn read_envelope<T: DeserializeOwned>(res: Response) -> Result<T, TransportError> {
    let status = res.status().as_u16();
    let body = res.text().await?;
    let envelope: ApiResponse<T> = serde_json::from_str(&body)
        .map_err(|_| TransportError::Unexpected { status, body })?;
    envelope.into_result().map_err(TransportError::Rejected)
}

/// Multipart body whose file part reports progress as it is streamed out.
fn chunk_form(chunk: &ChunkDescriptor, data: Vec<u8>, on_progress: ProgressFn) -> Form {
    let len = data.len() as u64;
    let slices: Vec<Vec<u8>> = data.chunks(PROGRESS_SLICE).map(<[u8]>::to_vec).collect();
    let mut sent = 0u64;
    let stream = futures::stream::iter(slices.into_iter().map(move |slice| {
        sent += slice.len() as u64;
        on_progress(sent);
        Ok::<_, std::io::Error>(slice)
    }));

    let part = Part::stream_with_length(Body::wrap_stream(stream), len)
        .file_name(chunk.filename.clone());

    Form::new()
        .text(fields::CHUNK_ID, chunk.id().to_string())
        .text(fields::CHUNK_INDEX, chunk.index.to_string())
        .text(fields::FINGERPRINT, chunk.fingerprint.to_hex())
        .text(fields::FILENAME, chunk.filename.clone())
        .text(fields::TOTAL_CHUNKS, chunk.total_chunks.to_string())
        .part(fields::FILE, part)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn uploaded_chunks(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<ChunkId>, TransportError> {
        let res = self
            .client
            .get(self.url(&paths::uploaded_chunks(&fingerprint.to_hex())))
            .send()
            .await?;
        let ids: Vec<String> = read_envelope(res).await?;
        ids.iter()
            .map(|id| ChunkId::parse(id).map_err(TransportError::from))
            .collect()
    }

    async fn upload_chunk(
        &self,
        chunk: &ChunkDescriptor,
        data: Vec<u8>,
        on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<ChunkOutcome, TransportError> {
        let request = self
            .client
            .post(self.url(paths::UPLOAD_CHUNK))
            .multipart(chunk_form(chunk, data, on_progress));
        let exchange = async {
            let res = request.send().await?;
            let _: bool = read_envelope(res).await?;
            Ok::<_, TransportError>(())
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(index = chunk.index, "Chunk request aborted");
                Ok(ChunkOutcome::Cancelled)
            }
            res = exchange => res.map(|()| ChunkOutcome::Sent),
        }
    }

    async fn merge(
        &self,
        fingerprint: &Fingerprint,
        filename: &str,
    ) -> Result<MergeResult, TransportError> {
        let body = MergeRequest {
            fingerprint: fingerprint.to_hex(),
            filename: filename.to_string(),
        };
        let res = self
            .client
            .post(self.url(paths::MERGE))
            .json(&body)
            .send()
            .await?;
        read_envelope(res).await
    }
}
