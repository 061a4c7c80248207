use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ::common::Fingerprint;
use ::common::api::{fields, paths};
use reqwest::Client;
use serde_json::Value;
use tempfile::TempDir;

use server::config::{AppConfig, CorsConfig, ServerConfig, StorageConfig};
use server::state::AppState;
use server::storage::ChunkStore;

/// Chunk size limit used by every test server.
pub const MAX_CHUNK_SIZE: u64 = 64 * 1024;

/// A running test server backed by a temporary storage root.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    /// Keeps the storage root alive for the duration of the test.
    pub storage: TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    /// Raw response body as text.
    pub text: String,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

/// Metadata sent alongside one chunk.
pub struct ChunkForm<'a> {
    pub fingerprint: &'a Fingerprint,
    pub index: u64,
    pub total_chunks: u64,
    pub filename: &'a str,
    pub data: Vec<u8>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(true).await
    }

    pub async fn spawn_with(verify_merged: bool) -> Self {
        let storage = TempDir::new().expect("Failed to create storage dir");

        let app_config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors: CorsConfig {
                    allow_origins: vec![],
                    max_age: 3600,
                },
            },
            storage: StorageConfig {
                root: storage.path().to_path_buf(),
                max_chunk_size: MAX_CHUNK_SIZE,
                verify_merged,
            },
        };

        let store = ChunkStore::new(&app_config.storage)
            .await
            .expect("Failed to open chunk store");
        let state = AppState {
            config: app_config,
            store: Arc::new(store),
        };

        let app = server::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            storage,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn root(&self) -> &Path {
        self.storage.path()
    }

    pub fn chunk_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root().join("chunks").join(fingerprint.to_hex())
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }

    pub async fn post_form(&self, form: reqwest::multipart::Form) -> TestResponse {
        let res = self
            .client
            .post(self.url(paths::UPLOAD_CHUNK))
            .multipart(form)
            .send()
            .await
            .expect("Failed to send multipart upload request");

        TestResponse::from_response(res).await
    }

    pub async fn upload_chunk(&self, chunk: ChunkForm<'_>) -> TestResponse {
        self.post_form(chunk.into_form()).await
    }

    pub async fn uploaded_chunks(&self, fingerprint: &Fingerprint) -> TestResponse {
        self.get(&paths::uploaded_chunks(&fingerprint.to_hex()))
            .await
    }

    pub async fn merge(&self, fingerprint: &Fingerprint, filename: &str) -> TestResponse {
        let body = serde_json::json!({
            "fingerprint": fingerprint.to_hex(),
            "filename": filename,
        });
        self.post_json(paths::MERGE, &body).await
    }

    /// Upload every `chunk_size` slice of `source` whose index is in `indices`.
    pub async fn upload_slices(
        &self,
        source: &[u8],
        chunk_size: usize,
        indices: &[u64],
        filename: &str,
    ) -> Fingerprint {
        let fingerprint = Fingerprint::compute(source);
        let total = source.len().div_ceil(chunk_size) as u64;
        for &index in indices {
            let start = index as usize * chunk_size;
            let end = (start + chunk_size).min(source.len());
            let res = self
                .upload_chunk(ChunkForm {
                    fingerprint: &fingerprint,
                    index,
                    total_chunks: total,
                    filename,
                    data: source[start..end].to_vec(),
                })
                .await;
            assert_eq!(res.status, 200, "Chunk {index} upload failed: {}", res.text);
            assert_eq!(res.body["success"], true, "Chunk {index}: {}", res.text);
        }
        fingerprint
    }
}

impl ChunkForm<'_> {
    pub fn into_form(self) -> reqwest::multipart::Form {
        let part = reqwest::multipart::Part::bytes(self.data).file_name(self.filename.to_string());
        reqwest::multipart::Form::new()
            .text(fields::FINGERPRINT, self.fingerprint.to_hex())
            .text(
                fields::CHUNK_ID,
                format!("{}-{}", self.fingerprint, self.index),
            )
            .text(fields::CHUNK_INDEX, self.index.to_string())
            .text(fields::TOTAL_CHUNKS, self.total_chunks.to_string())
            .text(fields::FILENAME, self.filename.to_string())
            .part(fields::FILE, part)
    }
}

impl TestResponse {
    pub async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let text = res.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self { status, text, body }
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        self.body["data"]
            .as_array()
            .expect("response data should be an array")
            .iter()
            .map(|v| v.as_str().expect("chunk id should be a string").to_string())
            .collect()
    }
}

/// Deterministic, non-repeating test content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
