//! Wire types shared by the server and the upload client.

use serde::{Deserialize, Serialize};

/// Response envelope used by every endpoint.
///
/// On the wire this is `{ success, data, msg }`; [`ApiResponse::into_result`]
/// turns it into the tagged form callers actually branch on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub msg: String,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, msg: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            msg: msg.into(),
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            msg: msg.into(),
        }
    }

    /// `Ok(data)` for a successful envelope, `Err(msg)` otherwise.
    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(format!("response carried no data: {}", self.msg)),
            (false, _) => Err(self.msg),
        }
    }
}

/// Multipart field names of the chunk upload form.
pub mod fields {
    pub const FILE: &str = "file";
    pub const CHUNK_ID: &str = "chunk_id";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const FINGERPRINT: &str = "fingerprint";
    pub const FILENAME: &str = "filename";
    pub const TOTAL_CHUNKS: &str = "total_chunks";
}

/// Request paths relative to the server base URL.
pub mod paths {
    pub const UPLOAD_CHUNK: &str = "/api/v1/uploads/chunks";
    pub const MERGE: &str = "/api/v1/uploads/merge";
    pub const HEALTH: &str = "/api/v1/health";

    pub fn uploaded_chunks(fingerprint: &str) -> String {
        format!("/api/v1/uploads/{fingerprint}/chunks")
    }
}

/// Body of a merge request.
///
/// Fields default to empty so a missing field is reported by name instead of
/// as a generic deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MergeRequest {
    /// Whole-file fingerprint (64 lowercase hex characters).
    #[serde(default)]
    #[schema(example = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08")]
    pub fingerprint: String,
    /// Name of the merged artifact.
    #[serde(default)]
    #[schema(example = "video.mp4")]
    pub filename: String,
}

/// Data returned by a successful merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MergeResult {
    /// Server-side path of the merged artifact.
    pub file_path: String,
    /// Size of the merged artifact in bytes.
    pub size: u64,
}
