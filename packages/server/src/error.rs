use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::ApiResponse;

use crate::storage::StorageError;

/// Application-level error type.
///
/// Every variant renders as the `{ success: false, data: null, msg }` envelope.
#[derive(Debug)]
pub enum AppError {
    /// Malformed or missing input, rejected before touching storage.
    Validation(String),
    NotFound(String),
    /// Expected business-rule failure, reported with status 200.
    Rejected(String),
    Internal(String),
}

impl AppError {
    fn status_and_message(self) -> (StatusCode, String) {
        match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Rejected(msg) => (StatusCode::OK, msg),
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".into(),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = self.status_and_message();
        (status, Json(ApiResponse::<()>::failure(msg))).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidChunk(_)
            | StorageError::InvalidFilename(_)
            | StorageError::ChunkTooLarge { .. }
            | StorageError::TotalMismatch { .. } => AppError::Validation(err.to_string()),
            StorageError::NoChunks(_) => AppError::NotFound(err.to_string()),
            StorageError::EmptyChunkList(_)
            | StorageError::Incomplete { .. }
            | StorageError::FingerprintMismatch { .. } => {
                tracing::warn!("Merge refused: {err}");
                AppError::Rejected(err.to_string())
            }
            StorageError::Io(_) | StorageError::Manifest(_) => AppError::Internal(err.to_string()),
        }
    }
}
