use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use common::api::fields;
use common::{ApiResponse, ChunkId, Fingerprint, MergeRequest, MergeResult};
use tracing::instrument;

use crate::error::AppError;
use crate::extractors::json::AppJson;
use crate::state::AppState;
use crate::storage::{ChunkUpload, ReceiveOutcome};
use crate::utils::filename::validate_flat_filename;

/// Room for the multipart framing and text fields around the chunk bytes.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn chunk_upload_body_limit(max_chunk_size: u64) -> DefaultBodyLimit {
    let max_chunk_size = usize::try_from(max_chunk_size).unwrap_or(usize::MAX);
    DefaultBodyLimit::max(max_chunk_size.saturating_add(MULTIPART_OVERHEAD))
}

fn parse_fingerprint(raw: &str) -> Result<Fingerprint, AppError> {
    Fingerprint::from_hex(raw.trim())
        .map_err(|e| AppError::Validation(format!("Invalid fingerprint: {e}")))
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::Validation(format!("Missing '{field}' field")))
}

fn parse_count(raw: &str, field: &str) -> Result<u64, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("'{field}' must be a non-negative integer")))
}

async fn read_text(field: Field<'_>, name: &str) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read '{name}': {e}")))
}

fn chunk_too_large(max_size: u64) -> AppError {
    AppError::Validation(format!("Chunk exceeds maximum size of {max_size} bytes"))
}

/// The body limit surfaces as a multipart parse error; report it as a size error.
fn multipart_error(e: MultipartError, context: &str, max_size: u64) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        chunk_too_large(max_size)
    } else {
        AppError::Validation(format!("{context}: {e}"))
    }
}

/// Buffer the chunk bytes, refusing anything above `max_size`.
async fn read_chunk_bytes(mut field: Field<'_>, max_size: u64) -> Result<Vec<u8>, AppError> {
    let mut data = Vec::new();
    while let Some(bytes) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, "Upload read error", max_size))?
    {
        if (data.len() + bytes.len()) as u64 > max_size {
            return Err(chunk_too_large(max_size));
        }
        data.extend_from_slice(&bytes);
    }
    Ok(data)
}

#[utoipa::path(
    get,
    path = "/{fingerprint}/chunks",
    tag = "Uploads",
    operation_id = "listUploadedChunks",
    summary = "List chunks already stored for a file",
    description = "Returns the ids of every chunk persisted for the fingerprint, in index order. \
        An unknown fingerprint yields an empty list.",
    params(("fingerprint" = String, Path, description = "SHA-256 of the whole file, lowercase hex")),
    responses(
        (status = 200, description = "Stored chunk ids", body = ApiResponse<Vec<String>>),
        (status = 400, description = "Malformed fingerprint"),
    ),
)]
#[instrument(skip(state))]
pub async fn list_uploaded_chunks(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> Result<AppJson<ApiResponse<Vec<String>>>, AppError> {
    let fingerprint = parse_fingerprint(&fingerprint)?;
    let ids = state.store.list_uploaded_chunks(&fingerprint).await?;
    let ids = ids.iter().map(ToString::to_string).collect();
    Ok(AppJson(ApiResponse::ok(ids, "OK")))
}

#[utoipa::path(
    post,
    path = "/chunks",
    tag = "Uploads",
    operation_id = "uploadChunk",
    summary = "Upload one chunk of a file",
    description = "Multipart form with the fields `file`, `chunk_id`, `chunk_index`, `fingerprint`, \
        `filename` and `total_chunks`. Re-sending a chunk that is already stored succeeds \
        without rewriting it.",
    request_body(content_type = "multipart/form-data", description = "Chunk bytes and metadata"),
    responses(
        (status = 200, description = "Chunk stored", body = ApiResponse<bool>),
        (status = 400, description = "Missing or inconsistent field, or chunk too large"),
        (status = 500, description = "Chunk could not be written"),
    ),
)]
#[instrument(skip(state, multipart), fields(chunk_id))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<AppJson<ApiResponse<bool>>, AppError> {
    let max_chunk_size = state.store.max_chunk_size();

    let mut data: Option<Vec<u8>> = None;
    let mut chunk_id: Option<String> = None;
    let mut chunk_index: Option<String> = None;
    let mut fingerprint: Option<String> = None;
    let mut filename: Option<String> = None;
    let mut total_chunks: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, "Multipart error", max_chunk_size))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        match name.as_str() {
            fields::FILE => data = Some(read_chunk_bytes(field, max_chunk_size).await?),
            fields::CHUNK_ID => chunk_id = Some(read_text(field, &name).await?),
            fields::CHUNK_INDEX => chunk_index = Some(read_text(field, &name).await?),
            fields::FINGERPRINT => fingerprint = Some(read_text(field, &name).await?),
            fields::FILENAME => filename = Some(read_text(field, &name).await?),
            fields::TOTAL_CHUNKS => total_chunks = Some(read_text(field, &name).await?),
            _ => {} // Ignore unknown fields.
        }
    }

    let fingerprint = parse_fingerprint(&required(fingerprint, fields::FINGERPRINT)?)?;
    let chunk_id = required(chunk_id, fields::CHUNK_ID)?;
    tracing::Span::current().record("chunk_id", chunk_id.as_str());
    let chunk_id = ChunkId::parse(chunk_id.trim())
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let index = parse_count(&required(chunk_index, fields::CHUNK_INDEX)?, fields::CHUNK_INDEX)?;
    let total_chunks = parse_count(
        &required(total_chunks, fields::TOTAL_CHUNKS)?,
        fields::TOTAL_CHUNKS,
    )?;
    let filename = required(filename, fields::FILENAME)?;
    validate_flat_filename(&filename).map_err(|e| AppError::Validation(e.message()))?;
    let data = required(data, fields::FILE)?;

    let upload = ChunkUpload {
        fingerprint,
        chunk_id,
        index,
        total_chunks,
        data,
    };
    let msg = match state.store.receive_chunk(&upload).await? {
        ReceiveOutcome::Stored => "Chunk stored",
        ReceiveOutcome::AlreadyPresent => "Chunk already stored",
    };
    Ok(AppJson(ApiResponse::ok(true, msg)))
}

#[utoipa::path(
    post,
    path = "/merge",
    tag = "Uploads",
    operation_id = "mergeChunks",
    summary = "Merge the stored chunks into the final file",
    description = "Concatenates chunks `0..total_chunks` in index order into the merged artifact \
        and removes the chunks. An incomplete chunk set, an empty chunk directory or content \
        that does not match the fingerprint is reported with `success: false`.",
    request_body = MergeRequest,
    responses(
        (status = 200, description = "Merge result", body = ApiResponse<MergeResult>),
        (status = 400, description = "Malformed fingerprint or filename"),
        (status = 404, description = "No chunk data for the fingerprint"),
        (status = 500, description = "Merge failed while writing"),
    ),
)]
#[instrument(skip(state, payload), fields(fingerprint = %payload.fingerprint, filename = %payload.filename))]
pub async fn merge_chunks(
    State(state): State<AppState>,
    AppJson(payload): AppJson<MergeRequest>,
) -> Result<AppJson<ApiResponse<MergeResult>>, AppError> {
    if payload.fingerprint.trim().is_empty() {
        return Err(AppError::Validation(format!(
            "Missing '{}' field",
            fields::FINGERPRINT
        )));
    }
    let fingerprint = parse_fingerprint(&payload.fingerprint)?;

    let outcome = state.store.merge(&fingerprint, &payload.filename).await?;
    let result = MergeResult {
        file_path: outcome.path.display().to_string(),
        size: outcome.size,
    };
    Ok(AppJson(ApiResponse::ok(result, "Merge complete")))
}
