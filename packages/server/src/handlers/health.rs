use common::ApiResponse;
use tracing::instrument;

use crate::extractors::json::AppJson;

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "health",
    summary = "Liveness probe",
    responses(
        (status = 200, description = "Server is up", body = ApiResponse<String>),
    ),
)]
#[instrument]
pub async fn health() -> AppJson<ApiResponse<String>> {
    AppJson(ApiResponse::ok("ok".to_string(), "OK"))
}
