use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::config::AppConfig;
use crate::handlers;
use crate::state::AppState;

pub fn routes(config: &AppConfig) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest("/uploads", upload_routes(config))
        .routes(routes!(handlers::health::health))
}

fn upload_routes(config: &AppConfig) -> OpenApiRouter<AppState> {
    let chunk_upload = OpenApiRouter::new()
        .routes(routes!(handlers::upload::upload_chunk))
        .layer(handlers::upload::chunk_upload_body_limit(
            config.storage.max_chunk_size,
        ));

    OpenApiRouter::new()
        .routes(routes!(handlers::upload::list_uploaded_chunks))
        .routes(routes!(handlers::upload::merge_chunks))
        .merge(chunk_upload)
}
