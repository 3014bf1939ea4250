pub mod attachments;
pub mod health;
pub mod openapi;
pub mod records;
pub mod schemas;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use coffer_attachments::AttachmentService;

use self::openapi::ApiDoc;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The attachment service over the configured stores.
    pub service: Arc<AttachmentService>,
}

/// Build the application router.
///
/// The request body limit is disabled because upload size is enforced by
/// the service while the body streams in.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/v1/records",
            get(records::list_records).post(records::create_record),
        )
        .route("/v1/records/lookup", post(records::lookup_records))
        .route(
            "/v1/records/{id}",
            get(records::get_record).delete(records::delete_record),
        )
        .route("/v1/records/{id}/iv", patch(records::update_iv))
        .route(
            "/v1/records/{id}/attachment",
            get(attachments::download_attachment)
                .put(attachments::upload_attachment)
                .delete(attachments::delete_attachment),
        )
        .route("/api-doc/openapi.json", get(openapi_json))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
