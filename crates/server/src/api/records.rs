//! Record endpoints.
//!
//! Thin wrappers over the record operations of [`AttachmentService`](coffer_attachments::AttachmentService).

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use coffer_core::{Record, RecordFields};

use super::AppState;
use super::schemas::{DeleteResponse, ErrorResponse, RecordLookup, UpdateIvRequest};
use crate::error::ServerError;

/// Number of records returned by the listing endpoint.
pub const RECENT_LIMIT: usize = 50;

/// `GET /v1/records` -- the most recently created records.
#[utoipa::path(
    get,
    path = "/v1/records",
    tag = "Records",
    summary = "List recent records",
    description = "Returns the 50 most recently created records, newest first.",
    responses(
        (status = 200, description = "Recent records", body = Vec<Record>),
        (status = 500, description = "Internal server error", body = ErrorResponse),
    )
)]
pub async fn list_records(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServerError> {
    let records = state.service.recent_records(RECENT_LIMIT).await?;
    Ok(Json(records))
}

/// `POST /v1/records` -- create a record.
#[utoipa::path(
    post,
    path = "/v1/records",
    tag = "Records",
    summary = "Create a record",
    description = "Creates a record. A random IV is generated when `request_iv` is absent.",
    request_body(content = RecordFields, description = "Record fields"),
    responses(
        (status = 201, description = "Record created", body = Record),
        (status = 500, description = "Internal server error", body = ErrorResponse),
    )
)]
pub async fn create_record(
    State(state): State<AppState>,
    Json(fields): Json<RecordFields>,
) -> Result<impl IntoResponse, ServerError> {
    let record = state.service.create_record(fields).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `POST /v1/records/lookup` -- fetch several records by id.
#[utoipa::path(
    post,
    path = "/v1/records/lookup",
    tag = "Records",
    summary = "Look up records",
    description = "Returns the records matching the given codes in request order. Malformed and unknown codes are skipped.",
    request_body(content = Vec<RecordLookup>, description = "Record codes"),
    responses(
        (status = 200, description = "Matching records", body = Vec<Record>),
        (status = 500, description = "Internal server error", body = ErrorResponse),
    )
)]
pub async fn lookup_records(
    State(state): State<AppState>,
    Json(lookups): Json<Vec<RecordLookup>>,
) -> Result<impl IntoResponse, ServerError> {
    let codes: Vec<&str> = lookups.iter().map(|l| l.code.as_str()).collect();
    let records = state.service.records_by_ids(&codes).await?;
    Ok(Json(records))
}

/// `GET /v1/records/{id}` -- fetch one record.
#[utoipa::path(
    get,
    path = "/v1/records/{id}",
    tag = "Records",
    summary = "Get a record",
    params(("id" = String, Path, description = "Record identifier")),
    responses(
        (status = 200, description = "Record", body = Record),
        (status = 400, description = "Malformed identifier", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
    )
)]
pub async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let record = state.service.record(&id).await?;
    Ok(Json(record))
}

/// `DELETE /v1/records/{id}` -- delete a record and its attachment.
#[utoipa::path(
    delete,
    path = "/v1/records/{id}",
    tag = "Records",
    summary = "Delete a record",
    description = "Deletes the record and the blob it owns. Deleting an unknown record reports `deleted_count = 0`.",
    params(("id" = String, Path, description = "Record identifier")),
    responses(
        (status = 200, description = "Delete result", body = DeleteResponse),
        (status = 400, description = "Malformed identifier", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
    )
)]
pub async fn delete_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let receipt = state.service.delete_record(&id).await?;
    Ok(Json(DeleteResponse::from(receipt)))
}

/// `PATCH /v1/records/{id}/iv` -- replace the IV of a record.
#[utoipa::path(
    patch,
    path = "/v1/records/{id}/iv",
    tag = "Records",
    summary = "Update a record's IV",
    params(("id" = String, Path, description = "Record identifier")),
    request_body(content = UpdateIvRequest, description = "New IV"),
    responses(
        (status = 200, description = "Updated record", body = Record),
        (status = 400, description = "Malformed identifier", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
    )
)]
pub async fn update_iv(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateIvRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let record = state.service.update_iv(&id, &req.request_iv).await?;
    Ok(Json(record))
}
