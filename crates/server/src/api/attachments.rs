//! Attachment upload, download and removal.
//!
//! Uploads are read from the `file` field of a multipart body and handed to
//! the service as a stream. Downloads are streamed straight from the blob
//! store into the response body.

use std::io;

use axum::Json;
use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::{StreamExt, TryStreamExt};
use tracing::debug;

use coffer_attachments::Upload;

use super::AppState;
use super::schemas::{AttachmentResponse, DeleteResponse, ErrorResponse, UploadForm};
use crate::error::ServerError;

/// Name of the multipart field carrying the file.
pub const FILE_FIELD: &str = "file";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// `PUT /v1/records/{id}/attachment` -- store or replace the attachment.
#[utoipa::path(
    put,
    path = "/v1/records/{id}/attachment",
    tag = "Attachments",
    summary = "Upload an attachment",
    description = "Streams the multipart field `file` into the blob store and points the record at it. A previous attachment is replaced and deleted.",
    params(("id" = String, Path, description = "Record identifier")),
    request_body(content = UploadForm, content_type = "multipart/form-data", description = "Multipart body with a `file` field"),
    responses(
        (status = 200, description = "Attachment stored", body = AttachmentResponse),
        (status = 400, description = "Malformed identifier or missing file", body = ErrorResponse),
        (status = 404, description = "Record not found", body = ErrorResponse),
        (status = 413, description = "File exceeds the upload limit", body = ErrorResponse),
        (status = 500, description = "Upload failed", body = ErrorResponse),
    )
)]
pub async fn upload_attachment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, ServerError> {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            debug!(record_id = %id, error = %rejection, "upload without a multipart body");
            let receipt = state.service.attach(&id, None).await?;
            return Ok(Json(AttachmentResponse::from(receipt)));
        }
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                debug!(record_id = %id, error = %e, "malformed multipart body");
                break;
            }
        };
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_owned();
        let content_type = field
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_owned();
        let stream = field.map_err(io::Error::other).boxed();

        let upload = Upload::new(filename, content_type, stream);
        let receipt = state.service.attach(&id, Some(upload)).await?;
        return Ok(Json(AttachmentResponse::from(receipt)));
    }

    let receipt = state.service.attach(&id, None).await?;
    Ok(Json(AttachmentResponse::from(receipt)))
}

/// `GET /v1/records/{id}/attachment` -- stream the attachment.
#[utoipa::path(
    get,
    path = "/v1/records/{id}/attachment",
    tag = "Attachments",
    summary = "Download an attachment",
    description = "Streams the attachment content with its stored content type and filename.",
    params(("id" = String, Path, description = "Record identifier")),
    responses(
        (status = 200, description = "Attachment content, streamed with its stored content type"),
        (status = 400, description = "Malformed identifier", body = ErrorResponse),
        (status = 404, description = "Record or attachment not found", body = ErrorResponse),
        (status = 500, description = "Attachment content is missing", body = ErrorResponse),
    )
)]
pub async fn download_attachment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ServerError> {
    let download = state.service.fetch(&id).await?;

    let content_type = HeaderValue::from_str(&download.metadata.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    let headers = [
        (header::CONTENT_TYPE, content_type),
        (header::CONTENT_DISPOSITION, content_disposition(&download.filename)),
        (header::CONTENT_LENGTH, HeaderValue::from(download.metadata.size_bytes)),
    ];

    Ok((StatusCode::OK, headers, Body::from_stream(download.stream)).into_response())
}

/// `DELETE /v1/records/{id}/attachment` -- remove the attachment.
#[utoipa::path(
    delete,
    path = "/v1/records/{id}/attachment",
    tag = "Attachments",
    summary = "Remove an attachment",
    description = "Deletes the attachment blob and clears the record's reference. Repeating the call reports `deleted_count = 0`.",
    params(("id" = String, Path, description = "Record identifier")),
    responses(
        (status = 200, description = "Delete result", body = DeleteResponse),
        (status = 400, description = "Malformed identifier", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
    )
)]
pub async fn delete_attachment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let receipt = state.service.detach(&id).await?;
    Ok(Json(DeleteResponse::from(receipt)))
}

/// Build an `attachment` disposition, replacing characters that cannot
/// appear inside a quoted header parameter.
fn content_disposition(filename: &str) -> HeaderValue {
    let safe: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_quotes_plain_names() {
        assert_eq!(
            content_disposition("report v2.pdf"),
            "attachment; filename=\"report v2.pdf\""
        );
    }

    #[test]
    fn disposition_replaces_unsafe_characters() {
        assert_eq!(
            content_disposition("a\"b\\c\nd\u{e9}.txt"),
            "attachment; filename=\"a_b_c_d_.txt\""
        );
    }
}
