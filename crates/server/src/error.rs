use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use coffer_attachments::AttachmentError;

/// Errors that can occur when running the Coffer server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An attachment service error surfaced through the API.
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
}

impl ServerError {
    /// HTTP status the error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Attachment(e) => match e {
                AttachmentError::InvalidIdentifier(_) | AttachmentError::MissingPayload => {
                    StatusCode::BAD_REQUEST
                }
                AttachmentError::RecordNotFound(_) | AttachmentError::NoAttachment(_) => {
                    StatusCode::NOT_FOUND
                }
                AttachmentError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                AttachmentError::DanglingReference { .. }
                | AttachmentError::Transfer { .. }
                | AttachmentError::Configuration(_)
                | AttachmentError::Record(_)
                | AttachmentError::Blob(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Stable `snake_case` error kind reported in the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration",
            Self::Io(_) => "io",
            Self::Attachment(e) => e.kind(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(kind, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message, "kind": kind });
        (status, axum::Json(body)).into_response()
    }
}
