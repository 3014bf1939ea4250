#![allow(clippy::needless_for_each)]

use coffer_core::{AttachmentRef, BlobId, Record, RecordFields, RecordId};

use super::schemas::{
    AttachmentResponse, DeleteResponse, ErrorResponse, HealthResponse, RecordLookup,
    UpdateIvRequest, UploadForm,
};

#[derive(utoipa::OpenApi)]
#[openapi(
    info(
        title = "Coffer API",
        version = "0.1.0",
        description = "HTTP API for Coffer. Manage job records and the single attachment each record owns.",
        license(name = "Apache-2.0")
    ),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Records", description = "Job record management"),
        (name = "Attachments", description = "Attachment upload, download and removal"),
    ),
    paths(
        super::health::health,
        super::records::list_records,
        super::records::create_record,
        super::records::lookup_records,
        super::records::get_record,
        super::records::delete_record,
        super::records::update_iv,
        super::attachments::upload_attachment,
        super::attachments::download_attachment,
        super::attachments::delete_attachment,
    ),
    components(schemas(
        HealthResponse,
        ErrorResponse,
        RecordLookup,
        UpdateIvRequest,
        UploadForm,
        AttachmentResponse,
        DeleteResponse,
        Record,
        RecordFields,
        RecordId,
        BlobId,
        AttachmentRef,
    ))
)]
pub struct ApiDoc;
