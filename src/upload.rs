//! HTTP handlers for document submission and status lookup.

use axum::body::Bytes;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Extension, Multipart, Path};
use axum::http::StatusCode;
use axum::response::Json as JsonResponse;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::intake::{
    IntakeError, IntakeService, ProjectMetadata, SubmittedFile, UploadRequest, UploadResult,
    ValidationError,
};
use crate::project::{Language, ProjectType, client_file_name};

/// Wraps a form problem as a 400 or 413 API error.
fn invalid(err: ValidationError) -> ApiError {
    IntakeError::Validation(err).into()
}

/// Body limit violations stay 413, everything else is a malformed form.
fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        invalid(ValidationError::MalformedForm(err.body_text()))
    }
}

/// Accepts the usual HTML form spellings of a boolean.
fn parse_flag(raw: &str) -> Result<bool, ApiError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "off" | "no" => Ok(false),
        "true" | "1" | "on" | "yes" => Ok(true),
        other => Err(invalid(ValidationError::MalformedForm(format!(
            "is_prospective_study must be a boolean, got {other}"
        )))),
    }
}

/// Buffers a file part, stopping once it is known to exceed `max_size`.
///
/// The returned size is exact for accepted files and at least `max_size + 1`
/// for oversized ones.
async fn read_file_field(mut field: Field<'_>, max_size: u64) -> Result<SubmittedFile, ApiError> {
    let raw_name = field.file_name().unwrap_or_default().to_string();
    let filename = client_file_name(&raw_name)
        .ok_or_else(|| invalid(ValidationError::InvalidFilename(raw_name.clone())))?;
    let content_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| {
            mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });

    let mut buffer = Vec::new();
    let mut size: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        size += chunk.len() as u64;
        if size > max_size {
            buffer = Vec::new();
            break;
        }
        buffer.extend_from_slice(&chunk);
    }
    debug!(size, content_type, "received file part");
    Ok(SubmittedFile {
        filename,
        size,
        content: Bytes::from(buffer),
        content_type,
    })
}

/// Treats blank fields as absent.
fn optional(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Non-blank field or `MissingField`.
fn required(value: Option<String>, field: &'static str) -> Result<String, ApiError> {
    optional(value).ok_or_else(|| invalid(ValidationError::MissingField(field)))
}

/// Parses the multipart form into an [`UploadRequest`].
async fn read_upload_form(
    mut multipart: Multipart,
    max_file_size: u64,
) -> Result<UploadRequest, ApiError> {
    let mut email = None;
    let mut uploader_name = None;
    let mut project_title = None;
    let mut institution = None;
    let mut is_prospective_study = false;
    let mut project_details = None;
    let mut file_categories = None;
    let mut project_type = ProjectType::New;
    let mut language = Language::default();
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "files" || name == "files[]" {
            files.push(read_file_field(field, max_file_size).await?);
            continue;
        }
        let value = field.text().await.map_err(multipart_error)?;
        match name.as_str() {
            "email" => email = Some(value),
            "uploader_name" => uploader_name = Some(value),
            "project_title" => project_title = Some(value),
            "institution" => institution = Some(value.trim().to_string()),
            "is_prospective_study" => is_prospective_study = parse_flag(&value)?,
            "project_details" => project_details = Some(value),
            "file_categories" => file_categories = Some(value),
            "project_type" => {
                project_type = value
                    .parse()
                    .map_err(|_| invalid(ValidationError::InvalidProjectType(value.clone())))?
            }
            "language" => language = Language::from_code(&value),
            _ => debug!(field = name, "ignoring unknown form field"),
        }
    }

    Ok(UploadRequest {
        email: required(email, "email")?,
        uploader_name: optional(uploader_name),
        project_title: required(project_title, "project_title")?,
        institution: required(institution, "institution")?,
        is_prospective_study,
        project_details: optional(project_details),
        files,
        file_categories: optional(file_categories),
        project_type,
        language,
    })
}

/// Accepts a submission and stores it in the remote store.
pub async fn upload_documents(
    Extension(intake): Extension<Arc<IntakeService>>,
    multipart: Multipart,
) -> Result<JsonResponse<UploadResult>, ApiError> {
    let request = read_upload_form(multipart, intake.max_file_size()).await?;
    let result = intake.submit_upload(request).await?;
    info!(project_id = result.project_id, "upload accepted");
    Ok(JsonResponse(result))
}

/// Returns the stored metadata of a project.
pub async fn get_upload_status(
    Extension(intake): Extension<Arc<IntakeService>>,
    Path(project_id): Path<String>,
) -> Result<JsonResponse<ProjectMetadata>, ApiError> {
    let metadata = intake.get_status(&project_id).await?;
    Ok(JsonResponse(metadata))
}
