//! API error type and conversions from domain errors.

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, info};

use crate::intake::{IntakeError, ValidationError};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// Bearer credentials present but wrong.
    Unauthorized(HeaderMap),
    /// No bearer credentials at all.
    Forbidden(String),
    NotFound(String),
    PayloadTooLarge(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Bearer challenge returned with 401 responses.
    pub fn unauthorized() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        ApiError::Unauthorized(headers)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::Unauthorized(headers) => (
                status,
                headers,
                axum::Json(json!({ "detail": "Invalid authentication credentials" })),
            )
                .into_response(),
            ApiError::BadRequest(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::ServiceUnavailable(msg)
            | ApiError::Internal(msg) => {
                (status, axum::Json(json!({ "detail": msg }))).into_response()
            }
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::Validation(err @ ValidationError::FileTooLarge { .. }) => {
                ApiError::PayloadTooLarge(err.to_string())
            }
            IntakeError::Validation(err) => ApiError::BadRequest(err.to_string()),
            IntakeError::BackendUnavailable(diagnostic) => ApiError::ServiceUnavailable(format!(
                "File store connection failed. Please check the store configuration and credentials. Error: {diagnostic}"
            )),
            IntakeError::BackendOperation {
                step,
                target,
                path,
                reason,
            } => {
                error!(step, path = %path, reason = %reason, "remote store operation failed");
                ApiError::Internal(format!("Failed to {step}: {target}"))
            }
            IntakeError::ProjectNotFound(project_id) => {
                info!(project_id, "status requested for unknown project");
                ApiError::NotFound("Project not found".into())
            }
        }
    }
}
