//! Service banner, health and version handlers.

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::config::SERVICE_NAME;
use crate::intake::IntakeService;

#[derive(Serialize)]
pub struct Banner {
    message: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    version: &'static str,
    commit_hash: &'static str,
    build_time: &'static str,
    build_env: String,
}

/// Service name and package version.
pub async fn root() -> JsonResponse<Banner> {
    JsonResponse(Banner {
        message: SERVICE_NAME,
        version: crate::build::PKG_VERSION,
    })
}

/// Reports `ok`, or `degraded` with 503 when the file store cannot be reached.
pub async fn health(Extension(intake): Extension<Arc<IntakeService>>) -> Response {
    let probe = intake.store().probe().await;
    if probe.ok {
        return JsonResponse(Health {
            status: "ok",
            detail: None,
        })
        .into_response();
    }
    warn!(diagnostic = probe.diagnostic, "health check failed");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        JsonResponse(Health {
            status: "degraded",
            detail: Some(probe.diagnostic),
        }),
    )
        .into_response()
}

/// Build metadata captured at compile time.
pub async fn get_version_info() -> JsonResponse<VersionInfo> {
    JsonResponse(VersionInfo {
        version: crate::build::PKG_VERSION,
        commit_hash: crate::build::SHORT_COMMIT,
        build_time: crate::build::BUILD_TIME,
        build_env: format!(
            "{},{}",
            crate::build::RUST_VERSION,
            crate::build::RUST_CHANNEL
        ),
    })
}
