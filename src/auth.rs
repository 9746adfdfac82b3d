//! Bearer token guard for the API routes.

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::Request;
use axum::middleware;
use axum_extra::extract::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use axum_extra::typed_header::TypedHeaderRejection;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::ApiError;

#[derive(Debug)]
pub struct AuthConfig {
    pub api_token: String,
}

/// Compares the presented credential with the configured secret in constant time.
pub fn verify_bearer(presented: &str, secret: &str) -> Result<(), ApiError> {
    let presented = presented.as_bytes();
    let secret = secret.as_bytes();
    if presented.len() == secret.len() && bool::from(presented.ct_eq(secret)) {
        Ok(())
    } else {
        Err(ApiError::unauthorized())
    }
}

/// Rejects API requests without a valid bearer token.
///
/// A missing or non-bearer `Authorization` header is 403, a wrong token 401.
pub async fn auth_middleware(
    Extension(auth): Extension<Arc<AuthConfig>>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<axum::response::Response, ApiError> {
    if is_auth_exempt_path(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let Ok(TypedHeader(Authorization(bearer))) = bearer else {
        return Err(ApiError::Forbidden("Not authenticated".into()));
    };
    if let Err(err) = verify_bearer(bearer.token(), &auth.api_token) {
        warn!(path = req.uri().path(), "rejected bearer token");
        return Err(err);
    }
    Ok(next.run(req).await)
}

/// Banner, health, version and anything outside `/api/` need no token.
fn is_auth_exempt_path(path: &str) -> bool {
    matches!(path, "/" | "/api/health" | "/api/version") || !path.starts_with("/api/")
}
