//! HTTP plumbing: CORS, request ids, client address and security headers.

use axum::body::Body as AxumBody;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, header};
use axum::{middleware, response::Response};
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::info;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Builds the CORS layer, or `None` when no origin is configured.
///
/// Credentials are allowed, so methods and headers mirror the preflight request
/// instead of using wildcards.
pub fn build_cors_layer(origins: &[HeaderValue]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins.iter().cloned()))
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true),
    )
}

/// First `x-forwarded-for` entry, falling back to the peer address.
pub fn resolve_client_ip<B>(request: &Request<B>) -> Option<IpAddr> {
    extract_forwarded_ip(request.headers()).or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

/// Left-most address of `x-forwarded-for`.
fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .and_then(|value| value.parse::<IpAddr>().ok())
}

/// Client supplied request id, ignored when blank or longer than 128 bytes.
fn incoming_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
}

/// Echoes or mints `X-Request-ID` and logs one line per completed request.
pub async fn track_request(request: Request<AxumBody>, next: middleware::Next) -> Response {
    let request_id = incoming_request_id(request.headers())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    tracing::Span::current().record("request_id", request_id.as_str());

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    info!(
        request_id,
        method = %method,
        path,
        status = response.status().as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}

/// Adds anti-framing and no-sniff headers to every response.
pub async fn add_security_headers(request: Request<AxumBody>, next: middleware::Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}
