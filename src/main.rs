//! Document intake service binary.
//!
//! Accepts data protection submissions over HTTP, files them into a WebDAV
//! store and notifies the submitter and the privacy team by e-mail. The main
//! entry point validates configuration, builds the Axum router and serves it
//! over HTTP or HTTPS.

mod auth;
mod config;
mod error;
mod http;
mod intake;
mod logging;
mod meta;
mod notify;
mod project;
mod remote;
#[cfg(test)]
mod testing;
mod tls;
mod upload;
mod webdav;

use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, info_span};

use crate::auth::AuthConfig;
use crate::config::{Args, Settings};
use crate::http::{build_cors_layer, resolve_client_ip};
use crate::intake::IntakeService;
use crate::notify::SmtpNotifier;
use crate::webdav::WebDavClient;

shadow!(build);

fn invalid_input(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, err.to_string())
}

/// Starts the intake server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), io::Error> {
    let args = Args::parse();
    logging::init_logging(args.log_format);

    let settings = Settings::from_args(&args).map_err(|err| {
        error!(setting = err.setting, reason = err.reason, "invalid configuration");
        invalid_input(err)
    })?;

    let store = Arc::new(WebDavClient::new(&settings.store).map_err(invalid_input)?);
    let notifier = Arc::new(SmtpNotifier::new(&settings.smtp).map_err(invalid_input)?);
    let intake = Arc::new(IntakeService::new(
        store,
        notifier,
        settings.intake.clone(),
    ));
    let auth_config = Arc::new(AuthConfig {
        api_token: settings.api_token.clone(),
    });

    let mut app = Router::new()
        .route("/", get(meta::root))
        .route("/api/health", get(meta::health))
        .route("/api/version", get(meta::get_version_info))
        .route(
            "/api/upload",
            post(upload::upload_documents)
                .layer(DefaultBodyLimit::max(settings.max_request_size)),
        )
        .route(
            "/api/upload/status/{project_id}",
            get(upload::get_upload_status),
        )
        .layer(middleware::from_fn(auth::auth_middleware))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(middleware::from_fn(http::track_request))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let client_ip = resolve_client_ip(request)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                        request_id = tracing::field::Empty,
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(intake))
        .layer(Extension(auth_config));

    if let Some(cors_layer) = build_cors_layer(&settings.cors_origins) {
        app = app.layer(cors_layer);
    }

    let host = args.host.parse::<IpAddr>().map_err(invalid_input)?;
    let addr = SocketAddr::new(host, args.port);
    let tls_config = tls::load_rustls_config(args.tls_cert.as_deref(), args.tls_key.as_deref()).await?;
    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    match tls_config {
        Some(tls_config) => {
            info!(%addr, "starting HTTPS server");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(service)
                .await
        }
        None => {
            info!(%addr, "starting HTTP server");
            axum_server::bind(addr).handle(handle).serve(service).await
        }
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("received termination signal, shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
