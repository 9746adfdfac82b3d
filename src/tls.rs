//! Optional HTTPS: certificate and key are loaded from PEM files.

use axum_server::tls_rustls::RustlsConfig;
use std::io;
use tracing::info;

/// Returns `None` for plain HTTP; a lone cert or key is a configuration error.
pub async fn load_rustls_config(
    cert: Option<&str>,
    key: Option<&str>,
) -> Result<Option<RustlsConfig>, io::Error> {
    match (cert, key) {
        (Some(cert), Some(key)) => {
            let config = RustlsConfig::from_pem_file(cert, key).await?;
            info!(cert, "loaded TLS certificate");
            Ok(Some(config))
        }
        (None, None) => Ok(None),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "TLS_CERT and TLS_KEY must be set together",
        )),
    }
}
