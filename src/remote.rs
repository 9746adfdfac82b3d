//! Capability interface for the remote file store.

use async_trait::async_trait;
use axum::body::Bytes;
use std::fmt;

#[derive(Debug)]
pub enum RemoteError {
    /// The requested resource does not exist.
    NotFound(String),
    /// The server answered with an unexpected status.
    Status {
        method: &'static str,
        path: String,
        status: u16,
    },
    /// The request never produced a response.
    Transport(String),
    /// The response body could not be interpreted.
    Decode(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::NotFound(path) => write!(f, "{path} not found"),
            RemoteError::Status {
                method,
                path,
                status,
            } => write!(f, "{method} {path} returned {status}"),
            RemoteError::Transport(msg) => write!(f, "transport error: {msg}"),
            RemoteError::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Outcome of a reachability check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeReport {
    pub ok: bool,
    pub diagnostic: String,
}

/// Operations the intake workflow needs from the file store.
///
/// Paths are absolute within the store (`/base/institution/project/...`).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Checks reachability and credentials against the store root.
    async fn probe(&self) -> ProbeReport;

    /// True if a file or collection exists at `path`.
    async fn path_exists(&self, path: &str) -> Result<bool, RemoteError>;

    /// Creates one directory; an existing directory is not an error.
    async fn make_directory(&self, path: &str) -> Result<(), RemoteError>;

    /// Creates or replaces the file at `path`; the parent must exist.
    async fn write_file(
        &self,
        path: &str,
        content: Bytes,
        content_type: &str,
    ) -> Result<(), RemoteError>;

    /// Writes UTF-8 text, guessing the content type from the extension.
    async fn write_text(&self, path: &str, text: String) -> Result<(), RemoteError> {
        let content_type = mime_guess::from_path(path).first_or_text_plain();
        self.write_file(path, Bytes::from(text), content_type.essence_str())
            .await
    }

    /// Fails with [`RemoteError::NotFound`] when `path` is absent.
    async fn read_json(&self, path: &str) -> Result<serde_json::Value, RemoteError>;
}
