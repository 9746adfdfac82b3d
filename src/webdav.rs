//! WebDAV implementation of [`RemoteStore`] on top of reqwest.

use async_trait::async_trait;
use axum::body::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use tracing::{debug, warn};
use xmltree::Element;

use crate::config::StoreSettings;
use crate::remote::{ProbeReport, RemoteError, RemoteStore};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:resourcetype/></d:prop></d:propfind>"#;

/// Client bound to one WebDAV endpoint and account.
#[derive(Clone, Debug)]
pub struct WebDavClient {
    client: Client,
    endpoint: Url,
    username: String,
    password: String,
}

impl WebDavClient {
    /// Builds an HTTP client with the configured timeout.
    pub fn new(settings: &StoreSettings) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    /// Resolves a store path below the endpoint, percent-encoding each segment.
    fn url_for(&self, path: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            segments.extend(path.split('/').filter(|segment| !segment.is_empty()));
        }
        url
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url_for(path))
            .basic_auth(&self.username, Some(&self.password))
    }

    /// Depth 0 PROPFIND asking only for the resource type.
    async fn propfind(&self, path: &str) -> Result<reqwest::Response, RemoteError> {
        self.request(propfind_method(), path)
            .header("Depth", "0")
            .header(CONTENT_TYPE, HeaderValue::from_static("application/xml"))
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(|err| RemoteError::Transport(err.to_string()))
    }
}

fn propfind_method() -> Method {
    Method::from_bytes(b"PROPFIND").unwrap_or(Method::GET)
}

fn mkcol_method() -> Method {
    Method::from_bytes(b"MKCOL").unwrap_or(Method::PUT)
}

/// True when the body parses as a DAV `multistatus` document.
fn is_multistatus(body: &[u8]) -> bool {
    Element::parse(body)
        .map(|root| root.name == "multistatus")
        .unwrap_or(false)
}

#[async_trait]
impl RemoteStore for WebDavClient {
    async fn probe(&self) -> ProbeReport {
        let response = match self.propfind("").await {
            Ok(response) => response,
            Err(err) => {
                return ProbeReport {
                    ok: false,
                    diagnostic: err.to_string(),
                };
            }
        };
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return ProbeReport {
                ok: false,
                diagnostic: format!("authentication rejected ({status})"),
            };
        }
        if status != StatusCode::MULTI_STATUS {
            return ProbeReport {
                ok: false,
                diagnostic: format!("unexpected status {status}"),
            };
        }
        match response.bytes().await {
            Ok(body) if is_multistatus(&body) => ProbeReport {
                ok: true,
                diagnostic: "connection successful".into(),
            },
            Ok(_) => ProbeReport {
                ok: false,
                diagnostic: "response is not a WebDAV multistatus document".into(),
            },
            Err(err) => ProbeReport {
                ok: false,
                diagnostic: err.to_string(),
            },
        }
    }

    async fn path_exists(&self, path: &str) -> Result<bool, RemoteError> {
        let status = self.propfind(path).await?.status();
        match status {
            StatusCode::MULTI_STATUS | StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(RemoteError::Status {
                method: "PROPFIND",
                path: path.to_string(),
                status: other.as_u16(),
            }),
        }
    }

    async fn make_directory(&self, path: &str) -> Result<(), RemoteError> {
        if self.path_exists(path).await? {
            return Ok(());
        }
        let status = self
            .request(mkcol_method(), path)
            .send()
            .await
            .map_err(|err| RemoteError::Transport(err.to_string()))?
            .status();
        match status {
            StatusCode::CREATED | StatusCode::OK | StatusCode::NO_CONTENT => {
                debug!(path, "created remote directory");
                Ok(())
            }
            // A concurrent request created it between the check and MKCOL.
            StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            other => Err(RemoteError::Status {
                method: "MKCOL",
                path: path.to_string(),
                status: other.as_u16(),
            }),
        }
    }

    async fn write_file(
        &self,
        path: &str,
        content: Bytes,
        content_type: &str,
    ) -> Result<(), RemoteError> {
        let size = content.len();
        let status = self
            .request(Method::PUT, path)
            .header(CONTENT_TYPE, content_type)
            .body(content)
            .send()
            .await
            .map_err(|err| RemoteError::Transport(err.to_string()))?
            .status();
        if status.is_success() {
            debug!(path, size, "uploaded remote file");
            Ok(())
        } else {
            warn!(path, status = status.as_u16(), "remote upload rejected");
            Err(RemoteError::Status {
                method: "PUT",
                path: path.to_string(),
                status: status.as_u16(),
            })
        }
    }

    async fn read_json(&self, path: &str) -> Result<serde_json::Value, RemoteError> {
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        match response.status() {
            status if status.is_success() => response
                .json::<serde_json::Value>()
                .await
                .map_err(|err| RemoteError::Decode(err.to_string())),
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound(path.to_string())),
            status => Err(RemoteError::Status {
                method: "GET",
                path: path.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}
