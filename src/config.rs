//! CLI/environment arguments and the validated runtime settings built from them.

use axum::http::HeaderValue;
use clap::{Parser, ValueEnum};
use lettre::Address;
use reqwest::Url;
use shadow_rs::formatcp;
use std::fmt;
use std::time::Duration;

use crate::build;
use crate::project::{IdMode, is_safe_segment};

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const SERVICE_NAME: &str = "Datenschutzportal API";
pub const DEFAULT_BASE_PATH: &str = "/Datenschutzportal";
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_REQUEST_SIZE: u64 = 500 * 1024 * 1024;
pub const DEFAULT_WEBDAV_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_SMTP_FROM_NAME: &str = "Datenschutzportal";
pub const DEFAULT_ALLOWED_FILE_TYPES: &str =
    ".pdf,.doc,.docx,.zip,.odt,.ods,.odp,.png,.jpg,.jpeg,.xlsx,.csv,.odf";
pub const DEFAULT_INSTITUTIONS: &str = "university,clinic";
pub const DEFAULT_CATEGORY: &str = "sonstiges";
pub const RESUBMISSION_PREFIX: &str = "RE";
pub const METADATA_FILE: &str = "metadata.json";
pub const README_FILE: &str = "README.md";

/// List setting given either as a JSON array or as comma separated text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StringList(pub Vec<String>);

/// Parses `["a","b"]` or `a, b` into a list, dropping blank items.
///
/// Text starting with `[` that is not a valid JSON string array is an error
/// rather than silently being treated as comma separated.
pub fn parse_string_list(raw: &str) -> Result<StringList, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(StringList::default());
    }
    let items: Vec<String> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|err| format!("invalid JSON list: {err}"))?
    } else {
        trimmed.split(',').map(str::to_string).collect()
    };
    Ok(StringList(
        items
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
    ))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SmtpEncryption {
    /// Plain connection upgraded with STARTTLS.
    Starttls,
    /// Implicit TLS from the first byte.
    Ssl,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug, Clone)]
#[command(name = "intake-portal", version = VERSION_INFO, about = "Data protection document intake service")]
pub struct Args {
    #[arg(long, env = "API_HOST", default_value = "0.0.0.0", help = "Bind address")]
    pub host: String,
    #[arg(short = 'p', long, env = "API_PORT", default_value_t = 8000, help = "Listen port")]
    pub port: u16,
    #[arg(long, env = "TLS_CERT", help = "TLS cert path (enables HTTPS with --tls-key)")]
    pub tls_cert: Option<String>,
    #[arg(long, env = "TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(long, env = "CORS_ORIGINS", value_parser = parse_string_list, help = "Allowed CORS origins")]
    pub cors_origins: Option<StringList>,
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[arg(long, env = "NEXTCLOUD_URL", help = "WebDAV endpoint of the file store")]
    pub nextcloud_url: String,
    #[arg(long, env = "NEXTCLOUD_USERNAME")]
    pub nextcloud_username: String,
    #[arg(long, env = "NEXTCLOUD_PASSWORD", hide_env_values = true)]
    pub nextcloud_password: String,
    #[arg(long, env = "NEXTCLOUD_BASE_PATH", default_value = DEFAULT_BASE_PATH)]
    pub nextcloud_base_path: String,
    #[arg(long, env = "NEXTCLOUD_WEB_URL", help = "Web UI base used for deep links")]
    pub nextcloud_web_url: Option<String>,
    #[arg(long, env = "WEBDAV_TIMEOUT_SECS", default_value_t = DEFAULT_WEBDAV_TIMEOUT_SECS)]
    pub webdav_timeout_secs: u64,

    #[arg(long, env = "SMTP_HOST")]
    pub smtp_host: String,
    #[arg(long, env = "SMTP_PORT", default_value_t = DEFAULT_SMTP_PORT)]
    pub smtp_port: u16,
    #[arg(long, env = "SMTP_USERNAME")]
    pub smtp_username: Option<String>,
    #[arg(long, env = "SMTP_PASSWORD", hide_env_values = true)]
    pub smtp_password: Option<String>,
    #[arg(long, env = "SMTP_FROM_EMAIL")]
    pub smtp_from_email: String,
    #[arg(long, env = "SMTP_FROM_NAME", default_value = DEFAULT_SMTP_FROM_NAME)]
    pub smtp_from_name: String,
    #[arg(long, env = "SMTP_ENCRYPTION", value_enum, default_value_t = SmtpEncryption::Starttls)]
    pub smtp_encryption: SmtpEncryption,
    #[arg(long, env = "NOTIFICATION_EMAILS", value_parser = parse_string_list, default_value = "")]
    pub notification_emails: StringList,

    #[arg(long, env = "API_TOKEN", hide_env_values = true, help = "Bearer token for API access")]
    pub api_token: String,
    #[arg(long, env = "MAX_FILE_SIZE", default_value_t = DEFAULT_MAX_FILE_SIZE)]
    pub max_file_size: u64,
    #[arg(long, env = "MAX_REQUEST_SIZE", default_value_t = DEFAULT_MAX_REQUEST_SIZE)]
    pub max_request_size: u64,
    #[arg(long, env = "ALLOWED_FILE_TYPES", value_parser = parse_string_list, default_value = DEFAULT_ALLOWED_FILE_TYPES)]
    pub allowed_file_types: StringList,
    #[arg(long, env = "INSTITUTIONS", value_parser = parse_string_list, default_value = DEFAULT_INSTITUTIONS)]
    pub institutions: StringList,
    #[arg(long, env = "CATEGORY_SUBFOLDERS", default_value_t = true, action = clap::ArgAction::Set)]
    pub category_subfolders: bool,
    #[arg(long, env = "PROJECT_ID_MODE", value_enum, default_value_t = IdMode::Dated)]
    pub project_id_mode: IdMode,
}

/// Startup configuration failure naming the offending setting.
#[derive(Debug)]
pub struct ConfigError {
    pub setting: &'static str,
    pub reason: String,
}

impl ConfigError {
    fn new(setting: &'static str, reason: impl Into<String>) -> Self {
        Self {
            setting,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.setting, self.reason)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug)]
pub struct StoreSettings {
    pub endpoint: Url,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_email: Address,
    pub from_name: String,
    pub encryption: SmtpEncryption,
}

/// Rules the orchestrator applies to every submission.
#[derive(Clone, Debug)]
pub struct IntakeSettings {
    pub base_path: String,
    pub web_url: Url,
    pub max_file_size: u64,
    pub allowed_extensions: Vec<String>,
    pub institutions: Vec<String>,
    pub category_subfolders: bool,
    pub id_mode: IdMode,
    pub notification_emails: Vec<Address>,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub api_token: String,
    pub cors_origins: Vec<HeaderValue>,
    pub max_request_size: usize,
    pub store: StoreSettings,
    pub smtp: SmtpSettings,
    pub intake: IntakeSettings,
}

impl Settings {
    /// Validates every field of `args`, failing on the first bad setting.
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let api_token = args.api_token.trim().to_string();
        if api_token.is_empty() {
            return Err(ConfigError::new("API_TOKEN", "must not be empty"));
        }

        let cors_origins = args
            .cors_origins
            .as_ref()
            .map(|list| list.0.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .map_err(|_| ConfigError::new("CORS_ORIGINS", format!("bad origin {origin}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let endpoint = parse_url("NEXTCLOUD_URL", &args.nextcloud_url)?;
        let web_url = match args.nextcloud_web_url.as_deref() {
            Some(raw) => parse_url("NEXTCLOUD_WEB_URL", raw)?,
            None => origin_of(&endpoint),
        };
        let base_path = normalize_base_path(&args.nextcloud_base_path)?;

        let from_email = args
            .smtp_from_email
            .trim()
            .parse::<Address>()
            .map_err(|err| ConfigError::new("SMTP_FROM_EMAIL", err.to_string()))?;
        let notification_emails = args
            .notification_emails
            .0
            .iter()
            .map(|email| {
                email
                    .parse::<Address>()
                    .map_err(|err| ConfigError::new("NOTIFICATION_EMAILS", format!("{email}: {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if args.max_file_size == 0 {
            return Err(ConfigError::new("MAX_FILE_SIZE", "must be greater than zero"));
        }
        let max_request_size = usize::try_from(args.max_request_size)
            .map_err(|_| ConfigError::new("MAX_REQUEST_SIZE", "too large for this platform"))?;

        let allowed_extensions = normalize_extensions(&args.allowed_file_types.0)?;

        let institutions = args.institutions.0.clone();
        if institutions.is_empty() {
            return Err(ConfigError::new("INSTITUTIONS", "at least one is required"));
        }
        if let Some(bad) = institutions.iter().find(|name| !is_safe_segment(name)) {
            return Err(ConfigError::new(
                "INSTITUTIONS",
                format!("{bad} is not a safe folder name"),
            ));
        }

        Ok(Self {
            api_token,
            cors_origins,
            max_request_size,
            store: StoreSettings {
                endpoint,
                username: args.nextcloud_username.clone(),
                password: args.nextcloud_password.clone(),
                timeout: Duration::from_secs(args.webdav_timeout_secs),
            },
            smtp: SmtpSettings {
                host: args.smtp_host.trim().to_string(),
                port: args.smtp_port,
                username: args.smtp_username.clone().filter(|value| !value.is_empty()),
                password: args.smtp_password.clone().filter(|value| !value.is_empty()),
                from_email,
                from_name: args.smtp_from_name.clone(),
                encryption: args.smtp_encryption,
            },
            intake: IntakeSettings {
                base_path,
                web_url,
                max_file_size: args.max_file_size,
                allowed_extensions,
                institutions,
                category_subfolders: args.category_subfolders,
                id_mode: args.project_id_mode,
                notification_emails,
            },
        })
    }
}

/// Parses an absolute http(s) URL for `setting`.
fn parse_url(setting: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|err| ConfigError::new(setting, err.to_string()))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::new(setting, "expected an http(s) URL"));
    }
    Ok(url)
}

/// Scheme, host and port of `url` with an empty path.
fn origin_of(url: &Url) -> Url {
    let mut origin = url.clone();
    origin.set_path("");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}

/// Normalizes to `/a/b` form; `/` alone becomes the empty string.
fn normalize_base_path(raw: &str) -> Result<String, ConfigError> {
    let mut normalized = String::new();
    for segment in raw.split('/').filter(|segment| !segment.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(ConfigError::new(
                "NEXTCLOUD_BASE_PATH",
                "relative segments are not allowed",
            ));
        }
        normalized.push('/');
        normalized.push_str(segment);
    }
    Ok(normalized)
}

/// Lower-cases extensions and ensures a leading dot.
fn normalize_extensions(raw: &[String]) -> Result<Vec<String>, ConfigError> {
    if raw.is_empty() {
        return Err(ConfigError::new("ALLOWED_FILE_TYPES", "at least one is required"));
    }
    Ok(raw
        .iter()
        .map(|ext| {
            let ext = ext.to_lowercase();
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{ext}")
            }
        })
        .collect())
}
