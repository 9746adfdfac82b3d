//! Project identifiers, submission kinds and remote path helpers.

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::RESUBMISSION_PREFIX;

/// How the identifier suffix is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum IdMode {
    /// `<title>_<YYYY-MM-DD>`
    Dated,
    /// `<title>_<8 hex digits>`
    Random,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    #[default]
    New,
    Existing,
}

impl ProjectType {
    /// Form and metadata spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectType::New => "new",
            ProjectType::Existing => "existing",
        }
    }
}

impl FromStr for ProjectType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "new" => Ok(ProjectType::New),
            "existing" => Ok(ProjectType::Existing),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Language of the submitter-facing confirmation mail.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Language {
    #[default]
    De,
    En,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::De => "de",
            Language::En => "en",
        }
    }

    /// Unknown codes fall back to German.
    pub fn from_code(code: &str) -> Self {
        if code.trim().eq_ignore_ascii_case("en") {
            Language::En
        } else {
            Language::De
        }
    }
}

/// Keeps `[A-Za-z0-9 _-]`, turns whitespace runs into `_`, collapses repeated
/// underscores and trims them from both ends.
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for ch in title.chars() {
        let mapped = match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => ch,
            ' ' => '_',
            _ => continue,
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }
    out.trim_matches('_').to_string()
}

/// Builds the identifier that also names the project folder.
///
/// Returns `None` when nothing of the title survives sanitization.
pub fn derive_project_id(
    title: &str,
    project_type: ProjectType,
    mode: IdMode,
    today: NaiveDate,
) -> Option<String> {
    let core = sanitize_title(title);
    if core.is_empty() {
        return None;
    }
    let suffix = match mode {
        IdMode::Dated => today.format("%Y-%m-%d").to_string(),
        IdMode::Random => Uuid::new_v4().simple().to_string()[..8].to_string(),
    };
    Some(match project_type {
        ProjectType::New => format!("{core}_{suffix}"),
        ProjectType::Existing => format!("{RESUBMISSION_PREFIX}_{core}_{suffix}"),
    })
}

/// True for a single non-empty path segment without separators or dot-only names.
pub fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}

/// Reduces a client supplied filename to its final component.
pub fn client_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    is_safe_segment(name).then(|| name.to_string())
}

/// Lower-cased final dot-suffix including the dot, or empty when absent.
pub fn file_extension(filename: &str) -> String {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => filename[idx..].to_lowercase(),
        _ => String::new(),
    }
}

/// Joins remote path parts with `/`, skipping empty parts.
pub fn join_remote(parts: &[&str]) -> String {
    let mut path = String::new();
    for part in parts {
        for segment in part.split('/').filter(|segment| !segment.is_empty()) {
            path.push('/');
            path.push_str(segment);
        }
    }
    path
}

/// Every prefix of `path` from the first segment down to the path itself.
pub fn ancestors_inclusive(path: &str) -> Vec<String> {
    let mut current = String::new();
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            current.push('/');
            current.push_str(segment);
            current.clone()
        })
        .collect()
}
