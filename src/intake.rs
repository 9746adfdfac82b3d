//! Upload orchestration: validation, ordered remote writes and notifications.
//!
//! A submission runs in two phases. The committed phase (identifier, validation,
//! folders, files, `metadata.json`, `README.md`) stops at the first failure and
//! leaves earlier writes in place. The notification phase runs only after the
//! committed phase succeeded and never changes the outcome.

use axum::body::Bytes;
use chrono::{Local, NaiveDateTime};
use futures_util::future::join_all;
use lettre::Address;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_CATEGORY, IntakeSettings, METADATA_FILE, README_FILE};
use crate::notify::{Notifier, TemplateContext, escape_html};
use crate::project::{
    Language, ProjectType, ancestors_inclusive, derive_project_id, file_extension,
    is_safe_segment, join_remote,
};
use crate::remote::{RemoteError, RemoteStore};

#[derive(Clone, Debug)]
pub struct SubmittedFile {
    pub filename: String,
    pub size: u64,
    pub content: Bytes,
    pub content_type: String,
}

#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub email: String,
    pub uploader_name: Option<String>,
    pub project_title: String,
    pub institution: String,
    pub is_prospective_study: bool,
    pub project_details: Option<String>,
    pub files: Vec<SubmittedFile>,
    /// Raw JSON object mapping filename to category.
    pub file_categories: Option<String>,
    pub project_type: ProjectType,
    pub language: Language,
}

#[derive(Clone, Debug, Serialize)]
pub struct UploadResult {
    pub success: bool,
    pub project_id: String,
    pub timestamp: NaiveDateTime,
    pub files_uploaded: usize,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub category: String,
    pub path: String,
}

/// Contents of `metadata.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub project_id: String,
    pub email: String,
    #[serde(default)]
    pub uploader_name: Option<String>,
    pub project_title: String,
    #[serde(default)]
    pub project_details: Option<String>,
    pub institution: String,
    #[serde(default)]
    pub is_prospective_study: bool,
    pub upload_timestamp: NaiveDateTime,
    #[serde(default)]
    pub files: Vec<UploadedFile>,
    #[serde(default)]
    pub project_type: ProjectType,
}

#[derive(Debug)]
pub enum ValidationError {
    MissingField(&'static str),
    MalformedForm(String),
    InvalidEmail(String),
    InvalidProjectType(String),
    UnknownInstitution(String),
    EmptyTitle,
    NoFiles,
    InvalidFilename(String),
    FileTooLarge { filename: String, max: u64 },
    ExtensionNotAllowed { extension: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingField(field) => write!(f, "Field {field} is required"),
            ValidationError::MalformedForm(msg) => write!(f, "Malformed form data: {msg}"),
            ValidationError::InvalidEmail(email) => write!(f, "Invalid e-mail address: {email}"),
            ValidationError::InvalidProjectType(value) => {
                write!(f, "Project type {value} is not supported")
            }
            ValidationError::UnknownInstitution(value) => {
                write!(f, "Institution {value} is not supported")
            }
            ValidationError::EmptyTitle => {
                write!(f, "Project title must contain letters or digits")
            }
            ValidationError::NoFiles => write!(f, "At least one file is required"),
            ValidationError::InvalidFilename(name) => write!(f, "Invalid file name: {name}"),
            ValidationError::FileTooLarge { filename, max } => {
                write!(f, "File {filename} exceeds maximum size of {max} bytes")
            }
            ValidationError::ExtensionNotAllowed { extension } => {
                write!(f, "File type {extension} not allowed")
            }
        }
    }
}

#[derive(Debug)]
pub enum IntakeError {
    Validation(ValidationError),
    BackendUnavailable(String),
    BackendOperation {
        step: &'static str,
        target: String,
        path: String,
        reason: String,
    },
    ProjectNotFound(String),
}

impl From<ValidationError> for IntakeError {
    fn from(err: ValidationError) -> Self {
        IntakeError::Validation(err)
    }
}

/// Labels a remote failure with the workflow step it interrupted.
fn backend_failure(step: &'static str, target: &str, path: &str, err: RemoteError) -> IntakeError {
    IntakeError::BackendOperation {
        step,
        target: target.to_string(),
        path: path.to_string(),
        reason: err.to_string(),
    }
}

/// Outcome of the notification phase; informational only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotificationReport {
    pub confirmation_sent: bool,
    pub team_sent: usize,
    pub team_failed: usize,
}

/// Drives submissions and status lookups against injected collaborators.
pub struct IntakeService {
    store: Arc<dyn RemoteStore>,
    notifier: Arc<dyn Notifier>,
    settings: IntakeSettings,
}

impl IntakeService {
    /// Creates a service over the given store and notifier.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        notifier: Arc<dyn Notifier>,
        settings: IntakeSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            settings,
        }
    }

    /// Store used for submissions, exposed for health checks.
    pub fn store(&self) -> &dyn RemoteStore {
        self.store.as_ref()
    }

    /// Per-file size limit in bytes.
    pub fn max_file_size(&self) -> u64 {
        self.settings.max_file_size
    }

    /// Runs one submission through validation, remote writes and notifications.
    pub async fn submit_upload(&self, request: UploadRequest) -> Result<UploadResult, IntakeError> {
        let email = request
            .email
            .trim()
            .parse::<Address>()
            .map_err(|_| ValidationError::InvalidEmail(request.email.clone()))?;
        if !self.settings.institutions.contains(&request.institution) {
            return Err(ValidationError::UnknownInstitution(request.institution.clone()).into());
        }

        let project_id = derive_project_id(
            &request.project_title,
            request.project_type,
            self.settings.id_mode,
            Local::now().date_naive(),
        )
        .ok_or(ValidationError::EmptyTitle)?;
        info!(
            project_id,
            files = request.files.len(),
            email_domain = email.domain(),
            project_type = %request.project_type,
            "upload request received"
        );

        let categories = parse_categories(request.file_categories.as_deref());
        self.validate_files(&request.files)?;

        let probe = self.store.probe().await;
        if !probe.ok {
            warn!(project_id, diagnostic = probe.diagnostic, "remote store unreachable");
            return Err(IntakeError::BackendUnavailable(probe.diagnostic));
        }

        let project_path = join_remote(&[
            &self.settings.base_path,
            &request.institution,
            &project_id,
        ]);
        for folder in ancestors_inclusive(&project_path) {
            self.store
                .make_directory(&folder)
                .await
                .map_err(|err| backend_failure("create folder", &project_id, &folder, err))?;
        }
        info!(project_id, path = project_path, "project folder ready");

        let upload_timestamp = Local::now().naive_local();
        let UploadRequest {
            uploader_name,
            project_title,
            institution,
            is_prospective_study,
            project_details,
            files,
            project_type,
            language,
            ..
        } = request;

        let uploaded = self.upload_files(&project_path, files, &categories).await?;
        info!(project_id, files = uploaded.len(), "files uploaded");

        let metadata = ProjectMetadata {
            project_id: project_id.clone(),
            email: email.to_string(),
            uploader_name,
            project_title,
            project_details,
            institution,
            is_prospective_study,
            upload_timestamp,
            files: uploaded,
            project_type,
        };

        let metadata_path = join_remote(&[&project_path, METADATA_FILE]);
        let metadata_json = serde_json::to_string_pretty(&metadata).map_err(|err| {
            IntakeError::BackendOperation {
                step: "upload metadata",
                target: METADATA_FILE.to_string(),
                path: metadata_path.clone(),
                reason: err.to_string(),
            }
        })?;
        self.store
            .write_text(&metadata_path, metadata_json)
            .await
            .map_err(|err| backend_failure("upload metadata", METADATA_FILE, &metadata_path, err))?;

        let readme_path = join_remote(&[&project_path, README_FILE]);
        self.store
            .write_text(&readme_path, render_readme(&metadata))
            .await
            .map_err(|err| backend_failure("upload README", README_FILE, &readme_path, err))?;

        let report = self
            .notify(&metadata, &email, language, &project_path)
            .await;
        debug!(
            project_id,
            confirmation_sent = report.confirmation_sent,
            team_sent = report.team_sent,
            team_failed = report.team_failed,
            "notifications finished"
        );

        info!(project_id, "upload completed");
        Ok(UploadResult {
            success: true,
            files_uploaded: metadata.files.len(),
            project_id,
            timestamp: Local::now().naive_local(),
            message: "Documents uploaded successfully".into(),
        })
    }

    /// Checks every file in order and reports the first violation.
    fn validate_files(&self, files: &[SubmittedFile]) -> Result<(), ValidationError> {
        if files.is_empty() {
            return Err(ValidationError::NoFiles);
        }
        for file in files {
            if !is_safe_segment(&file.filename) {
                return Err(ValidationError::InvalidFilename(file.filename.clone()));
            }
            if file.size > self.settings.max_file_size {
                warn!(
                    size = file.size,
                    max = self.settings.max_file_size,
                    "file exceeds maximum size"
                );
                return Err(ValidationError::FileTooLarge {
                    filename: file.filename.clone(),
                    max: self.settings.max_file_size,
                });
            }
            let extension = file_extension(&file.filename);
            if !self.settings.allowed_extensions.contains(&extension) {
                warn!(extension, "file extension not allowed");
                return Err(ValidationError::ExtensionNotAllowed { extension });
            }
        }
        debug!(count = files.len(), "file validation passed");
        Ok(())
    }

    /// Writes files in input order; the first failure stops the loop.
    async fn upload_files(
        &self,
        project_path: &str,
        files: Vec<SubmittedFile>,
        categories: &HashMap<String, String>,
    ) -> Result<Vec<UploadedFile>, IntakeError> {
        let total = files.len();
        let mut uploaded = Vec::with_capacity(total);
        for (index, file) in files.into_iter().enumerate() {
            let category = categories
                .get(&file.filename)
                .cloned()
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
            let folder = if self.settings.category_subfolders {
                let folder = join_remote(&[project_path, &category]);
                self.store
                    .make_directory(&folder)
                    .await
                    .map_err(|err| backend_failure("create folder", &category, &folder, err))?;
                folder
            } else {
                project_path.to_string()
            };

            let path = join_remote(&[&folder, &file.filename]);
            let SubmittedFile {
                filename,
                content,
                content_type,
                ..
            } = file;
            self.store
                .write_file(&path, content, &content_type)
                .await
                .map_err(|err| backend_failure("upload file", &filename, &path, err))?;
            debug!(index = index + 1, total, category, "file uploaded");
            uploaded.push(UploadedFile {
                filename,
                category,
                path,
            });
        }
        Ok(uploaded)
    }

    /// Sends the confirmation and team mails; failures are logged per recipient.
    async fn notify(
        &self,
        metadata: &ProjectMetadata,
        submitter: &Address,
        language: Language,
        project_path: &str,
    ) -> NotificationReport {
        let confirmation = confirmation_mail(metadata, language);
        let (subject, template, context) = &confirmation;
        let confirmation_future =
            self.notifier
                .render_and_send(submitter, subject, template, context);

        let (team_subject, team_context) = team_mail(metadata, &self.deep_link(project_path));
        let team_futures = self.settings.notification_emails.iter().map(|recipient| {
            let subject = &team_subject;
            let context = &team_context;
            async move {
                let sent = self
                    .notifier
                    .render_and_send(recipient, subject, "team_notification.html", context)
                    .await;
                if !sent {
                    warn!(
                        project_id = metadata.project_id,
                        domain = recipient.domain(),
                        "team notification failed"
                    );
                }
                sent
            }
        });

        let (confirmation_sent, team_results) =
            futures_util::future::join(confirmation_future, join_all(team_futures)).await;
        if !confirmation_sent {
            warn!(project_id = metadata.project_id, "confirmation mail failed");
        }
        let team_sent = team_results.iter().filter(|sent| **sent).count();
        NotificationReport {
            confirmation_sent,
            team_sent,
            team_failed: team_results.len() - team_sent,
        }
    }

    /// Web UI link that opens `project_path` in the store's file browser.
    pub fn deep_link(&self, project_path: &str) -> String {
        let mut url: Url = self.settings.web_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["apps", "files", ""]);
        }
        url.query_pairs_mut().append_pair("dir", project_path);
        url.to_string()
    }

    /// Reads `metadata.json` for `project_id`, searching each institution in order.
    pub async fn get_status(&self, project_id: &str) -> Result<ProjectMetadata, IntakeError> {
        if !is_safe_segment(project_id) {
            return Err(IntakeError::ProjectNotFound(project_id.to_string()));
        }
        for institution in &self.settings.institutions {
            let path = join_remote(&[
                &self.settings.base_path,
                institution,
                project_id,
                METADATA_FILE,
            ]);
            match self.store.read_json(&path).await {
                Ok(value) => {
                    return serde_json::from_value(value).map_err(|err| {
                        IntakeError::BackendOperation {
                            step: "read metadata",
                            target: project_id.to_string(),
                            path,
                            reason: err.to_string(),
                        }
                    });
                }
                Err(RemoteError::NotFound(_)) => continue,
                Err(err) => return Err(backend_failure("read metadata", project_id, &path, err)),
            }
        }
        debug!(project_id, "project not found");
        Err(IntakeError::ProjectNotFound(project_id.to_string()))
    }
}

/// Filename to category map; malformed JSON or unsafe names are ignored.
fn parse_categories(raw: Option<&str>) -> HashMap<String, String> {
    let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
        return HashMap::new();
    };
    let parsed = match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(error = %err, "failed to parse file_categories, using default category");
            return HashMap::new();
        }
    };
    let categories: HashMap<String, String> = parsed
        .into_iter()
        .filter_map(|(filename, value)| {
            let category = value.as_str()?.trim().to_string();
            is_safe_segment(&category).then_some((filename, category))
        })
        .collect();
    debug!(mappings = categories.len(), "parsed file categories");
    categories
}

/// Subject, template name and context of the submitter confirmation.
fn confirmation_mail(
    metadata: &ProjectMetadata,
    language: Language,
) -> (String, String, TemplateContext) {
    let subject = match (language, metadata.project_type) {
        (Language::De, ProjectType::New) => "Bestätigung Upload",
        (Language::De, ProjectType::Existing) => "Bestätigung Nachreichung",
        (Language::En, ProjectType::New) => "Upload confirmation",
        (Language::En, ProjectType::Existing) => "Resubmission confirmation",
    };
    let subject = format!(
        "{subject}: {} (ID: {})",
        metadata.project_title, metadata.project_id
    );
    let template = format!(
        "confirmation_{}_{}.html",
        metadata.project_type,
        language.code()
    );
    let files_html = format!(
        "<ul>{}</ul>",
        metadata
            .files
            .iter()
            .map(|file| format!(
                "<li><strong>{}:</strong> {}</li>",
                escape_html(&file.category),
                escape_html(&file.filename)
            ))
            .collect::<String>()
    );
    let context = TemplateContext::new(format!(
        "Confirmation for project {} (ID: {})",
        metadata.project_title, metadata.project_id
    ))
    .with("project_id", metadata.project_id.clone())
    .with("project_title", metadata.project_title.clone())
    .with(
        "uploader_name",
        metadata.uploader_name.clone().unwrap_or_else(|| "N/A".into()),
    )
    .with(
        "submitted_at",
        metadata.upload_timestamp.format("%d.%m.%Y %H:%M").to_string(),
    )
    .with("files_count", metadata.files.len().to_string())
    .with("files_html", files_html);
    (subject, template, context)
}

/// Subject and context of the team notification.
fn team_mail(metadata: &ProjectMetadata, deep_link: &str) -> (String, TemplateContext) {
    let (prefix, heading) = match metadata.project_type {
        ProjectType::New => ("Neuer Upload", "Neuer Dokument-Upload"),
        ProjectType::Existing => ("Nachreichung", "Nachreichung zu bestehendem Projekt"),
    };
    let subject = format!(
        "{prefix}: {} ({})",
        metadata.project_title, metadata.institution
    );
    let context = TemplateContext::new(format!(
        "{heading}: {} (ID: {}) {deep_link}",
        metadata.project_title, metadata.project_id
    ))
    .with("heading", heading)
    .with("project_id", metadata.project_id.clone())
    .with("project_title", metadata.project_title.clone())
    .with("institution", metadata.institution.clone())
    .with("uploader_email", metadata.email.clone())
    .with("files_count", metadata.files.len().to_string())
    .with("deep_link", deep_link);
    (subject, context)
}

/// Markdown summary stored next to the uploaded files.
pub fn render_readme(metadata: &ProjectMetadata) -> String {
    let kind = match metadata.project_type {
        ProjectType::New => "Neueinreichung",
        ProjectType::Existing => "Nachreichung",
    };
    let mut readme = format!(
        "# {title}\n\n\
         **Projekt-ID:** {id}\n\
         **Datum:** {date}\n\
         **Typ:** {kind}\n\
         **Prospektive Studie:** {prospective}\n\n\
         ## Kontaktinformationen\n\
         - **Name:** {name}\n\
         - **E-Mail:** {email}\n\
         - **Institution:** {institution}\n\n\
         ## Projektdetails\n\
         {details}\n\n\
         ## Hochgeladene Dateien\n",
        title = metadata.project_title,
        id = metadata.project_id,
        date = metadata.upload_timestamp.format("%d.%m.%Y %H:%M"),
        prospective = if metadata.is_prospective_study { "Ja" } else { "Nein" },
        name = metadata
            .uploader_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("Nicht angegeben"),
        email = metadata.email,
        institution = metadata.institution,
        details = metadata
            .project_details
            .as_deref()
            .filter(|details| !details.trim().is_empty())
            .unwrap_or("Keine weiteren Details angegeben."),
    );
    for file in &metadata.files {
        readme.push_str(&format!("- **{}:** {}\n", file.category, file.filename));
    }
    readme
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::IdMode;
    use crate::testing::{MemoryStore, RecordingNotifier};

    const TODAY_FMT: &str = "%Y-%m-%d";

    fn settings() -> IntakeSettings {
        IntakeSettings {
            base_path: "/Datenschutzportal".into(),
            web_url: Url::parse("https://cloud.example.org/").expect("url"),
            max_file_size: 10,
            allowed_extensions: vec![".pdf".into(), ".docx".into()],
            institutions: vec!["university".into(), "clinic".into()],
            category_subfolders: true,
            id_mode: IdMode::Dated,
            notification_emails: vec![
                "team1@example.org".parse().expect("address"),
                "team2@example.org".parse().expect("address"),
            ],
        }
    }

    fn service_with(
        settings: IntakeSettings,
    ) -> (Arc<MemoryStore>, Arc<RecordingNotifier>, IntakeService) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let service = IntakeService::new(store.clone(), notifier.clone(), settings);
        (store, notifier, service)
    }

    fn file(name: &str, content: &'static [u8]) -> SubmittedFile {
        SubmittedFile {
            filename: name.into(),
            size: content.len() as u64,
            content: Bytes::from_static(content),
            content_type: "application/pdf".into(),
        }
    }

    fn request(files: Vec<SubmittedFile>) -> UploadRequest {
        UploadRequest {
            email: "submitter@uni.example".into(),
            uploader_name: Some("Dr. Muster".into()),
            project_title: "My Proj!! 2024".into(),
            institution: "university".into(),
            is_prospective_study: true,
            project_details: None,
            files,
            file_categories: None,
            project_type: ProjectType::New,
            language: Language::De,
        }
    }

    fn today() -> String {
        Local::now().date_naive().format(TODAY_FMT).to_string()
    }

    #[tokio::test]
    async fn successful_upload_writes_files_metadata_and_readme() {
        let (store, notifier, service) = service_with(settings());
        let mut req = request(vec![file("consent.pdf", b"abc"), file("Plan.PDF", b"def")]);
        req.file_categories = Some(r#"{"consent.pdf":"einwilligung"}"#.into());

        let result = service.submit_upload(req).await.expect("upload");
        let project_id = format!("My_Proj_2024_{}", today());
        assert!(result.success);
        assert_eq!(result.project_id, project_id);
        assert_eq!(result.files_uploaded, 2);

        let root = format!("/Datenschutzportal/university/{project_id}");
        assert!(store.has_dir(&format!("{root}/einwilligung")));
        assert!(store.has_dir(&format!("{root}/sonstiges")));
        assert_eq!(
            store.writes(),
            vec![
                format!("{root}/einwilligung/consent.pdf"),
                format!("{root}/sonstiges/Plan.PDF"),
                format!("{root}/metadata.json"),
                format!("{root}/README.md"),
            ]
        );
        assert_eq!(
            store.file(&format!("{root}/einwilligung/consent.pdf")),
            Some(Bytes::from_static(b"abc"))
        );

        let readme = store.file(&format!("{root}/README.md")).expect("readme");
        let readme = String::from_utf8(readme.to_vec()).expect("utf8");
        assert!(readme.starts_with("# My Proj!! 2024"));
        assert!(readme.contains("- **einwilligung:** consent.pdf"));
        assert!(readme.contains("Keine weiteren Details angegeben."));

        let status = service.get_status(&project_id).await.expect("status");
        assert_eq!(status.files.len(), 2);
        assert_eq!(status.files[1].category, "sonstiges");
        assert_eq!(status.project_type, ProjectType::New);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 3);
        let confirmation = sent
            .iter()
            .find(|mail| mail.to == "submitter@uni.example")
            .expect("confirmation");
        assert!(confirmation.subject.starts_with("Bestätigung Upload"));
        let team = sent
            .iter()
            .find(|mail| mail.to == "team1@example.org")
            .expect("team mail");
        assert!(team.subject.contains("(university)"));
        assert!(team.body.contains("apps/files/?dir=%2FDatenschutzportal%2Funiversity%2F"));
    }

    #[tokio::test]
    async fn existing_project_gets_resubmission_prefix() {
        let (_store, notifier, service) = service_with(settings());
        let mut req = request(vec![file("a.pdf", b"1")]);
        req.project_type = ProjectType::Existing;
        req.language = Language::En;
        let result = service.submit_upload(req).await.expect("upload");
        assert_eq!(result.project_id, format!("RE_My_Proj_2024_{}", today()));
        let sent = notifier.sent();
        assert!(
            sent.iter()
                .any(|mail| mail.subject.starts_with("Resubmission confirmation"))
        );
    }

    #[tokio::test]
    async fn size_limit_is_inclusive() {
        let (_store, _notifier, service) = service_with(settings());
        let exact = service
            .submit_upload(request(vec![file("a.pdf", b"0123456789")]))
            .await;
        assert!(exact.is_ok());

        let (store, _notifier, service) = service_with(settings());
        let over = service
            .submit_upload(request(vec![
                file("a.pdf", b"1"),
                file("big.pdf", b"0123456789X"),
            ]))
            .await;
        match over {
            Err(IntakeError::Validation(ValidationError::FileTooLarge { filename, .. })) => {
                assert_eq!(filename, "big.pdf")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(store.writes().is_empty(), "nothing is written on validation failure");
    }

    #[tokio::test]
    async fn extension_check_is_case_insensitive_and_names_extension() {
        let (_store, _notifier, service) = service_with(settings());
        assert!(
            service
                .submit_upload(request(vec![file("A.PDF", b"1"), file("b.pdf", b"2")]))
                .await
                .is_ok()
        );

        let (_store, _notifier, service) = service_with(settings());
        let result = service
            .submit_upload(request(vec![file("tool.EXE", b"1")]))
            .await;
        assert!(matches!(
            result,
            Err(IntakeError::Validation(ValidationError::ExtensionNotAllowed { ref extension }))
                if extension == ".exe"
        ));
    }

    #[tokio::test]
    async fn invalid_category_json_falls_back_to_default() {
        let (store, _notifier, service) = service_with(settings());
        let mut req = request(vec![file("a.pdf", b"1"), file("b.pdf", b"2")]);
        req.file_categories = Some("{not json".into());
        let result = service.submit_upload(req).await.expect("upload");
        assert_eq!(result.files_uploaded, 2);
        assert!(
            store
                .writes()
                .iter()
                .take(2)
                .all(|path| path.contains("/sonstiges/"))
        );
    }

    #[tokio::test]
    async fn unsafe_category_names_are_ignored() {
        let categories = parse_categories(Some(r#"{"a.pdf":"../x","b.pdf":7,"c.pdf":"Ethik"}"#));
        assert_eq!(categories.len(), 1);
        assert_eq!(categories.get("c.pdf").map(String::as_str), Some("Ethik"));
    }

    #[tokio::test]
    async fn notification_failures_do_not_fail_upload() {
        let (_store, notifier, service) = service_with(settings());
        notifier.fail_for("submitter@uni.example");
        notifier.fail_for("team1@example.org");
        let result = service
            .submit_upload(request(vec![file("a.pdf", b"1"), file("b.pdf", b"2")]))
            .await
            .expect("upload");
        assert!(result.success);
        assert_eq!(result.files_uploaded, 2);
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "team2@example.org");
    }

    #[tokio::test]
    async fn unreachable_store_is_service_unavailable_without_writes() {
        let (store, _notifier, service) = service_with(settings());
        store.set_unreachable(true);
        let result = service
            .submit_upload(request(vec![file("a.pdf", b"1")]))
            .await;
        assert!(matches!(result, Err(IntakeError::BackendUnavailable(_))));
        store.set_unreachable(false);
        assert!(!store.has_dir("/Datenschutzportal"));
    }

    #[tokio::test]
    async fn file_failure_aborts_and_keeps_earlier_files() {
        let (store, notifier, service) = service_with(settings());
        store.fail_writes_containing("second.pdf");
        let result = service
            .submit_upload(request(vec![
                file("first.pdf", b"1"),
                file("second.pdf", b"2"),
                file("third.pdf", b"3"),
            ]))
            .await;
        match result {
            Err(IntakeError::BackendOperation { step, target, .. }) => {
                assert_eq!(step, "upload file");
                assert_eq!(target, "second.pdf");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].ends_with("/first.pdf"));
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn readme_failure_aborts_request() {
        let (store, notifier, service) = service_with(settings());
        store.fail_writes_containing("README.md");
        let result = service
            .submit_upload(request(vec![file("a.pdf", b"1")]))
            .await;
        assert!(matches!(
            result,
            Err(IntakeError::BackendOperation { step: "upload README", .. })
        ));
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn folder_failure_aborts_before_any_file_write() {
        let (store, notifier, service) = service_with(settings());
        store.fail_writes_containing("/university");
        let result = service
            .submit_upload(request(vec![file("a.pdf", b"1")]))
            .await;
        match result {
            Err(IntakeError::BackendOperation { step, path, .. }) => {
                assert_eq!(step, "create folder");
                assert_eq!(path, "/Datenschutzportal/university");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(store.has_dir("/Datenschutzportal"));
        assert!(store.writes().is_empty());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn metadata_failure_aborts_before_readme() {
        let (store, notifier, service) = service_with(settings());
        store.fail_writes_containing("metadata.json");
        let result = service
            .submit_upload(request(vec![file("a.pdf", b"1")]))
            .await;
        match result {
            Err(IntakeError::BackendOperation { step, target, .. }) => {
                assert_eq!(step, "upload metadata");
                assert_eq!(target, METADATA_FILE);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].ends_with("/sonstiges/a.pdf"));
        assert!(writes.iter().all(|path| !path.ends_with(README_FILE)));
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn flat_layout_puts_files_in_project_folder() {
        let mut settings = settings();
        settings.category_subfolders = false;
        let (store, _notifier, service) = service_with(settings);
        let mut req = request(vec![file("a.pdf", b"1")]);
        req.file_categories = Some(r#"{"a.pdf":"ethik"}"#.into());
        let result = service.submit_upload(req).await.expect("upload");
        let root = format!("/Datenschutzportal/university/{}", result.project_id);
        assert_eq!(store.writes()[0], format!("{root}/a.pdf"));
        let status = service.get_status(&result.project_id).await.expect("status");
        assert_eq!(status.files[0].category, "ethik");
    }

    #[tokio::test]
    async fn request_level_validation() {
        let (_store, _notifier, service) = service_with(settings());
        let mut req = request(vec![file("a.pdf", b"1")]);
        req.project_title = "!!!".into();
        assert!(matches!(
            service.submit_upload(req).await,
            Err(IntakeError::Validation(ValidationError::EmptyTitle))
        ));

        let mut req = request(vec![file("a.pdf", b"1")]);
        req.institution = "../other".into();
        assert!(matches!(
            service.submit_upload(req).await,
            Err(IntakeError::Validation(ValidationError::UnknownInstitution(_)))
        ));

        let mut req = request(vec![file("a.pdf", b"1")]);
        req.email = "nobody".into();
        assert!(matches!(
            service.submit_upload(req).await,
            Err(IntakeError::Validation(ValidationError::InvalidEmail(_)))
        ));

        assert!(matches!(
            service.submit_upload(request(Vec::new())).await,
            Err(IntakeError::Validation(ValidationError::NoFiles))
        ));
    }

    #[tokio::test]
    async fn status_for_unknown_project_is_not_found() {
        let (_store, _notifier, service) = service_with(settings());
        assert!(matches!(
            service.get_status("Never_2024-01-01").await,
            Err(IntakeError::ProjectNotFound(_))
        ));
        assert!(matches!(
            service.get_status("..").await,
            Err(IntakeError::ProjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn status_searches_institutions_and_reads_legacy_records() {
        let (store, _notifier, service) = service_with(settings());
        store.put_json(
            "/Datenschutzportal/clinic/Old_2023-05-01/metadata.json",
            &serde_json::json!({
                "project_id": "Old_2023-05-01",
                "email": "a@b.example",
                "uploader_name": null,
                "project_title": "Old",
                "project_details": null,
                "institution": "clinic",
                "is_prospective_study": false,
                "upload_timestamp": "2023-05-01T10:11:12.123456",
                "files": [{"filename": "x.pdf", "category": "sonstiges", "path": "/p/x.pdf"}]
            }),
        );
        let status = service.get_status("Old_2023-05-01").await.expect("status");
        assert_eq!(status.institution, "clinic");
        assert_eq!(status.project_type, ProjectType::New);
        assert_eq!(status.files.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_uploads_to_same_folder_both_succeed() {
        let (_store, _notifier, service) = service_with(settings());
        let (first, second) = tokio::join!(
            service.submit_upload(request(vec![file("a.pdf", b"1")])),
            service.submit_upload(request(vec![file("b.pdf", b"2")])),
        );
        let first = first.expect("first upload");
        let second = second.expect("second upload");
        assert_eq!(first.project_id, second.project_id);
    }

    #[test]
    fn deep_link_respects_web_url_prefix() {
        let mut settings = settings();
        settings.web_url = Url::parse("https://host.example/nextcloud").expect("url");
        let (_store, _notifier, service) = service_with(settings);
        assert_eq!(
            service.deep_link("/Datenschutzportal/clinic/P 1"),
            "https://host.example/nextcloud/apps/files/?dir=%2FDatenschutzportal%2Fclinic%2FP+1"
        );
    }
}
