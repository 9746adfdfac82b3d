//! E-mail notifications: embedded templates and the SMTP transport.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use rust_embed::RustEmbed;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::{SmtpEncryption, SmtpSettings};

#[derive(RustEmbed)]
#[folder = "templates/"]
/// HTML mail templates shipped with the binary.
pub struct MailTemplates;

/// Values for `{{ name }}` placeholders plus the text used when rendering fails.
///
/// Keys ending in `_html` are inserted verbatim, every other value is escaped.
#[derive(Clone, Debug, Default)]
pub struct TemplateContext {
    pub values: BTreeMap<&'static str, String>,
    pub fallback: String,
}

impl TemplateContext {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            values: BTreeMap::new(),
            fallback: fallback.into(),
        }
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }
}

/// Escapes the five HTML special characters.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Renders an embedded template, or `None` if it is missing, not UTF-8, or
/// references a placeholder absent from `context`.
pub fn render_template(name: &str, context: &TemplateContext) -> Option<String> {
    let file = MailTemplates::get(name)?;
    let source = std::str::from_utf8(file.data.as_ref()).ok()?;
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}")?;
        let key = after[..end].trim();
        let value = context.values.get(key)?;
        if key.ends_with("_html") {
            out.push_str(value);
        } else {
            out.push_str(&escape_html(value));
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Some(out)
}

/// Outbound mail capability. Neither method reports errors beyond `false`.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends one HTML mail; `false` on any failure.
    async fn send(&self, to: &Address, subject: &str, html_body: &str) -> bool;

    async fn render_and_send(
        &self,
        to: &Address,
        subject: &str,
        template: &str,
        context: &TemplateContext,
    ) -> bool {
        let body = match render_template(template, context) {
            Some(body) => body,
            None => {
                warn!(template, "mail template unavailable, sending plain text");
                escape_html(&context.fallback)
            }
        };
        self.send(to, subject, &body).await
    }
}

pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Builds the transport for the configured encryption mode.
    pub fn new(settings: &SmtpSettings) -> Result<Self, lettre::transport::smtp::Error> {
        let builder = match settings.encryption {
            SmtpEncryption::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
            }
            SmtpEncryption::Ssl => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?,
            SmtpEncryption::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
            }
        };
        let builder = builder.port(settings.port);
        let builder = match (&settings.username, &settings.password) {
            (Some(user), Some(pass)) => {
                builder.credentials(Credentials::new(user.clone(), pass.clone()))
            }
            _ => builder,
        };
        info!(
            host = %settings.host,
            port = settings.port,
            encryption = ?settings.encryption,
            "smtp notifier initialized"
        );
        Ok(Self {
            mailer: builder.build(),
            from: Mailbox::new(
                Some(settings.from_name.clone()),
                settings.from_email.clone(),
            ),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, to: &Address, subject: &str, html_body: &str) -> bool {
        let message = match Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(None, to.clone()))
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
        {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "failed to build mail");
                return false;
            }
        };
        match self.mailer.send(message).await {
            Ok(_) => {
                debug!(domain = to.domain(), "mail sent");
                true
            }
            Err(err) => {
                warn!(domain = to.domain(), error = %err, "mail delivery failed");
                false
            }
        }
    }
}
