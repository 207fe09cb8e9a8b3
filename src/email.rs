//! End-of-call email: body formatting and HTTP relay delivery

use crate::config::MailerConfig;
use crate::models::Ruleset;
use crate::services::Mailer;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;

pub const AUDIO_MPEG: &str = "audio/mpeg";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail relay is not configured")]
    NotConfigured,
    #[error("no recipient for the email")]
    NoRecipient,
    #[error("mail transport failed: {0}")]
    Transport(String),
    #[error("mail relay answered HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// MP3 attachment named after its position and the question it answers
    pub fn recording(index: usize, purpose: &str, bytes: Vec<u8>) -> Self {
        let purpose: String = purpose
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Self {
            filename: format!("{index}-{purpose}.mp3"),
            content_type: AUDIO_MPEG.to_string(),
            bytes,
        }
    }
}

pub fn subject(ruleset: &Ruleset, call_id: &str) -> String {
    let title = if ruleset.title.trim().is_empty() {
        ruleset.id.as_str()
    } else {
        ruleset.title.as_str()
    };
    format!("{title} - {call_id}")
}

/// Render the collected answers as an HTML table.
///
/// Rows follow the script's step order; answers for purposes the script no
/// longer contains come last, alphabetically.
pub fn format_email_body(
    ruleset: &Ruleset,
    call_id: &str,
    responses: &HashMap<String, String>,
) -> String {
    let mut purposes: Vec<&str> = Vec::with_capacity(responses.len());
    for step in &ruleset.steps {
        if responses.contains_key(&step.purpose) && !purposes.contains(&step.purpose.as_str()) {
            purposes.push(&step.purpose);
        }
    }
    let mut extra: Vec<&str> = responses
        .keys()
        .map(String::as_str)
        .filter(|p| !purposes.contains(p))
        .collect();
    extra.sort_unstable();
    purposes.extend(extra);

    let mut html = String::new();
    let _ = write!(
        html,
        "<p>Ruleset: {} ({})<br>Call: {}</p>\n<table>\n\
         <tr><th>Ruleset</th><th>Title</th><th>Call</th><th>Purpose</th><th>Answer</th></tr>\n",
        escape(&ruleset.title),
        escape(&ruleset.id),
        escape(call_id),
    );
    for purpose in purposes {
        let answer = responses.get(purpose).map_or("", String::as_str);
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&ruleset.id),
            escape(&ruleset.title),
            escape(call_id),
            escape(purpose),
            escape(answer),
        );
    }
    html.push_str("</table>\n");
    html
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Mailer posting messages to an HTTP mail relay
pub struct HttpMailer {
    client: Client,
    relay_url: Option<String>,
    token: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(config: &MailerConfig) -> Result<Self, MailError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| MailError::Transport(format!("Failed to create HTTP client: {e}")))?;

        if config.relay_url.is_none() {
            tracing::warn!("No mail relay configured, call results cannot be delivered");
        }

        Ok(Self {
            client,
            relay_url: config.relay_url.clone(),
            token: config.relay_token.clone(),
            from: config.from.clone(),
        })
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
    attachments: Vec<RelayAttachment<'a>>,
}

#[derive(Serialize)]
struct RelayAttachment<'a> {
    filename: &'a str,
    content_type: &'a str,
    content: String,
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_with_attachments(
        &self,
        recipients: &[String],
        subject: &str,
        html_body: &str,
        attachments: &[Attachment],
    ) -> Result<(), MailError> {
        let relay_url = self.relay_url.as_deref().ok_or(MailError::NotConfigured)?;
        if recipients.is_empty() {
            return Err(MailError::NoRecipient);
        }

        let message = RelayMessage {
            from: &self.from,
            to: recipients,
            subject,
            html: html_body,
            attachments: attachments
                .iter()
                .map(|a| RelayAttachment {
                    filename: &a.filename,
                    content_type: &a.content_type,
                    content: STANDARD.encode(&a.bytes),
                })
                .collect(),
        };

        let mut request = self.client.post(relay_url).json(&message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(
            subject = %subject,
            recipients = recipients.len(),
            attachments = attachments.len(),
            "Email delivered"
        );
        Ok(())
    }
}
