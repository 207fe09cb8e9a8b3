//! Mock implementations for testing
//!
//! These mocks enable exercising call handling without real I/O.

use crate::db::Database;
use crate::email::{Attachment, MailError};
use crate::models::Ruleset;
use crate::services::{AnswerValidator, DatabaseStore, Mailer, ObjectStore};
use crate::telephony::{CallControl, Command, CommandError, RecordingMetadata, RecordingUrls};
use crate::validator::ValidationError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Store over a fresh in-memory database holding the given rulesets
pub fn store_with(rulesets: &[Ruleset]) -> Arc<DatabaseStore> {
    let db = Database::open_in_memory().unwrap();
    for ruleset in rulesets {
        db.add_ruleset(ruleset).unwrap();
    }
    Arc::new(DatabaseStore::new(db))
}

/// Poll `check` until it holds; the budget is generous so paused clocks also work
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// ============================================================================
// Mock Call Control
// ============================================================================

/// Records every command; chosen actions fail as a 503 after retries
#[derive(Default)]
pub struct MockCallControl {
    pub sent: Mutex<Vec<(String, Command)>>,
    failing: Mutex<HashSet<&'static str>>,
    recordings: Mutex<HashMap<String, RecordingMetadata>>,
}

impl MockCallControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_action(&self, name: &'static str) {
        self.failing.lock().unwrap().insert(name);
    }

    /// Serve metadata for a recording id
    pub fn with_recording(&self, id: &str, mp3: &str) {
        self.recordings.lock().unwrap().insert(
            id.to_string(),
            RecordingMetadata {
                id: id.to_string(),
                download_urls: RecordingUrls {
                    mp3: Some(mp3.to_string()),
                },
            },
        );
    }

    pub fn sent(&self) -> Vec<(String, Command)> {
        self.sent.lock().unwrap().clone()
    }

    /// Commands with the given action name, in send order
    pub fn sent_named(&self, name: &str) -> Vec<Command> {
        self.sent()
            .into_iter()
            .filter(|(_, c)| c.name() == name)
            .map(|(_, c)| c)
            .collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sent().iter().map(|(_, c)| c.name()).collect()
    }

    pub async fn wait_for(&self, name: &str, count: usize) {
        eventually(|| self.sent_named(name).len() >= count).await;
    }
}

#[async_trait]
impl CallControl for MockCallControl {
    async fn execute(&self, call_id: &str, command: &Command) -> Result<(), CommandError> {
        self.sent
            .lock()
            .unwrap()
            .push((call_id.to_string(), command.clone()));
        if self.failing.lock().unwrap().contains(command.name()) {
            return Err(CommandError::server_error(503, "mock failure").with_attempts(3));
        }
        Ok(())
    }

    async fn fetch_recording(&self, recording_id: &str) -> Result<RecordingMetadata, CommandError> {
        self.recordings
            .lock()
            .unwrap()
            .get(recording_id)
            .cloned()
            .ok_or_else(|| CommandError::rejected(404, "unknown recording"))
    }
}

// ============================================================================
// Mock Validator
// ============================================================================

/// Returns the raw answer unless a normalisation or failure is registered
#[derive(Default)]
pub struct MockValidator {
    answers: Mutex<HashMap<String, String>>,
    fail_all: bool,
    pub calls: Mutex<Vec<(String, String, String)>>,
}

impl MockValidator {
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn normalise(self, raw: &str, answer: &str) -> Self {
        self.answers
            .lock()
            .unwrap()
            .insert(raw.to_string(), answer.to_string());
        self
    }
}

#[async_trait]
impl AnswerValidator for MockValidator {
    async fn validate(
        &self,
        question: &str,
        purpose: &str,
        raw_answer: &str,
    ) -> Result<String, ValidationError> {
        self.calls.lock().unwrap().push((
            question.to_string(),
            purpose.to_string(),
            raw_answer.to_string(),
        ));
        if self.fail_all {
            return Err(ValidationError::Parse("mock failure".to_string()));
        }
        Ok(self
            .answers
            .lock()
            .unwrap()
            .get(raw_answer)
            .cloned()
            .unwrap_or_else(|| raw_answer.to_string()))
    }
}

// ============================================================================
// Mock Mailer
// ============================================================================

#[derive(Debug, Clone)]
pub struct SentMail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Default)]
pub struct MockMailer {
    pub sent: Mutex<Vec<SentMail>>,
    fail: bool,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send_with_attachments(
        &self,
        recipients: &[String],
        subject: &str,
        html_body: &str,
        attachments: &[Attachment],
    ) -> Result<(), MailError> {
        if self.fail {
            return Err(MailError::Transport("mock failure".to_string()));
        }
        self.sent.lock().unwrap().push(SentMail {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            html: html_body.to_string(),
            attachments: attachments.to_vec(),
        });
        Ok(())
    }
}

// ============================================================================
// Mock Object Store
// ============================================================================

/// Serves registered URLs; anything else fails
#[derive(Default)]
pub struct MockObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    pub fetched: Mutex<Vec<String>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, url: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(url.to_string(), bytes.to_vec());
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn recording_bytes(&self, url: &str) -> Result<Vec<u8>, String> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.objects
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| format!("no object at {url}"))
    }
}
