//! Collaborator abstractions consumed by the engine and the aggregator
//!
//! These traits enable testing call handling with mock implementations.

use crate::db::Database;
use crate::email::{Attachment, MailError};
use crate::models::{Conversation, Recording, Ruleset};
use crate::telephony::CommandClient;
use crate::validator::ValidationError;
use async_trait::async_trait;
use std::sync::Arc;

/// Persistence for rulesets and per-call conversations
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_ruleset(&self, id: &str) -> Result<Ruleset, String>;

    async fn add_ruleset(&self, ruleset: &Ruleset) -> Result<(), String>;

    /// Create the record for a call; repeated creates are no-ops
    async fn create_conversation(&self, call_id: &str, ruleset_id: &str) -> Result<(), String>;

    async fn delete_conversation(&self, call_id: &str) -> Result<(), String>;

    /// Merge one answer into the response map without touching other purposes
    async fn add_response(&self, call_id: &str, purpose: &str, answer: &str)
        -> Result<(), String>;

    /// Append a recording; existing recordings are never replaced
    async fn add_recording(&self, call_id: &str, recording: &Recording) -> Result<(), String>;

    async fn mark_done(&self, call_id: &str) -> Result<(), String>;

    async fn get_conversation(&self, call_id: &str) -> Result<Conversation, String>;

    async fn list_recordings(&self, call_id: &str) -> Result<Vec<Recording>, String>;
}

/// Durable storage holding recording audio
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn recording_bytes(&self, url: &str) -> Result<Vec<u8>, String>;
}

/// Normalises a raw transcript into the answer to a question
#[async_trait]
pub trait AnswerValidator: Send + Sync {
    async fn validate(
        &self,
        question: &str,
        purpose: &str,
        raw_answer: &str,
    ) -> Result<String, ValidationError>;
}

/// Outbound email delivery
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_with_attachments(
        &self,
        recipients: &[String],
        subject: &str,
        html_body: &str,
        attachments: &[Attachment],
    ) -> Result<(), MailError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn get_ruleset(&self, id: &str) -> Result<Ruleset, String> {
        (**self).get_ruleset(id).await
    }

    async fn add_ruleset(&self, ruleset: &Ruleset) -> Result<(), String> {
        (**self).add_ruleset(ruleset).await
    }

    async fn create_conversation(&self, call_id: &str, ruleset_id: &str) -> Result<(), String> {
        (**self).create_conversation(call_id, ruleset_id).await
    }

    async fn delete_conversation(&self, call_id: &str) -> Result<(), String> {
        (**self).delete_conversation(call_id).await
    }

    async fn add_response(
        &self,
        call_id: &str,
        purpose: &str,
        answer: &str,
    ) -> Result<(), String> {
        (**self).add_response(call_id, purpose, answer).await
    }

    async fn add_recording(&self, call_id: &str, recording: &Recording) -> Result<(), String> {
        (**self).add_recording(call_id, recording).await
    }

    async fn mark_done(&self, call_id: &str) -> Result<(), String> {
        (**self).mark_done(call_id).await
    }

    async fn get_conversation(&self, call_id: &str) -> Result<Conversation, String> {
        (**self).get_conversation(call_id).await
    }

    async fn list_recordings(&self, call_id: &str) -> Result<Vec<Recording>, String> {
        (**self).list_recordings(call_id).await
    }
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    async fn recording_bytes(&self, url: &str) -> Result<Vec<u8>, String> {
        (**self).recording_bytes(url).await
    }
}

#[async_trait]
impl<T: AnswerValidator + ?Sized> AnswerValidator for Arc<T> {
    async fn validate(
        &self,
        question: &str,
        purpose: &str,
        raw_answer: &str,
    ) -> Result<String, ValidationError> {
        (**self).validate(question, purpose, raw_answer).await
    }
}

#[async_trait]
impl<T: Mailer + ?Sized> Mailer for Arc<T> {
    async fn send_with_attachments(
        &self,
        recipients: &[String],
        subject: &str,
        html_body: &str,
        attachments: &[Attachment],
    ) -> Result<(), MailError> {
        (**self)
            .send_with_attachments(recipients, subject, html_body, attachments)
            .await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as ConversationStore
#[derive(Clone)]
pub struct DatabaseStore {
    db: Database,
}

impl DatabaseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationStore for DatabaseStore {
    async fn get_ruleset(&self, id: &str) -> Result<Ruleset, String> {
        self.db.get_ruleset(id).map_err(|e| e.to_string())
    }

    async fn add_ruleset(&self, ruleset: &Ruleset) -> Result<(), String> {
        self.db.add_ruleset(ruleset).map_err(|e| e.to_string())
    }

    async fn create_conversation(&self, call_id: &str, ruleset_id: &str) -> Result<(), String> {
        self.db
            .create_conversation(call_id, ruleset_id)
            .map_err(|e| e.to_string())
    }

    async fn delete_conversation(&self, call_id: &str) -> Result<(), String> {
        self.db.delete_conversation(call_id).map_err(|e| e.to_string())
    }

    async fn add_response(
        &self,
        call_id: &str,
        purpose: &str,
        answer: &str,
    ) -> Result<(), String> {
        self.db
            .add_response(call_id, purpose, answer)
            .map_err(|e| e.to_string())
    }

    async fn add_recording(&self, call_id: &str, recording: &Recording) -> Result<(), String> {
        self.db
            .add_recording(call_id, recording)
            .map_err(|e| e.to_string())
    }

    async fn mark_done(&self, call_id: &str) -> Result<(), String> {
        self.db.mark_done(call_id).map_err(|e| e.to_string())
    }

    async fn get_conversation(&self, call_id: &str) -> Result<Conversation, String> {
        self.db.get_conversation(call_id).map_err(|e| e.to_string())
    }

    async fn list_recordings(&self, call_id: &str) -> Result<Vec<Recording>, String> {
        self.db.list_recordings(call_id).map_err(|e| e.to_string())
    }
}

/// Recording audio is served by the call-control platform itself
#[async_trait]
impl ObjectStore for CommandClient {
    async fn recording_bytes(&self, url: &str) -> Result<Vec<u8>, String> {
        self.fetch_recording_bytes(url)
            .await
            .map_err(|e| e.to_string())
    }
}
