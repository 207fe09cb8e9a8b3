//! End-of-call aggregation
//!
//! Waits for the recordings a call produced, fetches them in parallel and
//! mails them together with the collected answers. The conversation record
//! is only deleted after a successful delivery.

use crate::config::AggregatorSettings;
use crate::email::{format_email_body, subject, Attachment, HttpMailer, MailError};
use crate::models::{Recording, Ruleset};
use crate::services::{ConversationStore, DatabaseStore, Mailer, ObjectStore};
use crate::telephony::CommandClient;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("store error: {0}")]
    Store(String),
    #[error("{failed} of {total} recordings could not be fetched")]
    Fetch { failed: usize, total: usize },
    #[error("no recipient for ruleset {0}")]
    NoRecipient(String),
    #[error(transparent)]
    Mail(#[from] MailError),
}

/// Summary of a delivered call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub recordings: usize,
    /// Delivered after the completion wait timed out
    pub degraded: bool,
}

pub type ProductionAggregator = RecordingAggregator<DatabaseStore, CommandClient, HttpMailer>;

pub struct RecordingAggregator<S, O, M> {
    store: Arc<S>,
    objects: Arc<O>,
    mailer: Arc<M>,
    settings: AggregatorSettings,
    fallback_recipient: Option<String>,
}

impl<S, O, M> RecordingAggregator<S, O, M>
where
    S: ConversationStore + 'static,
    O: ObjectStore + 'static,
    M: Mailer + 'static,
{
    pub fn new(
        store: Arc<S>,
        objects: Arc<O>,
        mailer: Arc<M>,
        settings: AggregatorSettings,
        fallback_recipient: Option<String>,
    ) -> Self {
        Self {
            store,
            objects,
            mailer,
            settings,
            fallback_recipient,
        }
    }

    pub async fn finalize(
        &self,
        ruleset_id: &str,
        call_id: &str,
        expected_recordings: usize,
    ) -> Result<Delivery, AggregationError> {
        let (recordings, degraded) = self.await_recordings(call_id, expected_recordings).await?;

        let ruleset = self
            .store
            .get_ruleset(ruleset_id)
            .await
            .map_err(AggregationError::Store)?;
        let conversation = self
            .store
            .get_conversation(call_id)
            .await
            .map_err(AggregationError::Store)?;
        let body = format_email_body(&ruleset, call_id, &conversation.responses);

        let attachments = self.fetch_all(call_id, &recordings).await?;
        let recipients = self.recipients(&ruleset)?;

        self.mailer
            .send_with_attachments(&recipients, &subject(&ruleset, call_id), &body, &attachments)
            .await?;

        self.store
            .delete_conversation(call_id)
            .await
            .map_err(AggregationError::Store)?;

        tracing::info!(
            call_id = %call_id,
            recordings = attachments.len(),
            responses = conversation.responses.len(),
            degraded,
            "Call results delivered"
        );
        Ok(Delivery {
            recordings: attachments.len(),
            degraded,
        })
    }

    /// Poll until the expected recordings are persisted or the wait times out
    async fn await_recordings(
        &self,
        call_id: &str,
        expected: usize,
    ) -> Result<(Vec<Recording>, bool), AggregationError> {
        let deadline = Instant::now() + self.settings.timeout;

        loop {
            let recordings = self
                .store
                .list_recordings(call_id)
                .await
                .map_err(AggregationError::Store)?;
            if recordings.len() >= expected {
                return Ok((recordings, false));
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    call_id = %call_id,
                    expected,
                    present = recordings.len(),
                    "Recordings incomplete at timeout, delivering what arrived"
                );
                return Ok((recordings, true));
            }

            tracing::debug!(call_id = %call_id, expected, present = recordings.len(), "Waiting for recordings");
            tokio::time::sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    /// Fetch every recording concurrently; any failure discards the whole set
    async fn fetch_all(
        &self,
        call_id: &str,
        recordings: &[Recording],
    ) -> Result<Vec<Attachment>, AggregationError> {
        let fetched: Arc<Mutex<Vec<(usize, Attachment)>>> = Arc::new(Mutex::new(Vec::new()));
        let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = JoinSet::new();
        for (index, recording) in recordings.iter().cloned().enumerate() {
            let objects = Arc::clone(&self.objects);
            let fetched = Arc::clone(&fetched);
            let failures = Arc::clone(&failures);
            tasks.spawn(async move {
                match objects.recording_bytes(&recording.url).await {
                    Ok(bytes) => fetched.lock().await.push((
                        index,
                        Attachment::recording(index, &recording.purpose, bytes),
                    )),
                    Err(e) => failures.lock().await.push(format!("{}: {e}", recording.url)),
                }
            });
        }

        let mut panicked = 0;
        while let Some(joined) = tasks.join_next().await {
            if joined.is_err() {
                panicked += 1;
            }
        }

        let failures = failures.lock().await;
        let failed = failures.len() + panicked;
        if failed > 0 {
            for failure in failures.iter() {
                tracing::error!(call_id = %call_id, error = %failure, "Recording fetch failed");
            }
            return Err(AggregationError::Fetch {
                failed,
                total: recordings.len(),
            });
        }

        let mut attachments = std::mem::take(&mut *fetched.lock().await);
        attachments.sort_by_key(|(index, _)| *index);
        Ok(attachments.into_iter().map(|(_, a)| a).collect())
    }

    fn recipients(&self, ruleset: &Ruleset) -> Result<Vec<String>, AggregationError> {
        ruleset
            .client
            .as_ref()
            .map(|c| c.email.trim())
            .filter(|email| !email.is_empty())
            .map(str::to_string)
            .or_else(|| self.fallback_recipient.clone())
            .map(|email| vec![email])
            .ok_or_else(|| AggregationError::NoRecipient(ruleset.id.clone()))
    }
}
