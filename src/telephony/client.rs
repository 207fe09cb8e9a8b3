//! HTTP client for the call-control platform

use super::command::Command;
use super::error::CommandError;
use super::event::{RecordingEnvelope, RecordingMetadata};
use super::CallControl;
use crate::config::{RetryPolicy, TelephonyConfig};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends commands with bearer auth, fixed-delay retry and idempotent ids
pub struct CommandClient {
    client: Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl CommandClient {
    pub fn new(config: &TelephonyConfig) -> Result<Self, CommandError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CommandError::transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            retry: config.retry,
        })
    }

    fn action_url(&self, call_id: &str, name: &str) -> String {
        format!("{}/calls/{call_id}/actions/{name}", self.base_url)
    }

    /// Download recording audio from a platform URL
    pub async fn fetch_recording_bytes(&self, url: &str) -> Result<Vec<u8>, CommandError> {
        let response = self
            .send_with_retry("fetch_recording_bytes", || {
                self.client.get(url).bearer_auth(&self.api_key)
            })
            .await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CommandError::invalid_response(format!("Failed to read recording: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Run one request under the retry policy.
    ///
    /// 5xx responses and transport failures are retried after a fixed delay
    /// until `max_attempts` is reached; any other non-success status fails
    /// immediately.
    async fn send_with_retry<F>(&self, label: &str, build: F) -> Result<Response, CommandError>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    CommandError::from_status(status, &body)
                }
                Err(e) if e.is_timeout() => CommandError::transport(format!("Request timeout: {e}")),
                Err(e) => CommandError::transport(format!("Request failed: {e}")),
            };

            if !error.kind.is_retryable() || attempt >= max_attempts {
                tracing::error!(
                    command = label,
                    attempt,
                    error = %error.message,
                    retryable = error.kind.is_retryable(),
                    "Command failed"
                );
                return Err(error.with_attempts(attempt));
            }

            tracing::warn!(
                command = label,
                attempt,
                error = %error.message,
                "Command attempt failed, retrying"
            );
            tokio::time::sleep(self.retry.delay).await;
        }
    }
}

#[async_trait]
impl CallControl for CommandClient {
    async fn execute(&self, call_id: &str, command: &Command) -> Result<(), CommandError> {
        let url = self.action_url(call_id, command.name());
        let body = command.body(call_id);

        tracing::debug!(call_id = %call_id, command = command.name(), "Sending command");
        self.send_with_retry(command.name(), || {
            self.client.post(&url).bearer_auth(&self.api_key).json(&body)
        })
        .await?;
        Ok(())
    }

    async fn fetch_recording(&self, recording_id: &str) -> Result<RecordingMetadata, CommandError> {
        let url = format!("{}/recordings/{recording_id}", self.base_url);
        let response = self
            .send_with_retry("fetch_recording", || {
                self.client.get(&url).bearer_auth(&self.api_key)
            })
            .await?;

        let body = response
            .text()
            .await
            .map_err(|e| CommandError::invalid_response(format!("Failed to read response: {e}")))?;
        let envelope: RecordingEnvelope = serde_json::from_str(&body).map_err(|e| {
            CommandError::invalid_response(format!("Failed to parse recording: {e} - body: {body}"))
        })?;
        Ok(envelope.data)
    }
}
