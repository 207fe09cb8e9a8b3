//! Call-control platform integration
//!
//! Inbound webhook events, outbound commands and the HTTP client that
//! delivers them.

mod client;
mod command;
mod error;
mod event;

pub use client::CommandClient;
pub use command::{Action, ChannelMode, Command, RecordingFormat};
#[allow(unused_imports)] // Public API re-exports
pub use error::{CommandError, CommandErrorKind};
pub use event::{CallEvent, EventKind, RecordingMetadata, RecordingUrls, WebhookEnvelope};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Outbound side of the call-control platform
#[async_trait]
pub trait CallControl: Send + Sync {
    /// Deliver one command, retrying transient failures
    async fn execute(&self, call_id: &str, command: &Command) -> Result<(), CommandError>;

    /// Look up a recording's metadata by id
    async fn fetch_recording(&self, recording_id: &str) -> Result<RecordingMetadata, CommandError>;
}

#[async_trait]
impl<T: CallControl + ?Sized> CallControl for Arc<T> {
    async fn execute(&self, call_id: &str, command: &Command) -> Result<(), CommandError> {
        (**self).execute(call_id, command).await
    }

    async fn fetch_recording(&self, recording_id: &str) -> Result<RecordingMetadata, CommandError> {
        (**self).fetch_recording(recording_id).await
    }
}

/// Outcome of a command sent in the background.
///
/// Resolves exactly once: either success or the final error after retries.
/// Dropping it without awaiting does not cancel the command.
#[derive(Debug)]
pub struct PendingCommand {
    name: &'static str,
    rx: oneshot::Receiver<Result<(), CommandError>>,
}

impl PendingCommand {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn outcome(self) -> Result<(), CommandError> {
        let name = self.name;
        self.rx
            .await
            .unwrap_or_else(|_| Err(CommandError::dropped(format!("{name} task ended without result"))))
    }
}

/// Send a command without blocking the caller
pub fn send<C>(control: Arc<C>, call_id: &str, command: Command) -> PendingCommand
where
    C: CallControl + ?Sized + 'static,
{
    let (tx, rx) = oneshot::channel();
    let name = command.name();
    let call_id = call_id.to_string();

    tokio::spawn(async move {
        let result = control.execute(&call_id, &command).await;
        match &result {
            Ok(()) => tracing::debug!(call_id = %call_id, command = name, "Command delivered"),
            Err(e) => tracing::error!(
                call_id = %call_id,
                command = name,
                attempts = e.attempts,
                error = %e,
                "Command gave up"
            ),
        }
        let _ = tx.send(result);
    });

    PendingCommand { name, rx }
}
