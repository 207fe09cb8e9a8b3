//! Command error types

use thiserror::Error;

/// Outbound command failure with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CommandError {
    pub kind: CommandErrorKind,
    pub message: String,
    /// Attempts made before giving up
    pub attempts: u32,
}

impl CommandError {
    pub fn new(kind: CommandErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: 1,
        }
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(CommandErrorKind::Transport, message)
    }

    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::new(CommandErrorKind::ServerError(status), message)
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::new(CommandErrorKind::Rejected(status), message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(CommandErrorKind::InvalidResponse, message)
    }

    pub fn dropped(message: impl Into<String>) -> Self {
        Self::new(CommandErrorKind::Dropped, message)
    }

    /// Build from a non-success HTTP status
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            500..=599 => Self::server_error(status, format!("Server error {status}: {body}")),
            _ => Self::rejected(status, format!("Rejected with {status}: {body}")),
        }
    }
}

/// Error classification for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorKind {
    /// Connection failures, timeouts - retryable
    Transport,
    /// 5xx from the platform - retryable
    ServerError(u16),
    /// 4xx from the platform - not retryable
    Rejected(u16),
    /// Response body could not be read or parsed
    InvalidResponse,
    /// The dispatching task went away before reporting
    Dropped,
}

impl CommandErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transport | Self::ServerError(_))
    }
}
