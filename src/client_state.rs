//! Correlation token carried through the call-control platform
//!
//! The platform keeps no application state between webhook deliveries; it
//! echoes back whatever `client_state` was last attached to a command. The
//! token therefore holds everything needed to resume a call.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("client state is empty")]
    Empty,
    #[error("client state is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("client state is not a valid token: {0}")]
    Json(#[from] serde_json::Error),
}

/// Progress of a call, round-tripped as an opaque string
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    pub ruleset_id: String,
    /// Index of the step most recently sent to the caller; never decreases
    pub current_step: usize,
    /// Purpose of the step most recently sent to the caller
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub total_steps: usize,
    /// Recordings started so far on this call
    #[serde(default)]
    pub recording_count: usize,
    /// Purpose the running recording is attributed to; may lag `purpose` by one step
    #[serde(default)]
    pub recording_purpose: String,
}

impl ClientState {
    /// Token attached when answering a call, before any step was sent
    pub fn opening(ruleset_id: impl Into<String>) -> Self {
        Self {
            ruleset_id: ruleset_id.into(),
            ..Self::default()
        }
    }

    /// Token for the step at `index`, keeping the recording bookkeeping
    #[must_use]
    pub fn advance_to(&self, index: usize, purpose: impl Into<String>, total_steps: usize) -> Self {
        Self {
            ruleset_id: self.ruleset_id.clone(),
            current_step: index.max(self.current_step),
            purpose: purpose.into(),
            total_steps,
            recording_count: self.recording_count,
            recording_purpose: self.recording_purpose.clone(),
        }
    }

    /// Token attached to a new recording of the current step
    #[must_use]
    pub fn with_recording_started(&self) -> Self {
        Self {
            recording_count: self.recording_count + 1,
            recording_purpose: self.purpose.clone(),
            ..self.clone()
        }
    }

    /// The recording purpose trails the step purpose
    pub fn recording_lags(&self) -> bool {
        self.recording_purpose != self.purpose
    }

    #[must_use]
    pub fn with_recording_converged(&self) -> Self {
        Self {
            recording_purpose: self.purpose.clone(),
            ..self.clone()
        }
    }

    /// Every scripted step has been sent
    pub fn is_final(&self) -> bool {
        self.total_steps > 0 && self.current_step >= self.total_steps
    }
}

pub fn encode(state: &ClientState) -> Result<String, CodecError> {
    let json = serde_json::to_vec(state)?;
    Ok(STANDARD.encode(json))
}

pub fn decode(raw: &str) -> Result<ClientState, CodecError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CodecError::Empty);
    }
    let bytes = STANDARD.decode(raw)?;
    Ok(serde_json::from_slice(&bytes)?)
}
