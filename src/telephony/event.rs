//! Inbound webhook events

use serde::Deserialize;

/// Top-level webhook body
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub data: CallEvent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallEvent {
    pub event_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub occurred_at: Option<String>,
    #[serde(default)]
    pub payload: EventPayload,
}

impl CallEvent {
    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event_type)
    }

    pub fn call_id(&self) -> &str {
        &self.payload.call_control_id
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub call_control_id: String,
    /// Absent on `call.initiated`
    #[serde(default)]
    pub client_state: Option<String>,
    #[serde(default)]
    pub transcription_data: Option<TranscriptionData>,
    #[serde(default)]
    pub recording_urls: Option<RecordingUrls>,
    #[serde(default)]
    pub recording_id: Option<String>,
    /// Failure reason on `call.recording.error`
    #[serde(default)]
    pub reason: Option<String>,
}

impl EventPayload {
    pub fn client_state(&self) -> &str {
        self.client_state.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionData {
    #[serde(default)]
    pub confidence: f64,
    /// Interim results are only sent when explicitly requested
    #[serde(default)]
    pub is_final: Option<bool>,
    #[serde(default)]
    pub transcript: String,
}

impl TranscriptionData {
    pub fn is_interim(&self) -> bool {
        self.is_final == Some(false)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordingUrls {
    #[serde(default)]
    pub mp3: Option<String>,
}

/// Event type discriminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Initiated,
    Answered,
    Transcription,
    SpeakStarted,
    SpeakEnded,
    PlaybackStarted,
    PlaybackEnded,
    RecordingSaved,
    RecordingError,
    Hangup,
    Unknown(String),
}

impl EventKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "call.initiated" => Self::Initiated,
            "call.answered" => Self::Answered,
            "call.transcription" => Self::Transcription,
            "call.speak.started" => Self::SpeakStarted,
            "call.speak.ended" => Self::SpeakEnded,
            "call.playback.started" => Self::PlaybackStarted,
            "call.playback.ended" => Self::PlaybackEnded,
            "call.recording.saved" => Self::RecordingSaved,
            "call.recording.error" => Self::RecordingError,
            "call.hangup" => Self::Hangup,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Response of the recording metadata lookup
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingEnvelope {
    pub data: RecordingMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    #[serde(default)]
    pub download_urls: RecordingUrls,
}
