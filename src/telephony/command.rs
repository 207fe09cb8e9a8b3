//! Outbound call-control commands
//!
//! Every command kind has its own payload shape; all of them carry the
//! encoded client state and a deterministic command id so the platform can
//! drop duplicates of a retried or re-delivered command.

use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Bumped whenever the id inputs change meaning
pub const COMMAND_SCHEMA_VERSION: &str = "v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingFormat {
    Mp3,
}

impl RecordingFormat {
    fn as_str(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Single,
}

impl ChannelMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
        }
    }
}

/// Logical call-control action and its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Answer {
        send_silence_when_idle: bool,
    },
    Speak {
        text: String,
        language: String,
        voice: String,
    },
    PlayAudio {
        audio_url: String,
    },
    StartTranscription {
        language: String,
        engine: String,
    },
    StopTranscription,
    StartRecording {
        format: RecordingFormat,
        channels: ChannelMode,
        trim_silence: bool,
    },
    StopRecording,
    /// Replace the client state without any other effect
    UpdateClientState,
    Hangup,
}

impl Action {
    /// Platform action name, also part of the command id
    pub fn name(&self) -> &'static str {
        match self {
            Self::Answer { .. } => "answer",
            Self::Speak { .. } => "speak",
            Self::PlayAudio { .. } => "playback_start",
            Self::StartTranscription { .. } => "transcription_start",
            Self::StopTranscription => "transcription_stop",
            Self::StartRecording { .. } => "record_start",
            Self::StopRecording => "record_stop",
            Self::UpdateClientState => "client_state_update",
            Self::Hangup => "hangup",
        }
    }

    /// Speech or playback heard by the caller
    pub fn is_prompt(&self) -> bool {
        matches!(self, Self::Speak { .. } | Self::PlayAudio { .. })
    }

    fn payload(&self) -> Map<String, Value> {
        let value = match self {
            Self::Answer {
                send_silence_when_idle,
            } => json!({ "send_silence_when_idle": send_silence_when_idle }),
            Self::Speak {
                text,
                language,
                voice,
            } => json!({
                "payload": text,
                "payload_type": "text",
                "language": language,
                "voice": voice,
            }),
            Self::PlayAudio { audio_url } => json!({ "audio_url": audio_url }),
            Self::StartTranscription { language, engine } => json!({
                "language": language,
                "transcription_engine": engine,
            }),
            Self::StartRecording {
                format,
                channels,
                trim_silence,
            } => {
                let mut body = json!({
                    "format": format.as_str(),
                    "channels": channels.as_str(),
                });
                if *trim_silence {
                    body["trim"] = json!("trim-silence");
                }
                body
            }
            Self::StopTranscription
            | Self::StopRecording
            | Self::UpdateClientState
            | Self::Hangup => json!({}),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// An action bound to the client state it should leave on the call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub action: Action,
    pub client_state: String,
}

impl Command {
    pub fn new(action: Action, client_state: impl Into<String>) -> Self {
        Self {
            action,
            client_state: client_state.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.action.name()
    }

    pub fn id(&self, call_id: &str) -> String {
        command_id(call_id, self.name(), &self.client_state)
    }

    /// JSON body posted to the platform
    pub fn body(&self, call_id: &str) -> Value {
        let mut body = self.action.payload();
        body.insert("client_state".to_string(), json!(self.client_state));
        body.insert("command_id".to_string(), json!(self.id(call_id)));
        Value::Object(body)
    }
}

/// Deterministic id for a logical command
pub fn command_id(call_id: &str, name: &str, client_state: &str) -> String {
    // Length prefixes keep ("ab", "c") and ("a", "bc") apart
    let material = format!(
        "{}:{call_id}|{}:{name}|{}:{client_state}|{COMMAND_SCHEMA_VERSION}",
        call_id.len(),
        name.len(),
        client_state.len(),
    );
    Uuid::new_v5(&Uuid::nil(), material.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_command_id_is_deterministic(
            call in "[a-z0-9:-]{1,32}",
            name in "[a-z_]{1,20}",
            state in "[A-Za-z0-9+/=]{0,40}",
        ) {
            prop_assert_eq!(command_id(&call, &name, &state), command_id(&call, &name, &state));
        }

        #[test]
        fn prop_command_id_changes_with_any_input(
            call in "[a-z0-9]{1,16}",
            name in "[a-z_]{1,16}",
            state in "[A-Za-z0-9]{0,24}",
        ) {
            let id = command_id(&call, &name, &state);
            prop_assert_ne!(&id, &command_id(&format!("{call}x"), &name, &state));
            prop_assert_ne!(&id, &command_id(&call, &format!("{name}x"), &state));
            prop_assert_ne!(&id, &command_id(&call, &name, &format!("{state}x")));
        }
    }

    #[test]
    fn test_boundary_shift_gives_distinct_ids() {
        assert_ne!(command_id("ab", "c", ""), command_id("a", "bc", ""));
        assert_ne!(command_id("a", "b", "c"), command_id("a", "", "bc"));
    }

    #[test]
    fn test_speak_body_carries_state_and_id() {
        let command = Command::new(
            Action::Speak {
                text: "Wat is uw naam?".to_string(),
                language: "nl-NL".to_string(),
                voice: "male".to_string(),
            },
            "c3RhdGU=",
        );
        let body = command.body("call-1");
        assert_eq!(body["payload"], "Wat is uw naam?");
        assert_eq!(body["language"], "nl-NL");
        assert_eq!(body["client_state"], "c3RhdGU=");
        assert_eq!(body["command_id"], command_id("call-1", "speak", "c3RhdGU="));
    }

    #[test]
    fn test_recording_body() {
        let command = Command::new(
            Action::StartRecording {
                format: RecordingFormat::Mp3,
                channels: ChannelMode::Single,
                trim_silence: true,
            },
            "",
        );
        let body = command.body("call-1");
        assert_eq!(body["format"], "mp3");
        assert_eq!(body["channels"], "single");
        assert_eq!(body["trim"], "trim-silence");
    }

    #[test]
    fn test_hangup_body_has_only_correlation_fields() {
        let body = Command::new(Action::Hangup, "s").body("call-1");
        let keys: Vec<&String> = body.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_prompt_actions() {
        assert!(Action::PlayAudio {
            audio_url: "u".to_string()
        }
        .is_prompt());
        assert!(!Action::Hangup.is_prompt());
        assert_eq!(Action::UpdateClientState.name(), "client_state_update");
    }
}
