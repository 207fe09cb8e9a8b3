//! Step sequencing for one call
//!
//! All progress lives in the [`ClientState`] echoed back by the platform, so
//! every operation takes the token the triggering event carried and attaches
//! a successor token to the commands it sends.

use crate::client_state::{encode, ClientState, CodecError};
use crate::config::SpeechSettings;
use crate::models::{Recording, Ruleset, Step};
use crate::services::{AnswerValidator, ConversationStore, DatabaseStore};
use crate::telephony::{
    self, Action, CallControl, ChannelMode, Command, CommandClient, CommandError,
    RecordingFormat, RecordingUrls,
};
use crate::validator::LlmAnswerValidator;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("recording event carries neither a download URL nor a known recording id")]
    MissingRecording,
}

/// What a transcript led to
#[derive(Debug)]
pub enum TranscriptOutcome {
    /// The script was already over; the call is being hung up
    Ended,
    /// The next prompt was sent; `answer` resolves once the answer is stored
    Advanced { step: usize, answer: JoinHandle<()> },
}

/// What the aggregator needs once a call is over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ending {
    pub ruleset_id: String,
    pub expected_recordings: usize,
}

/// Engine wired to the production collaborators
pub type ProductionEngine = ConversationEngine<DatabaseStore, CommandClient, LlmAnswerValidator>;

pub struct ConversationEngine<S, C, V> {
    store: Arc<S>,
    control: Arc<C>,
    validator: Arc<V>,
    speech: SpeechSettings,
}

impl<S, C, V> ConversationEngine<S, C, V>
where
    S: ConversationStore + 'static,
    C: CallControl + 'static,
    V: AnswerValidator + 'static,
{
    pub fn new(store: Arc<S>, control: Arc<C>, validator: Arc<V>, speech: SpeechSettings) -> Self {
        Self {
            store,
            control,
            validator,
            speech,
        }
    }

    /// Pick up the call, tagging it with the ruleset it will follow
    pub fn answer(&self, call_id: &str, ruleset_id: &str) -> Result<(), EngineError> {
        let state = encode(&ClientState::opening(ruleset_id))?;
        tracing::info!(call_id = %call_id, ruleset_id = %ruleset_id, "Answering call");
        telephony::send(
            Arc::clone(&self.control),
            call_id,
            Command::new(
                Action::Answer {
                    send_silence_when_idle: true,
                },
                state,
            ),
        );
        Ok(())
    }

    /// Create the conversation and send the first step
    pub async fn start_conversation(&self, ruleset_id: &str, call_id: &str) -> Result<(), EngineError> {
        let ruleset = self.load_ruleset(ruleset_id).await?;
        self.store
            .create_conversation(call_id, ruleset_id)
            .await
            .map_err(EngineError::Store)?;

        let opening = ClientState::opening(ruleset_id);
        let Some(first) = ruleset.step(0) else {
            tracing::warn!(call_id = %call_id, ruleset_id = %ruleset_id, "Ruleset has no steps");
            return self.hang_up(call_id, &opening);
        };

        let token = opening.advance_to(0, &first.purpose, ruleset.steps.len());
        tracing::info!(call_id = %call_id, ruleset_id = %ruleset_id, "Conversation started");
        self.broadcast(call_id, self.prompt(first), &token)
    }

    /// Store the answer to the current step and send the next one
    pub async fn process_transcription(
        &self,
        call_id: &str,
        transcript: &str,
        token: &ClientState,
    ) -> Result<TranscriptOutcome, EngineError> {
        let ruleset = self.load_ruleset(&token.ruleset_id).await?;
        let index = token.current_step;

        let Some(step) = ruleset.step(index) else {
            tracing::info!(call_id = %call_id, step = index, "Transcript after the script ended");
            self.hang_up(call_id, token)?;
            return Ok(TranscriptOutcome::Ended);
        };

        let answer = self.store_answer(call_id, step, transcript);

        let total = ruleset.steps.len();
        let next_index = index + 1;
        let (action, next) = match ruleset.step(next_index) {
            Some(next_step) if ruleset.simple => (
                self.prompt(next_step),
                token.advance_to(next_index, &next_step.purpose, total),
            ),
            _ => {
                if !ruleset.simple {
                    tracing::warn!(
                        call_id = %call_id,
                        ruleset_id = %ruleset.id,
                        "Ruleset is not simple, ending with the closing remark"
                    );
                }
                (self.closing(), token.advance_to(total.max(next_index), "", total))
            }
        };

        tracing::info!(
            call_id = %call_id,
            from_step = index,
            to_step = next.current_step,
            purpose = %next.purpose,
            "Advancing conversation"
        );
        self.broadcast(call_id, action, &next)?;

        Ok(TranscriptOutcome::Advanced {
            step: next.current_step,
            answer,
        })
    }

    /// Stop listening while the platform speaks
    pub fn suspend(&self, call_id: &str, token: &ClientState) -> Result<(), EngineError> {
        if token.recording_count == 0 {
            tracing::debug!(call_id = %call_id, "Nothing to suspend before the first answer");
            return Ok(());
        }

        let state = encode(token)?;
        telephony::send(
            Arc::clone(&self.control),
            call_id,
            Command::new(Action::StopTranscription, state.clone()),
        );
        telephony::send(
            Arc::clone(&self.control),
            call_id,
            Command::new(Action::StopRecording, state),
        );
        Ok(())
    }

    /// Listen for the answer to the prompt that just ended, or hang up after the last one
    pub fn resume(&self, call_id: &str, token: &ClientState) -> Result<(), EngineError> {
        if token.is_final() {
            tracing::info!(call_id = %call_id, "Script complete, hanging up");
            return self.hang_up(call_id, token);
        }

        let state = encode(&token.with_recording_started())?;
        telephony::send(
            Arc::clone(&self.control),
            call_id,
            Command::new(
                Action::StartTranscription {
                    language: self.speech.transcription_language.clone(),
                    engine: self.speech.transcription_engine.clone(),
                },
                state.clone(),
            ),
        );
        telephony::send(
            Arc::clone(&self.control),
            call_id,
            Command::new(
                Action::StartRecording {
                    format: RecordingFormat::Mp3,
                    channels: ChannelMode::Single,
                    trim_silence: true,
                },
                state,
            ),
        );
        Ok(())
    }

    /// Attribute a saved recording and converge the token's recording purpose
    pub async fn record_saved(
        &self,
        call_id: &str,
        urls: Option<&RecordingUrls>,
        recording_id: Option<&str>,
        token: &ClientState,
    ) -> Result<(), EngineError> {
        let url = match urls.and_then(|u| u.mp3.clone()).filter(|u| !u.is_empty()) {
            Some(url) => url,
            None => {
                let id = recording_id.ok_or(EngineError::MissingRecording)?;
                let metadata = self.control.fetch_recording(id).await?;
                tracing::debug!(call_id = %call_id, recording_id = %metadata.id, "Recording located by id");
                metadata
                    .download_urls
                    .mp3
                    .ok_or(EngineError::MissingRecording)?
            }
        };

        let recording = Recording {
            url,
            purpose: token.recording_purpose.clone(),
        };
        self.store
            .add_recording(call_id, &recording)
            .await
            .map_err(EngineError::Store)?;
        tracing::info!(call_id = %call_id, purpose = %recording.purpose, "Recording saved");

        if token.recording_lags() {
            let converged = token.with_recording_converged();
            tracing::info!(
                call_id = %call_id,
                recording_purpose = %token.recording_purpose,
                purpose = %token.purpose,
                "Correcting recording purpose"
            );
            telephony::send(
                Arc::clone(&self.control),
                call_id,
                Command::new(Action::UpdateClientState, encode(&converged)?),
            );
        }
        Ok(())
    }

    /// Mark the conversation done and work out what to aggregate.
    ///
    /// Without a usable token the persisted conversation supplies the ruleset
    /// and the recordings already saved are taken as complete.
    pub async fn end_conversation(
        &self,
        call_id: &str,
        token: Option<&ClientState>,
    ) -> Result<Ending, EngineError> {
        self.store.mark_done(call_id).await.map_err(EngineError::Store)?;

        match token {
            Some(token) => Ok(Ending {
                ruleset_id: token.ruleset_id.clone(),
                expected_recordings: token.recording_count,
            }),
            None => {
                let conversation = self
                    .store
                    .get_conversation(call_id)
                    .await
                    .map_err(EngineError::Store)?;
                Ok(Ending {
                    ruleset_id: conversation.ruleset_id,
                    expected_recordings: conversation.recordings.len(),
                })
            }
        }
    }

    pub fn hang_up(&self, call_id: &str, token: &ClientState) -> Result<(), EngineError> {
        let state = encode(token)?;
        self.abandon(call_id, &state);
        Ok(())
    }

    /// Hang up when the call's state is unknown, echoing the raw token
    pub fn abandon(&self, call_id: &str, raw_state: &str) {
        telephony::send(
            Arc::clone(&self.control),
            call_id,
            Command::new(Action::Hangup, raw_state),
        );
    }

    async fn load_ruleset(&self, ruleset_id: &str) -> Result<Ruleset, EngineError> {
        self.store
            .get_ruleset(ruleset_id)
            .await
            .map_err(EngineError::Store)
    }

    fn prompt(&self, step: &Step) -> Action {
        match step.audio_prompt.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => Action::PlayAudio {
                audio_url: url.to_string(),
            },
            None => self.speak(&step.text),
        }
    }

    fn closing(&self) -> Action {
        self.speak(&self.speech.closing_remark)
    }

    fn speak(&self, text: &str) -> Action {
        Action::Speak {
            text: text.to_string(),
            language: self.speech.language.clone(),
            voice: self.speech.voice.clone(),
        }
    }

    /// Send a prompt; if it cannot be delivered the caller would hear nothing more, so hang up
    fn broadcast(&self, call_id: &str, action: Action, token: &ClientState) -> Result<(), EngineError> {
        debug_assert!(action.is_prompt());
        let state = encode(token)?;
        let pending = telephony::send(
            Arc::clone(&self.control),
            call_id,
            Command::new(action, state.clone()),
        );

        let control = Arc::clone(&self.control);
        let call_id = call_id.to_string();
        tokio::spawn(async move {
            let command = pending.name();
            if let Err(e) = pending.outcome().await {
                tracing::warn!(call_id = %call_id, command, error = %e, "Prompt failed, hanging up");
                telephony::send(control, &call_id, Command::new(Action::Hangup, state));
            }
        });
        Ok(())
    }

    /// Validate and store an answer in the background, falling back to the raw transcript
    fn store_answer(&self, call_id: &str, step: &Step, transcript: &str) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let validator = Arc::clone(&self.validator);
        let call_id = call_id.to_string();
        let question = step.text.clone();
        let purpose = step.purpose.clone();
        let raw = transcript.to_string();

        tokio::spawn(async move {
            let answer = match validator.validate(&question, &purpose, &raw).await {
                Ok(answer) => answer,
                Err(e) => {
                    tracing::warn!(
                        call_id = %call_id,
                        purpose = %purpose,
                        error = %e,
                        "Answer validation failed, storing raw transcript"
                    );
                    raw
                }
            };

            if let Err(e) = store.add_response(&call_id, &purpose, &answer).await {
                tracing::error!(call_id = %call_id, purpose = %purpose, error = %e, "Failed to store answer");
            }
        })
    }
}
