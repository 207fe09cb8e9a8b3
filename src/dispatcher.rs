//! Webhook event routing
//!
//! The webhook answers before any work happens; each event is handled on its
//! own task. Call progress is carried by the event's client state, so no
//! per-call state is kept here.

use crate::aggregator::RecordingAggregator;
use crate::client_state::{decode, ClientState};
use crate::engine::{ConversationEngine, EngineError, TranscriptOutcome};
use crate::services::{AnswerValidator, ConversationStore, Mailer, ObjectStore};
use crate::telephony::{CallControl, CallEvent, EventKind};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Accepts webhook events without waiting for them to be handled
pub trait EventSink: Send + Sync {
    fn submit(&self, event: CallEvent);
}

pub struct EventDispatcher<S, C, V, O, M> {
    engine: Arc<ConversationEngine<S, C, V>>,
    aggregator: Arc<RecordingAggregator<S, O, M>>,
    default_ruleset: String,
}

impl<S, C, V, O, M> Clone for EventDispatcher<S, C, V, O, M> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            aggregator: Arc::clone(&self.aggregator),
            default_ruleset: self.default_ruleset.clone(),
        }
    }
}

impl<S, C, V, O, M> EventDispatcher<S, C, V, O, M>
where
    S: ConversationStore + 'static,
    C: CallControl + 'static,
    V: AnswerValidator + 'static,
    O: ObjectStore + 'static,
    M: Mailer + 'static,
{
    pub fn new(
        engine: Arc<ConversationEngine<S, C, V>>,
        aggregator: Arc<RecordingAggregator<S, O, M>>,
        default_ruleset: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            aggregator,
            default_ruleset: default_ruleset.into(),
        }
    }

    /// Route an event in the background and return immediately
    pub fn handle(&self, event: CallEvent) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let call_id = event.call_id().to_string();
            if let Err(e) = dispatcher.route(&event).await {
                tracing::error!(
                    call_id = %call_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Event handling failed"
                );
            }
        })
    }

    async fn route(&self, event: &CallEvent) -> Result<(), EngineError> {
        let call_id = event.call_id();
        tracing::info!(
            call_id = %call_id,
            event_type = %event.event_type,
            event_id = %event.id,
            occurred_at = event.occurred_at.as_deref().unwrap_or_default(),
            "Webhook event"
        );

        match event.kind() {
            EventKind::Initiated => self.engine.answer(call_id, &self.default_ruleset),
            EventKind::Answered => {
                let Some(token) = self.token_or_hang_up(event) else {
                    return Ok(());
                };
                self.engine
                    .start_conversation(&token.ruleset_id, call_id)
                    .await
            }
            EventKind::Transcription => self.on_transcription(event).await,
            EventKind::SpeakStarted | EventKind::PlaybackStarted => {
                let Some(token) = self.token_or_hang_up(event) else {
                    return Ok(());
                };
                self.engine.suspend(call_id, &token)
            }
            EventKind::SpeakEnded | EventKind::PlaybackEnded => {
                let Some(token) = self.token_or_hang_up(event) else {
                    return Ok(());
                };
                self.engine.resume(call_id, &token)
            }
            EventKind::RecordingSaved => {
                let Some(token) = self.token_or_hang_up(event) else {
                    return Ok(());
                };
                self.engine
                    .record_saved(
                        call_id,
                        event.payload.recording_urls.as_ref(),
                        event.payload.recording_id.as_deref(),
                        &token,
                    )
                    .await
            }
            EventKind::RecordingError => {
                tracing::warn!(
                    call_id = %call_id,
                    reason = event.payload.reason.as_deref().unwrap_or("unknown"),
                    "Recording failed"
                );
                Ok(())
            }
            EventKind::Hangup => {
                self.on_hangup(event).await;
                Ok(())
            }
            EventKind::Unknown(kind) => {
                tracing::debug!(call_id = %call_id, event_type = %kind, "Ignoring event");
                Ok(())
            }
        }
    }

    async fn on_transcription(&self, event: &CallEvent) -> Result<(), EngineError> {
        let call_id = event.call_id();
        let Some(data) = &event.payload.transcription_data else {
            tracing::warn!(call_id = %call_id, "Transcription event without transcript");
            return Ok(());
        };
        if data.is_interim() {
            tracing::debug!(call_id = %call_id, "Ignoring interim transcript");
            return Ok(());
        }
        if data.transcript.trim().is_empty() {
            tracing::debug!(call_id = %call_id, "Ignoring empty transcript");
            return Ok(());
        }

        let Some(token) = self.token_or_hang_up(event) else {
            return Ok(());
        };

        tracing::info!(
            call_id = %call_id,
            step = token.current_step,
            confidence = data.confidence,
            "Transcript received"
        );
        let outcome = self
            .engine
            .process_transcription(call_id, &data.transcript, &token)
            .await?;

        if let TranscriptOutcome::Advanced { step, answer } = outcome {
            if let Err(e) = answer.await {
                tracing::error!(call_id = %call_id, step, error = %e, "Answer task failed");
            }
        }
        Ok(())
    }

    /// The call is gone: close the conversation and deliver what it produced
    async fn on_hangup(&self, event: &CallEvent) {
        let call_id = event.call_id();
        let token = match decode(event.payload.client_state()) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!(
                    call_id = %call_id,
                    error = %e,
                    "Undecodable client state on hangup, using persisted conversation"
                );
                None
            }
        };

        let ending = match self.engine.end_conversation(call_id, token.as_ref()).await {
            Ok(ending) => ending,
            Err(e) => {
                tracing::warn!(call_id = %call_id, error = %e, "No conversation to finalize");
                return;
            }
        };

        match self
            .aggregator
            .finalize(&ending.ruleset_id, call_id, ending.expected_recordings)
            .await
        {
            Ok(delivery) => tracing::info!(
                call_id = %call_id,
                recordings = delivery.recordings,
                degraded = delivery.degraded,
                "Conversation finalized"
            ),
            Err(e) => tracing::error!(
                call_id = %call_id,
                error = %e,
                "Delivery failed, conversation kept for manual follow-up"
            ),
        }
    }

    /// Decode the event's client state; the call is hung up when that fails
    fn token_or_hang_up(&self, event: &CallEvent) -> Option<ClientState> {
        let raw = event.payload.client_state();
        match decode(raw) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!(
                    call_id = %event.call_id(),
                    event_type = %event.event_type,
                    error = %e,
                    "Undecodable client state, hanging up"
                );
                self.engine.abandon(event.call_id(), raw);
                None
            }
        }
    }
}

impl<S, C, V, O, M> EventSink for EventDispatcher<S, C, V, O, M>
where
    S: ConversationStore + 'static,
    C: CallControl + 'static,
    V: AnswerValidator + 'static,
    O: ObjectStore + 'static,
    M: Mailer + 'static,
{
    fn submit(&self, event: CallEvent) {
        self.handle(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AggregatorSettings, SpeechSettings};
    use crate::models::{ClientInfo, Ruleset, Step};
    use crate::services::DatabaseStore;
    use crate::testing::{store_with, MockCallControl, MockMailer, MockObjectStore, MockValidator};
    use serde_json::json;

    const CALL: &str = "v3:e2e-call";

    type TestDispatcher =
        EventDispatcher<DatabaseStore, MockCallControl, MockValidator, MockObjectStore, MockMailer>;

    struct Harness {
        dispatcher: TestDispatcher,
        store: Arc<DatabaseStore>,
        control: Arc<MockCallControl>,
        objects: Arc<MockObjectStore>,
        mailer: Arc<MockMailer>,
    }

    fn intake() -> Ruleset {
        Ruleset {
            id: "intake".to_string(),
            title: "Intake".to_string(),
            simple: true,
            client: Some(ClientInfo {
                name: "Acme".to_string(),
                email: "ops@acme.test".to_string(),
            }),
            steps: vec![
                Step::new("Wat is uw naam?", "name"),
                Step::new("Wat is uw adres?", "address"),
                Step::new("Klopt dit?", "confirm"),
            ],
        }
    }

    fn harness() -> Harness {
        let store = store_with(&[intake()]);
        let control = Arc::new(MockCallControl::new());
        let objects = Arc::new(MockObjectStore::new());
        let mailer = Arc::new(MockMailer::new());
        let engine = Arc::new(ConversationEngine::new(
            Arc::clone(&store),
            Arc::clone(&control),
            Arc::new(MockValidator::echo()),
            SpeechSettings::default(),
        ));
        let aggregator = Arc::new(RecordingAggregator::new(
            Arc::clone(&store),
            Arc::clone(&objects),
            Arc::clone(&mailer),
            AggregatorSettings::default(),
            None,
        ));
        Harness {
            dispatcher: EventDispatcher::new(engine, aggregator, "intake"),
            store,
            control,
            objects,
            mailer,
        }
    }

    fn event(event_type: &str, state: &str) -> CallEvent {
        serde_json::from_value(json!({
            "event_type": event_type,
            "payload": {"call_control_id": CALL, "client_state": state}
        }))
        .unwrap()
    }

    fn transcription(state: &str, text: &str, is_final: bool) -> CallEvent {
        serde_json::from_value(json!({
            "event_type": "call.transcription",
            "payload": {
                "call_control_id": CALL,
                "client_state": state,
                "transcription_data": {"confidence": 0.93, "is_final": is_final, "transcript": text}
            }
        }))
        .unwrap()
    }

    fn recording_saved(state: &str, url: &str) -> CallEvent {
        serde_json::from_value(json!({
            "event_type": "call.recording.saved",
            "payload": {
                "call_control_id": CALL,
                "client_state": state,
                "recording_urls": {"mp3": url}
            }
        }))
        .unwrap()
    }

    fn state_of(control: &MockCallControl, name: &str, index: usize) -> String {
        control.sent_named(name)[index].client_state.clone()
    }

    #[tokio::test]
    async fn test_scripted_call_end_to_end() {
        let h = harness();
        let d = &h.dispatcher;

        d.handle(event("call.initiated", "")).await.unwrap();
        h.control.wait_for("answer", 1).await;
        d.handle(event("call.answered", &state_of(&h.control, "answer", 0)))
            .await
            .unwrap();
        h.control.wait_for("speak", 1).await;

        for (i, answer) in ["Jan", "Kerkstraat 1", "yes"].into_iter().enumerate() {
            let prompt = state_of(&h.control, "speak", i);
            d.handle(event("call.speak.started", &prompt)).await.unwrap();
            if i > 0 {
                // The previous answer's recording stops with this prompt
                h.control.wait_for("record_stop", i).await;
                let url = format!("https://rec.test/{i}.mp3");
                h.objects.put(&url, answer.as_bytes());
                d.handle(recording_saved(&prompt, &url)).await.unwrap();
            }
            d.handle(event("call.speak.ended", &prompt)).await.unwrap();
            h.control.wait_for("record_start", i + 1).await;

            let listening = state_of(&h.control, "record_start", i);
            d.handle(transcription(&listening, answer, true)).await.unwrap();
            h.control.wait_for("speak", i + 2).await;
        }

        let closing = state_of(&h.control, "speak", 3);
        d.handle(event("call.speak.started", &closing)).await.unwrap();
        h.control.wait_for("record_stop", 3).await;
        h.objects.put("https://rec.test/3.mp3", b"yes");
        d.handle(recording_saved(&closing, "https://rec.test/3.mp3"))
            .await
            .unwrap();
        d.handle(event("call.speak.ended", &closing)).await.unwrap();
        h.control.wait_for("hangup", 1).await;

        let conversation = h.store.get_conversation(CALL).await.unwrap();
        assert_eq!(conversation.responses.len(), 3);
        assert_eq!(conversation.responses["name"], "Jan");
        assert_eq!(conversation.responses["address"], "Kerkstraat 1");
        assert_eq!(conversation.responses["confirm"], "yes");
        let purposes: Vec<&str> = conversation
            .recordings
            .iter()
            .map(|r| r.purpose.as_str())
            .collect();
        assert_eq!(purposes, vec!["name", "address", "confirm"]);

        d.handle(event("call.hangup", &state_of(&h.control, "hangup", 0)))
            .await
            .unwrap();

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        let mail = &sent[0];
        for pair in ["<td>name</td><td>Jan</td>", "<td>address</td><td>Kerkstraat 1</td>", "<td>confirm</td><td>yes</td>"] {
            assert!(mail.html.contains(pair), "missing {pair} in {}", mail.html);
        }
        assert!(mail.html.contains(CALL));
        assert_eq!(mail.attachments.len(), 3);
        assert!(h.store.get_conversation(CALL).await.is_err());
    }

    #[tokio::test]
    async fn test_initiated_call_is_answered_with_default_ruleset() {
        let h = harness();
        h.dispatcher.handle(event("call.initiated", "")).await.unwrap();
        h.control.wait_for("answer", 1).await;

        let token = decode(&state_of(&h.control, "answer", 0)).unwrap();
        assert_eq!(token, ClientState::opening("intake"));
    }

    #[tokio::test]
    async fn test_undecodable_state_hangs_up() {
        let h = harness();
        h.dispatcher
            .handle(event("call.answered", "%%not-base64%%"))
            .await
            .unwrap();
        h.control.wait_for("hangup", 1).await;

        assert_eq!(h.control.names(), vec!["hangup"]);
        assert_eq!(state_of(&h.control, "hangup", 0), "%%not-base64%%");
        assert!(h.store.get_conversation(CALL).await.is_err());
    }

    #[tokio::test]
    async fn test_interim_transcript_is_ignored() {
        let h = harness();
        let token = crate::client_state::encode(
            &ClientState::opening("intake").advance_to(0, "name", 3),
        )
        .unwrap();

        h.dispatcher
            .handle(transcription(&token, "Ja", false))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(h.control.sent().is_empty());
    }

    #[tokio::test]
    async fn test_recording_error_and_unknown_events_send_nothing() {
        let h = harness();
        h.dispatcher
            .handle(event("call.recording.error", "garbage"))
            .await
            .unwrap();
        h.dispatcher
            .handle(event("call.machine.detection.ended", ""))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(h.control.sent().is_empty());
    }

    #[tokio::test]
    async fn test_hangup_with_bad_state_uses_persisted_conversation() {
        let h = harness();
        h.store.create_conversation(CALL, "intake").await.unwrap();
        h.store.add_response(CALL, "name", "Jan").await.unwrap();

        h.dispatcher.handle(event("call.hangup", "")).await.unwrap();

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].html.contains("<td>Jan</td>"));
        assert!(sent[0].attachments.is_empty());
        assert!(h.store.get_conversation(CALL).await.is_err());
    }

    #[tokio::test]
    async fn test_hangup_before_answer_delivers_nothing() {
        let h = harness();
        h.dispatcher.handle(event("call.hangup", "")).await.unwrap();
        assert!(h.mailer.sent().is_empty());
    }
}
