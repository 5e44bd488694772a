//! # Relay Pipeline
//!
//! Wires inbound session events to the voice pipeline:
//! buffer → segment → transcribe → respond → synthesize → emit.
//!
//! ## Operating modes:
//! The same pipeline serves two modes, selected by message type:
//! - **chunked**: `audio_chunk` events stream into the segmenter until an
//!   `audio_end` drains the utterance
//! - **atomic**: `complete_audio` carries the whole recording in one message
//!   and skips chunked buffering and voice-activity scoring
//!
//! ## Failure policy:
//! Expected-empty outcomes (nothing captured, nothing recognized) surface as
//! one typed `error` message each. Collaborator failures are caught here,
//! logged with cause, and surfaced as one generic error message. Nothing in
//! this module may crash a session or the registry; a transport that closed
//! mid-run abandons the in-flight result silently.

use crate::protocol::ServerMessage;
use crate::services::{Responder, Synthesizer, Transcriber};
use crate::session::history::{Role, CONTEXT_TURNS};
use crate::session::registry::ConnectionRegistry;
use crate::session::Session;
use crate::state::AppState;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// User-visible message when a flush finds no usable audio.
const NO_AUDIO_MESSAGE: &str = "No audio captured";

/// User-visible message when the transcriber hears nothing in the audio.
const NOT_RECOGNIZED_MESSAGE: &str = "Speech not recognized";

/// User-visible message for any unexpected pipeline failure.
const GENERIC_FAILURE_MESSAGE: &str = "Audio processing failed, please try again";

/// The pipeline driver. Constructed once at startup with its collaborators
/// injected, so tests substitute doubles for any of them.
pub struct RelayPipeline {
    registry: Arc<ConnectionRegistry>,
    transcriber: Arc<dyn Transcriber>,
    responder: Arc<dyn Responder>,
    synthesizer: Arc<dyn Synthesizer>,
    state: AppState,
}

impl RelayPipeline {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        transcriber: Arc<dyn Transcriber>,
        responder: Arc<dyn Responder>,
        synthesizer: Arc<dyn Synthesizer>,
        state: AppState,
    ) -> Self {
        Self {
            registry,
            transcriber,
            responder,
            synthesizer,
            state,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle one inbound audio chunk (chunked mode).
    ///
    /// ## What this does:
    /// Enters Recording on the first chunk of an utterance, feeds the chunk
    /// to the segmenter, and notifies the client while speech is active.
    /// A malformed chunk is logged and dropped; the connection stays open.
    pub fn handle_chunk(&self, session_id: &str, pcm: &[u8]) {
        let session = match self.registry.lookup(session_id) {
            Ok(session) => session,
            Err(_) => return, // disconnect race
        };

        if session.enter_recording() {
            debug!(session_id = %session_id, "Recording started");
        }
        session.touch_activity();

        match session.submit_chunk(pcm) {
            Ok(true) => {
                let _ = self.registry.send(session_id, &ServerMessage::listening());
            }
            Ok(false) => {}
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "Dropping malformed audio chunk");
            }
        }

        if session.end_of_utterance() {
            debug!(session_id = %session_id, "Silence threshold reached, waiting for audio_end");
        }
    }

    /// Handle the end of a chunked recording: drain and run the pipeline.
    ///
    /// ## Expected-empty outcomes:
    /// An utterance with no frames, or one in which no frame was classified
    /// as speech, produces exactly one user-visible error and no
    /// transcription call.
    pub async fn handle_audio_end(&self, session_id: &str) {
        let session = match self.registry.lookup(session_id) {
            Ok(session) => session,
            Err(_) => return,
        };

        if let Err(err) = session.begin_flush() {
            warn!(session_id = %session_id, error = %err, "Ignoring audio_end");
            return;
        }
        self.registry.set_recording(session_id, false);

        let utterance = session.drain_utterance();
        if utterance.is_empty() || !utterance.had_speech {
            debug!(session_id = %session_id, "Flush without usable audio");
            self.send_user_error(session_id, NO_AUDIO_MESSAGE);
        } else {
            self.run_pipeline(&session, utterance.pcm).await;
        }

        session.finish_flush();
    }

    /// Handle a single-shot recording (atomic mode).
    ///
    /// ## What this does:
    /// Runs the same pipeline as `handle_audio_end` on the supplied PCM,
    /// without chunked buffering or voice-activity scoring.
    pub async fn handle_complete_audio(&self, session_id: &str, pcm: Vec<u8>) {
        let session = match self.registry.lookup(session_id) {
            Ok(session) => session,
            Err(_) => return,
        };

        if let Err(err) = session.begin_flush() {
            warn!(session_id = %session_id, error = %err, "Ignoring complete_audio");
            return;
        }

        if pcm.is_empty() {
            self.send_user_error(session_id, NO_AUDIO_MESSAGE);
        } else {
            self.run_pipeline(&session, pcm).await;
        }

        session.finish_flush();
    }

    /// Forget the session's conversation so far.
    pub fn handle_clear_history(&self, session_id: &str) {
        let session = match self.registry.lookup(session_id) {
            Ok(session) => session,
            Err(_) => return,
        };

        session.clear_history();
        info!(session_id = %session_id, "Conversation history cleared");
        let _ = self
            .registry
            .send(session_id, &ServerMessage::HistoryCleared {});
    }

    /// The transcribe → respond → synthesize → emit sequence for one
    /// drained utterance.
    async fn run_pipeline(&self, session: &Arc<Session>, pcm: Vec<u8>) {
        let id = session.id.clone();
        self.state.record_pipeline_run();
        info!(session_id = %id, audio_bytes = pcm.len(), "Running voice pipeline");

        let text = match self.transcriber.transcribe(&pcm).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                debug!(session_id = %id, "No speech recognized in utterance");
                self.send_user_error(&id, NOT_RECOGNIZED_MESSAGE);
                return;
            }
            Err(err) => {
                error!(session_id = %id, error = %err, "Transcription failed");
                self.state.record_pipeline_failure();
                self.send_user_error(&id, GENERIC_FAILURE_MESSAGE);
                return;
            }
        };

        if self
            .registry
            .send(&id, &ServerMessage::Transcription { text: text.clone() })
            .is_err()
        {
            // Transport closed mid-run: abandon the result silently.
            return;
        }

        session.push_turn(Role::User, text.clone());
        let context = session.recent_history(CONTEXT_TURNS);

        let reply = match self.responder.respond(&text, &context).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(session_id = %id, error = %err, "Response generation failed");
                self.state.record_pipeline_failure();
                self.send_user_error(&id, GENERIC_FAILURE_MESSAGE);
                return;
            }
        };

        if self
            .registry
            .send(&id, &ServerMessage::AiResponse { text: reply.clone() })
            .is_err()
        {
            return;
        }
        session.push_turn(Role::Assistant, reply.clone());

        let audio = match self.synthesizer.synthesize(&reply).await {
            Ok(audio) => audio,
            Err(err) => {
                error!(session_id = %id, error = %err, "Synthesis failed");
                self.state.record_pipeline_failure();
                self.send_user_error(&id, GENERIC_FAILURE_MESSAGE);
                return;
            }
        };

        let _ = self.registry.send(
            &id,
            &ServerMessage::AudioResponse {
                data: BASE64.encode(&audio),
            },
        );
        info!(session_id = %id, "Voice pipeline completed");
    }

    /// Emit one typed error message to the user. Delivery failure means the
    /// client is gone; the registry already tore the session down.
    fn send_user_error(&self, session_id: &str, message: &str) {
        let _ = self.registry.send(
            session_id,
            &ServerMessage::Error {
                message: message.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::classifier::EnergyClassifier;
    use crate::config::{AppConfig, AudioConfig};
    use crate::error::{AppError, AppResult};
    use crate::session::history::Turn;
    use crate::session::ClientTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    // 1ms frames at 16kHz: 32 bytes per frame, so tests stay tiny.
    const FRAME_BYTES: usize = 32;

    struct RecordingTransport {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl ClientTransport for RecordingTransport {
        fn deliver(&self, payload: String) -> AppResult<()> {
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }
    }

    enum TranscriberBehavior {
        Text(&'static str),
        Nothing,
        Fail,
    }

    struct MockTranscriber {
        behavior: TranscriberBehavior,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Transcriber for MockTranscriber {
        async fn transcribe(&self, _pcm: &[u8]) -> AppResult<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                TranscriberBehavior::Text(text) => Ok(Some(text.to_string())),
                TranscriberBehavior::Nothing => Ok(None),
                TranscriberBehavior::Fail => {
                    Err(AppError::Service("transcriber exploded".to_string()))
                }
            }
        }
    }

    struct MockResponder {
        contexts: Arc<Mutex<Vec<Vec<Turn>>>>,
    }

    #[async_trait::async_trait]
    impl Responder for MockResponder {
        async fn respond(&self, _input: &str, history: &[Turn]) -> AppResult<String> {
            self.contexts.lock().unwrap().push(history.to_vec());
            Ok("mock reply".to_string())
        }
    }

    struct MockSynthesizer;

    #[async_trait::async_trait]
    impl Synthesizer for MockSynthesizer {
        async fn synthesize(&self, _text: &str) -> AppResult<Vec<u8>> {
            Ok(vec![82, 73, 70, 70]) // "RIFF"
        }
    }

    struct Harness {
        relay: RelayPipeline,
        session_id: String,
        sent: Arc<Mutex<Vec<String>>>,
        transcriber_calls: Arc<AtomicUsize>,
        responder_contexts: Arc<Mutex<Vec<Vec<Turn>>>>,
    }

    fn harness(behavior: TranscriberBehavior) -> Harness {
        let audio = AudioConfig {
            sample_rate: 16000,
            frame_duration_ms: 1,
            silence_frame_threshold: 30,
        };
        let classifier = Arc::new(EnergyClassifier::new(audio.frame_bytes()));
        let registry = Arc::new(ConnectionRegistry::new(audio, classifier));

        let sent = Arc::new(Mutex::new(Vec::new()));
        let session = registry.register(Box::new(RecordingTransport { sent: sent.clone() }));

        let transcriber_calls = Arc::new(AtomicUsize::new(0));
        let responder_contexts = Arc::new(Mutex::new(Vec::new()));

        let mut config = AppConfig::default();
        config.services.api_key = "test-key".to_string();

        let relay = RelayPipeline::new(
            registry,
            Arc::new(MockTranscriber {
                behavior,
                calls: transcriber_calls.clone(),
            }),
            Arc::new(MockResponder {
                contexts: responder_contexts.clone(),
            }),
            Arc::new(MockSynthesizer),
            AppState::new(config),
        );

        Harness {
            relay,
            session_id: session.id.clone(),
            sent,
            transcriber_calls,
            responder_contexts,
        }
    }

    fn sent_types(sent: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|payload| {
                let value: serde_json::Value = serde_json::from_str(payload).unwrap();
                value["type"].as_str().unwrap().to_string()
            })
            .collect()
    }

    fn speech_chunk() -> Vec<u8> {
        let mut chunk = Vec::with_capacity(FRAME_BYTES);
        for _ in 0..FRAME_BYTES / 2 {
            chunk.extend_from_slice(&8000i16.to_le_bytes());
        }
        chunk
    }

    fn silent_chunk() -> Vec<u8> {
        vec![0u8; FRAME_BYTES]
    }

    #[tokio::test]
    async fn test_no_speech_means_one_error_and_no_transcription() {
        let h = harness(TranscriberBehavior::Text("should never be seen"));

        for _ in 0..5 {
            h.relay.handle_chunk(&h.session_id, &silent_chunk());
        }
        h.relay.handle_audio_end(&h.session_id).await;

        let types = sent_types(&h.sent);
        assert_eq!(types.iter().filter(|t| *t == "error").count(), 1);
        assert!(!types.iter().any(|t| t == "transcription"));
        assert_eq!(h.transcriber_calls.load(Ordering::SeqCst), 0);

        // The session survives and is back to idle.
        let session = h.relay.registry().lookup(&h.session_id).unwrap();
        assert_eq!(session.phase().as_str(), "connected");
    }

    #[tokio::test]
    async fn test_audio_end_with_no_chunks_reports_no_audio() {
        let h = harness(TranscriberBehavior::Text("unused"));
        h.relay.handle_audio_end(&h.session_id).await;

        let payloads = h.sent.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert!(payloads[0].contains("No audio captured"));
    }

    #[tokio::test]
    async fn test_chunked_speech_runs_full_pipeline() {
        let h = harness(TranscriberBehavior::Text("hello there"));

        h.relay.handle_chunk(&h.session_id, &speech_chunk());
        h.relay.handle_chunk(&h.session_id, &silent_chunk());
        h.relay.handle_audio_end(&h.session_id).await;

        let types = sent_types(&h.sent);
        // Speech notification first, then the pipeline outputs in order.
        assert_eq!(
            types,
            vec![
                "speech_detected",
                "speech_detected",
                "transcription",
                "ai_response",
                "audio_response"
            ]
        );
        assert_eq!(h.transcriber_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_complete_audio_ordering_and_history() {
        let h = harness(TranscriberBehavior::Text("hello there"));

        h.relay
            .handle_complete_audio(&h.session_id, speech_chunk())
            .await;

        let types = sent_types(&h.sent);
        assert_eq!(types, vec!["transcription", "ai_response", "audio_response"]);

        // Exactly two new turns: the user's and the assistant's.
        let session = h.relay.registry().lookup(&h.session_id).unwrap();
        assert_eq!(session.history_len(), 2);
        assert_eq!(session.phase().as_str(), "connected");
    }

    #[tokio::test]
    async fn test_complete_audio_empty_reports_no_audio() {
        let h = harness(TranscriberBehavior::Text("unused"));
        h.relay.handle_complete_audio(&h.session_id, Vec::new()).await;

        let payloads = h.sent.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert!(payloads[0].contains("No audio captured"));
        assert_eq!(h.transcriber_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unrecognized_speech_is_expected_outcome() {
        let h = harness(TranscriberBehavior::Nothing);

        h.relay
            .handle_complete_audio(&h.session_id, speech_chunk())
            .await;

        let payloads = h.sent.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert!(payloads[0].contains("Speech not recognized"));
        drop(payloads);

        // Not a fault: no turns appended, session intact.
        let session = h.relay.registry().lookup(&h.session_id).unwrap();
        assert_eq!(session.history_len(), 0);
    }

    #[tokio::test]
    async fn test_transcriber_failure_is_caught() {
        let h = harness(TranscriberBehavior::Fail);

        h.relay
            .handle_complete_audio(&h.session_id, speech_chunk())
            .await;

        let payloads = h.sent.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert!(payloads[0].contains("Audio processing failed"));
        drop(payloads);

        // The failure never tears down the session or the registry.
        let session = h.relay.registry().lookup(&h.session_id).unwrap();
        assert_eq!(session.phase().as_str(), "connected");
        assert!(session.begin_flush().is_ok());
    }

    #[tokio::test]
    async fn test_clear_history_resets_responder_context() {
        let h = harness(TranscriberBehavior::Text("first question"));

        h.relay
            .handle_complete_audio(&h.session_id, speech_chunk())
            .await;
        let session = h.relay.registry().lookup(&h.session_id).unwrap();
        assert_eq!(session.history_len(), 2);

        h.relay.handle_clear_history(&h.session_id);
        assert_eq!(session.history_len(), 0);
        assert!(sent_types(&h.sent).contains(&"history_cleared".to_string()));

        // The next run sees only its own user turn as context.
        h.relay
            .handle_complete_audio(&h.session_id, speech_chunk())
            .await;
        let contexts = h.responder_contexts.lock().unwrap();
        let last_context = contexts.last().unwrap();
        assert_eq!(last_context.len(), 1);
        assert_eq!(last_context[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_flush_in_flight_rejects_second_audio_end() {
        let h = harness(TranscriberBehavior::Text("hello"));
        let session = h.relay.registry().lookup(&h.session_id).unwrap();

        // Simulate a pipeline already running.
        session.begin_flush().unwrap();
        h.relay.handle_audio_end(&h.session_id).await;

        // The second flush was refused: nothing was sent.
        assert!(h.sent.lock().unwrap().is_empty());
        assert_eq!(h.transcriber_calls.load(Ordering::SeqCst), 0);
    }
}
