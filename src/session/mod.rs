//! # Session Management
//!
//! Per-connection server-side state and its lifecycle.
//!
//! ## Session Lifecycle:
//! 1. **Connected**: idle, waiting for audio
//! 2. **Recording**: receiving audio chunks (entered on the first chunk
//!    after connect or after a previous flush)
//! 3. **Flushing**: the voice pipeline is running on the drained utterance
//! 4. back to **Connected** when the pipeline completes or fails; the next
//!    chunk explicitly re-enters Recording
//!
//! Disconnection is terminal and reachable from any phase: the registry
//! removes the session and nothing else touches it again.
//!
//! ## Thread Safety:
//! Sessions are shared as `Arc<Session>` between the WebSocket actor and
//! spawned pipeline tasks. Every mutable field sits behind its own lock, and
//! no lock is ever held across an await point.

pub mod history;
pub mod registry;

use crate::audio::segmenter::{Utterance, VoiceActivitySegmenter};
use crate::error::{AppError, AppResult};
use crate::session::history::{ConversationHistory, Role, Turn};
use chrono::{DateTime, Utc};
use std::sync::{Mutex, RwLock};

/// Delivery handle for one client's transport.
///
/// ## Contract:
/// `deliver` hands a serialized envelope to the transport without blocking.
/// A `TransportClosed` error means the socket is gone; the caller treats it
/// as an implicit disconnect and never retries.
pub trait ClientTransport: Send + Sync {
    fn deliver(&self, payload: String) -> AppResult<()>;
}

/// Where a session currently is in its lifecycle loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Idle, between utterances
    Connected,
    /// Buffering audio chunks
    Recording,
    /// The pipeline is processing the drained utterance
    Flushing,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Connected => "connected",
            SessionPhase::Recording => "recording",
            SessionPhase::Flushing => "flushing",
        }
    }
}

/// Server-side state for one connected client.
pub struct Session {
    /// Opaque unique identifier assigned at registration
    pub id: String,

    /// When the client connected
    pub connected_at: DateTime<Utc>,

    /// Last time the relay touched this session
    last_activity: RwLock<DateTime<Utc>>,

    /// Whether the client is currently streaming a recording
    is_recording: RwLock<bool>,

    /// Lifecycle phase (see module docs for the machine)
    phase: RwLock<SessionPhase>,

    /// Voice-activity segmentation state and utterance buffer
    segmenter: Mutex<VoiceActivitySegmenter>,

    /// Bounded conversation transcript
    history: Mutex<ConversationHistory>,

    /// Delivery handle for this client's socket
    transport: Box<dyn ClientTransport>,
}

impl Session {
    pub fn new(
        id: String,
        segmenter: VoiceActivitySegmenter,
        transport: Box<dyn ClientTransport>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            connected_at: now,
            last_activity: RwLock::new(now),
            is_recording: RwLock::new(false),
            phase: RwLock::new(SessionPhase::Connected),
            segmenter: Mutex::new(segmenter),
            history: Mutex::new(ConversationHistory::new()),
            transport,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.read().unwrap()
    }

    /// Enter Recording on the first chunk of an utterance.
    ///
    /// ## State Transition:
    /// Connected → Recording. Any other phase is left alone: chunks that
    /// arrive mid-flush are buffered for the NEXT utterance without changing
    /// the phase.
    ///
    /// ## Returns:
    /// Whether the transition happened.
    pub fn enter_recording(&self) -> bool {
        let mut phase = self.phase.write().unwrap();
        if *phase == SessionPhase::Connected {
            *phase = SessionPhase::Recording;
            *self.is_recording.write().unwrap() = true;
            true
        } else {
            false
        }
    }

    /// Enter Flushing for a pipeline run.
    ///
    /// ## State Transition:
    /// Connected/Recording → Flushing. A session already Flushing refuses:
    /// at most one pipeline run may be in flight per session.
    pub fn begin_flush(&self) -> AppResult<()> {
        let mut phase = self.phase.write().unwrap();
        if *phase == SessionPhase::Flushing {
            return Err(AppError::BadRequest(
                "A pipeline run is already in progress for this session".to_string(),
            ));
        }
        *phase = SessionPhase::Flushing;
        Ok(())
    }

    /// Leave Flushing.
    ///
    /// ## State Transition:
    /// Flushing → Connected, always — never back to Recording, so the next
    /// chunk re-enters Recording explicitly.
    pub fn finish_flush(&self) {
        *self.phase.write().unwrap() = SessionPhase::Connected;
        *self.is_recording.write().unwrap() = false;
    }

    pub fn is_recording(&self) -> bool {
        *self.is_recording.read().unwrap()
    }

    pub fn set_recording(&self, recording: bool) {
        *self.is_recording.write().unwrap() = recording;
    }

    pub fn touch_activity(&self) {
        *self.last_activity.write().unwrap() = Utc::now();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.read().unwrap()
    }

    /// Feed an inbound chunk to the segmenter.
    ///
    /// ## Returns:
    /// Whether speech has been detected in the current utterance.
    pub fn submit_chunk(&self, chunk: &[u8]) -> AppResult<bool> {
        self.segmenter.lock().unwrap().submit_chunk(chunk)
    }

    /// Whether the silence run has reached the end-of-utterance threshold.
    pub fn end_of_utterance(&self) -> bool {
        self.segmenter.lock().unwrap().end_of_utterance()
    }

    /// Atomically take the accumulated utterance and reset the segmenter.
    ///
    /// ## Concurrency:
    /// The swap happens under the segmenter lock, so a chunk racing with the
    /// drain lands cleanly in the next utterance, never in the drained one.
    pub fn drain_utterance(&self) -> Utterance {
        self.segmenter.lock().unwrap().drain()
    }

    pub fn push_turn(&self, role: Role, text: String) {
        self.history.lock().unwrap().push(role, text);
    }

    /// The most recent turns, for responder context.
    pub fn recent_history(&self, n: usize) -> Vec<Turn> {
        self.history.lock().unwrap().recent(n)
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    pub fn clear_history(&self) {
        self.history.lock().unwrap().clear();
    }

    /// Deliver a serialized envelope to this client's transport.
    pub fn deliver(&self, payload: String) -> AppResult<()> {
        self.transport.deliver(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::classifier::EnergyClassifier;
    use std::sync::Arc;

    /// A transport that swallows everything.
    struct NullTransport;

    impl ClientTransport for NullTransport {
        fn deliver(&self, _payload: String) -> AppResult<()> {
            Ok(())
        }
    }

    fn session() -> Session {
        let classifier = Arc::new(EnergyClassifier::new(4));
        let segmenter = VoiceActivitySegmenter::new(classifier, 16000, 30);
        Session::new("test-session".to_string(), segmenter, Box::new(NullTransport))
    }

    #[test]
    fn test_recording_begins_only_from_connected() {
        let session = session();
        assert_eq!(session.phase(), SessionPhase::Connected);

        assert!(session.enter_recording());
        assert_eq!(session.phase(), SessionPhase::Recording);
        assert!(session.is_recording());

        // Second chunk: already Recording, nothing to do.
        assert!(!session.enter_recording());
    }

    #[test]
    fn test_flush_loop_returns_to_connected() {
        let session = session();
        session.enter_recording();

        session.begin_flush().unwrap();
        assert_eq!(session.phase(), SessionPhase::Flushing);

        // Chunks arriving mid-flush do not change the phase.
        assert!(!session.enter_recording());
        assert_eq!(session.phase(), SessionPhase::Flushing);

        session.finish_flush();
        assert_eq!(session.phase(), SessionPhase::Connected);
        assert!(!session.is_recording());

        // The next chunk re-enters Recording explicitly.
        assert!(session.enter_recording());
    }

    #[test]
    fn test_at_most_one_flush_in_flight() {
        let session = session();
        session.begin_flush().unwrap();
        assert!(session.begin_flush().is_err());

        session.finish_flush();
        assert!(session.begin_flush().is_ok());
    }

    #[test]
    fn test_chunks_during_flush_land_in_next_utterance() {
        let session = session();
        session.enter_recording();
        session.submit_chunk(&[10, 10, 10, 10]).unwrap();

        session.begin_flush().unwrap();
        let drained = session.drain_utterance();
        assert_eq!(drained.pcm.len(), 4);

        // Late chunk while flushing: buffered for the next run.
        session.submit_chunk(&[20, 20, 20, 20]).unwrap();
        session.finish_flush();

        let next = session.drain_utterance();
        assert_eq!(next.pcm, vec![20, 20, 20, 20]);
    }
}
