//! # Connection Registry
//!
//! Tracks every live session, assigns session identity, routes outbound
//! messages to the right transport, and supports broadcast.
//!
//! ## Ownership:
//! The registry exclusively owns sessions for their lifetime: a session
//! exists in the table iff its transport is open. Created on connect,
//! destroyed on disconnect or on the first delivery failure (implicit
//! disconnect).
//!
//! ## Thread Safety:
//! The session table is the only cross-session shared state. Mutating
//! operations take the write lock; broadcast snapshots the session list
//! under the read lock and iterates without it, so it tolerates concurrent
//! connects and disconnects.

use crate::audio::classifier::VoiceClassifier;
use crate::audio::segmenter::VoiceActivitySegmenter;
use crate::config::AudioConfig;
use crate::error::{AppError, AppResult};
use crate::protocol::ServerMessage;
use crate::session::{ClientTransport, Session};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Registry of all live voice sessions.
pub struct ConnectionRegistry {
    /// Active sessions keyed by opaque session id
    sessions: RwLock<HashMap<String, Arc<Session>>>,

    /// Audio parameters used to build each session's segmenter
    audio: AudioConfig,

    /// Shared voice-activity classifier
    classifier: Arc<dyn VoiceClassifier>,
}

impl ConnectionRegistry {
    pub fn new(audio: AudioConfig, classifier: Arc<dyn VoiceClassifier>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            audio,
            classifier,
        }
    }

    /// Register a new session for a freshly opened transport.
    ///
    /// ## What this does:
    /// Allocates a fresh unique id, builds an empty segmenter and history,
    /// and makes the session visible to `lookup` and `broadcast`.
    pub fn register(&self, transport: Box<dyn ClientTransport>) -> Arc<Session> {
        let id = Uuid::new_v4().to_string();
        let segmenter = VoiceActivitySegmenter::new(
            self.classifier.clone(),
            self.audio.sample_rate,
            self.audio.silence_frame_threshold,
        );
        let session = Arc::new(Session::new(id.clone(), segmenter, transport));

        let mut sessions = self.sessions.write().unwrap();
        sessions.insert(id.clone(), session.clone());
        info!(session_id = %id, active = sessions.len(), "Session registered");

        session
    }

    /// Remove a session. Idempotent: removing a session that is already gone
    /// is a no-op, not an error.
    pub fn unregister(&self, id: &str) {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.remove(id).is_some() {
            info!(session_id = %id, active = sessions.len(), "Session unregistered");
        }
    }

    /// Look up a live session.
    ///
    /// ## Errors:
    /// `NotFound` if the session was never registered or already removed.
    pub fn lookup(&self, id: &str) -> AppResult<Arc<Session>> {
        self.sessions
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Session '{}' not found", id)))
    }

    /// Deliver a message to exactly one session.
    ///
    /// ## Implicit disconnect:
    /// If the transport is already closed, the session is unregistered
    /// BEFORE the failure is surfaced, so the caller never retries against a
    /// dead session.
    pub fn send(&self, id: &str, message: &ServerMessage) -> AppResult<()> {
        let session = self.lookup(id)?;
        let payload = serde_json::to_string(message)?;

        match session.deliver(payload) {
            Ok(()) => {
                session.touch_activity();
                Ok(())
            }
            Err(err) => {
                warn!(session_id = %id, error = %err, "Delivery failed, dropping session");
                self.unregister(id);
                Err(err)
            }
        }
    }

    /// Deliver a message to every registered session.
    ///
    /// ## Failure policy:
    /// A failed delivery disconnects that one session and does not block
    /// delivery to the others (collect, don't short-circuit).
    ///
    /// ## Returns:
    /// How many sessions the message reached.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "Broadcast serialization failed");
                return 0;
            }
        };

        // Snapshot under the read lock, deliver without it.
        let snapshot: Vec<Arc<Session>> =
            self.sessions.read().unwrap().values().cloned().collect();

        let mut delivered = 0;
        let mut disconnected = Vec::new();

        for session in &snapshot {
            match session.deliver(payload.clone()) {
                Ok(()) => {
                    session.touch_activity();
                    delivered += 1;
                }
                Err(err) => {
                    warn!(session_id = %session.id, error = %err, "Broadcast delivery failed");
                    disconnected.push(session.id.clone());
                }
            }
        }

        for id in disconnected {
            self.unregister(&id);
        }

        delivered
    }

    /// Flip a session's recording flag. Disconnect races are expected, so a
    /// missing session is a silent no-op.
    pub fn set_recording(&self, id: &str, recording: bool) {
        if let Ok(session) = self.lookup(id) {
            session.set_recording(recording);
            session.touch_activity();
        }
    }

    /// Bump a session's last-activity timestamp. Silent no-op when the
    /// session is gone.
    pub fn touch_activity(&self, id: &str) {
        if let Ok(session) = self.lookup(id) {
            session.touch_activity();
        }
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Snapshot of every session for the health endpoint.
    pub fn sessions_summary(&self) -> RegistrySummary {
        let sessions = self.sessions.read().unwrap();

        let mut infos: Vec<SessionInfo> = sessions
            .values()
            .map(|session| SessionInfo {
                session_id: session.id.clone(),
                connected_at: session.connected_at,
                last_activity: session.last_activity(),
                is_recording: session.is_recording(),
            })
            .collect();
        infos.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));

        RegistrySummary {
            total_sessions: infos.len(),
            recording_sessions: infos.iter().filter(|info| info.is_recording).count(),
            sessions: infos,
        }
    }
}

/// Snapshot of one session's lifecycle fields.
#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_recording: bool,
}

/// Snapshot of the whole registry.
#[derive(Debug, Serialize)]
pub struct RegistrySummary {
    pub total_sessions: usize,
    pub recording_sessions: usize,
    pub sessions: Vec<SessionInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::classifier::EnergyClassifier;
    use std::sync::Mutex;

    /// Transport that records every payload it delivers.
    pub struct RecordingTransport {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingTransport {
        pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            (Self { sent: sent.clone() }, sent)
        }
    }

    impl ClientTransport for RecordingTransport {
        fn deliver(&self, payload: String) -> AppResult<()> {
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }
    }

    /// Transport that always fails, as a closed socket does.
    struct ClosedTransport;

    impl ClientTransport for ClosedTransport {
        fn deliver(&self, _payload: String) -> AppResult<()> {
            Err(AppError::TransportClosed("socket closed".to_string()))
        }
    }

    fn registry() -> ConnectionRegistry {
        let audio = AudioConfig {
            sample_rate: 16000,
            frame_duration_ms: 30,
            silence_frame_threshold: 30,
        };
        let classifier = Arc::new(EnergyClassifier::new(audio.frame_bytes()));
        ConnectionRegistry::new(audio, classifier)
    }

    #[test]
    fn test_register_lookup_unregister() {
        let registry = registry();
        let (transport, _) = RecordingTransport::new();
        let session = registry.register(Box::new(transport));
        let id = session.id.clone();

        assert!(registry.lookup(&id).is_ok());
        assert_eq!(registry.active_session_count(), 1);

        registry.unregister(&id);
        assert!(matches!(registry.lookup(&id), Err(AppError::NotFound(_))));
        assert_eq!(registry.active_session_count(), 0);

        // Second unregister is a no-op, not an error.
        registry.unregister(&id);
    }

    #[test]
    fn test_send_reaches_one_session() {
        let registry = registry();
        let (transport, sent) = RecordingTransport::new();
        let session = registry.register(Box::new(transport));

        registry
            .send(&session.id, &ServerMessage::listening())
            .unwrap();

        let delivered = sent.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].contains("speech_detected"));
    }

    #[test]
    fn test_send_to_closed_transport_unregisters() {
        let registry = registry();
        let session = registry.register(Box::new(ClosedTransport));
        let id = session.id.clone();

        let result = registry.send(&id, &ServerMessage::listening());
        assert!(result.is_err());

        // The implicit disconnect ran before the failure surfaced.
        assert!(registry.lookup(&id).is_err());
    }

    #[test]
    fn test_broadcast_survives_one_dead_transport() {
        let registry = registry();
        let (alive_a, sent_a) = RecordingTransport::new();
        let (alive_b, sent_b) = RecordingTransport::new();

        let a = registry.register(Box::new(alive_a));
        let dead = registry.register(Box::new(ClosedTransport));
        let b = registry.register(Box::new(alive_b));

        let delivered = registry.broadcast(&ServerMessage::HistoryCleared {});
        assert_eq!(delivered, 2);

        // Only the failing session was removed.
        assert!(registry.lookup(&a.id).is_ok());
        assert!(registry.lookup(&b.id).is_ok());
        assert!(registry.lookup(&dead.id).is_err());

        assert_eq!(sent_a.lock().unwrap().len(), 1);
        assert_eq!(sent_b.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_mutators_ignore_missing_sessions() {
        let registry = registry();
        // Neither call panics or errors on an unknown id.
        registry.set_recording("ghost", true);
        registry.touch_activity("ghost");
    }

    #[test]
    fn test_set_recording_updates_session() {
        let registry = registry();
        let (transport, _) = RecordingTransport::new();
        let session = registry.register(Box::new(transport));

        registry.set_recording(&session.id, true);
        assert!(session.is_recording());
        registry.set_recording(&session.id, false);
        assert!(!session.is_recording());
    }
}
