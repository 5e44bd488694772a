//! # Wire Protocol
//!
//! The JSON message envelope exchanged with the browser over the WebSocket.
//! Every frame is UTF-8 JSON text shaped as `{"type": <string>, ...fields}`;
//! audio payloads are base64-encoded raw little-endian 16-bit mono PCM (or a
//! WAV container for the synthesized reply).

use serde::{Deserialize, Serialize};

/// Messages the browser sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// One chunk of a streamed recording; buffered and scored for voice
    /// activity until an `audio_end` arrives.
    #[serde(rename = "audio_chunk")]
    AudioChunk {
        /// Base64-encoded PCM bytes
        data: String,
    },

    /// The streamed recording is finished; run the voice pipeline on the
    /// accumulated utterance.
    #[serde(rename = "audio_end")]
    AudioEnd {},

    /// Single-shot mode: the entire recording in one message, skipping
    /// chunked buffering and voice-activity scoring.
    #[serde(rename = "complete_audio")]
    CompleteAudio {
        /// Base64-encoded PCM bytes
        data: String,
    },

    /// Forget the conversation so far.
    #[serde(rename = "clear_history")]
    ClearHistory {},
}

/// Messages the relay sends to the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Greeting sent once after connect.
    #[serde(rename = "connection_established")]
    ConnectionEstablished { session_id: String, message: String },

    /// Voice activity was detected in the current utterance.
    #[serde(rename = "speech_detected")]
    SpeechDetected { status: String },

    /// What the transcriber heard.
    #[serde(rename = "transcription")]
    Transcription { text: String },

    /// The assistant's reply text.
    #[serde(rename = "ai_response")]
    AiResponse { text: String },

    /// The assistant's reply as base64 WAV bytes.
    #[serde(rename = "audio_response")]
    AudioResponse { data: String },

    /// Acknowledgement of `clear_history`.
    #[serde(rename = "history_cleared")]
    HistoryCleared {},

    /// A user-visible error (expected-empty outcomes and pipeline failures
    /// both arrive this way).
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    /// The speech-detected notification the relay emits while listening.
    pub fn listening() -> Self {
        ServerMessage::SpeechDetected {
            status: "listening".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_envelope_round_trip() {
        let msg = ClientMessage::AudioChunk {
            data: "AAAA".to_string(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"audio_chunk""#));

        match serde_json::from_str::<ClientMessage>(&json).unwrap() {
            ClientMessage::AudioChunk { data } => assert_eq!(data, "AAAA"),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_audio_end_needs_no_fields() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"audio_end"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::AudioEnd {}));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_server_error_serialization() {
        let msg = ServerMessage::Error {
            message: "No audio captured".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains("No audio captured"));
    }

    #[test]
    fn test_listening_status() {
        let json = serde_json::to_string(&ServerMessage::listening()).unwrap();
        assert!(json.contains(r#""status":"listening""#));
    }
}
