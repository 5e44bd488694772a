//! # Audio Processing Module
//!
//! Voice-activity segmentation for the relay pipeline: turning a stream of
//! raw PCM chunks into "speech is present" / "utterance finished" signals and
//! an accumulated utterance ready for transcription.
//!
//! ## Key Components:
//! - **Voice Classifier**: per-frame speech/non-speech decision (pluggable)
//! - **Segmenter**: frame accounting, silence-run tracking, utterance buffer
//! - **WAV helpers**: wrapping PCM in a RIFF container, generating silence
//!
//! ## Audio Format Requirements:
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers
//! - **Sample Rate**: one of 8000, 16000, 44100, 48000 Hz (configured)

pub mod classifier; // Per-frame speech/non-speech classification
pub mod segmenter;  // Voice-activity segmentation and utterance buffering
pub mod wav;        // WAV container helpers
