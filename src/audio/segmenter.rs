//! # Voice Activity Segmentation
//!
//! Turns a stream of raw audio frames into "is speech present" /
//! "is the utterance finished" signals while accumulating the utterance for
//! transcription.
//!
//! ## Segmentation rules:
//! - Every exact-length frame is appended to the utterance regardless of
//!   its classification; the transcriber needs the trailing silence as well
//!   as the speech.
//! - A speech frame resets the silence run to zero; a silent frame extends
//!   it. The utterance counts as finished once the silence run reaches the
//!   configured threshold (default 30 frames ≈ 900ms at 30ms frames).
//! - A frame with the wrong byte length is rejected without touching the
//!   counters or the utterance.
//! - Counters reset to zero exactly when the utterance is drained.

use crate::audio::classifier::VoiceClassifier;
use crate::error::{AppError, AppResult};
use std::sync::Arc;

/// Per-session voice-activity counters. Transitions happen only on frame
/// boundaries.
#[derive(Debug, Default, Clone, Copy)]
pub struct VadState {
    /// Consecutive silent frames since the last speech frame
    pub silence_run: u32,

    /// Total frames classified as speech since the last drain
    pub speech_frames: u32,
}

/// The audio accumulated for one user turn, handed out by `drain`.
#[derive(Debug)]
pub struct Utterance {
    /// Linear little-endian 16-bit PCM, frames concatenated in submission order
    pub pcm: Vec<u8>,

    /// Whether any frame of this utterance was classified as speech.
    /// Callers must treat an utterance without speech as "no audio" rather
    /// than attempting transcription.
    pub had_speech: bool,
}

impl Utterance {
    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }
}

/// Accumulates frames for one session and tracks voice activity.
pub struct VoiceActivitySegmenter {
    classifier: Arc<dyn VoiceClassifier>,
    sample_rate: u32,
    frame_bytes: usize,
    silence_threshold: u32,
    utterance: Vec<u8>,
    state: VadState,
}

impl VoiceActivitySegmenter {
    pub fn new(
        classifier: Arc<dyn VoiceClassifier>,
        sample_rate: u32,
        silence_threshold: u32,
    ) -> Self {
        let frame_bytes = classifier.frame_bytes();
        Self {
            classifier,
            sample_rate,
            frame_bytes,
            silence_threshold,
            utterance: Vec::new(),
            state: VadState::default(),
        }
    }

    /// Submit one audio frame.
    ///
    /// ## What this does:
    /// Classifies the frame, appends it to the utterance (speech and silence
    /// alike), and updates the voice-activity counters.
    ///
    /// ## Returns:
    /// Whether speech has been detected at least once since the last drain.
    ///
    /// ## Errors:
    /// A frame whose byte length does not match the configured frame size is
    /// rejected; neither the counters nor the utterance change.
    pub fn submit(&mut self, frame: &[u8]) -> AppResult<bool> {
        if frame.len() != self.frame_bytes {
            return Err(AppError::BadRequest(format!(
                "Audio frame must be exactly {} bytes, got {}",
                self.frame_bytes,
                frame.len()
            )));
        }

        let is_speech = self.classifier.is_speech(frame)?;
        self.utterance.extend_from_slice(frame);

        if is_speech {
            self.state.speech_frames += 1;
            self.state.silence_run = 0;
        } else {
            self.state.silence_run += 1;
        }

        Ok(self.speech_detected())
    }

    /// Submit an inbound chunk that may span several frames.
    ///
    /// ## What this does:
    /// Splits the chunk into exact classifier frames and submits each in
    /// order. A trailing partial frame is dropped; the classifier cannot
    /// score it.
    ///
    /// ## Returns:
    /// Whether speech has been detected since the last drain, after all
    /// complete frames in this chunk were processed.
    pub fn submit_chunk(&mut self, chunk: &[u8]) -> AppResult<bool> {
        for frame in chunk.chunks_exact(self.frame_bytes) {
            self.submit(frame)?;
        }
        Ok(self.speech_detected())
    }

    /// Whether any frame since the last drain was classified as speech.
    pub fn speech_detected(&self) -> bool {
        self.state.speech_frames > 0
    }

    /// Whether the utterance is finished: the silence run has reached the
    /// configured threshold. Pure query, no mutation.
    pub fn end_of_utterance(&self) -> bool {
        self.state.silence_run >= self.silence_threshold
    }

    /// Current voice-activity counters.
    pub fn vad_state(&self) -> VadState {
        self.state
    }

    /// Duration of the accumulated audio in seconds.
    pub fn duration_seconds(&self) -> f64 {
        let samples = self.utterance.len() / 2;
        samples as f64 / self.sample_rate as f64
    }

    /// Take the accumulated utterance and reset the segmenter.
    ///
    /// ## What this does:
    /// Swaps the utterance buffer out and zeroes every counter, so frames
    /// arriving after this call start a fresh utterance. A drain with no
    /// submitted frames returns an empty utterance.
    pub fn drain(&mut self) -> Utterance {
        let had_speech = self.speech_detected();
        let pcm = std::mem::take(&mut self.utterance);
        self.state = VadState::default();
        Utterance { pcm, had_speech }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic classifier for tests: a frame is speech iff its first
    /// sample is non-zero.
    struct FirstSampleClassifier {
        frame_bytes: usize,
    }

    impl VoiceClassifier for FirstSampleClassifier {
        fn frame_bytes(&self) -> usize {
            self.frame_bytes
        }

        fn is_speech(&self, frame: &[u8]) -> AppResult<bool> {
            Ok(frame[0] != 0 || frame[1] != 0)
        }
    }

    const FRAME_BYTES: usize = 8; // 4 samples per frame

    fn segmenter(silence_threshold: u32) -> VoiceActivitySegmenter {
        let classifier = Arc::new(FirstSampleClassifier {
            frame_bytes: FRAME_BYTES,
        });
        VoiceActivitySegmenter::new(classifier, 16000, silence_threshold)
    }

    fn speech_frame(marker: u8) -> Vec<u8> {
        let mut frame = vec![0u8; FRAME_BYTES];
        frame[0] = marker;
        frame
    }

    fn silent_frame() -> Vec<u8> {
        vec![0u8; FRAME_BYTES]
    }

    #[test]
    fn test_drain_concatenates_in_submission_order() {
        let mut segmenter = segmenter(30);
        let first = speech_frame(1);
        let second = speech_frame(2);
        let third = silent_frame();

        segmenter.submit(&first).unwrap();
        segmenter.submit(&second).unwrap();
        segmenter.submit(&third).unwrap();

        let utterance = segmenter.drain();
        let mut expected = first.clone();
        expected.extend_from_slice(&second);
        expected.extend_from_slice(&third);
        assert_eq!(utterance.pcm, expected);
        assert!(utterance.had_speech);

        // A second drain without new submissions returns an empty buffer.
        let empty = segmenter.drain();
        assert!(empty.is_empty());
        assert!(!empty.had_speech);
    }

    #[test]
    fn test_end_of_utterance_at_exact_threshold() {
        let mut segmenter = segmenter(30);
        segmenter.submit(&speech_frame(1)).unwrap();

        // 29 consecutive silent frames: not finished yet.
        for _ in 0..29 {
            segmenter.submit(&silent_frame()).unwrap();
        }
        assert!(!segmenter.end_of_utterance());

        // The 30th makes it true.
        segmenter.submit(&silent_frame()).unwrap();
        assert!(segmenter.end_of_utterance());

        // And it stays true until speech resets the run.
        segmenter.submit(&silent_frame()).unwrap();
        assert!(segmenter.end_of_utterance());
        segmenter.submit(&speech_frame(1)).unwrap();
        assert!(!segmenter.end_of_utterance());
        assert_eq!(segmenter.vad_state().silence_run, 0);
    }

    #[test]
    fn test_short_frame_rejected_without_mutation() {
        let mut segmenter = segmenter(30);
        segmenter.submit(&speech_frame(1)).unwrap();
        let before = segmenter.vad_state();

        let short = vec![1u8; FRAME_BYTES - 2];
        assert!(segmenter.submit(&short).is_err());

        let after = segmenter.vad_state();
        assert_eq!(before.speech_frames, after.speech_frames);
        assert_eq!(before.silence_run, after.silence_run);
        assert_eq!(segmenter.drain().pcm.len(), FRAME_BYTES);
    }

    #[test]
    fn test_submit_chunk_drops_trailing_partial_frame() {
        let mut segmenter = segmenter(30);

        // Two complete frames plus 3 stray bytes.
        let mut chunk = speech_frame(1);
        chunk.extend_from_slice(&silent_frame());
        chunk.extend_from_slice(&[9u8; 3]);

        assert!(segmenter.submit_chunk(&chunk).unwrap());
        assert_eq!(segmenter.drain().pcm.len(), FRAME_BYTES * 2);
    }

    #[test]
    fn test_speech_flag_cleared_by_drain() {
        let mut segmenter = segmenter(30);
        assert!(!segmenter.submit(&silent_frame()).unwrap());
        assert!(segmenter.submit(&speech_frame(1)).unwrap());

        segmenter.drain();
        // Counters reset exactly when the utterance is cleared.
        assert!(!segmenter.speech_detected());
        assert_eq!(segmenter.vad_state().silence_run, 0);
        assert!(!segmenter.submit(&silent_frame()).unwrap());
    }

    #[test]
    fn test_duration_tracks_accumulated_samples() {
        let mut segmenter = segmenter(30);
        // 4 samples per frame at 16kHz.
        segmenter.submit(&silent_frame()).unwrap();
        segmenter.submit(&silent_frame()).unwrap();
        let expected = 8.0 / 16000.0;
        assert!((segmenter.duration_seconds() - expected).abs() < 1e-9);
    }
}
