//! # Voice Activity Classification
//!
//! Per-frame binary classification of speech vs. non-speech. The classifier
//! is a pluggable capability behind a trait so the segmenter can be driven by
//! an energy heuristic in production and by deterministic stubs in tests.

use crate::error::{AppError, AppResult};
use byteorder::{ByteOrder, LittleEndian};

/// Per-frame speech/non-speech decision.
///
/// ## Contract:
/// `is_speech` requires the exact configured frame byte length. Classifiers
/// operate on fixed-duration frames; a partial frame is a caller bug, not
/// something to guess around, so it is an error rather than a silent skip.
pub trait VoiceClassifier: Send + Sync {
    /// Expected frame length in bytes (16-bit mono samples).
    fn frame_bytes(&self) -> usize;

    /// Classify one frame of little-endian 16-bit PCM.
    fn is_speech(&self, frame: &[u8]) -> AppResult<bool>;
}

/// RMS energy above which a frame counts as speech, on samples normalized
/// to [-1.0, 1.0]. Tuned for close-mic browser capture.
const ENERGY_THRESHOLD: f32 = 0.015;

/// Voice activity classifier using RMS energy thresholding.
pub struct EnergyClassifier {
    frame_bytes: usize,
    threshold: f32,
}

impl EnergyClassifier {
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            frame_bytes,
            threshold: ENERGY_THRESHOLD,
        }
    }

    /// Override the default energy threshold (used by tests and tuning).
    pub fn with_threshold(frame_bytes: usize, threshold: f32) -> Self {
        Self {
            frame_bytes,
            threshold,
        }
    }
}

impl VoiceClassifier for EnergyClassifier {
    fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    fn is_speech(&self, frame: &[u8]) -> AppResult<bool> {
        if frame.len() != self.frame_bytes {
            return Err(AppError::BadRequest(format!(
                "Classifier frame must be exactly {} bytes, got {}",
                self.frame_bytes,
                frame.len()
            )));
        }

        Ok(rms_energy(frame) > self.threshold)
    }
}

/// Compute RMS energy of a little-endian 16-bit PCM buffer, normalized
/// to [0.0, 1.0].
fn rms_energy(pcm: &[u8]) -> f32 {
    let sample_count = pcm.len() / 2;
    if sample_count == 0 {
        return 0.0;
    }

    let mut sum_sq = 0.0f32;
    for chunk in pcm.chunks_exact(2) {
        let sample = LittleEndian::read_i16(chunk) as f32 / 32768.0;
        sum_sq += sample * sample;
    }

    (sum_sq / sample_count as f32).sqrt()
}
