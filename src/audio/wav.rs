//! # WAV Container Helpers
//!
//! Wraps raw PCM in a RIFF/WAVE container and generates silent audio for the
//! synthesizer's degraded mode. Synthesized replies travel to the client as
//! WAV so the browser can play them directly.

use crate::error::{AppError, AppResult};
use byteorder::{ByteOrder, LittleEndian};
use std::io::Cursor;
use tracing::error;

/// Wrap little-endian 16-bit mono PCM in a WAV container.
///
/// ## Errors:
/// The byte length must be even; 16-bit samples cannot be split.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> AppResult<Vec<u8>> {
    if pcm.len() % 2 != 0 {
        return Err(AppError::BadRequest(
            "Audio data length must be even for 16-bit samples".to_string(),
        ));
    }

    let samples: Vec<i16> = pcm.chunks_exact(2).map(LittleEndian::read_i16).collect();
    write_wav(samples, sample_rate)
}

/// Generate a playable silent WAV of the given duration.
///
/// ## Usage:
/// The synthesizer returns this instead of propagating a synthesis failure,
/// so the client always receives audio it can play. Returns an empty buffer
/// only if container writing itself fails.
pub fn silence_wav(duration_ms: u32, sample_rate: u32) -> Vec<u8> {
    let sample_count = (sample_rate as usize * duration_ms as usize) / 1000;
    let samples = vec![0i16; sample_count];

    match write_wav(samples, sample_rate) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to generate silence: {}", e);
            Vec::new()
        }
    }
}

fn write_wav(samples: Vec<i16>, sample_rate: u32) -> AppResult<Vec<u8>> {
    let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, sample_rate, 16);
    let mut cursor = Cursor::new(Vec::new());

    wav::write(header, &wav::BitDepth::Sixteen(samples), &mut cursor)
        .map_err(|e| AppError::Internal(format!("WAV encoding failed: {}", e)))?;

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_container_shape() {
        let pcm: Vec<u8> = (0..8i16).flat_map(|s| s.to_le_bytes()).collect();
        let bytes = pcm_to_wav(&pcm, 16000).unwrap();

        // RIFF....WAVE magic plus our 16 bytes of payload somewhere after
        // the 44-byte canonical header.
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert!(bytes.len() >= 44 + pcm.len());
    }

    #[test]
    fn test_odd_length_pcm_rejected() {
        assert!(pcm_to_wav(&[0u8; 3], 16000).is_err());
    }

    #[test]
    fn test_silence_has_expected_sample_count() {
        let bytes = silence_wav(1000, 8000);
        // 8000 samples * 2 bytes plus container overhead.
        assert!(bytes.len() >= 44 + 16000);
        // The payload itself is all zeros.
        let payload = &bytes[bytes.len() - 16000..];
        assert!(payload.iter().all(|&b| b == 0));
    }
}
