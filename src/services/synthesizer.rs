//! # Text-to-Speech Collaborator
//!
//! Converts the assistant's reply into playable audio. The HTTP
//! implementation talks to a Google-style `text:synthesize` endpoint.
//!
//! ## Degraded mode:
//! A synthesis failure never propagates. The HTTP implementation logs the
//! cause and returns one second of silent WAV instead, so the client always
//! receives audio it can play.

use crate::audio::wav::{pcm_to_wav, silence_wav};
use crate::config::{AudioConfig, ServicesConfig};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

/// Voice requested from the service.
const LANGUAGE_CODE: &str = "en-US";

/// Duration of the silent fallback reply.
const FALLBACK_SILENCE_MS: u32 = 1000;

/// Text-to-speech interface.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Render `text` as WAV bytes. Implementations should return playable
    /// (even if silent) audio rather than propagate synthesis failures.
    async fn synthesize(&self, text: &str) -> AppResult<Vec<u8>>;
}

/// HTTP text-to-speech client.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    sample_rate: u32,
}

impl HttpSynthesizer {
    pub fn new(services: &ServicesConfig, audio: &AudioConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: services.synthesizer_endpoint.clone(),
            api_key: services.api_key.clone(),
            sample_rate: audio.sample_rate,
        }
    }

    async fn request_synthesis(&self, text: &str) -> AppResult<Vec<u8>> {
        let body = json!({
            "input": {"text": text},
            "voice": {"languageCode": LANGUAGE_CODE},
            "audioConfig": {
                "audioEncoding": "LINEAR16",
                "sampleRateHertz": self.sample_rate,
            },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Service(format!(
                "Synthesis service returned {}",
                response.status()
            )));
        }

        let payload: SynthesizeResponse = response.json().await?;
        let audio = BASE64.decode(payload.audio_content)?;
        if audio.is_empty() {
            return Err(AppError::Service(
                "Synthesis service returned no audio".to_string(),
            ));
        }

        // Some backends return headerless LINEAR16 PCM; wrap it so the
        // browser can play it directly.
        if audio.starts_with(b"RIFF") {
            Ok(audio)
        } else {
            pcm_to_wav(&audio, self.sample_rate)
        }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> AppResult<Vec<u8>> {
        match self.request_synthesis(text).await {
            Ok(audio) => {
                debug!(audio_bytes = audio.len(), "Synthesis completed");
                Ok(audio)
            }
            Err(err) => {
                // Degrade to silence rather than leaving the client with no
                // audio at all.
                warn!(error = %err, "Synthesis failed, returning silence");
                Ok(silence_wav(FALLBACK_SILENCE_MS, self.sample_rate))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SynthesizeResponse {
    #[serde(rename = "audioContent", default)]
    audio_content: String,
}
