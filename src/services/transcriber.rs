//! # Speech-to-Text Collaborator
//!
//! Converts an accumulated utterance into text. The HTTP implementation
//! talks to a Google-style `speech:recognize` endpoint.

use crate::config::{AudioConfig, ServicesConfig};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Recognition language requested from the service.
const LANGUAGE_CODE: &str = "en-US";

/// Speech-to-text interface.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe little-endian 16-bit mono PCM.
    ///
    /// ## Returns:
    /// - `Ok(Some(text))`: recognized speech
    /// - `Ok(None)`: the audio contained no recognizable speech. This is a
    ///   normal outcome (silence, noise, non-speech audio), not a fault.
    /// - `Err(_)`: the service itself failed
    async fn transcribe(&self, pcm: &[u8]) -> AppResult<Option<String>>;
}

/// HTTP transcription client.
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    sample_rate: u32,
}

impl HttpTranscriber {
    pub fn new(services: &ServicesConfig, audio: &AudioConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: services.transcriber_endpoint.clone(),
            api_key: services.api_key.clone(),
            sample_rate: audio.sample_rate,
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, pcm: &[u8]) -> AppResult<Option<String>> {
        if pcm.is_empty() {
            return Ok(None);
        }

        let body = json!({
            "config": {
                "encoding": "LINEAR16",
                "sampleRateHertz": self.sample_rate,
                "languageCode": LANGUAGE_CODE,
            },
            "audio": {
                "content": BASE64.encode(pcm),
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
                "Transcription service returned {}",
                response.status()
            )));
        }

        let payload: RecognizeResponse = response.json().await?;
        let transcript = payload
            .results
            .into_iter()
            .next()
            .and_then(|result| result.alternatives.into_iter().next())
            .map(|alternative| alternative.transcript)
            .filter(|text| !text.trim().is_empty());

        debug!(recognized = transcript.is_some(), "Transcription completed");
        Ok(transcript)
    }
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

#[derive(Debug, Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    alternatives: Vec<RecognitionAlternative>,
}

#[derive(Debug, Deserialize)]
struct RecognitionAlternative {
    #[serde(default)]
    transcript: String,
}
