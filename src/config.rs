//! # Configuration Management
//!
//! Loads and manages application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special environment variables (HOST, PORT, API_KEY)
//! 2. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Validation:
//! `validate()` checks the whole configuration and reports EVERY violation it
//! finds in one error, so an operator fixes a broken deployment in one pass
//! instead of replaying the startup error by error.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Sample rates the relay accepts for inbound PCM.
pub const VALID_SAMPLE_RATES: [u32; 4] = [8000, 16000, 44100, 48000];

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub services: ServicesConfig,
    pub logging: LoggingConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address or hostname to bind the server to
/// - `port`: TCP port number to listen on (1-65535)
/// - `debug`: enables verbose request logging and the debug config endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
}

/// Audio segmentation configuration.
///
/// ## Fields:
/// - `sample_rate`: PCM sample rate in Hz; must be one of
///   {8000, 16000, 44100, 48000}
/// - `frame_duration_ms`: duration of one voice-activity frame. The frame
///   byte length the classifier requires is derived from this and the sample
///   rate (16-bit mono samples).
/// - `silence_frame_threshold`: consecutive silent frames after which an
///   utterance counts as finished (30 frames ≈ 900ms at 30ms frames)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_duration_ms: u32,
    pub silence_frame_threshold: u32,
}

impl AudioConfig {
    /// Byte length of one classifier frame.
    ///
    /// ## Invariant:
    /// frame_bytes = sample_rate × frame_duration_ms / 1000 × 2
    /// (16-bit little-endian mono samples).
    pub fn frame_bytes(&self) -> usize {
        (self.sample_rate as usize * self.frame_duration_ms as usize / 1000) * 2
    }
}

/// External collaborator configuration.
///
/// ## Fields:
/// - `api_key`: credential passed to the speech and language services.
///   Required; the server refuses to start without it.
/// - `responder_model`: which language model the responder asks for
/// - `*_endpoint`: base URLs of the three collaborators, overridable for
///   self-hosted or mock deployments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub api_key: String,
    pub responder_model: String,
    pub transcriber_endpoint: String,
    pub responder_endpoint: String,
    pub synthesizer_endpoint: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing level when RUST_LOG is not set
    /// (one of: trace, debug, info, warn, error)
    pub level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                debug: false,
            },
            audio: AudioConfig {
                sample_rate: 16000,          // what the transcriber expects
                frame_duration_ms: 30,       // classifier frame length
                silence_frame_threshold: 30, // ~900ms of trailing silence
            },
            services: ServicesConfig {
                api_key: String::new(), // must come from env or config file
                responder_model: "gemini-pro".to_string(),
                transcriber_endpoint: "https://speech.googleapis.com/v1/speech:recognize"
                    .to_string(),
                responder_endpoint: "https://generativelanguage.googleapis.com".to_string(),
                synthesizer_endpoint: "https://texttospeech.googleapis.com/v1/text:synthesize"
                    .to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST, PORT and API_KEY, which deployment
    ///    platforms set without the APP_ prefix
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("API_KEY") {
            settings = settings.set_override("services.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate the configuration, collecting every violation found.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Sample rate is one of the supported set
    /// - Frame duration is non-zero and at most 1000ms
    /// - Silence-frame threshold is non-zero
    /// - API credential is present
    /// - Log level parses to a known level
    ///
    /// ## Error shape:
    /// On failure the returned error message lists ALL violations, one per
    /// line, not just the first one found. The caller treats this as fatal.
    pub fn validate(&self) -> Result<()> {
        let violations = self.collect_violations();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "Invalid configuration:\n  - {}",
                violations.join("\n  - ")
            ))
        }
    }

    /// Run every validation rule and return the full list of failures.
    pub fn collect_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.server.port == 0 {
            violations.push("Server port cannot be 0".to_string());
        }

        if !VALID_SAMPLE_RATES.contains(&self.audio.sample_rate) {
            violations.push(format!(
                "Sample rate must be one of {:?}, got {}",
                VALID_SAMPLE_RATES, self.audio.sample_rate
            ));
        }

        if self.audio.frame_duration_ms == 0 {
            violations.push("Frame duration must be greater than 0 ms".to_string());
        } else if self.audio.frame_duration_ms > 1000 {
            violations.push(format!(
                "Frame duration must be at most 1000 ms, got {}",
                self.audio.frame_duration_ms
            ));
        }

        if self.audio.silence_frame_threshold == 0 {
            violations.push("Silence frame threshold must be greater than 0".to_string());
        }

        if self.services.api_key.trim().is_empty() {
            violations.push(
                "API credential is not set (API_KEY env var or services.api_key)".to_string(),
            );
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => violations.push(format!(
                "Log level must be one of trace/debug/info/warn/error, got '{}'",
                other
            )),
        }

        violations
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed. For example,
    /// `{"audio": {"silence_frame_threshold": 40}}` adjusts one knob and
    /// leaves everything else alone. The updated configuration is revalidated
    /// before it is accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
            if let Some(debug) = server.get("debug").and_then(|v| v.as_bool()) {
                self.server.debug = debug;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(rate) = audio.get("sample_rate").and_then(|v| v.as_u64()) {
                self.audio.sample_rate = rate as u32;
            }
            if let Some(duration) = audio.get("frame_duration_ms").and_then(|v| v.as_u64()) {
                self.audio.frame_duration_ms = duration as u32;
            }
            if let Some(threshold) = audio
                .get("silence_frame_threshold")
                .and_then(|v| v.as_u64())
            {
                self.audio.silence_frame_threshold = threshold as u32;
            }
        }

        if let Some(services) = partial_config.get("services") {
            if let Some(model) = services.get("responder_model").and_then(|v| v.as_str()) {
                self.services.responder_model = model.to_string();
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A configuration that passes validation, for tests.
    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.services.api_key = "test-key".to_string();
        config
    }

    #[test]
    fn test_default_config_requires_credential() {
        let config = AppConfig::default();
        // Everything is fine except the missing API credential.
        let violations = config.collect_violations();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("API credential"));
    }

    #[test]
    fn test_valid_config_passes() {
        let config = valid_config();
        assert!(config.validate().is_ok());
        // 30ms at 16kHz, 16-bit mono: 16000 * 0.03 * 2 = 960 bytes
        assert_eq!(config.audio.frame_bytes(), 960);
    }

    #[test]
    fn test_validation_collects_every_violation() {
        let mut config = valid_config();
        config.server.port = 0;
        config.audio.sample_rate = 22050;
        config.audio.silence_frame_threshold = 0;
        config.logging.level = "verbose".to_string();

        let violations = config.collect_violations();
        assert_eq!(violations.len(), 4);

        // The fatal error message enumerates all of them.
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("port"));
        assert!(err.contains("Sample rate"));
        assert!(err.contains("Silence frame threshold"));
        assert!(err.contains("Log level"));
    }

    #[test]
    fn test_config_update() {
        let mut config = valid_config();
        let json = r#"{"audio": {"silence_frame_threshold": 40}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.audio.silence_frame_threshold, 40);
        // Other fields remain unchanged.
        assert_eq!(config.audio.sample_rate, 16000);
    }

    #[test]
    fn test_config_update_rejects_invalid() {
        let mut config = valid_config();
        let json = r#"{"audio": {"sample_rate": 12345}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
