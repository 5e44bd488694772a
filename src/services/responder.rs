//! # Language-Model Collaborator
//!
//! Produces the assistant's reply from the transcribed text plus the bounded
//! recent conversation history. The HTTP implementation talks to a
//! Gemini-style `generateContent` endpoint.

use crate::config::ServicesConfig;
use crate::error::{AppError, AppResult};
use crate::session::history::{Role, Turn};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Standing instructions for the assistant. Replies are kept short because
/// they are spoken back to the user.
const SYSTEM_PROMPT: &str = "You are a friendly voice assistant. \
Reply naturally, as in a live conversation. Keep answers short and to the \
point (1-3 sentences), polite, and suitable for being read aloud. Answer \
questions directly; otherwise just keep the conversation going.";

/// Language-model interface.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Produce a reply to `input` given the recent conversation `history`
    /// (which, when called from the pipeline, already ends with the user's
    /// latest turn).
    async fn respond(&self, input: &str, history: &[Turn]) -> AppResult<String>;
}

/// HTTP language-model client.
pub struct HttpResponder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpResponder {
    pub fn new(services: &ServicesConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: services.responder_endpoint.clone(),
            api_key: services.api_key.clone(),
            model: services.responder_model.clone(),
        }
    }
}

/// Render the system prompt, the history, and the pending user input as one
/// text prompt. The input line is skipped when the history already ends with
/// it, so turns are never duplicated.
fn build_prompt(input: &str, history: &[Turn]) -> String {
    let mut parts = vec![SYSTEM_PROMPT.to_string()];

    for turn in history {
        let label = match turn.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        parts.push(format!("{}: {}", label, turn.text));
    }

    let input_already_last = history
        .last()
        .map(|turn| turn.role == Role::User && turn.text == input)
        .unwrap_or(false);
    if !input_already_last {
        parts.push(format!("User: {}", input));
    }

    parts.push("Assistant:".to_string());
    parts.join("\n")
}

#[async_trait]
impl Responder for HttpResponder {
    async fn respond(&self, input: &str, history: &[Turn]) -> AppResult<String> {
        let prompt = build_prompt(input, history);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        );

        let body = json!({
            "contents": [
                {"parts": [{"text": prompt}]}
            ]
        });

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Service(format!(
                "Response service returned {}",
                response.status()
            )));
        }

        let payload: GenerateResponse = response.json().await?;
        let reply = payload
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AppError::Service("Response service returned no text".to_string()))?;

        debug!(reply_chars = reply.len(), "Response generated");
        Ok(reply)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}
