//! Chat completion providers
//!
//! `OpenAiChatProvider` talks to any OpenAI-compatible `/chat/completions`
//! endpoint (OpenAI, Groq, Ollama). `OfflineAnswerer` needs no network and
//! answers with the best-ranked context block.

use crate::config::LlmConfig;
use crate::error::{Result, SourcegateError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Instruction sent ahead of every grounded question
pub const SYSTEM_PROMPT: &str =
    "Answer using ONLY the provided context. If missing, say you don't know.";

/// Answers a question from a block of retrieved context
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, context: &str, question: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// User turn carrying context and question
pub fn user_prompt(context: &str, question: &str) -> String {
    format!("CONTEXT:\n{}\n\nQUESTION:\n{}", context, question)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completion API
pub struct OpenAiChatProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl OpenAiChatProvider {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourcegateError::Chat(format!("Failed to build HTTP client: {}", e)))?;

        let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        tracing::info!("Chat client configured: endpoint={}, model={}", endpoint, model);

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: model.to_string(),
            temperature,
        })
    }

    /// Build from config, reading the API key from the configured env var
    ///
    /// Ollama needs no key; other providers fail without one.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.is_empty());

        if api_key.is_none() && config.provider != "ollama" {
            return Err(SourcegateError::Chat(format!(
                "API key environment variable {} is not set",
                config.api_key_env
            )));
        }

        Self::new(
            &config.base_url,
            api_key,
            &config.model,
            config.temperature,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    async fn complete(&self, context: &str, question: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(context, question),
                },
            ],
            temperature: self.temperature,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SourcegateError::Chat(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourcegateError::Chat(format!(
                "Completion endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SourcegateError::Chat(format!("Malformed completion response: {}", e)))?;

        let answer = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        tracing::debug!("Completion returned {} characters", answer.len());
        Ok(answer)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Answer without a language model
///
/// Returns the first context block (the highest-ranked passage) verbatim.
#[derive(Debug, Clone, Default)]
pub struct OfflineAnswerer;

/// Fixed answer when no context could be retrieved
pub const NO_CONTEXT_ANSWER: &str = "I don't know. No relevant passages were found.";

#[async_trait]
impl ChatProvider for OfflineAnswerer {
    async fn complete(&self, context: &str, _question: &str) -> Result<String> {
        let best = context
            .split("\n\n[source=")
            .next()
            .map(str::trim)
            .unwrap_or_default();

        if best.is_empty() {
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }
        Ok(format!("Most relevant passage:\n{}", best))
    }

    fn name(&self) -> &str {
        "offline"
    }
}
