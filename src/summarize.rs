//! Optional natural-language summary of the retrieved rows.
//!
//! A single request goes to an OpenAI-compatible `POST /chat/completions`
//! endpoint. The whole path is best-effort: every failure (missing key,
//! HTTP error, malformed body, timeout) is logged and turned into `None`,
//! so the caller's output and exit code never depend on it.
//!
//! # Timeout
//!
//! With [`Deadline::Soft`] (the default) the call runs to completion and its
//! wall-clock duration is checked afterwards; a late answer is discarded even
//! though it arrived. [`Deadline::Hard`] cancels the call when the timeout
//! passes. In both modes the HTTP client carries a transport ceiling
//! (`llm.request_timeout_secs`), so a stalled endpoint still ends in `None`.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::{Config, Deadline, LlmConfig};
use crate::models::{CatalogRow, Language, QueryRequest};

/// One message in a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body of a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// A text-completion backend.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send one request and return the raw completion text.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

// ============ OpenAI ============

/// Client for the OpenAI chat completions API (or a compatible server).
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    /// `request_timeout` bounds the whole HTTP exchange, so a stalled
    /// endpoint cannot keep the process alive past it.
    pub fn new(api_key: &str, base_url: &str, request_timeout: Duration) -> Result<Self> {
        if api_key.is_empty() {
            bail!("OpenAI API key cannot be empty");
        }
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_completion(json)
    }
}

/// Extract `choices[0].message.content` from a chat completion response.
fn parse_completion(json: serde_json::Value) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_value(json)
        .map_err(|e| anyhow!("Invalid OpenAI response: {}", e))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing message content"))
}

// ============ Prompt ============

/// Build the single user prompt from the retrieved rows.
pub fn build_prompt(rows: &[CatalogRow], language: Language) -> String {
    let lines: Vec<String> = rows.iter().map(CatalogRow::context_line).collect();
    format!(
        "Language: {}\nContesto (lista voci):\n- {}\n\nRispondi in modo sintetico.",
        language,
        lines.join("\n- ")
    )
}

pub fn build_request(llm: &LlmConfig, prompt: String) -> ChatRequest {
    ChatRequest {
        model: llm.model.clone(),
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: prompt,
        }],
        temperature: llm.temperature,
        max_tokens: llm.max_tokens,
    }
}

// ============ Entry points ============

/// Summarize `rows` with `client`, honouring `timeout` per `llm.deadline`.
///
/// Returns `None` when there is nothing to summarize, when the call fails,
/// when it took longer than `timeout`, or when the answer is blank.
pub async fn summarize(
    client: &dyn CompletionClient,
    llm: &LlmConfig,
    rows: &[CatalogRow],
    language: Language,
    timeout: Duration,
) -> Option<String> {
    if rows.is_empty() {
        return None;
    }

    let request = build_request(llm, build_prompt(rows, language));

    let start = Instant::now();
    let result = match llm.deadline {
        Deadline::Soft => client.complete(&request).await,
        Deadline::Hard => match tokio::time::timeout(timeout, client.complete(&request)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("completion cancelled after {:?}", timeout)),
        },
    };
    let elapsed = start.elapsed();

    if elapsed > timeout {
        tracing::warn!(
            elapsed_ms = elapsed.as_millis() as u64,
            timeout_secs = timeout.as_secs(),
            "summary discarded: completion exceeded timeout"
        );
        return None;
    }

    match result {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                tracing::debug!("completion returned an empty answer");
                None
            } else {
                Some(text.to_string())
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "summary unavailable");
            None
        }
    }
}

/// Summarize if the request allows it and a credential is configured.
pub async fn maybe_summarize(
    config: &Config,
    request: &QueryRequest,
    rows: &[CatalogRow],
) -> Option<String> {
    if !request.summarization_enabled {
        return None;
    }
    let Some(api_key) = config.openai_api_key.as_deref() else {
        tracing::debug!("OPENAI_API_KEY not set, skipping summary");
        return None;
    };
    if rows.is_empty() {
        return None;
    }

    let client = match OpenAiClient::new(
        api_key,
        &config.llm.base_url,
        Duration::from_secs(config.llm.request_timeout_secs),
    ) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "could not create completion client");
            return None;
        }
    };

    summarize(
        &client,
        &config.llm,
        rows,
        request.language,
        request.summarization_timeout,
    )
    .await
}
