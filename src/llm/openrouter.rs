//! OpenRouter LLM integration.
//!
//! Routes enrichment through OpenRouter's unified API, giving access to
//! multiple model providers with a single API key. Uses the OpenAI-compatible
//! chat completions format with JSON mode.
//!
//! No retries: a failed scan stops the scheduler, and the operator decides
//! when to try again. The optional fallback model is the only second attempt.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::prompt;
use super::SignalAnalyzer;
use crate::types::{Anomaly, ExternalAnalysisResult, ScanError, ScanParameters};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const DEFAULT_PRIMARY_MODEL: &str = "google/gemini-2.5-flash";

const DEFAULT_MAX_TOKENS: u32 = 8192;

// ---------------------------------------------------------------------------
// API types (OpenAI-compatible)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenRouterClient {
    http: Client,
    api_key: SecretString,
    primary_model: String,
    fallback_model: Option<String>,
    max_tokens: u32,
    total_calls: AtomicU64,
    fallback_calls: AtomicU64,
}

impl OpenRouterClient {
    /// Create a new OpenRouter client.
    ///
    /// - `primary_model`: model ID, e.g. "google/gemini-2.5-flash".
    /// - `fallback_model`: tried once if the primary call fails.
    pub fn new(
        api_key: SecretString,
        primary_model: Option<String>,
        fallback_model: Option<String>,
        max_tokens: Option<u32>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OpenRouter HTTP client")?;

        Ok(Self {
            http,
            api_key,
            primary_model: primary_model.unwrap_or_else(|| DEFAULT_PRIMARY_MODEL.to_string()),
            fallback_model,
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            total_calls: AtomicU64::new(0),
            fallback_calls: AtomicU64::new(0),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.primary_model
    }

    /// Total number of successful API calls made.
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Calls answered by the fallback model.
    pub fn fallback_calls(&self) -> u64 {
        self.fallback_calls.load(Ordering::Relaxed)
    }

    fn build_request(&self, model: &str, system: &str, user_message: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_message.to_string(),
                },
            ],
            response_format: ResponseFormat { kind: "json_object" },
        }
    }

    /// Send one chat completion request. Returns `(text, total_tokens)`.
    async fn call_model(&self, model: &str, system: &str, user_message: &str) -> Result<(String, u32)> {
        let request = self.build_request(model, system, user_message);

        let response = self
            .http
            .post(OPENROUTER_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .header("Content-Type", "application/json")
            .header("X-Title", "Perp Scanner")
            .json(&request)
            .send()
            .await
            .with_context(|| format!("OpenRouter request failed (model={model})"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenRouter API error {status} (model={model}): {error_text}");
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenRouter response")?;

        self.total_calls.fetch_add(1, Ordering::Relaxed);

        if let Some(actual) = body.model.as_deref() {
            if actual != model {
                debug!(requested = model, actual, "OpenRouter served a different model");
            }
        }

        let tokens = body.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0);
        let text = Self::extract_text(body)?;
        Ok((text, tokens))
    }

    fn extract_text(body: ChatResponse) -> Result<String> {
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .map(|m| m.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            anyhow::bail!("OpenRouter returned an empty completion");
        }
        Ok(text)
    }

    /// Call the primary model, falling back to the secondary if configured
    /// and the primary fails.
    async fn call_api(&self, system: &str, user_message: &str) -> Result<(String, u32)> {
        match self.call_model(&self.primary_model, system, user_message).await {
            Ok(result) => Ok(result),
            Err(primary_err) => {
                let Some(fallback) = self.fallback_model.as_deref() else {
                    return Err(primary_err);
                };
                warn!(
                    primary = %self.primary_model,
                    fallback,
                    error = %primary_err,
                    "Primary model failed, falling back"
                );
                let result = self
                    .call_model(fallback, system, user_message)
                    .await
                    .with_context(|| {
                        format!(
                            "Both primary ({}) and fallback ({}) models failed. Primary error: {}",
                            self.primary_model, fallback, primary_err
                        )
                    })?;
                self.fallback_calls.fetch_add(1, Ordering::Relaxed);
                Ok(result)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SignalAnalyzer implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl SignalAnalyzer for OpenRouterClient {
    async fn analyze(
        &self,
        anomalies: &[Anomaly],
        params: &ScanParameters,
    ) -> Result<ExternalAnalysisResult, ScanError> {
        let system = prompt::system_prompt();
        let user_msg = prompt::build_analysis_prompt(anomalies, params);

        debug!(
            count = anomalies.len(),
            model = %self.primary_model,
            "Requesting enrichment via OpenRouter"
        );

        let (text, tokens) = self
            .call_api(system, &user_msg)
            .await
            .map_err(|e| ScanError::Enrichment(format!("{e:#}")))?;

        let result = prompt::parse_analysis(&text)?;

        info!(
            requested = anomalies.len(),
            returned = result.signals.len(),
            tokens,
            "Enrichment complete (OpenRouter)"
        );

        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
