//! Google Gemini integration.
//!
//! Uses the `generateContent` endpoint with a response schema so the model
//! is constrained to the analysis JSON shape. The answer still goes through
//! `prompt::parse_analysis`; a schema is a hint, not a guarantee.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::prompt;
use super::SignalAnalyzer;
use crate::types::{Anomaly, ExternalAnalysisResult, ScanError, ScanParameters};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const DEFAULT_MAX_TOKENS: u32 = 8192;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: u32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GeminiClient {
    http: Client,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    total_calls: AtomicU64,
}

impl GeminiClient {
    pub fn new(
        api_key: SecretString,
        model: Option<String>,
        max_tokens: Option<u32>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Gemini HTTP client")?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            total_calls: AtomicU64::new(0),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Total number of API calls made.
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    fn build_request(&self, system: &str, user_message: &str) -> GenerateRequest {
        GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: Some(system.to_string()) }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: Some(user_message.to_string()) }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: prompt::response_schema(),
                max_output_tokens: self.max_tokens,
            },
        }
    }

    /// Returns `(text, total_tokens)`.
    async fn call_api(&self, system: &str, user_message: &str) -> Result<(String, u32)> {
        let url = format!("{GEMINI_API_BASE}/{}:generateContent", self.model);
        let request = self.build_request(system, user_message);

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error {status} (model={}): {error_text}", self.model);
        }

        let body: GenerateResponse = resp.json().await
            .context("Failed to parse Gemini response")?;

        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let tokens = body.usage_metadata.as_ref().map(|u| u.total_token_count).unwrap_or(0);
        let text = Self::extract_text(body)?;
        Ok((text, tokens))
    }

    /// Concatenate the text parts of the first candidate.
    fn extract_text(body: GenerateResponse) -> Result<String> {
        let candidate = body.candidates.into_iter().next()
            .context("Gemini returned no candidates")?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            anyhow::bail!(
                "Gemini returned no content (finish_reason={})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            );
        }
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// SignalAnalyzer implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl SignalAnalyzer for GeminiClient {
    async fn analyze(
        &self,
        anomalies: &[Anomaly],
        params: &ScanParameters,
    ) -> Result<ExternalAnalysisResult, ScanError> {
        let system = prompt::system_prompt();
        let user_msg = prompt::build_analysis_prompt(anomalies, params);

        debug!(count = anomalies.len(), model = %self.model, "Requesting enrichment via Gemini");

        let (text, tokens) = self
            .call_api(system, &user_msg)
            .await
            .map_err(|e| ScanError::Enrichment(format!("{e:#}")))?;

        let result = prompt::parse_analysis(&text)?;

        info!(
            requested = anomalies.len(),
            returned = result.signals.len(),
            tokens,
            "Enrichment complete (Gemini)"
        );

        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
