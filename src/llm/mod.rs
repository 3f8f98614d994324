//! LLM integration for anomaly enrichment.
//!
//! Defines the `SignalAnalyzer` trait and provides implementations for
//! Gemini (native structured output) and OpenRouter (OpenAI-compatible
//! JSON mode). Both share the prompt and the response validation in
//! `prompt`.

pub mod gemini;
pub mod openrouter;
pub mod prompt;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{AppConfig, LlmConfig};
use crate::types::{Anomaly, ExternalAnalysisResult, ScanError, ScanParameters};
use gemini::GeminiClient;
use openrouter::OpenRouterClient;

/// Abstraction over the external enrichment service.
///
/// Implementors send the anomaly batch to a model and return its validated,
/// still untrusted, answer. Symbols in the answer are not guaranteed to be
/// a subset of the request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        anomalies: &[Anomaly],
        params: &ScanParameters,
    ) -> Result<ExternalAnalysisResult, ScanError>;
}

/// Build the configured analyzer. Unknown providers fall back to Gemini.
pub fn build_analyzer(cfg: &LlmConfig) -> Result<Box<dyn SignalAnalyzer>> {
    let api_key = AppConfig::resolve_secret(&cfg.api_key_env)?;
    let timeout = Duration::from_secs(cfg.timeout_secs);

    let analyzer: Box<dyn SignalAnalyzer> = match cfg.provider.as_str() {
        "openrouter" => {
            let client = OpenRouterClient::new(
                api_key,
                Some(cfg.model.clone()),
                cfg.fallback_model.clone(),
                Some(cfg.max_tokens),
                timeout,
            )?;
            info!(
                provider = "openrouter",
                model = client.model_name(),
                fallback = ?cfg.fallback_model,
                "LLM analyzer initialised"
            );
            Box::new(client)
        }
        other => {
            if other != "gemini" {
                warn!(provider = other, "Unknown LLM provider, defaulting to Gemini");
            }
            let client = GeminiClient::new(api_key, Some(cfg.model.clone()), Some(cfg.max_tokens), timeout)?;
            info!(provider = "gemini", model = client.model_name(), "LLM analyzer initialised");
            Box::new(client)
        }
    };

    Ok(analyzer)
}
