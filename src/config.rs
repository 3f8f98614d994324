//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys, bot tokens) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::types::ScanParameters;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    /// Initial scan parameters; the operator may change them while idle.
    #[serde(flatten)]
    pub parameters: ScanParameters,
    /// Start scanning immediately on launch instead of waiting for the
    /// operator.
    #[serde(default)]
    pub auto_start: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    #[serde(default = "default_futures_base_url")]
    pub futures_base_url: String,
    #[serde(default = "default_fear_greed_base_url")]
    pub fear_greed_base_url: String,
    #[serde(default = "default_coingecko_base_url")]
    pub coingecko_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_futures_base_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_fear_greed_base_url() -> String {
    "https://api.alternative.me".to_string()
}

fn default_coingecko_base_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            futures_base_url: default_futures_base_url(),
            fear_greed_base_url: default_fear_greed_base_url(),
            coingecko_base_url: default_coingecko_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// "gemini" | "openrouter"
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    /// Upper bound on one enrichment call, including the HTTP round-trip.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Fallback model for OpenRouter (used when primary model fails).
    #[serde(default)]
    pub fallback_model: Option<String>,
}

fn default_llm_timeout_secs() -> u64 {
    90
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    #[serde(default = "default_true")]
    pub auto_notify: bool,
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            auto_notify: true,
            telegram_bot_token_env: None,
            telegram_chat_id_env: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(contents).context("Failed to parse config TOML")?;
        config
            .scanner
            .parameters
            .validate()
            .context("Invalid [scanner] parameters")?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve an environment variable holding a secret.
    pub fn resolve_secret(env_name: &str) -> Result<SecretString> {
        Self::resolve_env(env_name).map(SecretString::new)
    }
}
