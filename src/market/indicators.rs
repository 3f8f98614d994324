//! Market-wide indicator feeds.
//!
//! - Fear & greed: `https://api.alternative.me/fng/?limit=1`
//! - BTC dominance and total market cap: `https://api.coingecko.com/api/v3/global`
//!
//! Both are free, keyless endpoints. The two requests run concurrently and
//! either failure fails the whole indicator fetch.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;

use super::{FEED_FEAR_GREED, FEED_GLOBAL_MARKET};
use crate::types::{FearGreedIndex, MarketIndicators, ScanError};

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FearGreedResponse {
    #[serde(default)]
    data: Vec<FearGreedEntry>,
}

#[derive(Debug, Deserialize)]
struct FearGreedEntry {
    /// String-encoded integer, e.g. `"54"`.
    value: String,
    value_classification: String,
}

#[derive(Debug, Deserialize)]
struct GlobalResponse {
    data: GlobalData,
}

#[derive(Debug, Deserialize)]
struct GlobalData {
    #[serde(default)]
    market_cap_percentage: HashMap<String, f64>,
    #[serde(default)]
    total_market_cap: HashMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct IndicatorsClient {
    http: Client,
    fear_greed_base_url: String,
    coingecko_base_url: String,
}

impl IndicatorsClient {
    pub fn new(http: Client, fear_greed_base_url: &str, coingecko_base_url: &str) -> Self {
        Self {
            http,
            fear_greed_base_url: fear_greed_base_url.trim_end_matches('/').to_string(),
            coingecko_base_url: coingecko_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch both indicator feeds concurrently.
    pub async fn fetch_indicators(&self) -> Result<MarketIndicators, ScanError> {
        let fear_greed = async {
            self.fetch_fear_greed()
                .await
                .map_err(|e| ScanError::network(FEED_FEAR_GREED, format!("{e:#}")))
        };
        let global = async {
            self.fetch_global()
                .await
                .map_err(|e| ScanError::network(FEED_GLOBAL_MARKET, format!("{e:#}")))
        };

        let (fear_greed, (btc_dominance_pct, total_market_cap_usd)) =
            futures::future::try_join(fear_greed, global).await?;

        Ok(MarketIndicators {
            btc_dominance_pct,
            total_market_cap_usd,
            fear_greed,
        })
    }

    async fn fetch_fear_greed(&self) -> Result<FearGreedIndex> {
        let url = format!("{}/fng/?limit=1", self.fear_greed_base_url);
        let resp = self.http.get(&url).send().await
            .context("Fear & greed request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Fear & greed API error: {status}");
        }

        let body: FearGreedResponse = resp.json().await
            .context("Failed to parse fear & greed response")?;

        Self::parse_fear_greed(body)
    }

    async fn fetch_global(&self) -> Result<(f64, f64)> {
        let url = format!("{}/global", self.coingecko_base_url);
        let resp = self.http.get(&url).send().await
            .context("CoinGecko global request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("CoinGecko global API error: {status}");
        }

        let body: GlobalResponse = resp.json().await
            .context("Failed to parse CoinGecko global response")?;

        Self::parse_global(body)
    }

    fn parse_fear_greed(body: FearGreedResponse) -> Result<FearGreedIndex> {
        let entry = body.data.into_iter().next()
            .context("Fear & greed response contained no data points")?;

        let value: u32 = entry.value.trim().parse()
            .with_context(|| format!("Fear & greed value is not an integer: {:?}", entry.value))?;
        if value > 100 {
            anyhow::bail!("Fear & greed value out of range: {value}");
        }

        Ok(FearGreedIndex {
            value: value as u8,
            classification: entry.value_classification,
        })
    }

    /// Returns `(btc_dominance_pct, total_market_cap_usd)`.
    fn parse_global(body: GlobalResponse) -> Result<(f64, f64)> {
        let btc = body.data.market_cap_percentage.get("btc").copied()
            .filter(|v| v.is_finite())
            .context("CoinGecko global response missing BTC dominance")?;
        let usd = body.data.total_market_cap.get("usd").copied()
            .filter(|v| v.is_finite())
            .context("CoinGecko global response missing USD market cap")?;
        Ok((btc, usd))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
