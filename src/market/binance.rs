//! Binance USDⓈ-M futures public REST integration.
//!
//! API: `https://fapi.binance.com/fapi/v1/`
//! Auth: None required for market data.
//! Numbers: ticker fields are string-encoded decimals and are decoded to
//! `f64` before use.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::types::{ActiveSymbolSet, TickerEntry, TickerSnapshot};

// ---------------------------------------------------------------------------
// API response types (Binance JSON → Rust)
// ---------------------------------------------------------------------------

/// One element of `GET /fapi/v1/ticker/24hr`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    symbol: String,
    price_change_percent: String,
    quote_volume: String,
    last_price: String,
    volume: String,
}

/// `GET /fapi/v1/exchangeInfo`, reduced to what we read.
#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    #[serde(default)]
    symbols: Vec<RawSymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSymbolInfo {
    symbol: String,
    #[serde(default)]
    contract_type: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    quote_asset: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BinanceFuturesClient {
    http: Client,
    base_url: String,
}

impl BinanceFuturesClient {
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the 24h ticker for every listed perpetual.
    pub async fn fetch_tickers(&self) -> Result<TickerSnapshot> {
        let url = format!("{}/fapi/v1/ticker/24hr", self.base_url);
        let resp = self.http.get(&url).send().await
            .context("Binance 24h ticker request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Binance 24h ticker API error: {status}");
        }

        let raw: Vec<RawTicker> = resp.json().await
            .context("Failed to parse Binance 24h ticker response")?;

        Ok(Self::decode_tickers(raw))
    }

    /// Fetch the set of USDT perpetuals currently in `TRADING` status.
    pub async fn fetch_active_symbols(&self) -> Result<ActiveSymbolSet> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let resp = self.http.get(&url).send().await
            .context("Binance exchangeInfo request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Binance exchangeInfo API error: {status}");
        }

        let info: ExchangeInfo = resp.json().await
            .context("Failed to parse Binance exchangeInfo response")?;

        Ok(Self::active_symbols(info))
    }

    fn decode_tickers(raw: Vec<RawTicker>) -> TickerSnapshot {
        let total = raw.len();
        let entries: Vec<TickerEntry> = raw.iter().filter_map(Self::decode_ticker).collect();

        if entries.len() < total {
            debug!(
                skipped = total - entries.len(),
                total,
                "Skipped ticker entries with undecodable numbers"
            );
        }

        TickerSnapshot::new(entries)
    }

    /// Decode one ticker; `None` if any numeric field is not a finite number.
    fn decode_ticker(raw: &RawTicker) -> Option<TickerEntry> {
        let num = |s: &str| s.trim().parse::<f64>().ok().filter(|v| v.is_finite());

        Some(TickerEntry {
            symbol: raw.symbol.clone(),
            last_price: num(&raw.last_price)?,
            volume_base: num(&raw.volume)?,
            quote_volume_usd: num(&raw.quote_volume)?,
            price_change_pct_24h: num(&raw.price_change_percent)?,
        })
    }

    fn active_symbols(info: ExchangeInfo) -> ActiveSymbolSet {
        info.symbols
            .into_iter()
            .filter(|s| {
                s.contract_type == "PERPETUAL" && s.status == "TRADING" && s.quote_asset == "USDT"
            })
            .map(|s| s.symbol)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
