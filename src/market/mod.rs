//! Market snapshot acquisition.
//!
//! Defines the `SnapshotSource` trait and the live implementation that
//! pulls the Binance futures ticker feed, the exchange metadata and the
//! market-indicator feeds concurrently. Retrying is the scheduler's call,
//! never this layer's.

pub mod binance;
pub mod indicators;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ExchangeConfig;
use crate::types::{MarketSnapshot, ScanError};
use binance::BinanceFuturesClient;
use indicators::IndicatorsClient;

/// Feed names carried by `ScanError::Network`.
pub const FEED_TICKER: &str = "ticker";
pub const FEED_EXCHANGE_INFO: &str = "exchange_info";
pub const FEED_FEAR_GREED: &str = "fear_greed";
pub const FEED_GLOBAL_MARKET: &str = "global_market";

/// Abstraction over the authoritative market state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch tickers, active symbols and market indicators. Fails as a
    /// whole if any one of the underlying feeds fails.
    async fn fetch_snapshot(&self) -> Result<MarketSnapshot, ScanError>;
}

/// Live snapshot source backed by public REST endpoints.
pub struct MarketSnapshotFetcher {
    binance: BinanceFuturesClient,
    indicators: IndicatorsClient,
}

impl MarketSnapshotFetcher {
    pub fn new(cfg: &ExchangeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .user_agent(concat!("perp-scanner/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build market data HTTP client")?;

        Ok(Self {
            binance: BinanceFuturesClient::new(http.clone(), &cfg.futures_base_url),
            indicators: IndicatorsClient::new(
                http,
                &cfg.fear_greed_base_url,
                &cfg.coingecko_base_url,
            ),
        })
    }
}

#[async_trait]
impl SnapshotSource for MarketSnapshotFetcher {
    async fn fetch_snapshot(&self) -> Result<MarketSnapshot, ScanError> {
        debug!("Fetching market snapshot");

        let tickers = async {
            self.binance
                .fetch_tickers()
                .await
                .map_err(|e| ScanError::network(FEED_TICKER, format!("{e:#}")))
        };
        let active_symbols = async {
            self.binance
                .fetch_active_symbols()
                .await
                .map_err(|e| ScanError::network(FEED_EXCHANGE_INFO, format!("{e:#}")))
        };

        let (tickers, active_symbols, indicators) = tokio::try_join!(
            tickers,
            active_symbols,
            self.indicators.fetch_indicators(),
        )?;

        info!(
            tickers = tickers.len(),
            active_symbols = active_symbols.len(),
            btc_dominance = format!("{:.2}%", indicators.btc_dominance_pct),
            fear_greed = indicators.fear_greed.value,
            "Market snapshot fetched"
        );

        Ok(MarketSnapshot {
            tickers,
            active_symbols,
            indicators,
        })
    }
}
