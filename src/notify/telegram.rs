//! Telegram Bot API delivery.
//!
//! Sends one HTML-formatted message per scan via `sendMessage`. Scans with
//! no signals are not sent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::Notifier;
use crate::engine::ranker::MAX_SIGNALS;
use crate::types::{MarketData, ScanError, Signal, SignalType};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram's hard limit on message text length, in characters.
const MAX_MESSAGE_CHARS: usize = 4096;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct TelegramNotifier {
    http: Client,
    bot_token: SecretString,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: SecretString, chat_id: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Telegram HTTP client")?;

        Ok(Self { http, bot_token, chat_id })
    }

    async fn send_message(&self, text: &str) -> Result<()> {
        let url = format!(
            "{TELEGRAM_API_BASE}/bot{}/sendMessage",
            self.bot_token.expose_secret()
        );
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        // The URL embeds the token; never let reqwest's error text carry it.
        let resp = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Telegram request failed: {}", e.without_url()))?;

        let status = resp.status();
        let body: Option<TelegramResponse> = resp.json().await.ok();

        match body {
            Some(b) if status.is_success() && b.ok => Ok(()),
            Some(b) => anyhow::bail!(
                "Telegram API error {status}: {}",
                b.description.unwrap_or_else(|| "unknown error".into())
            ),
            None => anyhow::bail!("Telegram API error {status}: unreadable response"),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, data: &MarketData) -> Result<(), ScanError> {
        if data.signals.is_empty() {
            debug!(scan_id = %data.scan_id, "No signals, nothing to send");
            return Ok(());
        }

        let text = format_message(data);
        self.send_message(&text)
            .await
            .map_err(|e| ScanError::Notification(format!("{e:#}")))?;

        info!(scan_id = %data.scan_id, signals = data.signals.len(), "Telegram alert sent");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Render a scan as Telegram HTML.
///
/// Signal blocks that would push the message past Telegram's length limit
/// are left out whole, so tags are never cut in half.
pub fn format_message(data: &MarketData) -> String {
    let ind = &data.market_indicators;
    let mut out = String::with_capacity(2048);

    out.push_str("📉 <b>Market Status</b>\n");
    out.push_str(&format!("    ├─ BTC.D: <b>{:.2}%</b>\n", ind.btc_dominance_pct));
    out.push_str(&format!(
        "    ├─ Total Market Cap: <b>${}</b>\n",
        format_number(ind.total_market_cap_usd)
    ));
    out.push_str(&format!(
        "    └─ Fear &amp; Greed: <b>{}</b> ({})\n\n",
        ind.fear_greed.value,
        escape_html(&ind.fear_greed.classification)
    ));
    out.push_str(&format!(
        "📊 <b>Market-wide L/S:</b> {:.2}% Long / {:.2}% Short\n\n",
        data.long_short_ratio.long, data.long_short_ratio.short
    ));
    out.push_str("🚨 <b>Perp Anomaly Scan</b> 🚨\n\nTop scored signals:\n");

    let mut used = out.chars().count();
    let mut omitted = 0usize;

    for signal in data.signals.iter().take(MAX_SIGNALS) {
        let block = format!("\n{}\n", format_signal(signal));
        let len = block.chars().count();
        if used + len > MAX_MESSAGE_CHARS {
            omitted += 1;
            continue;
        }
        used += len;
        out.push_str(&block);
    }

    if omitted > 0 {
        debug!(omitted, "Signals left out of Telegram message to fit length limit");
    }

    out
}

fn format_signal(s: &Signal) -> String {
    let name = escape_html(s.display_name());
    let trading_view = format!("https://www.tradingview.com/chart/?symbol={}", s.symbol);
    let coinglass = format!("https://www.coinglass.com/tv/Binance_{}", s.display_name());

    let (icon, sign) = match s.signal_type {
        SignalType::Pump => ("🟢", "+"),
        SignalType::Dump => ("🔴", ""),
    };
    let stars = s.stars();
    let prefix = if stars.is_empty() { String::new() } else { format!("[{stars}] ") };

    let oi = &s.oi_change;
    let px = &s.price_change_intervals;

    format!(
        "{prefix}{icon} <b>{name}</b> | {} | Δ%: {sign}{:.2}% | Score: {:.2}\n\
         \x20   ├─ Funding: {:.4}%\n\
         \x20   ├─ OI Δ (5m/1h/24h): {:.2}% / {:.2}% / {:.2}%\n\
         \x20   ├─ Price Δ (5m/1h/24h): {:.2}% / {:.2}% / {:.2}%\n\
         \x20   └─ 🔗 <a href=\"{trading_view}\">TradingView</a> | <a href=\"{coinglass}\">CoinGlass</a>",
        s.signal_type,
        s.price_change_pct,
        s.score,
        s.funding_rate,
        oi.m5,
        oi.h1,
        oi.h24,
        px.m5,
        px.h1,
        px.h24,
    )
}

/// `2.45T`, `812.30B`, or the integer part with thousands separators.
pub fn format_number(n: f64) -> String {
    if n >= 1e12 {
        return format!("{:.2}T", n / 1e12);
    }
    if n >= 1e9 {
        return format!("{:.2}B", n / 1e9);
    }

    let digits = format!("{:.0}", n.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if n < 0.0 && digits != "0" {
        grouped.insert(0, '-');
    }
    grouped
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
