//! Shared types for the scanner.
//!
//! Market data flows through these types from the exchange feeds, through
//! anomaly detection and enrichment reconciliation, and ends up in the
//! ranked `MarketData` handed to the display and notification collaborators.
//! Numeric market fields always come from the exchange; only the fields on
//! `AnalyzedSignal` originate from the enrichment service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Exchange tag used in canonical signal symbols (`BINANCE:BTCUSDTPERP`).
pub const EXCHANGE_TAG: &str = "BINANCE";

// ---------------------------------------------------------------------------
// Ticker snapshot
// ---------------------------------------------------------------------------

/// One perpetual contract's 24h ticker, decoded from the exchange feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerEntry {
    pub symbol: String,
    pub last_price: f64,
    /// 24h volume in the base asset.
    pub volume_base: f64,
    /// 24h volume in the quote asset (USDT ≈ USD).
    pub quote_volume_usd: f64,
    pub price_change_pct_24h: f64,
}

impl TickerEntry {
    pub fn abs_price_change(&self) -> f64 {
        self.price_change_pct_24h.abs()
    }
}

impl fmt::Display for TickerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} ({:+.2}% | vol ${:.0})",
            self.symbol, self.last_price, self.price_change_pct_24h, self.quote_volume_usd,
        )
    }
}

/// The full ticker feed as fetched in one request. Replaced wholesale on
/// every scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub entries: Vec<TickerEntry>,
    pub fetched_at: DateTime<Utc>,
}

impl TickerSnapshot {
    pub fn new(entries: Vec<TickerEntry>) -> Self {
        Self {
            entries,
            fetched_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Symbols currently trading as USDT-margined perpetuals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSymbolSet(HashSet<String>);

impl ActiveSymbolSet {
    pub fn contains(&self, symbol: &str) -> bool {
        self.0.contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<String> for ActiveSymbolSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for ActiveSymbolSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(String::from).collect())
    }
}

// ---------------------------------------------------------------------------
// Market indicators
// ---------------------------------------------------------------------------

/// Crypto fear & greed index (0 = extreme fear, 100 = extreme greed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FearGreedIndex {
    pub value: u8,
    pub classification: String,
}

/// Market-wide context fetched alongside the ticker snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketIndicators {
    pub btc_dominance_pct: f64,
    pub total_market_cap_usd: f64,
    pub fear_greed: FearGreedIndex,
}

/// Everything one scan needs from the network, fetched concurrently.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub tickers: TickerSnapshot,
    pub active_symbols: ActiveSymbolSet,
    pub indicators: MarketIndicators,
}

// ---------------------------------------------------------------------------
// Anomaly
// ---------------------------------------------------------------------------

/// A ticker entry selected by the detector.
///
/// Wraps the entry immutably: enrichment reads these fields but can never
/// change them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly(TickerEntry);

impl Anomaly {
    pub fn new(entry: TickerEntry) -> Self {
        Self(entry)
    }

    pub fn ticker(&self) -> &TickerEntry {
        &self.0
    }

    pub fn symbol(&self) -> &str {
        &self.0.symbol
    }

    pub fn price_change_pct(&self) -> f64 {
        self.0.price_change_pct_24h
    }

    pub fn quote_volume_usd(&self) -> f64 {
        self.0.quote_volume_usd
    }
}

// ---------------------------------------------------------------------------
// Enrichment result
// ---------------------------------------------------------------------------

/// Direction of an anomalous move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Pump,
    Dump,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalType::Pump => write!(f, "PUMP"),
            SignalType::Dump => write!(f, "DUMP"),
        }
    }
}

/// Long/short account ratio, expressed as percentages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LongShortRatio {
    pub long: f64,
    pub short: f64,
}

impl LongShortRatio {
    /// 50/50, used when there is nothing to analyse.
    pub fn neutral() -> Self {
        Self {
            long: 50.0,
            short: 50.0,
        }
    }
}

/// Percentage changes over the standard lookback windows.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IntervalChanges {
    #[serde(rename = "5m")]
    pub m5: f64,
    #[serde(rename = "15m")]
    pub m15: f64,
    #[serde(rename = "1h")]
    pub h1: f64,
    #[serde(rename = "4h")]
    pub h4: f64,
    #[serde(rename = "8h")]
    pub h8: f64,
    #[serde(rename = "24h")]
    pub h24: f64,
}

impl IntervalChanges {
    pub fn is_finite(&self) -> bool {
        [self.m5, self.m15, self.h1, self.h4, self.h8, self.h24]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// One entry of the enrichment service's answer. `symbol` is whatever the
/// service claimed and is only ever used for matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedSignal {
    pub symbol: String,
    #[serde(rename = "signal")]
    pub signal_type: SignalType,
    pub score: f64,
    pub long_short_ratio: LongShortRatio,
    pub funding_rate: f64,
    pub oi_change: IntervalChanges,
    pub price_change_intervals: IntervalChanges,
    /// 1 (low) to 3 (high). Integral floats such as `2.0` are accepted.
    #[serde(deserialize_with = "integral_level")]
    pub significance: u8,
}

fn integral_level<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value = f64::deserialize(deserializer)?;
    if value.fract() == 0.0 && (0.0..=f64::from(u8::MAX)).contains(&value) {
        Ok(value as u8)
    } else {
        Err(D::Error::custom(format!("significance must be a small whole number, got {value}")))
    }
}

/// Validated enrichment answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalAnalysisResult {
    /// Market-wide estimate, passed through uninterpreted.
    pub long_short_ratio: LongShortRatio,
    pub signals: Vec<AnalyzedSignal>,
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// A reconciled anomaly: exchange numbers plus enrichment fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Canonical `BINANCE:{SYMBOL}PERP` form.
    pub symbol: String,
    #[serde(rename = "signal")]
    pub signal_type: SignalType,
    pub price_change_pct: f64,
    pub price: f64,
    pub last_vol: f64,
    /// Hourly average of the 24h base volume.
    pub avg_vol: f64,
    pub last_vol_usd: f64,
    pub score: f64,
    pub long_short_ratio: LongShortRatio,
    pub funding_rate: f64,
    pub oi_change: IntervalChanges,
    pub price_change_intervals: IntervalChanges,
    pub significance: u8,
}

impl Signal {
    /// Exchange symbol without the canonical decoration (`BTCUSDT`).
    pub fn display_name(&self) -> &str {
        let s = self.symbol.as_str();
        let s = s
            .strip_prefix(EXCHANGE_TAG)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(s);
        s.strip_suffix("PERP").unwrap_or(s)
    }

    pub fn stars(&self) -> String {
        "★".repeat(self.significance as usize)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {:+.2}% score {:.2} ({})",
            self.signal_type,
            self.display_name(),
            self.price_change_pct,
            self.score,
            self.stars(),
        )
    }
}

/// Result of one completed scan, handed to display and notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub scan_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub signals: Vec<Signal>,
    pub long_short_ratio: LongShortRatio,
    pub market_indicators: MarketIndicators,
}

// ---------------------------------------------------------------------------
// Scan parameters
// ---------------------------------------------------------------------------

/// Operator-tunable scan configuration.
///
/// `chart_interval_min`, `lookback_candles` and `volume_multiplier` are
/// forwarded to the enrichment prompt; the detector only uses the price and
/// volume thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParameters {
    pub chart_interval_min: u32,
    pub scan_interval_min: u32,
    pub lookback_candles: u32,
    pub price_change_threshold_pct: f64,
    pub volume_multiplier: f64,
    pub min_volume_usd: f64,
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            chart_interval_min: 15,
            scan_interval_min: 5,
            lookback_candles: 50,
            price_change_threshold_pct: 2.0,
            volume_multiplier: 3.0,
            min_volume_usd: 500_000.0,
        }
    }
}

impl ScanParameters {
    pub fn validate(&self) -> Result<(), ControlError> {
        let invalid = |msg: String| Err(ControlError::InvalidParameters(msg));

        if self.chart_interval_min < 1 {
            return invalid("chart_interval_min must be >= 1".into());
        }
        if self.scan_interval_min < 1 {
            return invalid("scan_interval_min must be >= 1".into());
        }
        if self.lookback_candles < 10 {
            return invalid("lookback_candles must be >= 10".into());
        }
        if !self.price_change_threshold_pct.is_finite() || self.price_change_threshold_pct < 0.0 {
            return invalid(format!(
                "price_change_threshold_pct must be >= 0, got {}",
                self.price_change_threshold_pct
            ));
        }
        if !self.volume_multiplier.is_finite() || self.volume_multiplier < 1.0 {
            return invalid(format!(
                "volume_multiplier must be >= 1, got {}",
                self.volume_multiplier
            ));
        }
        if !self.min_volume_usd.is_finite() || self.min_volume_usd < 0.0 {
            return invalid(format!(
                "min_volume_usd must be >= 0, got {}",
                self.min_volume_usd
            ));
        }
        Ok(())
    }

    /// Scheduler period.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.countdown_secs())
    }

    /// Countdown start value, in seconds.
    pub fn countdown_secs(&self) -> u64 {
        u64::from(self.scan_interval_min) * 60
    }
}

// ---------------------------------------------------------------------------
// Scheduler state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerPhase {
    Idle,
    Active,
}

impl fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerPhase::Idle => write!(f, "IDLE"),
            SchedulerPhase::Active => write!(f, "ACTIVE"),
        }
    }
}

/// Observable scheduler state.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSchedulerState {
    pub phase: SchedulerPhase,
    pub countdown_secs: u64,
    pub last_error: Option<ScanError>,
    pub scans_completed: u64,
    pub scans_failed: u64,
    pub last_scan_at: Option<DateTime<Utc>>,
}

impl ScanSchedulerState {
    pub fn new() -> Self {
        Self {
            phase: SchedulerPhase::Idle,
            countdown_secs: 0,
            last_error: None,
            scans_completed: 0,
            scans_failed: 0,
            last_scan_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase == SchedulerPhase::Active
    }
}

impl Default for ScanSchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Published by the scheduler for every settled scan and every stop.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Completed(MarketData),
    Failed(ScanError),
    Stopped,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that abort a scan (and, while scheduled, stop the scheduler).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScanError {
    #[error("Network error ({feed}): {message}")]
    Network { feed: String, message: String },

    #[error("Enrichment error: {0}")]
    Enrichment(String),

    /// Only ever logged; delivery failures never abort a scan.
    #[error("Notification error: {0}")]
    Notification(String),
}

impl ScanError {
    pub fn network(feed: &str, err: impl fmt::Display) -> Self {
        ScanError::Network {
            feed: feed.to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors returned to the operator by scheduler controls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error("Scanner is already active")]
    AlreadyActive,

    #[error("Scanner is not active")]
    NotActive,

    #[error("Parameters cannot be changed while scanning is active")]
    ParametersLocked,

    #[error("Invalid scan parameters: {0}")]
    InvalidParameters(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_signal() -> Signal {
        Signal {
            symbol: "BINANCE:SOLUSDTPERP".into(),
            signal_type: SignalType::Pump,
            price_change_pct: 12.5,
            price: 180.0,
            last_vol: 2_400_000.0,
            avg_vol: 100_000.0,
            last_vol_usd: 432_000_000.0,
            score: 8.7,
            long_short_ratio: LongShortRatio { long: 62.0, short: 38.0 },
            funding_rate: 0.012,
            oi_change: IntervalChanges::default(),
            price_change_intervals: IntervalChanges::default(),
            significance: 2,
        }
    }

    // -- ScanParameters --

    #[test]
    fn test_default_parameters_are_valid() {
        let params = ScanParameters::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.scan_interval_min, 5);
        assert_eq!(params.countdown_secs(), 300);
        assert_eq!(params.scan_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_parameter_bounds() {
        let base = ScanParameters::default();

        let p = ScanParameters { scan_interval_min: 0, ..base.clone() };
        assert!(p.validate().is_err());

        let p = ScanParameters { chart_interval_min: 0, ..base.clone() };
        assert!(p.validate().is_err());

        let p = ScanParameters { lookback_candles: 9, ..base.clone() };
        assert!(p.validate().is_err());

        let p = ScanParameters { price_change_threshold_pct: -0.1, ..base.clone() };
        assert!(p.validate().is_err());

        let p = ScanParameters { volume_multiplier: 0.5, ..base.clone() };
        assert!(p.validate().is_err());

        let p = ScanParameters { min_volume_usd: f64::NAN, ..base.clone() };
        assert!(p.validate().is_err());

        let p = ScanParameters {
            price_change_threshold_pct: 0.0,
            min_volume_usd: 0.0,
            volume_multiplier: 1.0,
            lookback_candles: 10,
            ..base
        };
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_invalid_parameters_message() {
        let p = ScanParameters { lookback_candles: 3, ..Default::default() };
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("lookback_candles"));
    }

    // -- Signal --

    #[test]
    fn test_signal_display_name() {
        let s = sample_signal();
        assert_eq!(s.display_name(), "SOLUSDT");
    }

    #[test]
    fn test_signal_stars() {
        let mut s = sample_signal();
        assert_eq!(s.stars(), "★★");
        s.significance = 3;
        assert_eq!(s.stars(), "★★★");
    }

    #[test]
    fn test_signal_display() {
        let display = format!("{}", sample_signal());
        assert!(display.contains("PUMP"));
        assert!(display.contains("SOLUSDT"));
        assert!(display.contains("+12.50%"));
    }

    #[test]
    fn test_signal_type_serde() {
        assert_eq!(serde_json::to_string(&SignalType::Pump).unwrap(), "\"PUMP\"");
        let t: SignalType = serde_json::from_str("\"DUMP\"").unwrap();
        assert_eq!(t, SignalType::Dump);
        assert!(serde_json::from_str::<SignalType>("\"SIDEWAYS\"").is_err());
    }

    #[test]
    fn test_interval_changes_keys() {
        let json = r#"{"5m":1.0,"15m":2.0,"1h":3.0,"4h":4.0,"8h":5.0,"24h":6.0}"#;
        let c: IntervalChanges = serde_json::from_str(json).unwrap();
        assert_eq!(c.m5, 1.0);
        assert_eq!(c.h24, 6.0);
        assert!(c.is_finite());

        let out = serde_json::to_string(&c).unwrap();
        assert!(out.contains("\"15m\""));
    }

    #[test]
    fn test_neutral_ratio() {
        let r = LongShortRatio::neutral();
        assert_eq!(r.long, 50.0);
        assert_eq!(r.short, 50.0);
    }

    // -- ActiveSymbolSet --

    #[test]
    fn test_active_symbol_set() {
        let set: ActiveSymbolSet = ["BTCUSDT", "ETHUSDT"].into_iter().collect();
        assert!(set.contains("BTCUSDT"));
        assert!(!set.contains("ALPACAUSDT"));
        assert_eq!(set.len(), 2);
    }

    // -- Errors --

    #[test]
    fn test_scan_error_display() {
        let e = ScanError::network("ticker", "HTTP 503");
        assert_eq!(e.to_string(), "Network error (ticker): HTTP 503");

        let e = ScanError::Enrichment("timed out".into());
        assert!(e.to_string().contains("timed out"));
    }

    #[test]
    fn test_scheduler_state_initial() {
        let s = ScanSchedulerState::new();
        assert!(!s.is_active());
        assert_eq!(s.countdown_secs, 0);
        assert!(s.last_error.is_none());
    }
}
