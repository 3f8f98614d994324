//! Deterministic in-memory implementations of the scanner's seams.
//!
//! Each mock is cheap to clone-share via `Arc`, counts its calls, and can
//! be switched into a failing mode or slowed down from test code.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use perp_scanner::llm::SignalAnalyzer;
use perp_scanner::market::SnapshotSource;
use perp_scanner::notify::Notifier;
use perp_scanner::types::*;

// ---------------------------------------------------------------------------
// Snapshot source
// ---------------------------------------------------------------------------

pub struct MockSource {
    snapshot: Mutex<MarketSnapshot>,
    delay: Mutex<Duration>,
    force_error: Mutex<Option<ScanError>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockSource {
    pub fn new(tickers: Vec<TickerEntry>) -> Self {
        Self {
            snapshot: Mutex::new(snapshot(tickers)),
            delay: Mutex::new(Duration::ZERO),
            force_error: Mutex::new(None),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Fail every subsequent fetch with a network error on `feed`.
    pub fn set_error(&self, feed: &str) {
        *self.force_error.lock().unwrap() = Some(ScanError::network(feed, "simulated outage"));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of fetches ever observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for MockSource {
    async fn fetch_snapshot(&self) -> Result<MarketSnapshot, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(e) = self.force_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Answers for every requested symbol except those listed in `omit`, and
/// adds any `extra` symbols it was never asked about.
pub struct MockAnalyzer {
    omit: Mutex<Vec<String>>,
    extra: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
    force_error: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self {
            omit: Mutex::new(Vec::new()),
            extra: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
            force_error: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn omit(&self, symbol: &str) {
        self.omit.lock().unwrap().push(symbol.to_string());
    }

    pub fn invent(&self, symbol: &str) {
        self.extra.lock().unwrap().push(symbol.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalAnalyzer for MockAnalyzer {
    async fn analyze(
        &self,
        anomalies: &[Anomaly],
        _params: &ScanParameters,
    ) -> Result<ExternalAnalysisResult, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(ScanError::Enrichment(msg));
        }

        let omit = self.omit.lock().unwrap().clone();
        let mut signals: Vec<AnalyzedSignal> = anomalies
            .iter()
            .filter(|a| !omit.iter().any(|o| o == a.symbol()))
            .map(|a| analyzed(a.symbol(), a.price_change_pct().abs()))
            .collect();
        for symbol in self.extra.lock().unwrap().iter() {
            signals.push(analyzed(symbol, 99.0));
        }

        Ok(ExternalAnalysisResult {
            long_short_ratio: LongShortRatio { long: 61.0, short: 39.0 },
            signals,
        })
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

pub struct MockNotifier {
    delivered: Mutex<Vec<Uuid>>,
    force_error: Mutex<Option<String>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            force_error: Mutex::new(None),
        }
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Scan ids delivered so far, in delivery order.
    pub fn delivered(&self) -> Vec<Uuid> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, data: &MarketData) -> Result<(), ScanError> {
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(ScanError::Notification(msg));
        }
        self.delivered.lock().unwrap().push(data.scan_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn ticker(symbol: &str, change: f64, quote_volume: f64) -> TickerEntry {
    TickerEntry {
        symbol: symbol.to_string(),
        last_price: 3.0,
        volume_base: quote_volume / 3.0,
        quote_volume_usd: quote_volume,
        price_change_pct_24h: change,
    }
}

pub fn snapshot(tickers: Vec<TickerEntry>) -> MarketSnapshot {
    let active: ActiveSymbolSet = tickers.iter().map(|t| t.symbol.clone()).collect();
    MarketSnapshot {
        tickers: TickerSnapshot::new(tickers),
        active_symbols: active,
        indicators: MarketIndicators {
            btc_dominance_pct: 57.2,
            total_market_cap_usd: 2.6e12,
            fear_greed: FearGreedIndex {
                value: 65,
                classification: "Greed".into(),
            },
        },
    }
}

pub fn analyzed(symbol: &str, score: f64) -> AnalyzedSignal {
    AnalyzedSignal {
        symbol: symbol.to_string(),
        signal_type: SignalType::Pump,
        score,
        long_short_ratio: LongShortRatio { long: 70.0, short: 30.0 },
        funding_rate: 0.015,
        oi_change: IntervalChanges::default(),
        price_change_intervals: IntervalChanges::default(),
        significance: 2,
    }
}

/// The two-anomaly market used across scenarios: AAA +10%, BBB -8%, and a
/// quiet CCC that never qualifies.
pub fn two_anomaly_market() -> Vec<TickerEntry> {
    vec![
        ticker("AAAUSDT", 10.0, 2_000_000.0),
        ticker("BBBUSDT", -8.0, 1_000_000.0),
        ticker("CCCUSDT", 0.4, 50_000_000.0),
    ]
}
