//! Enrichment reconciliation.
//!
//! Merges the enrichment service's answer onto the trusted anomaly list.
//! The anomaly list drives the iteration: every output signal is built from
//! an anomaly we actually requested, and the external answer only ever
//! contributes its speculative fields. Symbols the service invents are
//! ignored; symbols it omits are dropped from the output.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::types::{AnalyzedSignal, Anomaly, ExternalAnalysisResult, Signal, EXCHANGE_TAG};

/// Normalise a symbol for matching only.
///
/// Strips a leading `BINANCE:` tag, upper-cases, and strips the perpetual
/// markers (`PERP`, `.P`), so `binance:btcusdtperp`, `BTCUSDT.P` and
/// `BTCUSDT` all compare equal.
pub fn normalize_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    let s = upper.as_str();
    let s = s
        .strip_prefix(EXCHANGE_TAG)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(s);
    let s = s.strip_suffix("PERP").unwrap_or(s);
    let s = s.trim_end_matches(['-', '_']);
    let s = s.strip_suffix(".P").unwrap_or(s);
    s.trim().to_string()
}

/// Canonical output form of an exchange symbol.
pub fn canonical_symbol(symbol: &str) -> String {
    format!("{EXCHANGE_TAG}:{symbol}PERP")
}

/// Outcome counters for one reconciliation, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub requested: usize,
    pub matched: usize,
    pub omitted: usize,
    /// External entries that matched no requested anomaly.
    pub unsolicited: usize,
    /// External entries shadowed by an earlier entry with the same
    /// normalised symbol.
    pub duplicates: usize,
}

pub struct EnrichmentReconciler;

impl EnrichmentReconciler {
    /// Build signals for every anomaly the external result covers, in
    /// anomaly order.
    ///
    /// Duplicate normalised symbols in the external result: the first entry
    /// in the result's own order wins.
    pub fn reconcile(anomalies: &[Anomaly], external: &ExternalAnalysisResult) -> Vec<Signal> {
        Self::reconcile_with_stats(anomalies, external).0
    }

    pub fn reconcile_with_stats(
        anomalies: &[Anomaly],
        external: &ExternalAnalysisResult,
    ) -> (Vec<Signal>, ReconcileStats) {
        let mut by_symbol: HashMap<String, &AnalyzedSignal> = HashMap::new();
        let mut duplicates = 0usize;
        for entry in &external.signals {
            let key = normalize_symbol(&entry.symbol);
            if by_symbol.contains_key(&key) {
                duplicates += 1;
                debug!(symbol = %entry.symbol, "Ignoring duplicate analysis entry");
                continue;
            }
            by_symbol.insert(key, entry);
        }

        let mut signals = Vec::with_capacity(anomalies.len());
        let mut omitted = 0usize;

        for anomaly in anomalies {
            let key = normalize_symbol(anomaly.symbol());
            match by_symbol.remove(&key) {
                Some(analysis) => signals.push(Self::merge(anomaly, analysis)),
                None => {
                    omitted += 1;
                    debug!(symbol = anomaly.symbol(), "No analysis returned for anomaly, dropping");
                }
            }
        }

        // Whatever is left was never requested.
        let unsolicited = by_symbol.len();
        if unsolicited > 0 {
            let names: Vec<&str> = by_symbol.values().map(|s| s.symbol.as_str()).collect();
            debug!(symbols = ?names, "Discarding analysis for unrequested symbols");
        }

        let stats = ReconcileStats {
            requested: anomalies.len(),
            matched: signals.len(),
            omitted,
            unsolicited,
            duplicates,
        };

        info!(
            requested = stats.requested,
            matched = stats.matched,
            omitted = stats.omitted,
            unsolicited = stats.unsolicited,
            duplicates = stats.duplicates,
            "Enrichment reconciled"
        );

        (signals, stats)
    }

    /// Trusted numbers from the anomaly, speculative fields from the analysis.
    fn merge(anomaly: &Anomaly, analysis: &AnalyzedSignal) -> Signal {
        let ticker = anomaly.ticker();
        Signal {
            symbol: canonical_symbol(&ticker.symbol),
            signal_type: analysis.signal_type,
            price_change_pct: ticker.price_change_pct_24h,
            price: ticker.last_price,
            last_vol: ticker.volume_base,
            avg_vol: ticker.volume_base / 24.0,
            last_vol_usd: ticker.quote_volume_usd,
            score: analysis.score,
            long_short_ratio: analysis.long_short_ratio,
            funding_rate: analysis.funding_rate,
            oi_change: analysis.oi_change,
            price_change_intervals: analysis.price_change_intervals,
            significance: analysis.significance,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
