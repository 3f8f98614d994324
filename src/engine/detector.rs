//! Anomaly detection over the 24h ticker snapshot.
//!
//! Keeps active contracts whose absolute 24h move and quote volume clear
//! the operator's thresholds, ordered by the size of the move.

use tracing::debug;

use crate::types::{ActiveSymbolSet, Anomaly, ScanParameters, TickerSnapshot};

/// Maximum anomalies forwarded to enrichment per scan.
pub const MAX_ANOMALIES: usize = 20;

pub struct AnomalyDetector {
    max_anomalies: usize,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(MAX_ANOMALIES)
    }
}

impl AnomalyDetector {
    pub fn new(max_anomalies: usize) -> Self {
        Self { max_anomalies }
    }

    /// Select anomalies, largest absolute move first.
    ///
    /// Ties keep snapshot order (stable sort), so output is deterministic
    /// for a fixed input. An empty result is normal, not an error.
    pub fn detect(
        &self,
        snapshot: &TickerSnapshot,
        active_symbols: &ActiveSymbolSet,
        params: &ScanParameters,
    ) -> Vec<Anomaly> {
        let mut delisted = 0usize;

        let mut candidates: Vec<_> = snapshot
            .entries
            .iter()
            .filter(|t| {
                let active = active_symbols.contains(&t.symbol);
                if !active {
                    delisted += 1;
                }
                active
            })
            .filter(|t| {
                t.abs_price_change() >= params.price_change_threshold_pct
                    && t.quote_volume_usd >= params.min_volume_usd
            })
            .collect();

        let qualifying = candidates.len();

        candidates.sort_by(|a, b| b.abs_price_change().total_cmp(&a.abs_price_change()));
        candidates.truncate(self.max_anomalies);

        debug!(
            snapshot = snapshot.len(),
            inactive = delisted,
            qualifying,
            kept = candidates.len(),
            "Anomaly detection complete"
        );

        candidates.into_iter().cloned().map(Anomaly::new).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
