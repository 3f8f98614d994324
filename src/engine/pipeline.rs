//! One scan, end to end: snapshot → detect → enrich → reconcile → rank.
//!
//! A scan either yields a complete `MarketData` or a `ScanError`. There is
//! no partial result: a failed feed or a failed enrichment call fails the
//! whole scan.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use super::detector::AnomalyDetector;
use super::ranker::SignalRanker;
use super::reconciler::EnrichmentReconciler;
use crate::llm::SignalAnalyzer;
use crate::market::SnapshotSource;
use crate::types::{LongShortRatio, MarketData, ScanError, ScanParameters};

pub struct ScanPipeline {
    source: Arc<dyn SnapshotSource>,
    analyzer: Arc<dyn SignalAnalyzer>,
    detector: AnomalyDetector,
    enrichment_timeout: Duration,
}

impl ScanPipeline {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        analyzer: Arc<dyn SignalAnalyzer>,
        enrichment_timeout: Duration,
    ) -> Self {
        Self {
            source,
            analyzer,
            detector: AnomalyDetector::default(),
            enrichment_timeout,
        }
    }

    /// Run one scan with the given parameters.
    pub async fn run(&self, params: &ScanParameters) -> Result<MarketData, ScanError> {
        let scan_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%scan_id, "Scan started");

        // 1. Snapshot
        let snapshot = self.source.fetch_snapshot().await?;

        // 2. Detect
        let anomalies = self
            .detector
            .detect(&snapshot.tickers, &snapshot.active_symbols, params);

        // Nothing to enrich: skip the service entirely.
        if anomalies.is_empty() {
            info!(%scan_id, tickers = snapshot.tickers.len(), "No anomalies, skipping enrichment");
            return Ok(MarketData {
                scan_id,
                generated_at: Utc::now(),
                signals: Vec::new(),
                long_short_ratio: LongShortRatio::neutral(),
                market_indicators: snapshot.indicators,
            });
        }

        // 3. Enrich
        let external = tokio::time::timeout(
            self.enrichment_timeout,
            self.analyzer.analyze(&anomalies, params),
        )
        .await
        .map_err(|_| {
            warn!(%scan_id, timeout_secs = self.enrichment_timeout.as_secs(), "Enrichment timed out");
            ScanError::Enrichment(format!(
                "No answer within {}s",
                self.enrichment_timeout.as_secs()
            ))
        })??;

        // 4. Reconcile, 5. Rank
        let signals = SignalRanker::rank(EnrichmentReconciler::reconcile(&anomalies, &external));

        info!(
            %scan_id,
            anomalies = anomalies.len(),
            signals = signals.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scan complete"
        );

        Ok(MarketData {
            scan_id,
            generated_at: Utc::now(),
            signals,
            long_short_ratio: external.long_short_ratio,
            market_indicators: snapshot.indicators,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockSignalAnalyzer;
    use crate::market::MockSnapshotSource;
    use crate::types::{
        ActiveSymbolSet, AnalyzedSignal, ExternalAnalysisResult, FearGreedIndex, IntervalChanges,
        MarketIndicators, MarketSnapshot, SignalType, TickerEntry, TickerSnapshot,
    };

    fn ticker(symbol: &str, change: f64, quote_volume: f64) -> TickerEntry {
        TickerEntry {
            symbol: symbol.into(),
            last_price: 1.5,
            volume_base: 240.0,
            quote_volume_usd: quote_volume,
            price_change_pct_24h: change,
        }
    }

    fn snapshot(entries: Vec<TickerEntry>) -> MarketSnapshot {
        let active: ActiveSymbolSet = entries.iter().map(|t| t.symbol.clone()).collect();
        MarketSnapshot {
            tickers: TickerSnapshot::new(entries),
            active_symbols: active,
            indicators: MarketIndicators {
                btc_dominance_pct: 55.0,
                total_market_cap_usd: 2.4e12,
                fear_greed: FearGreedIndex { value: 60, classification: "Greed".into() },
            },
        }
    }

    fn analyzed(symbol: &str, score: f64) -> AnalyzedSignal {
        AnalyzedSignal {
            symbol: symbol.into(),
            signal_type: SignalType::Pump,
            score,
            long_short_ratio: LongShortRatio { long: 60.0, short: 40.0 },
            funding_rate: 0.01,
            oi_change: IntervalChanges::default(),
            price_change_intervals: IntervalChanges::default(),
            significance: 2,
        }
    }

    fn source_returning(snap: MarketSnapshot) -> MockSnapshotSource {
        let mut source = MockSnapshotSource::new();
        source.expect_fetch_snapshot().returning(move || Ok(snap.clone()));
        source
    }

    fn pipeline(source: MockSnapshotSource, analyzer: MockSignalAnalyzer) -> ScanPipeline {
        ScanPipeline::new(Arc::new(source), Arc::new(analyzer), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_no_anomalies_skips_enrichment() {
        let source = source_returning(snapshot(vec![ticker("AAAUSDT", 0.5, 5e6)]));
        let mut analyzer = MockSignalAnalyzer::new();
        analyzer.expect_analyze().never();

        let data = pipeline(source, analyzer).run(&ScanParameters::default()).await.unwrap();
        assert!(data.signals.is_empty());
        assert_eq!(data.long_short_ratio, LongShortRatio::neutral());
        assert_eq!(data.market_indicators.fear_greed.value, 60);
    }

    #[tokio::test]
    async fn test_partial_enrichment_scenario() {
        let source = source_returning(snapshot(vec![
            ticker("AAAUSDT", 10.0, 2_000_000.0),
            ticker("BBBUSDT", -8.0, 1_000_000.0),
            ticker("CCCUSDT", 1.0, 9_000_000.0),
        ]));

        let mut analyzer = MockSignalAnalyzer::new();
        analyzer
            .expect_analyze()
            .withf(|anomalies, _| {
                let names: Vec<_> = anomalies.iter().map(|a| a.symbol()).collect();
                names == vec!["AAAUSDT", "BBBUSDT"]
            })
            .times(1)
            .returning(|_, _| {
                Ok(ExternalAnalysisResult {
                    long_short_ratio: LongShortRatio { long: 58.0, short: 42.0 },
                    signals: vec![analyzed("AAAUSDT", 7.0), analyzed("ZZZUSDT", 99.0)],
                })
            });

        let data = pipeline(source, analyzer).run(&ScanParameters::default()).await.unwrap();
        assert_eq!(data.signals.len(), 1);
        assert_eq!(data.signals[0].symbol, "BINANCE:AAAUSDTPERP");
        assert_eq!(data.signals[0].price_change_pct, 10.0);
        assert_eq!(data.long_short_ratio.long, 58.0);
    }

    #[tokio::test]
    async fn test_signals_ranked_by_score() {
        let source = source_returning(snapshot(vec![
            ticker("AUSDT", 9.0, 1e6),
            ticker("BUSDT", 8.0, 1e6),
            ticker("CUSDT", 7.0, 1e6),
        ]));
        let mut analyzer = MockSignalAnalyzer::new();
        analyzer.expect_analyze().returning(|_, _| {
            Ok(ExternalAnalysisResult {
                long_short_ratio: LongShortRatio::neutral(),
                signals: vec![analyzed("AUSDT", 1.0), analyzed("BUSDT", 5.0), analyzed("CUSDT", 3.0)],
            })
        });

        let data = pipeline(source, analyzer).run(&ScanParameters::default()).await.unwrap();
        let names: Vec<_> = data.signals.iter().map(|s| s.display_name()).collect();
        assert_eq!(names, vec!["BUSDT", "CUSDT", "AUSDT"]);
    }

    #[tokio::test]
    async fn test_network_error_propagates() {
        let mut source = MockSnapshotSource::new();
        source
            .expect_fetch_snapshot()
            .returning(|| Err(ScanError::network("ticker", "connection reset")));
        let mut analyzer = MockSignalAnalyzer::new();
        analyzer.expect_analyze().never();

        let err = pipeline(source, analyzer).run(&ScanParameters::default()).await.unwrap_err();
        assert!(matches!(err, ScanError::Network { ref feed, .. } if feed == "ticker"));
    }

    #[tokio::test]
    async fn test_enrichment_error_propagates() {
        let source = source_returning(snapshot(vec![ticker("AAAUSDT", 10.0, 2e6)]));
        let mut analyzer = MockSignalAnalyzer::new();
        analyzer
            .expect_analyze()
            .returning(|_, _| Err(ScanError::Enrichment("HTTP 500".into())));

        let err = pipeline(source, analyzer).run(&ScanParameters::default()).await.unwrap_err();
        assert_eq!(err, ScanError::Enrichment("HTTP 500".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrichment_timeout() {
        struct SlowAnalyzer;

        #[async_trait::async_trait]
        impl SignalAnalyzer for SlowAnalyzer {
            async fn analyze(
                &self,
                _anomalies: &[crate::types::Anomaly],
                _params: &ScanParameters,
            ) -> Result<ExternalAnalysisResult, ScanError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ExternalAnalysisResult {
                    long_short_ratio: LongShortRatio::neutral(),
                    signals: Vec::new(),
                })
            }
        }

        let source = source_returning(snapshot(vec![ticker("AAAUSDT", 10.0, 2e6)]));
        let pipeline = ScanPipeline::new(Arc::new(source), Arc::new(SlowAnalyzer), Duration::from_secs(90));

        let err = pipeline.run(&ScanParameters::default()).await.unwrap_err();
        assert!(matches!(err, ScanError::Enrichment(ref m) if m.contains("90s")));
    }
}
