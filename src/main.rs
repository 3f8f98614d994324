//! Perp Scanner — Binance perpetual futures anomaly scanner
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the fetcher, analyzer, notifier and scheduler together, serves
//! the control API and logs scan events until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use perp_scanner::config;
use perp_scanner::dashboard;
use perp_scanner::engine::pipeline::ScanPipeline;
use perp_scanner::engine::scheduler::ScanScheduler;
use perp_scanner::llm;
use perp_scanner::market::MarketSnapshotFetcher;
use perp_scanner::notify::{self, NotificationDispatcher};
use perp_scanner::types::{MarketData, ScanEvent};

const BANNER: &str = r#"
 ___  ___ ___ ___   ___  ___   _   _  _ _  _ ___ ___
| _ \| __| _ \ _ \ / __|/ __| /_\ | \| | \| | __| _ \
|  _/| _||   /  _/ \__ \ (__ / _ \| .` | .` | _||   /
|_|  |___|_|_\_|   |___/\___/_/ \_\_|\_|_|\_|___|_|_\

  Binance USDT-M perpetuals · anomaly scan · LLM enrichment
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    println!("{BANNER}");
    info!(
        scan_interval_min = cfg.scanner.parameters.scan_interval_min,
        threshold_pct = cfg.scanner.parameters.price_change_threshold_pct,
        min_volume_usd = cfg.scanner.parameters.min_volume_usd,
        provider = %cfg.llm.provider,
        "Perp scanner starting up"
    );

    // -- Initialise components -------------------------------------------

    let source = Arc::new(MarketSnapshotFetcher::new(&cfg.exchange)?);
    let analyzer: Arc<dyn llm::SignalAnalyzer> = Arc::from(llm::build_analyzer(&cfg.llm)?);

    let dispatcher = notify::build_notifier(&cfg.alerts).map(NotificationDispatcher::spawn);

    let pipeline = ScanPipeline::new(source, analyzer, Duration::from_secs(cfg.llm.timeout_secs));
    let scheduler = Arc::new(ScanScheduler::new(
        pipeline,
        cfg.scanner.parameters.clone(),
        dispatcher,
        cfg.alerts.auto_notify,
    ));

    // Subscribe before anything can start so no event is missed.
    let mut events = scheduler.subscribe();

    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(scheduler.clone(), cfg.dashboard.port).await?;
    } else if !cfg.scanner.auto_start {
        warn!("Dashboard disabled and auto_start off: nothing can start the scanner");
    }

    if cfg.scanner.auto_start {
        scheduler.start().await?;
    }

    // -- Event loop ------------------------------------------------------

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Waiting for scan events. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ScanEvent::Completed(data)) => log_scan_report(&data),
                Ok(ScanEvent::Failed(e)) => {
                    error!(error = %e, "Scanner halted, restart it from the control API");
                }
                Ok(ScanEvent::Stopped) => info!("Scanner idle"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
                Err(RecvError::Closed) => break,
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    if scheduler.state().await.is_active() {
        scheduler.stop().await?;
    }

    let state = scheduler.state().await;
    info!(
        scans_completed = state.scans_completed,
        scans_failed = state.scans_failed,
        "Perp scanner shut down cleanly."
    );

    Ok(())
}

/// Log a human-readable scan summary.
fn log_scan_report(data: &MarketData) {
    info!(
        scan_id = %data.scan_id,
        signals = data.signals.len(),
        long_pct = format!("{:.2}", data.long_short_ratio.long),
        short_pct = format!("{:.2}", data.long_short_ratio.short),
        btc_dominance = format!("{:.2}%", data.market_indicators.btc_dominance_pct),
        fear_greed = data.market_indicators.fear_greed.value,
        "Scan complete"
    );
    for signal in &data.signals {
        info!(scan_id = %data.scan_id, "{signal}");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("perp_scanner=info"));

    let json_logging = std::env::var("SCANNER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
