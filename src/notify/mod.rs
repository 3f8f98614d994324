//! Outbound alerts.
//!
//! Delivery is fire-and-forget from the scheduler's point of view: completed
//! scans are queued to a background worker, and a failed send is logged and
//! counted but never touches scan or scheduler state.

pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{AlertsConfig, AppConfig};
use crate::types::{MarketData, ScanError};
use telegram::TelegramNotifier;

const NOTIFY_TIMEOUT_SECS: u64 = 15;

/// Abstraction over an alert channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, data: &MarketData) -> Result<(), ScanError>;
}

/// Build the Telegram notifier if both credentials are configured and set.
pub fn build_notifier(cfg: &AlertsConfig) -> Option<Arc<dyn Notifier>> {
    let (Some(token_env), Some(chat_env)) =
        (cfg.telegram_bot_token_env.as_deref(), cfg.telegram_chat_id_env.as_deref())
    else {
        info!("Telegram not configured, alerts disabled");
        return None;
    };

    let credentials = AppConfig::resolve_secret(token_env)
        .and_then(|token| AppConfig::resolve_env(chat_env).map(|chat| (token, chat)));

    let (token, chat_id) = match credentials {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Telegram credentials missing, alerts disabled");
            return None;
        }
    };

    match TelegramNotifier::new(token, chat_id, Duration::from_secs(NOTIFY_TIMEOUT_SECS)) {
        Ok(n) => Some(Arc::new(n)),
        Err(e) => {
            warn!(error = %e, "Failed to initialise Telegram notifier");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct DispatchStats {
    sent: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Queue in front of a `Notifier`, drained by one background task.
///
/// Deliveries run one at a time in submission order. Dropping the last
/// handle closes the queue and lets the worker exit after draining it.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<MarketData>,
    stats: Arc<DispatchStats>,
}

impl NotificationDispatcher {
    /// Spawn the delivery worker. Must be called inside a Tokio runtime.
    pub fn spawn(notifier: Arc<dyn Notifier>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<MarketData>();
        let stats = Arc::new(DispatchStats::default());
        let worker_stats = stats.clone();

        tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                if data.signals.is_empty() {
                    worker_stats.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(scan_id = %data.scan_id, "Empty scan, no alert");
                    continue;
                }

                match notifier.notify(&data).await {
                    Ok(()) => {
                        worker_stats.sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        worker_stats.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(scan_id = %data.scan_id, error = %e, "Alert delivery failed");
                    }
                }
            }
            debug!("Notification queue closed");
        });

        Self { tx, stats }
    }

    /// Queue a completed scan. Never blocks; returns `false` if the worker
    /// is gone.
    pub fn dispatch(&self, data: MarketData) -> bool {
        match self.tx.send(data) {
            Ok(()) => true,
            Err(_) => {
                warn!("Notification worker stopped, dropping alert");
                false
            }
        }
    }

    pub fn sent(&self) -> u64 {
        self.stats.sent.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.stats.skipped.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
