//! Scan scheduling.
//!
//! While active, two background tasks run per activation:
//!
//! - the scan loop fires a scan immediately and then once per scan
//!   interval. Each scan is awaited before the loop waits for its next
//!   tick, so at most one scan is ever in flight;
//! - the countdown ticks once per second and shows the whole seconds left
//!   until the next trigger, saturating at zero. The scan loop publishes
//!   each new deadline over a `watch` channel, so the display is always
//!   measured from the latest trigger rather than from its own ticks.
//!
//! Every activation gets a new generation number. `stop()` and a failed
//! scan both retire the current generation, and a scan outcome is applied
//! only if the generation it was started under is still current. A result
//! that arrives after the operator pressed stop is therefore dropped.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::pipeline::ScanPipeline;
use crate::notify::NotificationDispatcher;
use crate::types::{
    ControlError, MarketData, ScanError, ScanEvent, ScanParameters, ScanSchedulerState,
    SchedulerPhase,
};

/// Capacity of the scan event channel. Slow subscribers lag and skip.
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct ScanScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    pipeline: ScanPipeline,
    dispatcher: Option<NotificationDispatcher>,
    auto_notify: AtomicBool,
    /// Lock order: `state` before `parameters`, `latest` and `tasks`.
    state: RwLock<ScanSchedulerState>,
    parameters: RwLock<ScanParameters>,
    latest: RwLock<Option<MarketData>>,
    generation: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    events: broadcast::Sender<ScanEvent>,
}

impl ScanScheduler {
    pub fn new(
        pipeline: ScanPipeline,
        parameters: ScanParameters,
        dispatcher: Option<NotificationDispatcher>,
        auto_notify: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                pipeline,
                dispatcher,
                auto_notify: AtomicBool::new(auto_notify),
                state: RwLock::new(ScanSchedulerState::new()),
                parameters: RwLock::new(parameters),
                latest: RwLock::new(None),
                generation: AtomicU64::new(0),
                tasks: Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    // -- Controls -------------------------------------------------------------

    /// Go active: scan now, then every scan interval.
    pub async fn start(&self) -> Result<(), ControlError> {
        let mut state = self.inner.state.write().await;
        if state.is_active() {
            return Err(ControlError::AlreadyActive);
        }

        let params = self.inner.parameters.read().await.clone();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        state.phase = SchedulerPhase::Active;
        state.countdown_secs = params.countdown_secs();
        state.last_error = None;

        let period = params.scan_interval();
        let (deadline_tx, deadline_rx) = watch::channel(Instant::now() + period);
        let scan_task = tokio::spawn(Inner::run_scan_loop(
            self.inner.clone(),
            generation,
            period,
            deadline_tx,
        ));
        let countdown_task =
            tokio::spawn(Inner::run_countdown(self.inner.clone(), generation, deadline_rx));

        let mut tasks = self.inner.tasks.lock().await;
        for stale in tasks.drain(..) {
            stale.abort();
        }
        tasks.push(scan_task);
        tasks.push(countdown_task);

        info!(
            generation,
            scan_interval_min = params.scan_interval_min,
            threshold_pct = params.price_change_threshold_pct,
            min_volume_usd = params.min_volume_usd,
            "Scanner started"
        );
        Ok(())
    }

    /// Go idle. Any scan still in flight is abandoned and its result
    /// discarded.
    pub async fn stop(&self) -> Result<(), ControlError> {
        let mut state = self.inner.state.write().await;
        if !state.is_active() {
            return Err(ControlError::NotActive);
        }

        let retired = self.inner.generation.fetch_add(1, Ordering::SeqCst);
        state.phase = SchedulerPhase::Idle;
        state.countdown_secs = 0;

        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }

        let _ = self.inner.events.send(ScanEvent::Stopped);
        info!(generation = retired, "Scanner stopped");
        Ok(())
    }

    // -- Parameters -----------------------------------------------------------

    pub async fn parameters(&self) -> ScanParameters {
        self.inner.parameters.read().await.clone()
    }

    /// Replace the scan parameters. Only allowed while idle.
    pub async fn set_parameters(&self, params: ScanParameters) -> Result<(), ControlError> {
        params.validate()?;

        let state = self.inner.state.read().await;
        if state.is_active() {
            return Err(ControlError::ParametersLocked);
        }

        info!(?params, "Scan parameters updated");
        *self.inner.parameters.write().await = params;
        Ok(())
    }

    // -- Notifications --------------------------------------------------------

    pub fn auto_notify(&self) -> bool {
        self.inner.auto_notify.load(Ordering::Relaxed)
    }

    /// Takes effect from the next completed scan.
    pub fn set_auto_notify(&self, enabled: bool) {
        self.inner.auto_notify.store(enabled, Ordering::Relaxed);
        info!(enabled, "Auto-notify toggled");
    }

    pub fn dispatcher(&self) -> Option<&NotificationDispatcher> {
        self.inner.dispatcher.as_ref()
    }

    // -- Observation ----------------------------------------------------------

    pub async fn state(&self) -> ScanSchedulerState {
        self.inner.state.read().await.clone()
    }

    /// Result of the most recent successful scan of the current or last
    /// activation. Cleared when a scan fails.
    pub async fn latest_market_data(&self) -> Option<MarketData> {
        self.inner.latest.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run_scan_loop(
        self: Arc<Self>,
        generation: u64,
        period: Duration,
        deadline: watch::Sender<Instant>,
    ) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // First tick completes immediately.
            interval.tick().await;

            {
                let mut state = self.state.write().await;
                if !self.is_current(generation) {
                    break;
                }
                deadline.send_replace(Instant::now() + period);
                state.countdown_secs = period.as_secs();
            }

            let params = self.parameters.read().await.clone();
            let outcome = self.pipeline.run(&params).await;

            if !self.apply_outcome(generation, outcome).await {
                break;
            }
        }
        debug!(generation, "Scan loop exited");
    }

    async fn run_countdown(self: Arc<Self>, generation: u64, deadline: watch::Receiver<Instant>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let mut state = self.state.write().await;
            if !self.is_current(generation) {
                break;
            }
            let next = *deadline.borrow();
            state.countdown_secs = seconds_until(next, Instant::now());
        }
    }

    /// Apply a scan outcome. Returns whether the scan loop should continue.
    async fn apply_outcome(&self, generation: u64, outcome: Result<MarketData, ScanError>) -> bool {
        let mut state = self.state.write().await;
        if !self.is_current(generation) {
            debug!(generation, "Discarding result of a retired scan");
            return false;
        }

        match outcome {
            Ok(data) => {
                state.scans_completed += 1;
                state.last_scan_at = Some(data.generated_at);
                *self.latest.write().await = Some(data.clone());

                if self.auto_notify.load(Ordering::Relaxed) {
                    if let Some(dispatcher) = &self.dispatcher {
                        dispatcher.dispatch(data.clone());
                    }
                }

                let _ = self.events.send(ScanEvent::Completed(data));
                true
            }
            Err(e) => {
                error!(generation, error = %e, "Scan failed, stopping scanner");

                self.generation.fetch_add(1, Ordering::SeqCst);
                state.phase = SchedulerPhase::Idle;
                state.countdown_secs = 0;
                state.scans_failed += 1;
                state.last_error = Some(e.clone());
                state.last_scan_at = Some(Utc::now());
                *self.latest.write().await = None;

                let _ = self.events.send(ScanEvent::Failed(e));
                false
            }
        }
    }
}

/// Whole seconds from `now` until `deadline`, rounded up. Zero once due.
fn seconds_until(deadline: Instant, now: Instant) -> u64 {
    let left = deadline.saturating_duration_since(now);
    left.as_secs() + u64::from(left.subsec_nanos() > 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
