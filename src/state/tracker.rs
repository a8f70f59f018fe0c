use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::aggregator::aggregate_all;
use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::{Config, FetchConfig};
use crate::error::Result;
use crate::fetcher::SessionFetcher;
use crate::state::history::HistorySeries;
use crate::types::{GameTarget, PlayerIdentity, ResultBundle};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub fetch: FetchConfig,
    pub poll_interval: Duration,
    pub stop_join_timeout: Duration,
    pub history_cap: usize,
}

impl From<&Config> for TrackerConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            fetch: cfg.fetch.clone(),
            poll_interval: cfg.poll_interval,
            stop_join_timeout: cfg.stop_join_timeout,
            history_cap: cfg.history_cap,
        }
    }
}

/// Everything a tracking session reads and writes, guarded by a single lock.
/// The background cycle holds the lock for the whole cycle, so readers see
/// either the previous cycle or the new one, never a mix.
#[derive(Debug)]
pub struct TrackingState {
    pub identity: Option<PlayerIdentity>,
    pub targets: Vec<GameTarget>,
    pub active: bool,
    pub bundle: ResultBundle,
    pub last_update: Option<DateTime<Utc>>,
    pub history: HistorySeries,
}

impl TrackingState {
    fn idle(history_cap: usize) -> Self {
        Self {
            identity: None,
            targets: Vec::new(),
            active: false,
            bundle: ResultBundle {
                results: Default::default(),
                total_profit: Decimal::ZERO,
                has_errors: false,
            },
            last_update: None,
            history: HistorySeries::new(history_cap),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TrackingResults {
    #[serde(flatten)]
    pub bundle: ResultBundle,
    pub history: HistorySeries,
}

/// Body of `GET /get_results`.
#[derive(Debug, Serialize)]
pub struct TrackingSnapshot {
    pub tracking_results: TrackingResults,
    pub tracking_active: bool,
    pub last_scrape_time: Option<DateTime<Utc>>,
    pub time_since_scrape_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotActive,
}

/// The running half of a session: stop signal, loop task, and the fetcher
/// it owns.
struct ActiveSession {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    fetcher: Arc<SessionFetcher>,
}

/// Periodic tracker for one player and a fixed set of games.
///
/// `start` creates a fresh session (new fetcher, empty history) and spawns the
/// cycle loop; `stop` signals the loop, waits up to `stop_join_timeout` for it
/// to exit, then drops the fetcher. The last snapshot stays readable after stop.
pub struct Tracker {
    cfg: TrackerConfig,
    state: Arc<Mutex<TrackingState>>,
    /// Serialises start/stop. Never held by the cycle loop.
    session: Mutex<Option<ActiveSession>>,
    /// Mirrors whether `session` holds a running session; readable without
    /// waiting on a start or stop in progress.
    running: AtomicBool,
    latency: Arc<LatencyStats>,
    health: Arc<HealthState>,
}

impl Tracker {
    pub fn new(cfg: TrackerConfig, latency: Arc<LatencyStats>, health: Arc<HealthState>) -> Self {
        let state = TrackingState::idle(cfg.history_cap);
        Self {
            cfg,
            state: Arc::new(Mutex::new(state)),
            session: Mutex::new(None),
            running: AtomicBool::new(false),
            latency,
            health,
        }
    }

    pub async fn start(
        &self,
        identity: PlayerIdentity,
        targets: Vec<GameTarget>,
    ) -> Result<StartOutcome> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            info!("Tracking already active");
            return Ok(StartOutcome::AlreadyActive);
        }

        let fetcher = Arc::new(
            SessionFetcher::new(self.cfg.fetch.clone())?.with_latency(Arc::clone(&self.latency)),
        );

        {
            let mut state = self.state.lock().await;
            *state = TrackingState::idle(self.cfg.history_cap);
            state.identity = Some(identity);
            state.targets = targets;
            state.active = true;
            info!(
                player = ?state.identity.as_ref().map(|i| &i.primary_name),
                games = state.targets.len(),
                interval_secs = self.cfg.poll_interval.as_secs_f64(),
                "Tracking started"
            );
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(tracking_loop(
            Arc::clone(&self.state),
            Arc::clone(&fetcher),
            self.cfg.poll_interval,
            stop_rx,
            Arc::clone(&self.health),
        ));

        *session = Some(ActiveSession {
            stop_tx,
            handle,
            fetcher,
        });
        self.running.store(true, Ordering::SeqCst);
        Ok(StartOutcome::Started)
    }

    pub async fn stop(&self) -> StopOutcome {
        let mut session = self.session.lock().await;
        let Some(active) = session.take() else {
            return StopOutcome::NotActive;
        };
        self.running.store(false, Ordering::SeqCst);
        let ActiveSession {
            stop_tx,
            mut handle,
            fetcher,
        } = active;

        // The loop may already have exited; a closed channel is fine.
        let _ = stop_tx.send(());

        match tokio::time::timeout(self.cfg.stop_join_timeout, &mut handle).await {
            Ok(Ok(())) => info!("Tracking loop exited"),
            Ok(Err(e)) => error!("Tracking loop ended abnormally: {e}"),
            Err(_) => {
                warn!(
                    "Tracking loop did not exit within {:?}, aborting in-flight cycle",
                    self.cfg.stop_join_timeout
                );
                handle.abort();
                let _ = handle.await;
            }
        }

        self.state.lock().await.active = false;
        drop(fetcher);
        info!("Tracking stopped");
        StopOutcome::Stopped
    }

    /// Whether a session is running. Never waits on a cycle, a start or a
    /// stop; a session being stopped already reads as not running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> TrackingSnapshot {
        let state = self.state.lock().await;
        let now = Utc::now();
        TrackingSnapshot {
            tracking_results: TrackingResults {
                bundle: state.bundle.clone(),
                history: state.history.clone(),
            },
            tracking_active: state.active,
            last_scrape_time: state.last_update,
            time_since_scrape_seconds: state
                .last_update
                .map(|t| (now - t).num_milliseconds() as f64 / 1000.0),
        }
    }
}

/// Runs one cycle immediately, then one per `interval`, until signalled.
async fn tracking_loop(
    state: Arc<Mutex<TrackingState>>,
    fetcher: Arc<SessionFetcher>,
    interval: Duration,
    mut stop_rx: oneshot::Receiver<()>,
    health: Arc<HealthState>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => {
                info!("Tracking loop received stop signal");
                break;
            }
            _ = ticker.tick() => {}
        }

        let mut guard = state.lock().await;
        if !guard.active {
            break;
        }
        run_cycle(&mut guard, &fetcher).await;
        drop(guard);
        health.inc_cycles_completed();
    }
}

async fn run_cycle(state: &mut TrackingState, fetcher: &SessionFetcher) {
    let Some(identity) = state.identity.as_ref() else {
        warn!("Tracking cycle skipped: no player configured");
        return;
    };
    let bundle = aggregate_all(fetcher, &state.targets, identity).await;
    let now = Utc::now();

    state.history.record(&bundle, now);
    state.bundle = bundle;
    state.last_update = Some(now);
}
