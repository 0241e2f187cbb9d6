//! Periodic sweep for locks and questions that outlived their owners.

use crate::Coordinator;
use crate::config::Config;
use crate::lock::LockInfo;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub interval: Duration,
    /// Locks held longer than this are force-released. `None` disables.
    pub max_hold: Option<Duration>,
    /// Questions pending longer than this are evicted. `None` disables.
    pub max_pending: Option<Duration>,
}

impl WatchdogSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.gateway.watchdog_interval_secs.max(1)),
            max_hold: config.locks.max_hold(),
            max_pending: config.ask_user.max_pending(),
        }
    }

    /// Nothing to sweep for.
    pub fn is_disabled(&self) -> bool {
        self.max_hold.is_none() && self.max_pending.is_none()
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub released: Vec<LockInfo>,
    pub evicted_questions: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.evicted_questions == 0
    }
}

/// One pass over the lock registry and the pending-question map.
pub fn sweep(coordinator: &Coordinator, settings: &WatchdogSettings) -> SweepReport {
    let released = settings
        .max_hold
        .map(|max_hold| coordinator.locks().release_stale(max_hold))
        .unwrap_or_default();
    let evicted_questions = settings
        .max_pending
        .map_or(0, |max_age| coordinator.ask_user().evict_older_than(max_age));
    SweepReport {
        released,
        evicted_questions,
    }
}

/// Sweep every `settings.interval` until cancelled.
pub async fn run_watchdog(
    coordinator: Coordinator,
    settings: WatchdogSettings,
    cancel: CancellationToken,
) {
    if settings.is_disabled() {
        debug!("watchdog disabled: no hold or pending limits configured");
        return;
    }
    info!(interval_secs = settings.interval.as_secs(), "watchdog started");

    let mut ticker = tokio::time::interval(settings.interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = sweep(&coordinator, &settings);
                if !report.is_empty() {
                    warn!(
                        released_locks = report.released.len(),
                        evicted_questions = report.evicted_questions,
                        "watchdog reclaimed abandoned state"
                    );
                }
            }
        }
    }
    debug!("watchdog stopped");
}
