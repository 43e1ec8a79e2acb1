//! Auto-sync scheduler - triggers sync cycles on a fixed interval
//!
//! A tick that arrives while a cycle is still running is skipped, never
//! queued. Stopping the scheduler only cancels future ticks; a cycle that
//! is already running finishes normally, since cycles live on their own
//! tasks.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::services::sync::SyncCoordinator;

/// Shortest accepted interval; shorter ones are raised to it
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    interval: Duration,
}

/// Periodic trigger for a [`SyncCoordinator`]
pub struct AutoSyncScheduler {
    coordinator: SyncCoordinator,
    running: Mutex<Option<Running>>,
}

impl AutoSyncScheduler {
    pub fn new(coordinator: SyncCoordinator) -> Self {
        Self {
            coordinator,
            running: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start ticking every `interval`, the first tick firing immediately
    ///
    /// Restarts the timer if the scheduler is already running. Must be
    /// called from within a tokio runtime.
    pub fn start(&self, interval: Duration) {
        let interval = interval.max(MIN_INTERVAL);
        let mut running = self.lock();
        if let Some(previous) = running.take() {
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_schedule(
            self.coordinator.clone(),
            interval,
            cancel.clone(),
        ));
        *running = Some(Running {
            cancel,
            handle,
            interval,
        });
        info!(interval_secs = interval.as_secs_f64(), "auto-sync started");
    }

    /// Cancel future ticks; a no-op when not running
    pub fn stop(&self) {
        if let Some(running) = self.lock().take() {
            running.cancel.cancel();
            info!("auto-sync stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Current tick interval, `None` when stopped
    pub fn interval(&self) -> Option<Duration> {
        self.lock().as_ref().map(|running| running.interval)
    }
}

impl Drop for AutoSyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_schedule(coordinator: SyncCoordinator, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if coordinator.is_syncing() {
            debug!("sync still in flight, skipping tick");
            continue;
        }

        // The cycle runs on its own task and reports through the bus
        drop(coordinator.start_sync());
    }
}
