//! The interval-driven scan loop: an immediate scan on start unless the
//! engine is paused, a recurring scan on `poll_interval`, and an
//! out-of-band `TriggerScan` surface an operator-facing control plane can
//! use without waiting for the next tick.

use std::sync::Arc;
use std::time::Duration;

use sentinel_config::RuntimeConfig;
use sentinel_model::enums::ScanMode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::updater::{ScanSummary, Updater};

#[derive(Debug)]
enum Command {
    TriggerScan,
    SetInterval(Duration),
}

/// Cheap to clone; every clone can trigger scans or change the interval on
/// the same running loop.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    /// Requests a manual scan at the next loop iteration, bypassing the
    /// timer. A request already queued makes this a no-op rather than a
    /// blocking call.
    pub fn trigger_scan(&self) {
        let _ = self.tx.try_send(Command::TriggerScan);
    }

    /// Changes the polling interval, restarting the timer from now.
    pub fn set_interval(&self, interval: Duration) {
        let _ = self.tx.try_send(Command::SetInterval(interval));
    }
}

pub struct Scheduler {
    updater: Arc<Updater>,
    config: Arc<RuntimeConfig>,
}

impl Scheduler {
    pub fn new(updater: Arc<Updater>, config: Arc<RuntimeConfig>) -> Self {
        Self { updater, config }
    }

    /// Spawns the loop onto the current tokio runtime, returning its join
    /// handle and a [`SchedulerHandle`] callers use to drive it.
    pub fn spawn(self, cancel: CancellationToken) -> (tokio::task::JoinHandle<()>, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(1);
        let handle = SchedulerHandle { tx };
        let join = tokio::spawn(self.run(rx, cancel));
        (join, handle)
    }

    async fn run(self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        if !self.config.paused().await {
            self.run_scan(ScanMode::Scheduled, &cancel).await;
        }

        let mut interval = tokio::time::interval(self.config.poll_interval().await);
        interval.reset();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("scheduler: cancelled, exiting");
                    return;
                }
                cmd = rx.recv() => {
                    match cmd {
                        None => return,
                        Some(Command::TriggerScan) => {
                            self.run_scan(ScanMode::Manual, &cancel).await;
                        }
                        Some(Command::SetInterval(new_interval)) => {
                            self.config.set_poll_interval(new_interval).await;
                            interval = tokio::time::interval(new_interval);
                            interval.reset();
                        }
                    }
                }
                _ = interval.tick() => {
                    if !self.config.paused().await {
                        self.run_scan(ScanMode::Scheduled, &cancel).await;
                    }
                }
            }
        }
    }

    async fn run_scan(&self, mode: ScanMode, cancel: &CancellationToken) -> ScanSummary {
        tracing::info!(?mode, "scan starting");
        let summary = self.updater.scan(mode, cancel.clone()).await;
        tracing::info!(
            total = summary.total,
            queued = summary.queued,
            updated = summary.updated,
            skipped = summary.skipped,
            rate_limited = summary.rate_limited,
            errors = summary.errors,
            "scan complete"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sentinel_config::static_config::InitialRuntimeConfig;
    use sentinel_contracts::runtime::testing::FakeRuntime;
    use sentinel_model::enums::Policy;

    use super::*;
    use crate::queue::Queue;
    use crate::ratetracker::RateTracker;
    use crate::registry::RegistryChecker;

    async fn build_updater() -> (Arc<Updater>, Arc<RuntimeConfig>, Arc<FakeRuntime>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::Store::open(dir.path().join("sentinel.redb")).await.unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let queue = Arc::new(Queue::load(store.clone(), None).await.unwrap());
        let config = Arc::new(RuntimeConfig::new(InitialRuntimeConfig {
            poll_interval: Duration::from_millis(50),
            grace_period: Duration::from_millis(1),
            default_policy: Policy::Manual,
            latest_auto_update: true,
            image_cleanup: false,
        }));
        let updater = Arc::new(Updater::new(
            runtime.clone(),
            store,
            queue,
            RegistryChecker::new(),
            Arc::new(RateTracker::new()),
            config.clone(),
            false,
            None,
            None,
            Arc::new(sentinel_contracts::clock::SystemClock),
            Vec::new(),
            None,
        ));
        (updater, config, runtime, dir)
    }

    #[tokio::test(start_paused = true)]
    async fn scans_immediately_on_start_and_again_on_the_timer() {
        let (updater, config, runtime, _dir) = build_updater().await;
        let scheduler = Scheduler::new(updater, config);
        let cancel = CancellationToken::new();
        let (join, _handle) = scheduler.spawn(cancel.clone());

        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(runtime.call_count("list_containers"), 1, "initial scan runs on start");

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(runtime.call_count("list_containers") >= 2, "the timer fires a second scan");

        cancel.cancel();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn paused_engine_skips_the_initial_and_timer_scans() {
        let (updater, config, runtime, _dir) = build_updater().await;
        config.set_paused(true).await;
        let scheduler = Scheduler::new(updater, config);
        let cancel = CancellationToken::new();
        let (join, _handle) = scheduler.spawn(cancel.clone());

        tokio::time::advance(Duration::from_millis(120)).await;
        assert_eq!(runtime.call_count("list_containers"), 0);

        cancel.cancel();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_scan_runs_even_while_paused() {
        let (updater, config, runtime, _dir) = build_updater().await;
        config.set_paused(true).await;
        let scheduler = Scheduler::new(updater, config);
        let cancel = CancellationToken::new();
        let (join, handle) = scheduler.spawn(cancel.clone());

        tokio::time::advance(Duration::from_millis(5)).await;
        assert_eq!(runtime.call_count("list_containers"), 0);

        handle.trigger_scan();
        tokio::time::advance(Duration::from_millis(5)).await;
        assert_eq!(runtime.call_count("list_containers"), 1);

        cancel.cancel();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop_promptly() {
        let (updater, config, _runtime, _dir) = build_updater().await;
        let scheduler = Scheduler::new(updater, config);
        let cancel = CancellationToken::new();
        let (join, _handle) = scheduler.spawn(cancel.clone());

        tokio::time::advance(Duration::from_millis(5)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), join).await.unwrap().unwrap();
    }
}
