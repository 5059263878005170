//! # Sentinel
//!
//! Binary entry point for the container update supervisor. Wires the
//! process environment into a [`sentinel_config::StaticConfig`], opens the
//! durable [`sentinel_core::Store`], and runs the scan loop and digest
//! scheduler until the process receives a shutdown signal.
//!
//! No concrete [`sentinel_contracts::runtime::ContainerRuntime`] ships in
//! this workspace: the socket/API client that actually talks to a container
//! engine is an external collaborator. Absent one, this binary falls back
//! to the in-memory demo runtime so the scan loop and update lifecycle are
//! still observable end to end.

use std::sync::Arc;

use sentinel_config::{RuntimeConfig, StaticConfig};
use sentinel_contracts::clock::SystemClock;
use sentinel_contracts::event_bus::NullEventBus;
use sentinel_contracts::notifier::NullNotifier;
use sentinel_contracts::runtime::testing::FakeRuntime;
use sentinel_core::digest_scheduler::{DigestSchedule, DigestScheduler};
use sentinel_core::queue::Queue;
use sentinel_core::ratetracker::RateTracker;
use sentinel_core::registry::RegistryChecker;
use sentinel_core::scheduler::Scheduler;
use sentinel_core::store::Store;
use sentinel_core::updater::Updater;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = StaticConfig::from_env()?;
    init_tracing(config.log_json);

    tracing::info!(db_path = %config.db_path, docker_sock = %config.docker_sock, "sentinel starting");

    let store = Store::open(&config.db_path).await?;
    let runtime_config = Arc::new(RuntimeConfig::new(config.initial.clone()));
    let queue = Arc::new(Queue::load(store.clone(), None).await?);

    let runtime = build_runtime(&config);

    let updater = Arc::new(Updater::new(
        runtime,
        store.clone(),
        queue.clone(),
        RegistryChecker::new(),
        Arc::new(RateTracker::new()),
        runtime_config.clone(),
        config.restart_dependents,
        Some(Arc::new(NullNotifier)),
        Some(Arc::new(NullEventBus)),
        Arc::new(SystemClock),
        Vec::new(),
        config.schedule.clone(),
    ));

    let cancel = CancellationToken::new();

    let scheduler = Scheduler::new(updater, runtime_config);
    let (scheduler_join, _scheduler_handle) = scheduler.spawn(cancel.clone());

    let digest_scheduler = DigestScheduler::new(
        store,
        queue,
        Some(Arc::new(NullNotifier)),
        Some(Arc::new(NullEventBus)),
        Arc::new(SystemClock),
        DigestSchedule::default(),
    );
    let (digest_join, _digest_handle) = digest_scheduler.spawn(cancel.clone());

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining in-flight work");
    cancel.cancel();

    let _ = tokio::join!(scheduler_join, digest_join);
    tracing::info!("sentinel stopped");
    Ok(())
}

/// No concrete driver ships in this workspace (it is consumed only through
/// [`sentinel_contracts::runtime::ContainerRuntime`]); the demo in-memory
/// runtime stands in so the engine has something to scan.
fn build_runtime(config: &StaticConfig) -> Arc<dyn sentinel_contracts::runtime::ContainerRuntime> {
    tracing::warn!(
        docker_sock = %config.docker_sock,
        "no container runtime driver is compiled into this binary; running the in-memory demo runtime"
    );
    Arc::new(FakeRuntime::new())
}

fn init_tracing(json: bool) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "sentinel=info,sentinel_core=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
