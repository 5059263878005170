//! The scan loop and the per-container update lifecycle: everything else
//! in this crate is a collaborator the Updater composes.

pub mod locks;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use glob::Pattern;
use sentinel_config::RuntimeConfig;
use sentinel_contracts::clock::Clock;
use sentinel_contracts::event_bus::EventBus;
use sentinel_contracts::notifier::{Notification, Notifier};
use sentinel_contracts::runtime::{ContainerRuntime, CreateSpec};
use sentinel_model::enums::{FinaliseStage, NotifyPref, Outcome, Policy, ScanMode};
use sentinel_model::events::SentinelEvent;
use sentinel_model::history::UpdateRecord;
use sentinel_model::image::{Digest, ImageReference};
use sentinel_model::notify::NotifyState;
use sentinel_model::runtime::{ContainerInspect, ContainerSummary, NetworkConfig};
use tokio_util::sync::CancellationToken;

use crate::error::UpdaterError;
use crate::maintenance::MaintenanceWindow;
use crate::policy;
use crate::queue::{build_pending_update, Queue};
use crate::ratetracker::RateTracker;
use crate::registry::{CheckOptions, RegistryChecker};
use crate::store::Store;

use locks::LockTable;

const STOP_TIMEOUT_SECONDS: u32 = 30;
const MAINTENANCE_WINDOW_SETTING: &str = "maintenance_window";

/// Per-scan outcome tallies, emitted as a `ScanComplete` event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub total: u32,
    pub queued: u32,
    pub updated: u32,
    pub skipped: u32,
    pub rate_limited: u32,
    pub errors: u32,
}

enum ContainerOutcome {
    Queued,
    Updated,
    Skipped,
    RateLimited,
    Error,
}

pub struct Updater {
    runtime: Arc<dyn ContainerRuntime>,
    store: Store,
    queue: Arc<Queue>,
    registry: RegistryChecker,
    rate_tracker: Arc<RateTracker>,
    config: Arc<RuntimeConfig>,
    restart_dependents_enabled: bool,
    notifier: Option<Arc<dyn Notifier>>,
    events: Option<Arc<dyn EventBus>>,
    clock: Arc<dyn Clock>,
    locks: LockTable,
    name_filters: Vec<Pattern>,
    global_schedule: Option<String>,
}

impl std::fmt::Debug for Updater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater").finish_non_exhaustive()
    }
}

#[allow(clippy::too_many_arguments)]
impl Updater {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Store,
        queue: Arc<Queue>,
        registry: RegistryChecker,
        rate_tracker: Arc<RateTracker>,
        config: Arc<RuntimeConfig>,
        restart_dependents_enabled: bool,
        notifier: Option<Arc<dyn Notifier>>,
        events: Option<Arc<dyn EventBus>>,
        clock: Arc<dyn Clock>,
        name_filters: Vec<Pattern>,
        global_schedule: Option<String>,
    ) -> Self {
        Self {
            runtime,
            store,
            queue,
            registry,
            rate_tracker,
            config,
            restart_dependents_enabled,
            notifier,
            events,
            clock,
            locks: LockTable::new(),
            name_filters,
            global_schedule,
        }
    }

    /// Whether a lifecycle for `name` is currently running.
    pub fn is_updating(&self, name: &str) -> bool {
        self.locks.is_updating(name)
    }

    // ---- 4.7.1 Scan -----------------------------------------------------

    pub async fn scan(&self, mode: ScanMode, cancel: CancellationToken) -> ScanSummary {
        let mut summary = ScanSummary::default();

        let containers = match self.runtime.list_containers().await {
            Ok(containers) => containers,
            Err(err) => {
                tracing::error!(error = %err, "scan: failed to list containers");
                summary.errors += 1;
                return summary;
            }
        };

        // Set up front: a pre-cancelled scan still reports Total == containers.len().
        summary.total = containers.len() as u32;

        let mut hosts = HashSet::new();
        for container in &containers {
            let image = ImageReference::parse(&container.image);
            hosts.insert(image.registry_host().to_string());
        }
        for host in &hosts {
            self.rate_tracker.discover(host).await;
            if let Some(headers) = self.registry.probe(host).await {
                self.rate_tracker.record(host, &headers, self.clock.now()).await;
            }
        }

        let live_names: Vec<String> =
            containers.iter().filter(|c| !c.is_swarm_task()).map(|c| c.name().to_string()).collect();
        if let Err(err) = self.queue.prune(&live_names).await {
            tracing::warn!(error = %err, "scan: failed to prune stale queue entries");
        }

        let maintenance_window = self.load_maintenance_window().await;

        for container in containers.iter().filter(|c| !c.is_swarm_task()) {
            if cancel.is_cancelled() {
                summary.skipped += 1;
                continue;
            }

            match self.process_container(container, mode, &cancel, &maintenance_window).await {
                ContainerOutcome::Queued => summary.queued += 1,
                ContainerOutcome::Updated => summary.updated += 1,
                ContainerOutcome::Skipped => summary.skipped += 1,
                ContainerOutcome::RateLimited => {
                    summary.rate_limited += 1;
                    summary.skipped += 1;
                    if mode.aborts_scan_on_rate_limit() {
                        break;
                    }
                }
                ContainerOutcome::Error => summary.errors += 1,
            }
        }

        self.emit(SentinelEvent::ScanComplete {
            total: summary.total,
            queued: summary.queued,
            updated: summary.updated,
            skipped: summary.skipped,
            rate_limited: summary.rate_limited,
            errors: summary.errors,
            at: self.clock.now(),
        })
        .await;

        summary
    }

    async fn process_container(
        &self,
        container: &ContainerSummary,
        mode: ScanMode,
        cancel: &CancellationToken,
        maintenance_window: &MaintenanceWindow,
    ) -> ContainerOutcome {
        let name = container.name().to_string();
        let image = ImageReference::parse(&container.image);
        let now = self.clock.now();

        let override_policy = self.store.get_policy_override(&name).await.unwrap_or(None);
        let default_policy = self.config.default_policy().await;
        let latest_auto_update = self.config.latest_auto_update().await;
        let (mut resolved_policy, _source) =
            policy::resolve(override_policy, &container.labels, &image.tag, default_policy, latest_auto_update);
        if resolved_policy == Policy::Pinned {
            return ContainerOutcome::Skipped;
        }
        // The supervisor's own container is always queued for manual
        // approval, never auto-updated, regardless of what policy resolution
        // otherwise produced (a Pinned self container already returned above).
        if container.is_self() {
            resolved_policy = Policy::Manual;
        }

        if self.name_filters.iter().any(|pattern| pattern.matches(&name)) {
            return ContainerOutcome::Skipped;
        }

        if self.skip_for_schedule(container, &name, now).await {
            return ContainerOutcome::Skipped;
        }

        let host = image.registry_host().to_string();
        let reserve = mode.reserve();
        let (ok, _wait_until) = self.rate_tracker.can_proceed(&host, reserve).await;
        if !ok {
            self.record_scan_skip(&name, &container.image, format!("rate limit low on {host}")).await;
            return ContainerOutcome::RateLimited;
        }

        let local_digest = self.runtime.image_digest(&container.image).await.ok().flatten().map(Digest::new);
        let options = check_options(container);
        let check = self.registry.check(&image, local_digest.as_ref(), &options).await;

        if let Some(err) = &check.error {
            self.record_scan_skip(&name, &container.image, err.clone()).await;
            return ContainerOutcome::Error;
        }
        if check.is_local {
            return ContainerOutcome::Skipped;
        }
        if !check.update_available {
            let _ = self.queue.remove(&name).await;
            return ContainerOutcome::Skipped;
        }

        let newer_versions = check.newer_versions.clone().unwrap_or_default();
        let ignored = self.store.get_ignored_versions(&name).await.unwrap_or_default();
        if !newer_versions.is_empty() && newer_versions.iter().all(|v| ignored.contains(v)) {
            return ContainerOutcome::Skipped;
        }

        let remote_digest = match &check.remote_digest {
            Some(digest) => digest.clone(),
            None => return ContainerOutcome::Skipped,
        };

        let snooze = container.label("sentinel.notify-snooze").and_then(parse_duration);
        if self.notification_decision(&name, &remote_digest, now).await
            && self.send_notification(&name, &container.image, &remote_digest).await
        {
            self.mark_notified(&name, now, snooze).await;
        }

        match resolved_policy {
            Policy::Auto => self.act_on_auto_policy(container, &name, &image, &check, cancel, maintenance_window, now).await,
            Policy::Manual => {
                let mut update =
                    build_pending_update(&container.image, local_digest.unwrap_or_else(|| Digest::new("")), remote_digest, now, newer_versions);
                update.container_name = name.clone();
                match self.queue.add(name, update).await {
                    Ok(()) => ContainerOutcome::Queued,
                    Err(err) => {
                        tracing::warn!(error = %err, "scan: failed to persist queued update");
                        ContainerOutcome::Error
                    }
                }
            }
            Policy::Pinned => unreachable!("pinned containers are filtered before this point"),
        }
    }

    async fn act_on_auto_policy(
        &self,
        container: &ContainerSummary,
        name: &str,
        _image: &ImageReference,
        _check: &crate::registry::CheckResult,
        cancel: &CancellationToken,
        maintenance_window: &MaintenanceWindow,
        now: DateTime<Utc>,
    ) -> ContainerOutcome {
        if self.config.dry_run().await {
            self.record_history(name, &container.image, None, &container.image, None, Outcome::DryRun, 0, None).await;
            return ContainerOutcome::Updated;
        }
        if container.label("sentinel.pull-only") == Some("true") {
            let _ = self.runtime.pull_image(&container.image).await;
            self.record_history(name, &container.image, None, &container.image, None, Outcome::PullOnly, 0, None).await;
            return ContainerOutcome::Updated;
        }
        if let Some(delay) = container.label("sentinel.update-delay").and_then(parse_duration) {
            if let Ok(Some(state)) = self.store.get_notify_state(name).await {
                if now - state.first_seen < delay {
                    return ContainerOutcome::Skipped;
                }
            }
        }
        if !maintenance_window.is_open(now) {
            return ContainerOutcome::Skipped;
        }
        if cancel.is_cancelled() {
            return ContainerOutcome::Skipped;
        }

        match self.update_container(&container.id, name, Some(container.image.clone()), cancel.clone()).await {
            Ok(_) => ContainerOutcome::Updated,
            Err(err) => {
                tracing::warn!(container = name, error = %err, "scan: update_container failed");
                ContainerOutcome::Error
            }
        }
    }

    async fn skip_for_schedule(&self, container: &ContainerSummary, name: &str, now: DateTime<Utc>) -> bool {
        let Some(expr) = container.label("sentinel.schedule").map(str::to_string).or_else(|| self.global_schedule.clone())
        else {
            return false;
        };
        let Ok(schedule) = parse_cron_schedule(&expr) else { return false };
        let skip = match self.last_scan_time(name).await {
            Some(last_scan) => schedule.after(&last_scan).next().map(|next_fire| next_fire > now).unwrap_or(false),
            None => false,
        };
        self.record_last_scan(name, now).await;
        skip
    }

    async fn last_scan_time(&self, name: &str) -> Option<DateTime<Utc>> {
        let key = format!("last_scan::{name}");
        let value = self.store.load_setting(&key).await.ok().flatten()?;
        serde_json::from_value(value).ok()
    }

    async fn record_last_scan(&self, name: &str, now: DateTime<Utc>) {
        let key = format!("last_scan::{name}");
        let _ = self.store.save_setting(&key, serde_json::json!(now)).await;
    }

    async fn load_maintenance_window(&self) -> MaintenanceWindow {
        match self.store.load_setting(MAINTENANCE_WINDOW_SETTING).await {
            Ok(Some(value)) => {
                let expr: String = serde_json::from_value(value).unwrap_or_default();
                // Fail-open: an unparseable expression is treated as always open.
                MaintenanceWindow::parse(&expr).unwrap_or_default()
            }
            _ => MaintenanceWindow::default(),
        }
    }

    async fn record_scan_skip(&self, name: &str, image: &str, reason: String) {
        self.record_history(name, image, None, image, None, Outcome::Skipped, 0, Some(reason)).await;
    }

    // ---- 4.7.5 Notification decision ------------------------------------

    /// Decides whether a notification is due and persists the digest-change
    /// tracking fields of [`NotifyState`], but leaves `last_notified` and
    /// `snoozed_until` untouched — those only advance once delivery is
    /// confirmed, via [`Self::mark_notified`].
    async fn notification_decision(&self, name: &str, remote_digest: &Digest, now: DateTime<Utc>) -> bool {
        let pref = self.store.get_notify_pref(name).await.ok().flatten().unwrap_or_default();
        let existing = self.store.get_notify_state(name).await.ok().flatten();

        let should_send = match pref {
            NotifyPref::Muted | NotifyPref::DigestOnly => false,
            _ => existing.as_ref().map(|s| s.should_notify(remote_digest, now)).unwrap_or(true),
        };

        let mut state = existing.unwrap_or_else(|| NotifyState::new(name, remote_digest.clone(), now));
        if &state.last_digest != remote_digest {
            state.first_seen = now;
            state.last_digest = remote_digest.clone();
            state.snoozed_until = None;
            state.last_notified = None;
        }
        let _ = self.store.set_notify_state(state).await;
        should_send
    }

    /// Records that a notification was actually delivered, advancing
    /// `last_notified` (and the snooze window, if any) only now.
    async fn mark_notified(&self, name: &str, now: DateTime<Utc>, snooze: Option<chrono::Duration>) {
        let Ok(Some(mut state)) = self.store.get_notify_state(name).await else { return };
        state.last_notified = Some(now);
        if let Some(snooze) = snooze {
            state.snoozed_until = Some(now + snooze);
        }
        let _ = self.store.set_notify_state(state).await;
    }

    /// Returns whether the notification was actually delivered — callers use
    /// this to decide whether `NotifyState.last_notified` should advance.
    async fn send_notification(&self, name: &str, image: &str, remote_digest: &Digest) -> bool {
        let Some(notifier) = &self.notifier else { return false };
        let notification = Notification {
            title: format!("Update available for {name}"),
            body: format!("{image} has a newer remote digest {remote_digest}"),
        };
        match notifier.notify(notification).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(container = name, error = %err, "notification delivery failed");
                false
            }
        }
    }

    // ---- 4.7.2 UpdateContainer -------------------------------------------

    /// Pre: acquires the per-name lock. Returns `UpdateInProgress` if
    /// another lifecycle already holds it for `name`.
    pub async fn update_container(
        &self,
        id: &str,
        name: &str,
        target_image: Option<String>,
        cancel: CancellationToken,
    ) -> Result<Outcome, UpdaterError> {
        let guard = self.locks.try_lock(name).ok_or_else(|| UpdaterError::UpdateInProgress(name.to_string()))?;
        let started = self.clock.now();
        let result = self.run_lifecycle(id, name, target_image, started, cancel).await;
        self.locks.unlock(name, guard);
        result
    }

    async fn run_lifecycle(
        &self,
        id: &str,
        name: &str,
        target_image: Option<String>,
        started: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> Result<Outcome, UpdaterError> {
        // Stage 1: inspect + snapshot.
        let inspect = self.runtime.inspect_container(id).await?;
        let Some(config) = inspect.config.clone() else {
            self.record_history(name, &inspect.image, None, &inspect.image, None, Outcome::Failed, elapsed_ms(started, self.clock.now()), Some("container inspect has no config".into())).await;
            return Err(UpdaterError::MissingConfig);
        };
        let old_image = inspect.image.clone();
        let target = target_image.unwrap_or_else(|| old_image.clone());
        let snapshot_blob = serde_json::to_vec(&inspect).map_err(|e| UpdaterError::Internal(e.to_string()))?;
        self.store.save_snapshot(name, snapshot_blob).await?;

        // Stage 2: maintenance flag on.
        self.store.set_maintenance(name, true).await?;

        // Stage 3: pull.
        if let Err(err) = self.runtime.pull_image(&target).await {
            self.store.set_maintenance(name, false).await.ok();
            let duration = elapsed_ms(started, self.clock.now());
            self.record_history(name, &old_image, None, &target, None, Outcome::Failed, duration, Some(err.to_string())).await;
            return Err(err.into());
        }

        // Stage 4: stop + remove old.
        if let Err(err) = self.runtime.stop_container(id, STOP_TIMEOUT_SECONDS).await {
            tracing::warn!(container = name, error = %err, "graceful stop failed, proceeding to forced remove");
        }
        if let Err(err) = self.runtime.remove_container(id).await {
            self.store.set_maintenance(name, false).await.ok();
            let duration = elapsed_ms(started, self.clock.now());
            self.record_history(name, &old_image, None, &target, None, Outcome::Failed, duration, Some(err.to_string())).await;
            return Err(err.into());
        }

        // Stage 5: create + start new.
        let spec = build_create_spec(name, &target, &config, &inspect, true);
        let new_id = match self.runtime.create_container(spec).await {
            Ok(id) => id,
            Err(err) => return self.rollback_then_fail(name, &inspect, &old_image, &target, started, err.into()).await,
        };
        if let Err(err) = self.runtime.start_container(&new_id).await {
            self.runtime.remove_container(&new_id).await.ok();
            return self.rollback_then_fail(name, &inspect, &old_image, &target, started, err.into()).await;
        }

        // Stage 6: grace period + validation.
        tokio::select! {
            _ = tokio::time::sleep(self.config.grace_period().await) => {}
            _ = cancel.cancelled() => {}
        }
        let healthy = self.runtime.inspect_container(&new_id).await.map(|i| i.state.is_healthy()).unwrap_or(false);
        if !healthy {
            self.runtime.stop_container(&new_id, STOP_TIMEOUT_SECONDS).await.ok();
            self.runtime.remove_container(&new_id).await.ok();
            return self.rollback_then_fail(name, &inspect, &old_image, &target, started, UpdaterError::ValidationFailed).await;
        }

        // Stage 7: post-update hooks — no hook collaborator is specified
        // for this workspace, so this is a deliberate no-op.

        // Stage 8: finalise.
        let finalise_id = match self.finalise(name, &new_id).await {
            Ok(id) => id,
            Err(FinaliseError { stage, source }) if stage.is_destructive() => {
                return self.rollback_then_fail(name, &inspect, &old_image, &target, started, source).await;
            }
            Err(FinaliseError { source, .. }) => {
                self.store.set_maintenance(name, false).await.ok();
                self.queue.remove(name).await.ok();
                let duration = elapsed_ms(started, self.clock.now());
                self.record_history(name, &old_image, None, &target, None, Outcome::FinaliseWarning, duration, Some(source.to_string())).await;
                self.emit(SentinelEvent::ContainerUpdate { container_name: name.to_string(), outcome: Outcome::FinaliseWarning, at: self.clock.now() }).await;
                return Err(source);
            }
        };

        // Stage 9: success.
        self.store.set_maintenance(name, false).await.ok();
        self.queue.remove(name).await.ok();
        self.store.clear_notify_state(name).await.ok();
        self.store.clear_ignored_versions(name).await.ok();
        self.store.delete_old_snapshots(name, 1).await.ok();
        self.repair_network_namespace(name, &finalise_id).await;
        if self.config.image_cleanup().await {
            self.cleanup_old_image(&old_image).await;
        }
        if self.restart_dependents_enabled {
            self.restart_dependents(name).await;
        }

        let duration = elapsed_ms(started, self.clock.now());
        self.record_history(name, &old_image, None, &target, None, Outcome::Success, duration, None).await;
        self.emit(SentinelEvent::ContainerUpdate { container_name: name.to_string(), outcome: Outcome::Success, at: self.clock.now() }).await;
        Ok(Outcome::Success)
    }

    async fn rollback_then_fail(
        &self,
        name: &str,
        snapshot: &ContainerInspect,
        old_image: &str,
        target: &str,
        started: DateTime<Utc>,
        source: UpdaterError,
    ) -> Result<Outcome, UpdaterError> {
        let duration = elapsed_ms(started, self.clock.now());
        self.record_history(name, old_image, None, target, None, Outcome::Failed, duration, Some(source.to_string())).await;
        self.do_rollback(name, snapshot, started).await;
        Err(source)
    }

    // ---- 4.7.2 step 8: finalise -------------------------------------------

    /// Replaces the running container with an identical one that lacks the
    /// `sentinel.maintenance` label. Returns the id of the finalised
    /// container on success.
    async fn finalise(&self, name: &str, running_id: &str) -> Result<String, FinaliseError> {
        let inspect = self
            .runtime
            .inspect_container(running_id)
            .await
            .map_err(|e| FinaliseError { stage: FinaliseStage::Inspect, source: e.into() })?;
        let Some(config) = inspect.config.clone() else {
            return Err(FinaliseError {
                stage: FinaliseStage::Inspect,
                source: UpdaterError::MissingConfig,
            });
        };

        self.runtime
            .stop_container(running_id, STOP_TIMEOUT_SECONDS)
            .await
            .map_err(|e| FinaliseError { stage: FinaliseStage::Stop, source: e.into() })?;

        self.runtime
            .remove_container(running_id)
            .await
            .map_err(|e| FinaliseError { stage: FinaliseStage::Remove, source: e.into() })?;

        let spec = build_create_spec(name, &inspect.image, &config, &inspect, false);
        let finalise_id = self
            .runtime
            .create_container(spec)
            .await
            .map_err(|e| FinaliseError { stage: FinaliseStage::Create, source: e.into() })?;

        if let Err(err) = self.runtime.start_container(&finalise_id).await {
            self.runtime.remove_container(&finalise_id).await.ok();
            return Err(FinaliseError { stage: FinaliseStage::Start, source: err.into() });
        }

        Ok(finalise_id)
    }

    // ---- 4.7.6 doRollback -------------------------------------------------

    async fn do_rollback(&self, name: &str, snapshot: &ContainerInspect, started: DateTime<Utc>) {
        let outcome_result: Result<(), UpdaterError> = async {
            if let Some(current) = self.find_container_id_by_name(name).await {
                self.runtime.stop_container(&current, STOP_TIMEOUT_SECONDS).await.ok();
                self.runtime.remove_container(&current).await.ok();
            }
            let Some(config) = snapshot.config.clone() else {
                return Err(UpdaterError::MissingConfig);
            };
            let spec = build_create_spec(name, &snapshot.image, &config, snapshot, false);
            let id = self.runtime.create_container(spec).await?;
            self.runtime.start_container(&id).await?;
            Ok(())
        }
        .await;

        self.store.set_maintenance(name, false).await.ok();
        let duration = elapsed_ms(started, self.clock.now());
        let (outcome, error) = match &outcome_result {
            Ok(()) => (Outcome::RollbackSuccess, None),
            Err(err) => (Outcome::RollbackFailed, Some(err.to_string())),
        };
        self.record_history(name, &snapshot.image, None, &snapshot.image, None, outcome, duration, error.clone()).await;
        self.emit(SentinelEvent::ContainerUpdate { container_name: name.to_string(), outcome, at: self.clock.now() }).await;
        if let Some(notifier) = &self.notifier {
            let body = match &error {
                Some(reason) => format!("rollback for {name} failed: {reason}"),
                None => format!("{name} was rolled back to its previous image"),
            };
            let _ = notifier.notify(Notification { title: format!("Rollback for {name}"), body }).await;
        }
    }

    async fn find_container_id_by_name(&self, name: &str) -> Option<String> {
        let all = self.runtime.list_all_containers().await.ok()?;
        all.into_iter().find(|c| c.name() == name).map(|c| c.id)
    }

    // ---- 4.7.4 Shared network namespace repair -----------------------------

    async fn repair_network_namespace(&self, name: &str, id: &str) {
        let Ok(inspect) = self.runtime.inspect_container(id).await else { return };

        if let Some(_provider) = inspect.host_config.network_provider() {
            let sandbox_empty = inspect.network_settings.sandbox_key.as_deref().unwrap_or("").is_empty();
            if sandbox_empty {
                let _ = self.runtime.restart_container(id).await;
            }
        }

        let Ok(all) = self.runtime.list_all_containers().await else { return };
        for other in all {
            if other.id == id {
                continue;
            }
            let Ok(other_inspect) = self.runtime.inspect_container(&other.id).await else { continue };
            let provider = other_inspect.host_config.network_provider();
            if provider == Some(name) || provider == Some(id) {
                let _ = self.runtime.restart_container(&other.id).await;
            }
        }
    }

    // ---- 4.7.7 Image cleanup ------------------------------------------------

    async fn cleanup_old_image(&self, old_image: &str) {
        let Ok(all) = self.runtime.list_all_containers().await else { return };
        if all.iter().any(|c| c.image == old_image) {
            return;
        }
        if let Err(err) = self.runtime.remove_image(old_image).await {
            tracing::warn!(image = old_image, error = %err, "image cleanup failed");
        }
    }

    // ---- 4.7.2 step 9: restart direct dependents ---------------------------

    async fn restart_dependents(&self, name: &str) {
        let Ok(all) = self.runtime.list_all_containers().await else { return };
        for container in &all {
            if depends_on(container, name) {
                if let Err(err) = self.runtime.restart_container(&container.id).await {
                    tracing::warn!(dependent = container.name(), provider = name, error = %err, "failed to restart dependent");
                }
            }
        }
    }

    async fn record_history(
        &self,
        name: &str,
        old_image: &str,
        old_digest: Option<Digest>,
        new_image: &str,
        new_digest: Option<Digest>,
        outcome: Outcome,
        duration_ms: u64,
        error: Option<String>,
    ) {
        let record = UpdateRecord {
            timestamp: self.clock.now(),
            container_name: name.to_string(),
            old_image: old_image.to_string(),
            old_digest,
            new_image: new_image.to_string(),
            new_digest,
            outcome,
            duration_ms,
            error,
        };
        if let Err(err) = self.store.record_update(record).await {
            tracing::warn!(container = name, error = %err, "failed to record update history");
        }
    }

    async fn emit(&self, event: SentinelEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event).await;
        }
    }
}

struct FinaliseError {
    stage: FinaliseStage,
    source: UpdaterError,
}

fn elapsed_ms(started: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - started).num_milliseconds().max(0) as u64
}

/// Builds creation config from an inspected container: IPAM/alias state
/// survives a recreate, operational fields do not.
fn build_create_spec(
    name: &str,
    image: &str,
    config: &sentinel_model::runtime::ContainerConfig,
    inspect: &ContainerInspect,
    maintenance: bool,
) -> CreateSpec {
    let mut labels = config.labels.clone();
    if maintenance {
        labels.insert("sentinel.maintenance".to_string(), "true".to_string());
    } else {
        labels.remove("sentinel.maintenance");
    }
    CreateSpec {
        name: name.to_string(),
        image: image.to_string(),
        labels,
        env: config.env.clone(),
        cmd: config.cmd.clone(),
        entrypoint: config.entrypoint.clone(),
        host_config: inspect.host_config.clone(),
        network_config: NetworkConfig::from(&inspect.network_settings),
    }
}

fn check_options(container: &ContainerSummary) -> CheckOptions {
    CheckOptions {
        semver_scope: container.label("sentinel.semver-scope").and_then(|v| v.parse().ok()),
        include: container.label("sentinel.tag-include").and_then(|v| regex::Regex::new(v).ok()),
        exclude: container.label("sentinel.tag-exclude").and_then(|v| regex::Regex::new(v).ok()),
    }
}

/// Recognises `sentinel.depends-on` (comma list) and the compose-style
/// `com.docker.compose.depends_on` (`svc:cond[,...]`) labels.
fn depends_on(container: &ContainerSummary, provider: &str) -> bool {
    if let Some(raw) = container.label("sentinel.depends-on") {
        if raw.split(',').map(str::trim).any(|n| n == provider) {
            return true;
        }
    }
    if let Some(raw) = container.label("com.docker.compose.depends_on") {
        if raw.split(',').filter_map(|entry| entry.split_once(':').map(|(svc, _)| svc).or(Some(entry))).any(|svc| svc.trim() == provider) {
            return true;
        }
    }
    false
}

fn parse_cron_schedule(expr: &str) -> Result<cron::Schedule, cron::error::Error> {
    // The `cron` crate parses 6/7-field Quartz-style expressions; spec
    // labels use 5-field crontab syntax, so a zero seconds field is
    // prepended.
    format!("0 {expr}").parse()
}

/// Parses a Go-style duration such as `24h`, `30m`, `90s`, or `2d`.
fn parse_duration(raw: &str) -> Option<chrono::Duration> {
    let raw = raw.trim();
    let split_at = raw.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = raw.split_at(split_at);
    let amount: i64 = digits.parse().ok()?;
    match unit {
        "s" => Some(chrono::Duration::seconds(amount)),
        "m" => Some(chrono::Duration::minutes(amount)),
        "h" => Some(chrono::Duration::hours(amount)),
        "d" => Some(chrono::Duration::days(amount)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_contracts::runtime::testing::{FailurePoints, FakeContainer, FakeRuntime};
    use sentinel_model::runtime::{ContainerState, HostConfig, NetworkSettings};
    use std::collections::HashMap;
    use tempfile::tempdir;

    struct FixedClock(DateTime<Utc>);
    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn host_config() -> HostConfig {
        HostConfig { network_mode: "bridge".into(), binds: vec![], port_bindings: HashMap::new(), restart_policy: None }
    }

    async fn build_updater(runtime: Arc<FakeRuntime>) -> (Updater, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("sentinel.redb")).await.unwrap();
        let queue = Arc::new(Queue::load(store.clone(), None).await.unwrap());
        let config = Arc::new(RuntimeConfig::new(sentinel_config::InitialRuntimeConfig {
            poll_interval: std::time::Duration::from_secs(60),
            grace_period: std::time::Duration::from_millis(1),
            default_policy: sentinel_model::enums::Policy::Manual,
            latest_auto_update: true,
            image_cleanup: false,
        }));
        let updater = Updater::new(
            runtime,
            store,
            queue,
            RegistryChecker::new(),
            Arc::new(RateTracker::new()),
            config,
            false,
            None,
            None,
            Arc::new(FixedClock(Utc::now())),
            Vec::new(),
            None,
        );
        (updater, dir)
    }

    fn seed_container(runtime: &FakeRuntime, name: &str) -> FakeContainer {
        let container = FakeContainer {
            id: "c1".into(),
            name: name.into(),
            image: "nginx:1.24".into(),
            labels: HashMap::new(),
            host_config: host_config(),
            network_settings: NetworkSettings::default(),
            state: ContainerState { running: true, restarting: false },
        };
        runtime.seed(container.clone());
        container
    }

    #[tokio::test]
    async fn second_concurrent_update_is_refused() {
        let runtime = Arc::new(FakeRuntime::new());
        seed_container(&runtime, "nginx");
        let (updater, _dir) = build_updater(runtime).await;

        let guard = updater.locks.try_lock("nginx").unwrap();
        let result = updater.update_container("c1", "nginx", None, CancellationToken::new()).await;
        assert!(matches!(result, Err(UpdaterError::UpdateInProgress(_))));
        updater.locks.unlock("nginx", guard);
    }

    #[tokio::test]
    async fn successful_update_clears_maintenance_and_records_history() {
        let runtime = Arc::new(FakeRuntime::new());
        seed_container(&runtime, "nginx");
        let (updater, _dir) = build_updater(runtime.clone()).await;

        let outcome = updater.update_container("c1", "nginx", Some("nginx:1.25".into()), CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Success);
        assert!(!updater.store.get_maintenance("nginx").await.unwrap());

        let history = updater.store.list_history(10, None).await.unwrap();
        assert_eq!(history.iter().filter(|r| r.outcome == Outcome::Success).count(), 1);

        assert_eq!(runtime.call_count("pull_image"), 1);
        assert_eq!(runtime.call_count("stop_container"), 2);
        assert_eq!(runtime.call_count("remove_container"), 2);
        assert_eq!(runtime.call_count("create_container"), 2);
        assert_eq!(runtime.call_count("start_container"), 2);
    }

    #[tokio::test]
    async fn destructive_finalise_failure_triggers_rollback() {
        let runtime = Arc::new(FakeRuntime::new());
        seed_container(&runtime, "nginx");
        let (updater, _dir) = build_updater(runtime.clone()).await;

        // The lifecycle's own recreate (stage 5) is the first create call
        // and must succeed; finalise's recreate is the second and is made
        // to fail, exercising FinaliseStage::Create's destructive branch.
        runtime.set_failures(FailurePoints { fail_create_after: Some(2), ..Default::default() });

        let result = updater.update_container("c1", "nginx", Some("nginx:1.25".into()), CancellationToken::new()).await;
        assert!(result.is_err());
        assert!(!updater.store.get_maintenance("nginx").await.unwrap());

        let history = updater.store.list_history(10, None).await.unwrap();
        assert!(history.iter().any(|r| r.outcome == Outcome::RollbackSuccess));
    }

    #[tokio::test]
    async fn non_destructive_finalise_stop_failure_is_a_finalise_warning() {
        let runtime = Arc::new(FakeRuntime::new());
        seed_container(&runtime, "nginx");
        let (updater, _dir) = build_updater(runtime.clone()).await;

        // Stage 4's own stop call (the first) must succeed to reach
        // finalise; only finalise's stop call (the second) fails, which is
        // FinaliseStage::Stop — non-destructive, so no rollback fires.
        runtime.set_failures(FailurePoints { fail_stop_after: Some(2), ..Default::default() });

        let result = updater.update_container("c1", "nginx", Some("nginx:1.25".into()), CancellationToken::new()).await;
        assert!(result.is_err());
        assert!(!updater.store.get_maintenance("nginx").await.unwrap());
        assert_eq!(runtime.call_count("create_container"), 1, "a non-destructive finalise failure must not roll back");

        let history = updater.store.list_history(10, None).await.unwrap();
        assert!(history.iter().any(|r| r.outcome == Outcome::FinaliseWarning));
    }

    #[tokio::test]
    async fn lifecycle_start_failure_rolls_back_to_the_snapshot() {
        let runtime = Arc::new(FakeRuntime::new());
        seed_container(&runtime, "nginx");
        let (updater, _dir) = build_updater(runtime.clone()).await;

        // `start` fails unconditionally, so the rollback's own start attempt
        // fails too; the lifecycle still must exit with maintenance cleared.
        runtime.set_failures(FailurePoints { start: true, ..Default::default() });
        let result = updater.update_container("c1", "nginx", Some("nginx:1.25".into()), CancellationToken::new()).await;
        assert!(result.is_err());
        assert!(!updater.store.get_maintenance("nginx").await.unwrap());

        let history = updater.store.list_history(10, None).await.unwrap();
        assert!(history.iter().any(|r| r.outcome == Outcome::RollbackFailed));
    }

    #[tokio::test]
    async fn maintenance_flag_is_false_after_every_exit_path() {
        let runtime = Arc::new(FakeRuntime::new());
        seed_container(&runtime, "nginx");
        let (updater, _dir) = build_updater(runtime.clone()).await;

        runtime.set_failures(FailurePoints { pull: true, ..Default::default() });
        let result = updater.update_container("c1", "nginx", None, CancellationToken::new()).await;
        assert!(result.is_err());
        assert!(!updater.store.get_maintenance("nginx").await.unwrap());
    }

    #[test]
    fn depends_on_recognises_both_label_styles() {
        let mut labels = HashMap::new();
        labels.insert("sentinel.depends-on".to_string(), "db, cache".to_string());
        let container = ContainerSummary { id: "x".into(), names: vec!["/web".into()], image: "app".into(), labels };
        assert!(depends_on(&container, "db"));
        assert!(depends_on(&container, "cache"));
        assert!(!depends_on(&container, "other"));

        let mut labels = HashMap::new();
        labels.insert("com.docker.compose.depends_on".to_string(), "db:service_started".to_string());
        let container = ContainerSummary { id: "y".into(), names: vec!["/web".into()], image: "app".into(), labels };
        assert!(depends_on(&container, "db"));
    }

    #[test]
    fn parse_duration_supports_common_units() {
        assert_eq!(parse_duration("30s"), Some(chrono::Duration::seconds(30)));
        assert_eq!(parse_duration("5m"), Some(chrono::Duration::minutes(5)));
        assert_eq!(parse_duration("2h"), Some(chrono::Duration::hours(2)));
        assert_eq!(parse_duration("1d"), Some(chrono::Duration::days(1)));
        assert_eq!(parse_duration("bogus"), None);
    }
}
