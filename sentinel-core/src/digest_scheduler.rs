//! Consolidated digest notifications: rather than one message
//! per container the instant a new image lands, operators on
//! [`NotifyPref::DigestOnly`] get a single rolled-up notification at a
//! configurable wall-clock time, at most once per cadence window.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use sentinel_contracts::clock::Clock;
use sentinel_contracts::event_bus::EventBus;
use sentinel_contracts::notifier::{Notification, Notifier};
use sentinel_model::enums::NotifyPref;
use sentinel_model::events::SentinelEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::queue::Queue;
use crate::store::Store;

const LAST_DIGEST_SETTING: &str = "digest_scheduler::last_fired";

/// When the consolidated digest fires, and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestSchedule {
    pub fire_time: NaiveTime,
    pub cadence: Duration,
}

impl Default for DigestSchedule {
    fn default() -> Self {
        Self { fire_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(), cadence: Duration::days(1) }
    }
}

impl DigestSchedule {
    /// The next instant at or after `after` that satisfies both the daily
    /// wall-clock fire time and the cadence since `last_fired`. Pure so it
    /// can be unit tested without a running clock.
    pub fn next_fire(&self, after: DateTime<Utc>, last_fired: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let today_fire = after.date_naive().and_time(self.fire_time).and_utc();
        let mut candidate = if today_fire > after { today_fire } else { today_fire + Duration::days(1) };
        if let Some(last) = last_fired {
            while candidate < last + self.cadence {
                candidate += Duration::days(1);
            }
        }
        candidate
    }
}

#[derive(Debug)]
enum Command {
    TriggerDigest,
    Reset(DigestSchedule),
}

#[derive(Debug, Clone)]
pub struct DigestSchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl DigestSchedulerHandle {
    /// Fires the digest immediately regardless of the scheduled time.
    pub fn trigger_digest(&self) {
        let _ = self.tx.try_send(Command::TriggerDigest);
    }

    /// Installs a new schedule and recomputes the next fire time from now.
    pub fn reset(&self, schedule: DigestSchedule) {
        let _ = self.tx.try_send(Command::Reset(schedule));
    }
}

pub struct DigestScheduler {
    store: Store,
    queue: Arc<Queue>,
    notifier: Option<Arc<dyn Notifier>>,
    events: Option<Arc<dyn EventBus>>,
    clock: Arc<dyn Clock>,
    schedule: DigestSchedule,
}

impl DigestScheduler {
    pub fn new(
        store: Store,
        queue: Arc<Queue>,
        notifier: Option<Arc<dyn Notifier>>,
        events: Option<Arc<dyn EventBus>>,
        clock: Arc<dyn Clock>,
        schedule: DigestSchedule,
    ) -> Self {
        Self { store, queue, notifier, events, clock, schedule }
    }

    pub fn spawn(self, cancel: CancellationToken) -> (tokio::task::JoinHandle<()>, DigestSchedulerHandle) {
        let (tx, rx) = mpsc::channel(1);
        let handle = DigestSchedulerHandle { tx };
        let join = tokio::spawn(self.run(rx, cancel));
        (join, handle)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        loop {
            let last_fired = self.last_fired().await;
            let now = self.clock.now();
            let next = self.schedule.next_fire(now, last_fired);
            let wait = (next - now).to_std().unwrap_or(StdDuration::ZERO);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("digest scheduler: cancelled, exiting");
                    return;
                }
                cmd = rx.recv() => {
                    match cmd {
                        None => return,
                        Some(Command::TriggerDigest) => self.fire().await,
                        Some(Command::Reset(schedule)) => self.schedule = schedule,
                    }
                }
                _ = tokio::time::sleep(wait) => {
                    self.fire().await;
                }
            }
        }
    }

    async fn fire(&self) {
        let names = match self.store.list_digest_only_names().await {
            Ok(names) => names,
            Err(err) => {
                tracing::warn!(error = %err, "digest scheduler: failed to list digest-only containers");
                return;
            }
        };
        let states = match self.store.list_notify_states().await {
            Ok(states) => states,
            Err(err) => {
                tracing::warn!(error = %err, "digest scheduler: failed to list notify state");
                return;
            }
        };

        let last_fired = self.last_fired().await;
        let mut ready: Vec<String> = states
            .into_iter()
            .filter(|s| names.iter().any(|n| n == &s.container_name))
            .filter(|s| last_fired.is_none_or(|last| s.first_seen > last))
            .map(|s| s.container_name)
            .collect();

        for update in self.queue.list().await {
            if ready.iter().any(|n| n == &update.container_name) {
                continue;
            }
            let pref = self.store.get_notify_pref(&update.container_name).await.ok().flatten().unwrap_or_default();
            if pref != NotifyPref::Muted {
                ready.push(update.container_name);
            }
        }

        let now = self.clock.now();
        if !ready.is_empty() {
            self.notify(&ready).await;
            if let Some(events) = &self.events {
                events.publish(SentinelEvent::DigestReady { container_names: ready, at: now });
            }
        }
        if let Err(err) = self.store.save_setting(LAST_DIGEST_SETTING, serde_json::json!(now.to_rfc3339())).await {
            tracing::warn!(error = %err, "digest scheduler: failed to persist last-fired timestamp");
        }
    }

    async fn notify(&self, names: &[String]) {
        let Some(notifier) = &self.notifier else { return };
        let body = names.iter().map(|n| format!("- {n}")).collect::<Vec<_>>().join("\n");
        let notification = Notification {
            title: format!("{} container{} have updates available", names.len(), if names.len() == 1 { "" } else { "s" }),
            body,
        };
        if let Err(err) = notifier.notify(notification).await {
            tracing::warn!(error = %err, "digest scheduler: notification delivery failed");
        }
    }

    async fn last_fired(&self) -> Option<DateTime<Utc>> {
        let value = self.store.load_setting(LAST_DIGEST_SETTING).await.ok().flatten()?;
        let raw = value.as_str()?;
        DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use sentinel_model::image::Digest;
    use sentinel_model::notify::NotifyState;

    use super::*;

    struct FixedClock(DateTime<Utc>);
    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: Notification) -> Result<(), sentinel_contracts::notifier::NotifyError> {
            self.sent.lock().unwrap().push(notification);
            Ok(())
        }
    }

    async fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (Store::open(dir.path().join("sentinel.redb")).await.unwrap(), dir)
    }

    async fn empty_queue(store: Store) -> Arc<Queue> {
        Arc::new(Queue::load(store, None).await.unwrap())
    }

    fn state(name: &str, first_seen: DateTime<Utc>) -> NotifyState {
        NotifyState {
            container_name: name.to_string(),
            last_digest: Digest::new("sha256:aaa"),
            first_seen,
            last_notified: None,
            snoozed_until: None,
        }
    }

    #[test]
    fn next_fire_lands_on_todays_fire_time_when_still_ahead() {
        let schedule =
            DigestSchedule { fire_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(), cadence: Duration::days(1) };
        let now = "2026-07-26T03:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let next = schedule.next_fire(now, None);
        assert_eq!(next, "2026-07-26T09:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn next_fire_rolls_to_tomorrow_once_todays_time_has_passed() {
        let schedule =
            DigestSchedule { fire_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(), cadence: Duration::days(1) };
        let now = "2026-07-26T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let next = schedule.next_fire(now, None);
        assert_eq!(next, "2026-07-27T09:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn next_fire_respects_a_multi_day_cadence() {
        let schedule =
            DigestSchedule { fire_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(), cadence: Duration::days(3) };
        let last_fired = "2026-07-25T09:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let now = "2026-07-26T03:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let next = schedule.next_fire(now, Some(last_fired));
        assert_eq!(next, "2026-07-28T09:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[tokio::test]
    async fn fire_notifies_once_for_all_digest_only_containers_with_fresh_state() {
        let (store, _dir) = test_store().await;
        store.set_notify_pref("nginx", NotifyPref::DigestOnly).await.unwrap();
        store.set_notify_pref("redis", NotifyPref::DigestOnly).await.unwrap();
        store.set_notify_pref("postgres", NotifyPref::EveryScan).await.unwrap();

        let now = Utc::now();
        store.set_notify_state(state("nginx", now)).await.unwrap();
        store.set_notify_state(state("redis", now)).await.unwrap();
        store.set_notify_state(state("postgres", now)).await.unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let queue = empty_queue(store.clone()).await;
        let scheduler = DigestScheduler::new(
            store.clone(),
            queue,
            Some(notifier.clone()),
            None,
            Arc::new(FixedClock(now)),
            DigestSchedule::default(),
        );
        scheduler.fire().await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("nginx"));
        assert!(sent[0].body.contains("redis"));
        assert!(!sent[0].body.contains("postgres"));
    }

    #[tokio::test]
    async fn a_second_fire_before_new_state_arrives_sends_nothing() {
        let (store, _dir) = test_store().await;
        store.set_notify_pref("nginx", NotifyPref::DigestOnly).await.unwrap();
        let now = Utc::now();
        store.set_notify_state(state("nginx", now)).await.unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let queue = empty_queue(store.clone()).await;
        let scheduler = DigestScheduler::new(
            store.clone(),
            queue,
            Some(notifier.clone()),
            None,
            Arc::new(FixedClock(now)),
            DigestSchedule::default(),
        );
        scheduler.fire().await;
        scheduler.fire().await;

        assert_eq!(notifier.sent.lock().unwrap().len(), 1, "no fresh notify state arrived between fires");
    }

    #[tokio::test]
    async fn a_pending_queue_entry_is_folded_into_the_digest_even_without_notify_state() {
        use sentinel_model::pending_update::PendingUpdate;

        let (store, _dir) = test_store().await;
        let queue = empty_queue(store.clone()).await;
        let now = Utc::now();
        queue
            .add(
                "traefik".to_string(),
                PendingUpdate {
                    container_name: "traefik".to_string(),
                    current_image: "traefik:v2".to_string(),
                    current_digest: Digest::new("sha256:aaa"),
                    remote_digest: Digest::new("sha256:bbb"),
                    detected_at: now,
                    newer_versions: Vec::new(),
                },
            )
            .await
            .unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = DigestScheduler::new(
            store.clone(),
            queue,
            Some(notifier.clone()),
            None,
            Arc::new(FixedClock(now)),
            DigestSchedule::default(),
        );
        scheduler.fire().await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("traefik"));
    }

    #[tokio::test]
    async fn a_muted_pending_queue_entry_is_excluded_from_the_digest() {
        use sentinel_model::pending_update::PendingUpdate;

        let (store, _dir) = test_store().await;
        store.set_notify_pref("traefik", NotifyPref::Muted).await.unwrap();
        let queue = empty_queue(store.clone()).await;
        let now = Utc::now();
        queue
            .add(
                "traefik".to_string(),
                PendingUpdate {
                    container_name: "traefik".to_string(),
                    current_image: "traefik:v2".to_string(),
                    current_digest: Digest::new("sha256:aaa"),
                    remote_digest: Digest::new("sha256:bbb"),
                    detected_at: now,
                    newer_versions: Vec::new(),
                },
            )
            .await
            .unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = DigestScheduler::new(
            store.clone(),
            queue,
            Some(notifier.clone()),
            None,
            Arc::new(FixedClock(now)),
            DigestSchedule::default(),
        );
        scheduler.fire().await;

        assert!(notifier.sent.lock().unwrap().is_empty(), "muted container must not appear in the digest");
    }
}
