//! The durable, at-most-one-entry-per-name set of updates awaiting operator
//! approval.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sentinel_contracts::event_bus::EventBus;
use sentinel_model::events::SentinelEvent;
use sentinel_model::image::Digest;
use sentinel_model::pending_update::PendingUpdate;
use tokio::sync::Mutex;

use crate::store::{Store, StoreError};

/// Persistent pending-update set keyed by container name (or
/// `hostID::name` for cluster-scoped entries).
///
/// The mutex brackets both the in-memory map mutation and the Store persist
/// call, so a crash mid-mutation never leaves disk state ahead of memory or
/// vice versa.
pub struct Queue {
    store: Store,
    events: Option<Arc<dyn EventBus>>,
    inner: Mutex<HashMap<String, PendingUpdate>>,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").finish_non_exhaustive()
    }
}

impl Queue {
    /// Loads any previously persisted queue from `store`.
    pub async fn load(store: Store, events: Option<Arc<dyn EventBus>>) -> Result<Self, StoreError> {
        let map = match store.load_pending_queue().await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => HashMap::new(),
        };
        Ok(Self { store, events, inner: Mutex::new(map) })
    }

    pub async fn add(&self, key: String, update: PendingUpdate) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        guard.insert(key.clone(), update);
        self.persist_locked(&guard).await?;
        drop(guard);
        self.emit(key, true).await;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let existed = guard.remove(key).is_some();
        self.persist_locked(&guard).await?;
        drop(guard);
        if existed {
            self.emit(key.to_string(), false).await;
        }
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<PendingUpdate> {
        self.inner.lock().await.get(key).cloned()
    }

    /// Atomically fetches and removes the entry in one critical section.
    pub async fn approve(&self, key: &str) -> Result<Option<PendingUpdate>, StoreError> {
        let mut guard = self.inner.lock().await;
        let removed = guard.remove(key);
        self.persist_locked(&guard).await?;
        drop(guard);
        if removed.is_some() {
            self.emit(key.to_string(), false).await;
        }
        Ok(removed)
    }

    pub async fn list(&self) -> Vec<PendingUpdate> {
        self.inner.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops entries whose key is absent from `live_names`.
    pub async fn prune(&self, live_names: &[String]) -> Result<Vec<String>, StoreError> {
        let mut guard = self.inner.lock().await;
        let stale: Vec<String> =
            guard.keys().filter(|key| !live_names.iter().any(|name| name == *key)).cloned().collect();
        for key in &stale {
            guard.remove(key);
        }
        if !stale.is_empty() {
            self.persist_locked(&guard).await?;
        }
        drop(guard);
        for key in &stale {
            self.emit(key.clone(), false).await;
        }
        Ok(stale)
    }

    async fn persist_locked(&self, guard: &HashMap<String, PendingUpdate>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(guard)?;
        self.store.save_pending_queue(bytes).await
    }

    async fn emit(&self, container_name: String, added: bool) {
        if let Some(bus) = &self.events {
            bus.publish(SentinelEvent::QueueChange { container_name, added, at: Utc::now() }).await;
        }
    }
}

/// Builds a [`PendingUpdate`] the way `Scan` does when a manual-policy
/// container is found to have an update available.
pub fn build_pending_update(
    current_image: &str,
    current_digest: Digest,
    remote_digest: Digest,
    detected_at: DateTime<Utc>,
    newer_versions: Vec<String>,
) -> PendingUpdate {
    PendingUpdate {
        container_name: String::new(),
        current_image: current_image.to_string(),
        current_digest,
        remote_digest,
        detected_at,
        newer_versions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn test_queue() -> (Queue, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("sentinel.redb")).await.unwrap();
        (Queue::load(store, None).await.unwrap(), dir)
    }

    fn sample(name: &str) -> PendingUpdate {
        let mut update = build_pending_update(
            "nginx:1.25",
            Digest::new("sha256:old"),
            Digest::new("sha256:new"),
            Utc::now(),
            Vec::new(),
        );
        update.container_name = name.to_string();
        update
    }

    #[tokio::test]
    async fn add_is_idempotent_per_name() {
        let (queue, _dir) = test_queue().await;
        queue.add("nginx".into(), sample("nginx")).await.unwrap();
        queue.add("nginx".into(), sample("nginx")).await.unwrap();
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn approve_fetches_and_removes() {
        let (queue, _dir) = test_queue().await;
        queue.add("nginx".into(), sample("nginx")).await.unwrap();
        let approved = queue.approve("nginx").await.unwrap();
        assert!(approved.is_some());
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn remove_nonexistent_is_a_no_op() {
        let (queue, _dir) = test_queue().await;
        queue.remove("missing").await.unwrap();
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn prune_drops_entries_for_gone_containers() {
        let (queue, _dir) = test_queue().await;
        queue.add("nginx".into(), sample("nginx")).await.unwrap();
        queue.add("redis".into(), sample("redis")).await.unwrap();
        let dropped = queue.prune(&["nginx".to_string()]).await.unwrap();
        assert_eq!(dropped, vec!["redis".to_string()]);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn queue_persists_across_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sentinel.redb");
        {
            let store = Store::open(&path).await.unwrap();
            let queue = Queue::load(store, None).await.unwrap();
            queue.add("nginx".into(), sample("nginx")).await.unwrap();
        }
        let store = Store::open(&path).await.unwrap();
        let reloaded = Queue::load(store, None).await.unwrap();
        assert_eq!(reloaded.len().await, 1);
    }
}
