//! Per-container-name update exclusion: at most one lifecycle executes
//! for a given name across the process at once.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A sharded concurrent map of mutexes, one per in-flight container name.
/// `unlock` removes the entry so the map never grows unbounded on bursty
/// workloads.
#[derive(Debug, Default)]
pub struct LockTable {
    entries: DashMap<String, Arc<Mutex<()>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically loads-or-creates the entry for `name` and attempts a
    /// non-blocking acquisition. `None` means another lifecycle already
    /// holds it.
    pub fn try_lock(&self, name: &str) -> Option<OwnedMutexGuard<()>> {
        let mutex = self.entries.entry(name.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        mutex.try_lock_owned().ok()
    }

    /// Drops `guard` and removes the name's entry, but only if no other
    /// caller holds a clone of the same `Arc` — otherwise a concurrent
    /// `try_lock` that cloned the entry just before this runs could have it
    /// evicted out from under it, and a third caller would then insert a
    /// fresh, unrelated mutex and acquire it while the second caller's
    /// lifecycle is still in flight. `remove_if` runs under the shard's own
    /// lock, so the strong-count check and the removal are atomic with
    /// respect to `try_lock`'s `entry()` call on the same key.
    pub fn unlock(&self, name: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.entries.remove_if(name, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// Non-owning probe: attempts a non-blocking lock and immediately
    /// releases it if it succeeds.
    pub fn is_updating(&self, name: &str) -> bool {
        match self.entries.get(name) {
            None => false,
            Some(mutex) => mutex.try_lock().is_err(),
        }
    }
}
