//! Durable, transactional, ordered key-value storage.
//!
//! Backed by `redb`, a pure-Rust embedded engine with ACID transactions and
//! typed tables. Every public method runs its transaction on a blocking
//! thread via `spawn_blocking`, since `redb` itself is synchronous; callers
//! see a normal `async fn`.

mod error;

pub use error::StoreError;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use sentinel_model::enums::{NotifyPref, Policy};
use sentinel_model::history::UpdateRecord;
use sentinel_model::notify::NotifyState;
use sentinel_model::rate_limit::RateLimitState;

const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");
const HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("history");
const PENDING_QUEUE: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_queue");
const POLICY_OVERRIDES: TableDefinition<&str, &str> = TableDefinition::new("policy_overrides");
const MAINTENANCE: TableDefinition<&str, bool> = TableDefinition::new("maintenance");
const NOTIFY_STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("notify_state");
const NOTIFY_PREFS: TableDefinition<&str, &str> = TableDefinition::new("notify_prefs");
const IGNORED_VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("ignored_versions");
const SETTINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("settings");
const REGISTRY_CREDENTIALS: TableDefinition<&str, &[u8]> = TableDefinition::new("registry_credentials");
const RATE_LIMITS: TableDefinition<&str, &[u8]> = TableDefinition::new("rate_limits");

const LOCK_ACQUIRE_DEADLINE: Duration = Duration::from_secs(5);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const QUEUE_BLOB_KEY: &str = "queue";
const RATE_LIMITS_BLOB_KEY: &str = "rate_limits";

/// A single entry in [`Store::list_snapshots`] or the latest-snapshot lookup.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub captured_at: DateTime<Utc>,
    pub blob: Vec<u8>,
}

#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Opens (creating if absent) the store file at `path`, retrying for up
    /// to 5 seconds if another process currently holds the file lock.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open_blocking(&path))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))??;

        let db = Arc::new(db);
        Self::ensure_tables(&db)?;
        Ok(Self { db })
    }

    fn open_blocking(path: &Path) -> Result<Database, StoreError> {
        let deadline = Instant::now() + LOCK_ACQUIRE_DEADLINE;
        loop {
            match Database::create(path) {
                Ok(db) => return Ok(db),
                Err(err) => {
                    if Instant::now() >= deadline {
                        return if is_lock_error(&err) { Err(StoreError::Locked) } else { Err(err.into()) };
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
            }
        }
    }

    fn ensure_tables(db: &Database) -> Result<(), StoreError> {
        let txn = db.begin_write()?;
        txn.open_table(SNAPSHOTS)?;
        txn.open_table(HISTORY)?;
        txn.open_table(PENDING_QUEUE)?;
        txn.open_table(POLICY_OVERRIDES)?;
        txn.open_table(MAINTENANCE)?;
        txn.open_table(NOTIFY_STATE)?;
        txn.open_table(NOTIFY_PREFS)?;
        txn.open_table(IGNORED_VERSIONS)?;
        txn.open_table(SETTINGS)?;
        txn.open_table(REGISTRY_CREDENTIALS)?;
        txn.open_table(RATE_LIMITS)?;
        txn.commit()?;
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db)).await.map_err(|e| StoreError::Join(e.to_string()))?
    }

    // ---- Snapshots ----------------------------------------------------

    pub async fn save_snapshot(&self, name: &str, blob: Vec<u8>) -> Result<(), StoreError> {
        let name = name.to_string();
        self.blocking(move |db| {
            let key = snapshot_key(&name, Utc::now());
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(SNAPSHOTS)?;
                table.insert(key.as_str(), blob.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn get_latest_snapshot(&self, name: &str) -> Result<Option<SnapshotEntry>, StoreError> {
        let mut entries = self.list_snapshots(name).await?;
        Ok(if entries.is_empty() { None } else { Some(entries.remove(0)) })
    }

    /// Newest-first.
    pub async fn list_snapshots(&self, name: &str) -> Result<Vec<SnapshotEntry>, StoreError> {
        let name = name.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(SNAPSHOTS)?;
            let start = format!("{name}\0");
            let end = format!("{name}\u{1}");
            let mut out = Vec::new();
            for row in table.range(start.as_str()..end.as_str())? {
                let (key, value) = row?;
                if let Some(captured_at) = parse_snapshot_timestamp(key.value()) {
                    out.push(SnapshotEntry { captured_at, blob: value.value().to_vec() });
                }
            }
            out.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
            Ok(out)
        })
        .await
    }

    pub async fn delete_old_snapshots(&self, name: &str, keep: usize) -> Result<(), StoreError> {
        let entries = self.list_snapshots(name).await?;
        if entries.len() <= keep {
            return Ok(());
        }
        let name = name.to_string();
        let stale: Vec<DateTime<Utc>> = entries.into_iter().skip(keep).map(|e| e.captured_at).collect();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(SNAPSHOTS)?;
                for captured_at in stale {
                    let key = snapshot_key(&name, captured_at);
                    table.remove(key.as_str())?;
                }
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn count_snapshots(&self) -> Result<u64, StoreError> {
        self.blocking(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(SNAPSHOTS)?;
            Ok(table.len()?)
        })
        .await
    }

    // ---- History --------------------------------------------------------

    pub async fn record_update(&self, record: UpdateRecord) -> Result<(), StoreError> {
        self.blocking(move |db| {
            let key = record.store_key();
            let bytes = serde_json::to_vec(&record)?;
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(HISTORY)?;
                table.insert(key.as_str(), bytes.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    /// Reverse-chronological, optionally paging before an exclusive cursor.
    pub async fn list_history(
        &self,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<UpdateRecord>, StoreError> {
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(HISTORY)?;
            let cursor = before.map(|ts| ts.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true));
            let mut out = Vec::with_capacity(limit.min(64));
            let iter: Box<dyn DoubleEndedIterator<Item = _>> = match &cursor {
                Some(cursor) => Box::new(table.range(..cursor.as_str())?),
                None => Box::new(table.range::<&str>(..)?),
            };
            for row in iter.rev() {
                if out.len() >= limit {
                    break;
                }
                let (_, value) = row?;
                out.push(serde_json::from_slice::<UpdateRecord>(value.value())?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn list_history_by_container(&self, name: &str, limit: usize) -> Result<Vec<UpdateRecord>, StoreError> {
        let name = name.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(HISTORY)?;
            let mut out = Vec::new();
            for row in table.range::<&str>(..)?.rev() {
                if out.len() >= limit {
                    break;
                }
                let (_, value) = row?;
                let record: UpdateRecord = serde_json::from_slice(value.value())?;
                if record.container_name == name {
                    out.push(record);
                }
            }
            Ok(out)
        })
        .await
    }

    pub async fn count_history(&self) -> Result<u64, StoreError> {
        self.blocking(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(HISTORY)?;
            Ok(table.len()?)
        })
        .await
    }

    // ---- Pending queue blob ----------------------------------------------

    pub async fn save_pending_queue(&self, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.put_blob(PENDING_QUEUE, QUEUE_BLOB_KEY, bytes).await
    }

    pub async fn load_pending_queue(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.get_blob(PENDING_QUEUE, QUEUE_BLOB_KEY).await
    }

    // ---- Policy overrides -------------------------------------------------

    pub async fn get_policy_override(&self, name: &str) -> Result<Option<Policy>, StoreError> {
        let name = name.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(POLICY_OVERRIDES)?;
            Ok(table.get(name.as_str())?.and_then(|v| v.value().parse().ok()))
        })
        .await
    }

    pub async fn set_policy_override(&self, name: &str, policy: Policy) -> Result<(), StoreError> {
        let name = name.to_string();
        let value = policy.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(POLICY_OVERRIDES)?;
                table.insert(name.as_str(), value.as_str())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn clear_policy_override(&self, name: &str) -> Result<(), StoreError> {
        self.remove_key(POLICY_OVERRIDES, name).await
    }

    // ---- Maintenance flag --------------------------------------------------

    pub async fn get_maintenance(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(MAINTENANCE)?;
            Ok(table.get(name.as_str())?.map(|v| v.value()).unwrap_or(false))
        })
        .await
    }

    pub async fn set_maintenance(&self, name: &str, flag: bool) -> Result<(), StoreError> {
        let name = name.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(MAINTENANCE)?;
                table.insert(name.as_str(), flag)?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    // ---- Ignored versions ---------------------------------------------------

    pub async fn add_ignored_version(&self, name: &str, version: &str) -> Result<(), StoreError> {
        let name = name.to_string();
        let version = version.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(IGNORED_VERSIONS)?;
                let mut versions: Vec<String> = match table.get(name.as_str())? {
                    Some(v) => serde_json::from_slice(v.value())?,
                    None => Vec::new(),
                };
                if !versions.iter().any(|v| v == &version) {
                    versions.push(version);
                }
                let bytes = serde_json::to_vec(&versions)?;
                table.insert(name.as_str(), bytes.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn get_ignored_versions(&self, name: &str) -> Result<Vec<String>, StoreError> {
        let name = name.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(IGNORED_VERSIONS)?;
            match table.get(name.as_str())? {
                Some(v) => Ok(serde_json::from_slice(v.value())?),
                None => Ok(Vec::new()),
            }
        })
        .await
    }

    pub async fn clear_ignored_versions(&self, name: &str) -> Result<(), StoreError> {
        self.remove_key(IGNORED_VERSIONS, name).await
    }

    // ---- Notify state -------------------------------------------------------

    pub async fn get_notify_state(&self, name: &str) -> Result<Option<NotifyState>, StoreError> {
        let name = name.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(NOTIFY_STATE)?;
            match table.get(name.as_str())? {
                Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn set_notify_state(&self, state: NotifyState) -> Result<(), StoreError> {
        self.blocking(move |db| {
            let bytes = serde_json::to_vec(&state)?;
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(NOTIFY_STATE)?;
                table.insert(state.container_name.as_str(), bytes.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn clear_notify_state(&self, name: &str) -> Result<(), StoreError> {
        self.remove_key(NOTIFY_STATE, name).await
    }

    // ---- Notify prefs ---------------------------------------------------------

    pub async fn get_notify_pref(&self, name: &str) -> Result<Option<NotifyPref>, StoreError> {
        let name = name.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(NOTIFY_PREFS)?;
            Ok(table.get(name.as_str())?.and_then(|v| v.value().parse().ok()))
        })
        .await
    }

    pub async fn set_notify_pref(&self, name: &str, pref: NotifyPref) -> Result<(), StoreError> {
        let name = name.to_string();
        let value = pref.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(NOTIFY_PREFS)?;
                table.insert(name.as_str(), value.as_str())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn delete_notify_pref(&self, name: &str) -> Result<(), StoreError> {
        self.remove_key(NOTIFY_PREFS, name).await
    }

    /// Every container name currently set to [`NotifyPref::DigestOnly`],
    /// for the digest scheduler's consolidated-run query.
    pub async fn list_digest_only_names(&self) -> Result<Vec<String>, StoreError> {
        self.blocking(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(NOTIFY_PREFS)?;
            let mut out = Vec::new();
            for row in table.iter()? {
                let (key, value) = row?;
                if value.value().parse::<NotifyPref>().ok() == Some(NotifyPref::DigestOnly) {
                    out.push(key.value().to_string());
                }
            }
            Ok(out)
        })
        .await
    }

    /// All stored notify state, for the digest scheduler to read which
    /// digests arrived since the last consolidated run.
    pub async fn list_notify_states(&self) -> Result<Vec<NotifyState>, StoreError> {
        self.blocking(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(NOTIFY_STATE)?;
            let mut out = Vec::new();
            for row in table.iter()? {
                let (_, value) = row?;
                out.push(serde_json::from_slice(value.value())?);
            }
            Ok(out)
        })
        .await
    }

    // ---- Settings --------------------------------------------------------------

    pub async fn save_setting(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let key = key.to_string();
        self.blocking(move |db| {
            let bytes = serde_json::to_vec(&value)?;
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(SETTINGS)?;
                table.insert(key.as_str(), bytes.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn load_setting(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let key = key.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(SETTINGS)?;
            match table.get(key.as_str())? {
                Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn get_all_settings(&self) -> Result<std::collections::HashMap<String, serde_json::Value>, StoreError> {
        self.blocking(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(SETTINGS)?;
            let mut out = std::collections::HashMap::new();
            for row in table.iter()? {
                let (key, value) = row?;
                out.insert(key.value().to_string(), serde_json::from_slice(value.value())?);
            }
            Ok(out)
        })
        .await
    }

    // ---- Registry credentials -------------------------------------------------

    pub async fn save_registry_credentials(&self, host: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.put_blob(REGISTRY_CREDENTIALS, host, bytes).await
    }

    pub async fn load_registry_credentials(&self, host: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.get_blob(REGISTRY_CREDENTIALS, host).await
    }

    // ---- Rate limits ------------------------------------------------------------

    pub async fn save_rate_limits(&self, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.put_blob(RATE_LIMITS, RATE_LIMITS_BLOB_KEY, bytes).await
    }

    pub async fn load_rate_limits(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.get_blob(RATE_LIMITS, RATE_LIMITS_BLOB_KEY).await
    }

    pub async fn get_rate_limit_state(&self, host: &str) -> Result<Option<RateLimitState>, StoreError> {
        let host = format!("host::{host}");
        let bytes = self.get_blob(RATE_LIMITS, &host).await?;
        Ok(match bytes {
            Some(bytes) => Some(serde_json::from_slice(&bytes)?),
            None => None,
        })
    }

    pub async fn set_rate_limit_state(&self, host: &str, state: RateLimitState) -> Result<(), StoreError> {
        let key = format!("host::{host}");
        let bytes = serde_json::to_vec(&state)?;
        self.put_blob(RATE_LIMITS, &key, bytes).await
    }

    // ---- Generic blob helpers ----------------------------------------------------

    async fn put_blob(&self, table_def: TableDefinition<'static, &str, &[u8]>, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let key = key.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(table_def)?;
                table.insert(key.as_str(), bytes.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_blob(&self, table_def: TableDefinition<'static, &str, &[u8]>, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let key = key.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(table_def)?;
            Ok(table.get(key.as_str())?.map(|v| v.value().to_vec()))
        })
        .await
    }

    async fn remove_key(&self, table_def: TableDefinition<'static, &str, &str>, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(table_def)?;
                table.remove(key.as_str())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }
}

fn snapshot_key(name: &str, captured_at: DateTime<Utc>) -> String {
    format!("{name}\0{}", captured_at.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true))
}

fn parse_snapshot_timestamp(key: &str) -> Option<DateTime<Utc>> {
    let (_, ts) = key.split_once('\0')?;
    DateTime::parse_from_rfc3339(ts).ok().map(|dt| dt.with_timezone(&Utc))
}

fn is_lock_error(err: &redb::DatabaseError) -> bool {
    matches!(err, redb::DatabaseError::DatabaseAlreadyOpen)
}
