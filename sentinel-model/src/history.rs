//! Append-only update history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::Outcome;
use crate::image::Digest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// RFC3339-nano capture time; doubles as the Store key so history stays
    /// chronologically ordered.
    pub timestamp: DateTime<Utc>,
    pub container_name: String,
    pub old_image: String,
    pub old_digest: Option<Digest>,
    pub new_image: String,
    pub new_digest: Option<Digest>,
    pub outcome: Outcome,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl UpdateRecord {
    /// Key used in the `history` Store table: the RFC3339-nano timestamp.
    /// Nanosecond precision avoids collisions between records produced
    /// within the same millisecond.
    pub fn store_key(&self) -> String {
        self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
    }
}
