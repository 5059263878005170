//! The Queue's persisted entry type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::image::Digest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub container_name: String,
    pub current_image: String,
    pub current_digest: Digest,
    pub remote_digest: Digest,
    pub detected_at: DateTime<Utc>,
    /// Semver-ordered list of newer tags, when the checker could resolve
    /// them.
    pub newer_versions: Vec<String>,
}

impl PendingUpdate {
    /// Cluster-scoped queue key: `hostID::name`; bare name otherwise.
    pub fn queue_key(container_name: &str, host_id: Option<&str>) -> String {
        match host_id {
            Some(host) => format!("{host}::{container_name}"),
            None => container_name.to_string(),
        }
    }
}
