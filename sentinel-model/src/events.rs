//! Event bus payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::Outcome;

/// Events published on the UI-facing event bus. The event bus itself lives
/// outside this workspace; this is just the wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SentinelEvent {
    ContainerUpdate {
        container_name: String,
        outcome: Outcome,
        at: DateTime<Utc>,
    },
    ScanComplete {
        total: u32,
        queued: u32,
        updated: u32,
        skipped: u32,
        rate_limited: u32,
        errors: u32,
        at: DateTime<Utc>,
    },
    QueueChange {
        container_name: String,
        added: bool,
        at: DateTime<Utc>,
    },
    RateLimits {
        host: String,
        remaining: u32,
        at: DateTime<Utc>,
    },
    DigestReady {
        container_names: Vec<String>,
        at: DateTime<Utc>,
    },
}
