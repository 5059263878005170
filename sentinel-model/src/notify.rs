//! Per-container notification dedup state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::image::Digest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyState {
    pub container_name: String,
    pub last_digest: Digest,
    pub first_seen: DateTime<Utc>,
    /// Zero (default) means "never notified".
    pub last_notified: Option<DateTime<Utc>>,
    pub snoozed_until: Option<DateTime<Utc>>,
}

impl NotifyState {
    pub fn new(container_name: impl Into<String>, digest: Digest, now: DateTime<Utc>) -> Self {
        Self {
            container_name: container_name.into(),
            last_digest: digest,
            first_seen: now,
            last_notified: None,
            snoozed_until: None,
        }
    }

    /// Suppresses a repeat notification for the same remote digest unless
    /// the snooze window has expired.
    pub fn should_notify(&self, remote_digest: &Digest, now: DateTime<Utc>) -> bool {
        if &self.last_digest != remote_digest {
            return true;
        }
        if self.last_notified.is_none() {
            return true;
        }
        match self.snoozed_until {
            Some(until) if until > now => false,
            Some(_expired) => true,
            None => false,
        }
    }
}
