//! Per-registry rate-limit state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub authenticated: bool,
}

impl RateLimitState {
    /// `CanProceed`'s core test: `ok = remaining > reserve`.
    pub fn can_proceed(&self, reserve: u32) -> bool {
        self.remaining > reserve
    }
}
