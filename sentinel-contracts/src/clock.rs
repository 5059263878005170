//! Wall-clock time source, test-injectable.

use chrono::{DateTime, Utc};

/// Anything that can tell the engine "what time is it". Production code
/// uses `Utc::now()`; tests inject a fake clock so maintenance-window and
/// digest-scheduler behaviour is deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// `Clock` backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
