//! Per-registry-host rate-limit admission control.
//!
//! Tracks the remaining-quota headroom a registry reports in its response
//! headers and gates the scan loop on it, rather than inferring exhaustion
//! from a local request counter: header-derived limits are authoritative.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use sentinel_model::rate_limit::RateLimitState;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    /// Carries the time at which the registry's quota is expected to reset.
    WaitUntil(DateTime<Utc>),
}

#[derive(Debug, Default)]
pub struct RateTracker {
    hosts: RwLock<HashMap<String, RateLimitState>>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a host so it participates in admission control even before
    /// any response has been recorded for it.
    pub async fn discover(&self, host: &str) {
        let mut hosts = self.hosts.write().await;
        hosts.entry(host.to_string()).or_insert(RateLimitState {
            remaining: u32::MAX,
            reset_at: Utc::now(),
            authenticated: false,
        });
    }

    /// Updates a host's tracked quota from a registry response's headers.
    /// Understands the standard `RateLimit-Remaining`/`RateLimit-Reset` pair
    /// and Docker Hub's legacy `ratelimit-remaining: N;w=21600` form.
    pub async fn record(&self, host: &str, headers: &HeaderMap, now: DateTime<Utc>) {
        let Some(remaining) = parse_remaining(headers) else { return };
        let reset_at = parse_reset(headers, now).unwrap_or(now);
        let authenticated = headers
            .get("docker-ratelimit-source")
            .and_then(|v| v.to_str().ok())
            .map(|v| v != "anonymous")
            .unwrap_or(false);

        let mut hosts = self.hosts.write().await;
        hosts.insert(host.to_string(), RateLimitState { remaining, reset_at, authenticated });
    }

    /// `ok = remaining > reserve`. A host with no recorded state is assumed
    /// to have headroom.
    pub async fn can_proceed(&self, host: &str, reserve: u32) -> (bool, Option<DateTime<Utc>>) {
        let hosts = self.hosts.read().await;
        match hosts.get(host) {
            Some(state) if !state.can_proceed(reserve) => (false, Some(state.reset_at)),
            _ => (true, None),
        }
    }

    pub async fn export(&self) -> Vec<u8> {
        let hosts = self.hosts.read().await;
        serde_json::to_vec(&*hosts).unwrap_or_default()
    }

    pub async fn import(&self, bytes: &[u8]) -> Result<(), serde_json::Error> {
        let parsed: HashMap<String, RateLimitState> = serde_json::from_slice(bytes)?;
        let mut hosts = self.hosts.write().await;
        *hosts = parsed;
        Ok(())
    }
}

fn parse_remaining(headers: &HeaderMap) -> Option<u32> {
    if let Some(value) = headers.get("ratelimit-remaining").and_then(|v| v.to_str().ok()) {
        let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(n) = digits.parse() {
            return Some(n);
        }
    }
    headers.get("x-ratelimit-remaining").and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok())
}

fn parse_reset(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value = headers.get("ratelimit-reset").and_then(|v| v.to_str().ok())?;
    let seconds_from_now: i64 = value.parse().ok()?;
    Some(now + chrono::Duration::seconds(seconds_from_now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[tokio::test]
    async fn unseen_host_has_headroom() {
        let tracker = RateTracker::new();
        let (ok, _) = tracker.can_proceed("docker.io", 10).await;
        assert!(ok);
    }

    #[tokio::test]
    async fn exhausted_host_blocks_admission() {
        let tracker = RateTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert("ratelimit-remaining", HeaderValue::from_static("5"));
        headers.insert("ratelimit-reset", HeaderValue::from_static("60"));
        tracker.record("docker.io", &headers, Utc::now()).await;

        let (ok, wait_until) = tracker.can_proceed("docker.io", 10).await;
        assert!(!ok);
        assert!(wait_until.is_some());
    }

    #[tokio::test]
    async fn legacy_docker_hub_header_form_parses_leading_digits() {
        let tracker = RateTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert("ratelimit-remaining", HeaderValue::from_static("100;w=21600"));
        tracker.record("docker.io", &headers, Utc::now()).await;

        let (ok, _) = tracker.can_proceed("docker.io", 10).await;
        assert!(ok);
    }

    #[tokio::test]
    async fn export_import_round_trips() {
        let tracker = RateTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert("ratelimit-remaining", HeaderValue::from_static("3"));
        tracker.record("docker.io", &headers, Utc::now()).await;

        let bytes = tracker.export().await;
        let fresh = RateTracker::new();
        fresh.import(&bytes).await.unwrap();
        let (ok, _) = fresh.can_proceed("docker.io", 10).await;
        assert!(!ok);
    }
}
