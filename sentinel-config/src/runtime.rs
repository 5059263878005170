use std::time::Duration;

use sentinel_model::enums::Policy;
use tokio::sync::RwLock;

use crate::static_config::InitialRuntimeConfig;

#[derive(Debug, Clone)]
struct Inner {
    poll_interval: Duration,
    grace_period: Duration,
    default_policy: Policy,
    latest_auto_update: bool,
    image_cleanup: bool,
    paused: bool,
    dry_run: bool,
}

/// Behaviour knobs the scheduler and updater consult on every scan, behind a
/// lock so an operator-facing control surface can adjust them without a
/// restart. Getters return owned copies; there is no `&mut` accessor, so
/// callers can never hold a write guard across an `.await`.
#[derive(Debug)]
pub struct RuntimeConfig {
    inner: RwLock<Inner>,
}

impl RuntimeConfig {
    pub fn new(initial: InitialRuntimeConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                poll_interval: initial.poll_interval,
                grace_period: initial.grace_period,
                default_policy: initial.default_policy,
                latest_auto_update: initial.latest_auto_update,
                image_cleanup: initial.image_cleanup,
                paused: false,
                dry_run: false,
            }),
        }
    }

    pub async fn poll_interval(&self) -> Duration {
        self.inner.read().await.poll_interval
    }

    pub async fn set_poll_interval(&self, interval: Duration) {
        self.inner.write().await.poll_interval = interval;
    }

    pub async fn grace_period(&self) -> Duration {
        self.inner.read().await.grace_period
    }

    pub async fn default_policy(&self) -> Policy {
        self.inner.read().await.default_policy
    }

    pub async fn set_default_policy(&self, policy: Policy) {
        self.inner.write().await.default_policy = policy;
    }

    pub async fn latest_auto_update(&self) -> bool {
        self.inner.read().await.latest_auto_update
    }

    pub async fn image_cleanup(&self) -> bool {
        self.inner.read().await.image_cleanup
    }

    pub async fn set_image_cleanup(&self, enabled: bool) {
        self.inner.write().await.image_cleanup = enabled;
    }

    /// When paused, the scheduler still ticks but the scan it triggers is a
    /// no-op; manual scans remain possible.
    pub async fn paused(&self) -> bool {
        self.inner.read().await.paused
    }

    pub async fn set_paused(&self, paused: bool) {
        self.inner.write().await.paused = paused;
    }

    pub async fn dry_run(&self) -> bool {
        self.inner.read().await.dry_run
    }

    pub async fn set_dry_run(&self, dry_run: bool) {
        self.inner.write().await.dry_run = dry_run;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initial() -> InitialRuntimeConfig {
        InitialRuntimeConfig {
            poll_interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(5),
            default_policy: Policy::Manual,
            latest_auto_update: true,
            image_cleanup: true,
        }
    }

    #[tokio::test]
    async fn setters_are_visible_to_subsequent_getters() {
        let cfg = RuntimeConfig::new(initial());
        assert_eq!(cfg.poll_interval().await, Duration::from_secs(60));
        cfg.set_poll_interval(Duration::from_secs(120)).await;
        assert_eq!(cfg.poll_interval().await, Duration::from_secs(120));

        assert!(!cfg.paused().await);
        cfg.set_paused(true).await;
        assert!(cfg.paused().await);

        cfg.set_default_policy(Policy::Auto).await;
        assert_eq!(cfg.default_policy().await, Policy::Auto);
    }
}
