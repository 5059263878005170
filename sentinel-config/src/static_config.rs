use std::env;
use std::time::Duration;

use sentinel_model::enums::Policy;

use crate::error::{ConfigError, InvalidReason};

/// Settings fixed for the process lifetime: things that change the shape of
/// the binary's wiring (store location, socket path, log format) rather than
/// its day-to-day behaviour.
#[derive(Debug, Clone)]
pub struct StaticConfig {
    pub db_path: String,
    pub docker_sock: String,
    pub log_json: bool,
    /// Whether dependents are restarted after their provider updates
    /// (`SENTINEL_DEPS`); the dependency graph itself comes from container
    /// labels, not this flag.
    pub restart_dependents: bool,
    /// Optional global cron expression gating scheduled scans, distinct from
    /// any per-container maintenance-window label.
    pub schedule: Option<String>,
    pub initial: InitialRuntimeConfig,
}

/// The subset of [`StaticConfig`] that seeds [`crate::RuntimeConfig`]; split
/// out because these fields can later be changed without a restart.
#[derive(Debug, Clone)]
pub struct InitialRuntimeConfig {
    pub poll_interval: Duration,
    pub grace_period: Duration,
    pub default_policy: Policy,
    pub latest_auto_update: bool,
    pub image_cleanup: bool,
}

impl StaticConfig {
    /// Loads configuration from the process environment, falling back to a
    /// `.env` file in the working directory if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let poll_interval = parse_positive_secs("SENTINEL_POLL_INTERVAL", 6 * 3600)?;
        let grace_period = parse_non_negative_secs("SENTINEL_GRACE_PERIOD", 30)?;
        let default_policy = parse_policy("SENTINEL_DEFAULT_POLICY", Policy::Manual)?;
        let latest_auto_update = parse_bool("SENTINEL_LATEST_AUTO_UPDATE", true)?;
        let image_cleanup = parse_bool("SENTINEL_IMAGE_CLEANUP", true)?;
        let log_json = parse_bool("SENTINEL_LOG_JSON", true)?;
        let restart_dependents = parse_bool("SENTINEL_DEPS", true)?;

        let db_path = env::var("SENTINEL_DB_PATH").unwrap_or_else(|_| "/data/sentinel.db".to_string());
        let docker_sock =
            env::var("SENTINEL_DOCKER_SOCK").unwrap_or_else(|_| "/var/run/docker.sock".to_string());
        let schedule = env::var("SENTINEL_SCHEDULE").ok().filter(|s| !s.is_empty());

        Ok(Self {
            db_path,
            docker_sock,
            log_json,
            restart_dependents,
            schedule,
            initial: InitialRuntimeConfig {
                poll_interval,
                grace_period,
                default_policy,
                latest_auto_update,
                image_cleanup,
            },
        })
    }
}

fn parse_positive_secs(var: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let raw = match env::var(var) {
        Ok(raw) => raw,
        Err(_) => return Ok(Duration::from_secs(default_secs)),
    };
    let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidEnvVar {
        var,
        value: raw.clone(),
        reason: InvalidReason::NotAnInteger,
    })?;
    if secs == 0 {
        return Err(ConfigError::InvalidEnvVar { var, value: raw, reason: InvalidReason::MustBePositive });
    }
    Ok(Duration::from_secs(secs))
}

fn parse_non_negative_secs(var: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let raw = match env::var(var) {
        Ok(raw) => raw,
        Err(_) => return Ok(Duration::from_secs(default_secs)),
    };
    let secs: i64 = raw.parse().map_err(|_| ConfigError::InvalidEnvVar {
        var,
        value: raw.clone(),
        reason: InvalidReason::NotAnInteger,
    })?;
    if secs < 0 {
        return Err(ConfigError::InvalidEnvVar { var, value: raw, reason: InvalidReason::MustBeNonNegative });
    }
    Ok(Duration::from_secs(secs as u64))
}

fn parse_policy(var: &'static str, default: Policy) -> Result<Policy, ConfigError> {
    let raw = match env::var(var) {
        Ok(raw) => raw,
        Err(_) => return Ok(default),
    };
    raw.parse().map_err(|_| ConfigError::InvalidEnvVar { var, value: raw, reason: InvalidReason::UnknownPolicy })
}

fn parse_bool(var: &'static str, default: bool) -> Result<bool, ConfigError> {
    let raw = match env::var(var) {
        Ok(raw) => raw,
        Err(_) => return Ok(default),
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvVar { var, value: raw, reason: InvalidReason::NotABool }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("X", false).is_ok());
        unsafe { env::set_var("SENTINEL_TEST_BOOL", "yes") };
        assert!(parse_bool("SENTINEL_TEST_BOOL", false).unwrap());
        unsafe { env::set_var("SENTINEL_TEST_BOOL", "0") };
        assert!(!parse_bool("SENTINEL_TEST_BOOL", true).unwrap());
        unsafe { env::remove_var("SENTINEL_TEST_BOOL") };
    }

    #[test]
    fn parse_bool_rejects_garbage() {
        unsafe { env::set_var("SENTINEL_TEST_BOOL2", "maybe") };
        assert!(parse_bool("SENTINEL_TEST_BOOL2", true).is_err());
        unsafe { env::remove_var("SENTINEL_TEST_BOOL2") };
    }

    #[test]
    fn poll_interval_rejects_zero() {
        unsafe { env::set_var("SENTINEL_TEST_POLL", "0") };
        assert!(parse_positive_secs("SENTINEL_TEST_POLL", 300).is_err());
        unsafe { env::remove_var("SENTINEL_TEST_POLL") };
    }

    #[test]
    fn grace_period_rejects_negative() {
        unsafe { env::set_var("SENTINEL_TEST_GRACE", "-5") };
        assert!(parse_non_negative_secs("SENTINEL_TEST_GRACE", 10).is_err());
        unsafe { env::remove_var("SENTINEL_TEST_GRACE") };
    }
}
