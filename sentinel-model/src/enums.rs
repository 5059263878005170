//! Tagged-variant strings used throughout the supervisor.
//!
//! Every enum here has a total `FromStr` parse and a `Display` that round
//! trips through it, so ingress (labels, settings, CLI flags) validates once
//! and interior code can match exhaustively.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

/// The per-container update policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Replace the container automatically when a newer image is available.
    Auto,
    /// Queue the update for operator approval.
    Manual,
    /// Never update; the container is skipped during scans.
    Pinned,
}

impl Policy {
    pub fn validate(value: &str) -> Result<Self, ParseEnumError> {
        value.parse()
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Policy::Auto => "auto",
            Policy::Manual => "manual",
            Policy::Pinned => "pinned",
        };
        f.write_str(s)
    }
}

impl FromStr for Policy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Policy::Auto),
            "manual" => Ok(Policy::Manual),
            "pinned" => Ok(Policy::Pinned),
            other => Err(ParseEnumError::new("policy", other)),
        }
    }
}

/// Which rule in the precedence chain produced a resolved [`Policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    /// A DB-stored per-container override.
    Override,
    /// The `sentinel.policy` container label.
    Label,
    /// The `:latest`/empty-tag auto-update rule.
    Latest,
    /// The global default policy.
    Default,
}

impl fmt::Display for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicySource::Override => "override",
            PolicySource::Label => "label",
            PolicySource::Latest => "latest",
            PolicySource::Default => "default",
        };
        f.write_str(s)
    }
}

/// Outcome recorded in an [`crate::history::UpdateRecord`] for a single
/// container lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
    RollbackSuccess,
    RollbackFailed,
    FinaliseWarning,
    Skipped,
    DryRun,
    PullOnly,
    Queued,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::Failed => "failed",
            Outcome::RollbackSuccess => "rollback",
            Outcome::RollbackFailed => "rollback_failed",
            Outcome::FinaliseWarning => "finalise_warning",
            Outcome::Skipped => "skipped",
            Outcome::DryRun => "dry_run",
            Outcome::PullOnly => "pull_only",
            Outcome::Queued => "queued",
        };
        f.write_str(s)
    }
}

impl FromStr for Outcome {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "failed" => Ok(Outcome::Failed),
            "rollback" => Ok(Outcome::RollbackSuccess),
            "rollback_failed" => Ok(Outcome::RollbackFailed),
            "finalise_warning" => Ok(Outcome::FinaliseWarning),
            "skipped" => Ok(Outcome::Skipped),
            "dry_run" => Ok(Outcome::DryRun),
            "pull_only" => Ok(Outcome::PullOnly),
            "queued" => Ok(Outcome::Queued),
            other => Err(ParseEnumError::new("outcome", other)),
        }
    }
}

/// Per-container notification preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyPref {
    #[default]
    Default,
    EveryScan,
    DigestOnly,
    Muted,
}

impl fmt::Display for NotifyPref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotifyPref::Default => "default",
            NotifyPref::EveryScan => "every_scan",
            NotifyPref::DigestOnly => "digest_only",
            NotifyPref::Muted => "muted",
        };
        f.write_str(s)
    }
}

impl FromStr for NotifyPref {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(NotifyPref::Default),
            "every_scan" => Ok(NotifyPref::EveryScan),
            "digest_only" => Ok(NotifyPref::DigestOnly),
            "muted" => Ok(NotifyPref::Muted),
            other => Err(ParseEnumError::new("notify_pref", other)),
        }
    }
}

/// Which step of finalise failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinaliseStage {
    Inspect,
    Stop,
    Remove,
    Create,
    Start,
}

impl FinaliseStage {
    /// `remove`/`create`/`start` are destructive: the old container is
    /// already gone, so a failure here leaves nothing running and must
    /// roll back. `inspect`/`stop` are non-destructive: the replacement
    /// container (still wearing the maintenance label) is left running.
    pub fn is_destructive(self) -> bool {
        matches!(self, FinaliseStage::Remove | FinaliseStage::Create | FinaliseStage::Start)
    }
}

impl fmt::Display for FinaliseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FinaliseStage::Inspect => "inspect",
            FinaliseStage::Stop => "stop",
            FinaliseStage::Remove => "remove",
            FinaliseStage::Create => "create",
            FinaliseStage::Start => "start",
        };
        f.write_str(s)
    }
}

/// Restricts which upstream tag bumps a [`crate::runtime::ContainerSummary`]
/// should be checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemverScope {
    Major,
    Minor,
    Patch,
}

impl fmt::Display for SemverScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SemverScope::Major => "major",
            SemverScope::Minor => "minor",
            SemverScope::Patch => "patch",
        };
        f.write_str(s)
    }
}

impl FromStr for SemverScope {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "major" => Ok(SemverScope::Major),
            "minor" => Ok(SemverScope::Minor),
            "patch" => Ok(SemverScope::Patch),
            other => Err(ParseEnumError::new("semver_scope", other)),
        }
    }
}

/// Which loop invoked `Updater::scan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanMode {
    Scheduled,
    Manual,
}

impl ScanMode {
    /// Reserve headroom passed to `RateTracker::can_proceed` for this mode.
    pub fn reserve(self) -> u32 {
        match self {
            ScanMode::Scheduled => 10,
            ScanMode::Manual => 2,
        }
    }

    /// Whether rate-limit exhaustion should abort the whole scan (manual)
    /// or just skip the current container (scheduled).
    pub fn aborts_scan_on_rate_limit(self) -> bool {
        matches!(self, ScanMode::Manual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_round_trips_through_display() {
        for p in [Policy::Auto, Policy::Manual, Policy::Pinned] {
            assert_eq!(p.to_string().parse::<Policy>().unwrap(), p);
        }
    }

    #[test]
    fn policy_rejects_unknown() {
        assert!("bogus".parse::<Policy>().is_err());
    }

    #[test]
    fn finalise_stage_destructive_classification() {
        assert!(FinaliseStage::Remove.is_destructive());
        assert!(FinaliseStage::Create.is_destructive());
        assert!(FinaliseStage::Start.is_destructive());
        assert!(!FinaliseStage::Inspect.is_destructive());
        assert!(!FinaliseStage::Stop.is_destructive());
    }

    #[test]
    fn scan_mode_reserve_and_abort_semantics() {
        assert_eq!(ScanMode::Scheduled.reserve(), 10);
        assert_eq!(ScanMode::Manual.reserve(), 2);
        assert!(ScanMode::Manual.aborts_scan_on_rate_limit());
        assert!(!ScanMode::Scheduled.aborts_scan_on_rate_limit());
    }
}
