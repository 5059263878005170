//! Shared data model for the Sentinel container update supervisor.
//!
//! This crate has no I/O of its own: it is the set of types that cross the
//! boundaries between `sentinel-core`'s components (the Store, the
//! RegistryChecker, the Updater) and the things `sentinel-contracts`
//! describes (the container runtime driver, notifications, the event bus).

pub mod enums;
pub mod error;
pub mod events;
pub mod history;
pub mod image;
pub mod notify;
pub mod pending_update;
pub mod rate_limit;
pub mod runtime;

pub mod prelude {
    //! Commonly imported types, grouped for callers that touch most of them.
    pub use super::enums::{FinaliseStage, NotifyPref, Outcome, Policy, PolicySource};
    pub use super::error::ParseEnumError;
    pub use super::events::SentinelEvent;
    pub use super::history::UpdateRecord;
    pub use super::image::{Digest, ImageReference};
    pub use super::notify::NotifyState;
    pub use super::pending_update::PendingUpdate;
    pub use super::rate_limit::RateLimitState;
    pub use super::runtime::{ContainerInspect, ContainerSummary, HostConfig, NetworkConfig};
}
