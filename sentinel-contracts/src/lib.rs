//! Trait seams between `sentinel-core`'s engine and its collaborators.
//!
//! None of these traits are implemented in this workspace beyond small test
//! doubles: the concrete container-runtime client, notification providers,
//! and the UI-facing event bus are explicitly out of scope.

pub mod clock;
pub mod event_bus;
pub mod notifier;
pub mod runtime;

pub mod prelude {
    pub use super::clock::Clock;
    pub use super::event_bus::EventBus;
    pub use super::notifier::Notifier;
    pub use super::runtime::{ContainerRuntime, RuntimeError};
}
