use sentinel_contracts::runtime::RuntimeError;

pub use crate::registry::RegistryError;
pub use crate::store::StoreError;

/// Error raised by a single call to [`crate::updater::Updater::update_container`].
#[derive(Debug, thiserror::Error)]
pub enum UpdaterError {
    /// Another lifecycle is already running for this container name.
    #[error("update already in progress for {0}")]
    UpdateInProgress(String),

    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("container inspect has no config")]
    MissingConfig,

    #[error("validation failed: container is not running")]
    ValidationFailed,

    #[error("{0}")]
    Internal(String),
}
