//! The container runtime driver.
//!
//! This is the one collaborator the Updater touches at almost every
//! lifecycle stage. The concrete Docker/OCI-socket implementation lives
//! outside this crate; [`crate::testing::FakeRuntime`] stands in for it in
//! tests.

use async_trait::async_trait;
use sentinel_model::runtime::{ContainerInspect, ContainerSummary, HostConfig, NetworkConfig};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("container {0} already exists")]
    AlreadyExists(String),
    #[error("runtime I/O error: {0}")]
    Io(String),
    #[error("operation cancelled")]
    Cancelled,
}

/// Config a new container is created with.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub name: String,
    pub image: String,
    pub labels: std::collections::HashMap<String, String>,
    pub env: Vec<String>,
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub host_config: HostConfig,
    pub network_config: NetworkConfig,
}

/// The capability set consumed by `sentinel-core`'s Updater.
///
/// Every method takes a [`tokio_util::sync::CancellationToken`]-propagating
/// caller context implicitly through normal `async` cancellation: callers
/// wrap calls in `tokio::select!` against the token rather than this trait
/// taking one directly, keeping the seam narrow and mockable.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;
    async fn list_all_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;
    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, RuntimeError>;
    async fn stop_container(&self, id: &str, timeout_seconds: u32) -> Result<(), RuntimeError>;
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;
    async fn create_container(&self, spec: CreateSpec) -> Result<String, RuntimeError>;
    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;
    async fn restart_container(&self, id: &str) -> Result<(), RuntimeError>;
    async fn pull_image(&self, reference: &str) -> Result<(), RuntimeError>;
    /// Local image digest, when the image exists on this host.
    async fn image_digest(&self, reference: &str) -> Result<Option<String>, RuntimeError>;
    /// Upstream manifest digest for `reference`, queried directly against
    /// the runtime's own distribution client (distinct from
    /// `sentinel-core`'s own [`crate`]-external `RegistryChecker`, which
    /// talks to the registry over HTTP itself).
    async fn distribution_digest(&self, reference: &str) -> Result<Option<String>, RuntimeError>;
    async fn remove_image(&self, id_or_ref: &str) -> Result<(), RuntimeError>;
    async fn tag_image(&self, src: &str, dst: &str) -> Result<(), RuntimeError>;
    async fn exec_container(
        &self,
        id: &str,
        cmd: &[String],
        timeout_seconds: u32,
    ) -> Result<(i32, String), RuntimeError>;
    /// Releases any pooled connections the driver holds. Idempotent.
    async fn close(&self);
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    //! An in-memory [`ContainerRuntime`] double the Updater's lifecycle
    //! tests drive directly.

    use super::*;
    use sentinel_model::runtime::{ContainerConfig, ContainerState, NetworkSettings};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct FakeContainer {
        pub id: String,
        pub name: String,
        pub image: String,
        pub labels: HashMap<String, String>,
        pub host_config: HostConfig,
        pub network_settings: NetworkSettings,
        pub state: ContainerState,
    }

    /// Injectable failure points, one per `ContainerRuntime` method, so the
    /// Updater's stage-aware error handling can be exercised deterministically.
    #[derive(Debug, Clone, Default)]
    pub struct FailurePoints {
        pub pull: bool,
        pub stop: bool,
        pub remove: bool,
        pub create: bool,
        pub start: bool,
        /// When set, `create_container` fails starting from this 1-indexed
        /// call number onward, letting a test drive an earlier create (the
        /// update itself) to success and a later one (finalise's own
        /// recreate) to failure.
        pub fail_create_after: Option<u32>,
        /// Same idea as `fail_create_after` but for `stop_container`, to
        /// isolate finalise's own stop call from the lifecycle's stage-4 stop.
        pub fail_stop_after: Option<u32>,
    }

    #[derive(Default)]
    pub struct FakeRuntime {
        inner: Mutex<FakeRuntimeInner>,
    }

    #[derive(Default)]
    struct FakeRuntimeInner {
        containers: HashMap<String, FakeContainer>,
        next_id: u64,
        create_calls: u32,
        stop_calls: u32,
        failures: FailurePoints,
        calls: Vec<String>,
    }

    impl FakeRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&self, container: FakeContainer) {
            let mut inner = self.inner.lock().unwrap();
            inner.containers.insert(container.id.clone(), container);
        }

        pub fn set_failures(&self, failures: FailurePoints) {
            self.inner.lock().unwrap().failures = failures;
        }

        pub fn calls(&self) -> Vec<String> {
            self.inner.lock().unwrap().calls.clone()
        }

        pub fn call_count(&self, name: &str) -> usize {
            self.calls().iter().filter(|c| c.as_str() == name).count()
        }

        pub fn container_by_name(&self, name: &str) -> Option<FakeContainer> {
            self.inner
                .lock()
                .unwrap()
                .containers
                .values()
                .find(|c| c.name == name)
                .cloned()
        }

        fn record(&self, inner: &mut FakeRuntimeInner, call: &str) {
            inner.calls.push(call.to_string());
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
            let mut inner = self.inner.lock().unwrap();
            self.record(&mut inner, "list_containers");
            Ok(inner
                .containers
                .values()
                .map(|c| ContainerSummary {
                    id: c.id.clone(),
                    names: vec![format!("/{}", c.name)],
                    image: c.image.clone(),
                    labels: c.labels.clone(),
                })
                .collect())
        }

        async fn list_all_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
            self.list_containers().await
        }

        async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, RuntimeError> {
            let mut inner = self.inner.lock().unwrap();
            self.record(&mut inner, "inspect_container");
            let c = inner
                .containers
                .get(id)
                .cloned()
                .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
            Ok(ContainerInspect {
                id: c.id.clone(),
                name: c.name.clone(),
                image: c.image.clone(),
                config: Some(ContainerConfig {
                    image: c.image.clone(),
                    labels: c.labels.clone(),
                    env: vec![],
                    cmd: None,
                    entrypoint: None,
                    exposed_ports: vec![],
                }),
                host_config: c.host_config.clone(),
                network_settings: c.network_settings.clone(),
                state: c.state,
            })
        }

        async fn stop_container(&self, id: &str, _timeout_seconds: u32) -> Result<(), RuntimeError> {
            let mut inner = self.inner.lock().unwrap();
            self.record(&mut inner, "stop_container");
            inner.stop_calls += 1;
            if inner.failures.stop || inner.failures.fail_stop_after.is_some_and(|n| inner.stop_calls >= n) {
                return Err(RuntimeError::Io("stop failed".into()));
            }
            if let Some(c) = inner.containers.get_mut(id) {
                c.state.running = false;
            }
            Ok(())
        }

        async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
            let mut inner = self.inner.lock().unwrap();
            self.record(&mut inner, "remove_container");
            if inner.failures.remove {
                return Err(RuntimeError::Io("remove failed".into()));
            }
            inner.containers.remove(id);
            Ok(())
        }

        async fn create_container(&self, spec: CreateSpec) -> Result<String, RuntimeError> {
            let mut inner = self.inner.lock().unwrap();
            self.record(&mut inner, "create_container");
            inner.create_calls += 1;
            if inner.failures.create || inner.failures.fail_create_after.is_some_and(|n| inner.create_calls >= n) {
                return Err(RuntimeError::Io("create failed".into()));
            }
            inner.next_id += 1;
            let id = format!("generated-{}", inner.next_id);
            inner.containers.insert(
                id.clone(),
                FakeContainer {
                    id: id.clone(),
                    name: spec.name,
                    image: spec.image,
                    labels: spec.labels,
                    host_config: spec.host_config,
                    network_settings: NetworkSettings {
                        sandbox_key: None,
                        networks: spec.network_config.networks,
                    },
                    state: ContainerState { running: false, restarting: false },
                },
            );
            Ok(id)
        }

        async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
            let mut inner = self.inner.lock().unwrap();
            self.record(&mut inner, "start_container");
            if inner.failures.start {
                return Err(RuntimeError::Io("start failed".into()));
            }
            let c = inner
                .containers
                .get_mut(id)
                .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
            c.state.running = true;
            c.state.restarting = false;
            Ok(())
        }

        async fn restart_container(&self, id: &str) -> Result<(), RuntimeError> {
            let mut inner = self.inner.lock().unwrap();
            self.record(&mut inner, "restart_container");
            let c = inner
                .containers
                .get_mut(id)
                .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
            c.state.running = true;
            Ok(())
        }

        async fn pull_image(&self, _reference: &str) -> Result<(), RuntimeError> {
            let mut inner = self.inner.lock().unwrap();
            self.record(&mut inner, "pull_image");
            if inner.failures.pull {
                return Err(RuntimeError::Io("pull failed".into()));
            }
            Ok(())
        }

        async fn image_digest(&self, _reference: &str) -> Result<Option<String>, RuntimeError> {
            Ok(None)
        }

        async fn distribution_digest(&self, _reference: &str) -> Result<Option<String>, RuntimeError> {
            Ok(None)
        }

        async fn remove_image(&self, _id_or_ref: &str) -> Result<(), RuntimeError> {
            let mut inner = self.inner.lock().unwrap();
            self.record(&mut inner, "remove_image");
            Ok(())
        }

        async fn tag_image(&self, _src: &str, _dst: &str) -> Result<(), RuntimeError> {
            Ok(())
        }

        async fn exec_container(
            &self,
            _id: &str,
            _cmd: &[String],
            _timeout_seconds: u32,
        ) -> Result<(i32, String), RuntimeError> {
            Ok((0, String::new()))
        }

        async fn close(&self) {}
    }
}
