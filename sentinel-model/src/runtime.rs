//! Opaque shapes returned by the container runtime driver.
//!
//! The driver itself is a collaborator consumed through
//! `sentinel_contracts::runtime::ContainerRuntime`; these are just the data
//! shapes that cross that boundary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A lightweight container listing entry, as returned by `ListContainers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub labels: HashMap<String, String>,
}

impl ContainerSummary {
    /// The runtime-reported name used as identity throughout the engine.
    /// Runtimes report names with a leading slash; this strips it the way
    /// Docker's own clients do.
    pub fn name(&self) -> &str {
        self.names
            .first()
            .map(|n| n.trim_start_matches('/'))
            .unwrap_or(&self.id)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn is_swarm_task(&self) -> bool {
        self.label("com.docker.swarm.task") == Some("true")
    }

    pub fn is_self(&self) -> bool {
        self.label("sentinel.self") == Some("true")
    }
}

/// Full inspect result, the snapshot source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInspect {
    pub id: String,
    pub name: String,
    pub image: String,
    pub config: Option<ContainerConfig>,
    pub host_config: HostConfig,
    pub network_settings: NetworkSettings,
    pub state: ContainerState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub image: String,
    pub labels: HashMap<String, String>,
    pub env: Vec<String>,
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub exposed_ports: Vec<String>,
}

/// Host-level configuration, including the network mode used to recognise
/// provider/consumer relationships.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub network_mode: String,
    pub binds: Vec<String>,
    pub port_bindings: HashMap<String, Vec<String>>,
    pub restart_policy: Option<String>,
}

impl HostConfig {
    /// Name of the provider this container's namespace is borrowed from,
    /// when `network_mode` is `container:<name-or-id>`.
    pub fn network_provider(&self) -> Option<&str> {
        self.network_mode.strip_prefix("container:")
    }

    pub fn is_standalone_network(&self) -> bool {
        matches!(self.network_mode.as_str(), "bridge" | "host" | "none") || self.network_mode.is_empty()
    }
}

/// Per-network IPAM/alias state that must survive a recreate; everything
/// else (gateway, assigned IP) is operational and is dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    pub network_id: String,
    pub aliases: Vec<String>,
    pub ipam_config: HashMap<String, String>,
    pub driver_opts: HashMap<String, String>,
    pub mac_address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub sandbox_key: Option<String>,
    pub networks: HashMap<String, NetworkEndpoint>,
}

/// The subset of host/network config a new container is created with;
/// operational fields (gateway, assigned IP) are dropped, IPAM/aliases kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub networks: HashMap<String, NetworkEndpoint>,
}

impl From<&NetworkSettings> for NetworkConfig {
    fn from(settings: &NetworkSettings) -> Self {
        Self {
            networks: settings.networks.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub running: bool,
    pub restarting: bool,
}

impl ContainerState {
    /// A container only counts as healthy when running and not mid-restart.
    pub fn is_healthy(self) -> bool {
        self.running && !self.restarting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(name: &str, labels: &[(&str, &str)]) -> ContainerSummary {
        ContainerSummary {
            id: "abc123".into(),
            names: vec![format!("/{name}")],
            image: "nginx:1.25".into(),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn name_strips_leading_slash() {
        assert_eq!(summary("web", &[]).name(), "web");
    }

    #[test]
    fn swarm_task_detection() {
        assert!(summary("t", &[("com.docker.swarm.task", "true")]).is_swarm_task());
        assert!(!summary("t", &[]).is_swarm_task());
    }

    #[test]
    fn network_provider_parses_container_mode() {
        let hc = HostConfig {
            network_mode: "container:db".into(),
            binds: vec![],
            port_bindings: HashMap::new(),
            restart_policy: None,
        };
        assert_eq!(hc.network_provider(), Some("db"));
        assert!(!hc.is_standalone_network());
    }

    #[test]
    fn standalone_network_modes() {
        for mode in ["bridge", "host", "none", ""] {
            let hc = HostConfig {
                network_mode: mode.into(),
                binds: vec![],
                port_bindings: HashMap::new(),
                restart_policy: None,
            };
            assert!(hc.is_standalone_network());
        }
    }

    #[test]
    fn container_state_health_requires_running_not_restarting() {
        assert!(ContainerState { running: true, restarting: false }.is_healthy());
        assert!(!ContainerState { running: true, restarting: true }.is_healthy());
        assert!(!ContainerState { running: false, restarting: false }.is_healthy());
    }
}
