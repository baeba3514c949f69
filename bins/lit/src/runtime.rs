/// Container Runtime - the seam between the orchestrator and Docker
///
/// Everything the harness asks of a container engine goes through
/// `ContainerRuntime`. Production uses `DockerRuntime` (docker.rs); the
/// orchestrator tests drive an in-memory fake.

use async_trait::async_trait;
use lit_common::error::Result;
use lit_common::types::ImageRef;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Where a host path appears inside the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub container_path: String,
    pub read_only: bool,
}

impl VolumeMount {
    pub fn read_only(container_path: impl Into<String>) -> Self {
        Self {
            container_path: container_path.into(),
            read_only: true,
        }
    }
}

/// Container port published on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
}

/// Declarative description of a container to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: ImageRef,
    /// `None` keeps the image's default command
    pub command: Option<Vec<String>>,
    pub environment: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
    /// Absolute host path -> mount descriptor
    pub volumes: BTreeMap<PathBuf, VolumeMount>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: ImageRef) -> Self {
        Self {
            name: name.into(),
            image,
            command: None,
            environment: BTreeMap::new(),
            ports: Vec::new(),
            volumes: BTreeMap::new(),
        }
    }

    /// `KEY=value` pairs in the form container engines expect
    pub fn env_pairs(&self) -> Vec<String> {
        self.environment
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect()
    }

    /// `host:container[:ro]` bind strings
    pub fn bind_strings(&self) -> Vec<String> {
        self.volumes
            .iter()
            .map(|(host, mount)| {
                let mode = if mount.read_only { ":ro" } else { "" };
                format!("{}:{}{}", host.display(), mount.container_path, mode)
            })
            .collect()
    }
}

/// A network as the runtime knows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInstance {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make the image available locally, pulling on a cache miss
    async fn ensure_image(&self, image: &ImageRef) -> Result<()>;

    async fn create_network(&self, name: &str) -> Result<NetworkInstance>;

    async fn remove_network(&self, network: &NetworkInstance) -> Result<()>;

    /// Create without starting; returns the runtime-assigned id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Attach a container to a network, reachable there under `alias`
    async fn connect_to_network(&self, container_id: &str, network: &str, alias: &str) -> Result<()>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Block until the main process exits and return its status code
    async fn wait_container(&self, container_id: &str) -> Result<i64>;

    async fn kill_container(&self, container_id: &str) -> Result<()>;

    /// Captured stdout and stderr, raw
    async fn container_logs(&self, container_id: &str) -> Result<Vec<u8>>;

    /// Stop; a container that already exited is not an error
    async fn stop_container(&self, container_id: &str) -> Result<()>;

    async fn remove_container(&self, container_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_renders_env_and_binds() {
        let mut spec = ContainerSpec::new("logstash-basic", ImageRef::parse("logstash:5.5.1"));
        spec.environment.insert("INDEX_NAME".into(), "basic".into());
        spec.environment.insert("LS_SETTINGS_DIR".into(), "/usr/share/logstash/config".into());
        spec.volumes.insert(
            PathBuf::from("/tests/input.log"),
            VolumeMount::read_only("/data/input.log"),
        );
        spec.volumes.insert(
            PathBuf::from("/tests/scratch"),
            VolumeMount {
                container_path: "/scratch".into(),
                read_only: false,
            },
        );

        assert_eq!(
            spec.env_pairs(),
            vec!["INDEX_NAME=basic", "LS_SETTINGS_DIR=/usr/share/logstash/config"]
        );
        assert_eq!(
            spec.bind_strings(),
            vec!["/tests/input.log:/data/input.log:ro", "/tests/scratch:/scratch"]
        );
    }
}
