// Docker container management using Bollard
use crate::runtime::{ContainerRuntime, ContainerSpec, NetworkInstance};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, HostConfig, PortBinding as DockerPortBinding};
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions};
use bollard::Docker;
use futures_util::stream::StreamExt;
use lit_common::error::{HarnessError, Result};
use lit_common::types::ImageRef;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Seconds a container gets to shut down before it is killed
const STOP_GRACE_SECS: i64 = 10;

/// `ContainerRuntime` backed by the local Docker daemon
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform defaults (unix socket / named pipe, or DOCKER_HOST)
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            HarnessError::Setup(format!("failed to connect to Docker daemon: {}", e))
        })?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

fn status_code(error: &DockerError) -> Option<u16> {
    match error {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &ImageRef) -> Result<()> {
        let reference = image.to_string();

        if self.docker.inspect_image(&reference).await.is_ok() {
            debug!(image = %reference, "Image cache hit");
            return Ok(());
        }

        info!(image = %reference, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image.repository.as_str(),
            tag: image.tag.as_str(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| HarnessError::ImagePull {
                image: reference.clone(),
                message: e.to_string(),
            })?;
        }

        info!(image = %reference, "Image pulled");
        Ok(())
    }

    async fn create_network(&self, name: &str) -> Result<NetworkInstance> {
        let options = CreateNetworkOptions {
            name,
            driver: "bridge",
            ..Default::default()
        };

        self.docker
            .create_network(options)
            .await
            .map_err(|e| HarnessError::Network {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        // The create response shape differs across API versions; inspect for the id
        let network = self
            .docker
            .inspect_network::<String>(name, None)
            .await
            .map_err(|e| HarnessError::Network {
                name: name.to_string(),
                message: format!("created but not inspectable: {}", e),
            })?;

        Ok(NetworkInstance {
            id: network.id.unwrap_or_else(|| name.to_string()),
            name: name.to_string(),
        })
    }

    async fn remove_network(&self, network: &NetworkInstance) -> Result<()> {
        match self.docker.remove_network(&network.id).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => {
                warn!(network = %network.name, "Network already gone");
                Ok(())
            }
            Err(e) => Err(HarnessError::Network {
                name: network.name.clone(),
                message: e.to_string(),
            }),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &spec.ports {
            let key = format!("{}/tcp", port.container_port);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![DockerPortBinding {
                    host_ip: None,
                    host_port: Some(port.host_port.to_string()),
                }]),
            );
        }

        let config = Config {
            image: Some(spec.image.to_string()),
            cmd: spec.command.clone(),
            env: Some(spec.env_pairs()),
            exposed_ports: Some(exposed_ports),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(HostConfig {
                binds: Some(spec.bind_strings()),
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        match self.docker.create_container(Some(options), config).await {
            Ok(response) => {
                for warning in &response.warnings {
                    warn!(container = %spec.name, warning = %warning, "Docker warning on create");
                }
                Ok(response.id)
            }
            Err(e) if status_code(&e) == Some(404) => Err(HarnessError::ImageNotFound {
                image: spec.image.to_string(),
            }),
            Err(e) => Err(HarnessError::ContainerCreate {
                name: spec.name.clone(),
                message: e.to_string(),
            }),
        }
    }

    async fn connect_to_network(&self, container_id: &str, network: &str, alias: &str) -> Result<()> {
        let options = ConnectNetworkOptions {
            container: container_id,
            endpoint_config: EndpointSettings {
                aliases: Some(vec![alias.to_string()]),
                ..Default::default()
            },
        };

        self.docker
            .connect_network(network, options)
            .await
            .map_err(|e| HarnessError::Network {
                name: network.to_string(),
                message: format!("cannot attach {}: {}", alias, e),
            })
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| HarnessError::Execution(format!("failed to start container: {}", e)))
    }

    async fn wait_container(&self, container_id: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(container_id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Bollard reports a non-zero exit as an error carrying the code
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(HarnessError::Execution(format!("failed to wait for container: {}", e))),
            None => Err(HarnessError::Execution("no wait response from container".to_string())),
        }
    }

    async fn kill_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .kill_container(container_id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| HarnessError::Execution(format!("failed to kill container: {}", e)))
    }

    async fn container_logs(&self, container_id: &str) -> Result<Vec<u8>> {
        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        });

        let mut output = Vec::new();
        let mut stream = self.docker.logs(container_id, options);
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => output.extend_from_slice(&message),
                Ok(LogOutput::StdIn { .. }) => {}
                Err(e) => {
                    return Err(HarnessError::Execution(format!("failed to read container logs: {}", e)))
                }
            }
        }
        Ok(output)
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        let options = Some(StopContainerOptions { t: STOP_GRACE_SECS });
        match self.docker.stop_container(container_id, options).await {
            Ok(()) => Ok(()),
            // 304: already stopped, 404: already gone
            Err(e) if matches!(status_code(&e), Some(304) | Some(404)) => Ok(()),
            Err(e) => Err(HarnessError::Execution(format!("failed to stop container: {}", e))),
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let options = Some(RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        });
        match self.docker.remove_container(container_id, options).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => {
                warn!(id = %container_id, "Container already removed");
                Ok(())
            }
            Err(e) => Err(HarnessError::Execution(format!("failed to remove container: {}", e))),
        }
    }
}

/// These tests need a running Docker daemon
#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerHandle, NetworkHandle};
    use std::sync::Arc;

    fn busybox() -> ImageRef {
        ImageRef::new("busybox", "latest")
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_batch_container_lifecycle() {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect().expect("docker"));
        runtime.ensure_image(&busybox()).await.expect("pull busybox");

        let network = NetworkHandle::create(runtime.clone(), &format!("lit-test-{}", uuid::Uuid::new_v4()))
            .await
            .expect("network");

        let mut spec = ContainerSpec::new(format!("lit-test-{}", uuid::Uuid::new_v4()), busybox());
        spec.command = Some(vec!["sh".into(), "-c".into(), "echo hello; exit 3".into()]);
        let mut container = ContainerHandle::create(runtime.clone(), spec).await.expect("create");
        container.connect_to_network(&network).await.expect("connect");
        container.start().await.expect("start");

        let code = container.wait(None).await.expect("wait");
        assert_eq!(code, 3);
        assert!(container.logs().await.expect("logs").contains("hello"));

        assert!(container.teardown().await.is_empty());
        network.remove().await.expect("remove network");
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_missing_image_is_classified() {
        let runtime = DockerRuntime::connect().expect("docker");
        let spec = ContainerSpec::new(
            format!("lit-test-{}", uuid::Uuid::new_v4()),
            ImageRef::new("lit-does-not-exist", "0.0.0"),
        );

        let err = runtime.create_container(&spec).await.unwrap_err();
        assert!(matches!(err, HarnessError::ImageNotFound { .. }), "got {:?}", err);
    }
}
