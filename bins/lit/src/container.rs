// Container and network handles.
//
// A handle pairs a runtime-assigned id with the lifecycle state the harness
// has driven it through, so misuse (logs before start, double removal) is
// caught here instead of surfacing as an engine error.

use crate::runtime::{ContainerRuntime, ContainerSpec, NetworkInstance};
use lit_common::error::{HarnessError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Exited(i64),
    Stopped,
    Removed,
}

/// A live container, exclusively owned by whoever created it
pub struct ContainerHandle {
    runtime: Arc<dyn ContainerRuntime>,
    id: String,
    spec: ContainerSpec,
    state: ContainerState,
    started: bool,
}

impl ContainerHandle {
    /// Create (but do not start) a container
    pub async fn create(runtime: Arc<dyn ContainerRuntime>, spec: ContainerSpec) -> Result<Self> {
        let id = runtime.create_container(&spec).await?;
        info!(container = %spec.name, id = %short_id(&id), image = %spec.image, "Container created");

        Ok(Self {
            runtime,
            id,
            spec,
            state: ContainerState::Created,
            started: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Attach to a network under the container's own name
    pub async fn connect_to_network(&self, network: &NetworkHandle) -> Result<()> {
        self.runtime
            .connect_to_network(&self.id, network.name(), &self.spec.name)
            .await?;
        debug!(container = %self.spec.name, network = %network.name(), "Connected to network");
        Ok(())
    }

    /// Returns once the runtime acknowledged the start, not once the process is ready
    pub async fn start(&mut self) -> Result<()> {
        self.runtime.start_container(&self.id).await?;
        self.started = true;
        self.state = ContainerState::Running;
        info!(container = %self.spec.name, "Container started");
        Ok(())
    }

    /// Block until the container's main process exits.
    ///
    /// With a deadline the container is killed once it passes and a
    /// `Timeout` error is returned.
    pub async fn wait(&mut self, deadline: Option<Duration>) -> Result<i64> {
        self.ensure_started("wait")?;

        let code = match deadline {
            None => self.runtime.wait_container(&self.id).await?,
            Some(limit) => match tokio::time::timeout(limit, self.runtime.wait_container(&self.id)).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(container = %self.spec.name, timeout = ?limit, "Container did not exit in time, killing");
                    if let Err(e) = self.runtime.kill_container(&self.id).await {
                        warn!(container = %self.spec.name, error = %e, "Failed to kill container");
                    }
                    return Err(HarnessError::Timeout {
                        operation: format!("waiting for {}", self.spec.name),
                        after: limit,
                    });
                }
            },
        };

        self.state = ContainerState::Exited(code);
        info!(container = %self.spec.name, exit_code = code, "Container exited");
        Ok(code)
    }

    /// Captured output, decoded lossily so bad bytes never fail a run
    pub async fn logs(&self) -> Result<String> {
        self.ensure_started("logs")?;
        let raw = self.runtime.container_logs(&self.id).await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Stop the container. A no-op when it never ran or is already gone.
    pub async fn stop(&mut self) -> Result<()> {
        match self.state {
            ContainerState::Created | ContainerState::Stopped | ContainerState::Removed => Ok(()),
            ContainerState::Running | ContainerState::Exited(_) => {
                self.runtime.stop_container(&self.id).await?;
                self.state = ContainerState::Stopped;
                debug!(container = %self.spec.name, "Container stopped");
                Ok(())
            }
        }
    }

    /// Remove the container's state from the runtime, at most once
    pub async fn cleanup(&mut self) -> Result<()> {
        if self.state == ContainerState::Removed {
            return Ok(());
        }
        self.runtime.remove_container(&self.id).await?;
        self.state = ContainerState::Removed;
        info!(container = %self.spec.name, "Container removed");
        Ok(())
    }

    /// Stop then remove, returning every failure instead of stopping at the first
    pub async fn teardown(&mut self) -> Vec<HarnessError> {
        let mut failures = Vec::new();
        if let Err(e) = self.stop().await {
            failures.push(teardown_error(&self.spec.name, "stop", e));
        }
        if let Err(e) = self.cleanup().await {
            failures.push(teardown_error(&self.spec.name, "remove", e));
        }
        failures
    }

    fn ensure_started(&self, operation: &str) -> Result<()> {
        if self.started {
            Ok(())
        } else {
            Err(HarnessError::Execution(format!(
                "cannot {} container {} before it was started",
                operation, self.spec.name
            )))
        }
    }
}

/// Last-resort cleanup if a handle is dropped without teardown (panic, cancellation)
impl Drop for ContainerHandle {
    fn drop(&mut self) {
        if self.state == ContainerState::Removed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container = %self.spec.name, "Container leaked: no runtime to remove it");
            return;
        };

        let runtime = self.runtime.clone();
        let id = self.id.clone();
        let name = self.spec.name.clone();
        handle.spawn(async move {
            if let Err(e) = runtime.remove_container(&id).await {
                warn!(container = %name, error = %e, "Failed to clean up dropped container");
            }
        });
    }
}

/// An isolated network for the suite
pub struct NetworkHandle {
    runtime: Arc<dyn ContainerRuntime>,
    instance: NetworkInstance,
}

impl NetworkHandle {
    pub async fn create(runtime: Arc<dyn ContainerRuntime>, name: &str) -> Result<Self> {
        let instance = runtime.create_network(name).await?;
        info!(network = %instance.name, id = %short_id(&instance.id), "Network created");
        Ok(Self { runtime, instance })
    }

    pub fn name(&self) -> &str {
        &self.instance.name
    }

    pub fn id(&self) -> &str {
        &self.instance.id
    }

    /// Delete the network. Callers must have removed attached containers first.
    pub async fn remove(self) -> Result<()> {
        self.runtime
            .remove_network(&self.instance)
            .await
            .map_err(|e| teardown_error(&self.instance.name, "remove network", e))?;
        info!(network = %self.instance.name, "Network removed");
        Ok(())
    }
}

fn teardown_error(resource: &str, step: &str, e: HarnessError) -> HarnessError {
    HarnessError::Teardown {
        resource: resource.to_string(),
        message: format!("{}: {}", step, e),
    }
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}
