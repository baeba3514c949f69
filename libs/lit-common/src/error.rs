// Error taxonomy shared by the loader and the runner.
//
// Setup errors abort the suite, configuration/execution/assertion errors fail
// a single test case, and teardown errors are only ever logged.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Image could not be pulled or inspected
    #[error("failed to pull image {image}: {message}")]
    ImagePull { image: String, message: String },

    /// Image is not present locally
    #[error("image not found locally: {image}")]
    ImageNotFound { image: String },

    #[error("network {name}: {message}")]
    Network { name: String, message: String },

    #[error("failed to create container {name}: {message}")]
    ContainerCreate { name: String, message: String },

    /// Data store never reported a usable identity within the deadline
    #[error("data store at {endpoint} not ready after {waited:?}")]
    ReadinessTimeout { endpoint: String, waited: Duration },

    #[error("setup failed: {0}")]
    Setup(String),

    #[error("test {test}: {message}")]
    Configuration { test: String, message: String },

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("teardown of {resource} failed: {message}")]
    Teardown { resource: String, message: String },
}

pub type Result<T> = std::result::Result<T, HarnessError>;
