// Runtime environment for a suite run
use crate::error::{HarnessError, Result};
use crate::types::{Credentials, ImageRef, ProcessorCommand};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_DATA_STORE_IMAGE: &str = "docker.elastic.co/elasticsearch/elasticsearch:5.5.1";
pub const DEFAULT_PROCESSOR_IMAGE: &str = "docker.elastic.co/logstash/logstash:5.5.1";
pub const DEFAULT_NETWORK: &str = "lsnet";
pub const DEFAULT_USERNAME: &str = "elastic";
pub const DEFAULT_PASSWORD: &str = "changeme";
pub const DEFAULT_COMMAND: &str = r#"/usr/share/logstash/bin/logstash -e "input{stdin{codec=>json_lines}}" < /data/input.log"#;

/// Everything a suite run needs to know about images, credentials and wiring.
///
/// Resolved once before the run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeEnvironment {
    pub data_store_image: ImageRef,
    pub processor_image: ImageRef,
    pub credentials: Credentials,
    pub network_name: String,
    pub default_command: Vec<String>,
    /// Container name, doubling as the DNS name on the suite network
    pub data_store_name: String,
    pub data_store_port: u16,
    /// Data store URL as seen from the harness host
    pub data_store_url: String,
    pub data_store_java_opts: String,
    pub processor_name_prefix: String,
    pub monitoring_user: String,
    pub data_store_host_slots: usize,
    pub readiness_interval: Duration,
}

impl Default for RuntimeEnvironment {
    fn default() -> Self {
        RuntimeConfigFile::default().into_environment()
    }
}

/// On-disk shape of the runtime configuration. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RuntimeConfigFile {
    images: ImagesSection,
    username: Option<String>,
    password: Option<String>,
    network: Option<String>,
    command: Option<ProcessorCommand>,
    data_store: DataStoreSection,
    processor: ProcessorSection,
    readiness_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ImagesSection {
    elasticsearch: Option<String>,
    logstash: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DataStoreSection {
    name: Option<String>,
    port: Option<u16>,
    url: Option<String>,
    java_opts: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ProcessorSection {
    name_prefix: Option<String>,
    monitoring_user: Option<String>,
    host_slots: Option<usize>,
}

impl RuntimeConfigFile {
    fn into_environment(self) -> RuntimeEnvironment {
        let port = self.data_store.port.unwrap_or(9200);
        RuntimeEnvironment {
            data_store_image: ImageRef::parse(
                self.images.elasticsearch.as_deref().unwrap_or(DEFAULT_DATA_STORE_IMAGE),
            ),
            processor_image: ImageRef::parse(
                self.images.logstash.as_deref().unwrap_or(DEFAULT_PROCESSOR_IMAGE),
            ),
            credentials: Credentials::new(
                self.username.unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
                self.password.unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
            ),
            network_name: self.network.unwrap_or_else(|| DEFAULT_NETWORK.to_string()),
            default_command: self
                .command
                .unwrap_or_else(|| ProcessorCommand::Argv(default_command()))
                .to_argv(),
            data_store_name: self.data_store.name.unwrap_or_else(|| "elasticsearch".to_string()),
            data_store_port: port,
            data_store_url: self
                .data_store
                .url
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            data_store_java_opts: self
                .data_store
                .java_opts
                .unwrap_or_else(|| "-Xms512m -Xmx512m".to_string()),
            processor_name_prefix: self.processor.name_prefix.unwrap_or_else(|| "logstash".to_string()),
            monitoring_user: self
                .processor
                .monitoring_user
                .unwrap_or_else(|| "logstash_system".to_string()),
            data_store_host_slots: self.processor.host_slots.unwrap_or(4),
            readiness_interval: Duration::from_secs(self.readiness_interval_secs.unwrap_or(2)),
        }
    }
}

fn default_command() -> Vec<String> {
    vec!["bash".to_string(), "-c".to_string(), DEFAULT_COMMAND.to_string()]
}

impl RuntimeEnvironment {
    /// Load a runtime configuration file, falling back to defaults for absent fields
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path).map_err(|source| HarnessError::Io {
            path: config_path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(config_path, &content)
    }

    /// Load when a path is given, defaults otherwise
    pub fn resolve(config_path: Option<&Path>) -> Result<Self> {
        let environment = match config_path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        info!(
            data_store_image = %environment.data_store_image,
            processor_image = %environment.processor_image,
            network = %environment.network_name,
            data_store_url = %environment.data_store_url,
            "Runtime environment resolved"
        );

        Ok(environment)
    }

    fn from_yaml(path: &Path, content: &str) -> Result<Self> {
        // An empty file is a valid "all defaults" configuration
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let file: RuntimeConfigFile = serde_yaml::from_str(content).map_err(|e| HarnessError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(file.into_environment())
    }

    /// Override the host-side data store URL
    pub fn with_data_store_url(mut self, url: impl Into<String>) -> Self {
        self.data_store_url = url.into();
        self
    }

    pub fn with_network_name(mut self, name: impl Into<String>) -> Self {
        self.network_name = name.into();
        self
    }

    /// `host:port` of the data store inside the suite network
    pub fn data_store_internal_host(&self) -> String {
        format!("{}:{}", self.data_store_name, self.data_store_port)
    }
}
