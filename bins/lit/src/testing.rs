// In-memory container runtime and data store for orchestrator tests.
//
// Both fakes append to one shared event log so tests can assert on the
// relative order of container, network and store operations.

use crate::runtime::{ContainerRuntime, ContainerSpec, NetworkInstance};
use crate::store::{DataStore, StoreError, StoreInfo};
use async_trait::async_trait;
use lit_common::environment::RuntimeEnvironment;
use lit_common::error::{HarnessError, Result};
use lit_common::types::{ImageRef, TestCase};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    /// Index of the first occurrence, panicking with the log when absent
    pub fn position(&self, event: &str) -> usize {
        let events = self.events();
        events
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event {:?} not in {:?}", event, events))
    }
}

/// Scripted behaviour of the fake runtime, keyed by container name
#[derive(Default)]
pub struct RuntimeScript {
    pub fail_pull: bool,
    pub fail_network: bool,
    pub fail_create: HashSet<String>,
    pub fail_start: HashSet<String>,
    pub fail_remove: HashSet<String>,
    pub exit_codes: HashMap<String, i64>,
    /// Containers whose wait never returns
    pub hang: HashSet<String>,
    pub logs: HashMap<String, Vec<u8>>,
}

pub struct FakeRuntime {
    log: EventLog,
    script: RuntimeScript,
    names: Mutex<HashMap<String, String>>,
    next_id: Mutex<u32>,
}

impl FakeRuntime {
    pub fn new(log: EventLog, script: RuntimeScript) -> Self {
        Self {
            log,
            script,
            names: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        }
    }

    fn name_of(&self, id: &str) -> String {
        self.names
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("unknown:{}", id))
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, image: &ImageRef) -> Result<()> {
        self.log.push(format!("pull:{}", image));
        if self.script.fail_pull {
            return Err(HarnessError::ImagePull {
                image: image.to_string(),
                message: "registry unreachable".to_string(),
            });
        }
        Ok(())
    }

    async fn create_network(&self, name: &str) -> Result<NetworkInstance> {
        self.log.push(format!("network-create:{}", name));
        if self.script.fail_network {
            return Err(HarnessError::Network {
                name: name.to_string(),
                message: "name already in use".to_string(),
            });
        }
        Ok(NetworkInstance {
            id: format!("net{}", name),
            name: name.to_string(),
        })
    }

    async fn remove_network(&self, network: &NetworkInstance) -> Result<()> {
        self.log.push(format!("network-remove:{}", network.name));
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.log.push(format!("create:{}", spec.name));
        if self.script.fail_create.contains(&spec.name) {
            return Err(HarnessError::ContainerCreate {
                name: spec.name.clone(),
                message: "conflict".to_string(),
            });
        }
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let id = format!("c{:04}", *next);
        self.names.lock().unwrap().insert(id.clone(), spec.name.clone());
        Ok(id)
    }

    async fn connect_to_network(&self, container_id: &str, network: &str, _alias: &str) -> Result<()> {
        self.log.push(format!("connect:{}:{}", self.name_of(container_id), network));
        Ok(())
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        let name = self.name_of(container_id);
        self.log.push(format!("start:{}", name));
        if self.script.fail_start.contains(&name) {
            return Err(HarnessError::Execution(format!("failed to start container: {} is broken", name)));
        }
        Ok(())
    }

    async fn wait_container(&self, container_id: &str) -> Result<i64> {
        let name = self.name_of(container_id);
        self.log.push(format!("wait:{}", name));
        if self.script.hang.contains(&name) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(self.script.exit_codes.get(&name).copied().unwrap_or(0))
    }

    async fn kill_container(&self, container_id: &str) -> Result<()> {
        self.log.push(format!("kill:{}", self.name_of(container_id)));
        Ok(())
    }

    async fn container_logs(&self, container_id: &str) -> Result<Vec<u8>> {
        let name = self.name_of(container_id);
        self.log.push(format!("logs:{}", name));
        Ok(self.script.logs.get(&name).cloned().unwrap_or_default())
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        self.log.push(format!("stop:{}", self.name_of(container_id)));
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let name = self.name_of(container_id);
        self.log.push(format!("remove:{}", name));
        if self.script.fail_remove.contains(&name) {
            return Err(HarnessError::Execution("device or resource busy".to_string()));
        }
        Ok(())
    }
}

/// Data store whose search results are scripted per index pattern
pub struct FakeStore {
    log: EventLog,
    /// Node name reported by `info`; empty means "booting forever"
    pub node_name: String,
    pub sources: HashMap<String, Vec<Value>>,
    pub failing_search: HashSet<String>,
    pub templates: Mutex<Vec<(String, Value)>>,
}

impl FakeStore {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            node_name: "node-1".to_string(),
            sources: HashMap::new(),
            failing_search: HashSet::new(),
            templates: Mutex::new(Vec::new()),
        }
    }

    pub fn with_sources(mut self, pattern: &str, sources: Vec<Value>) -> Self {
        self.sources.insert(pattern.to_string(), sources);
        self
    }
}

#[async_trait]
impl DataStore for FakeStore {
    fn endpoint(&self) -> &str {
        "fake://data-store"
    }

    async fn info(&self) -> std::result::Result<StoreInfo, StoreError> {
        self.log.push("info");
        Ok(StoreInfo {
            name: Some(self.node_name.clone()),
            tagline: Some("You Know, for Search".to_string()),
            ..Default::default()
        })
    }

    async fn put_template(&self, name: &str, body: &Value) -> std::result::Result<(), StoreError> {
        self.log.push(format!("template:{}", name));
        self.templates.lock().unwrap().push((name.to_string(), body.clone()));
        Ok(())
    }

    async fn refresh(&self, index_pattern: &str) -> std::result::Result<(), StoreError> {
        self.log.push(format!("refresh:{}", index_pattern));
        Ok(())
    }

    async fn search(&self, index_pattern: &str, _query: &Value) -> std::result::Result<Value, StoreError> {
        self.log.push(format!("search:{}", index_pattern));
        if self.failing_search.contains(index_pattern) {
            return Err(StoreError::Status {
                operation: "search".to_string(),
                status: 500,
                body: "shard failure".to_string(),
            });
        }
        let hits: Vec<Value> = self
            .sources
            .get(index_pattern)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|source| json!({ "_source": source }))
            .collect();
        Ok(json!({ "hits": { "total": hits.len(), "hits": hits } }))
    }
}

/// Defaults with a polling interval short enough for unit tests
pub fn test_environment() -> RuntimeEnvironment {
    RuntimeEnvironment {
        readiness_interval: Duration::from_millis(10),
        ..RuntimeEnvironment::default()
    }
}

/// Processor container name for a test under the default prefix
pub fn processor_name(test: &str) -> String {
    format!("logstash-{}", test)
}

/// Write every file a test references into `dir` and describe it.
///
/// `expected` is the list of `_source` documents the test expects.
pub fn write_case(dir: &Path, name: &str, expected: Vec<Value>, template: Option<Value>) -> TestCase {
    let file = |relative: &str, content: &str| {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    };

    TestCase {
        name: name.to_string(),
        config: file("config/logstash.yml", "http.host: 0.0.0.0\n"),
        input: file(&format!("input/{}.log", name), "{\"message\":\"hello\"}\n"),
        pipeline: file(&format!("pipeline/{}.conf", name), "filter { mutate { add_tag => [\"seen\"] } }\n"),
        output_conf: file("output/output.conf", "output { elasticsearch { hosts => [\"${ES_HOST_1}\"] } }\n"),
        command: None,
        query: file(
            &format!("query/{}.json", name),
            &json!({ "query": { "match_all": {} } }).to_string(),
        ),
        expected_output: file(&format!("expected/{}.json", name), &json!({ "hits": expected }).to_string()),
        template: template.map(|t| file(&format!("templates/{}.json", name), &t.to_string())),
        auto_remove: true,
    }
}

pub fn suite_dir() -> TempDir {
    tempfile::tempdir().unwrap()
}
