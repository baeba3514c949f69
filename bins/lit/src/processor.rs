// Container specifications for the two services of a suite run.
//
// The processor's environment and mounts are built from typed structs so a
// missing setting is a compile error rather than an absent variable inside
// the container.

use crate::runtime::{ContainerSpec, PortBinding, VolumeMount};
use lit_common::environment::RuntimeEnvironment;
use lit_common::types::{Credentials, TestCase};
use std::collections::BTreeMap;

pub const SETTINGS_DIR: &str = "/usr/share/logstash/config";
pub const SETTINGS_FILE: &str = "/usr/share/logstash/config/logstash.yml";
pub const INPUT_PATH: &str = "/data/input.log";
const PIPELINE_ROOT: &str = "/etc/logstash/conf.d";

/// Environment injected into a processor container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorEnvironment {
    pub settings_dir: String,
    pub monitoring_host: String,
    pub monitoring_port: u16,
    pub monitoring_user: String,
    pub monitoring_password: String,
    pub target_index: String,
    pub credentials: Credentials,
    pub data_store_hosts: Vec<String>,
}

impl ProcessorEnvironment {
    pub fn for_test(env: &RuntimeEnvironment, test: &TestCase) -> Self {
        Self {
            settings_dir: SETTINGS_DIR.to_string(),
            monitoring_host: env.data_store_name.clone(),
            monitoring_port: env.data_store_port,
            monitoring_user: env.monitoring_user.clone(),
            monitoring_password: env.credentials.password.clone(),
            target_index: test.name.clone(),
            credentials: env.credentials.clone(),
            data_store_hosts: vec![env.data_store_internal_host(); env.data_store_host_slots],
        }
    }

    pub fn to_variables(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("LS_SETTINGS_DIR".to_string(), self.settings_dir.clone());
        vars.insert("MONITORING_HOST".to_string(), self.monitoring_host.clone());
        vars.insert("MONITORING_PORT".to_string(), self.monitoring_port.to_string());
        vars.insert("MONITORING_USER".to_string(), self.monitoring_user.clone());
        vars.insert("MONITORING_PASSWORD".to_string(), self.monitoring_password.clone());
        vars.insert("INDEX_NAME".to_string(), self.target_index.clone());
        vars.insert("LOGSTASH_USER".to_string(), self.credentials.username.clone());
        vars.insert("LOGSTASH_PASS".to_string(), self.credentials.password.clone());
        for (slot, host) in self.data_store_hosts.iter().enumerate() {
            vars.insert(format!("ES_HOST_{}", slot + 1), host.clone());
        }
        vars
    }
}

/// Read-only mounts for one test's files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorMounts {
    pub mounts: BTreeMap<std::path::PathBuf, VolumeMount>,
}

impl ProcessorMounts {
    pub fn for_test(test: &TestCase) -> Self {
        let mut mounts = BTreeMap::new();
        mounts.insert(test.config.clone(), VolumeMount::read_only(SETTINGS_FILE));
        mounts.insert(test.input.clone(), VolumeMount::read_only(INPUT_PATH));
        mounts.insert(
            test.pipeline.clone(),
            VolumeMount::read_only(format!("{}/{}/filter.conf", PIPELINE_ROOT, test.name)),
        );
        mounts.insert(
            test.output_conf.clone(),
            VolumeMount::read_only(format!("{}/{}/output.conf", PIPELINE_ROOT, test.name)),
        );
        Self { mounts }
    }
}

/// Container name for a test's processor, restricted to what Docker accepts
pub fn processor_container_name(prefix: &str, test_name: &str) -> String {
    let suffix: String = test_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') { c } else { '-' })
        .collect();
    format!("{}-{}", prefix, suffix)
}

pub fn processor_spec(env: &RuntimeEnvironment, test: &TestCase) -> ContainerSpec {
    let mut spec = ContainerSpec::new(
        processor_container_name(&env.processor_name_prefix, &test.name),
        env.processor_image.clone(),
    );
    spec.command = Some(
        test.command
            .as_ref()
            .map(|c| c.to_argv())
            .unwrap_or_else(|| env.default_command.clone()),
    );
    spec.environment = ProcessorEnvironment::for_test(env, test).to_variables();
    spec.volumes = ProcessorMounts::for_test(test).mounts;
    spec
}

pub fn data_store_spec(env: &RuntimeEnvironment) -> ContainerSpec {
    let mut spec = ContainerSpec::new(env.data_store_name.clone(), env.data_store_image.clone());
    spec.environment
        .insert("ES_JAVA_OPTS".to_string(), env.data_store_java_opts.clone());
    spec.environment
        .insert("bootstrap.memory_lock".to_string(), "false".to_string());
    spec.ports.push(PortBinding {
        container_port: env.data_store_port,
        host_port: env.data_store_port,
    });
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use lit_common::types::ProcessorCommand;
    use std::path::PathBuf;

    fn test_case(name: &str) -> TestCase {
        let dir = PathBuf::from("/suite");
        TestCase {
            name: name.to_string(),
            config: dir.join("config/logstash.yml"),
            input: dir.join("input/basic.log"),
            pipeline: dir.join("pipeline/filter.conf"),
            output_conf: dir.join("pipeline/output.conf"),
            command: None,
            query: dir.join("query.json"),
            expected_output: dir.join("expected.json"),
            template: None,
            auto_remove: true,
        }
    }

    #[test]
    fn test_processor_environment_variables() {
        let env = RuntimeEnvironment::default();
        let vars = ProcessorEnvironment::for_test(&env, &test_case("basic")).to_variables();

        assert_eq!(vars["LS_SETTINGS_DIR"], "/usr/share/logstash/config");
        assert_eq!(vars["MONITORING_HOST"], "elasticsearch");
        assert_eq!(vars["MONITORING_PORT"], "9200");
        assert_eq!(vars["MONITORING_USER"], "logstash_system");
        assert_eq!(vars["MONITORING_PASSWORD"], "changeme");
        assert_eq!(vars["INDEX_NAME"], "basic");
        assert_eq!(vars["LOGSTASH_USER"], "elastic");
        assert_eq!(vars["LOGSTASH_PASS"], "changeme");
        for slot in 1..=4 {
            assert_eq!(vars[&format!("ES_HOST_{}", slot)], "elasticsearch:9200");
        }
        assert!(!vars.contains_key("ES_HOST_5"));
    }

    #[test]
    fn test_processor_mounts_are_read_only() {
        let spec = processor_spec(&RuntimeEnvironment::default(), &test_case("basic"));

        assert_eq!(spec.volumes.len(), 4);
        assert!(spec.volumes.values().all(|m| m.read_only));
        assert_eq!(
            spec.volumes[&PathBuf::from("/suite/config/logstash.yml")].container_path,
            SETTINGS_FILE
        );
        assert_eq!(
            spec.volumes[&PathBuf::from("/suite/input/basic.log")].container_path,
            INPUT_PATH
        );
        assert_eq!(
            spec.volumes[&PathBuf::from("/suite/pipeline/filter.conf")].container_path,
            "/etc/logstash/conf.d/basic/filter.conf"
        );
        assert_eq!(
            spec.volumes[&PathBuf::from("/suite/pipeline/output.conf")].container_path,
            "/etc/logstash/conf.d/basic/output.conf"
        );
    }

    #[test]
    fn test_command_defaults_and_override() {
        let env = RuntimeEnvironment::default();
        let spec = processor_spec(&env, &test_case("basic"));
        assert_eq!(spec.command.as_ref(), Some(&env.default_command));

        let mut custom = test_case("basic");
        custom.command = Some(ProcessorCommand::Shell("logstash -f /etc/logstash/conf.d".into()));
        let spec = processor_spec(&env, &custom);
        assert_eq!(
            spec.command,
            Some(vec!["sh".into(), "-c".into(), "logstash -f /etc/logstash/conf.d".into()])
        );
    }

    #[test]
    fn test_processor_container_name_is_sanitised() {
        assert_eq!(processor_container_name("logstash", "basic"), "logstash-basic");
        assert_eq!(processor_container_name("logstash", "apache logs/v2"), "logstash-apache-logs-v2");
    }

    #[test]
    fn test_data_store_spec() {
        let spec = data_store_spec(&RuntimeEnvironment::default());
        assert_eq!(spec.name, "elasticsearch");
        assert_eq!(spec.environment["ES_JAVA_OPTS"], "-Xms512m -Xmx512m");
        assert_eq!(spec.environment["bootstrap.memory_lock"], "false");
        assert_eq!(spec.ports, vec![PortBinding { container_port: 9200, host_port: 9200 }]);
        assert!(spec.command.is_none());
    }
}
