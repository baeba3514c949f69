use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Image coordinates: repository plus tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Parse `repository:tag`. The tag separator is the last colon after the
    /// last slash so registry ports (`host:5000/repo`) are left alone.
    pub fn parse(reference: &str) -> Self {
        let slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        match reference[slash..].rfind(':') {
            Some(idx) => Self::new(&reference[..slash + idx], &reference[slash + idx + 1..]),
            None => Self::new(reference, "latest"),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Command run inside the processor container.
///
/// A fixture may give either a shell string or an argv list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessorCommand {
    Shell(String),
    Argv(Vec<String>),
}

impl ProcessorCommand {
    /// Argument vector handed to the container runtime
    pub fn to_argv(&self) -> Vec<String> {
        match self {
            ProcessorCommand::Shell(line) => {
                vec!["sh".to_string(), "-c".to_string(), line.clone()]
            }
            ProcessorCommand::Argv(args) => args.clone(),
        }
    }
}

/// One pipeline test, with every path already resolved against the test directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub config: PathBuf,
    pub input: PathBuf,
    pub pipeline: PathBuf,
    pub output_conf: PathBuf,
    pub command: Option<ProcessorCommand>,
    pub query: PathBuf,
    pub expected_output: PathBuf,
    pub template: Option<PathBuf>,
    pub auto_remove: bool,
}

impl TestCase {
    /// Every file the test reads, labelled by fixture field
    pub fn referenced_files(&self) -> Vec<(&'static str, &PathBuf)> {
        let mut files = vec![
            ("config", &self.config),
            ("input", &self.input),
            ("pipeline", &self.pipeline),
            ("output_conf", &self.output_conf),
            ("query", &self.query),
            ("output", &self.expected_output),
        ];
        if let Some(template) = &self.template {
            files.push(("template", template));
        }
        files
    }

    /// Index pattern the processor writes to and the query reads from
    pub fn index_pattern(&self) -> String {
        format!("{}-*", self.name)
    }
}
