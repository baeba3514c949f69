// Test case fixture loading.
//
// The fixture is a YAML mapping from test name to file references. Entries
// keep their document order, and an entry that fails to parse only poisons
// itself, so sibling tests still run.

use crate::error::{HarnessError, Result};
use crate::types::{ProcessorCommand, TestCase};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name looked up inside the test directory
pub const FIXTURE_FILE: &str = "logstash_tests.yml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTestCase {
    config: PathBuf,
    input: PathBuf,
    pipeline: PathBuf,
    query: PathBuf,
    output: PathBuf,
    output_conf: PathBuf,
    #[serde(default)]
    command: Option<ProcessorCommand>,
    #[serde(default)]
    template: Option<PathBuf>,
    #[serde(default = "default_auto_remove")]
    auto_remove: bool,
}

fn default_auto_remove() -> bool {
    true
}

/// A fixture entry: either a usable test case or the reason it is unusable
#[derive(Debug)]
pub struct FixtureEntry {
    pub name: String,
    pub case: Result<TestCase>,
}

/// Ordered fixture contents
#[derive(Debug)]
pub struct Fixture {
    pub test_dir: PathBuf,
    pub entries: Vec<FixtureEntry>,
}

impl Fixture {
    /// Load `logstash_tests.yml` from the given test directory
    pub fn load(test_dir: &Path) -> Result<Self> {
        Self::load_file(test_dir, &test_dir.join(FIXTURE_FILE))
    }

    /// Load a fixture file, resolving its relative paths against `test_dir`
    pub fn load_file(test_dir: &Path, fixture_path: &Path) -> Result<Self> {
        info!(fixture = %fixture_path.display(), "Gathering logstash tests");

        let content = fs::read_to_string(fixture_path).map_err(|source| HarnessError::Io {
            path: fixture_path.to_path_buf(),
            source,
        })?;

        let test_dir = absolute(test_dir)?;
        let entries = Self::parse_entries(&test_dir, fixture_path, &content)?;

        info!(
            tests = entries.len(),
            invalid = entries.iter().filter(|e| e.case.is_err()).count(),
            "Fixture loaded"
        );

        let fixture = Self { test_dir, entries };
        for (broad, narrow) in fixture.index_overlaps() {
            warn!(
                test = %broad,
                other = %narrow,
                "Index pattern {}-* also matches indices of {}; results depend on run order",
                broad,
                narrow
            );
        }
        Ok(fixture)
    }

    /// Pairs `(a, b)` where `a`'s index pattern `a-*` also covers `b`'s indices
    pub fn index_overlaps(&self) -> Vec<(String, String)> {
        let mut overlaps = Vec::new();
        for broad in &self.entries {
            let prefix = format!("{}-", broad.name);
            for narrow in &self.entries {
                if narrow.name.starts_with(&prefix) {
                    overlaps.push((broad.name.clone(), narrow.name.clone()));
                }
            }
        }
        overlaps
    }

    fn parse_entries(test_dir: &Path, fixture_path: &Path, content: &str) -> Result<Vec<FixtureEntry>> {
        let document: serde_yaml::Mapping =
            serde_yaml::from_str(content).map_err(|e| HarnessError::Parse {
                path: fixture_path.to_path_buf(),
                message: e.to_string(),
            })?;

        let mut entries = Vec::with_capacity(document.len());
        for (key, value) in document {
            let name = match key {
                serde_yaml::Value::String(name) => name,
                other => {
                    return Err(HarnessError::Parse {
                        path: fixture_path.to_path_buf(),
                        message: format!("test names must be strings, found {:?}", other),
                    })
                }
            };

            let case = serde_yaml::from_value::<RawTestCase>(value)
                .map_err(|e| HarnessError::Configuration {
                    test: name.clone(),
                    message: e.to_string(),
                })
                .map(|raw| resolve(&name, test_dir, raw));

            match &case {
                Ok(_) => debug!(test = %name, "Collected test"),
                Err(e) => warn!(test = %name, error = %e, "Malformed fixture entry"),
            }

            entries.push(FixtureEntry { name, case });
        }

        Ok(entries)
    }

    /// Names in fixture order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Keep every entry, or only the named one
    pub fn select(self, name: Option<&str>) -> Result<Vec<FixtureEntry>> {
        match name {
            None => Ok(self.entries),
            Some(wanted) => {
                let known = self.names().join(", ");
                let selected: Vec<_> = self
                    .entries
                    .into_iter()
                    .filter(|e| e.name == wanted)
                    .collect();

                if selected.is_empty() {
                    return Err(HarnessError::Configuration {
                        test: wanted.to_string(),
                        message: format!("no such test in fixture (known: {})", known),
                    });
                }
                Ok(selected)
            }
        }
    }
}

fn resolve(name: &str, test_dir: &Path, raw: RawTestCase) -> TestCase {
    TestCase {
        name: name.to_string(),
        config: test_dir.join(raw.config),
        input: test_dir.join(raw.input),
        pipeline: test_dir.join(raw.pipeline),
        output_conf: test_dir.join(raw.output_conf),
        command: raw.command,
        query: test_dir.join(raw.query),
        expected_output: test_dir.join(raw.output),
        template: raw.template.map(|t| test_dir.join(t)),
        auto_remove: raw.auto_remove,
    }
}

// Bind mounts need absolute host paths
fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|source| HarnessError::Io {
        path: path.to_path_buf(),
        source,
    })
}
