// Suite and per-test outcomes
use crate::compare::ComparisonReport;
use crate::orchestrator::TestPhase;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use uuid::Uuid;

/// Why a test failed. A test can collect several.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// Fixture entry or referenced file unusable
    Configuration(String),
    /// Processor failed to be created/started or exited abnormally
    Execution(String),
    /// Processor did not exit before its deadline
    Timeout(String),
    /// Template, refresh or search against the data store failed
    Store(String),
    /// Indexed documents differ from the fixture
    Assertion(ComparisonReport),
}

impl FailureReason {
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::Configuration(_) => "configuration",
            FailureReason::Execution(_) => "execution",
            FailureReason::Timeout(_) => "timeout",
            FailureReason::Store(_) => "store",
            FailureReason::Assertion(_) => "assertion",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    pub name: String,
    /// Furthest phase the test got to
    pub reached: TestPhase,
    pub failures: Vec<FailureReason>,
    pub exit_code: Option<i64>,
    pub processor_logs: Option<String>,
    pub duration_ms: u64,
}

impl TestOutcome {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reached: TestPhase::TestStart,
            failures: Vec::new(),
            exit_code: None,
            processor_logs: None,
            duration_ms: 0,
        }
    }

    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn comparison(&self) -> Option<&ComparisonReport> {
        self.failures.iter().find_map(|f| match f {
            FailureReason::Assertion(report) => Some(report),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when the suite aborted before any test could run
    pub setup_error: Option<String>,
    pub outcomes: Vec<TestOutcome>,
    pub teardown_warnings: Vec<String>,
    /// Shutdown was requested before every test ran
    pub interrupted: bool,
}

impl SuiteReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            setup_error: None,
            outcomes: Vec::new(),
            teardown_warnings: Vec::new(),
            interrupted: false,
        }
    }

    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn succeeded(&self) -> bool {
        self.setup_error.is_none() && !self.interrupted && self.failed() == 0
    }

    /// 0 when everything passed, 1 on test failures, 2 on a fatal setup error,
    /// 130 when interrupted
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            130
        } else if self.setup_error.is_some() {
            2
        } else if self.failed() > 0 {
            1
        } else {
            0
        }
    }

    /// Human readable summary, including logs and mismatches of failing tests
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "== lit run {} ==", self.run_id);

        if let Some(error) = &self.setup_error {
            let _ = writeln!(out, "SETUP FAILED: {}", error);
        }
        if self.interrupted {
            let _ = writeln!(out, "INTERRUPTED: remaining tests were skipped");
        }

        for outcome in &self.outcomes {
            let status = if outcome.passed() { "PASS" } else { "FAIL" };
            let _ = writeln!(out, "[{}] {} ({} ms)", status, outcome.name, outcome.duration_ms);

            for failure in &outcome.failures {
                match failure {
                    FailureReason::Assertion(report) => {
                        let _ = writeln!(out, "  assertion:");
                        for line in report.to_string().lines() {
                            let _ = writeln!(out, "    {}", line);
                        }
                    }
                    FailureReason::Configuration(m)
                    | FailureReason::Execution(m)
                    | FailureReason::Timeout(m)
                    | FailureReason::Store(m) => {
                        let _ = writeln!(out, "  {}: {}", failure.kind(), m);
                    }
                }
            }

            if !outcome.passed() {
                if let Some(logs) = outcome.processor_logs.as_deref().filter(|l| !l.trim().is_empty()) {
                    let _ = writeln!(out, "  processor logs:");
                    for line in logs.lines() {
                        let _ = writeln!(out, "    | {}", line);
                    }
                }
            }
        }

        for warning in &self.teardown_warnings {
            let _ = writeln!(out, "teardown warning: {}", warning);
        }

        let _ = writeln!(
            out,
            "{} passed, {} failed{}",
            self.passed(),
            self.failed(),
            if self.setup_error.is_some() { ", setup failed" } else { "" }
        );
        out
    }
}

impl Default for SuiteReport {
    fn default() -> Self {
        Self::new()
    }
}
