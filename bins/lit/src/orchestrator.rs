/// Run Orchestrator - Suite and Per-Test Lifecycle
///
/// **Core Responsibility:**
/// Own the suite network and data store, run every selected test's
/// processor container to completion, query what it indexed and compare.
///
/// **Failure policy:**
/// - Setup failures (images, network, data store, readiness) abort the suite
/// - Per-test failures are recorded on the test's outcome; the loop continues
/// - Teardown failures are collected as warnings and never change an outcome
///
/// **Teardown order:** processor containers, then the data store, then the network.
///
/// **Shutdown:** a signal on the shutdown channel abandons setup or the running
/// test and goes straight to teardown.

use crate::compare::{actual_sources, compare, expected_hits};
use crate::container::{ContainerHandle, NetworkHandle};
use crate::processor::{data_store_spec, processor_spec};
use crate::readiness::ReadinessProbe;
use crate::report::{FailureReason, SuiteReport, TestOutcome};
use crate::runtime::ContainerRuntime;
use crate::store::DataStore;
use chrono::Utc;
use lit_common::environment::RuntimeEnvironment;
use lit_common::error::{HarnessError, Result};
use lit_common::fixture::FixtureEntry;
use lit_common::types::TestCase;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

const EXPECTED_TAGLINE: &str = "You Know, for Search";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuitePhase {
    SuiteStart,
    NetworkUp,
    DataStoreStarting,
    DataStoreReady,
    SuiteTeardown,
    SuiteEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TestPhase {
    TestStart,
    TemplateLoaded,
    ProcessorContainerCreated,
    ProcessorRunning,
    ProcessorExited,
    QueryExecuted,
    Compared,
    TestEnd,
}

/// Knobs the caller controls per run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Pull missing images before setup
    pub pull_images: bool,
    /// `None` polls the data store forever
    pub readiness_deadline: Option<Duration>,
    /// `None` waits for the processor forever
    pub processor_deadline: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            pull_images: true,
            readiness_deadline: None,
            processor_deadline: None,
        }
    }
}

/// JSON documents a test reads from disk
struct TestDocuments {
    template: Option<Value>,
    query: Value,
    expected: Value,
}

pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn DataStore>,
    environment: RuntimeEnvironment,
    options: RunOptions,
    phase: SuitePhase,
    network: Option<NetworkHandle>,
    data_store: Option<ContainerHandle>,
    /// Processor of the test in flight, so an interrupted test is still torn down
    active: Option<ContainerHandle>,
    /// Processors of tests with `auto_remove: false`, removed at suite teardown
    retained: Vec<ContainerHandle>,
    teardown_warnings: Vec<String>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn DataStore>,
        environment: RuntimeEnvironment,
        options: RunOptions,
    ) -> Self {
        Self {
            runtime,
            store,
            environment,
            options,
            phase: SuitePhase::SuiteStart,
            network: None,
            data_store: None,
            active: None,
            retained: Vec::new(),
            teardown_warnings: Vec::new(),
            shutdown: None,
        }
    }

    /// Stop early, tearing everything down, once `true` is sent on the channel
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn phase(&self) -> SuitePhase {
        self.phase
    }

    /// Run the whole suite: setup, every entry in order, teardown
    pub async fn run(mut self, entries: Vec<FixtureEntry>) -> SuiteReport {
        let mut report = SuiteReport::new();
        info!(run_id = %report.run_id, tests = entries.len(), "Starting suite");
        let mut shutdown = self.shutdown.take();

        let setup = tokio::select! {
            result = self.setup() => Some(result),
            _ = shutdown_requested(&mut shutdown) => None,
        };

        match setup {
            None => {
                warn!(phase = ?self.phase, "Interrupted during setup");
                report.interrupted = true;
            }
            Some(Ok(())) => {
                for entry in entries {
                    let name = entry.name.clone();
                    let outcome = tokio::select! {
                        outcome = self.run_entry(entry) => outcome,
                        _ = shutdown_requested(&mut shutdown) => {
                            warn!(test = %name, "Interrupted, skipping remaining tests");
                            report.interrupted = true;
                            break;
                        }
                    };
                    if outcome.passed() {
                        info!(test = %outcome.name, duration_ms = outcome.duration_ms, "Test passed");
                    } else {
                        warn!(
                            test = %outcome.name,
                            failures = outcome.failures.len(),
                            reached = ?outcome.reached,
                            "Test failed"
                        );
                    }
                    report.outcomes.push(outcome);
                }
            }
            Some(Err(e)) => {
                error!(phase = ?self.phase, error = %e, "Suite setup failed");
                report.setup_error = Some(e.to_string());
            }
        }

        report.teardown_warnings = self.teardown().await;
        report.finished_at = Some(Utc::now());

        info!(
            run_id = %report.run_id,
            passed = report.passed(),
            failed = report.failed(),
            setup_failed = report.setup_error.is_some(),
            interrupted = report.interrupted,
            "Suite finished"
        );
        report
    }

    fn enter(&mut self, phase: SuitePhase) {
        debug!(from = ?self.phase, to = ?phase, "Suite phase");
        self.phase = phase;
    }

    #[instrument(skip(self), fields(network = %self.environment.network_name))]
    async fn setup(&mut self) -> Result<()> {
        if self.options.pull_images {
            for image in [&self.environment.data_store_image, &self.environment.processor_image] {
                self.runtime.ensure_image(image).await?;
            }
        }

        let network = NetworkHandle::create(self.runtime.clone(), &self.environment.network_name).await?;
        self.network = Some(network);
        self.enter(SuitePhase::NetworkUp);

        let spec = data_store_spec(&self.environment);
        let data_store = ContainerHandle::create(self.runtime.clone(), spec).await?;
        // Owned by the suite from here on so teardown sees it even if start fails
        let data_store = self.data_store.insert(data_store);
        if let Some(network) = &self.network {
            data_store.connect_to_network(network).await?;
        }
        data_store.start().await?;
        self.enter(SuitePhase::DataStoreStarting);

        let probe = ReadinessProbe::new(self.environment.readiness_interval)
            .with_deadline(self.options.readiness_deadline);
        info!(endpoint = %self.store.endpoint(), deadline = ?probe.deadline(), "Waiting for data store");

        let info = match probe.await_ready(self.store.as_ref()).await {
            Ok(info) => info,
            Err(e) => {
                self.dump_data_store_logs().await;
                return Err(e);
            }
        };

        if info.tagline.as_deref() != Some(EXPECTED_TAGLINE) {
            warn!(tagline = ?info.tagline, "Data store answered with an unexpected tagline");
        }
        info!(
            node = info.name.as_deref().unwrap_or_default(),
            cluster = info.cluster_name.as_deref().unwrap_or_default(),
            version = info.version.as_ref().and_then(|v| v.number.as_deref()).unwrap_or("unknown"),
            "Data store identified"
        );
        self.enter(SuitePhase::DataStoreReady);
        Ok(())
    }

    async fn dump_data_store_logs(&self) {
        let Some(data_store) = &self.data_store else { return };
        match data_store.logs().await {
            Ok(logs) => {
                for line in logs.lines().rev().take(50).collect::<Vec<_>>().into_iter().rev() {
                    warn!(container = %data_store.name(), "{}", line);
                }
            }
            Err(e) => debug!(error = %e, "No data store logs available"),
        }
    }

    async fn run_entry(&mut self, entry: FixtureEntry) -> TestOutcome {
        match entry.case {
            Ok(test) => self.run_test(&test).await,
            Err(e) => {
                warn!(test = %entry.name, error = %e, "Skipping malformed test");
                let mut outcome = TestOutcome::new(entry.name);
                outcome.failures.push(FailureReason::Configuration(e.to_string()));
                outcome
            }
        }
    }

    /// One test, start to end. The processor is torn down on every path.
    #[instrument(skip(self, test), fields(test = %test.name))]
    pub async fn run_test(&mut self, test: &TestCase) -> TestOutcome {
        let started = Instant::now();
        let mut outcome = TestOutcome::new(&test.name);
        info!("Running test");

        let documents = match load_documents(test).await {
            Ok(documents) => documents,
            Err(message) => {
                outcome.failures.push(FailureReason::Configuration(message));
                outcome.duration_ms = started.elapsed().as_millis() as u64;
                return outcome;
            }
        };

        if let Some(template) = &documents.template {
            if let Err(e) = self.store.put_template(&test.name, template).await {
                outcome.failures.push(FailureReason::Store(format!("registering index template: {}", e)));
                outcome.duration_ms = started.elapsed().as_millis() as u64;
                return outcome;
            }
            debug!("Index template registered");
        }
        advance(&mut outcome, TestPhase::TemplateLoaded);

        let processor = match ContainerHandle::create(self.runtime.clone(), processor_spec(&self.environment, test)).await {
            Ok(processor) => {
                advance(&mut outcome, TestPhase::ProcessorContainerCreated);
                Some(processor)
            }
            Err(e) => {
                outcome
                    .failures
                    .push(FailureReason::Execution(format!("creating processor container: {}", e)));
                None
            }
        };

        if let Some(processor) = processor {
            let processor = self.active.insert(processor);
            execute_processor(processor, self.network.as_ref(), self.options.processor_deadline, &mut outcome).await;
            if let Some(processor) = self.active.take() {
                self.release_processor(processor, test.auto_remove).await;
            }
        }

        // A crashed processor may still have indexed something worth diagnosing
        self.query_and_compare(test, &documents, &mut outcome).await;

        advance(&mut outcome, TestPhase::TestEnd);
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    /// Stop the processor, and remove it now or at suite teardown
    async fn release_processor(&mut self, mut processor: ContainerHandle, auto_remove: bool) {
        if auto_remove {
            self.record_teardown(processor.teardown().await);
            return;
        }

        if let Err(e) = processor.stop().await {
            self.record_teardown(vec![e]);
        }
        info!(container = %processor.name(), "Keeping processor container until suite teardown");
        self.retained.push(processor);
    }

    async fn query_and_compare(&self, test: &TestCase, documents: &TestDocuments, outcome: &mut TestOutcome) {
        let pattern = test.index_pattern();

        // Without a refresh the search can race indexing
        if let Err(e) = self.store.refresh(&pattern).await {
            outcome.failures.push(FailureReason::Store(format!("refreshing {}: {}", pattern, e)));
            return;
        }

        info!(index = %pattern, "Fetching data from data store");
        let response = match self.store.search(&pattern, &documents.query).await {
            Ok(response) => response,
            Err(e) => {
                outcome.failures.push(FailureReason::Store(format!("searching {}: {}", pattern, e)));
                return;
            }
        };
        advance(outcome, TestPhase::QueryExecuted);

        let actual = match actual_sources(&response) {
            Ok(actual) => actual,
            Err(message) => {
                outcome.failures.push(FailureReason::Store(message));
                return;
            }
        };
        // Shape was validated when the documents were loaded
        let expected = expected_hits(&documents.expected).unwrap_or_default();

        let comparison = compare(expected, &actual);
        advance(outcome, TestPhase::Compared);
        debug!(
            expected = comparison.expected_count,
            actual = comparison.actual_count,
            mismatches = comparison.mismatches.len(),
            "Compared results"
        );
        if !comparison.passed() {
            outcome.failures.push(FailureReason::Assertion(comparison));
        }
    }

    fn record_teardown(&mut self, failures: Vec<HarnessError>) {
        for failure in failures {
            warn!(error = %failure, "Teardown step failed");
            self.teardown_warnings.push(failure.to_string());
        }
    }

    /// Best-effort teardown of everything the suite still owns
    async fn teardown(&mut self) -> Vec<String> {
        self.enter(SuitePhase::SuiteTeardown);
        info!("Tearing down");

        if let Some(mut processor) = self.active.take() {
            warn!(container = %processor.name(), "Removing processor of an interrupted test");
            let failures = processor.teardown().await;
            self.record_teardown(failures);
        }

        for mut processor in std::mem::take(&mut self.retained) {
            let failures = processor.teardown().await;
            self.record_teardown(failures);
        }

        if let Some(mut data_store) = self.data_store.take() {
            let failures = data_store.teardown().await;
            self.record_teardown(failures);
        }

        if let Some(network) = self.network.take() {
            if let Err(e) = network.remove().await {
                self.record_teardown(vec![e]);
            }
        }

        self.enter(SuitePhase::SuiteEnd);
        std::mem::take(&mut self.teardown_warnings)
    }
}

async fn execute_processor(
    processor: &mut ContainerHandle,
    network: Option<&NetworkHandle>,
    deadline: Option<Duration>,
    outcome: &mut TestOutcome,
) {
    let Some(network) = network else {
        outcome
            .failures
            .push(FailureReason::Execution("suite network is not up".to_string()));
        return;
    };

    if let Err(e) = processor.connect_to_network(network).await {
        outcome.failures.push(FailureReason::Execution(e.to_string()));
        return;
    }
    if let Err(e) = processor.start().await {
        outcome.failures.push(FailureReason::Execution(e.to_string()));
        return;
    }
    advance(outcome, TestPhase::ProcessorRunning);
    info!(container = %processor.name(), "Awaiting processor exit");

    match processor.wait(deadline).await {
        Ok(code) => {
            outcome.exit_code = Some(code);
            advance(outcome, TestPhase::ProcessorExited);
            if code != 0 {
                outcome
                    .failures
                    .push(FailureReason::Execution(format!("processor exited with status {}", code)));
            }
        }
        Err(e @ HarnessError::Timeout { .. }) => {
            outcome.failures.push(FailureReason::Timeout(e.to_string()));
        }
        Err(e) => {
            outcome.failures.push(FailureReason::Execution(e.to_string()));
        }
    }

    match processor.logs().await {
        Ok(logs) => {
            for line in logs.lines() {
                debug!(container = %processor.name(), "{}", line);
            }
            outcome.processor_logs = Some(logs);
        }
        Err(e) => warn!(container = %processor.name(), error = %e, "Could not fetch processor logs"),
    }
}

/// Resolves once shutdown is requested; never without a channel
async fn shutdown_requested(shutdown: &mut Option<watch::Receiver<bool>>) {
    if let Some(receiver) = shutdown {
        let closed = receiver.wait_for(|stop| *stop).await.is_err();
        if !closed {
            return;
        }
    }
    // No channel, or its sender is gone without asking to stop
    std::future::pending::<()>().await
}

/// Phases only move forward; a skipped processor leaves the test short of it
fn advance(outcome: &mut TestOutcome, phase: TestPhase) {
    if phase > outcome.reached {
        debug!(from = ?outcome.reached, to = ?phase, "Test phase");
        outcome.reached = phase;
    }
}

async fn read_json(field: &str, path: &Path) -> std::result::Result<Value, String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("{} file {}: {}", field, path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("{} file {} is not valid JSON: {}", field, path.display(), e))
}

/// Check every referenced file and parse the JSON ones
async fn load_documents(test: &TestCase) -> std::result::Result<TestDocuments, String> {
    for (field, path) in test.referenced_files() {
        if !path.is_file() {
            return Err(format!("{} file {} does not exist", field, path.display()));
        }
    }

    let template = match &test.template {
        Some(path) => Some(read_json("template", path).await?),
        None => None,
    };
    let query = read_json("query", &test.query).await?;
    let expected = read_json("output", &test.expected_output).await?;
    expected_hits(&expected)?;

    Ok(TestDocuments {
        template,
        query,
        expected,
    })
}
