// Logstash integration test harness.
//
// Runs each pipeline test from a fixture inside throwaway containers: an
// Elasticsearch node shared by the suite and one Logstash container per test,
// then compares what got indexed against the expected documents.

pub mod compare;
pub mod container;
pub mod docker;
pub mod orchestrator;
pub mod processor;
pub mod readiness;
pub mod report;
pub mod runtime;
pub mod store;

#[cfg(test)]
mod testing;
