// Readiness probing for the data store
use crate::store::{DataStore, StoreInfo};
use lit_common::error::{HarnessError, Result};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a single probe
#[derive(Debug)]
pub enum ProbeState {
    Ready(StoreInfo),
    /// Reachable or not, the store cannot serve requests yet
    NotReady(String),
}

/// Polls a data store until it answers with a non-empty node name.
///
/// Without a deadline the poll never gives up.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    interval: Duration,
    deadline: Option<Duration>,
}

impl ReadinessProbe {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// One probe. Errors only on failures that retrying cannot fix.
    pub async fn probe(&self, store: &dyn DataStore) -> Result<ProbeState> {
        match store.info().await {
            Ok(info) if info.identifies_itself() => Ok(ProbeState::Ready(info)),
            Ok(_) => Ok(ProbeState::NotReady("response carries no node name".to_string())),
            Err(e) if e.is_transient() => Ok(ProbeState::NotReady(e.to_string())),
            Err(e) => Err(HarnessError::Setup(format!(
                "data store at {} rejected the readiness probe: {}",
                store.endpoint(),
                e
            ))),
        }
    }

    /// Block until the store is ready, or the deadline passes
    pub async fn await_ready(&self, store: &dyn DataStore) -> Result<StoreInfo> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let state = match self.deadline {
                None => self.probe(store).await?,
                Some(deadline) => {
                    // A slow response must not carry the wait past the deadline
                    let remaining = deadline.saturating_sub(started.elapsed());
                    match tokio::time::timeout(remaining, self.probe(store)).await {
                        Ok(state) => state?,
                        Err(_) => {
                            return Err(HarnessError::ReadinessTimeout {
                                endpoint: store.endpoint().to_string(),
                                waited: started.elapsed(),
                            })
                        }
                    }
                }
            };

            match state {
                ProbeState::Ready(info) => {
                    info!(
                        endpoint = %store.endpoint(),
                        node = info.name.as_deref().unwrap_or_default(),
                        attempts,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Data store is ready"
                    );
                    return Ok(info);
                }
                ProbeState::NotReady(reason) => {
                    debug!(attempt = attempts, reason = %reason, "Data store is not up yet");
                    if attempts % 10 == 0 {
                        warn!(attempts, waited = ?started.elapsed(), "Still waiting for data store");
                    }
                }
            }

            if let Some(deadline) = self.deadline {
                let waited = started.elapsed();
                if waited + self.interval > deadline {
                    return Err(HarnessError::ReadinessTimeout {
                        endpoint: store.endpoint().to_string(),
                        waited,
                    });
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::HttpDataStore;
    use lit_common::types::Credentials;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(uri: &str) -> HttpDataStore {
        HttpDataStore::with_timeout(uri, Credentials::new("elastic", "changeme"), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_ready_after_identity_appears() {
        let server = MockServer::start().await;

        // Booting: answers, but without a node name
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cluster_name": "x" })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "node-1" })))
            .mount(&server)
            .await;

        let probe = ReadinessProbe::new(Duration::from_millis(10));
        let info = probe.await_ready(&store(&server.uri())).await.unwrap();
        assert_eq!(info.name.as_deref(), Some("node-1"));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_service_unavailable_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "node-1" })))
            .mount(&server)
            .await;

        let probe = ReadinessProbe::new(Duration::from_millis(10));
        assert!(probe.await_ready(&store(&server.uri())).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_identity_never_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "" })))
            .mount(&server)
            .await;

        let probe = ReadinessProbe::new(Duration::from_millis(10))
            .with_deadline(Some(Duration::from_millis(100)));
        let err = probe.await_ready(&store(&server.uri())).await.unwrap_err();
        assert!(matches!(err, HarnessError::ReadinessTimeout { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_unreachable_times_out_with_deadline() {
        let probe = ReadinessProbe::new(Duration::from_millis(10))
            .with_deadline(Some(Duration::from_millis(100)));
        let err = probe.await_ready(&store("http://127.0.0.1:9")).await.unwrap_err();
        assert!(matches!(err, HarnessError::ReadinessTimeout { .. }));
    }

    #[tokio::test]
    async fn test_slow_response_cannot_outlast_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "name": "node-1" }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let store = HttpDataStore::with_timeout(
            &server.uri(),
            Credentials::new("elastic", "changeme"),
            Duration::from_secs(30),
        )
        .unwrap();
        let probe = ReadinessProbe::new(Duration::from_millis(10))
            .with_deadline(Some(Duration::from_millis(300)));

        let started = Instant::now();
        let err = probe.await_ready(&store).await.unwrap_err();
        assert!(matches!(err, HarnessError::ReadinessTimeout { .. }), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(2), "waited {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn test_unbounded_probe_keeps_polling() {
        let probe = ReadinessProbe::new(Duration::from_millis(10));
        let unreachable = store("http://127.0.0.1:9");

        // No deadline: still polling when the outer timeout fires
        let outcome = tokio::time::timeout(Duration::from_millis(200), probe.await_ready(&unreachable)).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_bad_credentials_are_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = ReadinessProbe::new(Duration::from_millis(10))
            .await_ready(&store(&server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Setup(_)));
    }
}
