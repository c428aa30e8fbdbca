//! Shared harness for behavioral specs

#![allow(dead_code)]

pub use similar_asserts::assert_eq;
pub use std::time::Duration;
pub use tether_adapters::{FakeTransport, NopAuthProvider};
pub use tether_core::{
    BackoffPolicy, DescribeOptions, ScenarioSettings, SessionId, Status, StatusCode,
    DEFAULT_COORDINATION_NODE, UNBOUNDED_LIMIT,
};
pub use tether_engine::{
    AcquireOptions, DistributedLock, LockStatus, PublisherStatus, Scenario, ScenarioDeps,
    ScenarioEvent, ServiceDiscoveryPublisher,
};

use tokio::sync::mpsc;

const EVENT_WAIT: Duration = Duration::from_secs(120);

/// Log to the test writer; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One fake coordination service shared by every client in a test
pub struct Service {
    pub fake: FakeTransport,
}

impl Service {
    pub fn new() -> Self {
        init_tracing();
        Self {
            fake: FakeTransport::new(DEFAULT_COORDINATION_NODE),
        }
    }

    pub fn deps(&self) -> ScenarioDeps<FakeTransport, NopAuthProvider> {
        ScenarioDeps::new(self.fake.clone(), NopAuthProvider)
    }

    /// A scenario whose events are recorded in arrival order
    pub fn client(&self, settings: ScenarioSettings) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let scenario = Scenario::start(settings, self.deps(), |_| tx).unwrap();
        Client { scenario, rx }
    }

    /// A client with its session already established
    pub async fn started_client(&self, name: &str) -> (Client, SessionId) {
        let mut client = self.client(ScenarioSettings::new(name));
        let session_id = client.started().await;
        (client, session_id)
    }
}

pub struct Client {
    pub scenario: Scenario,
    rx: mpsc::UnboundedReceiver<ScenarioEvent>,
}

impl Client {
    pub async fn next(&mut self) -> Option<ScenarioEvent> {
        tokio::time::timeout(EVENT_WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a scenario event")
    }

    pub async fn event(&mut self) -> ScenarioEvent {
        self.next().await.expect("scenario stopped dispatching")
    }

    pub async fn started(&mut self) -> SessionId {
        match self.event().await {
            ScenarioEvent::SessionStarted { session_id } => session_id,
            other => panic!("expected session:started, got {:?}", other),
        }
    }

    /// Skip events until `pick` matches one
    pub async fn until<T>(&mut self, mut pick: impl FnMut(&ScenarioEvent) -> Option<T>) -> T {
        loop {
            let event = self.event().await;
            if let Some(found) = pick(&event) {
                return found;
            }
        }
    }

    pub fn create(&self, name: &str, limit: u64) {
        self.scenario
            .semaphores()
            .create(name, limit, Vec::new())
            .unwrap();
    }

    pub fn acquire(&self, name: &str, data: &str) {
        self.scenario
            .semaphores()
            .acquire(name, AcquireOptions::new(data))
            .unwrap();
    }

    pub async fn created(&mut self) -> Status {
        match self.event().await {
            ScenarioEvent::CreateResult { status, .. } => status,
            other => panic!("expected semaphore:create, got {:?}", other),
        }
    }

    pub async fn close(self) -> Vec<ScenarioEvent> {
        let Client { scenario, mut rx } = self;
        scenario.close().await;
        let mut rest = Vec::new();
        while let Some(event) = rx.recv().await {
            rest.push(event);
        }
        rest
    }
}
