//! Scripted connection and recording callbacks for client tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use futures::StreamExt;
use futures::stream;
use prost_types::Any;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use xds_proto::api::{Cluster, ClusterLoadAssignment, DiscoveryRequest, DiscoveryResponse};
use xds_proto::{CLUSTER_LOAD_ASSIGNMENT_TYPE_URL, CLUSTER_TYPE_URL};

use crate::backoff::BackoffStrategy;
use crate::client::DiscoveryHandler;
use crate::config::ClientConfig;
use crate::connection::{AdsConnection, Connector, DiscoveryStream};
use crate::load_report::LoadReporter;
use crate::resource::{Resource, to_any};

/// What the server does on one stream attempt.
pub enum Script {
    /// Opening the stream fails.
    FailOpen,
    /// The server stops reading requests straight away.
    DropRequests,
    /// Deliver `responses`, then either end the stream or hang.
    Respond {
        responses: Vec<Result<DiscoveryResponse, Status>>,
        hang: bool,
    },
}

#[derive(Default)]
struct MockState {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<mpsc::Receiver<DiscoveryRequest>>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

/// Connection whose streams follow a queue of [`Script`]s. Once the queue is
/// empty every stream hangs until cancelled.
#[derive(Clone, Default)]
pub struct MockConnection {
    state: Arc<MockState>,
}

impl MockConnection {
    pub fn with_scripts(scripts: impl IntoIterator<Item = Script>) -> Self {
        let conn = Self::default();
        conn.state.scripts.lock().unwrap().extend(scripts);
        conn
    }

    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Requests written on the `attempt`-th stream that carried any.
    pub fn requests(&self, attempt: usize) -> Vec<DiscoveryRequest> {
        let mut receivers = self.state.requests.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(request) = receivers[attempt].try_recv() {
            out.push(request);
        }
        out
    }
}

#[async_trait::async_trait]
impl AdsConnection for MockConnection {
    async fn open_stream(&self) -> anyhow::Result<DiscoveryStream> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        let script = self
            .state
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Respond {
                responses: Vec::new(),
                hang: true,
            });
        let (tx, rx) = mpsc::channel(16);
        match script {
            Script::FailOpen => Err(anyhow!("connection refused")),
            Script::DropRequests => {
                drop(rx);
                Ok(DiscoveryStream::new(tx, stream::pending().boxed()))
            }
            Script::Respond { responses, hang } => {
                self.state.requests.lock().unwrap().push(rx);
                let responses = stream::iter(responses);
                let responses = if hang {
                    responses.chain(stream::pending()).boxed()
                } else {
                    responses.boxed()
                };
                Ok(DiscoveryStream::new(tx, responses))
            }
        }
    }

    fn close(self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockConnector {
    pub connection: MockConnection,
    pub fail: bool,
}

impl MockConnector {
    pub fn new(connection: MockConnection) -> Self {
        Self {
            connection,
            fail: false,
        }
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn dial(&self, _config: &ClientConfig) -> anyhow::Result<MockConnection> {
        if self.fail {
            return Err(anyhow!("invalid target"));
        }
        Ok(self.connection.clone())
    }
}

/// Records every callback; optionally rejects the n-th resource.
#[derive(Default)]
pub struct RecordingHandler {
    pub resources: Mutex<Vec<Resource>>,
    pub lost_contact: AtomicUsize,
    pub cleanups: AtomicUsize,
    pub reject_index: Option<usize>,
}

impl RecordingHandler {
    pub fn resources(&self) -> Vec<Resource> {
        self.resources.lock().unwrap().clone()
    }

    pub fn lost_contact(&self) -> usize {
        self.lost_contact.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DiscoveryHandler for RecordingHandler {
    async fn on_resource(
        &self,
        _lifetime: &CancellationToken,
        resource: Resource,
    ) -> anyhow::Result<()> {
        let mut resources = self.resources.lock().unwrap();
        let index = resources.len();
        resources.push(resource);
        if self.reject_index == Some(index) {
            return Err(anyhow!("rejected resource {index}"));
        }
        Ok(())
    }

    async fn on_lost_contact(&self, _lifetime: &CancellationToken) {
        self.lost_contact.fetch_add(1, Ordering::SeqCst);
    }

    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingBackoff {
    pub calls: Mutex<Vec<u32>>,
}

impl RecordingBackoff {
    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }
}

impl BackoffStrategy for RecordingBackoff {
    fn backoff(&self, retries: u32) -> Duration {
        self.calls.lock().unwrap().push(retries);
        Duration::from_millis(10)
    }
}

#[derive(Default)]
pub struct CountingReporter {
    pub started: AtomicUsize,
}

impl CountingReporter {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LoadReporter<MockConnection> for CountingReporter {
    async fn report_to(&self, lifetime: CancellationToken, _connection: MockConnection) {
        self.started.fetch_add(1, Ordering::SeqCst);
        lifetime.cancelled().await;
    }
}

pub fn cluster_response(name: &str) -> Result<DiscoveryResponse, Status> {
    let cluster = Cluster {
        name: name.to_string(),
        ..Default::default()
    };
    Ok(response(CLUSTER_TYPE_URL, vec![to_any(CLUSTER_TYPE_URL, &cluster)]))
}

pub fn endpoints_response(name: &str) -> Result<DiscoveryResponse, Status> {
    let assignment = ClusterLoadAssignment {
        cluster_name: name.to_string(),
        ..Default::default()
    };
    Ok(response(
        CLUSTER_LOAD_ASSIGNMENT_TYPE_URL,
        vec![to_any(CLUSTER_LOAD_ASSIGNMENT_TYPE_URL, &assignment)],
    ))
}

pub fn response(type_url: &str, resources: Vec<Any>) -> DiscoveryResponse {
    DiscoveryResponse {
        type_url: type_url.to_string(),
        resources,
        ..Default::default()
    }
}

/// Poll `done` until it holds, panicking after ten (virtual) seconds.
pub async fn wait_until(what: &str, done: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
