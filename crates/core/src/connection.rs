//! Connection management for the management-server channel.
//!
//! A connection is dialed once per client and shared by every stream attempt
//! and by the load reporter. The client keeps it in a [`ConnectionSlot`] so
//! that `close` can tear it down while a stream is in flight.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, future};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity, Uri};
use tracing::{debug, warn};
use xds_proto::AggregatedDiscoveryServiceClient;
use xds_proto::api::{DiscoveryRequest, DiscoveryResponse};

use crate::config::{ClientConfig, TlsCredentials};

/// Outbound requests queued ahead of the server reading them.
const REQUEST_CHANNEL_CAPACITY: usize = 16;

/// Produces connections to the management server.
pub trait Connector: Send + Sync + 'static {
    type Connection: AdsConnection;

    /// Create a connection without waiting for the handshake.
    ///
    /// An error here means local misconfiguration and is not retried.
    fn dial(&self, config: &ClientConfig) -> anyhow::Result<Self::Connection>;
}

/// A multiplexed connection that can carry ADS streams.
#[async_trait::async_trait]
pub trait AdsConnection: Clone + Send + Sync + 'static {
    /// Start a new aggregated discovery stream on this connection.
    async fn open_stream(&self) -> anyhow::Result<DiscoveryStream>;

    /// Release the connection. Streams still using it may fail afterwards.
    fn close(self);
}

/// One bidirectional ADS stream.
///
/// Sends only enqueue; the first [`DiscoveryStream::recv`] drives the call,
/// so requests can be written before the server answers with headers.
pub struct DiscoveryStream {
    requests: mpsc::Sender<DiscoveryRequest>,
    responses: BoxStream<'static, Result<DiscoveryResponse, Status>>,
}

impl DiscoveryStream {
    pub fn new(
        requests: mpsc::Sender<DiscoveryRequest>,
        responses: BoxStream<'static, Result<DiscoveryResponse, Status>>,
    ) -> Self {
        Self {
            requests,
            responses,
        }
    }

    pub async fn send(&mut self, request: DiscoveryRequest) -> anyhow::Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| anyhow!("stream closed before request was sent"))
    }

    /// Next response. End of stream is reported as an error.
    pub async fn recv(&mut self) -> anyhow::Result<DiscoveryResponse> {
        match self.responses.next().await {
            Some(Ok(response)) => Ok(response),
            Some(Err(status)) => Err(status.into()),
            None => Err(anyhow!("stream closed by server")),
        }
    }
}

/// Holds the client's connection between dial and close.
///
/// The lock only guards the handle itself; using the connection happens on
/// clones outside of it.
pub struct ConnectionSlot<C> {
    connection: Mutex<Option<C>>,
}

impl<C> Default for ConnectionSlot<C> {
    fn default() -> Self {
        Self {
            connection: Mutex::new(None),
        }
    }
}

impl<C: AdsConnection> ConnectionSlot<C> {
    /// Store `connection` unless `lifetime` is already cancelled, in which
    /// case it is closed on the spot. Returns whether it was stored.
    pub fn install_unless_cancelled(&self, connection: C, lifetime: &CancellationToken) -> bool {
        let mut slot = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if lifetime.is_cancelled() {
            connection.close();
            return false;
        }
        if let Some(previous) = slot.replace(connection) {
            previous.close();
        }
        true
    }

    /// Remove and return the stored connection.
    pub fn take(&self) -> Option<C> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Dials the management server over a lazily connected tonic channel.
#[derive(Debug, Clone, Default)]
pub struct GrpcConnector;

impl Connector for GrpcConnector {
    type Connection = GrpcConnection;

    fn dial(&self, config: &ClientConfig) -> anyhow::Result<GrpcConnection> {
        let endpoint = Endpoint::from_shared(config.server_uri.clone())
            .with_context(|| format!("invalid management server URI {:?}", config.server_uri))?
            .connect_timeout(Duration::from_secs(5))
            .http2_keep_alive_interval(Duration::from_secs(10))
            .keep_alive_timeout(Duration::from_secs(20))
            .keep_alive_while_idle(true);
        let (endpoint, secure) = with_credentials(endpoint, config.credentials.as_ref());
        debug!(uri = %config.server_uri, secure, "dialing management server");
        Ok(GrpcConnection {
            channel: endpoint.connect_lazy(),
            secure,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GrpcConnection {
    channel: Channel,
    secure: bool,
}

impl GrpcConnection {
    /// Whether the channel was dialed with TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

#[async_trait::async_trait]
impl AdsConnection for GrpcConnection {
    async fn open_stream(&self) -> anyhow::Result<DiscoveryStream> {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let mut client = AggregatedDiscoveryServiceClient::new(self.channel.clone());
        let call = async move {
            client
                .stream_aggregated_resources(ReceiverStream::new(rx))
                .await
                .map(tonic::Response::into_inner)
        };
        let responses = stream::once(call)
            .map(|opened| match opened {
                Ok(streaming) => streaming.left_stream(),
                Err(status) => stream::once(future::ready(Err(status))).right_stream(),
            })
            .flatten()
            .boxed();
        Ok(DiscoveryStream::new(tx, responses))
    }

    fn close(self) {
        // Dropping the last channel handle shuts down its background worker.
        drop(self.channel);
    }
}

/// Apply TLS credentials to `endpoint`, falling back to plaintext whenever
/// they are missing or cannot be bound to the server's name. The flag tells
/// whether TLS was applied.
fn with_credentials(endpoint: Endpoint, credentials: Option<&TlsCredentials>) -> (Endpoint, bool) {
    let Some(credentials) = credentials else {
        warn!("no credentials available, using insecure transport");
        return (endpoint, false);
    };
    let Some(server_name) = server_name(credentials, endpoint.uri()) else {
        warn!(uri = %endpoint.uri(), "no server name to verify credentials against, using insecure transport");
        return (endpoint, false);
    };

    let mut tls = ClientTlsConfig::new().domain_name(server_name);
    if let Some(ca) = &credentials.ca_certificate_pem {
        tls = tls.ca_certificate(Certificate::from_pem(ca));
    }
    if let Some((cert, key)) = &credentials.identity_pem {
        tls = tls.identity(Identity::from_pem(cert, key));
    }
    match endpoint.clone().tls_config(tls) {
        Ok(endpoint) => (endpoint, true),
        Err(error) => {
            warn!(%error, "failed to apply transport credentials, using insecure transport");
            (endpoint, false)
        }
    }
}

fn server_name(credentials: &TlsCredentials, uri: &Uri) -> Option<String> {
    match &credentials.server_name_override {
        Some(name) if !name.is_empty() => Some(name.clone()),
        _ => uri.host().map(str::to_string),
    }
}
