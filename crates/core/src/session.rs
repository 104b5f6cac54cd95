//! A single attempt of the aggregated discovery stream.
//!
//! An attempt sends the discovery requests, then dispatches responses until
//! something goes wrong. Every failure ends the attempt the same way; the
//! retry loop only learns how many responses arrived.

use prost_types::value::Kind;
use prost_types::{Struct, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xds_proto::api::DiscoveryRequest;
use xds_proto::api::core::Node;
use xds_proto::{CLUSTER_LOAD_ASSIGNMENT_TYPE_URL, CLUSTER_TYPE_URL};

use crate::client::DiscoveryHandler;
use crate::connection::{AdsConnection, DiscoveryStream};
use crate::load_report::LoadReportTrigger;
use crate::metrics::ClientMetrics;
use crate::resource::Resource;

/// Node metadata key telling the server whether clusters are requested too.
pub const ENDPOINTS_REQUIRED_KEY: &str = "endpoints_required";

/// Why a stream attempt ended.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum StreamEnd {
    OpenFailed,
    SendFailed,
    RecvFailed,
    /// A response carried no resources.
    EmptyResponse,
    /// Cluster response while cluster discovery is off.
    UnexpectedCluster,
    DecodeFailed,
    /// Endpoints arrived before the cluster they depend on.
    OutOfOrder,
    UnknownResource,
    HandlerFailed,
    /// The client is shutting down.
    Cancelled,
}

impl StreamEnd {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamEnd::OpenFailed => "open_failed",
            StreamEnd::SendFailed => "send_failed",
            StreamEnd::RecvFailed => "recv_failed",
            StreamEnd::EmptyResponse => "empty_response",
            StreamEnd::UnexpectedCluster => "unexpected_cluster",
            StreamEnd::DecodeFailed => "decode_failed",
            StreamEnd::OutOfOrder => "out_of_order",
            StreamEnd::UnknownResource => "unknown_resource",
            StreamEnd::HandlerFailed => "handler_failed",
            StreamEnd::Cancelled => "cancelled",
        }
    }
}

/// Result of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOutcome {
    /// Responses received, including ones that were then rejected.
    pub responses: u64,
    pub end: StreamEnd,
}

/// Cluster request: the node identity as configured.
pub fn cluster_request(node: &Node) -> DiscoveryRequest {
    DiscoveryRequest {
        node: Some(node.clone()),
        type_url: CLUSTER_TYPE_URL.to_string(),
        ..Default::default()
    }
}

/// Endpoint request: the node identity plus whether clusters are requested.
pub fn endpoint_request(node: &Node, cluster_discovery: bool) -> DiscoveryRequest {
    let mut node = node.clone();
    node.metadata
        .get_or_insert_with(Struct::default)
        .fields
        .insert(
            ENDPOINTS_REQUIRED_KEY.to_string(),
            Value {
                kind: Some(Kind::BoolValue(cluster_discovery)),
            },
        );
    DiscoveryRequest {
        node: Some(node),
        type_url: CLUSTER_LOAD_ASSIGNMENT_TYPE_URL.to_string(),
        ..Default::default()
    }
}

/// Borrowed client state one attempt runs against.
pub(crate) struct Session<'a, C> {
    pub connection: &'a C,
    pub lifetime: &'a CancellationToken,
    pub node: &'a Node,
    pub cluster_discovery: bool,
    pub handler: &'a dyn DiscoveryHandler,
    pub load_report: &'a LoadReportTrigger<C>,
    pub metrics: &'a ClientMetrics,
}

impl<C: AdsConnection> Session<'_, C> {
    /// Run the attempt to completion. The stream is released on return.
    pub async fn run(&self) -> AttemptOutcome {
        let stream_token = self.lifetime.child_token();
        let _release = stream_token.clone().drop_guard();
        let mut responses = 0;
        let end = self.drive(&stream_token, &mut responses).await;
        AttemptOutcome { responses, end }
    }

    async fn drive(&self, token: &CancellationToken, responses: &mut u64) -> StreamEnd {
        let opened = tokio::select! {
            () = token.cancelled() => return StreamEnd::Cancelled,
            opened = self.connection.open_stream() => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(error) => {
                info!(error = %format!("{error:#}"), "failed to open ADS stream");
                return StreamEnd::OpenFailed;
            }
        };

        if self.cluster_discovery
            && let Err(error) = stream.send(cluster_request(self.node)).await
        {
            info!(%error, "ADS stream broken while sending the CDS request");
            return StreamEnd::SendFailed;
        }
        if let Err(error) = stream
            .send(endpoint_request(self.node, self.cluster_discovery))
            .await
        {
            info!(%error, "ADS stream broken while sending the EDS request");
            return StreamEnd::SendFailed;
        }

        self.receive_loop(token, &mut stream, responses).await
    }

    async fn receive_loop(
        &self,
        token: &CancellationToken,
        stream: &mut DiscoveryStream,
        responses: &mut u64,
    ) -> StreamEnd {
        let mut expect_cluster = self.cluster_discovery;

        loop {
            let received = tokio::select! {
                () = token.cancelled() => return StreamEnd::Cancelled,
                received = stream.recv() => received,
            };
            let response = match received {
                Ok(response) => response,
                Err(error) => {
                    info!(error = %format!("{error:#}"), "ADS stream broken while receiving");
                    return StreamEnd::RecvFailed;
                }
            };
            *responses += 1;
            if *responses == 1 {
                self.metrics.stream_healthy.set(1);
            }

            // Only the first envelope is consumed; any others are ignored.
            let Some(envelope) = response.resources.first() else {
                warn!(type_url = %response.type_url, "ADS response contains no resources");
                return StreamEnd::EmptyResponse;
            };
            if response.type_url == CLUSTER_TYPE_URL && !self.cluster_discovery {
                warn!("received CDS response while cluster discovery is disabled");
                return StreamEnd::UnexpectedCluster;
            }
            let resource = match Resource::decode(envelope) {
                Ok(resource) => resource,
                Err(error) => {
                    warn!(%error, type_url = %envelope.type_url, "failed to decode resource");
                    return StreamEnd::DecodeFailed;
                }
            };

            match &resource {
                Resource::Cluster(_) => expect_cluster = false,
                Resource::Endpoints(_) if expect_cluster => {
                    warn!("expecting CDS response, got EDS response instead");
                    return StreamEnd::OutOfOrder;
                }
                Resource::Endpoints(_) => {}
                Resource::Unknown { type_url } => {
                    warn!(%type_url, "received resource of unknown type");
                    return StreamEnd::UnknownResource;
                }
            }

            debug!(
                type_url = resource.type_url(),
                name = resource.name(),
                version = %response.version_info,
                extra = response.resources.len() - 1,
                "dispatching resource"
            );
            self.metrics.record_resource(&resource);
            if let Err(error) = self.handler.on_resource(self.lifetime, resource).await {
                warn!(error = %format!("{error:#}"), "processing ADS resource failed");
                return StreamEnd::HandlerFailed;
            }

            // Start reporting only once discovery data is known to flow.
            self.load_report.fire(self.connection, self.lifetime);
        }
    }
}
