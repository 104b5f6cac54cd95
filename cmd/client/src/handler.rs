use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use xds_core::{DiscoveryHandler, Resource};
use xds_proto::api::core::HealthStatus;

/// Contact state shared with the debug endpoints.
#[derive(Default)]
pub struct ClientState {
    in_contact: AtomicBool,
    resources_seen: AtomicU64,
}

impl ClientState {
    pub fn is_in_contact(&self) -> bool {
        self.in_contact.load(Ordering::Acquire)
    }

    pub fn resources_seen(&self) -> u64 {
        self.resources_seen.load(Ordering::Relaxed)
    }
}

/// Logs every resource the management server pushes.
pub struct LoggingHandler {
    state: std::sync::Arc<ClientState>,
}

impl LoggingHandler {
    pub fn new(state: std::sync::Arc<ClientState>) -> Self {
        Self { state }
    }
}

#[async_trait::async_trait]
impl DiscoveryHandler for LoggingHandler {
    async fn on_resource(
        &self,
        _lifetime: &CancellationToken,
        resource: Resource,
    ) -> anyhow::Result<()> {
        self.state.in_contact.store(true, Ordering::Release);
        self.state.resources_seen.fetch_add(1, Ordering::Relaxed);

        match &resource {
            Resource::Cluster(cluster) => {
                info!(
                    cluster = %cluster.name,
                    eds_service = %cluster.eds_service_name(),
                    lb_policy = cluster.lb_policy().as_str_name(),
                    "cluster update"
                );
            }
            Resource::Endpoints(assignment) => {
                let healthy = assignment
                    .endpoints
                    .iter()
                    .flat_map(|l| &l.lb_endpoints)
                    .filter(|e| {
                        matches!(
                            e.health_status(),
                            HealthStatus::Healthy | HealthStatus::Unknown
                        )
                    })
                    .count();
                info!(
                    cluster = %assignment.cluster_name,
                    localities = assignment.endpoints.len(),
                    endpoints = assignment.endpoint_count(),
                    healthy,
                    "endpoint update"
                );
            }
            Resource::Unknown { type_url } => {
                warn!(%type_url, "ignoring resource of unknown type");
            }
        }
        Ok(())
    }

    async fn on_lost_contact(&self, _lifetime: &CancellationToken) {
        if self.state.in_contact.swap(false, Ordering::AcqRel) {
            warn!("lost contact with management server, keeping last known state");
        }
    }

    fn cleanup(&self) {
        self.state.in_contact.store(false, Ordering::Release);
        info!(
            resources_seen = self.state.resources_seen(),
            "discovery handler released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use xds_proto::api::Cluster;

    #[tokio::test]
    async fn tracks_contact() {
        let state = Arc::new(ClientState::default());
        let handler = LoggingHandler::new(state.clone());
        let lifetime = CancellationToken::new();

        assert!(!state.is_in_contact());
        handler
            .on_resource(&lifetime, Resource::Cluster(Cluster::default()))
            .await
            .unwrap();
        assert!(state.is_in_contact());
        assert_eq!(state.resources_seen(), 1);

        handler.on_lost_contact(&lifetime).await;
        assert!(!state.is_in_contact());
    }
}
