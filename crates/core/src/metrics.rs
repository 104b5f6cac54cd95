use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue, LabelValueEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::resource::Resource;
use crate::session::StreamEnd;

// ── Label types ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResourceLabels {
    pub kind: ResourceKind,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ResourceKind {
    Cluster,
    Endpoints,
    Unknown,
}

impl ResourceKind {
    pub fn of(resource: &Resource) -> Self {
        match resource {
            Resource::Cluster(_) => Self::Cluster,
            Resource::Endpoints(_) => Self::Endpoints,
            Resource::Unknown { .. } => Self::Unknown,
        }
    }
}

impl EncodeLabelValue for ResourceKind {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
        let s = match self {
            ResourceKind::Cluster => "cds",
            ResourceKind::Endpoints => "eds",
            ResourceKind::Unknown => "unknown",
        };
        EncodeLabelValue::encode(&s, encoder)
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StreamEndLabels {
    pub reason: StreamEnd,
}

impl EncodeLabelValue for StreamEnd {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
        EncodeLabelValue::encode(&self.as_str(), encoder)
    }
}

// ── Metrics ───────────────────────────────────────────────────────────────────

/// Counters describing the health of the discovery stream.
pub struct ClientMetrics {
    pub stream_attempts: Counter,
    pub responses: Family<ResourceLabels, Counter>,
    pub stream_ends: Family<StreamEndLabels, Counter>,
    pub lost_contact: Counter,
    pub backoffs: Counter,
    /// 1 while a stream has delivered at least one response, else 0.
    pub stream_healthy: Gauge,

    pub registry: Registry,
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let stream_attempts = Counter::default();
        let responses = Family::<ResourceLabels, Counter>::default();
        let stream_ends = Family::<StreamEndLabels, Counter>::default();
        let lost_contact = Counter::default();
        let backoffs = Counter::default();
        let stream_healthy = Gauge::default();

        {
            let xds = registry.sub_registry_with_prefix("xds_client");
            xds.register(
                "stream_attempts",
                "ADS stream attempts started",
                stream_attempts.clone(),
            );
            xds.register(
                "responses",
                "Accepted discovery resources by kind",
                responses.clone(),
            );
            xds.register(
                "stream_ends",
                "ADS stream attempts ended, by reason",
                stream_ends.clone(),
            );
            xds.register(
                "lost_contact",
                "Lost-contact notifications delivered to the owner",
                lost_contact.clone(),
            );
            xds.register(
                "backoffs",
                "Backoff waits before a stream attempt",
                backoffs.clone(),
            );
            xds.register(
                "stream_healthy",
                "Whether the current ADS stream has delivered a response",
                stream_healthy.clone(),
            );
        }

        Self {
            stream_attempts,
            responses,
            stream_ends,
            lost_contact,
            backoffs,
            stream_healthy,
            registry,
        }
    }

    pub fn record_resource(&self, resource: &Resource) {
        self.responses
            .get_or_create(&ResourceLabels {
                kind: ResourceKind::of(resource),
            })
            .inc();
    }

    pub fn record_end(&self, reason: StreamEnd) {
        self.stream_ends
            .get_or_create(&StreamEndLabels { reason })
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn encodes_with_prefix_and_labels() {
        let metrics = ClientMetrics::new();
        metrics.stream_attempts.inc();
        metrics.record_end(StreamEnd::OutOfOrder);
        metrics.record_resource(&Resource::Unknown {
            type_url: "x".into(),
        });

        let mut buf = String::new();
        encode(&mut buf, &metrics.registry).unwrap();
        assert!(buf.contains("xds_client_stream_attempts_total 1"));
        assert!(buf.contains("reason=\"out_of_order\""));
        assert!(buf.contains("kind=\"unknown\""));
    }
}
