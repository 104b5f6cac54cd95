//! Generated wire types for the v2 aggregated discovery service.
//!
//! Only the fields the discovery client reads or writes are declared in
//! `proto/`; the decoder skips anything else a control plane sends.

// Generated protobuf code, suppress lints that don't apply.
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::too_many_lines,
    clippy::wildcard_imports,
    clippy::derive_partial_eq_without_eq,
    clippy::enum_variant_names,
    clippy::struct_field_names,
    clippy::default_trait_access,
    clippy::use_self,
    clippy::too_long_first_doc_paragraph
)]

pub mod envoy {
    pub mod api {
        pub mod v2 {
            tonic::include_proto!("envoy.api.v2");

            pub mod core {
                tonic::include_proto!("envoy.api.v2.core");
            }

            pub mod endpoint {
                tonic::include_proto!("envoy.api.v2.endpoint");
            }
        }
    }

    pub mod r#type {
        tonic::include_proto!("envoy.r#type");
    }

    pub mod service {
        pub mod discovery {
            pub mod v2 {
                tonic::include_proto!("envoy.service.discovery.v2");
            }
        }
    }
}

pub use envoy::api::v2 as api;
pub use envoy::service::discovery::v2::aggregated_discovery_service_client::AggregatedDiscoveryServiceClient;

/// Type URL of a cluster (CDS) resource.
pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.api.v2.Cluster";

/// Type URL of an endpoint-assignment (EDS) resource.
pub const CLUSTER_LOAD_ASSIGNMENT_TYPE_URL: &str =
    "type.googleapis.com/envoy.api.v2.ClusterLoadAssignment";

impl api::Cluster {
    /// Service name to request endpoints for: the EDS override, else the cluster name.
    pub fn eds_service_name(&self) -> &str {
        match &self.eds_cluster_config {
            Some(eds) if !eds.service_name.is_empty() => &eds.service_name,
            _ => &self.name,
        }
    }
}

impl api::ClusterLoadAssignment {
    /// Total number of endpoints across all localities.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.iter().map(|l| l.lb_endpoints.len()).sum()
    }
}

impl api::core::SocketAddress {
    /// Numeric port, if the address carries one.
    pub fn port(&self) -> Option<u32> {
        match self.port_specifier {
            Some(api::core::socket_address::PortSpecifier::PortValue(port)) => Some(port),
            _ => None,
        }
    }
}
