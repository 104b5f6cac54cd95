//! Typed view of the resources carried in discovery responses.

use prost::Message as _;
use prost_types::Any;
use xds_proto::api::{Cluster, ClusterLoadAssignment};
use xds_proto::{CLUSTER_LOAD_ASSIGNMENT_TYPE_URL, CLUSTER_TYPE_URL};

/// A decoded resource envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Cluster(Cluster),
    Endpoints(ClusterLoadAssignment),
    /// A type this client never asks for.
    Unknown { type_url: String },
}

impl Resource {
    /// Decode `any` according to its own type URL.
    pub fn decode(any: &Any) -> Result<Self, prost::DecodeError> {
        match any.type_url.as_str() {
            CLUSTER_TYPE_URL => Ok(Self::Cluster(Cluster::decode(any.value.as_slice())?)),
            CLUSTER_LOAD_ASSIGNMENT_TYPE_URL => Ok(Self::Endpoints(
                ClusterLoadAssignment::decode(any.value.as_slice())?,
            )),
            other => Ok(Self::Unknown {
                type_url: other.to_string(),
            }),
        }
    }

    pub fn type_url(&self) -> &str {
        match self {
            Self::Cluster(_) => CLUSTER_TYPE_URL,
            Self::Endpoints(_) => CLUSTER_LOAD_ASSIGNMENT_TYPE_URL,
            Self::Unknown { type_url } => type_url,
        }
    }

    /// Name of the cluster the resource describes.
    pub fn name(&self) -> &str {
        match self {
            Self::Cluster(cluster) => &cluster.name,
            Self::Endpoints(assignment) => &assignment.cluster_name,
            Self::Unknown { .. } => "",
        }
    }
}

/// Wrap a message into an envelope with the given type URL.
pub fn to_any(type_url: &str, message: &impl prost::Message) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: message.encode_to_vec(),
    }
}
