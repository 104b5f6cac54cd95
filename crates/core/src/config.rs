//! Resolved settings the discovery client runs with.

use std::collections::BTreeMap;

use prost_types::value::Kind;
use prost_types::{Struct, Value};
use xds_proto::api::core::Node;

/// Node metadata key carrying the dial target the client balances for.
pub const GRPC_HOSTNAME_KEY: &str = "com.googleapis.trafficdirector.grpc_hostname";

/// Everything needed to reach the management server and identify ourselves.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Management server URI, e.g. `https://trafficdirector.googleapis.com:443`.
    pub server_uri: String,
    /// TLS material; `None` means plaintext.
    pub credentials: Option<TlsCredentials>,
    pub node: Node,
    /// Request clusters before endpoints on every stream.
    pub cluster_discovery: bool,
}

impl ClientConfig {
    /// Config with a default node whose metadata names `target_hostname`.
    pub fn new(server_uri: impl Into<String>, target_hostname: &str) -> Self {
        Self {
            server_uri: server_uri.into(),
            credentials: None,
            node: default_node(target_hostname),
            cluster_discovery: false,
        }
    }
}

/// Client TLS material as PEM blobs.
#[derive(Clone, Default)]
pub struct TlsCredentials {
    pub ca_certificate_pem: Option<Vec<u8>>,
    /// Client certificate chain and private key for mutual TLS.
    pub identity_pem: Option<(Vec<u8>, Vec<u8>)>,
    /// Name to verify the server certificate against instead of the URI host.
    pub server_name_override: Option<String>,
}

impl std::fmt::Debug for TlsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsCredentials")
            .field("ca_certificate", &self.ca_certificate_pem.is_some())
            .field("identity", &self.identity_pem.is_some())
            .field("server_name_override", &self.server_name_override)
            .finish()
    }
}

pub fn default_node(target_hostname: &str) -> Node {
    let fields = BTreeMap::from([(
        GRPC_HOSTNAME_KEY.to_string(),
        Value {
            kind: Some(Kind::StringValue(target_hostname.to_string())),
        },
    )]);
    Node {
        metadata: Some(Struct { fields }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_node_carries_hostname() {
        let config = ClientConfig::new("http://xds.local:18000", "svc.example.com");
        let metadata = config.node.metadata.unwrap();
        assert_eq!(
            metadata.fields[GRPC_HOSTNAME_KEY].kind,
            Some(Kind::StringValue("svc.example.com".into()))
        );
        assert!(!config.cluster_discovery);
        assert!(config.credentials.is_none());
    }

    #[test]
    fn credentials_debug_hides_key_material() {
        let creds = TlsCredentials {
            identity_pem: Some((b"cert".to_vec(), b"secret-key".to_vec())),
            ..Default::default()
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("identity: true"));
    }
}
