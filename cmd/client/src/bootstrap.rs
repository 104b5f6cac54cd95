//! JSON bootstrap file naming the management server and our node identity.
//!
//! ```json
//! {
//!   "xds_servers": [{
//!     "server_uri": "https://trafficdirector.googleapis.com:443",
//!     "channel_creds": [{ "type": "tls", "config": { "ca_certificate_file": "/etc/xds/ca.pem" } }]
//!   }],
//!   "node": { "id": "projects/1/networks/default/nodes/abc", "metadata": { "TRAFFICDIRECTOR_NETWORK_NAME": "default" } }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context as _, bail};
use prost_types::value::Kind;
use prost_types::{ListValue, Struct, Value};
use serde::Deserialize;
use xds_core::config::{ClientConfig, GRPC_HOSTNAME_KEY, TlsCredentials};
use xds_proto::api::core::{Locality, Node};

#[derive(Debug, Deserialize)]
pub struct Bootstrap {
    #[serde(default)]
    pub xds_servers: Vec<ServerConfig>,
    #[serde(default)]
    pub node: Option<NodeConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub server_uri: String,
    #[serde(default)]
    pub channel_creds: Vec<ChannelCreds>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelCreds {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Option<TlsFiles>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TlsFiles {
    pub ca_certificate_file: Option<String>,
    pub certificate_file: Option<String>,
    pub private_key_file: Option<String>,
    pub server_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub locality: Option<LocalityConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LocalityConfig {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub sub_zone: String,
}

impl Bootstrap {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bootstrap file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid bootstrap file {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Resolve into a client config. The first server wins; the first
    /// credential type we understand is used.
    pub fn into_client_config(
        self,
        target_hostname: &str,
        default_node_id: &str,
    ) -> anyhow::Result<ClientConfig> {
        let Some(server) = self.xds_servers.into_iter().next() else {
            bail!("bootstrap lists no xds_servers");
        };

        let mut config = ClientConfig::new(server.server_uri, target_hostname);
        config.credentials = credentials(&server.channel_creds)?;

        let node = self.node.unwrap_or_default();
        let mut fields: BTreeMap<String, Value> = node
            .metadata
            .into_iter()
            .map(|(key, value)| (key, json_to_value(value)))
            .collect();
        fields.insert(
            GRPC_HOSTNAME_KEY.to_string(),
            Value {
                kind: Some(Kind::StringValue(target_hostname.to_string())),
            },
        );
        config.node = Node {
            id: if node.id.is_empty() {
                default_node_id.to_string()
            } else {
                node.id
            },
            cluster: node.cluster,
            metadata: Some(Struct { fields }),
            locality: node.locality.map(|l| Locality {
                region: l.region,
                zone: l.zone,
                sub_zone: l.sub_zone,
            }),
            build_version: concat!("xds-client/", env!("CARGO_PKG_VERSION")).to_string(),
        };
        Ok(config)
    }
}

fn credentials(creds: &[ChannelCreds]) -> anyhow::Result<Option<TlsCredentials>> {
    for cred in creds {
        match cred.kind.as_str() {
            "insecure" => return Ok(None),
            "tls" => {
                let files = cred.config.as_ref();
                let read = |path: &Option<String>| -> anyhow::Result<Option<Vec<u8>>> {
                    path.as_deref()
                        .map(|p| std::fs::read(p).with_context(|| format!("failed to read {p}")))
                        .transpose()
                };
                let Some(files) = files else {
                    return Ok(Some(TlsCredentials::default()));
                };
                let identity = match (
                    read(&files.certificate_file)?,
                    read(&files.private_key_file)?,
                ) {
                    (Some(cert), Some(key)) => Some((cert, key)),
                    (None, None) => None,
                    _ => bail!("tls credentials need both certificate_file and private_key_file"),
                };
                return Ok(Some(TlsCredentials {
                    ca_certificate_pem: read(&files.ca_certificate_file)?,
                    identity_pem: identity,
                    server_name_override: files.server_name.clone(),
                }));
            }
            other => tracing::debug!(kind = other, "skipping unsupported channel credentials"),
        }
    }
    Ok(None)
}

fn json_to_value(json: serde_json::Value) -> Value {
    let kind = match json {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(b),
        serde_json::Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
        serde_json::Value::String(s) => Kind::StringValue(s),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_value).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(Struct {
            fields: map
                .into_iter()
                .map(|(key, value)| (key, json_to_value(value)))
                .collect(),
        }),
    };
    Value { kind: Some(kind) }
}
