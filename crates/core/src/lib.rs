//! Aggregated discovery (ADS) client: keeps cluster and endpoint resources
//! flowing from a management server into a load balancer, reconnecting with
//! backoff and starting load reporting once data arrives.

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod load_report;
pub mod metrics;
pub mod resource;
pub mod retry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{AdsClient, DiscoveryHandler};
pub use config::{ClientConfig, TlsCredentials};
pub use connection::{AdsConnection, Connector, GrpcConnection, GrpcConnector};
pub use resource::Resource;
