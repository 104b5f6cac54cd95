//! The long-lived discovery client.
//!
//! [`AdsClient::run`] dials the management server once and keeps an ADS
//! stream open on that connection for as long as the client lives, retrying
//! with backoff. [`AdsClient::close`] may be called from any task at any time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::{BackoffStrategy, ExponentialBackoff};
use crate::config::ClientConfig;
use crate::connection::{AdsConnection, ConnectionSlot, Connector};
use crate::load_report::{LoadReportTrigger, LoadReporter};
use crate::metrics::ClientMetrics;
use crate::resource::Resource;
use crate::retry::retry_with_backoff;
use crate::session::Session;

/// Callbacks the owner of an [`AdsClient`] supplies.
#[async_trait::async_trait]
pub trait DiscoveryHandler: Send + Sync + 'static {
    /// Accept a validated resource. An error ends the current stream.
    async fn on_resource(
        &self,
        lifetime: &CancellationToken,
        resource: Resource,
    ) -> anyhow::Result<()>;

    /// Called whenever a stream attempt ends, even after a successful one
    /// and even when the client is being closed.
    async fn on_lost_contact(&self, lifetime: &CancellationToken);

    /// Called exactly once, at the end of [`AdsClient::close`].
    fn cleanup(&self);
}

/// Aggregated discovery client over connections produced by `C`.
pub struct AdsClient<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for AdsClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<C: Connector> {
    lifetime: CancellationToken,
    closed: AtomicBool,
    connector: C,
    connection: ConnectionSlot<C::Connection>,
    config: ClientConfig,
    backoff: Arc<dyn BackoffStrategy>,
    handler: Arc<dyn DiscoveryHandler>,
    load_report: LoadReportTrigger<C::Connection>,
    metrics: Arc<ClientMetrics>,
}

impl<C: Connector> AdsClient<C> {
    pub fn new(config: ClientConfig, connector: C, handler: Arc<dyn DiscoveryHandler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                lifetime: CancellationToken::new(),
                closed: AtomicBool::new(false),
                connector,
                connection: ConnectionSlot::default(),
                config,
                backoff: Arc::new(ExponentialBackoff::default()),
                handler,
                load_report: LoadReportTrigger::new(None),
                metrics: Arc::new(ClientMetrics::new()),
            }),
        }
    }

    /// Replace the default exponential backoff. Must be called before the
    /// client is cloned.
    #[must_use]
    pub fn with_backoff(self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.map_inner(|inner| inner.backoff = backoff)
    }

    /// Start `reporter` on the shared connection after the first accepted
    /// resource. Must be called before the client is cloned.
    #[must_use]
    pub fn with_load_reporter(self, reporter: Arc<dyn LoadReporter<C::Connection>>) -> Self {
        self.map_inner(|inner| inner.load_report = LoadReportTrigger::new(Some(reporter)))
    }

    /// Record into `metrics` instead of a private registry. Must be called
    /// before the client is cloned.
    #[must_use]
    pub fn with_metrics(self, metrics: Arc<ClientMetrics>) -> Self {
        self.map_inner(|inner| inner.metrics = metrics)
    }

    fn map_inner(mut self, f: impl FnOnce(&mut Inner<C>)) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => f(inner),
            None => warn!("client already shared, ignoring configuration change"),
        }
        self
    }

    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.inner.metrics
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The lifetime token; cancelled by [`AdsClient::close`].
    pub fn lifetime(&self) -> &CancellationToken {
        &self.inner.lifetime
    }

    /// Dial the management server and keep the ADS stream alive until
    /// [`AdsClient::close`] is called.
    ///
    /// Returns an error only if dialing fails, which indicates local
    /// misconfiguration.
    pub async fn run(&self) -> anyhow::Result<()> {
        let inner = &*self.inner;
        let connection = inner.connector.dial(&inner.config)?;
        if !inner
            .connection
            .install_unless_cancelled(connection.clone(), &inner.lifetime)
        {
            debug!("client closed while dialing, discarding connection");
            return Ok(());
        }
        info!(
            server = %inner.config.server_uri,
            cluster_discovery = inner.config.cluster_discovery,
            "dialed management server"
        );

        let session = Session {
            connection: &connection,
            lifetime: &inner.lifetime,
            node: &inner.config.node,
            cluster_discovery: inner.config.cluster_discovery,
            handler: inner.handler.as_ref(),
            load_report: &inner.load_report,
            metrics: &inner.metrics,
        };

        // Set when the previous attempt got no response, so this one backed off.
        let silent = AtomicBool::new(false);
        retry_with_backoff("ADS stream", &inner.lifetime, inner.backoff.as_ref(), || {
            if silent.load(Ordering::Relaxed) {
                inner.metrics.backoffs.inc();
            }
            inner.metrics.stream_attempts.inc();
            let session = &session;
            let silent = &silent;
            async move {
                let outcome = session.run().await;
                silent.store(outcome.responses == 0, Ordering::Relaxed);
                inner.metrics.stream_healthy.set(0);
                inner.metrics.record_end(outcome.end);
                debug!(
                    responses = outcome.responses,
                    reason = outcome.end.as_str(),
                    "ADS stream ended"
                );
                inner.metrics.lost_contact.inc();
                inner.handler.on_lost_contact(&inner.lifetime).await;
                outcome.responses
            }
        })
        .await;

        debug!("ADS client stopped");
        Ok(())
    }

    /// Stop the client: cancel the lifetime, close the connection if one was
    /// installed, then run the owner's cleanup. Later calls do nothing.
    pub fn close(&self) {
        let inner = &*self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.lifetime.cancel();
        if let Some(connection) = inner.connection.take() {
            connection.close();
        }
        inner.handler.cleanup();
        info!("ADS client closed");
    }
}
