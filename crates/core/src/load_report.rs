//! One-shot start of load reporting on the discovery connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Streams load reports to the management server over a shared connection.
///
/// Implementations must return once `lifetime` is cancelled.
#[async_trait::async_trait]
pub trait LoadReporter<C>: Send + Sync + 'static {
    async fn report_to(&self, lifetime: CancellationToken, connection: C);
}

/// Latch that starts the reporter the first time it is fired and never again.
pub struct LoadReportTrigger<C> {
    reporter: Option<Arc<dyn LoadReporter<C>>>,
    fired: AtomicBool,
}

impl<C: Clone + Send + 'static> LoadReportTrigger<C> {
    pub fn new(reporter: Option<Arc<dyn LoadReporter<C>>>) -> Self {
        Self {
            reporter,
            fired: AtomicBool::new(false),
        }
    }

    /// Spawn the reporter on the first call. Later calls are no-ops.
    ///
    /// Returns `true` only for the call that fired the latch, whether or not
    /// a reporter is configured.
    pub fn fire(&self, connection: &C, lifetime: &CancellationToken) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if let Some(reporter) = &self.reporter {
            info!("starting load reporting");
            let reporter = reporter.clone();
            let connection = connection.clone();
            let lifetime = lifetime.clone();
            tokio::spawn(async move { reporter.report_to(lifetime, connection).await });
        }
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}
