//! Background liveness sweeps on a fixed interval.

use crate::fleet::ports::FleetRepository;
use mockable::Clock;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::registry::FleetRegistryService;

/// Runs [`FleetRegistryService::liveness_sweep`] every `interval` until
/// cancelled.
///
/// Sweeps only touch registry state; established bastion sessions are not
/// affected by a node going offline.
pub struct LivenessMonitor<R, C>
where
    R: FleetRepository,
    C: Clock + Send + Sync,
{
    registry: FleetRegistryService<R, C>,
    interval: Duration,
}

impl<R, C> LivenessMonitor<R, C>
where
    R: FleetRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a monitor sweeping every `interval`.
    #[must_use]
    pub const fn new(registry: FleetRegistryService<R, C>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Sweeps until `shutdown` is cancelled.
    ///
    /// A failed sweep is logged and retried on the next tick.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nodes get a full interval to
        // report after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("liveness monitor stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.registry.liveness_sweep().await {
                        warn!(%err, "liveness sweep failed");
                    }
                }
            }
        }
    }

    /// Spawns [`LivenessMonitor::run`] on the current runtime.
    #[must_use]
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
