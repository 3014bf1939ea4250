//! Periodic removal of blobs that no record references.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use coffer_attachments::AttachmentService;

/// Runs [`AttachmentService::sweep_orphans`] on a fixed period until shut down.
pub struct OrphanSweeper {
    service: Arc<AttachmentService>,
    period: Duration,
    grace: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

impl OrphanSweeper {
    /// Create a sweeper and the sender that stops it.
    pub fn new(
        service: Arc<AttachmentService>,
        period: Duration,
        grace: Duration,
    ) -> (Self, mpsc::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let sweeper = Self {
            service,
            period,
            grace,
            shutdown_rx,
        };
        (sweeper, shutdown_tx)
    }

    /// Sweep every period until a shutdown message arrives or the sender is
    /// dropped. The first sweep runs one full period after start.
    pub async fn run(mut self) {
        info!(
            period_secs = self.period.as_secs(),
            grace_secs = self.grace.as_secs(),
            "orphan sweeper starting"
        );

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("orphan sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.service.sweep_orphans(self.grace).await {
                        error!(error = %e, "orphan sweep failed");
                    }
                }
            }
        }

        info!("orphan sweeper stopped");
    }
}
