//! Background eviction of expired rate limit entries.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::limiter::RateLimiter;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Shortest accepted time between sweeps; shorter intervals are raised to it.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically removes entries whose window has closed.
///
/// Stale entries are also replaced lazily on access, so sweeping only bounds
/// memory; a failed sweep is logged and retried on the next tick.
pub struct Sweeper;

impl Sweeper {
    /// Spawn the sweep loop on the current runtime.
    ///
    /// The first sweep runs one `interval` after spawning. Intervals below
    /// [`MIN_SWEEP_INTERVAL`] are raised to it.
    pub fn spawn(limiter: Arc<RateLimiter>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let interval = if interval < MIN_SWEEP_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "Sweep interval too short, using minimum"
            );
            MIN_SWEEP_INTERVAL
        } else {
            interval
        };

        info!(interval_secs = interval.as_secs(), "Starting expired entry sweeper");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("Sweeper received shutdown");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = limiter.sweep_expired().await {
                            warn!(error = %e, "Failed to sweep expired rate limit entries");
                        }
                    }
                }
            }
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Ownership handle for a running sweeper.
///
/// Dropping the handle stops the sweeper without waiting for it.
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its loop to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Sweeper task ended abnormally");
            }
        }
        info!("Expired entry sweeper stopped");
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
