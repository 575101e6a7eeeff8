//! Background Expiry Sweeper
//!
//! Lazy expiry only reclaims keys that are read again. The sweeper is an
//! optional tokio task that periodically removes expired entries nobody asks
//! for anymore. The server runs without it unless
//! [`ServerConfig::active_expiry`](crate::server::ServerConfig) is set, and
//! stops it with the same shutdown signal it sends to sessions.
//!
//! Removal goes through [`StorageEngine::cleanup_expired`], which re-checks
//! every entry under the shard write lock. A key that a `get` has already
//! removed, or that a `set` has just replaced, is left alone.
//!
//! ## Pacing
//!
//! ```text
//!   expired ratio >= busy_ratio   ──►  period / 2   (floor: min_interval)
//!   nothing removed               ──►  period * 2   (cap:   max_interval)
//!   otherwise                     ──►  period unchanged
//! ```

use crate::storage::{StorageEngine, Sweep};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace};

/// Pacing of the expiry sweeper.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryConfig {
    /// Period of the first sweep (default: 100ms)
    pub base_interval: Duration,

    /// Shortest period when many keys are expiring (default: 10ms)
    pub min_interval: Duration,

    /// Longest period when nothing is expiring (default: 1s)
    pub max_interval: Duration,

    /// Expired fraction of scanned entries at which sweeps speed up
    pub busy_ratio: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            busy_ratio: 0.25,
        }
    }
}

impl ExpiryConfig {
    /// Period to use after a sweep that ran with `current`.
    pub fn next_interval(&self, current: Duration, sweep: Sweep) -> Duration {
        if sweep.removed == 0 {
            (current * 2).min(self.max_interval)
        } else if sweep.expired_ratio() >= self.busy_ratio {
            (current / 2).max(self.min_interval)
        } else {
            current
        }
    }
}

/// Periodically removes expired entries until shutdown is signalled.
pub struct ExpirySweeper {
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    shutdown: watch::Receiver<bool>,
}

impl ExpirySweeper {
    pub fn new(
        engine: Arc<StorageEngine>,
        config: ExpiryConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            config,
            shutdown,
        }
    }

    /// Runs the sweeper as a background task.
    ///
    /// Must be called from within a tokio runtime. The task ends once the
    /// shutdown signal fires; await the handle to wait for it.
    pub fn spawn(self) -> JoinHandle<()> {
        info!("Background expiry sweeper started");
        tokio::spawn(self.run())
    }

    /// Sweeps until shutdown.
    pub async fn run(mut self) {
        let mut period = self.config.base_interval;
        let mut ticker = sweep_ticker(period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = crate::shutdown::requested(&mut self.shutdown) => break,
            }

            let sweep = self.engine.cleanup_expired();
            if sweep.removed > 0 {
                debug!(
                    scanned = sweep.scanned,
                    removed = sweep.removed,
                    "Expired keys cleaned up"
                );
            }

            let next = self.config.next_interval(period, sweep);
            if next != period {
                trace!(
                    from_ms = period.as_millis(),
                    to_ms = next.as_millis(),
                    "Adjusting sweep interval"
                );
                period = next;
                ticker = sweep_ticker(period);
            }
        }

        info!("Background expiry sweeper stopped");
    }
}

/// An interval whose first tick is one `period` away. A late tick pushes
/// the following ones back instead of firing a burst.
fn sweep_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
