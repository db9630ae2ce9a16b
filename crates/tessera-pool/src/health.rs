use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::context::Context;
use crate::pool::ShardPool;

/// Periodic health loop for a [`ShardPool`].
///
/// Each tick runs [`ShardPool::health_tick`] under a fresh context bounded
/// by the pool's connect timeout. The loop runs until [`HealthMonitor::stop`]
/// or until the monitor is dropped.
pub struct HealthMonitor {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<u64>>,
}

impl HealthMonitor {
    /// Start the loop on the current Tokio runtime.
    pub fn start(pool: Arc<ShardPool>) -> Self {
        let interval = pool.config().health_interval();
        Self::start_with_interval(pool, interval)
    }

    pub fn start_with_interval(pool: Arc<ShardPool>, interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            let timeout = pool.config().connect_timeout();
            let mut ticks = 0u64;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = pool.health_tick(&Context::with_timeout(timeout)).await;
                        ticks += 1;
                        debug!(
                            refreshed = report.refreshed,
                            reconnected = report.reconnected.len(),
                            removed = report.removed.len(),
                            "health tick"
                        );
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            ticks
        });
        info!(interval_ms = interval.as_millis() as u64, "health monitor started");
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop the loop and wait for it. Returns the number of completed ticks.
    pub async fn stop(mut self) -> u64 {
        let _ = self.shutdown.send(true);
        let ticks = match self.handle.take() {
            Some(handle) => handle.await.unwrap_or(0),
            None => 0,
        };
        info!(ticks, "health monitor stopped");
        ticks
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterConfig, PoolConfig};
    use crate::testing::ScriptedConnector;
    use crate::shard::Shard;
    use tessera_types::{Ram, ShardId};

    #[tokio::test(start_paused = true)]
    async fn monitor_ticks_until_stopped() {
        let connector = Arc::new(ScriptedConnector::new());
        let peer = connector.add("p:1", Ram::new(100, 10));
        let pool = Arc::new(ShardPool::new(
            PoolConfig::default(),
            ClusterConfig::default(),
            connector.clone(),
        ));
        pool.add_shard(&Context::background(), "p:1", false)
            .await
            .unwrap();

        let monitor = HealthMonitor::start_with_interval(Arc::clone(&pool), Duration::from_millis(100));
        peer.set_ram(Ram::new(100, 70));
        tokio::time::sleep(Duration::from_millis(350)).await;

        let ticks = monitor.stop().await;
        assert!(ticks >= 3);
        assert_eq!(pool.shard(ShardId::new(1)).unwrap().ram(), Ram::new(100, 70));
        // One probe at connect, one per tick.
        assert_eq!(peer.calls("Ram"), 1 + ticks as usize);
    }
}
