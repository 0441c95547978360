//! Connection pool pressure monitor.
//!
//! Reads pool occupancy on an interval and logs when the pool is exhausted
//! or running hot. Observability only; it never resizes or rejects.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::PoolMonitorConfig;
use crate::db::{DbProbe, PoolStats};

/// Classification of one pool reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PoolPressure {
    Normal,
    /// Every connection busy and callers waiting.
    Exhausted,
    /// Free fraction below the configured threshold.
    HighUtilization { free_ratio: f64 },
}

pub struct PoolMonitor {
    probe: Arc<dyn DbProbe>,
    interval: Duration,
    low_free_ratio: f64,
}

impl PoolMonitor {
    pub fn new(probe: Arc<dyn DbProbe>, config: &PoolMonitorConfig) -> Self {
        Self {
            probe,
            interval: Duration::from_secs(config.interval_secs),
            low_free_ratio: config.low_free_ratio,
        }
    }

    pub fn evaluate(&self, stats: PoolStats) -> PoolPressure {
        if stats.free == 0 && stats.queued > 0 {
            return PoolPressure::Exhausted;
        }
        if stats.total > 0 {
            let free_ratio = stats.free as f64 / stats.total as f64;
            if free_ratio < self.low_free_ratio {
                return PoolPressure::HighUtilization { free_ratio };
            }
        }
        PoolPressure::Normal
    }

    /// Take one reading and log it. Returns the classification.
    pub fn check(&self) -> PoolPressure {
        let stats = self.probe.pool_stats();
        let pressure = self.evaluate(stats);

        match pressure {
            PoolPressure::Exhausted => tracing::warn!(
                total = stats.total,
                free = stats.free,
                queued = stats.queued,
                "Database pool exhausted, requests are queuing"
            ),
            PoolPressure::HighUtilization { free_ratio } => tracing::warn!(
                total = stats.total,
                free = stats.free,
                free_pct = (free_ratio * 100.0).round(),
                "Database pool utilization high"
            ),
            PoolPressure::Normal => tracing::trace!(
                total = stats.total,
                free = stats.free,
                "Database pool healthy"
            ),
        }
        pressure
    }

    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await;
            tracing::info!(interval_secs = self.interval.as_secs(), "Pool monitor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.check();
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Pool monitor stopping");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeProbe(Mutex<PoolStats>);

    #[async_trait]
    impl DbProbe for FakeProbe {
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }

        fn pool_stats(&self) -> PoolStats {
            *self.0.lock().unwrap()
        }
    }

    fn monitor(stats: PoolStats) -> PoolMonitor {
        PoolMonitor::new(Arc::new(FakeProbe(Mutex::new(stats))), &PoolMonitorConfig::default())
    }

    fn stats(total: u32, free: u32, queued: u32) -> PoolStats {
        PoolStats { total, free, queued, acquiring: queued }
    }

    #[test]
    fn test_exhausted() {
        let m = monitor(stats(20, 0, 3));
        assert_eq!(m.check(), PoolPressure::Exhausted);
    }

    #[test]
    fn test_high_utilization() {
        let m = monitor(stats(20, 3, 0));
        assert_eq!(m.check(), PoolPressure::HighUtilization { free_ratio: 0.15 });
    }

    #[test]
    fn test_normal_and_empty_pool() {
        assert_eq!(monitor(stats(20, 4, 0)).check(), PoolPressure::Normal);
        // Lazy pool before the first connection.
        assert_eq!(monitor(stats(0, 0, 0)).check(), PoolPressure::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_shutdown() {
        let (tx, rx) = broadcast::channel(1);
        let handle = monitor(stats(20, 10, 0)).spawn(rx);
        tokio::time::sleep(Duration::from_secs(130)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
