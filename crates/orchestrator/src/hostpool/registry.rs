use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{debug, info};

use super::pool::HostPool;
use super::Result;

/// Background health-monitoring loop over the host pool.
pub struct HostRegistry {
    pool: Arc<HostPool>,
    health_check_interval: Duration,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl HostRegistry {
    pub fn new(pool: Arc<HostPool>, health_check_interval: Duration, shutdown_rx: tokio::sync::watch::Receiver<bool>) -> Self {
        Self { pool, health_check_interval, shutdown_rx }
    }

    pub async fn start_health_monitoring(mut self) {
        info!("starting host health monitoring (interval: {}s)", self.health_check_interval.as_secs());

        let mut interval = time::interval(self.health_check_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    debug!("running scheduled host health check");
                    self.pool.health_check_all().await;
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("received shutdown signal, stopping host health monitoring");
                        break;
                    }
                }
            }
        }

        info!("host health monitoring stopped");
    }

    #[allow(dead_code)]
    pub async fn health_check_now(&self) -> Result<()> {
        self.pool.health_check_all().await;
        Ok(())
    }
}
