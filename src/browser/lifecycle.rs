use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

use crate::browser::DriverPool;
use crate::config::PoolSettings;

/// Background reaper for long-lived browser processes. Sweeps the pool's
/// Idle sessions on an interval and retires any that sat idle too long or
/// served too many jobs, bounding the memory growth inherent to a browser
/// process that never exits.
pub struct LifecycleManager {
    pool: Arc<DriverPool>,
    max_idle_age: Duration,
    max_uses: u32,
    sweep_interval: Duration,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl LifecycleManager {
    pub fn new(pool: Arc<DriverPool>, settings: &PoolSettings) -> Self {
        Self {
            pool,
            max_idle_age: settings.max_session_idle_age,
            max_uses: settings.max_session_uses,
            sweep_interval: settings.sweep_interval,
            task: None,
        }
    }

    pub fn start(&mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        let pool = self.pool.clone();
        let max_idle_age = self.max_idle_age;
        let max_uses = self.max_uses;
        let sweep_interval = self.sweep_interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Lifecycle manager received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let retired = pool.sweep(max_idle_age, max_uses).await;
                        if retired > 0 {
                            info!("Lifecycle sweep retired {} sessions", retired);
                        }
                    }
                }
            }
            info!("Lifecycle manager stopped");
        });

        self.task = Some(task);
    }

    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}
