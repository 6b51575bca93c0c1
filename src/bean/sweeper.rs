use std::{sync::Arc, time::Duration};

use log::{debug, info};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use super::manager::BeanManager;

/// Background task evicting idle stateful instances at a fixed interval.
pub struct IdleSweeper {
    manager: Arc<BeanManager>,
    interval: Duration,
}

impl IdleSweeper {
    pub fn new(manager: Arc<BeanManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let application = self.manager.application().to_string();
            info!(
                "Starting idle sweeper for {application} every {}ms",
                self.interval.as_millis()
            );

            let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let evicted = self.manager.evict_idle(std::time::Instant::now());
                        debug!("Idle sweep of {application} evicted {evicted} instance(s)");
                    }
                }
            }

            info!("Idle sweeper for {application} stopped");
        })
    }
}
