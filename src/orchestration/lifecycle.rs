//! Component lifecycle management
//!
//! Starts the background work each deployed application needs and tears
//! it down again in reverse order on shutdown.

use std::{sync::Arc, time::Duration};

use log::{info, warn};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};

use crate::{
    bean::IdleSweeper,
    core::{AppResult, ServiceContainer},
};

pub struct ComponentLifecycle {
    container: Arc<ServiceContainer>,
    sweep_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    sweepers: Mutex<Vec<JoinHandle<()>>>,
}

impl ComponentLifecycle {
    pub fn new(container: Arc<ServiceContainer>, sweep_interval: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            container,
            sweep_interval,
            shutdown_tx,
            sweepers: Mutex::new(Vec::new()),
        }
    }

    /// Start one idle sweeper per application and mark the server ready.
    pub async fn initialize(&self) -> AppResult<()> {
        info!("Starting component initialization...");

        let mut sweepers = self.sweepers.lock().await;
        if !sweepers.is_empty() {
            warn!("Components are already initialized");
            return Ok(());
        }
        for app in self.container.applications().list() {
            let sweeper = IdleSweeper::new(app.bean_manager().clone(), self.sweep_interval);
            sweepers.push(sweeper.spawn(self.shutdown_tx.subscribe()));
        }

        self.container.mark_ready();
        info!(
            "Component initialization completed, {} sweeper(s) running",
            sweepers.len()
        );
        Ok(())
    }

    /// Stop sweepers, then destroy every application's instances.
    pub async fn shutdown(&self) -> AppResult<()> {
        info!("Starting graceful shutdown...");
        self.container.mark_not_ready();

        self.shutdown_tx.send_replace(true);
        let sweepers: Vec<_> = self.sweepers.lock().await.drain(..).collect();
        for handle in sweepers {
            if let Err(e) = handle.await {
                warn!("Idle sweeper ended abnormally: {e}");
            }
        }

        for app in self.container.applications().list() {
            app.bean_manager().shutdown();
        }

        info!("Graceful shutdown completed");
        Ok(())
    }

    pub async fn running_sweepers(&self) -> usize {
        self.sweepers.lock().await.len()
    }
}
