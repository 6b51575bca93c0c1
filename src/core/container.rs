//! Dependency injection container
//!
//! Owns the naming root and the deployed applications so that nothing in
//! the runtime has to reach for process-wide singletons.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::info;

use super::{error::AppResult, registry::ApplicationRegistry};
use crate::{
    application::Application,
    naming::{InitialContext, NamingContext, NamingDirectory},
};

/// Subdirectory holding one naming subtree per application
pub const GLOBAL_DIRECTORY: &str = "global";
/// Subdirectory holding server environment entries
pub const ENV_DIRECTORY: &str = "env";
/// Environment entry resolving to the application base directory
pub const APP_BASE_ENTRY: &str = "appBase";

pub struct ServiceContainer {
    app_base: PathBuf,
    naming: Arc<NamingDirectory>,
    global: Arc<NamingDirectory>,
    env: Arc<NamingDirectory>,
    applications: ApplicationRegistry,
    ready: AtomicBool,
}

impl ServiceContainer {
    /// Build the naming root with its `global` and `env` subdirectories.
    pub fn new(app_base: impl Into<PathBuf>) -> AppResult<Self> {
        let app_base = app_base.into();
        let naming = Arc::new(NamingDirectory::new(""));
        let global = naming.create_subdirectory(GLOBAL_DIRECTORY)?;
        let env = naming.create_subdirectory(ENV_DIRECTORY)?;
        env.bind(APP_BASE_ENTRY, Arc::new(app_base.clone()), Vec::new())?;

        Ok(Self {
            app_base,
            naming,
            global,
            env,
            applications: ApplicationRegistry::new(),
            ready: AtomicBool::new(false),
        })
    }

    pub fn app_base(&self) -> &Path {
        &self.app_base
    }

    /// Root of the naming tree
    pub fn naming(&self) -> &Arc<NamingDirectory> {
        &self.naming
    }

    pub fn global_directory(&self) -> &Arc<NamingDirectory> {
        &self.global
    }

    pub fn env_directory(&self) -> &Arc<NamingDirectory> {
        &self.env
    }

    /// Context that resolves every name from the root
    pub fn initial_context(&self) -> InitialContext {
        InitialContext::new(self.naming.clone())
    }

    pub fn applications(&self) -> &ApplicationRegistry {
        &self.applications
    }

    pub fn add_application(&self, application: Arc<Application>) -> AppResult<()> {
        self.applications.insert(application)
    }

    pub fn application(&self, name: &str) -> Option<Arc<Application>> {
        self.applications.get(name)
    }

    /// Mark the server as ready once every application is deployed
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        info!(
            "{} application(s) deployed, server is ready",
            self.applications.len()
        );
    }

    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
