//! Deployed applications
//!
//! An application bundles its naming subtree, its bean manager and the
//! class loaders that must be registered before its first request runs.

pub mod class_loader;
pub mod factory;

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::info;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    bean::BeanManager,
    core::{AppResult, ClassLoader},
    naming::{InitialContext, NamingContext},
};

pub use class_loader::DirectoryClassLoader;
pub use factory::ApplicationFactory;

pub struct Application {
    name: String,
    context_path: String,
    base_dir: PathBuf,
    initial_context: InitialContext,
    bean_manager: Arc<BeanManager>,
    class_loaders: Vec<Arc<dyn ClassLoader>>,
    class_loaders_registered: AtomicBool,
    prepare_lock: Mutex<()>,
}

impl Application {
    pub fn new(
        name: impl Into<String>,
        context_path: impl Into<String>,
        base_dir: impl Into<PathBuf>,
        initial_context: InitialContext,
        bean_manager: Arc<BeanManager>,
        class_loaders: Vec<Arc<dyn ClassLoader>>,
    ) -> Self {
        Self {
            name: name.into(),
            context_path: context_path.into(),
            base_dir: base_dir.into(),
            initial_context,
            bean_manager,
            class_loaders,
            class_loaders_registered: AtomicBool::new(false),
            prepare_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// URL prefix requests must start with to reach this application
    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Naming context resolving bare names in this application's subtree
    pub fn initial_context(&self) -> &InitialContext {
        &self.initial_context
    }

    /// Identifier of the application's naming subtree
    pub fn naming_identifier(&self) -> &str {
        self.initial_context.identifier()
    }

    pub fn bean_manager(&self) -> &Arc<BeanManager> {
        &self.bean_manager
    }

    pub fn class_loaders(&self) -> &[Arc<dyn ClassLoader>] {
        &self.class_loaders
    }

    /// Serializes request preparation against this application
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.prepare_lock.lock().await
    }

    /// Register every class loader, once. Callers hold [`Application::lock`].
    ///
    /// A failing loader leaves the application unregistered so the next
    /// request retries.
    pub fn register_class_loaders(&self) -> AppResult<()> {
        if self.class_loaders_registered.load(Ordering::Acquire) {
            return Ok(());
        }
        for loader in &self.class_loaders {
            loader.register(&self.name)?;
        }
        self.class_loaders_registered.store(true, Ordering::Release);
        info!(
            "Registered {} class loader(s) for application {}",
            self.class_loaders.len(),
            self.name
        );
        Ok(())
    }

    pub fn class_loaders_registered(&self) -> bool {
        self.class_loaders_registered.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("context_path", &self.context_path)
            .field("base_dir", &self.base_dir)
            .field("class_loaders", &self.class_loaders.len())
            .finish()
    }
}
