use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::{debug, warn};

use crate::core::{AppResult, ClassLoader};

/// Well-known code directories of an application folder
const DEFAULT_DIRECTORIES: [&str; 3] = ["WEB-INF/classes", "WEB-INF/lib", "META-INF/classes"];

/// Class loader backed by a list of directories under the application
/// folder. Missing directories are skipped.
#[derive(Debug)]
pub struct DirectoryClassLoader {
    name: String,
    directories: Vec<PathBuf>,
    registered: Mutex<Vec<PathBuf>>,
}

impl DirectoryClassLoader {
    pub fn new(name: impl Into<String>, base_dir: &Path, directories: &[PathBuf]) -> Self {
        Self {
            name: name.into(),
            directories: directories
                .iter()
                .map(|dir| {
                    if dir.is_absolute() {
                        dir.clone()
                    } else {
                        base_dir.join(dir)
                    }
                })
                .collect(),
            registered: Mutex::new(Vec::new()),
        }
    }

    /// Loader every application gets, covering the standard directories
    pub fn default_for(base_dir: &Path) -> Self {
        let directories: Vec<PathBuf> = DEFAULT_DIRECTORIES.iter().map(PathBuf::from).collect();
        Self::new("default", base_dir, &directories)
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Directories found on disk during the last registration
    pub fn registered_directories(&self) -> Vec<PathBuf> {
        self.registered
            .lock()
            .map(|dirs| dirs.clone())
            .unwrap_or_default()
    }
}

impl ClassLoader for DirectoryClassLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&self, application: &str) -> AppResult<()> {
        let found: Vec<PathBuf> = self
            .directories
            .iter()
            .filter(|dir| {
                let exists = dir.is_dir();
                if !exists {
                    debug!(
                        "Class loader {} of {application}: skipping missing {}",
                        self.name,
                        dir.display()
                    );
                }
                exists
            })
            .cloned()
            .collect();

        match self.registered.lock() {
            Ok(mut registered) => *registered = found,
            Err(_) => warn!("Class loader {} state is poisoned", self.name),
        }
        Ok(())
    }
}
