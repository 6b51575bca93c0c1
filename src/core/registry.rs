//! Registry of deployed applications
//!
//! Applications are keyed by name; the servlet engine looks them up here
//! after routing a request path to an application name.

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use log::{debug, info};

use super::error::{AppError, AppResult};
use crate::application::Application;

#[derive(Default)]
pub struct ApplicationRegistry {
    applications: DashMap<String, Arc<Application>>,
}

impl ApplicationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Application>> {
        self.applications.get(name).map(|entry| entry.value().clone())
    }

    /// Insert an application. Names are unique within one server.
    pub fn insert(&self, application: Arc<Application>) -> AppResult<()> {
        match self.applications.entry(application.name().to_string()) {
            Entry::Occupied(entry) => Err(AppError::Configuration(format!(
                "Application {} is already deployed",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                debug!("Registering application: {}", entry.key());
                entry.insert(application);
                Ok(())
            }
        }
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Application>> {
        debug!("Removing application: {}", name);
        self.applications.remove(name).map(|(_, app)| app)
    }

    /// All applications, sorted by name
    pub fn list(&self) -> Vec<Arc<Application>> {
        let mut apps: Vec<_> = self
            .applications
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        apps.sort_by(|a, b| a.name().cmp(b.name()));
        apps
    }

    pub fn list_names(&self) -> Vec<String> {
        self.list().iter().map(|app| app.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }

    pub fn clear(&self) {
        info!("Clearing {} applications", self.applications.len());
        self.applications.clear();
    }
}
