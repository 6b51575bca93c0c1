//! Application routing
//!
//! Maps a request path to the application whose context path prefixes it.

use std::sync::Arc;

use matchit::Router as MatchRouter;

use crate::{
    application::Application,
    core::{AppError, AppResult},
};

#[derive(Default)]
pub struct ApplicationRouter {
    router: MatchRouter<String>,
    /// Application mounted at `/`, tried when nothing else matches
    root: Option<String>,
}

impl ApplicationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a routing table for the given applications.
    pub fn build(applications: &[Arc<Application>]) -> AppResult<Self> {
        let mut router = Self::new();
        for app in applications {
            router.insert(app.context_path(), app.name())?;
        }
        Ok(router)
    }

    /// Mount an application under a context path.
    pub fn insert(&mut self, context_path: &str, application: &str) -> AppResult<()> {
        let base = context_path.trim_end_matches('/');
        if base.is_empty() {
            if let Some(existing) = &self.root {
                return Err(AppError::Configuration(format!(
                    "Applications {existing} and {application} are both mounted at /"
                )));
            }
            self.root = Some(application.to_string());
            return Ok(());
        }

        for route in [base.to_string(), format!("{base}/{{*path}}")] {
            self.router
                .insert(route, application.to_string())
                .map_err(|e| {
                    AppError::Configuration(format!(
                        "Unable to mount {application} at {context_path}: {e}"
                    ))
                })?;
        }
        Ok(())
    }

    /// Name of the application serving `path`
    pub fn match_path(&self, path: &str) -> Option<&str> {
        match self.router.at(path) {
            Ok(matched) => Some(matched.value.as_str()),
            Err(_) => self.root.as_deref(),
        }
    }
}
