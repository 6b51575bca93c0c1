use std::{
    collections::{BTreeMap, HashMap},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::core::{AppError, AppResult};

/// Descriptor parameter overriding the stateful idle lifetime, in seconds
pub const LIFETIME_PARAM: &str = "lifetime";
/// Descriptor parameter bounding the stateless free list
pub const POOL_SIZE_PARAM: &str = "pool_size";

pub const DEFAULT_POOL_SIZE: usize = 16;

/// Instance-sharing policy of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Fresh or pooled instance per resolution
    #[default]
    Stateless,
    /// One instance per session key
    Stateful,
    /// One instance per application
    Singleton,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Stateless => "stateless",
            Scope::Stateful => "stateful",
            Scope::Singleton => "singleton",
        }
    }
}

/// Declarative description of a component registered with a bean manager.
///
/// `references` maps collaborator names to naming paths; they are resolved
/// when an instance is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDescriptor {
    pub name: String,
    pub class: String,
    pub scope: Scope,
    pub params: HashMap<String, String>,
    pub references: BTreeMap<String, String>,
}

impl ComponentDescriptor {
    pub fn new(name: impl Into<String>, class: impl Into<String>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            scope,
            params: HashMap::new(),
            references: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_reference(mut self, field: impl Into<String>, path: impl Into<String>) -> Self {
        self.references.insert(field.into(), path.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Parse a parameter, failing with a validation error on bad input
    pub fn param_as<T>(&self, key: &str) -> AppResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.param(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| {
                    AppError::Validation(format!(
                        "Component {}: invalid value '{raw}' for {key}: {e}",
                        self.name
                    ))
                })
            })
            .transpose()
    }

    /// Idle lifetime override for stateful instances
    pub fn lifetime(&self) -> AppResult<Option<Duration>> {
        match self.param_as::<f64>(LIFETIME_PARAM)? {
            Some(secs) => Duration::try_from_secs_f64(secs).map(Some).map_err(|_| {
                AppError::Validation(format!(
                    "Component {}: lifetime must be a non-negative number of seconds, got {secs}",
                    self.name
                ))
            }),
            None => Ok(None),
        }
    }

    pub fn pool_size(&self) -> AppResult<usize> {
        Ok(self
            .param_as::<usize>(POOL_SIZE_PARAM)?
            .unwrap_or(DEFAULT_POOL_SIZE))
    }

    /// Check parameters that are interpreted by the manager itself
    pub fn validate(&self) -> AppResult<()> {
        if self.name.is_empty() {
            return Err(AppError::Validation(
                "Component name must not be empty".to_string(),
            ));
        }
        self.lifetime()?;
        self.pool_size()?;
        Ok(())
    }
}
