use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::PathBuf,
    time::Duration,
};

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use validator::{Validate, ValidationError};

use crate::{
    bean::{ComponentDescriptor, Scope},
    core::{AppError, AppResult},
};

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$").expect("name pattern is a valid regex")
});

fn validate_name(name: &String) -> Result<(), ValidationError> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        let mut err = ValidationError::new("invalid_name");
        err.add_param("name".into(), name);
        Err(err)
    }
}

fn validate_context_path(path: &String) -> Result<(), ValidationError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        let mut err = ValidationError::new("context_path_must_start_with_slash");
        err.add_param("context_path".into(), path);
        Err(err)
    }
}

/// Render scalar YAML parameters as strings, the form components read them in
fn params_as_strings(params: &HashMap<String, YamlValue>) -> HashMap<String, String> {
    params
        .iter()
        .map(|(key, value)| {
            let value = match value {
                YamlValue::Null => String::new(),
                YamlValue::Bool(b) => b.to_string(),
                YamlValue::Number(n) => n.to_string(),
                YamlValue::String(s) => s.clone(),
                other => serde_yaml::to_string(other)
                    .map(|s| s.trim_end().to_string())
                    .unwrap_or_default(),
            };
            (key.clone(), value)
        })
        .collect()
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub server: Server,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<Log>,

    #[serde(default)]
    #[validate(nested)]
    pub valves: Vec<ValveConfig>,

    #[validate(length(min = 1))]
    #[validate(nested)]
    pub applications: Vec<ApplicationConfig>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> AppResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).map_err(|e| {
            AppError::Configuration(format!("Unable to read conf file from {path}: {e}"))
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> AppResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> AppResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Server {
    /// Directory holding one folder per application
    pub app_base: PathBuf,

    #[serde(default)]
    #[validate(nested)]
    pub dispatcher: Dispatcher,

    /// Interval of the background idle sweep
    #[serde(default = "Server::default_sweep_interval_ms")]
    #[validate(range(min = 1))]
    pub sweep_interval_ms: u64,
}

impl Server {
    fn default_sweep_interval_ms() -> u64 {
        60_000
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct Dispatcher {
    /// Maximum number of execution units running at once
    #[serde(default = "Dispatcher::default_capacity")]
    #[validate(range(min = 1))]
    pub capacity: usize,

    /// How long a request waits for a free execution slot
    #[serde(default = "Dispatcher::default_wait_timeout_ms")]
    #[validate(range(min = 1, max = 60000))]
    pub wait_timeout_ms: u64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
            wait_timeout_ms: Self::default_wait_timeout_ms(),
        }
    }
}

impl Dispatcher {
    fn default_capacity() -> usize {
        64
    }

    fn default_wait_timeout_ms() -> u64 {
        1000
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Log {
    pub path: String,
    #[serde(default = "Log::default_level")]
    pub level: String,
}

impl Log {
    fn default_level() -> String {
        "info".to_string()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct ValveConfig {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default)]
    pub config: YamlValue,
}

impl ValveConfig {
    /// Valve settings as JSON, an empty object when none are given
    pub fn config_json(&self) -> AppResult<JsonValue> {
        match &self.config {
            YamlValue::Null => Ok(JsonValue::Object(Default::default())),
            config => Ok(serde_json::to_value(config)?),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "ApplicationConfig::validate_unique_beans"))]
pub struct ApplicationConfig {
    #[validate(custom(function = "validate_name"))]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_context_path"))]
    pub context_path: Option<String>,

    /// Application parameters, e.g. stateful session settings
    #[serde(default)]
    pub params: HashMap<String, YamlValue>,

    #[serde(default)]
    #[validate(nested)]
    pub class_loaders: Vec<ClassLoaderConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub beans: Vec<BeanConfig>,
}

impl ApplicationConfig {
    /// Context path, defaulting to `/<name>`
    pub fn context_path(&self) -> String {
        self.context_path
            .clone()
            .unwrap_or_else(|| format!("/{}", self.name))
    }

    pub fn params(&self) -> HashMap<String, String> {
        params_as_strings(&self.params)
    }

    fn validate_unique_beans(&self) -> Result<(), ValidationError> {
        let mut seen = std::collections::HashSet::new();
        for bean in &self.beans {
            if !seen.insert(bean.name.as_str()) {
                let mut err = ValidationError::new("duplicate_bean_name");
                err.add_param("bean".into(), &bean.name);
                return Err(err);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct ClassLoaderConfig {
    #[validate(length(min = 1))]
    pub name: String,
    /// Directories relative to the application folder
    #[serde(default)]
    pub directories: Vec<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct BeanConfig {
    #[validate(custom(function = "validate_name"))]
    pub name: String,

    #[validate(length(min = 1))]
    pub class: String,

    #[serde(default)]
    pub scope: Scope,

    #[serde(default)]
    pub params: HashMap<String, YamlValue>,

    /// Collaborator name to naming path
    #[serde(default)]
    pub references: BTreeMap<String, String>,
}

impl From<&BeanConfig> for ComponentDescriptor {
    fn from(bean: &BeanConfig) -> Self {
        ComponentDescriptor {
            name: bean.name.clone(),
            class: bean.class.clone(),
            scope: bean.scope,
            params: params_as_strings(&bean.params),
            references: bean.references.clone(),
        }
    }
}
