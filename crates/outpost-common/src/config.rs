//! Configuration for Outpost components

use outpost_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Dispatch pipeline guards
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// External tool locations
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Capability secrets keyed by the path a capability asks for
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Merge with environment variables (OUTPOST_ prefix)
    pub fn merge_env(self) -> Self {
        self.merge_vars(std::env::vars())
    }

    fn merge_vars(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        for (name, val) in vars {
            match name.as_str() {
                "OUTPOST_LOG_LEVEL" => self.logging.level = val,
                "OUTPOST_LOG_FORMAT" => self.logging.format = val,
                "OUTPOST_MAX_DEPTH" => {
                    if let Ok(n) = val.parse() {
                        self.dispatch.max_depth = n;
                    }
                }
                "OUTPOST_MAX_CHILDREN" => {
                    if let Ok(n) = val.parse() {
                        self.dispatch.max_children = n;
                    }
                }
                "OUTPOST_ENFORCE_TIMEOUT" => {
                    if let Ok(b) = val.parse() {
                        self.dispatch.enforce_timeout = b;
                    }
                }
                "OUTPOST_DEDUP_JOBS" => {
                    if let Ok(b) = val.parse() {
                        self.dispatch.dedup_jobs = b;
                    }
                }
                "NUCLEI_TEMPLATES" | "OUTPOST_NUCLEI_TEMPLATES" => {
                    self.tools.nuclei_templates = Some(val)
                }
                _ => {}
            }
        }
        self
    }
}

/// Bounds on recursive job expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Deepest level of nested jobs that will run; the seed job is depth 0
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Most child jobs a single dispatch will run
    #[serde(default = "default_max_children")]
    pub max_children: usize,

    /// Fail a capability that outlives its advertised timeout
    #[serde(default)]
    pub enforce_timeout: bool,

    /// Skip a job whose key already ran in the same top-level dispatch
    #[serde(default = "default_true")]
    pub dedup_jobs: bool,
}

fn default_max_depth() -> usize {
    8
}

fn default_max_children() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_children: default_max_children(),
            enforce_timeout: false,
            dedup_jobs: true,
        }
    }
}

/// External tool settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directory of nuclei templates
    pub nuclei_templates: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    String::from("info")
}

fn default_log_format() -> String {
    String::from("pretty")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Builder for constructing Config
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.dispatch.max_depth = depth;
        self
    }

    pub fn max_children(mut self, children: usize) -> Self {
        self.config.dispatch.max_children = children;
        self
    }

    pub fn enforce_timeout(mut self, enforce: bool) -> Self {
        self.config.dispatch.enforce_timeout = enforce;
        self
    }

    pub fn nuclei_templates(mut self, dir: impl Into<String>) -> Self {
        self.config.tools.nuclei_templates = Some(dir.into());
        self
    }

    pub fn secret(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.secrets.insert(path.into(), value.into());
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
