use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::coerce::coerce;
use crate::{Result, TomeError};

/// Prefix for environment variables consulted during lookups.
pub const ENV_PREFIX: &str = "TOMEKEEPER_";

/// Where a configuration value was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Supplied by the engine for the current tome (name, paths, ...)
    Context,
    /// Set explicitly by the caller, e.g. a CLI flag
    Override,
    Environment,
    /// The library's `config.json`
    File,
    /// The fallback handed to the lookup
    Default,
}

impl ConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSource::Context => "context",
            ConfigSource::Override => "override",
            ConfigSource::Environment => "environment",
            ConfigSource::File => "config",
            ConfigSource::Default => "default",
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Layered configuration: overrides, then environment, then `config.json`.
#[derive(Debug, Clone, Default)]
pub struct Config {
    overrides: Map<String, Value>,
    file: Map<String, Value>,
    file_path: Option<PathBuf>,
    use_environment: bool,
}

impl Config {
    /// Configuration with no file and environment lookups enabled.
    pub fn new() -> Self {
        Self {
            use_environment: true,
            ..Self::default()
        }
    }

    /// Load `config.json`. A missing or empty file is an empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::new();
        config.file_path = Some(path.to_path_buf());

        if !path.exists() {
            debug!("No config file at {}", path.display());
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(config);
        }

        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(map) => config.file = map,
            _ => {
                return Err(TomeError::Configuration(format!(
                    "{} must contain a JSON object",
                    path.display()
                )))
            }
        }

        Ok(config)
    }

    /// Stop consulting process environment variables.
    pub fn without_environment(mut self) -> Self {
        self.use_environment = false;
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_override(key, value);
        self
    }

    pub fn set_override(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.overrides.insert(key.into(), value.into());
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Find `var` in the configured layers.
    pub fn lookup(&self, var: &str) -> Option<(Value, ConfigSource)> {
        if let Some(value) = self.overrides.get(var) {
            return Some((value.clone(), ConfigSource::Override));
        }

        if self.use_environment {
            if let Ok(raw) = std::env::var(env_key(var)) {
                return Some((coerce(&raw), ConfigSource::Environment));
            }
        }

        self.file
            .get(var)
            .map(|value| (value.clone(), ConfigSource::File))
    }

    /// String form of `var`, when present and a string.
    pub fn get_string(&self, var: &str) -> Option<String> {
        match self.lookup(var)? {
            (Value::String(s), _) => Some(s),
            _ => None,
        }
    }
}

/// Environment variable name for a configuration key.
pub fn env_key(var: &str) -> String {
    let sanitized: String = var
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENV_PREFIX}{sanitized}")
}
