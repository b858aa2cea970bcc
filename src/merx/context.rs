use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::catalog::{CatalogStore, Epitome};
use crate::config::{display_value, Config, ConfigSource};
use crate::io::SelectedPaths;
use crate::provenance::FetchObserver;
use crate::resolver::{TomeResolver, DEFAULT_TOME_KIND};
use crate::{Result, TomeError};

/// Everything a merx gets to see while it runs on one tome.
pub struct MerxContext<'a> {
    /// Tome name
    pub name: String,
    pub version: Option<String>,
    /// Where the tome's files are
    pub path: PathBuf,
    /// Space left by the previous successful merx
    pub space: Value,
    /// Install locations for this invocation
    pub paths: &'a SelectedPaths,
    /// Scratch directory name builds should use inside the tome
    pub build_in: &'a str,
    pub undo: bool,
    /// Merx that will run after this one
    pub next: &'a [String],

    args: BTreeMap<String, Value>,
    config: &'a Config,
    observer: &'a mut dyn FetchObserver,
    events: &'a mut Vec<String>,
    catalog: &'a CatalogStore,
    resolver: &'a mut TomeResolver,
}

/// Collaborators the engine lends to a context.
pub struct ContextHandles<'a> {
    pub paths: &'a SelectedPaths,
    pub build_in: &'a str,
    pub next: &'a [String],
    pub config: &'a Config,
    pub observer: &'a mut dyn FetchObserver,
    pub events: &'a mut Vec<String>,
    pub catalog: &'a CatalogStore,
    pub resolver: &'a mut TomeResolver,
}

impl<'a> MerxContext<'a> {
    /// Build the context for `epitome`, which must have a resolved path.
    pub fn new(epitome: &Epitome, undo: bool, handles: ContextHandles<'a>) -> Result<Self> {
        let path = epitome.path.clone().ok_or_else(|| {
            TomeError::Resolution(format!("{} has no local files", epitome.name))
        })?;

        let mut args = BTreeMap::new();
        args.insert("name".to_string(), Value::String(epitome.name.clone()));
        if let Some(version) = &epitome.version {
            args.insert("version".to_string(), Value::String(version.clone()));
        }
        args.insert(
            "path".to_string(),
            Value::String(path.to_string_lossy().to_string()),
        );
        args.insert(
            "build_in".to_string(),
            Value::String(handles.build_in.to_string()),
        );
        if let Some(source) = &epitome.retrieved_from {
            args.insert("retrieved_from".to_string(), Value::String(source.clone()));
        }
        for (name, dir) in handles.paths.iter() {
            args.insert(
                format!("{name}_path"),
                Value::String(dir.to_string_lossy().to_string()),
            );
        }

        Ok(Self {
            name: epitome.name.clone(),
            version: epitome.version.clone(),
            path,
            space: epitome.space.clone(),
            paths: handles.paths,
            build_in: handles.build_in,
            undo,
            next: handles.next,
            args,
            config: handles.config,
            observer: handles.observer,
            events: handles.events,
            catalog: handles.catalog,
            resolver: handles.resolver,
        })
    }

    /// Directory builds should happen in.
    pub fn build_dir(&self) -> PathBuf {
        self.path.join(self.build_in)
    }

    /// Install location for `name` (`exe`, `inc`, `lib`, ...).
    pub fn install_path(&self, name: &str) -> Option<&Path> {
        self.paths.get(name)
    }

    /// Look up `var` in the tome's own fields, then the configuration.
    pub fn fetch(&mut self, var: &str) -> Option<Value> {
        let found = match self.args.get(var) {
            Some(value) => Some((value.clone(), ConfigSource::Context)),
            None => self.config.lookup(var),
        };

        let (value, source) = found?;
        self.observe(var, source, &value);
        Some(value)
    }

    /// Like [`fetch`](Self::fetch), falling back to `default`.
    pub fn fetch_or(&mut self, var: &str, default: impl Into<Value>) -> Value {
        if let Some(value) = self.fetch(var) {
            return value;
        }
        let value = default.into();
        self.observe(var, ConfigSource::Default, &value);
        value
    }

    /// A variable the merx cannot run without.
    pub fn require(&mut self, var: &str) -> Result<Value> {
        self.fetch(var).ok_or_else(|| {
            TomeError::Configuration(format!(
                "{} requires '{}' but it was not found in any configuration source",
                self.name, var
            ))
        })
    }

    /// String view of [`fetch`](Self::fetch).
    pub fn fetch_string(&mut self, var: &str) -> Option<String> {
        self.fetch(var).map(|value| display_value(&value))
    }

    fn observe(&mut self, var: &str, source: ConfigSource, value: &Value) {
        let shown = display_value(value);
        debug!(var, source = source.as_str(), value = %shown, "Fetched");
        self.observer.observe(var, source.as_str(), &shown);
    }

    /// Report a notable event to the invocation.
    pub fn emit(&mut self, event: impl Into<String>) {
        let event = event.into();
        info!(tome = %self.name, "{}", event);
        self.events.push(event);
    }

    /// Resolve another tome, e.g. a dependency. The returned epitome is not
    /// staged in the catalog.
    pub fn resolve_tome(&mut self, name: &str, allow_download: bool) -> Epitome {
        self.resolver
            .resolve(self.catalog, name, DEFAULT_TOME_KIND, allow_download)
    }
}
