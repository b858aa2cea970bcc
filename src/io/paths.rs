use crate::config::Config;
use crate::{Result, TomeError};
use directories::BaseDirs;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the library directory under the user's home.
pub const LIBRARY_DIR_NAME: &str = ".eons";

/// Path management for the tome library
#[derive(Debug, Clone)]
pub struct LibraryPaths {
    /// Library root (~/.eons/)
    pub root: PathBuf,
}

impl LibraryPaths {
    /// Library under the current user's home directory
    pub fn new() -> Result<Self> {
        let dirs = BaseDirs::new().ok_or_else(|| {
            TomeError::Path("Failed to determine home directory".to_string())
        })?;

        Ok(Self::at(dirs.home_dir().join(LIBRARY_DIR_NAME)))
    }

    /// Library rooted at an explicit directory
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn catalog_file(&self) -> PathBuf {
        self.root.join("catalog.db")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Where tomes are staged after retrieval
    pub fn tome_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Where merx packages are kept
    pub fn merx_dir(&self) -> PathBuf {
        self.root.join("merx")
    }

    /// Create the library skeleton if any part of it is missing.
    pub fn ensure_home(&self) -> Result<()> {
        if !self.root.exists() {
            info!("Creating home folder: {}", self.root.display());
        }
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.tome_dir())?;
        std::fs::create_dir_all(self.merx_dir())?;

        let config_file = self.config_file();
        let empty = match std::fs::metadata(&config_file) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };
        if empty {
            info!("Initializing config file: {}", config_file.display());
            std::fs::write(&config_file, "{\n}")?;
        }
        Ok(())
    }
}

/// A named install location and the system path preferred for it.
#[derive(Debug, Clone)]
pub struct PathSelector {
    pub name: String,
    pub system_path: PathBuf,
}

impl PathSelector {
    pub fn new(name: impl Into<String>, system_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            system_path: system_path.into(),
        }
    }

    /// Selectors for executables, headers and libraries.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("exe", "/usr/local/bin/"),
            Self::new("inc", "/usr/local/include/"),
            Self::new("lib", "/usr/local/lib/"),
        ]
    }

    /// Configuration key that overrides the system path
    pub fn config_key(&self) -> String {
        format!("{}_path", self.name)
    }
}

/// Install locations chosen for one invocation, keyed by selector name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedPaths(BTreeMap<String, PathBuf>);

impl SelectedPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.0.insert(name.into(), path.into());
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.0.get(name).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Choose a usable directory for each selector.
///
/// The configured `<name>_path` (or the selector's system path) wins when it
/// exists and is writable; otherwise `<library>/<name>` is created and used.
pub fn select_paths(
    library: &LibraryPaths,
    selectors: &[PathSelector],
    config: &Config,
) -> Result<SelectedPaths> {
    let mut selected = SelectedPaths::new();

    for selector in selectors {
        let preferred = config
            .get_string(&selector.config_key())
            .map(PathBuf::from)
            .unwrap_or_else(|| selector.system_path.clone());

        let path = if preferred.exists() && is_writable_dir(&preferred) {
            preferred
        } else {
            debug!(
                "The preferred path for {} ({}) was unusable.",
                selector.name,
                preferred.display()
            );
            let fallback = library.root.join(&selector.name);
            std::fs::create_dir_all(&fallback)?;
            fallback
        };

        debug!("Path for {} set to {}.", selector.name, path.display());
        selected.insert(selector.name.clone(), path);
    }

    Ok(selected)
}

/// Whether files can be created in `path`.
fn is_writable_dir(path: &Path) -> bool {
    path.is_dir() && tempfile::tempfile_in(path).is_ok()
}
