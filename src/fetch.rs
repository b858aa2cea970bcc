//! Retrieval of tome packages into the staging directory.
//!
//! The resolver only needs something that can be pointed at a repository and
//! a store directory and asked for a package by name. [`DirectoryFetcher`]
//! serves packages from a local directory (or `file://` URL); network
//! retrieval can be plugged in behind the same trait.

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::{Result, TomeError};

/// Something that can place a package at `<store_dir>/<package_name>`.
pub trait Fetcher {
    /// Repository packages are retrieved from
    fn repo_url(&self) -> &str;

    fn set_repo_url(&mut self, url: String);

    /// Directory packages are placed in
    fn store_dir(&self) -> &Path;

    fn set_store_dir(&mut self, dir: PathBuf);

    /// Retrieve `package_name` from the repository into the store directory.
    fn fetch(&mut self, package_name: &str) -> Result<()>;
}

/// Temporarily repoints a fetcher; the previous settings come back on drop.
pub struct FetchOverride<'a> {
    fetcher: &'a mut dyn Fetcher,
    saved_url: String,
    saved_store: PathBuf,
}

impl<'a> FetchOverride<'a> {
    pub fn new(fetcher: &'a mut dyn Fetcher, repo_url: Option<&str>, store_dir: &Path) -> Self {
        let saved_url = fetcher.repo_url().to_string();
        let saved_store = fetcher.store_dir().to_path_buf();

        if let Some(url) = repo_url.filter(|url| !url.is_empty()) {
            fetcher.set_repo_url(url.to_string());
        }
        fetcher.set_store_dir(store_dir.to_path_buf());

        Self {
            fetcher,
            saved_url,
            saved_store,
        }
    }
}

impl<'a> std::ops::Deref for FetchOverride<'a> {
    type Target = dyn Fetcher + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.fetcher
    }
}

impl<'a> std::ops::DerefMut for FetchOverride<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.fetcher
    }
}

impl Drop for FetchOverride<'_> {
    fn drop(&mut self) {
        self.fetcher
            .set_repo_url(std::mem::take(&mut self.saved_url));
        self.fetcher
            .set_store_dir(std::mem::take(&mut self.saved_store));
    }
}

/// Serves packages from a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    repo_url: String,
    store_dir: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(repo_url: impl Into<String>, store_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_url: repo_url.into(),
            store_dir: store_dir.into(),
        }
    }

    /// Filesystem directory the repository URL points at.
    pub fn repo_root(&self) -> Option<PathBuf> {
        let url = self.repo_url.trim();
        if url.is_empty() {
            return None;
        }
        Some(PathBuf::from(url.strip_prefix("file://").unwrap_or(url)))
    }
}

impl Fetcher for DirectoryFetcher {
    fn repo_url(&self) -> &str {
        &self.repo_url
    }

    fn set_repo_url(&mut self, url: String) {
        self.repo_url = url;
    }

    fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    fn set_store_dir(&mut self, dir: PathBuf) {
        self.store_dir = dir;
    }

    fn fetch(&mut self, package_name: &str) -> Result<()> {
        let root = self.repo_root().ok_or_else(|| {
            TomeError::Resolution("No repository configured".to_string())
        })?;
        let source = root.join(package_name);
        if !source.exists() {
            return Err(TomeError::Resolution(format!(
                "{} not found in {}",
                package_name,
                root.display()
            )));
        }

        let destination = self.store_dir.join(package_name);
        debug!(
            "Copying {} to {}",
            source.display(),
            destination.display()
        );
        copy_tree(&source, &destination)
    }
}

/// Copy a file or directory tree, replacing whatever is at `destination`.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    if destination.is_dir() {
        std::fs::remove_dir_all(destination)?;
    } else if destination.exists() {
        std::fs::remove_file(destination)?;
    }

    if source.is_file() {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, destination)?;
        return Ok(());
    }

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| TomeError::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| TomeError::Path(e.to_string()))?;
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
