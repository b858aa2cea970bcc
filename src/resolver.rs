//! Tome resolution: catalog lookup plus retrieval on demand.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::catalog::{CatalogStore, Epitome};
use crate::fetch::{FetchOverride, Fetcher};

/// Default package kind appended to tome names when staging them.
pub const DEFAULT_TOME_KIND: &str = "tome";

/// Finds tomes locally or retrieves them through a [`Fetcher`].
pub struct TomeResolver {
    tome_dir: PathBuf,
    fetcher: Box<dyn Fetcher>,
}

impl TomeResolver {
    pub fn new(tome_dir: impl Into<PathBuf>, fetcher: Box<dyn Fetcher>) -> Self {
        Self {
            tome_dir: tome_dir.into(),
            fetcher,
        }
    }

    /// Directory tomes are staged in
    pub fn tome_dir(&self) -> &Path {
        &self.tome_dir
    }

    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    /// Where `name` of the given kind lives once retrieved.
    pub fn staging_path(&self, name: &str, kind: &str) -> PathBuf {
        self.tome_dir.join(format!("{name}.{kind}"))
    }

    /// Return the epitome for `name`, retrieving the tome if needed.
    ///
    /// Never fails: when the tome's files cannot be found or retrieved the
    /// returned epitome simply has no `path`.
    pub fn resolve(
        &mut self,
        catalog: &CatalogStore,
        name: &str,
        kind: &str,
        allow_download: bool,
    ) -> Epitome {
        let tome_path = self.staging_path(name, kind);
        debug!("Will place {} in {}.", name, tome_path.display());

        let mut epitome = match catalog.find_by_name(name) {
            Ok(Some(existing)) => {
                debug!("Got existing Epitome for {}.", name);
                existing
            }
            Ok(None) => {
                if !allow_download {
                    warn!("Epitome for {} did not exist and will not be downloaded.", name);
                }
                Epitome::new(name)
            }
            Err(e) => {
                error!("Failed to look up {} in the catalog: {}", name, e);
                Epitome::new(name)
            }
        };
        epitome.path = None;

        if tome_path.exists() {
            debug!("Found {} on the local filesystem.", name);
            epitome.path = Some(tome_path);
            return epitome;
        }

        if !allow_download {
            warn!("Could not find {}; only basic info will be available.", name);
            return epitome;
        }

        let package_name = format!("{name}.{kind}");
        let mut fetcher = FetchOverride::new(
            self.fetcher.as_mut(),
            epitome.retrieved_from.as_deref(),
            &self.tome_dir,
        );
        let source = fetcher.repo_url().to_string();
        debug!("Attempting to download {} from {}", package_name, source);

        if let Err(e) = fetcher.fetch(&package_name) {
            debug!("Fetch of {} reported: {}", package_name, e);
        }
        drop(fetcher);

        if tome_path.exists() {
            epitome.path = Some(tome_path);
            epitome.mark_retrieved(&source, Utc::now());
        } else {
            error!("Failed to download {}", package_name);
        }

        epitome
    }
}
