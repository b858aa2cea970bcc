use std::path::PathBuf;
use tracing::debug;

use crate::catalog::TransactionLog;
use crate::cli::Cli;
use crate::config::Config;
use crate::io::LibraryPaths;
use crate::transaction::{TransactionCoordinator, TransactionRequest};
use crate::Result;

/// Environment variable naming the library directory.
pub const LIBRARY_ENV: &str = "TOMEKEEPER_LIBRARY";

/// One merx invocation against the library, as requested on the command line
pub struct MerxCommand {
    pub merx: String,
    pub tomes: Vec<String>,
    pub undo: bool,
    pub library: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub repo: Option<String>,
}

impl MerxCommand {
    pub fn new(merx: String, tomes: Vec<String>, undo: bool) -> Self {
        Self {
            merx,
            tomes,
            undo,
            library: None,
            config: None,
            repo: None,
        }
    }

    /// Library from the flag, then the environment, then the home directory.
    pub fn library_paths(&self) -> Result<LibraryPaths> {
        if let Some(root) = &self.library {
            return Ok(LibraryPaths::at(root));
        }
        match std::env::var(LIBRARY_ENV) {
            Ok(root) if !root.is_empty() => Ok(LibraryPaths::at(root)),
            _ => LibraryPaths::new(),
        }
    }

    fn load_config(&self, library: &LibraryPaths) -> Result<Config> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| library.config_file());
        debug!("Loading configuration from {}", path.display());

        let mut config = Config::load(&path)?;
        if let Some(repo) = &self.repo {
            config.set_override("repo_url", repo.as_str());
        }
        Ok(config)
    }

    /// Open the library, run the invocation and return its journal row.
    ///
    /// Errors only when the library cannot be opened; a failed merx is
    /// reported through the row's `result`.
    pub fn execute(&self) -> Result<TransactionLog> {
        let library = self.library_paths()?;
        let config = self.load_config(&library)?;
        let mut coordinator = TransactionCoordinator::for_library(&library, config)?;

        let request =
            TransactionRequest::new(self.merx.as_str(), self.tomes.clone()).with_undo(self.undo);
        Ok(coordinator.execute(&request))
    }
}

impl From<Cli> for MerxCommand {
    fn from(cli: Cli) -> Self {
        Self {
            merx: cli.merx,
            tomes: cli.tomes,
            undo: cli.undo,
            library: cli.library,
            config: cli.config,
            repo: cli.repo,
        }
    }
}
