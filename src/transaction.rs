//! Top-level invocations and their journal rows.
//!
//! Every call to [`TransactionCoordinator::execute`] leaves exactly one
//! [`TransactionLog`] in the catalog, whether the merx succeeded, reported a
//! failure, returned an error or panicked.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, info};

use crate::catalog::{CatalogStore, TransactionLog};
use crate::config::Config;
use crate::fetch::DirectoryFetcher;
use crate::io::{select_paths, LibraryPaths, PathSelector, SelectedPaths};
use crate::merx::{MerxEngine, MerxRegistry, MerxRequest, StaticRegistry, DEFAULT_BUILD_IN};
use crate::resolver::TomeResolver;
use crate::{Result, TomeError};

/// Separates chained merx in an action path, e.g. `build/install`.
pub const MERX_PATH_SEPARATOR: char = '/';

/// One top-level invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    /// Action path; one or more merx joined by `/`
    pub merx: String,
    pub tomes: Vec<String>,
    pub undo: bool,
}

impl TransactionRequest {
    pub fn new(merx: impl Into<String>, tomes: Vec<String>) -> Self {
        Self {
            merx: merx.into(),
            tomes,
            undo: false,
        }
    }

    pub fn with_undo(mut self, undo: bool) -> Self {
        self.undo = undo;
        self
    }

    /// Merx to run, in execution order. Undo runs the chain backwards.
    pub fn segments(&self) -> Vec<String> {
        let mut segments: Vec<String> = self
            .merx
            .split(MERX_PATH_SEPARATOR)
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        if self.undo {
            segments.reverse();
        }
        segments
    }
}

/// Owns a catalog session and runs invocations against it.
pub struct TransactionCoordinator {
    catalog: CatalogStore,
    resolver: TomeResolver,
    registry: Box<dyn MerxRegistry>,
    paths: SelectedPaths,
    config: Config,
}

impl TransactionCoordinator {
    pub fn new(
        catalog: CatalogStore,
        resolver: TomeResolver,
        registry: Box<dyn MerxRegistry>,
        paths: SelectedPaths,
        config: Config,
    ) -> Self {
        Self {
            catalog,
            resolver,
            registry,
            paths,
            config,
        }
    }

    /// Session over an on-disk library using the built-in merx.
    ///
    /// Creates the library skeleton when missing. Tomes are retrieved from
    /// the configured `repo_url`, or `<library>/repo` when none is set.
    pub fn for_library(library: &LibraryPaths, config: Config) -> Result<Self> {
        library.ensure_home()?;

        let paths = select_paths(library, &PathSelector::defaults(), &config)?;
        let catalog = CatalogStore::open(&library.catalog_file())?;

        let repo_url = config
            .get_string("repo_url")
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| library.root.join("repo").to_string_lossy().to_string());
        debug!("Retrieving tomes from {}", repo_url);
        let fetcher = DirectoryFetcher::new(repo_url, library.tome_dir());
        let resolver = TomeResolver::new(library.tome_dir(), Box::new(fetcher));

        Ok(Self::new(
            catalog,
            resolver,
            Box::new(StaticRegistry::with_builtins()),
            paths,
            config,
        ))
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut CatalogStore {
        &mut self.catalog
    }

    pub fn paths(&self) -> &SelectedPaths {
        &self.paths
    }

    /// Run `request` and journal it.
    ///
    /// Never fails: the returned log's `result` says how the invocation went.
    pub fn execute(&mut self, request: &TransactionRequest) -> TransactionLog {
        let mut log = TransactionLog::begin(&request.merx, &request.tomes, request.undo);
        let targets = request.tomes.join(", ");

        let succeeded = match catch_unwind(AssertUnwindSafe(|| self.run_chain(request))) {
            Ok(Ok(succeeded)) => succeeded,
            Ok(Err(e)) => {
                error!("{} raised an error for {}: {}", request.merx, targets, e);
                false
            }
            Err(panic) => {
                error!(
                    "{} panicked for {}: {}",
                    request.merx,
                    targets,
                    panic_message(&*panic)
                );
                false
            }
        };
        log.result = Some(succeeded);

        self.catalog.add(log.clone());
        if let Err(e) = self.catalog.commit_pending() {
            error!("Failed to commit catalog: {}", e);
            let dropped = self.catalog.discard_pending();
            debug!("Discarded {} pending catalog card(s)", dropped);

            self.catalog.add(log.clone());
            if let Err(e) = self.catalog.commit_pending() {
                error!("Failed to record transaction: {}", e);
                self.catalog.discard_pending();
            }
        }

        if succeeded {
            info!("{} succeeded for {}", request.merx, targets);
        } else {
            error!("{} failed for {}", request.merx, targets);
        }
        log
    }

    /// Drop catalog writes staged since the last commit.
    pub fn discard(&mut self) -> usize {
        let dropped = self.catalog.discard_pending();
        info!("Discarded {} pending catalog card(s)", dropped);
        dropped
    }

    fn run_chain(&mut self, request: &TransactionRequest) -> Result<bool> {
        let segments = request.segments();
        if segments.is_empty() {
            return Err(TomeError::Registry(format!(
                "'{}' names no merx",
                request.merx
            )));
        }

        let build_in = self
            .config
            .get_string("build_in")
            .unwrap_or_else(|| DEFAULT_BUILD_IN.to_string());
        let mut engine = MerxEngine::new(
            &mut self.catalog,
            &mut self.resolver,
            &*self.registry,
            &self.paths,
            &self.config,
        )
        .with_build_in(build_in);

        for (index, merx) in segments.iter().enumerate() {
            let merx_request = MerxRequest::new(merx.as_str(), request.tomes.clone())
                .with_undo(request.undo)
                .with_next(segments[index + 1..].to_vec());

            let report = engine.run(&merx_request)?;
            if !report.succeeded() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
