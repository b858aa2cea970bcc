//! Execution of one merx across a list of tomes.
//!
//! Tomes are processed strictly in order. A tome whose files cannot be found
//! is skipped (and fails the invocation without stopping it); a merx that
//! reports a non-zero code stops the invocation. Tomes processed before the
//! failure keep their staged catalog updates.
//!
//! Only successful merx change an epitome's status and space. Tomes that are
//! skipped, or whose undo fails, are staged only when they were just
//! retrieved, and then only to keep the retrieval details.

use std::collections::HashMap;
use tracing::{debug, error, info, info_span, trace};

use super::context::{ContextHandles, MerxContext};
use super::{Merx, MerxRegistry, DEFAULT_MERX_KIND};
use crate::catalog::{CatalogStore, Epitome, TomeStatus};
use crate::config::Config;
use crate::io::SelectedPaths;
use crate::provenance::{FetchRecorder, RecorderScope};
use crate::resolver::{TomeResolver, DEFAULT_TOME_KIND};
use crate::{Result, TomeError};

/// Directory inside a tome that merx build in unless configured otherwise.
pub const DEFAULT_BUILD_IN: &str = "build";

/// Where the engine is in processing the current tome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MerxPhase {
    Idle,
    Resolving,
    Invoking,
    Undoing,
    Recording,
    Succeeded,
    Failed,
}

/// One merx to run over a list of tomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerxRequest {
    pub merx: String,
    pub tomes: Vec<String>,
    pub undo: bool,
    /// Registry kind the merx is resolved under
    pub kind: String,
    /// Suffix tomes are staged with
    pub tome_kind: String,
    /// Merx scheduled after this one in the same transaction
    pub next: Vec<String>,
}

impl MerxRequest {
    pub fn new(merx: impl Into<String>, tomes: Vec<String>) -> Self {
        Self {
            merx: merx.into(),
            tomes,
            undo: false,
            kind: DEFAULT_MERX_KIND.to_string(),
            tome_kind: DEFAULT_TOME_KIND.to_string(),
            next: Vec::new(),
        }
    }

    pub fn with_undo(mut self, undo: bool) -> Self {
        self.undo = undo;
        self
    }

    pub fn with_next(mut self, next: Vec<String>) -> Self {
        self.next = next;
        self
    }
}

/// What happened to each tome of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerxReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
    /// Tomes whose files could not be found or retrieved
    pub missing: Vec<String>,
    /// Tome whose merx reported failure; processing stopped there
    pub failed: Option<String>,
}

impl MerxReport {
    pub fn succeeded(&self) -> bool {
        self.failed.is_none() && self.missing.is_empty()
    }
}

enum TomeOutcome {
    Applied,
    Skipped,
    Missing,
    Failed,
}

/// Runs merx against tomes and folds the results into the catalog.
pub struct MerxEngine<'a> {
    catalog: &'a mut CatalogStore,
    resolver: &'a mut TomeResolver,
    registry: &'a dyn MerxRegistry,
    paths: &'a SelectedPaths,
    config: &'a Config,
    build_in: String,
    /// Merx instances by name, reused across tomes and requests
    cache: HashMap<String, Box<dyn Merx>>,
    recorder: FetchRecorder,
    events: Vec<String>,
    phase: MerxPhase,
}

impl<'a> MerxEngine<'a> {
    pub fn new(
        catalog: &'a mut CatalogStore,
        resolver: &'a mut TomeResolver,
        registry: &'a dyn MerxRegistry,
        paths: &'a SelectedPaths,
        config: &'a Config,
    ) -> Self {
        Self {
            catalog,
            resolver,
            registry,
            paths,
            config,
            build_in: DEFAULT_BUILD_IN.to_string(),
            cache: HashMap::new(),
            recorder: FetchRecorder::new(),
            events: Vec::new(),
            phase: MerxPhase::Idle,
        }
    }

    pub fn with_build_in(mut self, build_in: impl Into<String>) -> Self {
        self.build_in = build_in.into();
        self
    }

    pub fn phase(&self) -> MerxPhase {
        self.phase
    }

    /// Events emitted by merx so far.
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// Number of distinct merx instantiated by this engine.
    pub fn cached_merx(&self) -> usize {
        self.cache.len()
    }

    /// Run `request` over its tomes, in order.
    ///
    /// Errors raised by a merx (as opposed to a non-zero code) are returned
    /// as-is; whatever was staged before them stays staged.
    pub fn run(&mut self, request: &MerxRequest) -> Result<MerxReport> {
        let span = info_span!("merx", merx = %request.merx, undo = request.undo);
        let _enter = span.enter();

        info!(
            "Initiating Transaction {} for {}",
            request.merx,
            request.tomes.join(", ")
        );

        let mut report = MerxReport::default();
        for tome in &request.tomes {
            let outcome = match self.run_tome(request, tome) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.set_phase(MerxPhase::Failed);
                    return Err(e);
                }
            };

            match outcome {
                TomeOutcome::Applied => report.applied.push(tome.clone()),
                TomeOutcome::Skipped => report.skipped.push(tome.clone()),
                TomeOutcome::Missing => report.missing.push(tome.clone()),
                TomeOutcome::Failed => {
                    report.failed = Some(tome.clone());
                    break;
                }
            }
        }

        if report.succeeded() {
            self.set_phase(MerxPhase::Succeeded);
        } else {
            self.set_phase(MerxPhase::Failed);
        }
        Ok(report)
    }

    fn set_phase(&mut self, phase: MerxPhase) {
        trace!(?phase, "Merx phase");
        self.phase = phase;
    }

    fn ensure_cached(&mut self, merx: &str, kind: &str) -> Result<()> {
        if !self.cache.contains_key(merx) {
            debug!("Instantiating {} {}", kind, merx);
            let instance = self.registry.resolve(merx, kind)?;
            self.cache.insert(merx.to_string(), instance);
        }
        Ok(())
    }

    fn run_tome(&mut self, request: &MerxRequest, tome: &str) -> Result<TomeOutcome> {
        let span = info_span!("tome", name = %tome);
        let _enter = span.enter();

        self.set_phase(MerxPhase::Resolving);
        let known_retrieval = self
            .catalog
            .find_by_name(tome)
            .ok()
            .flatten()
            .and_then(|known| known.last_retrieved_on);
        let mut epitome = self
            .resolver
            .resolve(self.catalog, tome, &request.tome_kind, true);
        let retrieved = epitome.last_retrieved_on != known_retrieval;
        if epitome.path.is_none() {
            error!("Could not find files for {}.", tome);
            return Ok(TomeOutcome::Missing);
        }

        self.ensure_cached(&request.merx, &request.kind)?;
        let merx = self.cache.get_mut(&request.merx).ok_or_else(|| {
            TomeError::Registry(format!("{} vanished from the merx cache", request.merx))
        })?;

        let done = merx.succeeded(&epitome);
        if !request.undo && done {
            info!("Skipping {} for {}; it appears to be done already.", request.merx, tome);
            stage_retrieval(self.catalog, epitome, retrieved);
            return Ok(TomeOutcome::Skipped);
        }
        if request.undo && !done {
            info!("Skipping undo of {} for {}; nothing to undo.", request.merx, tome);
            stage_retrieval(self.catalog, epitome, retrieved);
            return Ok(TomeOutcome::Skipped);
        }

        self.phase = if request.undo {
            MerxPhase::Undoing
        } else {
            MerxPhase::Invoking
        };
        trace!(phase = ?self.phase, "Merx phase");

        let mut recorder = RecorderScope::new(&mut self.recorder);
        let outcome = {
            let mut ctx = MerxContext::new(
                &epitome,
                request.undo,
                ContextHandles {
                    paths: self.paths,
                    build_in: &self.build_in,
                    next: &request.next,
                    config: self.config,
                    observer: &mut *recorder,
                    events: &mut self.events,
                    catalog: &*self.catalog,
                    resolver: &mut *self.resolver,
                },
            )?;

            if request.undo {
                merx.rollback(&mut ctx)?
            } else {
                merx.apply(&mut ctx)?
            }
        };

        self.phase = MerxPhase::Recording;
        if !outcome.is_success() {
            let failure = TomeError::Action {
                merx: request.merx.clone(),
                tome: tome.to_string(),
                code: outcome.code,
            };
            error!("{}", failure);
            if request.undo {
                // Whatever apply left behind is still there; keep the status
                // so the undo can be retried.
                stage_retrieval(self.catalog, epitome, retrieved);
            } else {
                epitome.status = TomeStatus::Failed;
                self.catalog.add(epitome);
            }
            return Ok(TomeOutcome::Failed);
        }

        epitome.status = outcome.status;
        epitome.space = outcome.space;
        epitome.fetch_results = recorder.snapshot();
        drop(recorder);

        debug!(status = %epitome.status, "Recording {}", tome);
        self.catalog.add(epitome);
        Ok(TomeOutcome::Applied)
    }
}

/// Stage an epitome the merx did not change, but only if it was just
/// retrieved, so the new retrieval details are kept.
fn stage_retrieval(catalog: &mut CatalogStore, epitome: Epitome, retrieved: bool) {
    if retrieved {
        debug!("Recording retrieval of {}", epitome.name);
        catalog.add(epitome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::DirectoryFetcher;
    use crate::merx::{MerxOutcome, StaticRegistry};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Calls {
        applied: Vec<String>,
        rolled_back: Vec<String>,
        build_dirs: Vec<std::path::PathBuf>,
        created: usize,
        fail_next_rollback: bool,
    }

    /// Merx that succeeds unless the tome name starts with "bad".
    ///
    /// Also fetches `<tome>_notes`, which only gets recorded when configured.
    struct ScriptedMerx {
        calls: Rc<RefCell<Calls>>,
    }

    impl Merx for ScriptedMerx {
        fn name(&self) -> &str {
            "scripted"
        }

        fn apply(&mut self, ctx: &mut MerxContext<'_>) -> Result<MerxOutcome> {
            self.calls.borrow_mut().applied.push(ctx.name.clone());
            if ctx.name.starts_with("bad") {
                return Ok(MerxOutcome::failed(2));
            }
            self.calls.borrow_mut().build_dirs.push(ctx.build_dir());
            let prefix = ctx.fetch_or("prefix", "/opt");
            let notes_key = format!("{}_notes", ctx.name);
            let notes = ctx.fetch_string(&notes_key);
            Ok(MerxOutcome::installed(json!({ "prefix": prefix, "notes": notes })))
        }

        fn rollback(&mut self, ctx: &mut MerxContext<'_>) -> Result<MerxOutcome> {
            let mut calls = self.calls.borrow_mut();
            calls.rolled_back.push(ctx.name.clone());
            assert_eq!(ctx.space["prefix"], "/opt");
            if std::mem::take(&mut calls.fail_next_rollback) {
                return Ok(MerxOutcome::failed(3));
            }
            Ok(MerxOutcome::removed(json!(null)))
        }
    }

    struct Harness {
        temp_dir: TempDir,
        catalog: CatalogStore,
        resolver: TomeResolver,
        registry: StaticRegistry,
        paths: SelectedPaths,
        config: Config,
        calls: Rc<RefCell<Calls>>,
    }

    impl Harness {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let repo = temp_dir.path().join("repo");
            for name in ["hollow", "bad", "after"] {
                std::fs::create_dir_all(repo.join(format!("{name}.tome"))).unwrap();
            }

            let calls = Rc::new(RefCell::new(Calls::default()));
            let mut registry = StaticRegistry::new();
            let shared = Rc::clone(&calls);
            registry.register("scripted", move || {
                shared.borrow_mut().created += 1;
                Box::new(ScriptedMerx {
                    calls: Rc::clone(&shared),
                })
            });

            let resolver = TomeResolver::new(
                temp_dir.path().join("tmp"),
                Box::new(DirectoryFetcher::new(repo.to_string_lossy(), temp_dir.path())),
            );

            Self {
                catalog: CatalogStore::open_in_memory().unwrap(),
                resolver,
                registry,
                paths: SelectedPaths::new(),
                config: Config::new().without_environment(),
                calls,
                temp_dir,
            }
        }

        fn run(&mut self, request: MerxRequest) -> Result<MerxReport> {
            let mut engine = MerxEngine::new(
                &mut self.catalog,
                &mut self.resolver,
                &self.registry,
                &self.paths,
                &self.config,
            );
            engine.run(&request)
        }

        fn epitome(&self, name: &str) -> Epitome {
            self.catalog.find_by_name(name).unwrap().unwrap()
        }
    }

    fn tomes(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_apply_updates_epitome() {
        let mut harness = Harness::new();

        let report = harness
            .run(MerxRequest::new("scripted", tomes(&["hollow"])))
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.applied, tomes(&["hollow"]));
        let epitome = harness.epitome("hollow");
        assert_eq!(epitome.status, TomeStatus::Installed);
        assert_eq!(epitome.space, json!({"prefix": "/opt", "notes": null}));
        assert_eq!(epitome.fetch_results.len(), 1);
        assert_eq!(epitome.fetch_results[0].location, "default");
    }

    #[test]
    fn test_second_apply_is_skipped() {
        let mut harness = Harness::new();
        harness
            .run(MerxRequest::new("scripted", tomes(&["hollow"])))
            .unwrap();

        let report = harness
            .run(MerxRequest::new("scripted", tomes(&["hollow"])))
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.skipped, tomes(&["hollow"]));
        assert_eq!(harness.calls.borrow().applied.len(), 1);
    }

    #[test]
    fn test_undo_without_prior_success_is_skipped() {
        let mut harness = Harness::new();

        let report = harness
            .run(MerxRequest::new("scripted", tomes(&["hollow"])).with_undo(true))
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.skipped, tomes(&["hollow"]));
        assert!(harness.calls.borrow().rolled_back.is_empty());
    }

    #[test]
    fn test_undo_calls_rollback_with_stored_space() {
        let mut harness = Harness::new();
        harness
            .run(MerxRequest::new("scripted", tomes(&["hollow"])))
            .unwrap();

        let report = harness
            .run(MerxRequest::new("scripted", tomes(&["hollow"])).with_undo(true))
            .unwrap();

        assert_eq!(report.applied, tomes(&["hollow"]));
        assert_eq!(harness.calls.borrow().rolled_back, tomes(&["hollow"]));
        assert_eq!(harness.epitome("hollow").status, TomeStatus::NotInstalled);
    }

    #[test]
    fn test_failure_stops_remaining_tomes() {
        let mut harness = Harness::new();

        let report = harness
            .run(MerxRequest::new("scripted", tomes(&["hollow", "bad", "after"])))
            .unwrap();

        assert!(!report.succeeded());
        assert_eq!(report.applied, tomes(&["hollow"]));
        assert_eq!(report.failed.as_deref(), Some("bad"));
        assert_eq!(harness.calls.borrow().applied, tomes(&["hollow", "bad"]));
        assert_eq!(harness.epitome("hollow").status, TomeStatus::Installed);
        assert_eq!(harness.epitome("bad").status, TomeStatus::Failed);
        assert!(harness.catalog.find_by_name("after").unwrap().is_none());
    }

    #[test]
    fn test_missing_tome_is_skipped_but_fails_invocation() {
        let mut harness = Harness::new();

        let report = harness
            .run(MerxRequest::new("scripted", tomes(&["ghost", "hollow"])))
            .unwrap();

        assert!(!report.succeeded());
        assert_eq!(report.missing, tomes(&["ghost"]));
        assert_eq!(report.applied, tomes(&["hollow"]));
    }

    #[test]
    fn test_merx_instantiated_once_per_engine() {
        let mut harness = Harness::new();
        std::fs::create_dir_all(harness.temp_dir.path().join("tmp/second.tome")).unwrap();

        let mut engine = MerxEngine::new(
            &mut harness.catalog,
            &mut harness.resolver,
            &harness.registry,
            &harness.paths,
            &harness.config,
        );
        let report = engine
            .run(&MerxRequest::new("scripted", tomes(&["hollow", "second"])))
            .unwrap();

        assert_eq!(report.applied.len(), 2);
        assert_eq!(engine.cached_merx(), 1);
        assert_eq!(engine.phase(), MerxPhase::Succeeded);
        drop(engine);
        assert_eq!(harness.calls.borrow().created, 1);
    }

    #[test]
    fn test_unknown_merx_is_an_error() {
        let mut harness = Harness::new();

        let err = harness
            .run(MerxRequest::new("frobnicate", tomes(&["hollow"])))
            .unwrap_err();
        assert!(matches!(err, TomeError::Registry(_)));
    }

    #[test]
    fn test_failed_undo_can_be_retried() {
        let mut harness = Harness::new();
        harness
            .run(MerxRequest::new("scripted", tomes(&["hollow"])))
            .unwrap();
        harness.calls.borrow_mut().fail_next_rollback = true;

        let report = harness
            .run(MerxRequest::new("scripted", tomes(&["hollow"])).with_undo(true))
            .unwrap();
        assert_eq!(report.failed.as_deref(), Some("hollow"));
        let epitome = harness.epitome("hollow");
        assert_eq!(epitome.status, TomeStatus::Installed);
        assert_eq!(epitome.space["prefix"], "/opt");

        let report = harness
            .run(MerxRequest::new("scripted", tomes(&["hollow"])).with_undo(true))
            .unwrap();
        assert!(report.succeeded());
        assert_eq!(report.applied, tomes(&["hollow"]));
        assert_eq!(harness.calls.borrow().rolled_back, tomes(&["hollow", "hollow"]));
        assert_eq!(harness.epitome("hollow").status, TomeStatus::NotInstalled);
    }

    #[test]
    fn test_provenance_does_not_leak_between_tomes() {
        let mut harness = Harness::new();
        std::fs::create_dir_all(harness.temp_dir.path().join("tmp/second.tome")).unwrap();
        harness.config.set_override("hollow_notes", "first");
        harness.config.set_override("second_notes", "second");

        harness
            .run(MerxRequest::new("scripted", tomes(&["hollow", "second"])))
            .unwrap();

        let fetched = |name: &str| -> Vec<(String, String)> {
            harness
                .epitome(name)
                .fetch_results
                .into_iter()
                .map(|record| (record.var_name, record.value))
                .collect()
        };
        assert_eq!(
            fetched("hollow"),
            vec![
                ("prefix".to_string(), "/opt".to_string()),
                ("hollow_notes".to_string(), "first".to_string())
            ]
        );
        assert_eq!(
            fetched("second"),
            vec![
                ("prefix".to_string(), "/opt".to_string()),
                ("second_notes".to_string(), "second".to_string())
            ]
        );
    }

    #[test]
    fn test_skipped_tome_keeps_fresh_retrieval() {
        let mut harness = Harness::new();

        harness
            .run(MerxRequest::new("scripted", tomes(&["hollow"])).with_undo(true))
            .unwrap();
        assert_eq!(harness.catalog.pending_len(), 1);
        let epitome = harness.epitome("hollow");
        assert_eq!(epitome.status, TomeStatus::NotInstalled);
        assert!(epitome.retrieved_from.is_some());
        assert!(epitome.fetch_results.is_empty());

        // Already staged locally: nothing new to record
        harness
            .run(MerxRequest::new("scripted", tomes(&["hollow"])).with_undo(true))
            .unwrap();
        assert_eq!(harness.catalog.pending_len(), 1);
    }

    #[test]
    fn test_build_dir_follows_engine_setting() {
        let mut harness = Harness::new();

        let mut engine = MerxEngine::new(
            &mut harness.catalog,
            &mut harness.resolver,
            &harness.registry,
            &harness.paths,
            &harness.config,
        )
        .with_build_in("scratch");
        engine
            .run(&MerxRequest::new("scripted", tomes(&["hollow"])))
            .unwrap();
        drop(engine);

        let staged = harness.temp_dir.path().join("tmp/hollow.tome");
        assert_eq!(harness.calls.borrow().build_dirs, vec![staged.join("scratch")]);
    }
}
