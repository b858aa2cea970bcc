//! Merx: named, transactional actions applied to tomes
//!
//! A merx (`install`, `remove`, ...) is looked up by name through a
//! [`MerxRegistry`] and run by the [`MerxEngine`] against each requested tome.
//! The engine handles resolution, idempotent skipping and catalog updates;
//! the merx itself only does the work and reports back a [`MerxOutcome`].

pub mod builtin;
pub mod context;
pub mod engine;

pub use context::MerxContext;
pub use engine::{MerxEngine, MerxPhase, MerxReport, MerxRequest, DEFAULT_BUILD_IN};

use serde_json::Value;
use std::collections::HashMap;

use crate::catalog::{Epitome, TomeStatus};
use crate::{Result, TomeError};

/// Registry kind merx are resolved under.
pub const DEFAULT_MERX_KIND: &str = "merx";

/// Result of running a merx on one tome.
#[derive(Debug, Clone, PartialEq)]
pub struct MerxOutcome {
    /// Zero on success
    pub code: i32,
    /// Status the tome is in afterwards
    pub status: TomeStatus,
    /// State to persist as the tome's space
    pub space: Value,
}

impl MerxOutcome {
    /// The tome is now installed.
    pub fn installed(space: Value) -> Self {
        Self {
            code: 0,
            status: TomeStatus::Installed,
            space,
        }
    }

    /// The tome is no longer installed.
    pub fn removed(space: Value) -> Self {
        Self {
            code: 0,
            status: TomeStatus::NotInstalled,
            space,
        }
    }

    pub fn failed(code: i32) -> Self {
        Self {
            code: if code == 0 { 1 } else { code },
            status: TomeStatus::Failed,
            space: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// An action that can be applied to, and rolled back from, a tome.
pub trait Merx {
    fn name(&self) -> &str;

    /// Whether `apply` already succeeded for this tome.
    ///
    /// Used to skip tomes that need no work: forward runs skip when this is
    /// true, undo runs skip when it is false.
    fn succeeded(&self, epitome: &Epitome) -> bool {
        epitome.status == TomeStatus::Installed
    }

    fn apply(&mut self, ctx: &mut MerxContext<'_>) -> Result<MerxOutcome>;

    /// Reverse the effect of `apply`, given the space it returned.
    fn rollback(&mut self, ctx: &mut MerxContext<'_>) -> Result<MerxOutcome>;
}

/// Resolves merx names to instances.
pub trait MerxRegistry {
    fn resolve(&self, merx: &str, kind: &str) -> Result<Box<dyn Merx>>;
}

type MerxFactory = Box<dyn Fn() -> Box<dyn Merx>>;

/// Registry backed by a fixed table of factories.
#[derive(Default)]
pub struct StaticRegistry {
    factories: HashMap<String, MerxFactory>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `install` and `remove` merx.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("install", || Box::new(builtin::InstallMerx::new()));
        registry.register("remove", || Box::new(builtin::RemoveMerx::new()));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Merx> + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl MerxRegistry for StaticRegistry {
    fn resolve(&self, merx: &str, kind: &str) -> Result<Box<dyn Merx>> {
        let factory = self.factories.get(merx).ok_or_else(|| {
            TomeError::Registry(format!("No {kind} registered under '{merx}'"))
        })?;
        Ok(factory())
    }
}
