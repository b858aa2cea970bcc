//! Built-in `install` and `remove` merx.
//!
//! A tome lays out its payload by install location: `<tome>/exe`, `<tome>/inc`
//! and `<tome>/lib` are copied into the matching selected path. The files put
//! in place are recorded in the tome's space so they can be removed again.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{Merx, MerxContext, MerxOutcome};
use crate::catalog::Epitome;
use crate::{Result, TomeError};

/// Copies a tome's payload into the selected install paths.
#[derive(Debug, Default)]
pub struct InstallMerx;

impl InstallMerx {
    pub fn new() -> Self {
        Self
    }
}

impl Merx for InstallMerx {
    fn name(&self) -> &str {
        "install"
    }

    fn apply(&mut self, ctx: &mut MerxContext<'_>) -> Result<MerxOutcome> {
        place_files(ctx)
    }

    fn rollback(&mut self, ctx: &mut MerxContext<'_>) -> Result<MerxOutcome> {
        remove_files(ctx)
    }
}

/// Deletes the files a previous install put in place.
#[derive(Debug, Default)]
pub struct RemoveMerx;

impl RemoveMerx {
    pub fn new() -> Self {
        Self
    }
}

impl Merx for RemoveMerx {
    fn name(&self) -> &str {
        "remove"
    }

    fn succeeded(&self, epitome: &Epitome) -> bool {
        !epitome.is_installed()
    }

    fn apply(&mut self, ctx: &mut MerxContext<'_>) -> Result<MerxOutcome> {
        remove_files(ctx)
    }

    fn rollback(&mut self, ctx: &mut MerxContext<'_>) -> Result<MerxOutcome> {
        place_files(ctx)
    }
}

/// Every file under each `<tome>/<selector>` paired with its destination.
fn plan(ctx: &MerxContext<'_>) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut copies = Vec::new();

    for (selector, destination) in ctx.paths.iter() {
        let source = ctx.path.join(selector);
        if !source.is_dir() {
            continue;
        }

        for entry in WalkDir::new(&source).sort_by_file_name() {
            let entry = entry.map_err(|e| TomeError::Io(e.into()))?;
            if entry.file_type().is_dir() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&source)
                .map_err(|e| TomeError::Path(e.to_string()))?;
            copies.push((entry.path().to_path_buf(), destination.join(relative)));
        }
    }

    Ok(copies)
}

fn place_files(ctx: &mut MerxContext<'_>) -> Result<MerxOutcome> {
    let overwrite = ctx.fetch_or("overwrite", false).as_bool().unwrap_or(false);
    let copies = plan(ctx)?;

    if !overwrite {
        let conflicts: Vec<&Path> = copies
            .iter()
            .map(|(_, target)| target.as_path())
            .filter(|target| target.exists())
            .collect();
        if let Some(first) = conflicts.first() {
            ctx.emit(format!(
                "Refusing to overwrite {} existing file(s), starting with {}",
                conflicts.len(),
                first.display()
            ));
            return Ok(MerxOutcome::failed(1));
        }
    }

    let mut installed = Vec::with_capacity(copies.len());
    for (source, target) in &copies {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!("Copying {} to {}", source.display(), target.display());
        std::fs::copy(source, target)?;
        installed.push(Value::String(target.to_string_lossy().to_string()));
    }

    ctx.emit(format!("Installed {} file(s) for {}", installed.len(), ctx.name));
    Ok(MerxOutcome::installed(json!({ "files": installed })))
}

fn remove_files(ctx: &mut MerxContext<'_>) -> Result<MerxOutcome> {
    let files: Vec<PathBuf> = ctx
        .space
        .get("files")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(Value::as_str)
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default();

    let mut removed = 0;
    for file in &files {
        match std::fs::remove_file(file) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} was already gone", file.display());
            }
            Err(e) => return Err(e.into()),
        }
    }

    ctx.emit(format!("Removed {} file(s) for {}", removed, ctx.name));
    Ok(MerxOutcome::removed(Value::Null))
}
