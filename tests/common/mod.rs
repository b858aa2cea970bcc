#![allow(dead_code)]

use serde_json::json;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use tomekeeper::config::Config;
use tomekeeper::io::LibraryPaths;
use tomekeeper::transaction::{TransactionCoordinator, TransactionRequest};

/// A scratch library with a local tome repository and private install paths.
pub struct TestLibrary {
    pub temp_dir: TempDir,
    pub library: LibraryPaths,
    pub repo: PathBuf,
    pub install_root: PathBuf,
}

impl TestLibrary {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let library = LibraryPaths::at(temp_dir.path().join("eons"));
        let repo = temp_dir.path().join("repo");
        let install_root = temp_dir.path().join("usr");

        std::fs::create_dir_all(&library.root).unwrap();
        std::fs::create_dir_all(&repo).unwrap();
        for dir in ["bin", "include", "lib"] {
            std::fs::create_dir_all(install_root.join(dir)).unwrap();
        }

        let config = json!({
            "repo_url": repo.to_string_lossy(),
            "exe_path": install_root.join("bin").to_string_lossy(),
            "inc_path": install_root.join("include").to_string_lossy(),
            "lib_path": install_root.join("lib").to_string_lossy(),
        });
        std::fs::write(
            library.config_file(),
            serde_json::to_string_pretty(&config).unwrap(),
        )
        .unwrap();

        let test_library = Self {
            temp_dir,
            library,
            repo,
            install_root,
        };
        test_library.publish("hollow", &[("exe/hollow", "#!/bin/sh\necho hollow\n"), ("inc/hollow.h", "#pragma once\n")]);
        test_library
    }

    /// Put a tome into the repository.
    pub fn publish(&self, name: &str, files: &[(&str, &str)]) {
        let tome = self.repo.join(format!("{name}.tome"));
        std::fs::create_dir_all(&tome).unwrap();
        for (relative, contents) in files {
            let path = tome.join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
    }

    /// A fresh session, as a new process would open it.
    pub fn coordinator(&self) -> TransactionCoordinator {
        let config = Config::load(&self.library.config_file())
            .unwrap()
            .without_environment();
        TransactionCoordinator::for_library(&self.library, config).unwrap()
    }

    /// Run one invocation in a fresh session.
    pub fn run(&self, merx: &str, names: &[&str], undo: bool) -> tomekeeper::catalog::TransactionLog {
        let mut coordinator = self.coordinator();
        coordinator.execute(&TransactionRequest::new(merx, tomes(names)).with_undo(undo))
    }

    pub fn installed(&self, relative: &str) -> PathBuf {
        self.install_root.join(relative)
    }

    pub fn staged(&self, name: &str) -> PathBuf {
        self.library.tome_dir().join(format!("{name}.tome"))
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }
}

pub fn tomes(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}
