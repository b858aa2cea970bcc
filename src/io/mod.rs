pub mod paths;

pub use paths::{select_paths, LibraryPaths, PathSelector, SelectedPaths};
