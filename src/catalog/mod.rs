//! The tome catalog (`catalog.db`)
//!
//! Holds one [`Epitome`] per tome a merx has run on and one [`TransactionLog`]
//! per merx invocation. Rows are never deleted: removing a tome updates its
//! epitome instead of erasing it, so the history stays intact.

mod cards;
mod store;

pub use cards::{CatalogCard, Epitome, TomeStatus, TransactionLog, TOME_SEPARATOR};
pub use store::CatalogStore;
