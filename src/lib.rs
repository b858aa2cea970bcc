//! Tomekeeper tracks tomes (software packages) through a persistent catalog
//! and runs pluggable install/remove actions (merx) on them as journaled
//! transactions.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod io;
pub mod merx;
pub mod provenance;
pub mod resolver;
pub mod transaction;

pub use error::{Result, TomeError};
