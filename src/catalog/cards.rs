//! Catalog cards: the two record kinds kept in `catalog.db`.
//!
//! An [`Epitome`] is the metadata kept above a tome (where it came from, what
//! installed it, what was fetched while doing so). A [`TransactionLog`] is one
//! row of the merx journal and is written whether or not the transaction
//! completed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::provenance::FetchRecord;
use crate::TomeError;

/// Separator used when rendering a transaction's targets.
pub const TOME_SEPARATOR: &str = "; ";

/// Installation status of a tome, as last reported by a merx.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TomeStatus {
    #[default]
    NotInstalled,
    Installed,
    Failed,
}

impl TomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TomeStatus::NotInstalled => "not_installed",
            TomeStatus::Installed => "installed",
            TomeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TomeStatus {
    type Err = TomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_installed" => Ok(TomeStatus::NotInstalled),
            "installed" => Ok(TomeStatus::Installed),
            "failed" => Ok(TomeStatus::Failed),
            other => Err(TomeError::Unexpected(format!(
                "Unknown tome status in catalog: {other}"
            ))),
        }
    }
}

/// Catalog record for one tome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epitome {
    /// Row id; `None` until the record has been committed once
    pub id: Option<i64>,
    pub name: String,
    /// Not all versions follow semantic versioning
    pub version: Option<String>,
    pub status: TomeStatus,
    /// Opaque state returned by the last successful merx ("space")
    pub space: serde_json::Value,
    /// Values fetched while the last merx ran
    pub fetch_results: Vec<FetchRecord>,
    /// Repository the tome was last retrieved from
    pub retrieved_from: Option<String>,
    pub first_retrieved_on: Option<DateTime<Utc>>,
    pub last_retrieved_on: Option<DateTime<Utc>>,
    pub additional_notes: Option<String>,

    /// Location of the tome's files, only known during resolution
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

impl Epitome {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            version: None,
            status: TomeStatus::NotInstalled,
            space: serde_json::Value::Null,
            fetch_results: Vec::new(),
            retrieved_from: None,
            first_retrieved_on: None,
            last_retrieved_on: None,
            additional_notes: None,
            path: None,
        }
    }

    /// Record a successful retrieval from `source`.
    ///
    /// `first_retrieved_on` is only ever set once.
    pub fn mark_retrieved(&mut self, source: &str, when: DateTime<Utc>) {
        self.retrieved_from = Some(source.to_string());
        if self.first_retrieved_on.is_none() {
            self.first_retrieved_on = Some(when);
        }
        self.last_retrieved_on = Some(when);
        if self.version.is_none() {
            self.version = Some(String::new());
        }
    }

    pub fn is_installed(&self) -> bool {
        self.status == TomeStatus::Installed
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}

/// One journal row per top-level merx invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLog {
    pub id: Option<i64>,
    pub when: DateTime<Utc>,
    /// Full merx path, e.g. `install` or `install/verify`
    pub merx: String,
    /// Targets joined with [`TOME_SEPARATOR`]
    pub tomes: String,
    pub undo: bool,
    /// `None` while the transaction is still running
    pub result: Option<bool>,
}

impl TransactionLog {
    pub fn begin(merx: impl Into<String>, tomes: &[String], undo: bool) -> Self {
        Self {
            id: None,
            when: Utc::now(),
            merx: merx.into(),
            tomes: tomes.join(TOME_SEPARATOR),
            undo,
            result: None,
        }
    }

    pub fn targets(&self) -> Vec<&str> {
        if self.tomes.is_empty() {
            return Vec::new();
        }
        self.tomes.split(TOME_SEPARATOR).collect()
    }

    pub fn succeeded(&self) -> bool {
        self.result == Some(true)
    }
}

/// Anything that can be staged in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogCard {
    Tome(Epitome),
    Transaction(TransactionLog),
}

impl From<Epitome> for CatalogCard {
    fn from(epitome: Epitome) -> Self {
        CatalogCard::Tome(epitome)
    }
}

impl From<TransactionLog> for CatalogCard {
    fn from(log: TransactionLog) -> Self {
        CatalogCard::Transaction(log)
    }
}
