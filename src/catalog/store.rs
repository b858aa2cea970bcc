//! SQLite-backed catalog store.
//!
//! Writes are staged with [`CatalogStore::add`] and only reach the database
//! when [`CatalogStore::commit_pending`] runs. A failed merx can therefore
//! drop everything it staged with [`CatalogStore::discard_pending`]; nothing
//! on the filesystem is undone by that, only catalog rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::cards::{CatalogCard, Epitome, TransactionLog};
use crate::provenance::FetchRecord;
use crate::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tomes (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    version TEXT,
    status TEXT NOT NULL DEFAULT 'not_installed',
    space TEXT NOT NULL DEFAULT 'null',
    fetch_results TEXT NOT NULL DEFAULT '[]',
    retrieved_from TEXT,
    first_retrieved_on TEXT,
    last_retrieved_on TEXT,
    additional_notes TEXT
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    started_at TEXT NOT NULL,
    merx TEXT NOT NULL,
    tomes TEXT NOT NULL,
    undo INTEGER NOT NULL DEFAULT 0,
    result INTEGER
);
";

const EPITOME_COLUMNS: &str = "id, name, version, status, space, fetch_results, retrieved_from, \
     first_retrieved_on, last_retrieved_on, additional_notes";

/// Durable store for epitomes and the transaction journal.
pub struct CatalogStore {
    conn: Connection,
    location: Option<PathBuf>,
    pending: Vec<CatalogCard>,
}

impl CatalogStore {
    /// Open (or create) the catalog at `path`.
    ///
    /// The schema is created when missing and left alone otherwise.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let existed = path.exists() && std::fs::metadata(path)?.len() > 0;
        let conn = Connection::open(path)?;
        if !existed {
            info!("Constructing catalog scheme at {}", path.display());
        }

        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    /// Catalog that lives only as long as the process; used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, location: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            location,
            pending: Vec::new(),
        })
    }

    /// Path of the backing database file, if any.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Look up an epitome by tome name.
    ///
    /// Staged epitomes shadow committed ones so a merx sees its own writes.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Epitome>> {
        let staged = self.pending.iter().rev().find_map(|card| match card {
            CatalogCard::Tome(epitome) if epitome.name == name => Some(epitome.clone()),
            _ => None,
        });
        if staged.is_some() {
            return Ok(staged);
        }

        let sql = format!("SELECT {EPITOME_COLUMNS} FROM tomes WHERE name = ?1");
        let row = self
            .conn
            .query_row(&sql, params![name], EpitomeRow::from_row)
            .optional()?;

        row.map(EpitomeRow::into_epitome).transpose()
    }

    /// Stage a card for the next commit.
    pub fn add(&mut self, card: impl Into<CatalogCard>) {
        let card = card.into();
        match &card {
            CatalogCard::Tome(epitome) => debug!(tome = %epitome.name, "Staged epitome"),
            CatalogCard::Transaction(log) => debug!(merx = %log.merx, "Staged transaction log"),
        }
        self.pending.push(card);
    }

    /// Number of staged, uncommitted cards.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Write every staged card in one SQL transaction.
    ///
    /// On failure nothing is written and the staged cards are kept.
    pub fn commit_pending(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        for card in &self.pending {
            match card {
                CatalogCard::Tome(epitome) => upsert_epitome(&tx, epitome)?,
                CatalogCard::Transaction(log) => insert_transaction(&tx, log)?,
            }
        }
        tx.commit()?;

        let committed = self.pending.len();
        self.pending.clear();
        debug!(committed, "Committed catalog changes");
        Ok(committed)
    }

    /// Drop every staged card.
    pub fn discard_pending(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        if discarded > 0 {
            info!(discarded, "Discarded uncommitted catalog changes");
        }
        discarded
    }

    /// All committed epitomes, ordered by name.
    pub fn tomes(&self) -> Result<Vec<Epitome>> {
        let sql = format!("SELECT {EPITOME_COLUMNS} FROM tomes ORDER BY name");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], EpitomeRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(EpitomeRow::into_epitome).collect()
    }

    /// The committed transaction journal, oldest first.
    pub fn transactions(&self) -> Result<Vec<TransactionLog>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, merx, tomes, undo, result FROM transactions ORDER BY id",
        )?;
        let logs = stmt
            .query_map([], |row| {
                Ok(TransactionLog {
                    id: Some(row.get(0)?),
                    when: row.get(1)?,
                    merx: row.get(2)?,
                    tomes: row.get(3)?,
                    undo: row.get(4)?,
                    result: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }
}

fn upsert_epitome(conn: &Connection, epitome: &Epitome) -> Result<()> {
    conn.execute(
        "INSERT INTO tomes(
            name, version, status, space, fetch_results, retrieved_from,
            first_retrieved_on, last_retrieved_on, additional_notes
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(name) DO UPDATE SET
            version = excluded.version,
            status = excluded.status,
            space = excluded.space,
            fetch_results = excluded.fetch_results,
            retrieved_from = excluded.retrieved_from,
            first_retrieved_on = excluded.first_retrieved_on,
            last_retrieved_on = excluded.last_retrieved_on,
            additional_notes = excluded.additional_notes",
        params![
            epitome.name,
            epitome.version,
            epitome.status.as_str(),
            serde_json::to_string(&epitome.space)?,
            serde_json::to_string(&epitome.fetch_results)?,
            epitome.retrieved_from,
            epitome.first_retrieved_on,
            epitome.last_retrieved_on,
            epitome.additional_notes,
        ],
    )?;
    Ok(())
}

fn insert_transaction(conn: &Connection, log: &TransactionLog) -> Result<()> {
    conn.execute(
        "INSERT INTO transactions(started_at, merx, tomes, undo, result)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![log.when, log.merx, log.tomes, log.undo, log.result],
    )?;
    Ok(())
}

/// Raw column values; JSON columns are decoded outside the row callback.
struct EpitomeRow {
    id: i64,
    name: String,
    version: Option<String>,
    status: String,
    space: String,
    fetch_results: String,
    retrieved_from: Option<String>,
    first_retrieved_on: Option<DateTime<Utc>>,
    last_retrieved_on: Option<DateTime<Utc>>,
    additional_notes: Option<String>,
}

impl EpitomeRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            version: row.get(2)?,
            status: row.get(3)?,
            space: row.get(4)?,
            fetch_results: row.get(5)?,
            retrieved_from: row.get(6)?,
            first_retrieved_on: row.get(7)?,
            last_retrieved_on: row.get(8)?,
            additional_notes: row.get(9)?,
        })
    }

    fn into_epitome(self) -> Result<Epitome> {
        let fetch_results: Vec<FetchRecord> = serde_json::from_str(&self.fetch_results)?;
        Ok(Epitome {
            id: Some(self.id),
            name: self.name,
            version: self.version,
            status: self.status.parse()?,
            space: serde_json::from_str(&self.space)?,
            fetch_results,
            retrieved_from: self.retrieved_from,
            first_retrieved_on: self.first_retrieved_on,
            last_retrieved_on: self.last_retrieved_on,
            additional_notes: self.additional_notes,
            path: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TomeStatus;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_add_is_not_durable_until_commit() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("catalog.db");

        let mut store = CatalogStore::open(&db_path).unwrap();
        store.add(Epitome::new("hollow"));
        assert!(store.find_by_name("hollow").unwrap().is_some());
        assert_eq!(store.pending_len(), 1);

        // A second session only sees committed rows
        let other = CatalogStore::open(&db_path).unwrap();
        assert!(other.find_by_name("hollow").unwrap().is_none());

        store.commit_pending().unwrap();
        let other = CatalogStore::open(&db_path).unwrap();
        let found = other.find_by_name("hollow").unwrap().unwrap();
        assert!(found.is_persisted());
        assert_eq!(found.status, TomeStatus::NotInstalled);
    }

    #[test]
    fn test_discard_drops_staged_cards() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        store.add(Epitome::new("hollow"));
        store.add(TransactionLog::begin("install", &["hollow".to_string()], false));

        assert_eq!(store.discard_pending(), 2);
        assert_eq!(store.commit_pending().unwrap(), 0);
        assert!(store.find_by_name("hollow").unwrap().is_none());
        assert!(store.transactions().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_keeps_identity() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        store.add(Epitome::new("hollow"));
        store.commit_pending().unwrap();
        let first = store.find_by_name("hollow").unwrap().unwrap();

        let mut updated = first.clone();
        updated.status = TomeStatus::Installed;
        updated.space = serde_json::json!({"files": ["bin/hollow"]});
        updated.fetch_results.push(FetchRecord::new("exe_path", "config", "/opt/bin"));
        store.add(updated);
        store.commit_pending().unwrap();

        let second = store.find_by_name("hollow").unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.status, TomeStatus::Installed);
        assert_eq!(second.space["files"][0], "bin/hollow");
        assert_eq!(second.fetch_results.len(), 1);
        assert_eq!(store.tomes().unwrap().len(), 1);
    }

    #[test]
    fn test_latest_staged_epitome_wins() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        let mut epitome = Epitome::new("hollow");
        store.add(epitome.clone());
        epitome.version = Some("2.0".to_string());
        store.add(epitome);

        let found = store.find_by_name("hollow").unwrap().unwrap();
        assert_eq!(found.version.as_deref(), Some("2.0"));
    }

    #[test]
    fn test_transactions_round_trip() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        let mut log = TransactionLog::begin("install", &["hollow".to_string()], true);
        log.result = Some(false);
        store.add(log.clone());
        store.commit_pending().unwrap();

        let logs = store.transactions().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].merx, "install");
        assert_eq!(logs[0].tomes, "hollow");
        assert!(logs[0].undo);
        assert_eq!(logs[0].result, Some(false));
        assert_eq!(logs[0].when, log.when);
    }

    #[test]
    fn test_reopening_existing_catalog_is_a_noop() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("catalog.db");

        let mut store = CatalogStore::open(&db_path).unwrap();
        store.add(Epitome::new("hollow"));
        store.commit_pending().unwrap();
        drop(store);

        let store = CatalogStore::open(&db_path).unwrap();
        assert_eq!(store.tomes().unwrap().len(), 1);
        assert_eq!(store.location(), Some(db_path.as_path()));
    }
}
