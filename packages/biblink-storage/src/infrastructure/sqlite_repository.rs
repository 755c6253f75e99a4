//! SQLite Repository
//!
//! Output records, their REPLACED history and the link table. Usually opened
//! through [`SqliteStore::repository`](super::SqliteStore::repository) so it
//! shares the store's connection.
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::models::{BibReferences, FrbrLevel, OutputRecord, RecordId, RecordStatus};
use crate::domain::ports::LinkGraph;
use crate::error::{Result, StorageError};

const RECORD_COLUMNS: &str = "record_id, level, status, predecessor_id, references_json, updated_at";

#[derive(Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

/// Raw column values of one record row
struct RecordRow {
    id: RecordId,
    level: String,
    status: String,
    predecessor_id: Option<RecordId>,
    references_json: Option<String>,
    updated_at: DateTime<Utc>,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            level: row.get(1)?,
            status: row.get(2)?,
            predecessor_id: row.get(3)?,
            references_json: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<OutputRecord> {
        let status_char = self
            .status
            .chars()
            .next()
            .ok_or_else(|| StorageError::serialization("empty record status"))?;
        let references = match self.references_json {
            Some(json) => Some(serde_json::from_str::<BibReferences>(&json)?),
            None => None,
        };
        Ok(OutputRecord {
            id: self.id,
            level: FrbrLevel::from_str(&self.level)?,
            status: RecordStatus::from_char(status_char)?,
            predecessor_id: self.predecessor_id,
            references,
            updated_at: self.updated_at,
        })
    }
}

impl SqliteRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(Arc::new(Mutex::new(conn)))
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(Arc::new(Mutex::new(conn)))
    }

    pub(crate) fn with_connection(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        let repo = Self { conn };
        repo.init_schema()?;
        Ok(repo)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                record_id INTEGER PRIMARY KEY,
                level TEXT NOT NULL,
                status TEXT NOT NULL,
                predecessor_id INTEGER,
                references_json TEXT,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_records_level ON records(level)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_records_predecessor ON records(predecessor_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS record_history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id INTEGER NOT NULL,
                level TEXT NOT NULL,
                status TEXT NOT NULL,
                predecessor_id INTEGER,
                references_json TEXT,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_history_record ON record_history(record_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS links (
                from_id INTEGER NOT NULL,
                to_id INTEGER NOT NULL,
                PRIMARY KEY (from_id, to_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_links_to ON links(to_id)",
            [],
        )?;

        Ok(())
    }

    /// Superseded copies of `id`, oldest first
    pub fn history(&self, id: RecordId) -> Result<Vec<OutputRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM record_history WHERE record_id = ?1 ORDER BY seq",
            RECORD_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![id], RecordRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RecordRow::into_record).collect()
    }

    /// Number of records currently materialized
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn references_json(record: &OutputRecord) -> Result<Option<String>> {
    Ok(match &record.references {
        Some(refs) => Some(serde_json::to_string(refs)?),
        None => None,
    })
}

impl LinkGraph for SqliteRepository {
    fn get_record(&self, id: RecordId) -> Result<Option<OutputRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM records WHERE record_id = ?1", RECORD_COLUMNS),
                params![id],
                RecordRow::from_row,
            )
            .optional()?;
        row.map(RecordRow::into_record).transpose()
    }

    fn add_record(&self, record: OutputRecord) -> Result<()> {
        let refs = references_json(&record)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        // Move the current copy, if any, into history as REPLACED
        tx.execute(
            &format!(
                "INSERT INTO record_history ({cols})
                 SELECT record_id, level, ?2, predecessor_id, references_json, ?3
                 FROM records WHERE record_id = ?1",
                cols = RECORD_COLUMNS
            ),
            params![
                record.id,
                RecordStatus::Replaced.as_char().to_string(),
                Utc::now()
            ],
        )?;
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO records ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                RECORD_COLUMNS
            ),
            params![
                record.id,
                record.level.as_str(),
                record.status.as_char().to_string(),
                record.predecessor_id,
                refs,
                record.updated_at
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn successors_of(&self, predecessor_id: RecordId) -> Result<Vec<RecordId>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT record_id FROM records WHERE predecessor_id = ?1 ORDER BY record_id")?;
        let ids = stmt
            .query_map(params![predecessor_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<RecordId>>>()?;
        Ok(ids)
    }

    fn get_linked_record_ids(&self, to_id: RecordId) -> Result<Vec<RecordId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT from_id FROM links WHERE to_id = ?1 ORDER BY from_id")?;
        let ids = stmt
            .query_map(params![to_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<RecordId>>>()?;
        Ok(ids)
    }

    fn get_linked_to_record_ids(&self, from_id: RecordId) -> Result<Vec<RecordId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT to_id FROM links WHERE from_id = ?1 ORDER BY to_id")?;
        let ids = stmt
            .query_map(params![from_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<RecordId>>>()?;
        Ok(ids)
    }

    fn add_link(&self, from_id: RecordId, to_id: RecordId) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO links (from_id, to_id) VALUES (?1, ?2)",
            params![from_id, to_id],
        )?;
        Ok(())
    }

    fn remove_link(&self, from_id: RecordId, to_id: RecordId) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM links WHERE from_id = ?1 AND to_id = ?2",
            params![from_id, to_id],
        )?;
        Ok(())
    }

    fn activate_record(&self, level: FrbrLevel, id: RecordId) -> Result<()> {
        let record = self
            .get_record(id)?
            .filter(|r| r.level == level)
            .ok_or_else(|| StorageError::record_not_found(id))?;
        self.add_record(record.restated(RecordStatus::Active))
    }
}
