//! SQLite Store
//!
//! File-based persistent storage for the id sequence, identity maps, held
//! links, match-point tables and scalar properties. Each port call runs in
//! its own transaction; nothing spans calls.
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::domain::models::{
    ControlKey, HeldLink, IdentityDelta, IdentityEntry, IdentityKind, IdentitySnapshot,
    MatchpointEntry, MatchpointStats, RecordId,
};
use crate::domain::ports::{
    HeldLinkStore, IdSequence, IdentityStore, MatchpointStore, PropertyStore,
};
use crate::error::{Result, StorageError};
use crate::infrastructure::sqlite_repository::SqliteRepository;

const SEQUENCE_NAME: &str = "record";

/// SQLite-backed store implementing every store port
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Repository sharing this store's connection
    pub fn repository(&self) -> Result<SqliteRepository> {
        SqliteRepository::with_connection(self.conn.clone())
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS id_sequence (
                name TEXT PRIMARY KEY,
                next_id INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO id_sequence (name, next_id) VALUES (?1, 1)",
            params![SEQUENCE_NAME],
        )?;

        // Processed and reserved sub-maps share one table, partitioned by kind
        conn.execute(
            "CREATE TABLE IF NOT EXISTS bib_identity (
                kind TEXT NOT NULL,
                org_code TEXT NOT NULL,
                key_type INTEGER NOT NULL,
                key_text TEXT NOT NULL,
                manifestation_id INTEGER NOT NULL,
                PRIMARY KEY (kind, org_code, key_type, key_text)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS held_holdings (
                holding_id INTEGER NOT NULL,
                manifestation_id INTEGER NOT NULL,
                PRIMARY KEY (holding_id, manifestation_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_held_manifestation
             ON held_holdings(manifestation_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS matchpoints (
                table_name TEXT NOT NULL,
                record_id INTEGER NOT NULL,
                numeric_id INTEGER NOT NULL,
                PRIMARY KEY (table_name, record_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_matchpoints_key
             ON matchpoints(table_name, numeric_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS properties (
                prop_key TEXT PRIMARY KEY,
                prop_value TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }
}

impl IdSequence for SqliteStore {
    fn next_id(&self) -> Result<RecordId> {
        let conn = self.conn.lock();
        let next: RecordId = conn.query_row(
            "SELECT next_id FROM id_sequence WHERE name = ?1",
            params![SEQUENCE_NAME],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    fn next_id_and_increment(&self) -> Result<RecordId> {
        self.reserve_id_block(1)
    }

    fn reserve_id_block(&self, count: u32) -> Result<RecordId> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let first: RecordId = tx.query_row(
            "SELECT next_id FROM id_sequence WHERE name = ?1",
            params![SEQUENCE_NAME],
            |row| row.get(0),
        )?;
        let next = first
            .checked_add(RecordId::from(count))
            .ok_or_else(|| StorageError::sequence("id sequence overflow"))?;
        tx.execute(
            "UPDATE id_sequence SET next_id = ?1 WHERE name = ?2",
            params![next, SEQUENCE_NAME],
        )?;
        tx.commit()?;
        Ok(first)
    }
}

impl IdentityStore for SqliteStore {
    fn identity_orgs(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT org_code FROM bib_identity ORDER BY org_code")?;
        let orgs = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(orgs)
    }

    fn load_identity_maps(&self, org: &str) -> Result<IdentitySnapshot> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT kind, key_type, key_text, manifestation_id
             FROM bib_identity WHERE org_code = ?1",
        )?;
        let rows = stmt
            .query_map(params![org], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, RecordId>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut snapshot = IdentitySnapshot::default();
        for (kind, key_type, key_text, id) in rows {
            let key = ControlKey::from_parts(key_type, &key_text)?;
            match IdentityKind::from_str(&kind)? {
                IdentityKind::Processed => snapshot.processed.push((key, id)),
                IdentityKind::Reserved => snapshot.reserved.push((key, id)),
            }
        }
        Ok(snapshot)
    }

    fn persist_identity_deltas(&self, delta: &IdentityDelta) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut delete = tx.prepare(
                "DELETE FROM bib_identity
                 WHERE kind = ?1 AND org_code = ?2 AND key_type = ?3 AND key_text = ?4",
            )?;
            let mut upsert = tx.prepare(
                "INSERT OR REPLACE INTO bib_identity
                 (kind, org_code, key_type, key_text, manifestation_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            let groups: [(IdentityKind, &[IdentityEntry]); 2] = [
                (IdentityKind::Processed, &delta.removed_processed),
                (IdentityKind::Reserved, &delta.removed_reserved),
            ];
            for (kind, entries) in groups {
                for e in entries {
                    delete.execute(params![
                        kind.as_str(),
                        &e.org,
                        e.key.key_type(),
                        e.key.key_text().as_ref()
                    ])?;
                }
            }

            let groups: [(IdentityKind, &[IdentityEntry]); 2] = [
                (IdentityKind::Processed, &delta.added_processed),
                (IdentityKind::Reserved, &delta.added_reserved),
            ];
            for (kind, entries) in groups {
                for e in entries {
                    upsert.execute(params![
                        kind.as_str(),
                        &e.org,
                        e.key.key_type(),
                        e.key.key_text().as_ref(),
                        e.manifestation_id
                    ])?;
                }
            }
        }
        tx.commit()?;
        debug!(entries = delta.len(), "persisted identity delta");
        Ok(())
    }
}

impl HeldLinkStore for SqliteStore {
    fn persist_held_links(&self, links: &[HeldLink]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO held_holdings (holding_id, manifestation_id)
                 VALUES (?1, ?2)",
            )?;
            for link in links {
                stmt.execute(params![link.holding_id, link.manifestation_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_held_links(&self, manifestation_ids: &[RecordId]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM held_holdings WHERE manifestation_id = ?1")?;
            for id in manifestation_ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_held_links_for_holdings(&self, holding_ids: &[RecordId]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM held_holdings WHERE holding_id = ?1")?;
            for id in holding_ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn held_links_to_activate(&self, manifestation_ids: &[RecordId]) -> Result<Vec<RecordId>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT holding_id FROM held_holdings WHERE manifestation_id = ?1")?;
        let mut holdings = BTreeSet::new();
        for id in manifestation_ids {
            let rows = stmt
                .query_map(params![id], |row| row.get::<_, RecordId>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            holdings.extend(rows);
        }
        Ok(holdings.into_iter().collect())
    }

    fn held_links_for_holdings(&self, holding_ids: &[RecordId]) -> Result<Vec<HeldLink>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT holding_id, manifestation_id FROM held_holdings WHERE holding_id = ?1",
        )?;
        let mut links = Vec::new();
        for id in holding_ids {
            let rows = stmt
                .query_map(params![id], |row| {
                    Ok(HeldLink::new(row.get(0)?, row.get(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            links.extend(rows);
        }
        Ok(links)
    }
}

impl MatchpointStore for SqliteStore {
    fn persist_matchpoint_deltas(&self, table: &str, entries: &[MatchpointEntry]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO matchpoints (table_name, record_id, numeric_id)
                 VALUES (?1, ?2, ?3)",
            )?;
            for e in entries {
                stmt.execute(params![table, e.record_id, e.key])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn query_matchpoint(&self, table: &str, key: i64) -> Result<Vec<RecordId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT record_id FROM matchpoints
             WHERE table_name = ?1 AND numeric_id = ?2 ORDER BY record_id",
        )?;
        let ids = stmt
            .query_map(params![table, key], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<RecordId>>>()?;
        Ok(ids)
    }

    fn delete_matchpoint_row(&self, table: &str, record_id: RecordId) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM matchpoints WHERE table_name = ?1 AND record_id = ?2",
            params![table, record_id],
        )?;
        Ok(())
    }

    fn matchpoint_for_record(&self, table: &str, record_id: RecordId) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let key = conn
            .query_row(
                "SELECT numeric_id FROM matchpoints WHERE table_name = ?1 AND record_id = ?2",
                params![table, record_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(key)
    }

    fn load_matchpoints(&self, table: &str) -> Result<Vec<MatchpointEntry>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT record_id, numeric_id FROM matchpoints WHERE table_name = ?1")?;
        let rows = stmt
            .query_map(params![table], |row| {
                Ok(MatchpointEntry::new(row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn matchpoint_stats(&self, table: &str) -> Result<MatchpointStats> {
        let conn = self.conn.lock();
        let (records, keys): (i64, i64) = conn.query_row(
            "SELECT COUNT(DISTINCT record_id), COUNT(DISTINCT numeric_id)
             FROM matchpoints WHERE table_name = ?1",
            params![table],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(MatchpointStats {
            records: records as usize,
            keys: keys as usize,
        })
    }
}

impl PropertyStore for SqliteStore {
    fn get_property(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT prop_value FROM properties WHERE prop_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_property(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO properties (prop_key, prop_value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}
