//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use biblink_engine::{EngineConfig, LinkageService, ProcessResult};
use biblink_storage::{
    FrbrLevel, HeldLink, HeldLinkStore, IdSequence, IdentityDelta, IdentitySnapshot,
    IdentityStore, InMemoryRepository, InMemoryStore, LinkGraph, MatchpointEntry,
    MatchpointStats, MatchpointStore, PropertyStore, RecordId, Result, SqliteStore, StorageError,
};
use tempfile::TempDir;

pub fn config() -> EngineConfig {
    EngineConfig::default()
        .with_commit_interval(100)
        .with_id_block_size(16)
}

enum StoreHandle {
    Memory(Arc<InMemoryStore>),
    Sqlite(Arc<SqliteStore>),
}

/// A service plus handles to the storage behind it
pub struct Harness {
    pub name: &'static str,
    pub service: LinkageService,
    pub repo: Arc<dyn LinkGraph>,
    store: StoreHandle,
    _dir: Option<TempDir>,
}

impl Harness {
    pub fn memory() -> Self {
        let store = Arc::new(InMemoryStore::starting_at(1000));
        let repo: Arc<dyn LinkGraph> = Arc::new(InMemoryRepository::new());
        Self {
            name: "memory",
            service: LinkageService::new(config(), store.clone(), repo.clone()).unwrap(),
            repo,
            store: StoreHandle::Memory(store),
            _dir: None,
        }
    }

    pub fn sqlite() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::new(dir.path().join("linkage.db")).unwrap());
        let repo: Arc<dyn LinkGraph> = Arc::new(store.repository().unwrap());
        Self {
            name: "sqlite",
            service: LinkageService::new(config(), store.clone(), repo.clone()).unwrap(),
            repo,
            store: StoreHandle::Sqlite(store),
            _dir: Some(dir),
        }
    }

    pub fn all() -> Vec<Harness> {
        vec![Self::memory(), Self::sqlite()]
    }

    /// A second service over the same persisted state
    pub fn reopen(&self) -> LinkageService {
        match &self.store {
            StoreHandle::Memory(store) => {
                LinkageService::new(config(), store.clone(), self.repo.clone()).unwrap()
            }
            StoreHandle::Sqlite(store) => {
                LinkageService::new(config(), store.clone(), self.repo.clone()).unwrap()
            }
        }
    }

    pub fn held_links_of(&self, holding_ids: &[RecordId]) -> Vec<HeldLink> {
        match &self.store {
            StoreHandle::Memory(store) => store.held_links_for_holdings(holding_ids).unwrap(),
            StoreHandle::Sqlite(store) => store.held_links_for_holdings(holding_ids).unwrap(),
        }
    }

    pub fn property(&self, key: &str) -> Option<String> {
        match &self.store {
            StoreHandle::Memory(store) => store.get_property(key).unwrap(),
            StoreHandle::Sqlite(store) => store.get_property(key).unwrap(),
        }
    }

    pub fn status_of(&self, id: RecordId) -> biblink_storage::RecordStatus {
        self.repo.get_record(id).unwrap().unwrap().status
    }
}

pub fn output_at(result: &ProcessResult, level: FrbrLevel) -> RecordId {
    result
        .outputs
        .iter()
        .find(|r| r.level == level)
        .map(|r| r.id)
        .unwrap_or_else(|| panic!("no {} output in {:?}", level, result))
}

// ═══════════════════════════════════════════════════════════════════════════
// Store that can be told to fail
// ═══════════════════════════════════════════════════════════════════════════

/// In-memory store whose identity persistence fails while `failing` is set
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub failing: AtomicBool,
}

impl FlakyStore {
    pub fn fail_writes(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }
}

impl IdSequence for FlakyStore {
    fn next_id(&self) -> Result<RecordId> {
        self.inner.next_id()
    }

    fn next_id_and_increment(&self) -> Result<RecordId> {
        self.inner.next_id_and_increment()
    }

    fn reserve_id_block(&self, count: u32) -> Result<RecordId> {
        self.inner.reserve_id_block(count)
    }
}

impl IdentityStore for FlakyStore {
    fn identity_orgs(&self) -> Result<Vec<String>> {
        self.inner.identity_orgs()
    }

    fn load_identity_maps(&self, org: &str) -> Result<IdentitySnapshot> {
        self.inner.load_identity_maps(org)
    }

    fn persist_identity_deltas(&self, delta: &IdentityDelta) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::database("database is locked"));
        }
        self.inner.persist_identity_deltas(delta)
    }
}

impl HeldLinkStore for FlakyStore {
    fn persist_held_links(&self, links: &[HeldLink]) -> Result<()> {
        self.inner.persist_held_links(links)
    }

    fn delete_held_links(&self, manifestation_ids: &[RecordId]) -> Result<()> {
        self.inner.delete_held_links(manifestation_ids)
    }

    fn delete_held_links_for_holdings(&self, holding_ids: &[RecordId]) -> Result<()> {
        self.inner.delete_held_links_for_holdings(holding_ids)
    }

    fn held_links_to_activate(&self, manifestation_ids: &[RecordId]) -> Result<Vec<RecordId>> {
        self.inner.held_links_to_activate(manifestation_ids)
    }

    fn held_links_for_holdings(&self, holding_ids: &[RecordId]) -> Result<Vec<HeldLink>> {
        self.inner.held_links_for_holdings(holding_ids)
    }
}

impl MatchpointStore for FlakyStore {
    fn persist_matchpoint_deltas(&self, table: &str, entries: &[MatchpointEntry]) -> Result<()> {
        self.inner.persist_matchpoint_deltas(table, entries)
    }

    fn query_matchpoint(&self, table: &str, key: i64) -> Result<Vec<RecordId>> {
        self.inner.query_matchpoint(table, key)
    }

    fn delete_matchpoint_row(&self, table: &str, record_id: RecordId) -> Result<()> {
        self.inner.delete_matchpoint_row(table, record_id)
    }

    fn matchpoint_for_record(&self, table: &str, record_id: RecordId) -> Result<Option<i64>> {
        self.inner.matchpoint_for_record(table, record_id)
    }

    fn load_matchpoints(&self, table: &str) -> Result<Vec<MatchpointEntry>> {
        self.inner.load_matchpoints(table)
    }

    fn matchpoint_stats(&self, table: &str) -> Result<MatchpointStats> {
        self.inner.matchpoint_stats(table)
    }
}

impl PropertyStore for FlakyStore {
    fn get_property(&self, key: &str) -> Result<Option<String>> {
        self.inner.get_property(key)
    }

    fn set_property(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set_property(key, value)
    }
}
