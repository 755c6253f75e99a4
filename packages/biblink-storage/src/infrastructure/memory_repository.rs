//! In-Memory Repository (link graph for tests and dry runs)
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::models::{FrbrLevel, OutputRecord, RecordId, RecordStatus};
use crate::domain::ports::LinkGraph;
use crate::error::{Result, StorageError};

#[derive(Clone, Default)]
pub struct InMemoryRepository {
    records: Arc<RwLock<BTreeMap<RecordId, OutputRecord>>>,
    history: Arc<RwLock<Vec<OutputRecord>>>,
    // to_id -> from_ids
    links: Arc<RwLock<BTreeMap<RecordId, BTreeSet<RecordId>>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Superseded copies of `id`, oldest first, all with REPLACED status
    pub fn history(&self, id: RecordId) -> Vec<OutputRecord> {
        self.history
            .read()
            .iter()
            .filter(|r| r.id == id)
            .cloned()
            .collect()
    }

    pub fn records_at(&self, level: FrbrLevel) -> Vec<OutputRecord> {
        self.records
            .read()
            .values()
            .filter(|r| r.level == level)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl LinkGraph for InMemoryRepository {
    fn get_record(&self, id: RecordId) -> Result<Option<OutputRecord>> {
        Ok(self.records.read().get(&id).cloned())
    }

    fn add_record(&self, record: OutputRecord) -> Result<()> {
        let previous = self.records.write().insert(record.id, record);
        if let Some(previous) = previous {
            self.history
                .write()
                .push(previous.restated(RecordStatus::Replaced));
        }
        Ok(())
    }

    fn successors_of(&self, predecessor_id: RecordId) -> Result<Vec<RecordId>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.predecessor_id == Some(predecessor_id))
            .map(|r| r.id)
            .collect())
    }

    fn get_linked_record_ids(&self, to_id: RecordId) -> Result<Vec<RecordId>> {
        Ok(self
            .links
            .read()
            .get(&to_id)
            .map(|from| from.iter().copied().collect())
            .unwrap_or_default())
    }

    fn get_linked_to_record_ids(&self, from_id: RecordId) -> Result<Vec<RecordId>> {
        Ok(self
            .links
            .read()
            .iter()
            .filter(|(_, from)| from.contains(&from_id))
            .map(|(to, _)| *to)
            .collect())
    }

    fn add_link(&self, from_id: RecordId, to_id: RecordId) -> Result<()> {
        self.links.write().entry(to_id).or_default().insert(from_id);
        Ok(())
    }

    fn remove_link(&self, from_id: RecordId, to_id: RecordId) -> Result<()> {
        let mut links = self.links.write();
        if let Some(from) = links.get_mut(&to_id) {
            from.remove(&from_id);
            if from.is_empty() {
                links.remove(&to_id);
            }
        }
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
