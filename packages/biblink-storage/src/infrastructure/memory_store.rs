//! In-Memory Store
//!
//! Map-backed implementation of every store port. Cloning shares the
//! underlying tables, so a test can drop an engine and build a new one over
//! the same "persisted" state.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::domain::models::{
    ControlKey, HeldLink, IdentityDelta, IdentityEntry, IdentityKind, IdentitySnapshot,
    MatchpointEntry, MatchpointStats, RecordId,
};
use crate::domain::ports::{
    HeldLinkStore, IdSequence, IdentityStore, MatchpointStore, PropertyStore,
};
use crate::error::{Result, StorageError};

type IdentityRow = (IdentityKind, String, ControlKey);

#[derive(Clone)]
pub struct InMemoryStore {
    next_id: Arc<Mutex<RecordId>>,
    identity: Arc<RwLock<BTreeMap<IdentityRow, RecordId>>>,
    held: Arc<RwLock<BTreeSet<HeldLink>>>,
    matchpoints: Arc<RwLock<BTreeMap<(String, RecordId), i64>>>,
    properties: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryStore {
    /// Ids start at 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first_id: RecordId) -> Self {
        Self {
            next_id: Arc::new(Mutex::new(first_id)),
            identity: Arc::new(RwLock::new(BTreeMap::new())),
            held: Arc::new(RwLock::new(BTreeSet::new())),
            matchpoints: Arc::new(RwLock::new(BTreeMap::new())),
            properties: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Persisted held links (for inspection)
    pub fn held_links(&self) -> Vec<HeldLink> {
        self.held.read().iter().copied().collect()
    }

    /// Number of persisted identity rows of one kind
    pub fn identity_len(&self, kind: IdentityKind) -> usize {
        self.identity
            .read()
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSequence for InMemoryStore {
    fn next_id(&self) -> Result<RecordId> {
        Ok(*self.next_id.lock())
    }

    fn next_id_and_increment(&self) -> Result<RecordId> {
        self.reserve_id_block(1)
    }

    fn reserve_id_block(&self, count: u32) -> Result<RecordId> {
        let mut next = self.next_id.lock();
        let first = *next;
        *next = first
            .checked_add(RecordId::from(count))
            .ok_or_else(|| StorageError::sequence("id sequence overflow"))?;
        Ok(first)
    }
}

impl IdentityStore for InMemoryStore {
    fn identity_orgs(&self) -> Result<Vec<String>> {
        let orgs: BTreeSet<String> = self
            .identity
            .read()
            .keys()
            .map(|(_, org, _)| org.clone())
            .collect();
        Ok(orgs.into_iter().collect())
    }

    fn load_identity_maps(&self, org: &str) -> Result<IdentitySnapshot> {
        let identity = self.identity.read();
        let mut snapshot = IdentitySnapshot::default();
        for ((kind, row_org, key), id) in identity.iter() {
            if row_org != org {
                continue;
            }
            match kind {
                IdentityKind::Processed => snapshot.processed.push((key.clone(), *id)),
                IdentityKind::Reserved => snapshot.reserved.push((key.clone(), *id)),
            }
        }
        Ok(snapshot)
    }

    fn persist_identity_deltas(&self, delta: &IdentityDelta) -> Result<()> {
        let mut identity = self.identity.write();

        let mut remove = |kind: IdentityKind, entries: &[IdentityEntry]| {
            for e in entries {
                identity.remove(&(kind, e.org.clone(), e.key.clone()));
            }
        };
        remove(IdentityKind::Processed, &delta.removed_processed);
        remove(IdentityKind::Reserved, &delta.removed_reserved);

        for e in &delta.added_processed {
            identity.insert(
                (IdentityKind::Processed, e.org.clone(), e.key.clone()),
                e.manifestation_id,
            );
        }
        for e in &delta.added_reserved {
            identity.insert(
                (IdentityKind::Reserved, e.org.clone(), e.key.clone()),
                e.manifestation_id,
            );
        }
        Ok(())
    }
}

impl HeldLinkStore for InMemoryStore {
    fn persist_held_links(&self, links: &[HeldLink]) -> Result<()> {
        self.held.write().extend(links.iter().copied());
        Ok(())
    }

    fn delete_held_links(&self, manifestation_ids: &[RecordId]) -> Result<()> {
        self.held
            .write()
            .retain(|l| !manifestation_ids.contains(&l.manifestation_id));
        Ok(())
    }

    fn delete_held_links_for_holdings(&self, holding_ids: &[RecordId]) -> Result<()> {
        self.held
            .write()
            .retain(|l| !holding_ids.contains(&l.holding_id));
        Ok(())
    }

    fn held_links_to_activate(&self, manifestation_ids: &[RecordId]) -> Result<Vec<RecordId>> {
        let holdings: BTreeSet<RecordId> = self
            .held
            .read()
            .iter()
            .filter(|l| manifestation_ids.contains(&l.manifestation_id))
            .map(|l| l.holding_id)
            .collect();
        Ok(holdings.into_iter().collect())
    }

    fn held_links_for_holdings(&self, holding_ids: &[RecordId]) -> Result<Vec<HeldLink>> {
        Ok(self
            .held
            .read()
            .iter()
            .filter(|l| holding_ids.contains(&l.holding_id))
            .copied()
            .collect())
    }
}

impl MatchpointStore for InMemoryStore {
    fn persist_matchpoint_deltas(&self, table: &str, entries: &[MatchpointEntry]) -> Result<()> {
        let mut rows = self.matchpoints.write();
        for e in entries {
            rows.insert((table.to_string(), e.record_id), e.key);
        }
        Ok(())
    }

    fn query_matchpoint(&self, table: &str, key: i64) -> Result<Vec<RecordId>> {
        Ok(self
            .matchpoints
            .read()
            .iter()
            .filter(|((t, _), k)| t == table && **k == key)
            .map(|((_, id), _)| *id)
            .collect())
    }

    fn delete_matchpoint_row(&self, table: &str, record_id: RecordId) -> Result<()> {
        self.matchpoints
            .write()
            .remove(&(table.to_string(), record_id));
        Ok(())
    }

    fn matchpoint_for_record(&self, table: &str, record_id: RecordId) -> Result<Option<i64>> {
        Ok(self
            .matchpoints
            .read()
            .get(&(table.to_string(), record_id))
            .copied())
    }

    fn load_matchpoints(&self, table: &str) -> Result<Vec<MatchpointEntry>> {
        Ok(self
            .matchpoints
            .read()
            .iter()
            .filter(|((t, _), _)| t == table)
            .map(|((_, id), k)| MatchpointEntry::new(*id, *k))
            .collect())
    }

    fn matchpoint_stats(&self, table: &str) -> Result<MatchpointStats> {
        let rows = self.matchpoints.read();
        let mut records = 0;
        let mut keys = BTreeSet::new();
        for ((t, _), k) in rows.iter() {
            if t == table {
                records += 1;
                keys.insert(*k);
            }
        }
        Ok(MatchpointStats {
            records,
            keys: keys.len(),
        })
    }
}

impl PropertyStore for InMemoryStore {
    fn get_property(&self, key: &str) -> Result<Option<String>> {
        Ok(self.properties.read().get(key).cloned())
    }

    fn set_property(&self, key: &str, value: &str) -> Result<()> {
        self.properties
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_sequence_never_repeats() {
        let store = InMemoryStore::new();
        assert_eq!(store.next_id().unwrap(), 1);
        assert_eq!(store.next_id_and_increment().unwrap(), 1);
        assert_eq!(store.reserve_id_block(10).unwrap(), 2);
        assert_eq!(store.next_id_and_increment().unwrap(), 12);
        assert_eq!(store.next_id().unwrap(), 13);
    }

    #[test]
    fn test_identity_delta_roundtrip() {
        let store = InMemoryStore::new();
        let mut delta = IdentityDelta::default();
        delta
            .added_processed
            .push(IdentityEntry::new("X", ControlKey::Numeric(1), 100));
        delta
            .added_reserved
            .push(IdentityEntry::new("X", ControlKey::parse("abc"), 101));
        delta
            .added_reserved
            .push(IdentityEntry::new("Y", ControlKey::Numeric(1), 102));
        store.persist_identity_deltas(&delta).unwrap();

        assert_eq!(store.identity_orgs().unwrap(), vec!["X", "Y"]);
        let x = store.load_identity_maps("X").unwrap();
        assert_eq!(x.processed, vec![(ControlKey::Numeric(1), 100)]);
        assert_eq!(x.reserved, vec![(ControlKey::parse("abc"), 101)]);

        let mut removal = IdentityDelta::default();
        removal
            .removed_reserved
            .push(IdentityEntry::new("X", ControlKey::parse("abc"), 101));
        store.persist_identity_deltas(&removal).unwrap();
        assert!(store.load_identity_maps("X").unwrap().reserved.is_empty());
    }

    #[test]
    fn test_held_links() {
        let store = InMemoryStore::new();
        store
            .persist_held_links(&[HeldLink::new(10, 1), HeldLink::new(11, 1), HeldLink::new(11, 2)])
            .unwrap();

        assert_eq!(store.held_links_to_activate(&[1]).unwrap(), vec![10, 11]);
        assert_eq!(store.held_links_for_holdings(&[11]).unwrap().len(), 2);

        store.delete_held_links(&[1]).unwrap();
        assert_eq!(store.held_links(), vec![HeldLink::new(11, 2)]);

        store.delete_held_links_for_holdings(&[11]).unwrap();
        assert!(store.held_links().is_empty());
    }

    #[test]
    fn test_matchpoints() {
        let store = InMemoryStore::new();
        store
            .persist_matchpoint_deltas(
                "lccn",
                &[MatchpointEntry::new(1, 500), MatchpointEntry::new(2, 500)],
            )
            .unwrap();
        store
            .persist_matchpoint_deltas("other", &[MatchpointEntry::new(3, 500)])
            .unwrap();

        assert_eq!(store.query_matchpoint("lccn", 500).unwrap(), vec![1, 2]);
        assert_eq!(store.matchpoint_for_record("lccn", 2).unwrap(), Some(500));
        assert_eq!(
            store.matchpoint_stats("lccn").unwrap(),
            MatchpointStats { records: 2, keys: 1 }
        );

        store.delete_matchpoint_row("lccn", 1).unwrap();
        assert_eq!(store.query_matchpoint("lccn", 500).unwrap(), vec![2]);
    }

    #[test]
    fn test_properties() {
        let store = InMemoryStore::new();
        assert_eq!(store.get_property("input_bibs").unwrap(), None);
        store.set_property("input_bibs", "3").unwrap();
        assert_eq!(store.get_property("input_bibs").unwrap().as_deref(), Some("3"));
    }
}
