//! Manifestation Identity Map
//!
//! Per organization, two sub-maps keyed by control number:
//! - processed: the bib has been materialized under this manifestation id
//! - reserved: a holding referenced the bib before it arrived
//!
//! Every mutation is mirrored into an added/removed overlay which the commit
//! controller persists and clears at each forced commit. The overlay only
//! ever holds the last word for a key: adding after removing (or the reverse)
//! moves the entry between buckets rather than recording both.

use std::collections::{BTreeMap, BTreeSet};

use biblink_storage::{ControlKey, IdentityDelta, IdentityEntry, IdentityStore, RecordId};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::allocator::IdAllocator;
use crate::error::Result;

type OrgKey = (String, ControlKey);

#[derive(Debug, Default)]
struct OrgMaps {
    processed: FxHashMap<ControlKey, RecordId>,
    reserved: FxHashMap<ControlKey, RecordId>,
}

#[derive(Debug, Default)]
struct DeltaOverlay {
    added_processed: FxHashMap<OrgKey, RecordId>,
    removed_processed: FxHashMap<OrgKey, RecordId>,
    added_reserved: FxHashMap<OrgKey, RecordId>,
    removed_reserved: FxHashMap<OrgKey, RecordId>,
}

fn sorted_entries(map: &FxHashMap<OrgKey, RecordId>) -> Vec<IdentityEntry> {
    let mut entries: Vec<IdentityEntry> = map
        .iter()
        .map(|((org, key), id)| IdentityEntry::new(org.clone(), key.clone(), *id))
        .collect();
    entries.sort_by(|a, b| (&a.org, &a.key).cmp(&(&b.org, &b.key)));
    entries
}

/// Ordered copy of both sub-maps, for comparing in-memory and persisted state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityView {
    pub processed: BTreeMap<OrgKey, RecordId>,
    pub reserved: BTreeMap<OrgKey, RecordId>,
}

pub struct ManifestationIdentityMap {
    allocator: IdAllocator,
    orgs: FxHashMap<String, OrgMaps>,
    /// processed manifestation id -> every (org, key) naming it
    by_id: FxHashMap<RecordId, BTreeSet<OrgKey>>,
    delta: DeltaOverlay,
}

impl ManifestationIdentityMap {
    pub fn new(allocator: IdAllocator) -> Self {
        Self {
            allocator,
            orgs: FxHashMap::default(),
            by_id: FxHashMap::default(),
            delta: DeltaOverlay::default(),
        }
    }

    /// Replace in-memory state with everything persisted
    pub fn load<S: IdentityStore + ?Sized>(&mut self, store: &S) -> Result<()> {
        self.orgs.clear();
        self.by_id.clear();
        self.delta = DeltaOverlay::default();

        for org in store.identity_orgs()? {
            let snapshot = store.load_identity_maps(&org)?;
            let maps = self.orgs.entry(org.clone()).or_default();
            for (key, id) in snapshot.processed {
                self.by_id
                    .entry(id)
                    .or_default()
                    .insert((org.clone(), key.clone()));
                maps.processed.insert(key, id);
            }
            maps.reserved.extend(snapshot.reserved);
        }

        debug!(
            orgs = self.orgs.len(),
            processed = self.processed_len(),
            reserved = self.reserved_len(),
            "loaded identity maps"
        );
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lookups
    // ═══════════════════════════════════════════════════════════════════════

    pub fn lookup_processed(&self, org: &str, control_number: &str) -> Option<RecordId> {
        self.lookup_processed_key(org, &ControlKey::parse(control_number))
    }

    pub fn lookup_reserved(&self, org: &str, control_number: &str) -> Option<RecordId> {
        self.lookup_reserved_key(org, &ControlKey::parse(control_number))
    }

    pub fn lookup_processed_key(&self, org: &str, key: &ControlKey) -> Option<RecordId> {
        self.orgs.get(org)?.processed.get(key).copied()
    }

    pub fn lookup_reserved_key(&self, org: &str, key: &ControlKey) -> Option<RecordId> {
        self.orgs.get(org)?.reserved.get(key).copied()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Mutations
    // ═══════════════════════════════════════════════════════════════════════

    pub fn mark_processed(&mut self, org: &str, control_number: &str, id: RecordId) {
        let key = ControlKey::parse(control_number);
        let maps = self.orgs.entry(org.to_string()).or_default();
        if let Some(previous) = maps.processed.insert(key.clone(), id) {
            if previous != id {
                if let Some(names) = self.by_id.get_mut(&previous) {
                    names.remove(&(org.to_string(), key.clone()));
                    if names.is_empty() {
                        self.by_id.remove(&previous);
                    }
                }
            }
        }
        let org_key = (org.to_string(), key);
        self.by_id.entry(id).or_default().insert(org_key.clone());
        self.delta.removed_processed.remove(&org_key);
        self.delta.added_processed.insert(org_key, id);
    }

    /// Reserved id for this pair, allocating one on first reference
    ///
    /// Returns the existing reservation unchanged if there is one.
    pub fn reserve(&mut self, org: &str, control_number: &str) -> Result<RecordId> {
        let key = ControlKey::parse(control_number);
        if let Some(id) = self.lookup_reserved_key(org, &key) {
            debug!(org, control_number, id, "reservation hit");
            return Ok(id);
        }

        let id = self.allocator.reserve_next_and_increment()?;
        self.orgs
            .entry(org.to_string())
            .or_default()
            .reserved
            .insert(key.clone(), id);
        let org_key = (org.to_string(), key);
        self.delta.removed_reserved.remove(&org_key);
        self.delta.added_reserved.insert(org_key, id);
        debug!(org, control_number, id, "reserved manifestation id");
        Ok(id)
    }

    /// Drop the reservation for this pair; the entry is not re-added
    pub fn resolve_reservation(&mut self, org: &str, control_number: &str, id: RecordId) -> bool {
        let key = ControlKey::parse(control_number);
        let removed = match self.orgs.get_mut(org) {
            Some(maps) => match maps.reserved.get(&key) {
                Some(existing) if *existing == id => maps.reserved.remove(&key).is_some(),
                _ => false,
            },
            None => false,
        };
        if removed {
            let org_key = (org.to_string(), key);
            self.delta.added_reserved.remove(&org_key);
            self.delta.removed_reserved.insert(org_key, id);
        }
        removed
    }

    /// Remove the processed entry for one pair
    pub fn forget_processed(&mut self, org: &str, control_number: &str) -> Option<RecordId> {
        let key = ControlKey::parse(control_number);
        self.forget_processed_key(org, key)
    }

    /// Remove every processed entry naming manifestation `id`
    pub fn forget_processed_id(&mut self, id: RecordId) -> Vec<(String, ControlKey)> {
        let names: Vec<OrgKey> = self
            .by_id
            .get(&id)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default();
        for (org, key) in &names {
            self.forget_processed_key(org, key.clone());
        }
        names
    }

    /// Keep only the processed names of `id` that are among `control_numbers`
    /// of `org`; returns the names that were dropped
    pub fn retain_processed<T: AsRef<str>>(
        &mut self,
        id: RecordId,
        org: &str,
        control_numbers: &[T],
    ) -> Vec<(String, ControlKey)> {
        let keep: BTreeSet<ControlKey> = control_numbers
            .iter()
            .map(|cn| ControlKey::parse(cn.as_ref()))
            .collect();
        let stale: Vec<OrgKey> = self
            .by_id
            .get(&id)
            .map(|names| {
                names
                    .iter()
                    .filter(|(o, key)| o != org || !keep.contains(key))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for (o, key) in &stale {
            self.forget_processed_key(o, key.clone());
        }
        stale
    }

    fn forget_processed_key(&mut self, org: &str, key: ControlKey) -> Option<RecordId> {
        let id = self.orgs.get_mut(org)?.processed.remove(&key)?;
        let org_key = (org.to_string(), key);
        if let Some(names) = self.by_id.get_mut(&id) {
            names.remove(&org_key);
            if names.is_empty() {
                self.by_id.remove(&id);
            }
        }
        self.delta.added_processed.remove(&org_key);
        self.delta.removed_processed.insert(org_key, id);
        Some(id)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Delta and inspection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn pending_delta(&self) -> IdentityDelta {
        IdentityDelta {
            added_processed: sorted_entries(&self.delta.added_processed),
            removed_processed: sorted_entries(&self.delta.removed_processed),
            added_reserved: sorted_entries(&self.delta.added_reserved),
            removed_reserved: sorted_entries(&self.delta.removed_reserved),
        }
    }

    pub fn clear_delta(&mut self) {
        self.delta = DeltaOverlay::default();
    }

    pub fn has_pending_delta(&self) -> bool {
        !(self.delta.added_processed.is_empty()
            && self.delta.removed_processed.is_empty()
            && self.delta.added_reserved.is_empty()
            && self.delta.removed_reserved.is_empty())
    }

    pub fn view(&self) -> IdentityView {
        let mut view = IdentityView::default();
        for (org, maps) in &self.orgs {
            for (key, id) in &maps.processed {
                view.processed.insert((org.clone(), key.clone()), *id);
            }
            for (key, id) in &maps.reserved {
                view.reserved.insert((org.clone(), key.clone()), *id);
            }
        }
        view
    }

    pub fn processed_len(&self) -> usize {
        self.orgs.values().map(|m| m.processed.len()).sum()
    }

    pub fn reserved_len(&self) -> usize {
        self.orgs.values().map(|m| m.reserved.len()).sum()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
