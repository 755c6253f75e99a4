//! Held-Linkage Manager
//!
//! Keeps HELD holdings consistent with the reserved half of the identity
//! map. A held link `(holding, manifestation)` exists while the
//! manifestation id is only reserved. When the reservation resolves, the
//! link is released; a holding becomes eligible for activation once every
//! one of its links has been released.
//!
//! Links added in the current batch stay in memory until the forced commit;
//! older links are read from the store on demand. A holding that is
//! re-materialized or deleted supersedes its persisted links: they are
//! ignored from then on and deleted at the commit.

use std::collections::BTreeSet;

use biblink_storage::{
    FrbrLevel, HeldLink, HeldLinkStore, LinkGraph, OutputRecord, RecordId, RecordStatus,
};
use tracing::{debug, warn};

use crate::error::Result;
use crate::identity::ManifestationIdentityMap;

#[derive(Debug, Default)]
pub struct HeldLinkageManager {
    /// Ordered by (holding, manifestation)
    pending: BTreeSet<HeldLink>,
    /// (manifestation, holding) mirror of `pending`
    pending_by_manifestation: BTreeSet<(RecordId, RecordId)>,
    released: BTreeSet<RecordId>,
    activations: BTreeSet<RecordId>,
    /// Holdings whose persisted links no longer count
    superseded: BTreeSet<RecordId>,
}

impl HeldLinkageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `holding_id` waits for reserved `manifestation_id`
    pub fn hold(&mut self, holding_id: RecordId, manifestation_id: RecordId) {
        self.pending.insert(HeldLink::new(holding_id, manifestation_id));
        self.pending_by_manifestation
            .insert((manifestation_id, holding_id));
    }

    /// Forget every link of a holding that is being re-materialized or
    /// deleted
    ///
    /// This batch's links go at once; persisted ones are ignored and are
    /// deleted at the next forced commit.
    pub fn drop_holding(&mut self, holding_id: RecordId) {
        let links: Vec<HeldLink> = self.pending_links_of(holding_id).collect();
        for link in links {
            self.pending.remove(&link);
            self.pending_by_manifestation
                .remove(&(link.manifestation_id, link.holding_id));
        }
        self.activations.remove(&holding_id);
        self.superseded.insert(holding_id);
    }

    fn persisted_links_of<S: HeldLinkStore + ?Sized>(
        &self,
        holding_id: RecordId,
        store: &S,
    ) -> Result<Vec<HeldLink>> {
        if self.superseded.contains(&holding_id) {
            return Ok(Vec::new());
        }
        Ok(store.held_links_for_holdings(&[holding_id])?)
    }

    fn pending_links_of(&self, holding_id: RecordId) -> impl Iterator<Item = HeldLink> + '_ {
        self.pending
            .range(HeldLink::new(holding_id, RecordId::MIN)..=HeldLink::new(holding_id, RecordId::MAX))
            .copied()
    }

    /// Holdings with a link (pending or persisted) to `manifestation_id`
    pub fn holdings_held_against<S: HeldLinkStore + ?Sized>(
        &self,
        manifestation_id: RecordId,
        store: &S,
    ) -> Result<Vec<RecordId>> {
        let mut holdings: BTreeSet<RecordId> = self
            .pending_by_manifestation
            .range((manifestation_id, RecordId::MIN)..=(manifestation_id, RecordId::MAX))
            .map(|(_, h)| *h)
            .collect();
        holdings.extend(
            store
                .held_links_to_activate(&[manifestation_id])?
                .into_iter()
                .filter(|h| !self.superseded.contains(h)),
        );
        Ok(holdings.into_iter().collect())
    }

    /// Release `manifestation_id` and return the holdings that no longer
    /// wait for anything
    ///
    /// Call exactly when the reservation for `manifestation_id` resolves.
    /// A holding is returned at most once per batch; the activation itself
    /// is applied at the next forced commit.
    pub fn ids_to_activate<S: HeldLinkStore + ?Sized>(
        &mut self,
        manifestation_id: RecordId,
        store: &S,
    ) -> Result<Vec<RecordId>> {
        self.released.insert(manifestation_id);

        let mut ready = Vec::new();
        for holding_id in self.holdings_held_against(manifestation_id, store)? {
            if self.activations.contains(&holding_id) {
                continue;
            }
            let persisted = self.persisted_links_of(holding_id, store)?;
            let all_released = self
                .pending_links_of(holding_id)
                .chain(persisted)
                .all(|link| self.released.contains(&link.manifestation_id));
            if all_released {
                self.activations.insert(holding_id);
                ready.push(holding_id);
            }
        }

        debug!(manifestation_id, holdings = ?ready, "released reservation");
        Ok(ready)
    }

    /// Re-link holdings that pointed at a deleted manifestation
    ///
    /// Each holding's stored bib references are looked up again. A reference
    /// resolves to its processed manifestation, else to an outstanding
    /// reservation; references that resolve to neither are reserved only
    /// when nothing else resolved. The holding stays ACTIVE unless one of its
    /// targets is reserved, in which case it is HELD against every reserved
    /// target. Either way no link to the deleted manifestation is left
    /// behind.
    pub fn orphan_fix_up(
        &mut self,
        deleted_manifestation_id: RecordId,
        holding_ids: &[RecordId],
        identity: &mut ManifestationIdentityMap,
        repo: &dyn LinkGraph,
    ) -> Result<Vec<OutputRecord>> {
        let mut updated = Vec::new();

        for &holding_id in holding_ids {
            let Some(record) = repo.get_record(holding_id)? else {
                warn!(holding_id, "linked holding is missing");
                continue;
            };
            if record.level != FrbrLevel::Holdings || record.is_deleted() {
                continue;
            }

            let mut processed = BTreeSet::new();
            let mut reserved = BTreeSet::new();
            if let Some(refs) = &record.references {
                let mut unresolved = Vec::new();
                for cn in &refs.control_numbers {
                    match identity.lookup_processed(&refs.org_code, cn) {
                        Some(id) if id != deleted_manifestation_id => {
                            processed.insert(id);
                        }
                        _ => match identity.lookup_reserved(&refs.org_code, cn) {
                            Some(id) => {
                                reserved.insert(id);
                            }
                            None => unresolved.push(cn),
                        },
                    }
                }
                if processed.is_empty() && reserved.is_empty() {
                    for cn in unresolved {
                        reserved.insert(identity.reserve(&refs.org_code, cn)?);
                    }
                }
            }

            self.drop_holding(holding_id);
            for id in &reserved {
                self.hold(holding_id, *id);
            }
            let status = if reserved.is_empty() {
                RecordStatus::Active
            } else {
                RecordStatus::Held
            };
            let targets: BTreeSet<RecordId> = processed.union(&reserved).copied().collect();

            for old in repo.get_linked_to_record_ids(holding_id)? {
                if !targets.contains(&old) {
                    repo.remove_link(holding_id, old)?;
                }
            }
            for target in &targets {
                repo.add_link(holding_id, *target)?;
            }

            let fixed = record.restated(status);
            repo.add_record(fixed.clone())?;
            debug!(
                holding_id,
                deleted_manifestation_id,
                status = ?status,
                targets = ?targets,
                "orphaned holding re-linked"
            );
            updated.push(fixed);
        }

        Ok(updated)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Commit support
    // ═══════════════════════════════════════════════════════════════════════

    pub fn pending_links(&self) -> Vec<HeldLink> {
        self.pending.iter().copied().collect()
    }

    pub fn released_ids(&self) -> Vec<RecordId> {
        self.released.iter().copied().collect()
    }

    pub fn activations(&self) -> Vec<RecordId> {
        self.activations.iter().copied().collect()
    }

    /// Holdings whose persisted links are to be deleted
    pub fn superseded_ids(&self) -> Vec<RecordId> {
        self.superseded.iter().copied().collect()
    }

    pub fn has_pending(&self) -> bool {
        !(self.pending.is_empty()
            && self.released.is_empty()
            && self.activations.is_empty()
            && self.superseded.is_empty())
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.pending_by_manifestation.clear();
        self.released.clear();
        self.activations.clear();
        self.superseded.clear();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
