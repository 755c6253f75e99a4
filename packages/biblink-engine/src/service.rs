//! Linkage Service
//!
//! Per-record processing over the identity core. One service instance owns
//! its identity map, held links, match-point index and commit controller;
//! records must be fed in harvest order from a single thread.
//!
//! Output records and links go to the `LinkGraph` as soon as a record is
//! processed. Identity, held-link and match-point state only becomes
//! durable at a forced commit.

use std::sync::Arc;

use biblink_storage::{
    BibReferences, IdSequence, LinkGraph, MatchpointStats, OutputRecord, PersistentStore,
    RecordId, RecordStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::allocator::IdAllocator;
use crate::commit::{BatchCommitController, BatchCounters, CommitPhase, CommitReport};
use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorCategory, Result};
use crate::held::HeldLinkageManager;
use crate::identity::ManifestationIdentityMap;
use crate::matchpoint::{MatchPointIndex, LCCN_TABLE};
use crate::message::{MessageCode, RecordMessage};
use crate::record::{InputRecord, RecordKind};
use crate::splitter::{FrbrSplitter, PreviousOutputs, RecordSplitter, Split};

/// Outcome of processing one input record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessResult {
    pub record_id: RecordId,
    pub outputs: Vec<OutputRecord>,
    pub messages: Vec<RecordMessage>,
    /// HELD holdings whose last reservation this record resolved; they turn
    /// ACTIVE at the next commit
    pub activations: Vec<RecordId>,
    pub skipped: bool,
}

impl ProcessResult {
    fn new(record_id: RecordId) -> Self {
        Self {
            record_id,
            ..Default::default()
        }
    }

    fn skipped(record_id: RecordId) -> Self {
        Self {
            skipped: true,
            ..Self::new(record_id)
        }
    }

    fn failed(record_id: RecordId, message: RecordMessage) -> Self {
        Self {
            messages: vec![message],
            ..Self::new(record_id)
        }
    }

    /// Zero outputs with an error attached
    pub fn is_failure(&self) -> bool {
        self.outputs.is_empty() && self.messages.iter().any(RecordMessage::is_failure)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub batch_id: Uuid,
    pub phase: CommitPhase,
    pub counters: BatchCounters,
    pub processed_identities: usize,
    pub reserved_identities: usize,
    pub pending_held_links: usize,
    pub matchpoints_in_memory: usize,
    pub matchpoints: MatchpointStats,
}

pub struct LinkageService {
    config: EngineConfig,
    store: Arc<dyn PersistentStore>,
    repo: Arc<dyn LinkGraph>,
    allocator: IdAllocator,
    identity: ManifestationIdentityMap,
    held: HeldLinkageManager,
    matchpoints: MatchPointIndex,
    controller: BatchCommitController,
    splitter: Box<dyn RecordSplitter>,
}

impl LinkageService {
    /// Validate `config` and load persisted state from `store`
    pub fn new<S: PersistentStore + 'static>(
        config: EngineConfig,
        store: Arc<S>,
        repo: Arc<dyn LinkGraph>,
    ) -> Result<Self> {
        config.validate()?;

        let sequence: Arc<dyn IdSequence> = store.clone();
        let store: Arc<dyn PersistentStore> = store;
        let allocator = IdAllocator::new(sequence, config.id_block_size);

        let mut service = Self {
            identity: ManifestationIdentityMap::new(allocator.clone()),
            held: HeldLinkageManager::new(),
            matchpoints: MatchPointIndex::new(
                LCCN_TABLE,
                config.full_matchpoint_cache,
                config.intermediate_persistence,
            ),
            controller: BatchCommitController::new(config.commit_interval),
            splitter: Box::new(FrbrSplitter),
            allocator,
            store,
            repo,
            config,
        };
        service.load()?;

        info!(
            batch_id = %service.controller.batch_id(),
            processed = service.identity.processed_len(),
            reserved = service.identity.reserved_len(),
            "linkage service ready"
        );
        Ok(service)
    }

    pub fn with_splitter(mut self, splitter: Box<dyn RecordSplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    fn load(&mut self) -> Result<()> {
        self.identity.load(self.store.as_ref())?;
        self.matchpoints.load(self.store.as_ref())?;
        self.controller.load_counters(self.store.as_ref())?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Per-record processing
    // ═══════════════════════════════════════════════════════════════════════

    /// Process one input record
    ///
    /// Per-record failures come back as a failed `ProcessResult`; only
    /// fatal errors (store failures) are returned as `Err`, after which the
    /// service refuses work until `recover()`.
    pub fn process(&mut self, input: &InputRecord) -> Result<ProcessResult> {
        if self.controller.phase() == CommitPhase::Failed {
            return Err(EngineError::InvalidStateTransition {
                from: CommitPhase::Failed.to_string(),
                to: "processing".to_string(),
            });
        }

        let outcome = if input.is_deleted() {
            self.process_deleted(input)
        } else {
            match input.kind() {
                Some(RecordKind::Bib) => self.process_bib(input),
                Some(RecordKind::Holding) => self.process_holding(input),
                None => {
                    debug!(record_id = input.id, leader06 = ?input.leader06, "unclassifiable record skipped");
                    Ok(ProcessResult::skipped(input.id))
                }
            }
        };
        self.controller.note_record();

        match outcome {
            Ok(result) => Ok(result),
            Err(e) if e.category() == ErrorCategory::PerRecord => {
                error!(record_id = input.id, error = %e, "record failed");
                Ok(ProcessResult::failed(input.id, RecordMessage::from_error(&e)))
            }
            Err(e) => {
                self.controller.fail();
                error!(record_id = input.id, error = %e, "fatal error, batch aborted");
                Err(e)
            }
        }
    }

    fn org_code(&self, input: &InputRecord) -> Result<String> {
        self.config
            .org_code_override
            .clone()
            .or_else(|| {
                input
                    .org_code
                    .as_deref()
                    .map(str::trim)
                    .filter(|org| !org.is_empty())
                    .map(str::to_string)
            })
            .ok_or_else(|| {
                EngineError::missing_context(format!("record {} has no organization code", input.id))
            })
    }

    /// Live outputs of an earlier materialization of `input_id`
    fn previous_outputs(&self, input_id: RecordId) -> Result<PreviousOutputs> {
        let mut previous = PreviousOutputs::default();
        for id in self.repo.successors_of(input_id)? {
            let record = self.repo.get_record(id)?.ok_or_else(|| {
                EngineError::invariant(format!("successor {} of record {} is missing", id, input_id))
            })?;
            if matches!(record.status, RecordStatus::Deleted | RecordStatus::Replaced) {
                continue;
            }
            let slot = previous.slot_mut(record.level);
            if let Some(existing) = *slot {
                return Err(EngineError::invariant(format!(
                    "record {} has two live {} successors: {} and {}",
                    input_id, record.level, existing, id
                )));
            }
            *slot = Some(id);
        }
        Ok(previous)
    }

    fn apply(&self, split: &Split) -> Result<()> {
        for record in &split.records {
            self.repo.add_record(record.clone())?;
        }
        for (from, to) in &split.links {
            self.repo.add_link(*from, *to)?;
        }
        Ok(())
    }

    fn process_bib(&mut self, input: &InputRecord) -> Result<ProcessResult> {
        let org = self.org_code(input)?;
        let control_numbers: Vec<String> = input
            .bib_control_numbers()
            .into_iter()
            .map(str::to_string)
            .collect();
        if control_numbers.is_empty() {
            return Ok(ProcessResult::failed(
                input.id,
                RecordMessage::error(MessageCode::NoOutput, "bib has no control number"),
            ));
        }
        let previous = self.previous_outputs(input.id)?;
        let mut result = ProcessResult::new(input.id);

        let manifestation_id = match previous.manifestation {
            Some(id) => {
                let dropped = self.identity.retain_processed(id, &org, &control_numbers);
                if !dropped.is_empty() {
                    debug!(
                        record_id = input.id,
                        manifestation_id = id,
                        dropped = ?dropped,
                        "control numbers no longer name manifestation"
                    );
                }
                id
            }
            None => {
                let known = control_numbers
                    .iter()
                    .find_map(|cn| self.identity.lookup_processed(&org, cn))
                    .or_else(|| {
                        control_numbers
                            .iter()
                            .find_map(|cn| self.identity.lookup_reserved(&org, cn))
                    });
                match known {
                    Some(id) => id,
                    None => self.allocator.next()?,
                }
            }
        };

        for cn in &control_numbers {
            let Some(reserved) = self.identity.lookup_reserved(&org, cn) else {
                continue;
            };
            self.identity.resolve_reservation(&org, cn, reserved);
            if reserved != manifestation_id {
                self.retarget_held(reserved, manifestation_id)?;
            }
            for holding_id in self.held.ids_to_activate(reserved, self.store.as_ref())? {
                if self.is_held(holding_id)? {
                    result.activations.push(holding_id);
                }
            }
        }
        for cn in &control_numbers {
            self.identity.mark_processed(&org, cn, manifestation_id);
        }

        match input.lccn.as_deref() {
            Some(raw) => {
                if self.matchpoints.changed(input.id, raw) {
                    self.matchpoints.remove(input.id);
                    if !self.matchpoints.add(input.id, raw) {
                        debug!(record_id = input.id, value = raw, "match value has no valid key");
                    }
                }
                let candidates = self
                    .matchpoints
                    .candidates(self.store.as_ref(), raw, input.id)?;
                if !candidates.is_empty() {
                    result.messages.push(RecordMessage::info(
                        MessageCode::DuplicateCandidates,
                        format!("records sharing match key: {:?}", candidates),
                    ));
                }
            }
            None => {
                self.matchpoints.remove(input.id);
            }
        }

        let split = self
            .splitter
            .split_bib(input, manifestation_id, &previous, &self.allocator)?;
        self.apply(&split)?;

        if previous.is_empty() {
            self.controller.counters_mut().input_bibs += 1;
        }
        debug!(
            record_id = input.id,
            org = %org,
            manifestation_id,
            activations = result.activations.len(),
            "bib processed"
        );
        result.outputs = split.records;
        Ok(result)
    }

    fn is_held(&self, id: RecordId) -> Result<bool> {
        Ok(self
            .repo
            .get_record(id)?
            .is_some_and(|r| r.status == RecordStatus::Held))
    }

    /// Move links of holdings held against `from` onto manifestation `to`
    fn retarget_held(&mut self, from: RecordId, to: RecordId) -> Result<()> {
        for holding_id in self.held.holdings_held_against(from, self.store.as_ref())? {
            self.repo.remove_link(holding_id, from)?;
            self.repo.add_link(holding_id, to)?;
        }
        debug!(from, to, "held holdings re-targeted");
        Ok(())
    }

    fn process_holding(&mut self, input: &InputRecord) -> Result<ProcessResult> {
        let org = self.org_code(input)?;
        let control_numbers = input.referenced_control_numbers();
        if control_numbers.is_empty() {
            return Ok(ProcessResult::failed(
                input.id,
                RecordMessage::error(
                    MessageCode::NoOutput,
                    "holding references no bibliographic record",
                ),
            ));
        }
        let previous = self.previous_outputs(input.id)?;

        let holding_id = match previous.holdings {
            Some(id) => id,
            None => self.allocator.next()?,
        };
        self.held.drop_holding(holding_id);

        let mut targets = Vec::new();
        let mut reserved = Vec::new();
        for cn in &control_numbers {
            let id = match self.identity.lookup_processed(&org, cn) {
                Some(id) => id,
                None => {
                    let id = self.identity.reserve(&org, cn)?;
                    reserved.push(id);
                    id
                }
            };
            if !targets.contains(&id) {
                targets.push(id);
            }
        }

        let status = if reserved.is_empty() {
            RecordStatus::Active
        } else {
            RecordStatus::Held
        };
        for manifestation_id in &reserved {
            self.held.hold(holding_id, *manifestation_id);
        }
        for old in self.repo.get_linked_to_record_ids(holding_id)? {
            if !targets.contains(&old) {
                self.repo.remove_link(holding_id, old)?;
            }
        }

        let split = self.splitter.split_holding(
            input,
            holding_id,
            BibReferences::new(org.clone(), input.referenced_bibs.clone()),
            &targets,
            status,
        );
        self.apply(&split)?;

        if previous.is_empty() {
            self.controller.counters_mut().input_holdings += 1;
        }
        debug!(
            record_id = input.id,
            org = %org,
            holding_id,
            status = ?status,
            manifestations = ?targets,
            "holding processed"
        );
        let mut result = ProcessResult::new(input.id);
        result.outputs = split.records;
        Ok(result)
    }

    fn process_deleted(&mut self, input: &InputRecord) -> Result<ProcessResult> {
        let previous = self.previous_outputs(input.id)?;
        if previous.is_empty() {
            debug!(record_id = input.id, "deleted record has no live outputs");
            return Ok(ProcessResult::skipped(input.id));
        }

        let mut result = ProcessResult::new(input.id);
        for id in [
            previous.work,
            previous.expression,
            previous.manifestation,
            previous.holdings,
        ]
        .into_iter()
        .flatten()
        {
            let Some(record) = self.repo.get_record(id)? else {
                continue;
            };
            let deleted = record.restated(RecordStatus::Deleted);
            self.repo.add_record(deleted.clone())?;
            result.outputs.push(deleted);
        }

        if let Some(manifestation_id) = previous.manifestation {
            self.matchpoints.remove(input.id);
            let names = self.identity.forget_processed_id(manifestation_id);
            let holdings = self.repo.get_linked_record_ids(manifestation_id)?;
            let fixed = self.held.orphan_fix_up(
                manifestation_id,
                &holdings,
                &mut self.identity,
                self.repo.as_ref(),
            )?;
            debug!(
                record_id = input.id,
                manifestation_id,
                identities = names.len(),
                holdings = fixed.len(),
                "manifestation deleted"
            );
            result.outputs.extend(fixed);
        }

        if let Some(holding_id) = previous.holdings {
            self.held.drop_holding(holding_id);
            for to in self.repo.get_linked_to_record_ids(holding_id)? {
                self.repo.remove_link(holding_id, to)?;
            }
            debug!(record_id = input.id, holding_id, "holding deleted");
        }

        Ok(result)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Commit and recovery
    // ═══════════════════════════════════════════════════════════════════════

    /// Forced commit of everything accumulated since the last one
    pub fn commit(&mut self) -> Result<CommitReport> {
        self.controller.commit(
            self.store.as_ref(),
            self.repo.as_ref(),
            &mut self.identity,
            &mut self.held,
            &mut self.matchpoints,
        )
    }

    /// Commit once `commit_interval` records have been processed
    pub fn commit_if_due(&mut self) -> Result<Option<CommitReport>> {
        if self.controller.should_commit() {
            self.commit().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Discard everything since the last forced commit and reload from the
    /// store
    pub fn recover(&mut self) -> Result<()> {
        warn!(
            batch_id = %self.controller.batch_id(),
            phase = %self.controller.phase(),
            records = self.controller.records_since_commit(),
            "discarding unflushed state"
        );
        self.allocator.discard_block();
        self.held.clear();
        self.load()?;
        self.controller.reset();
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inspection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            batch_id: self.controller.batch_id(),
            phase: self.controller.phase(),
            counters: self.controller.counters(),
            processed_identities: self.identity.processed_len(),
            reserved_identities: self.identity.reserved_len(),
            pending_held_links: self.held.pending_links().len(),
            matchpoints_in_memory: self.matchpoints.records_in_memory(),
            matchpoints: self.matchpoints.stats(self.store.as_ref())?,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> CommitPhase {
        self.controller.phase()
    }

    pub fn counters(&self) -> BatchCounters {
        self.controller.counters()
    }

    pub fn identity(&self) -> &ManifestationIdentityMap {
        &self.identity
    }

    pub fn held(&self) -> &HeldLinkageManager {
        &self.held
    }

    pub fn matchpoints(&self) -> &MatchPointIndex {
        &self.matchpoints
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
