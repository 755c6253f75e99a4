//! Batch Commit Controller
//!
//! State machine over one processing batch:
//!
//! ```text
//! ACCUMULATING --commit--> FLUSHING --ok--> ACCUMULATING
//!                              |
//!                              +--error--> FAILED --reset--> ACCUMULATING
//! ```
//!
//! A forced commit runs four steps in order: persist every delta, clear the
//! deltas, flush held links and apply activations, persist the counters. The
//! store has no cross-table transaction, so a failure anywhere leaves the
//! controller FAILED; the owner must discard in-memory state and reload.

use std::time::Instant;

use biblink_storage::{FrbrLevel, LinkGraph, PersistentStore, RecordStatus, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{CommitStage, EngineError, Result};
use crate::held::HeldLinkageManager;
use crate::identity::ManifestationIdentityMap;
use crate::matchpoint::MatchPointIndex;

pub const INPUT_BIBS_PROPERTY: &str = "input_bibs";
pub const INPUT_HOLDINGS_PROPERTY: &str = "input_holdings";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPhase {
    Accumulating,
    Flushing,
    Failed,
}

impl CommitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitPhase::Accumulating => "accumulating",
            CommitPhase::Flushing => "flushing",
            CommitPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CommitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// New input records seen, across all runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounters {
    pub input_bibs: u64,
    pub input_holdings: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitReport {
    pub batch_id: Uuid,
    /// 1-based commit number within this controller's lifetime
    pub sequence: u64,
    pub records: usize,
    pub identity_entries: usize,
    pub matchpoint_rows: usize,
    pub held_links_persisted: usize,
    pub manifestations_released: usize,
    pub holdings_activated: usize,
    pub counters: BatchCounters,
    pub duration_ms: u64,
    pub committed_at: DateTime<Utc>,
}

pub struct BatchCommitController {
    batch_id: Uuid,
    phase: CommitPhase,
    counters: BatchCounters,
    commit_interval: usize,
    records_since_commit: usize,
    commits: u64,
}

fn at_stage(stage: CommitStage) -> impl FnOnce(EngineError) -> EngineError {
    move |err| match err {
        EngineError::Storage(source) => EngineError::Commit { stage, source },
        other => other,
    }
}

fn parse_counter(key: &str, value: Option<String>) -> Result<u64> {
    match value {
        None => Ok(0),
        Some(v) => v.trim().parse::<u64>().map_err(|e| {
            StorageError::serialization(format!("property '{}' is not a counter: {}", key, v))
                .with_source(e)
                .into()
        }),
    }
}

impl BatchCommitController {
    pub fn new(commit_interval: usize) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            phase: CommitPhase::Accumulating,
            counters: BatchCounters::default(),
            commit_interval: commit_interval.max(1),
            records_since_commit: 0,
            commits: 0,
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn phase(&self) -> CommitPhase {
        self.phase
    }

    pub fn counters(&self) -> BatchCounters {
        self.counters
    }

    pub fn counters_mut(&mut self) -> &mut BatchCounters {
        &mut self.counters
    }

    pub fn records_since_commit(&self) -> usize {
        self.records_since_commit
    }

    pub fn note_record(&mut self) {
        self.records_since_commit += 1;
    }

    pub fn should_commit(&self) -> bool {
        self.phase == CommitPhase::Accumulating && self.records_since_commit >= self.commit_interval
    }

    pub fn load_counters<S: PersistentStore + ?Sized>(&mut self, store: &S) -> Result<()> {
        self.counters = BatchCounters {
            input_bibs: parse_counter(INPUT_BIBS_PROPERTY, store.get_property(INPUT_BIBS_PROPERTY)?)?,
            input_holdings: parse_counter(
                INPUT_HOLDINGS_PROPERTY,
                store.get_property(INPUT_HOLDINGS_PROPERTY)?,
            )?,
        };
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transitions
    // ═══════════════════════════════════════════════════════════════════════

    fn transition(&mut self, from: CommitPhase, to: CommitPhase) -> Result<()> {
        if self.phase != from {
            return Err(EngineError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: to.to_string(),
            });
        }
        self.phase = to;
        Ok(())
    }

    /// ACCUMULATING → FLUSHING
    pub fn begin_flush(&mut self) -> Result<()> {
        self.transition(CommitPhase::Accumulating, CommitPhase::Flushing)
    }

    /// FLUSHING → ACCUMULATING
    pub fn finish_flush(&mut self) -> Result<()> {
        self.transition(CommitPhase::Flushing, CommitPhase::Accumulating)
    }

    /// Any phase → FAILED
    pub fn fail(&mut self) {
        self.phase = CommitPhase::Failed;
    }

    /// Back to ACCUMULATING with nothing pending, after state was reloaded
    pub fn reset(&mut self) {
        self.phase = CommitPhase::Accumulating;
        self.records_since_commit = 0;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Forced commit
    // ═══════════════════════════════════════════════════════════════════════

    pub fn commit<S: PersistentStore + ?Sized>(
        &mut self,
        store: &S,
        repo: &dyn LinkGraph,
        identity: &mut ManifestationIdentityMap,
        held: &mut HeldLinkageManager,
        matchpoints: &mut MatchPointIndex,
    ) -> Result<CommitReport> {
        self.begin_flush()?;
        let start = Instant::now();

        match self.flush_all(store, repo, identity, held, matchpoints) {
            Ok(mut report) => {
                report.duration_ms = start.elapsed().as_millis() as u64;
                self.commits += 1;
                report.sequence = self.commits;
                self.records_since_commit = 0;
                self.finish_flush()?;

                info!(
                    batch_id = %self.batch_id,
                    sequence = report.sequence,
                    records = report.records,
                    identity_entries = report.identity_entries,
                    matchpoint_rows = report.matchpoint_rows,
                    held_links = report.held_links_persisted,
                    activated = report.holdings_activated,
                    duration_ms = report.duration_ms,
                    "forced commit complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.fail();
                error!(batch_id = %self.batch_id, error = %e, "forced commit failed");
                Err(e)
            }
        }
    }

    fn flush_all<S: PersistentStore + ?Sized>(
        &self,
        store: &S,
        repo: &dyn LinkGraph,
        identity: &mut ManifestationIdentityMap,
        held: &mut HeldLinkageManager,
        matchpoints: &mut MatchPointIndex,
    ) -> Result<CommitReport> {
        // 1. deltas
        let delta = identity.pending_delta();
        store
            .persist_identity_deltas(&delta)
            .map_err(EngineError::commit(CommitStage::IdentityDelta))?;
        let matchpoint_rows = matchpoints
            .persist(store)
            .map_err(at_stage(CommitStage::MatchpointDelta))?;

        // 2. clear
        identity.clear_delta();
        matchpoints.clear_delta();

        // 3. held links and activations
        store
            .delete_held_links_for_holdings(&held.superseded_ids())
            .map_err(EngineError::commit(CommitStage::HeldLinks))?;
        let links = held.pending_links();
        store
            .persist_held_links(&links)
            .map_err(EngineError::commit(CommitStage::HeldLinks))?;

        let mut activated = 0;
        for holding_id in held.activations() {
            let record = repo
                .get_record(holding_id)
                .map_err(EngineError::commit(CommitStage::Activation))?;
            match record {
                Some(r) if r.level == FrbrLevel::Holdings && r.status == RecordStatus::Held => {
                    repo.activate_record(FrbrLevel::Holdings, holding_id)
                        .map_err(EngineError::commit(CommitStage::Activation))?;
                    activated += 1;
                }
                _ => debug!(holding_id, "holding no longer held; activation skipped"),
            }
        }

        let released = held.released_ids();
        store
            .delete_held_links(&released)
            .map_err(EngineError::commit(CommitStage::HeldLinks))?;
        held.clear();

        // 4. counters
        store
            .set_property(INPUT_BIBS_PROPERTY, &self.counters.input_bibs.to_string())
            .map_err(EngineError::commit(CommitStage::Counters))?;
        store
            .set_property(
                INPUT_HOLDINGS_PROPERTY,
                &self.counters.input_holdings.to_string(),
            )
            .map_err(EngineError::commit(CommitStage::Counters))?;

        Ok(CommitReport {
            batch_id: self.batch_id,
            sequence: 0,
            records: self.records_since_commit,
            identity_entries: delta.len(),
            matchpoint_rows,
            held_links_persisted: links.len(),
            manifestations_released: released.len(),
            holdings_activated: activated,
            counters: self.counters,
            duration_ms: 0,
            committed_at: Utc::now(),
        })
    }
}
