//! Batch driver with stop / pause control
//!
//! Pulls records from an iterator in harvest order, feeds them to one
//! `LinkageService` and forces a commit every `commit_interval` records and
//! at the end of input. Stopping discards everything since the last forced
//! commit; pausing just stops pulling records, and calling `run` again with
//! the same iterator resumes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use biblink_storage::RecordId;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::commit::CommitReport;
use crate::error::Result;
use crate::message::RecordMessage;
use crate::record::InputRecord;
use crate::service::LinkageService;

/// Shared stop / pause flags
#[derive(Debug, Clone, Default)]
pub struct BatchControl {
    stop: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
}

impl BatchControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// Clear both flags before a new run
    pub fn reset(&self) {
        self.stop.store(false, Ordering::SeqCst);
        self.pause.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Input exhausted and committed
    Completed,
    /// Stopped pulling input; nothing was discarded
    Paused,
    /// Everything since the last forced commit was discarded
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRecord {
    pub record_id: RecordId,
    pub messages: Vec<RecordMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub outcome: BatchOutcome,
    pub records: usize,
    pub outputs: usize,
    pub skipped: usize,
    pub activations: usize,
    pub failures: Vec<FailedRecord>,
    pub commits: Vec<CommitReport>,
    pub duration_ms: u64,
}

impl BatchSummary {
    fn new() -> Self {
        Self {
            outcome: BatchOutcome::Completed,
            records: 0,
            outputs: 0,
            skipped: 0,
            activations: 0,
            failures: Vec::new(),
            commits: Vec::new(),
            duration_ms: 0,
        }
    }
}

pub struct BatchDriver {
    control: BatchControl,
}

impl BatchDriver {
    pub fn new(control: BatchControl) -> Self {
        Self { control }
    }

    pub fn control(&self) -> &BatchControl {
        &self.control
    }

    /// Run until the input ends, a stop or pause is requested, or a fatal
    /// error aborts the batch
    pub fn run<I>(&self, service: &mut LinkageService, input: &mut I) -> Result<BatchSummary>
    where
        I: Iterator<Item = InputRecord>,
    {
        let start = Instant::now();
        let mut summary = BatchSummary::new();

        loop {
            if self.control.is_stopped() {
                warn!(records = summary.records, "batch stopped");
                service.recover()?;
                summary.outcome = BatchOutcome::Stopped;
                break;
            }
            if self.control.is_paused() {
                info!(records = summary.records, "batch paused");
                summary.outcome = BatchOutcome::Paused;
                break;
            }

            let Some(record) = input.next() else {
                summary.commits.push(service.commit()?);
                summary.outcome = BatchOutcome::Completed;
                break;
            };

            let result = service.process(&record)?;
            summary.records += 1;
            summary.outputs += result.outputs.len();
            summary.activations += result.activations.len();
            if result.skipped {
                summary.skipped += 1;
            }
            if result.is_failure() {
                summary.failures.push(FailedRecord {
                    record_id: result.record_id,
                    messages: result.messages,
                });
            }

            if let Some(report) = service.commit_if_due()? {
                summary.commits.push(report);
            }
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            outcome = ?summary.outcome,
            records = summary.records,
            outputs = summary.outputs,
            failures = summary.failures.len(),
            commits = summary.commits.len(),
            duration_ms = summary.duration_ms,
            "batch finished"
        );
        Ok(summary)
    }
}
