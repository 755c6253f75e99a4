//! Record Splitter
//!
//! Turns one resolved input record into its FRBR-level output records and
//! the links between them. Ids of a previous materialization are reused so
//! re-harvesting a record replaces its outputs instead of duplicating them.

use biblink_storage::{BibReferences, FrbrLevel, OutputRecord, RecordId, RecordStatus};

use crate::allocator::IdAllocator;
use crate::error::Result;
use crate::record::InputRecord;

/// Live outputs of an earlier materialization, by level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreviousOutputs {
    pub work: Option<RecordId>,
    pub expression: Option<RecordId>,
    pub manifestation: Option<RecordId>,
    pub holdings: Option<RecordId>,
}

impl PreviousOutputs {
    pub fn is_empty(&self) -> bool {
        self.work.is_none()
            && self.expression.is_none()
            && self.manifestation.is_none()
            && self.holdings.is_none()
    }

    pub fn slot_mut(&mut self, level: FrbrLevel) -> &mut Option<RecordId> {
        match level {
            FrbrLevel::Work => &mut self.work,
            FrbrLevel::Expression => &mut self.expression,
            FrbrLevel::Manifestation => &mut self.manifestation,
            FrbrLevel::Holdings => &mut self.holdings,
        }
    }
}

/// Output records plus `(from, to)` links
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Split {
    pub records: Vec<OutputRecord>,
    pub links: Vec<(RecordId, RecordId)>,
}

pub trait RecordSplitter: Send + Sync {
    fn split_bib(
        &self,
        input: &InputRecord,
        manifestation_id: RecordId,
        previous: &PreviousOutputs,
        allocator: &IdAllocator,
    ) -> Result<Split>;

    fn split_holding(
        &self,
        input: &InputRecord,
        holding_id: RecordId,
        references: BibReferences,
        manifestation_ids: &[RecordId],
        status: RecordStatus,
    ) -> Split;
}

/// Work / Expression / Manifestation for bibs, one Holdings record per holding
#[derive(Debug, Clone, Copy, Default)]
pub struct FrbrSplitter;

impl RecordSplitter for FrbrSplitter {
    fn split_bib(
        &self,
        input: &InputRecord,
        manifestation_id: RecordId,
        previous: &PreviousOutputs,
        allocator: &IdAllocator,
    ) -> Result<Split> {
        let work_id = match previous.work {
            Some(id) => id,
            None => allocator.next()?,
        };
        let expression_id = match previous.expression {
            Some(id) => id,
            None => allocator.next()?,
        };

        Ok(Split {
            records: vec![
                OutputRecord::new(work_id, FrbrLevel::Work).with_predecessor(input.id),
                OutputRecord::new(expression_id, FrbrLevel::Expression).with_predecessor(input.id),
                OutputRecord::new(manifestation_id, FrbrLevel::Manifestation)
                    .with_predecessor(input.id),
            ],
            links: vec![(expression_id, work_id), (manifestation_id, expression_id)],
        })
    }

    fn split_holding(
        &self,
        input: &InputRecord,
        holding_id: RecordId,
        references: BibReferences,
        manifestation_ids: &[RecordId],
        status: RecordStatus,
    ) -> Split {
        Split {
            records: vec![OutputRecord::new(holding_id, FrbrLevel::Holdings)
                .with_status(status)
                .with_predecessor(input.id)
                .with_references(references)],
            links: manifestation_ids.iter().map(|m| (holding_id, *m)).collect(),
        }
    }
}
