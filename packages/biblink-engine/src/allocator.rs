//! Identifier Allocator
//!
//! `next()` hands out ids from a block whose end is persisted in the store
//! before the first id of the block is returned, so a restart can only skip
//! ids, never repeat them. `reserve_next_and_increment()` bypasses the block
//! and consumes one id from the store directly.

use std::sync::Arc;

use biblink_storage::{IdSequence, RecordId};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Default)]
struct IdBlock {
    next: RecordId,
    end: RecordId,
}

impl IdBlock {
    fn remaining(&self) -> RecordId {
        self.end - self.next
    }
}

/// Cloning shares the current block
#[derive(Clone)]
pub struct IdAllocator {
    sequence: Arc<dyn IdSequence>,
    block_size: u32,
    block: Arc<Mutex<IdBlock>>,
}

impl IdAllocator {
    pub fn new(sequence: Arc<dyn IdSequence>, block_size: u32) -> Self {
        Self {
            sequence,
            block_size: block_size.max(1),
            block: Arc::new(Mutex::new(IdBlock::default())),
        }
    }

    pub fn next(&self) -> Result<RecordId> {
        let mut block = self.block.lock();
        if block.remaining() <= 0 {
            let first = self.sequence.reserve_id_block(self.block_size)?;
            debug!(first, size = self.block_size, "reserved id block");
            block.next = first;
            block.end = first + RecordId::from(self.block_size);
        }
        let id = block.next;
        block.next += 1;
        Ok(id)
    }

    pub fn reserve_next_and_increment(&self) -> Result<RecordId> {
        Ok(self.sequence.next_id_and_increment()?)
    }

    /// Abandon the rest of the current block
    pub fn discard_block(&self) {
        let mut block = self.block.lock();
        block.next = block.end;
    }
}
