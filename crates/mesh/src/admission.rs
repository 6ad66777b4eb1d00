//! Admission strategies.
//!
//! A replica's queue and shared candidate set change shape with the protocol
//! mode. Both shapes sit behind [`AdmissionStrategy`], chosen once when the
//! replica is built.
//!
//! - **Classic**: the queue is FIFO, shared candidates are a sequence of
//!   independent copies.
//! - **Modified**: queue and shared candidates count acknowledgements per
//!   block. A candidate is commit-eligible only when its count equals the
//!   number of participants in its transaction.

use blockmesh_core::{Block, BlockRecord, Mode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::warn;

use crate::error::MeshResult;

/// Queue and candidate-set behaviour of a replica
pub trait AdmissionStrategy: Send {
    fn mode(&self) -> Mode;

    /// Admit a block submitted by a participant
    fn submit(&mut self, block: Block);

    /// Queue length as reported to the harness
    fn queue_len(&self) -> usize;

    /// Front of the queue together with its acknowledgement count
    fn front_mut(&mut self) -> Option<(&mut Block, u32)>;

    fn pop_front(&mut self) -> Option<Block>;

    /// Receive a candidate fanned out during broadcast
    fn share(&mut self, block: Block, acks: u32);

    fn shared_len(&self) -> usize;

    /// Take this round's commit-eligible candidates in arrival order.
    ///
    /// The shared set is empty afterwards.
    fn take_candidates(&mut self) -> Vec<Block>;

    /// Remove the queue front if it is the block just committed
    fn settle(&mut self, committed: &Block);

    /// Drop the queue entry for a block committed while this replica was
    /// away. Returns the number of entries removed.
    fn forget(&mut self, committed: &Block) -> usize;

    /// Discard this round's candidates without committing them
    fn clear_shared(&mut self);

    fn snapshot(&self) -> MeshResult<Value>;

    fn restore(&mut self, snapshot: Value) -> MeshResult<()>;
}

/// Admission strategy for `mode`
pub fn for_mode(mode: Mode) -> Box<dyn AdmissionStrategy> {
    match mode {
        Mode::Classic => Box::new(ClassicAdmission::default()),
        Mode::Modified => Box::new(ModifiedAdmission::default()),
    }
}

fn records_to_blocks(records: Vec<BlockRecord>) -> MeshResult<Vec<Block>> {
    records
        .into_iter()
        .map(|record| -> MeshResult<Block> {
            let mut block = Block::from_record(record)?;
            block.clear_approval();
            Ok(block)
        })
        .collect()
}

/// FIFO queue, candidates kept as independent copies
#[derive(Debug, Default)]
pub struct ClassicAdmission {
    queue: VecDeque<Block>,
    shared: Vec<Block>,
}

impl AdmissionStrategy for ClassicAdmission {
    fn mode(&self) -> Mode {
        Mode::Classic
    }

    fn submit(&mut self, block: Block) {
        self.queue.push_back(block);
    }

    fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn front_mut(&mut self) -> Option<(&mut Block, u32)> {
        self.queue.front_mut().map(|block| (block, 1))
    }

    fn pop_front(&mut self) -> Option<Block> {
        self.queue.pop_front()
    }

    fn share(&mut self, block: Block, _acks: u32) {
        self.shared.push(block);
    }

    fn shared_len(&self) -> usize {
        self.shared.len()
    }

    fn take_candidates(&mut self) -> Vec<Block> {
        std::mem::take(&mut self.shared)
    }

    fn settle(&mut self, committed: &Block) {
        if self.queue.front() == Some(committed) {
            self.queue.pop_front();
        }
    }

    fn forget(&mut self, committed: &Block) -> usize {
        match self.queue.iter().position(|queued| queued == committed) {
            Some(index) => {
                self.queue.remove(index);
                1
            }
            None => 0,
        }
    }

    fn clear_shared(&mut self) {
        self.shared.clear();
    }

    fn snapshot(&self) -> MeshResult<Value> {
        let records: Vec<BlockRecord> = self.queue.iter().map(Block::to_record).collect();
        Ok(serde_json::to_value(records)?)
    }

    fn restore(&mut self, snapshot: Value) -> MeshResult<()> {
        let records: Vec<BlockRecord> = serde_json::from_value(snapshot)?;
        self.queue = records_to_blocks(records)?.into();
        self.shared.clear();
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CountedRecord {
    block: BlockRecord,
    count: u32,
}

/// Acknowledgement-counting queue and candidate set.
///
/// Entries keep insertion order; identical candidates merge their counters.
#[derive(Debug, Default)]
pub struct ModifiedAdmission {
    queue: Vec<(Block, u32)>,
    shared: Vec<(Block, u32)>,
}

fn add_count(entries: &mut Vec<(Block, u32)>, block: Block, count: u32) {
    match entries.iter_mut().find(|(existing, _)| *existing == block) {
        Some((_, existing_count)) => *existing_count += count,
        None => entries.push((block, count)),
    }
}

impl AdmissionStrategy for ModifiedAdmission {
    fn mode(&self) -> Mode {
        Mode::Modified
    }

    fn submit(&mut self, block: Block) {
        add_count(&mut self.queue, block, 1);
    }

    fn queue_len(&self) -> usize {
        self.queue.iter().map(|(_, count)| *count as usize).sum()
    }

    fn front_mut(&mut self) -> Option<(&mut Block, u32)> {
        self.queue.first_mut().map(|(block, count)| (block, *count))
    }

    fn pop_front(&mut self) -> Option<Block> {
        if self.queue.is_empty() {
            None
        } else {
            Some(self.queue.remove(0).0)
        }
    }

    fn share(&mut self, block: Block, acks: u32) {
        add_count(&mut self.shared, block, acks);
    }

    fn shared_len(&self) -> usize {
        self.shared.len()
    }

    fn take_candidates(&mut self) -> Vec<Block> {
        std::mem::take(&mut self.shared)
            .into_iter()
            .filter_map(|(block, count)| {
                let expected = block.participant_count();
                if count as usize == expected {
                    Some(block)
                } else {
                    warn!(
                        sender = %block.sender(),
                        timestamp = block.timestamp(),
                        acks = count,
                        expected = expected,
                        "Dropping under-acknowledged candidate"
                    );
                    None
                }
            })
            .collect()
    }

    fn settle(&mut self, committed: &Block) {
        if matches!(self.queue.first(), Some((front, _)) if front == committed) {
            self.queue.remove(0);
        }
    }

    fn forget(&mut self, committed: &Block) -> usize {
        let before = self.queue.len();
        self.queue.retain(|(queued, _)| queued != committed);
        before - self.queue.len()
    }

    fn clear_shared(&mut self) {
        self.shared.clear();
    }

    fn snapshot(&self) -> MeshResult<Value> {
        let records: Vec<CountedRecord> = self
            .queue
            .iter()
            .map(|(block, count)| CountedRecord {
                block: block.to_record(),
                count: *count,
            })
            .collect();
        Ok(serde_json::to_value(records)?)
    }

    fn restore(&mut self, snapshot: Value) -> MeshResult<()> {
        let records: Vec<CountedRecord> = serde_json::from_value(snapshot)?;
        let mut queue = Vec::with_capacity(records.len());
        for record in records {
            let mut block = Block::from_record(record.block)?;
            block.clear_approval();
            queue.push((block, record.count));
        }
        self.queue = queue;
        self.shared.clear();
        Ok(())
    }
}
