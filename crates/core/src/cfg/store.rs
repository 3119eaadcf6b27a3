use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use crate::cfg::{BasicBlock, BlockError};

/// Counters describing how much overlap repair an exploration needed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub splits: usize,
    pub duplicates: usize,
}

/// Address-ordered set of pairwise-disjoint basic blocks.
#[derive(Debug, Default)]
pub struct BlockStore {
    blocks: BTreeMap<u64, BasicBlock>,
    stats: StoreStats,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `block`, splitting on overlap until every stored interval is disjoint.
    ///
    /// - same start: the new block is a duplicate and is dropped;
    /// - new block starts first: it is split at the existing block's start and
    ///   the existing block is dropped;
    /// - new block starts inside an existing one: the existing block is split at
    ///   the new start and the new block is dropped.
    pub fn insert(&mut self, block: BasicBlock) -> Result<(), BlockError> {
        let mut pending = vec![block];
        while let Some(block) = pending.pop() {
            let Some(existing) = self.overlapping(&block).map(|b| b.address) else {
                self.blocks.insert(block.address, block);
                continue;
            };

            if block.address == existing {
                debug!("dropping duplicate block at {existing:#x}");
                self.stats.duplicates += 1;
            } else if block.address < existing {
                let (first, second) = block.split(existing)?;
                debug!("split new block {:#x} at {existing:#x}", block.address);
                self.blocks.remove(&existing);
                self.stats.splits += 1;
                pending.push(second);
                pending.push(first);
            } else if let Some(old) = self.blocks.remove(&existing) {
                let split = old.split(block.address);
                let (first, second) = match split {
                    Ok(halves) => halves,
                    Err(err) => {
                        self.blocks.insert(existing, old);
                        return Err(err);
                    }
                };
                debug!("split stored block {existing:#x} at {:#x}", block.address);
                self.stats.splits += 1;
                pending.push(second);
                pending.push(first);
            }
        }
        Ok(())
    }

    /// Some stored block whose interval intersects `block`'s.
    fn overlapping(&self, block: &BasicBlock) -> Option<&BasicBlock> {
        self.blocks
            .range(..block.end())
            .next_back()
            .map(|(_, b)| b)
            .filter(|b| b.end() > block.address)
    }

    pub fn get(&self, address: u64) -> Option<&BasicBlock> {
        self.blocks.get(&address)
    }

    pub fn contains(&self, address: u64) -> bool {
        self.blocks.contains_key(&address)
    }

    /// The block whose interval contains `address`.
    pub fn find_containing(&self, address: u64) -> Option<&BasicBlock> {
        self.blocks.range(..=address).next_back().map(|(_, b)| b).filter(|b| b.contains(address))
    }

    pub fn iter(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values()
    }

    pub fn addresses(&self) -> impl Iterator<Item = u64> + '_ {
        self.blocks.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }
}
