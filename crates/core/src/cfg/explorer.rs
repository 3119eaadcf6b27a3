use std::collections::BTreeSet;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cfg::jump_table::jump_table_base;
use crate::cfg::{BasicBlock, BlockError, BlockStore};
use crate::image::BinaryImage;
use crate::lifter::{LiftError, Lifter};

/// Bytes read at a time while scanning a candidate string.
const STRING_CHUNK_LEN: u64 = 256;

#[derive(Debug, Error)]
pub enum ExploreError {
    #[error("no entry points to explore from")]
    NoEntryPoints,

    #[error("lifter failure: {0}")]
    Lifter(#[from] LiftError),

    #[error(transparent)]
    Block(#[from] BlockError),
}

/// Policy knobs for candidate-address extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploreOptions {
    /// Scan lifted bodies for constants that look like code addresses.
    pub extract_addresses: bool,
    /// Shortest printable run (before the NUL) treated as a string.
    pub min_string_len: usize,
    /// Exclude detected jump-table bases from the candidates.
    pub detect_jump_tables: bool,
}

impl Default for ExploreOptions {
    fn default() -> Self {
        Self { extract_addresses: true, min_string_len: 2, detect_jump_tables: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExploreStats {
    /// Addresses lifted successfully.
    pub lifted: usize,
    /// Addresses dropped after a decode fault.
    pub dropped: usize,
    /// Constants enqueued as candidate addresses.
    pub candidates: usize,
    /// Constants rejected by the candidate filters.
    pub rejected: usize,
    pub splits: usize,
    pub duplicates: usize,
}

/// Result of a finished exploration.
#[derive(Debug)]
pub struct Exploration {
    pub blocks: BlockStore,
    /// Every address taken off the worklist.
    pub explored: BTreeSet<u64>,
    /// Addresses whose lift failed with a recoverable fault.
    pub dropped: BTreeSet<u64>,
    pub jump_tables: BTreeSet<u64>,
    pub stats: ExploreStats,
}

/// Worklist driver: lifts candidate addresses lowest-first until none remain.
///
/// The lifter is initialised on construction and closed when the explorer is dropped.
pub struct AddressExplorer<'a> {
    lifter: &'a mut dyn Lifter,
    image: &'a dyn BinaryImage,
    options: ExploreOptions,
    worklist: BTreeSet<u64>,
    explored: BTreeSet<u64>,
    dropped: BTreeSet<u64>,
    jump_tables: BTreeSet<u64>,
    store: BlockStore,
    stats: ExploreStats,
}

impl<'a> AddressExplorer<'a> {
    pub fn new(
        lifter: &'a mut dyn Lifter,
        image: &'a dyn BinaryImage,
        options: ExploreOptions,
    ) -> Result<Self, ExploreError> {
        lifter.init()?;
        Ok(Self {
            lifter,
            image,
            options,
            worklist: BTreeSet::new(),
            explored: BTreeSet::new(),
            dropped: BTreeSet::new(),
            jump_tables: BTreeSet::new(),
            store: BlockStore::new(),
            stats: ExploreStats::default(),
        })
    }

    pub fn enqueue(&mut self, address: u64) {
        if !self.explored.contains(&address) {
            self.worklist.insert(address);
        }
    }

    pub fn is_explored(&self, address: u64) -> bool {
        self.explored.contains(&address)
    }

    /// Process the worklist until it is empty.
    pub fn run(mut self) -> Result<Exploration, ExploreError> {
        while let Some(address) = self.worklist.pop_first() {
            if !self.explored.insert(address) {
                continue;
            }
            self.step(address)?;
        }

        let store_stats = self.store.stats();
        self.stats.splits = store_stats.splits;
        self.stats.duplicates = store_stats.duplicates;
        info!(
            "explored {} addresses: {} blocks, {} dropped",
            self.explored.len(),
            self.store.len(),
            self.dropped.len()
        );
        Ok(Exploration {
            blocks: std::mem::take(&mut self.store),
            explored: std::mem::take(&mut self.explored),
            dropped: std::mem::take(&mut self.dropped),
            jump_tables: std::mem::take(&mut self.jump_tables),
            stats: std::mem::take(&mut self.stats),
        })
    }

    fn step(&mut self, address: u64) -> Result<(), ExploreError> {
        debug!("lifting {address:#x}");
        let block = match BasicBlock::lift(&mut *self.lifter, self.image, address) {
            Ok(block) => block,
            Err(BlockError::Lift(err)) if err.is_recoverable() => {
                debug!("dropping {address:#x}: {err}");
                self.dropped.insert(address);
                self.stats.dropped += 1;
                return Ok(());
            }
            Err(BlockError::Lift(err)) => return Err(ExploreError::Lifter(err)),
            Err(err) => return Err(err.into()),
        };
        self.stats.lifted += 1;

        if self.options.detect_jump_tables {
            if let Some(base) = jump_table_base(&block) {
                debug!("jump table base {base:#x} used at {address:#x}");
                self.jump_tables.insert(base);
            }
        }

        let mut next: Vec<u64> = block.successors.iter().copied().collect();
        next.extend(block.call_targets.iter().copied());
        let constants: Vec<u64> = if self.options.extract_addresses {
            block.body.constants().collect()
        } else {
            Vec::new()
        };

        self.store.insert(block)?;

        for target in next {
            self.enqueue(target);
        }
        for value in constants {
            if self.is_candidate(value) {
                self.stats.candidates += 1;
                self.enqueue(value);
            } else {
                self.stats.rejected += 1;
            }
        }
        Ok(())
    }

    /// Candidate filter for constants found in lifted code.
    fn is_candidate(&self, value: u64) -> bool {
        if self.explored.contains(&value) || self.worklist.contains(&value) {
            return false;
        }
        if !self.image.is_code(value) {
            return false;
        }
        if self.store.find_containing(value).is_some_and(|b| b.address != value) {
            return false;
        }
        if self.jump_tables.contains(&value) {
            return false;
        }
        !looks_like_string(self.image, value, self.options.min_string_len)
    }
}

impl Drop for AddressExplorer<'_> {
    fn drop(&mut self) {
        self.lifter.close();
    }
}

fn printable(c: u8) -> bool {
    (0x20..0x80).contains(&c) || c == b'\r' || c == b'\n'
}

/// Bytes from `address` to the end of its section, read a chunk at a time.
fn section_bytes<'a>(image: &'a dyn BinaryImage, address: u64) -> impl Iterator<Item = u8> + 'a {
    let end = image.section_containing(address).map_or(address, |s| s.end());
    (address..end)
        .step_by(STRING_CHUNK_LEN as usize)
        .map_while(move |start| {
            image.read(start, (end - start).min(STRING_CHUNK_LEN) as usize).ok()
        })
        .flatten()
}

/// NUL-terminated run of at least `min_len` printable characters, as ASCII or UTF-16LE.
///
/// The run may extend to the end of the containing section.
pub fn looks_like_string(image: &dyn BinaryImage, address: u64, min_len: usize) -> bool {
    let mut ascii = 0;
    for c in section_bytes(image, address) {
        if c == 0 {
            if ascii >= min_len {
                return true;
            }
            break;
        }
        if !printable(c) {
            break;
        }
        ascii += 1;
    }

    let mut wide = 0;
    let mut bytes = section_bytes(image, address);
    while let (Some(lo), Some(hi)) = (bytes.next(), bytes.next()) {
        match (lo, hi) {
            (0, 0) => return wide >= min_len,
            (c, 0) if printable(c) => wide += 1,
            _ => return false,
        }
    }
    false
}

/// Explore from `entries` with a fresh explorer.
pub fn explore(
    lifter: &mut dyn Lifter,
    image: &dyn BinaryImage,
    entries: &[u64],
    options: &ExploreOptions,
) -> Result<Exploration, ExploreError> {
    if entries.is_empty() {
        return Err(ExploreError::NoEntryPoints);
    }
    let mut explorer = AddressExplorer::new(lifter, image, options.clone())?;
    for entry in entries {
        explorer.enqueue(*entry);
    }
    explorer.run()
}
