//! Control-flow graph recovery: basic blocks, the overlap-repairing block store,
//! terminator classification and the worklist explorer.

pub mod block;
pub mod classify;
pub mod explorer;
pub mod jump_table;
pub mod store;

use thiserror::Error;

use crate::ir::VerifyError;
use crate::lifter::LiftError;

pub use crate::lifter::BlockKind;
pub use block::BasicBlock;
pub use classify::classify;
pub use explorer::{explore, AddressExplorer, ExploreError, ExploreOptions, ExploreStats, Exploration};
pub use store::{BlockStore, StoreStats};

#[derive(Debug, Error)]
pub enum BlockError {
    #[error(transparent)]
    Lift(#[from] LiftError),

    #[error("lifted unit at {0:#x} carries no instruction boundary")]
    MissingMarkers(u64),

    #[error("block at {address:#x} cannot be split at {at:#x}")]
    NotSplittable { address: u64, at: u64 },

    #[error(transparent)]
    Verify(#[from] VerifyError),
}

impl BlockError {
    /// Address the error is about, when it names one.
    pub fn address(&self) -> Option<u64> {
        match self {
            BlockError::Lift(LiftError::InvalidAddress(a))
            | BlockError::Lift(LiftError::InvalidInstruction(a)) => Some(*a),
            BlockError::MissingMarkers(a) => Some(*a),
            BlockError::NotSplittable { address, .. } => Some(*address),
            BlockError::Verify(VerifyError::Block { address, .. }) => Some(*address),
            _ => None,
        }
    }
}
