//! Function boundary inference and function assembly over a finished block store.

pub mod assembler;
pub mod inference;

use thiserror::Error;

use crate::ir::VerifyError;

pub use assembler::{AssembleOptions, FunctionAssembler, FunctionLayout};
pub use inference::{infer_functions, overlapping_entries};

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("no block at function entry {0:#x}")]
    UnknownEntry(u64),

    #[error("block {block:#x} in function {entry:#x} has no usable transfer target")]
    MissingTarget { entry: u64, block: u64 },

    #[error(transparent)]
    Verify(#[from] VerifyError),
}
