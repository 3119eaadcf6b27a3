//! Instruction lifter seam.
//!
//! A lifter turns the machine code at one address into a lifted unit: an IR
//! body that follows the lifter contract (see `BodyBuilder`), the number of bytes
//! consumed, and how the unit ends.

pub mod builder;
#[cfg(feature = "capstone-backend")]
pub mod capstone;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::BinaryImage;
use crate::ir::Body;

pub use builder::BodyBuilder;
#[cfg(feature = "capstone-backend")]
pub use self::capstone::CapstoneLifter;

/// Instructions decoded per unit unless configured otherwise.
pub const DEFAULT_MAX_BLOCK_INSTRUCTIONS: usize = 64;

/// Largest accepted per-unit instruction limit.
pub const MAX_BLOCK_INSTRUCTIONS: usize = 4096;

/// How a lifted unit ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Fallthrough,
    Jump,
    JumpIndirect,
    CondJump,
    CondJumpIndirect,
    Call,
    CallIndirect,
    RepeatedOp,
    Return,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Fallthrough => "fallthrough",
            BlockKind::Jump => "jump",
            BlockKind::JumpIndirect => "jump_indirect",
            BlockKind::CondJump => "cond_jump",
            BlockKind::CondJumpIndirect => "cond_jump_indirect",
            BlockKind::Call => "call",
            BlockKind::CallIndirect => "call_indirect",
            BlockKind::RepeatedOp => "repeated_op",
            BlockKind::Return => "return",
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, BlockKind::Call | BlockKind::CallIndirect)
    }

    /// Whether execution may continue at the end of the unit.
    pub fn falls_through(&self) -> bool {
        !matches!(self, BlockKind::Return | BlockKind::Jump | BlockKind::JumpIndirect)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a single `Lifter::lift` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiftedBlock {
    pub address: u64,
    pub size: u64,
    pub kind: BlockKind,
    pub body: Body,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LiftError {
    #[error("address {0:#x} is not mapped executable code")]
    InvalidAddress(u64),

    #[error("invalid instruction at {0:#x}")]
    InvalidInstruction(u64),

    #[error("the lifter is already in use")]
    Busy,

    #[error("the lifter has not been initialised")]
    NotInitialised,

    #[error("lifter backend error: {0}")]
    Backend(String),
}

impl LiftError {
    /// Decode faults only cost the offending address; everything else is fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LiftError::InvalidAddress(_) | LiftError::InvalidInstruction(_))
    }
}

/// Single-instruction-unit lifter.
///
/// Implementations are process-wide resources: `init` must fail with
/// `LiftError::Busy` while another owner holds the lifter.
pub trait Lifter {
    fn init(&mut self) -> Result<(), LiftError>;

    fn lift(&mut self, image: &dyn BinaryImage, address: u64) -> Result<LiftedBlock, LiftError>;

    fn close(&mut self);

    /// Short identifier (e.g. "capstone").
    fn name(&self) -> &'static str;
}
