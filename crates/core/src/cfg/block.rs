use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::cfg::{classify, BlockError};
use crate::image::BinaryImage;
use crate::ir::{Body, Inst};
use crate::lifter::{BlockKind, Lifter};

/// One classified lifted unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasicBlock {
    pub address: u64,
    pub size: u64,
    pub kind: BlockKind,
    pub body: Body,
    /// Statically known addresses control may reach next (call targets excluded).
    pub successors: BTreeSet<u64>,
    /// Statically known call targets.
    pub call_targets: BTreeSet<u64>,
    /// The unit halts; nothing follows it.
    pub does_not_return: bool,
}

impl BasicBlock {
    /// Lift and classify the unit at `address`.
    pub fn lift(
        lifter: &mut dyn Lifter,
        image: &dyn BinaryImage,
        address: u64,
    ) -> Result<Self, BlockError> {
        let lifted = lifter.lift(image, address)?;
        classify(lifted)
    }

    pub fn end(&self) -> u64 {
        self.address + self.size
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.end()
    }

    /// Instruction-boundary map (guest address -> marker position).
    pub fn boundaries(&self) -> BTreeMap<u64, usize> {
        self.body.boundaries()
    }

    /// Address of the instruction containing `address`.
    pub fn instruction_at(&self, address: u64) -> Option<u64> {
        if !self.contains(address) {
            return None;
        }
        self.boundaries().range(..=address).next_back().map(|(pc, _)| *pc)
    }

    /// A single-instruction indirect jump, i.e. an import trampoline.
    ///
    /// A leading instruction that lifts to nothing (`endbr64` in CET PLT
    /// entries) does not count.
    pub fn is_import_stub(&self) -> bool {
        if self.kind != BlockKind::JumpIndirect {
            return false;
        }
        let positions: Vec<usize> = self.boundaries().into_values().collect();
        match positions.as_slice() {
            [_] => true,
            [first, second] => self.body.insts[first + 1..*second]
                .iter()
                .all(|inst| matches!(inst, Inst::SetPc { .. } | Inst::InstructionMarker { .. })),
            _ => false,
        }
    }

    /// Address the stub loads its destination from.
    pub fn stub_slot(&self) -> Option<u64> {
        if !self.is_import_stub() {
            return None;
        }
        let target = self.body.branch_target()?.as_temp()?;
        match self.body.definition(target)? {
            Inst::Load { addr, .. } => addr.static_address(),
            _ => None,
        }
    }

    /// Split into `[address, at)` and `[at, end)`.
    ///
    /// The first half falls through into the second; the second keeps this
    /// block's kind and successors.
    pub fn split(&self, at: u64) -> Result<(BasicBlock, BasicBlock), BlockError> {
        let not_splittable = || BlockError::NotSplittable { address: self.address, at };
        let boundaries = self.boundaries();
        if boundaries.len() < 2 || at == self.address || !boundaries.contains_key(&at) {
            return Err(not_splittable());
        }
        let first_body = self.body.cut_before(at).ok_or_else(not_splittable)?;
        let second_body = self.body.cut_from(at).ok_or_else(not_splittable)?;

        let first = BasicBlock {
            address: self.address,
            size: at - self.address,
            kind: BlockKind::Fallthrough,
            body: first_body,
            successors: BTreeSet::from([at]),
            call_targets: BTreeSet::new(),
            does_not_return: false,
        };
        let second = BasicBlock {
            address: at,
            size: self.end() - at,
            kind: self.kind,
            body: second_body,
            successors: self.successors.clone(),
            call_targets: self.call_targets.clone(),
            does_not_return: self.does_not_return,
        };
        first.body.verify_lifted(first.address, first.size)?;
        second.body.verify_lifted(second.address, second.size)?;
        Ok((first, second))
    }
}
