use std::collections::BTreeSet;

use log::debug;

use crate::cfg::{BasicBlock, BlockError};
use crate::ir::{Body, Inst, Operand, VerifyError};
use crate::lifter::{BlockKind, LiftedBlock};

/// Program-counter literals the raw branch of `body` may transfer to.
///
/// For a conditional transfer the order is `[taken, not_taken]`.
pub fn static_targets(body: &Body) -> Vec<u64> {
    match body.branch_target() {
        Some(Operand::Pc { value }) => vec![*value],
        Some(target) => match target.as_temp().and_then(|t| body.definition(t)) {
            Some(Inst::Select { if_true, if_false, .. }) => {
                [if_true, if_false].into_iter().filter_map(Operand::pc_value).collect()
            }
            _ => Vec::new(),
        },
        None => Vec::new(),
    }
}

/// Turn a lifted unit into a basic block.
///
/// Injects one instruction marker per distinct program counter, replaces the raw
/// branch of call and return units by the matching marker, and computes the
/// successor and call-target sets.
pub fn classify(lifted: LiftedBlock) -> Result<BasicBlock, BlockError> {
    let LiftedBlock { address, size, mut kind, body } = lifted;
    let end = address + size;

    let mut seen = BTreeSet::new();
    let mut insts = Vec::with_capacity(body.insts.len() + 8);
    for inst in body.insts {
        if let Inst::SetPc { pc } = inst {
            if seen.insert(pc) {
                insts.push(Inst::InstructionMarker { pc });
            }
        }
        insts.push(inst);
    }
    if seen.is_empty() {
        return Err(BlockError::MissingMarkers(address));
    }
    let mut body = Body::new(insts, body.next_temp);

    let targets = static_targets(&body);
    if kind == BlockKind::Call && targets == [end] {
        debug!("call to the next instruction at {address:#x} treated as fallthrough");
        kind = BlockKind::Fallthrough;
    }

    if kind.is_call() || kind == BlockKind::Return {
        let branch = body.branch_index().and_then(|idx| match &body.insts[idx] {
            Inst::Branch { target } => Some((idx, target.clone())),
            _ => None,
        });
        let Some((idx, target)) = branch else {
            return Err(VerifyError::Block {
                address,
                reason: format!("{kind} unit without a raw branch"),
            }
            .into());
        };
        body.insts[idx] = if kind == BlockKind::Return {
            Inst::ReturnMarker { target }
        } else {
            let is_static = kind == BlockKind::Call && target.pc_value().is_some();
            Inst::CallMarker { target, is_static, state: Operand::Env }
        };
    }

    let does_not_return = body.has_halt();
    let mut successors = BTreeSet::new();
    if !does_not_return {
        if matches!(
            kind,
            BlockKind::Fallthrough
                | BlockKind::Jump
                | BlockKind::CondJump
                | BlockKind::CondJumpIndirect
                | BlockKind::RepeatedOp
        ) {
            successors.extend(targets.iter().copied());
        }
        if kind.falls_through() {
            successors.insert(end);
        }
    }
    let call_targets =
        if kind.is_call() { targets.into_iter().collect() } else { BTreeSet::new() };

    let block = BasicBlock { address, size, kind, body, successors, call_targets, does_not_return };
    block.body.verify_lifted(address, size)?;
    Ok(block)
}
