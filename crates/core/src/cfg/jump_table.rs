use crate::cfg::{BasicBlock, BlockKind};
use crate::ir::{BinOp, Body, Inst, Operand};

/// Base address of the table an indirect jump reads its destination from.
///
/// Recognises a destination loaded from `base + ...`, where `base` is a constant
/// in the address chain feeding the load. A destination loaded from a bare
/// constant (`jmp [slot]`) is a trampoline, not a table.
pub fn jump_table_base(block: &BasicBlock) -> Option<u64> {
    if !matches!(block.kind, BlockKind::JumpIndirect | BlockKind::CondJumpIndirect) {
        return None;
    }
    let body = &block.body;
    let mut target = body.branch_target()?.clone();

    // Conditional indirect transfers select between a literal and the loaded value.
    if let Some(Inst::Select { if_true, if_false, .. }) =
        target.as_temp().and_then(|t| body.definition(t))
    {
        target = if if_true.pc_value().is_some() { if_false.clone() } else { if_true.clone() };
    }

    match target.as_temp().and_then(|t| body.definition(t))? {
        Inst::Load { addr: addr @ Operand::Temp { .. }, .. } => constant_base(body, addr, 0),
        _ => None,
    }
}

fn constant_base(body: &Body, operand: &Operand, depth: usize) -> Option<u64> {
    if depth > 8 {
        return None;
    }
    match operand {
        Operand::Const { value } => Some(*value),
        Operand::Temp { .. } => match body.definition(operand.as_temp()?)? {
            Inst::Binary { op: BinOp::Add, lhs, rhs, .. } => constant_base(body, lhs, depth + 1)
                .or_else(|| constant_base(body, rhs, depth + 1)),
            _ => None,
        },
        _ => None,
    }
}
