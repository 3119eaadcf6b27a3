use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ir::{Inst, Operand, Temp};

/// One lifted unit of code: a flat instruction list plus its temporary counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    pub insts: Vec<Inst>,
    /// First temporary id not used by `insts`.
    pub next_temp: u32,
}

impl Body {
    pub fn new(insts: Vec<Inst>, next_temp: u32) -> Self {
        Self { insts, next_temp }
    }

    /// Instruction-boundary markers, keyed by guest address, valued by position in `insts`.
    pub fn boundaries(&self) -> BTreeMap<u64, usize> {
        self.insts
            .iter()
            .enumerate()
            .filter_map(|(idx, inst)| match inst {
                Inst::InstructionMarker { pc } => Some((*pc, idx)),
                _ => None,
            })
            .collect()
    }

    /// Position of the defining instruction of `temp`.
    pub fn definition(&self, temp: Temp) -> Option<&Inst> {
        self.insts.iter().find(|inst| inst.def() == Some(temp))
    }

    /// Position of the last raw `Branch`.
    pub fn branch_index(&self) -> Option<usize> {
        self.insts.iter().rposition(|inst| matches!(inst, Inst::Branch { .. }))
    }

    pub fn branch_target(&self) -> Option<&Operand> {
        self.branch_index().and_then(|idx| match &self.insts[idx] {
            Inst::Branch { target } => Some(target),
            _ => None,
        })
    }

    pub fn has_halt(&self) -> bool {
        self.insts.iter().any(|inst| matches!(inst, Inst::Halt))
    }

    /// Every constant operand, in instruction order.
    pub fn constants(&self) -> impl Iterator<Item = u64> + '_ {
        self.insts.iter().flat_map(|inst| inst.operands()).filter_map(|op| match op {
            Operand::Const { value } => Some(*value),
            _ => None,
        })
    }

    /// Clone of the instructions strictly before the marker at `pc`, closed with a
    /// branch to `pc`. Returns `None` if `pc` is not a boundary.
    pub fn cut_before(&self, pc: u64) -> Option<Body> {
        let idx = *self.boundaries().get(&pc)?;
        let mut insts: Vec<Inst> = self.insts[..idx].to_vec();
        insts.push(Inst::Branch { target: Operand::Pc { value: pc } });
        insts.push(Inst::Exit);
        Some(Body { insts, next_temp: self.next_temp })
    }

    /// Clone of the instructions from the marker at `pc` onward.
    ///
    /// Definitions from the removed prefix that the remainder still reads are
    /// carried over right after the leading marker.
    pub fn cut_from(&self, pc: u64) -> Option<Body> {
        let idx = *self.boundaries().get(&pc)?;
        let (prefix, suffix) = self.insts.split_at(idx);

        let defined: BTreeSet<Temp> = suffix.iter().filter_map(Inst::def).collect();
        let mut needed: BTreeSet<Temp> =
            suffix.iter().flat_map(Inst::uses).filter(|t| !defined.contains(t)).collect();

        let mut carried = vec![false; prefix.len()];
        for (pos, inst) in prefix.iter().enumerate().rev() {
            if let Some(def) = inst.def() {
                if needed.remove(&def) {
                    carried[pos] = true;
                    needed.extend(inst.uses());
                }
            }
        }

        let mut insts = Vec::with_capacity(suffix.len());
        insts.push(suffix[0].clone());
        insts.extend(
            prefix.iter().zip(carried.iter()).filter(|(_, keep)| **keep).map(|(i, _)| i.clone()),
        );
        insts.extend(suffix[1..].iter().cloned());
        Some(Body { insts, next_temp: self.next_temp })
    }

    /// Copy of this body with every temporary shifted by `base`.
    pub fn remapped(&self, base: u32) -> Body {
        let mut insts = self.insts.clone();
        for inst in &mut insts {
            inst.shift_temps(base);
        }
        Body { insts, next_temp: self.next_temp + base }
    }
}
