//! Structural verifiers for lifted bodies, assembled functions and whole modules.

use std::collections::{BTreeSet, HashSet};

use thiserror::Error;

use crate::ir::{Body, Callee, Inst, IrFunction, Module, Operand, Temp};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("malformed block at {address:#x}: {reason}")]
    Block { address: u64, reason: String },

    #[error("malformed function {name}: {reason}")]
    Function { name: String, reason: String },

    #[error("malformed module: {reason}")]
    Module { reason: String },
}

fn check_temps<'a>(
    insts: impl Iterator<Item = &'a Inst>,
    next_temp: u32,
    ordered: bool,
) -> Result<(), String> {
    let insts: Vec<&Inst> = insts.collect();
    let mut defined: BTreeSet<Temp> = BTreeSet::new();
    if !ordered {
        for inst in &insts {
            if let Some(def) = inst.def() {
                if !defined.insert(def) {
                    return Err(format!("temporary t{} defined twice", def.0));
                }
            }
        }
    }
    let mut seen: BTreeSet<Temp> = BTreeSet::new();
    for inst in &insts {
        for used in inst.uses() {
            let known = if ordered { seen.contains(&used) } else { defined.contains(&used) };
            if !known {
                return Err(format!("temporary t{} used before definition", used.0));
            }
        }
        if let Some(def) = inst.def() {
            if def.0 >= next_temp {
                return Err(format!("temporary t{} out of range (next is t{next_temp})", def.0));
            }
            if ordered && !seen.insert(def) {
                return Err(format!("temporary t{} defined twice", def.0));
            }
        }
    }
    Ok(())
}

/// Check a body against the lifter contract for a unit covering `[address, address + size)`.
pub fn verify_lifted(body: &Body, address: u64, size: u64) -> Result<(), VerifyError> {
    let fail = |reason: String| VerifyError::Block { address, reason };

    if size == 0 {
        return Err(fail("zero-sized block".into()));
    }
    match body.insts.first() {
        Some(Inst::InstructionMarker { pc }) if *pc == address => {}
        Some(_) => return Err(fail("body does not start with its own instruction marker".into())),
        None => return Err(fail("empty body".into())),
    }

    let end = address.saturating_add(size);
    let mut last_marker: Option<u64> = None;
    for (idx, inst) in body.insts.iter().enumerate() {
        match inst {
            Inst::InstructionMarker { pc } => {
                if *pc < address || *pc >= end {
                    return Err(fail(format!("marker {pc:#x} outside the block")));
                }
                if last_marker.is_some_and(|prev| prev >= *pc) {
                    return Err(fail(format!("marker {pc:#x} out of order")));
                }
                last_marker = Some(*pc);
            }
            Inst::Exit if idx + 1 != body.insts.len() => {
                return Err(fail("exit before the end of the body".into()));
            }
            Inst::Branch { .. } if idx + 2 != body.insts.len() => {
                return Err(fail("raw branch is not the final transfer".into()));
            }
            Inst::Jump { .. }
            | Inst::CondJump { .. }
            | Inst::Return
            | Inst::Call { .. }
            | Inst::ImportCall { .. }
            | Inst::JumpMarker { .. } => {
                return Err(fail(format!("unexpected function-level instruction {inst:?}")));
            }
            _ => {}
        }
    }
    if !matches!(body.insts.last(), Some(Inst::Exit)) {
        return Err(fail("body does not end with an exit".into()));
    }

    check_temps(body.insts.iter(), body.next_temp, true).map_err(fail)
}

/// Check an assembled function: labels, terminators, raw-transfer removal and temporaries.
pub fn verify_function(func: &IrFunction) -> Result<(), VerifyError> {
    let fail = |reason: String| VerifyError::Function { name: func.name.clone(), reason };

    if func.blocks.is_empty() {
        return Err(fail("no blocks".into()));
    }
    let mut labels = HashSet::new();
    for block in &func.blocks {
        if !labels.insert(block.label.as_str()) {
            return Err(fail(format!("duplicate label {}", block.label)));
        }
    }

    for block in &func.blocks {
        let Some(last) = block.insts.last() else {
            return Err(fail(format!("block {} is empty", block.label)));
        };
        if !last.is_terminator() {
            return Err(fail(format!("block {} has no terminator", block.label)));
        }
        for (idx, inst) in block.insts.iter().enumerate() {
            if inst.is_terminator() && idx + 1 != block.insts.len() {
                return Err(fail(format!("block {} has a terminator mid-block", block.label)));
            }
            match inst {
                Inst::Branch { .. } | Inst::Exit => {
                    return Err(fail(format!("block {} still has a raw transfer", block.label)));
                }
                Inst::Jump { label } if !labels.contains(label.as_str()) => {
                    return Err(fail(format!("jump to unknown label {label}")));
                }
                Inst::CondJump { then_label, else_label, .. } => {
                    for label in [then_label, else_label] {
                        if !labels.contains(label.as_str()) {
                            return Err(fail(format!("branch to unknown label {label}")));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    check_temps(func.insts(), func.next_temp, false).map_err(fail)
}

/// Check every function plus the cross-references between functions, wrappers and globals.
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    let mut names = HashSet::new();
    for func in module.functions.iter().chain(module.wrappers.iter()) {
        verify_function(func)?;
        if !names.insert(func.name.as_str()) {
            return Err(VerifyError::Module { reason: format!("duplicate function {}", func.name) });
        }
    }

    for func in module.functions.iter().chain(module.wrappers.iter()) {
        for inst in func.insts() {
            let fail = |reason: String| VerifyError::Module {
                reason: format!("{} in function {}", reason, func.name),
            };
            match inst {
                Inst::CallMarker { target, .. } => {
                    return Err(fail(format!("unresolved call marker to {target:?}")));
                }
                Inst::Call { callee: Callee::Function { name, .. }, .. }
                    if module.function(name).is_none() =>
                {
                    return Err(fail(format!("call to unknown function {name}")));
                }
                Inst::Call { callee: Callee::Import { wrapper, .. }, .. }
                    if module.function(wrapper).is_none() =>
                {
                    return Err(fail(format!("call to unknown wrapper {wrapper}")));
                }
                _ => {}
            }
            for op in inst.operands() {
                if let Operand::DataRef { global, offset, .. } = op {
                    match module.global(global) {
                        Some(g) if *offset < g.size.max(1) => {}
                        Some(_) => return Err(fail(format!("offset {offset:#x} past {global}"))),
                        None => return Err(fail(format!("reference to unknown global {global}"))),
                    }
                }
            }
        }
    }
    Ok(())
}

impl Body {
    pub fn verify_lifted(&self, address: u64, size: u64) -> Result<(), VerifyError> {
        verify_lifted(self, address, size)
    }
}

impl IrFunction {
    pub fn verify(&self) -> Result<(), VerifyError> {
        verify_function(self)
    }
}

impl Module {
    pub fn verify(&self) -> Result<(), VerifyError> {
        verify_module(self)
    }
}
