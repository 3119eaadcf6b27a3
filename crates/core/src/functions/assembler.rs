use std::collections::{BTreeSet, VecDeque};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::cfg::classify::static_targets;
use crate::cfg::{BasicBlock, BlockKind, BlockStore};
use crate::functions::AssembleError;
use crate::ir::{BinOp, Inst, IrBlock, IrFunction, Operand, Temp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembleOptions {
    /// Name given to the function at the program entry point.
    pub entry_name: String,
    /// Prefix for every other function, followed by its hex address.
    pub function_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_entry: Option<u64>,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            entry_name: "entry_point".to_string(),
            function_prefix: "function".to_string(),
            program_entry: None,
        }
    }
}

/// Which blocks make up a function and the address range they span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionLayout {
    pub entry: u64,
    pub name: String,
    pub blocks: Vec<u64>,
    pub low: u64,
    pub high: u64,
}

fn label(address: u64) -> String {
    format!("bb_{address:x}")
}

fn pop_branch(insts: &mut Vec<Inst>) -> Option<Operand> {
    if let Some(Inst::Branch { .. }) = insts.last() {
        if let Some(Inst::Branch { target }) = insts.pop() {
            return Some(target);
        }
    }
    None
}

/// Stitches the blocks of each function into one `IrFunction`.
pub struct FunctionAssembler<'a> {
    store: &'a BlockStore,
    entries: BTreeSet<u64>,
    options: AssembleOptions,
}

impl<'a> FunctionAssembler<'a> {
    pub fn new(store: &'a BlockStore, entries: &[u64], options: AssembleOptions) -> Self {
        Self { store, entries: entries.iter().copied().collect(), options }
    }

    pub fn function_name(&self, entry: u64) -> String {
        if self.options.program_entry == Some(entry) {
            self.options.entry_name.clone()
        } else {
            format!("{}_{entry:x}", self.options.function_prefix)
        }
    }

    /// Blocks reachable from `entry` through successor edges, stopping at other entries.
    pub fn closure(&self, entry: u64) -> BTreeSet<u64> {
        let mut members = BTreeSet::new();
        let mut queue = VecDeque::from([entry]);
        while let Some(address) = queue.pop_front() {
            let Some(block) = self.store.get(address) else { continue };
            if !members.insert(address) {
                continue;
            }
            for succ in &block.successors {
                let foreign_entry = *succ != entry && self.entries.contains(succ);
                if self.store.contains(*succ) && !foreign_entry && !members.contains(succ) {
                    queue.push_back(*succ);
                }
            }
        }
        members
    }

    pub fn layout(&self, entry: u64) -> Result<FunctionLayout, AssembleError> {
        let closure = self.closure(entry);
        if closure.is_empty() {
            return Err(AssembleError::UnknownEntry(entry));
        }
        let blocks: Vec<u64> = closure.iter().copied().collect();
        let low = blocks.first().copied().unwrap_or(entry);
        let high = closure
            .iter()
            .filter_map(|a| self.store.get(*a))
            .map(BasicBlock::end)
            .max()
            .unwrap_or(entry);
        Ok(FunctionLayout { entry, name: self.function_name(entry), blocks, low, high })
    }

    /// Build the IR function rooted at `entry` and verify it.
    pub fn assemble(&self, entry: u64) -> Result<IrFunction, AssembleError> {
        let closure = self.closure(entry);
        let entry_block = self.store.get(entry).ok_or(AssembleError::UnknownEntry(entry))?;

        let mut emitter = Emitter { entry, closure: &closure, aux: Vec::new(), next_temp: 0 };
        let mut blocks = vec![emitter.block(entry_block)?];
        for address in closure.iter().filter(|a| **a != entry) {
            if let Some(block) = self.store.get(*address) {
                blocks.push(emitter.block(block)?);
            }
        }
        blocks.append(&mut emitter.aux);

        let func = IrFunction {
            name: self.function_name(entry),
            address: entry,
            blocks,
            next_temp: emitter.next_temp,
        };
        func.verify()?;
        debug!("assembled {} with {} blocks", func.name, func.blocks.len());
        Ok(func)
    }

    /// Assemble every entry; returns the functions and their layouts in entry order.
    pub fn assemble_all(&self) -> Result<(Vec<IrFunction>, Vec<FunctionLayout>), AssembleError> {
        let mut functions = Vec::with_capacity(self.entries.len());
        let mut layouts = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            functions.push(self.assemble(*entry)?);
            layouts.push(self.layout(*entry)?);
        }
        Ok((functions, layouts))
    }
}

struct Emitter<'c> {
    entry: u64,
    closure: &'c BTreeSet<u64>,
    aux: Vec<IrBlock>,
    next_temp: u32,
}

impl Emitter<'_> {
    fn fresh(&mut self) -> Temp {
        let temp = Temp(self.next_temp);
        self.next_temp += 1;
        temp
    }

    fn aux_block(&mut self, label: String, target: Operand) -> String {
        if !self.aux.iter().any(|b| b.label == label) {
            let insts = vec![Inst::JumpMarker { target }, Inst::Return];
            self.aux.push(IrBlock::new(label.clone(), insts));
        }
        label
    }

    /// Label for a conditional arm; arms leaving the function get an exit block.
    fn arm(&mut self, from: u64, target: u64) -> String {
        if self.closure.contains(&target) {
            label(target)
        } else {
            self.aux_block(format!("bb_{from:x}_exit_{target:x}"), Operand::Pc { value: target })
        }
    }

    fn transfer(&self, insts: &mut Vec<Inst>, target: u64) {
        if self.closure.contains(&target) {
            insts.push(Inst::Jump { label: label(target) });
        } else {
            insts.push(Inst::JumpMarker { target: Operand::Pc { value: target } });
            insts.push(Inst::Return);
        }
    }

    fn block(&mut self, block: &BasicBlock) -> Result<IrBlock, AssembleError> {
        let (entry, address) = (self.entry, block.address);
        let missing = move || AssembleError::MissingTarget { entry, block: address };
        let targets = static_targets(&block.body);

        let body = block.body.remapped(self.next_temp);
        self.next_temp = body.next_temp;
        let mut insts = body.insts;
        if matches!(insts.last(), Some(Inst::Exit)) {
            insts.pop();
        }
        let branch = pop_branch(&mut insts);

        if block.does_not_return {
            insts.push(Inst::Return);
            return Ok(IrBlock::new(label(block.address), insts));
        }

        match block.kind {
            BlockKind::Fallthrough | BlockKind::Jump => {
                let target = match (block.kind, targets.first()) {
                    (_, Some(t)) => *t,
                    (BlockKind::Fallthrough, None) => block.end(),
                    _ => return Err(missing()),
                };
                self.transfer(&mut insts, target);
            }
            BlockKind::CondJump | BlockKind::RepeatedOp => {
                let (&[taken, not_taken], Some(pc)) = (targets.as_slice(), branch) else {
                    return Err(missing());
                };
                let cond = self.fresh();
                let rhs = Operand::Pc { value: taken };
                insts.push(Inst::Binary { dst: cond, op: BinOp::Eq, lhs: pc, rhs });
                let then_label = self.arm(block.address, taken);
                let else_label = self.arm(block.address, not_taken);
                insts.push(Inst::CondJump { cond: Operand::temp(cond), then_label, else_label });
            }
            BlockKind::CondJumpIndirect => {
                let (Some(&known), Some(pc)) = (targets.first(), branch) else {
                    return Err(missing());
                };
                let cond = self.fresh();
                insts.push(Inst::Binary {
                    dst: cond,
                    op: BinOp::Eq,
                    lhs: pc.clone(),
                    rhs: Operand::Pc { value: known },
                });
                let then_label = self.arm(block.address, known);
                let else_label = self.aux_block(format!("bb_{:x}_indirect", block.address), pc);
                insts.push(Inst::CondJump { cond: Operand::temp(cond), then_label, else_label });
            }
            BlockKind::JumpIndirect => {
                let target = branch.ok_or_else(missing)?;
                insts.push(Inst::JumpMarker { target });
                insts.push(Inst::Return);
            }
            BlockKind::Call | BlockKind::CallIndirect => self.transfer(&mut insts, block.end()),
            BlockKind::Return => insts.push(Inst::Return),
        }
        Ok(IrBlock::new(label(block.address), insts))
    }
}
