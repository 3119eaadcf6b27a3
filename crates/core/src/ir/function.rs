use serde::{Deserialize, Serialize};

use crate::ir::Inst;

/// Labelled straight-line block inside an assembled function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrBlock {
    pub label: String,
    pub insts: Vec<Inst>,
}

impl IrBlock {
    pub fn new(label: impl Into<String>, insts: Vec<Inst>) -> Self {
        Self { label: label.into(), insts }
    }
}

/// Control-flow-complete function. The first block is the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrFunction {
    pub name: String,
    pub address: u64,
    pub blocks: Vec<IrBlock>,
    pub next_temp: u32,
}

impl IrFunction {
    pub fn block(&self, label: &str) -> Option<&IrBlock> {
        self.blocks.iter().find(|b| b.label == label)
    }

    pub fn insts(&self) -> impl Iterator<Item = &Inst> {
        self.blocks.iter().flat_map(|b| b.insts.iter())
    }

    pub fn insts_mut(&mut self) -> impl Iterator<Item = &mut Inst> {
        self.blocks.iter_mut().flat_map(|b| b.insts.iter_mut())
    }
}
