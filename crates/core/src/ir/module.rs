use serde::{Deserialize, Serialize};

use crate::ir::{Inst, IrFunction};

/// Static data of one loaded section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalData {
    pub name: String,
    pub section: String,
    pub address: u64,
    pub size: u64,
    /// Initial contents; `None` means zero-filled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<Vec<u8>>,
}

impl GlobalData {
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address - self.address < self.size
    }
}

/// Whole-program output of a translation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub globals: Vec<GlobalData>,
    pub functions: Vec<IrFunction>,
    /// Generated calling-convention wrappers, one per called import.
    pub wrappers: Vec<IrFunction>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().chain(self.wrappers.iter()).find(|f| f.name == name)
    }

    pub fn function_at(&self, address: u64) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.address == address)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalData> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn insts(&self) -> impl Iterator<Item = &Inst> {
        self.functions.iter().chain(self.wrappers.iter()).flat_map(|f| f.insts())
    }
}
