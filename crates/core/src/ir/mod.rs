//! Owned intermediate representation used by the lifter and the reconstruction passes.
//!
//! The IR is deliberately small:
//! - `Operand` values are constants, guest program-counter literals, temporaries,
//!   the CPU-state handle, or typed references produced by the resolver.
//! - `Inst` covers data movement, opaque helper operations, the raw lifter
//!   control transfer (`Branch` + `Exit`), the pseudo-instruction markers, and
//!   the terminators used once blocks are stitched into functions.
//! - `Body` is one lifted unit; `IrFunction` and `Module` are the assembled view.
//!
//! Everything is serde-serializable so the final module can be written as JSON.

pub mod body;
pub mod function;
pub mod module;
pub mod verify;

use serde::{Deserialize, Serialize};

pub use body::Body;
pub use function::{IrBlock, IrFunction};
pub use module::{GlobalData, Module};
pub use verify::VerifyError;

/// A virtual register local to a body or function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Temp(pub u32);

/// Calling convention attached to generated import wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallingConvention {
    /// System V AMD64 (ELF x86-64).
    SysV64,
    /// Microsoft x64 (PE x86-64).
    Ms64,
    /// 32-bit cdecl.
    Cdecl,
}

impl CallingConvention {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallingConvention::SysV64 => "sysv64",
            CallingConvention::Ms64 => "ms64",
            CallingConvention::Cdecl => "cdecl",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operand {
    /// Data constant embedded in the lifted code.
    Const { value: u64 },
    /// Guest program-counter literal (branch and call targets).
    Pc { value: u64 },
    Temp { id: u32 },
    /// Handle to the CPU state the lifted code operates on.
    Env,
    /// Pointer into the global synthesized for a section.
    DataRef { global: String, offset: u64, address: u64 },
    FunctionRef { name: String, address: u64 },
    ImportRef { name: String, slot: u64 },
}

impl Operand {
    pub fn temp(temp: Temp) -> Self {
        Operand::Temp { id: temp.0 }
    }

    pub fn as_temp(&self) -> Option<Temp> {
        match self {
            Operand::Temp { id } => Some(Temp(*id)),
            _ => None,
        }
    }

    /// Guest address this operand denotes, if it is known statically.
    pub fn static_address(&self) -> Option<u64> {
        match self {
            Operand::Const { value } | Operand::Pc { value } => Some(*value),
            Operand::DataRef { address, .. } | Operand::FunctionRef { address, .. } => {
                Some(*address)
            }
            Operand::ImportRef { slot, .. } => Some(*slot),
            Operand::Temp { .. } | Operand::Env => None,
        }
    }

    pub fn pc_value(&self) -> Option<u64> {
        match self {
            Operand::Pc { value } => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    Eq,
    Ne,
    Ult,
    Slt,
}

/// Target of a resolved call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Callee {
    Function { name: String, address: u64 },
    Import { wrapper: String, import: String, slot: u64 },
    Indirect { target: Operand },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "inst", rename_all = "snake_case")]
pub enum Inst {
    /// Updates the guest program counter; emitted once per decoded instruction.
    SetPc { pc: u64 },
    /// Instruction boundary. The only valid split points of a block.
    InstructionMarker { pc: u64 },
    ReadReg { dst: Temp, reg: String },
    WriteReg { reg: String, value: Operand },
    Binary { dst: Temp, op: BinOp, lhs: Operand, rhs: Operand },
    Select { dst: Temp, cond: Operand, if_true: Operand, if_false: Operand },
    Load { dst: Temp, addr: Operand, size: u8 },
    Store { addr: Operand, value: Operand, size: u8 },
    /// Opaque operation the lifter does not model precisely.
    Helper { dst: Option<Temp>, name: String, args: Vec<Operand> },
    /// Execution stops here (hlt and friends).
    Halt,
    /// Raw control transfer produced by the lifter: sets the next program counter.
    Branch { target: Operand },
    /// Raw end of a lifted unit.
    Exit,
    CallMarker { target: Operand, is_static: bool, state: Operand },
    ReturnMarker { target: Operand },
    /// Control leaves the function through `target`.
    JumpMarker { target: Operand },
    Call { callee: Callee, state: Operand },
    ImportCall { import: String, library: Option<String>, convention: CallingConvention },
    Jump { label: String },
    CondJump { cond: Operand, then_label: String, else_label: String },
    Return,
}

impl Inst {
    /// Temporary defined by this instruction.
    pub fn def(&self) -> Option<Temp> {
        match self {
            Inst::ReadReg { dst, .. }
            | Inst::Binary { dst, .. }
            | Inst::Select { dst, .. }
            | Inst::Load { dst, .. } => Some(*dst),
            Inst::Helper { dst, .. } => *dst,
            _ => None,
        }
    }

    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Inst::WriteReg { value, .. } => vec![value],
            Inst::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Inst::Select { cond, if_true, if_false, .. } => vec![cond, if_true, if_false],
            Inst::Load { addr, .. } => vec![addr],
            Inst::Store { addr, value, .. } => vec![addr, value],
            Inst::Helper { args, .. } => args.iter().collect(),
            Inst::Branch { target }
            | Inst::ReturnMarker { target }
            | Inst::JumpMarker { target } => vec![target],
            Inst::CallMarker { target, state, .. } => vec![target, state],
            Inst::Call { callee, state } => match callee {
                Callee::Indirect { target } => vec![target, state],
                _ => vec![state],
            },
            Inst::CondJump { cond, .. } => vec![cond],
            Inst::SetPc { .. }
            | Inst::InstructionMarker { .. }
            | Inst::ReadReg { .. }
            | Inst::Halt
            | Inst::Exit
            | Inst::ImportCall { .. }
            | Inst::Jump { .. }
            | Inst::Return => Vec::new(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Inst::WriteReg { value, .. } => vec![value],
            Inst::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Inst::Select { cond, if_true, if_false, .. } => vec![cond, if_true, if_false],
            Inst::Load { addr, .. } => vec![addr],
            Inst::Store { addr, value, .. } => vec![addr, value],
            Inst::Helper { args, .. } => args.iter_mut().collect(),
            Inst::Branch { target }
            | Inst::ReturnMarker { target }
            | Inst::JumpMarker { target } => vec![target],
            Inst::CallMarker { target, state, .. } => vec![target, state],
            Inst::Call { callee, state } => match callee {
                Callee::Indirect { target } => vec![target, state],
                _ => vec![state],
            },
            Inst::CondJump { cond, .. } => vec![cond],
            Inst::SetPc { .. }
            | Inst::InstructionMarker { .. }
            | Inst::ReadReg { .. }
            | Inst::Halt
            | Inst::Exit
            | Inst::ImportCall { .. }
            | Inst::Jump { .. }
            | Inst::Return => Vec::new(),
        }
    }

    /// Temporaries read by this instruction.
    pub fn uses(&self) -> Vec<Temp> {
        self.operands().into_iter().filter_map(Operand::as_temp).collect()
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Inst::Jump { .. } | Inst::CondJump { .. } | Inst::Return)
    }

    /// Renumber every temporary by adding `base`.
    pub fn shift_temps(&mut self, base: u32) {
        match self {
            Inst::ReadReg { dst, .. }
            | Inst::Binary { dst, .. }
            | Inst::Select { dst, .. }
            | Inst::Load { dst, .. } => dst.0 += base,
            Inst::Helper { dst: Some(dst), .. } => dst.0 += base,
            _ => {}
        }
        for op in self.operands_mut() {
            if let Operand::Temp { id } = op {
                *id += base;
            }
        }
    }
}
