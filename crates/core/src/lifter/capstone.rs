use std::sync::atomic::{AtomicBool, Ordering};

use capstone::arch::x86::{X86OpMem, X86Operand, X86OperandType};
use capstone::arch::ArchOperand;
use capstone::{arch, prelude::*, Capstone, InsnGroupId, InsnGroupType, RegId};
use log::trace;

use crate::image::{Arch, BinaryImage};
use crate::ir::{BinOp, Operand};
use crate::lifter::{
    BlockKind, BodyBuilder, LiftError, LiftedBlock, Lifter, DEFAULT_MAX_BLOCK_INSTRUCTIONS,
    MAX_BLOCK_INSTRUCTIONS,
};

/// Only one capstone lifter may be initialised per process.
static LIFTER_IN_USE: AtomicBool = AtomicBool::new(false);

/// Longest x86 instruction encoding.
const MAX_INSN_LEN: u64 = 15;

/// x86 / x86-64 lifter backed by capstone.
///
/// Control flow is modelled exactly; everything else becomes register and memory
/// traffic around opaque helper operations named after the mnemonic.
pub struct CapstoneLifter {
    max_instructions: usize,
    active: bool,
    engine: Option<(Arch, Capstone)>,
}

impl CapstoneLifter {
    /// Lifter that decodes at most `max_instructions` per unit (1 = single-step).
    pub fn new(max_instructions: usize) -> Self {
        let max_instructions = max_instructions.clamp(1, MAX_BLOCK_INSTRUCTIONS);
        Self { max_instructions, active: false, engine: None }
    }

    pub fn single_step() -> Self {
        Self::new(1)
    }

    pub fn max_instructions(&self) -> usize {
        self.max_instructions
    }

    fn engine_for(&mut self, target: Arch) -> Result<&Capstone, LiftError> {
        let stale = !matches!(&self.engine, Some((current, _)) if *current == target);
        if stale {
            self.engine = Some((target, make_cs(target)?));
        }
        match &self.engine {
            Some((_, cs)) => Ok(cs),
            None => Err(LiftError::Backend("capstone engine unavailable".into())),
        }
    }
}

impl Default for CapstoneLifter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BLOCK_INSTRUCTIONS)
    }
}

impl Drop for CapstoneLifter {
    fn drop(&mut self) {
        self.close();
    }
}

fn make_cs(target: Arch) -> Result<Capstone, LiftError> {
    let mode = match target {
        Arch::X86_64 => arch::x86::ArchMode::Mode64,
        Arch::X86 => arch::x86::ArchMode::Mode32,
    };
    Capstone::new()
        .x86()
        .mode(mode)
        .detail(true)
        .build()
        .map_err(|e| LiftError::Backend(format!("capstone init failed: {e}")))
}

/// Per-instruction lowering state.
struct Lowering<'a> {
    cs: &'a Capstone,
    b: &'a mut BodyBuilder,
    arch: Arch,
    pc: u64,
    next: u64,
}

impl Lowering<'_> {
    fn mask(&self, value: u64) -> u64 {
        match self.arch {
            Arch::X86 => value & 0xffff_ffff,
            Arch::X86_64 => value,
        }
    }

    fn width(&self) -> u8 {
        self.arch.pointer_size() as u8
    }

    fn sp(&self) -> &'static str {
        match self.arch {
            Arch::X86 => "esp",
            Arch::X86_64 => "rsp",
        }
    }

    fn counter(&self) -> &'static str {
        match self.arch {
            Arch::X86 => "ecx",
            Arch::X86_64 => "rcx",
        }
    }

    fn reg_name(&self, reg: RegId) -> Option<String> {
        if reg.0 == 0 {
            None
        } else {
            self.cs.reg_name(reg)
        }
    }

    /// Effective address of a memory operand. RIP-relative forms become absolute constants.
    fn address(&mut self, mem: &X86OpMem) -> Operand {
        let base = self.reg_name(mem.base());
        if matches!(base.as_deref(), Some("rip") | Some("eip")) {
            return Operand::Const { value: self.mask(self.next.wrapping_add(mem.disp() as u64)) };
        }

        let mut addr: Option<Operand> = None;
        if let Some(base) = base {
            addr = Some(self.b.read_reg(&base));
        }
        if let Some(index) = self.reg_name(mem.index()) {
            let mut scaled = self.b.read_reg(&index);
            if mem.scale() > 1 {
                scaled = self.b.binary(BinOp::Mul, scaled, Operand::Const { value: mem.scale() as u64 });
            }
            addr = Some(match addr {
                Some(prev) => self.b.binary(BinOp::Add, prev, scaled),
                None => scaled,
            });
        }
        let disp = Operand::Const { value: self.mask(mem.disp() as u64) };
        match addr {
            None => disp,
            Some(addr) if mem.disp() == 0 => addr,
            Some(addr) => self.b.binary(BinOp::Add, disp, addr),
        }
    }

    fn read(&mut self, op: &X86Operand) -> Operand {
        match &op.op_type {
            X86OperandType::Reg(reg) => match self.reg_name(*reg) {
                Some(name) => self.b.read_reg(&name),
                None => Operand::Const { value: 0 },
            },
            X86OperandType::Imm(imm) => Operand::Const { value: self.mask(*imm as u64) },
            X86OperandType::Mem(mem) => {
                let addr = self.address(mem);
                self.b.load(addr, op.size)
            }
            _ => Operand::Const { value: 0 },
        }
    }

    fn write(&mut self, op: &X86Operand, value: Operand) {
        match &op.op_type {
            X86OperandType::Reg(reg) => {
                if let Some(name) = self.reg_name(*reg) {
                    self.b.write_reg(&name, value);
                }
            }
            X86OperandType::Mem(mem) => {
                let addr = self.address(mem);
                self.b.store(addr, value, op.size);
            }
            _ => {}
        }
    }

    fn push(&mut self, value: Operand) {
        let sp = self.sp();
        let width = self.width();
        let old = self.b.read_reg(sp);
        let new = self.b.binary(BinOp::Sub, old, Operand::Const { value: u64::from(width) });
        self.b.store(new.clone(), value, width);
        self.b.write_reg(sp, new);
    }

    fn pop(&mut self, extra: u64) -> Operand {
        let sp = self.sp();
        let width = self.width();
        let old = self.b.read_reg(sp);
        let value = self.b.load(old.clone(), width);
        let new =
            self.b.binary(BinOp::Add, old, Operand::Const { value: u64::from(width) + extra });
        self.b.write_reg(sp, new);
        value
    }

    /// Lower one non-transfer instruction.
    fn straight(&mut self, mnemonic: &str, ops: &[X86Operand]) {
        match (mnemonic, ops) {
            ("nop" | "endbr64" | "endbr32", _) => {}
            ("mov" | "movabs" | "movzx" | "movsx" | "movsxd", [dst, src]) => {
                let value = self.read(src);
                self.write(dst, value);
            }
            ("lea", [dst, src]) => {
                if let X86OperandType::Mem(mem) = &src.op_type {
                    let addr = self.address(mem);
                    self.write(dst, addr);
                }
            }
            ("push", [src]) => {
                let value = self.read(src);
                self.push(value);
            }
            ("pop", [dst]) => {
                let value = self.pop(0);
                self.write(dst, value);
            }
            ("hlt", _) => {
                self.b.halt();
            }
            ("cmp" | "test" | "bt", _) => {
                let args = ops.iter().map(|op| self.read(op)).collect();
                self.b.effect(mnemonic, args);
            }
            (_, [dst, ..]) if !matches!(dst.op_type, X86OperandType::Imm(_)) => {
                let args = ops.iter().map(|op| self.read(op)).collect();
                let result = self.b.helper(mnemonic, args);
                self.write(dst, result);
            }
            _ => {
                let args = ops.iter().map(|op| self.read(op)).collect();
                self.b.effect(mnemonic, args);
            }
        }
    }
}

fn has_group(detail: &capstone::InsnDetail, group: u8) -> bool {
    detail.groups().iter().any(|g| *g == InsnGroupId(group))
}

fn is_conditional(mnemonic: &str) -> bool {
    (mnemonic.starts_with('j') && mnemonic != "jmp") || mnemonic.starts_with("loop")
}

impl Lifter for CapstoneLifter {
    fn init(&mut self) -> Result<(), LiftError> {
        LIFTER_IN_USE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| LiftError::Busy)?;
        self.active = true;
        Ok(())
    }

    fn lift(&mut self, image: &dyn BinaryImage, address: u64) -> Result<LiftedBlock, LiftError> {
        if !self.active {
            return Err(LiftError::NotInitialised);
        }
        let section = image
            .section_containing(address)
            .filter(|s| s.executable)
            .ok_or(LiftError::InvalidAddress(address))?;
        let max = self.max_instructions;
        let window =
            (section.end() - address).min(MAX_INSN_LEN.saturating_mul(max as u64)) as usize;
        let bytes = image.read(address, window).map_err(|_| LiftError::InvalidAddress(address))?;

        let target = image.arch();
        let cs = self.engine_for(target)?;
        let insns = cs
            .disasm_count(&bytes, address, max)
            .map_err(|e| LiftError::Backend(format!("disassembly failed: {e}")))?;
        if insns.is_empty() {
            return Err(LiftError::InvalidInstruction(address));
        }

        let mut b = BodyBuilder::new();
        let mut end = address;
        let mut ending: Option<(BlockKind, Operand)> = None;
        for insn in insns.iter() {
            let pc = insn.address();
            let next = pc + insn.bytes().len() as u64;
            end = next;
            let raw = insn.mnemonic().unwrap_or("").to_lowercase();
            let mnemonic = raw.trim_start_matches("bnd ").trim_start_matches("notrack ");
            trace!("{pc:#x}: {} {}", mnemonic, insn.op_str().unwrap_or(""));

            let detail = cs
                .insn_detail(insn)
                .map_err(|e| LiftError::Backend(format!("no detail at {pc:#x}: {e}")))?;
            let ops: Vec<X86Operand> = detail
                .arch_detail()
                .operands()
                .into_iter()
                .filter_map(|op| match op {
                    ArchOperand::X86Operand(op) => Some(op),
                    _ => None,
                })
                .collect();

            b.begin(pc);
            let mut low = Lowering { cs, b: &mut b, arch: target, pc, next };
            let direct = ops.first().and_then(|op| match op.op_type {
                X86OperandType::Imm(imm) => Some(low.mask(imm as u64)),
                _ => None,
            });

            if has_group(&detail, InsnGroupType::CS_GRP_RET as u8) {
                let extra = direct.unwrap_or(0);
                let ret = low.pop(extra);
                ending = Some((BlockKind::Return, ret));
            } else if has_group(&detail, InsnGroupType::CS_GRP_CALL as u8) {
                match direct {
                    Some(callee) => {
                        low.push(Operand::Pc { value: next });
                        ending = Some((BlockKind::Call, Operand::Pc { value: callee }));
                    }
                    None => {
                        let callee = match ops.first() {
                            Some(op) => low.read(op),
                            None => Operand::Const { value: 0 },
                        };
                        low.push(Operand::Pc { value: next });
                        ending = Some((BlockKind::CallIndirect, callee));
                    }
                }
            } else if has_group(&detail, InsnGroupType::CS_GRP_JUMP as u8) {
                let taken = match (direct, ops.first()) {
                    (Some(t), _) => Operand::Pc { value: t },
                    (None, Some(op)) => low.read(op),
                    (None, None) => Operand::Const { value: 0 },
                };
                ending = Some(if is_conditional(mnemonic) {
                    let cond = low.b.helper(&format!("cond_{mnemonic}"), Vec::new());
                    let sel = low.b.select(cond, taken, Operand::Pc { value: next });
                    let kind =
                        if direct.is_some() { BlockKind::CondJump } else { BlockKind::CondJumpIndirect };
                    (kind, sel)
                } else if direct.is_some() {
                    (BlockKind::Jump, taken)
                } else {
                    (BlockKind::JumpIndirect, taken)
                });
            } else if mnemonic.starts_with("rep") {
                let args = ops.iter().map(|op| low.read(op)).collect();
                low.b.effect(mnemonic, args);
                let counter = low.counter();
                let count = low.b.read_reg(counter);
                let cond = low.b.helper("rep_continue", vec![count]);
                let again = Operand::Pc { value: low.pc };
                let sel = low.b.select(cond, again, Operand::Pc { value: next });
                ending = Some((BlockKind::RepeatedOp, sel));
            } else if mnemonic == "hlt" {
                low.straight(mnemonic, &ops);
                ending = Some((BlockKind::Fallthrough, Operand::Pc { value: next }));
            } else {
                low.straight(mnemonic, &ops);
            }

            if ending.is_some() {
                break;
            }
        }

        let (kind, target) = ending.unwrap_or((BlockKind::Fallthrough, Operand::Pc { value: end }));
        Ok(LiftedBlock { address, size: end - address, kind, body: b.finish(target) })
    }

    fn close(&mut self) {
        if self.active {
            self.active = false;
            self.engine = None;
            LIFTER_IN_USE.store(false, Ordering::SeqCst);
        }
    }

    fn name(&self) -> &'static str {
        "capstone"
    }
}
