use crate::ir::{BinOp, Body, Inst, Operand, Temp};

/// Incremental construction of a body that follows the lifter contract:
/// - every decoded instruction starts with `SetPc`;
/// - the unit ends with one `Branch` to the next program counter, then `Exit`;
/// - conditional transfers branch to a `Select` between two `Pc` literals;
/// - non-returning units contain a `Halt`.
#[derive(Debug, Default)]
pub struct BodyBuilder {
    insts: Vec<Inst>,
    next_temp: u32,
}

impl BodyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh(&mut self) -> Temp {
        let temp = Temp(self.next_temp);
        self.next_temp += 1;
        temp
    }

    pub fn push(&mut self, inst: Inst) -> &mut Self {
        self.insts.push(inst);
        self
    }

    /// Start a new guest instruction at `pc`.
    pub fn begin(&mut self, pc: u64) -> &mut Self {
        self.push(Inst::SetPc { pc })
    }

    pub fn read_reg(&mut self, reg: &str) -> Operand {
        let dst = self.fresh();
        self.insts.push(Inst::ReadReg { dst, reg: reg.to_string() });
        Operand::temp(dst)
    }

    pub fn write_reg(&mut self, reg: &str, value: Operand) -> &mut Self {
        self.push(Inst::WriteReg { reg: reg.to_string(), value })
    }

    pub fn binary(&mut self, op: BinOp, lhs: Operand, rhs: Operand) -> Operand {
        let dst = self.fresh();
        self.insts.push(Inst::Binary { dst, op, lhs, rhs });
        Operand::temp(dst)
    }

    pub fn select(&mut self, cond: Operand, if_true: Operand, if_false: Operand) -> Operand {
        let dst = self.fresh();
        self.insts.push(Inst::Select { dst, cond, if_true, if_false });
        Operand::temp(dst)
    }

    pub fn load(&mut self, addr: Operand, size: u8) -> Operand {
        let dst = self.fresh();
        self.insts.push(Inst::Load { dst, addr, size });
        Operand::temp(dst)
    }

    pub fn store(&mut self, addr: Operand, value: Operand, size: u8) -> &mut Self {
        self.push(Inst::Store { addr, value, size })
    }

    /// Opaque operation producing a value.
    pub fn helper(&mut self, name: &str, args: Vec<Operand>) -> Operand {
        let dst = self.fresh();
        self.insts.push(Inst::Helper { dst: Some(dst), name: name.to_string(), args });
        Operand::temp(dst)
    }

    /// Opaque operation evaluated for its side effects only.
    pub fn effect(&mut self, name: &str, args: Vec<Operand>) -> &mut Self {
        self.push(Inst::Helper { dst: None, name: name.to_string(), args })
    }

    pub fn halt(&mut self) -> &mut Self {
        self.push(Inst::Halt)
    }

    /// Close the unit with a transfer to `target`.
    pub fn finish(mut self, target: Operand) -> Body {
        self.insts.push(Inst::Branch { target });
        self.insts.push(Inst::Exit);
        Body::new(self.insts, self.next_temp)
    }

    /// Close the unit with a direct transfer to `pc`.
    pub fn finish_at(self, pc: u64) -> Body {
        self.finish(Operand::Pc { value: pc })
    }
}
