//! FnBuilder: register allocation and nested-body emission.
//!
//! Loops are emitted by bracketing: `begin_loop` opens a nested body and
//! returns the induction register, `end_loop` closes it and appends the
//! finished `Inst::Loop` to the enclosing body.

use super::{BinOp, Inst, Operand, Reg, Type, ValueRange};

struct Frame {
    header: Option<(Reg, Operand)>,
    insts: Vec<Inst>,
}

pub struct FnBuilder {
    next: u32,
    frames: Vec<Frame>,
}

impl Default for FnBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FnBuilder {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Builder whose first fresh register is `%r{next}`. Used when
    /// appending to a body that already defines registers.
    pub fn starting_at(next: u32) -> Self {
        Self {
            next,
            frames: vec![Frame {
                header: None,
                insts: Vec::new(),
            }],
        }
    }

    pub fn fresh(&mut self) -> Reg {
        let reg = Reg(self.next);
        self.next += 1;
        reg
    }

    /// Next register number this builder would hand out.
    pub fn next_reg(&self) -> u32 {
        self.next
    }

    pub fn push(&mut self, inst: Inst) {
        // The root frame is never popped.
        if let Some(frame) = self.frames.last_mut() {
            frame.insts.push(inst);
        }
    }

    pub fn extend(&mut self, insts: impl IntoIterator<Item = Inst>) {
        for inst in insts {
            self.push(inst);
        }
    }

    pub fn bin(&mut self, op: BinOp, lhs: Operand, rhs: Operand) -> Reg {
        let dst = self.fresh();
        self.push(Inst::Bin { dst, op, lhs, rhs });
        dst
    }

    pub fn load(
        &mut self,
        ty: Type,
        ptr: Operand,
        offset: u64,
        range: Option<ValueRange>,
    ) -> Reg {
        let dst = self.fresh();
        self.push(Inst::Load {
            dst,
            ty,
            ptr,
            offset,
            range,
        });
        dst
    }

    pub fn store(&mut self, ty: Type, ptr: Operand, offset: u64, value: Operand) {
        self.push(Inst::Store {
            ty,
            ptr,
            offset,
            value,
        });
    }

    pub fn alloca(&mut self, space: u32, size: Operand, align: u64) -> Reg {
        let dst = self.fresh();
        self.push(Inst::Alloca {
            dst,
            space,
            size,
            align,
        });
        dst
    }

    pub fn memcpy(&mut self, dst: Operand, src: Operand, src_offset: u64, len: u64) {
        self.push(Inst::Memcpy {
            dst,
            src,
            src_offset,
            len,
        });
    }

    pub fn call(&mut self, callee: impl Into<String>, args: Vec<Operand>) {
        self.push(Inst::Call {
            dst: None,
            callee: callee.into(),
            args,
        });
    }

    pub fn call_value(&mut self, callee: impl Into<String>, args: Vec<Operand>) -> Reg {
        let dst = self.fresh();
        self.push(Inst::Call {
            dst: Some(dst),
            callee: callee.into(),
            args,
        });
        dst
    }

    pub fn placeholder(&mut self, name: impl Into<String>) -> Reg {
        let dst = self.fresh();
        self.push(Inst::Placeholder {
            dst,
            name: name.into(),
        });
        dst
    }

    /// Open a loop over `0..bound`; returns the induction register.
    pub fn begin_loop(&mut self, bound: Operand) -> Reg {
        let var = self.fresh();
        self.frames.push(Frame {
            header: Some((var, bound)),
            insts: Vec::new(),
        });
        var
    }

    pub fn end_loop(&mut self) {
        if self.frames.len() < 2 {
            return;
        }
        if let Some(Frame {
            header: Some((var, bound)),
            insts,
        }) = self.frames.pop()
        {
            self.push(Inst::Loop {
                var,
                bound,
                body: insts,
            });
        }
    }

    pub fn ret(&mut self) {
        self.push(Inst::Return);
    }

    /// Close any loops still open and return the root body.
    pub fn finish(mut self) -> Vec<Inst> {
        while self.frames.len() > 1 {
            self.end_loop();
        }
        self.frames
            .pop()
            .map(|frame| frame.insts)
            .unwrap_or_default()
    }
}
