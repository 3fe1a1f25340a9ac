//! Reference interpreter for the kernel IR.
//!
//! Memory is a set of byte regions, one per allocation. A pointer is a
//! (region, offset) pair; in memory it is encoded as an integer with
//! `region + 1` in the high bits so that zero stays the null pointer:
//!
//! ```text
//! 4-byte pointers: [region+1 : 8 bits][offset : 24 bits]
//! 8-byte pointers: [region+1 : 24 bits][offset : 40 bits]
//! ```
//!
//! Every call, barrier and formatted output is recorded as an `Event`.
//! Calls to external declarations return zero, except the SPMD local-id
//! intrinsic which returns the id set with `Machine::set_local_id`.

pub mod harness;

use std::collections::HashMap;
use std::fmt;

use crate::config::device::DeviceConfig;
use crate::ir::{BinOp, Function, Inst, Module, Operand, Reg, Type};
use crate::workgroup::context::{read_uint, write_uint};
use crate::workgroup::launcher::LOCAL_ID_INTRINSIC;

pub use harness::Harness;

/// Instructions executed before a run is abandoned.
pub const DEFAULT_STEP_LIMIT: u64 = 50_000_000;

const MAX_CALL_DEPTH: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Pointer {
    pub region: usize,
    pub offset: u64,
}

impl Pointer {
    pub fn add(self, bytes: u64) -> Self {
        Self {
            region: self.region,
            offset: self.offset.wrapping_add(bytes),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Value {
    Int(u64),
    Ptr(Pointer),
}

impl Value {
    pub fn as_int(self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(v),
            Value::Ptr(_) => None,
        }
    }

    pub fn as_ptr(self) -> Option<Pointer> {
        match self {
            Value::Ptr(p) => Some(p),
            Value::Int(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Ptr(p) => write!(f, "&{}+{}", p.region, p.offset),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Call { callee: String, args: Vec<Value> },
    Barrier,
    Printf { format: String, args: Vec<Value> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecError {
    UnknownFunction(String),
    Arity { callee: String, expected: usize, got: usize },
    UndefinedRegister { function: String, reg: Reg },
    MissingParam { function: String, index: u32 },
    /// An implicit handle reached execution: the function was never
    /// privatized.
    UnprivatizedHandle { function: String, handle: String },
    BadPointer { function: String, value: String },
    OutOfBounds { region: usize, offset: u64, len: u64, size: u64 },
    TypeMismatch { function: String, detail: String },
    DivisionByZero { function: String },
    StepLimit(u64),
    CallDepth(usize),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::UnknownFunction(name) => write!(f, "call to unknown function '{}'", name),
            ExecError::Arity {
                callee,
                expected,
                got,
            } => write!(f, "'{}' takes {} arguments, got {}", callee, expected, got),
            ExecError::UndefinedRegister { function, reg } => {
                write!(f, "{} read before definition in '{}'", reg, function)
            }
            ExecError::MissingParam { function, index } => {
                write!(f, "'{}' has no parameter {}", function, index)
            }
            ExecError::UnprivatizedHandle { function, handle } => {
                write!(f, "'{}' reads implicit global @{}", function, handle)
            }
            ExecError::BadPointer { function, value } => {
                write!(f, "'{}' dereferences non-pointer {}", function, value)
            }
            ExecError::OutOfBounds {
                region,
                offset,
                len,
                size,
            } => write!(
                f,
                "access of {} bytes at offset {} is outside region {} ({} bytes)",
                len, offset, region, size
            ),
            ExecError::TypeMismatch { function, detail } => {
                write!(f, "type mismatch in '{}': {}", function, detail)
            }
            ExecError::DivisionByZero { function } => write!(f, "division by zero in '{}'", function),
            ExecError::StepLimit(limit) => write!(f, "step limit of {} exceeded", limit),
            ExecError::CallDepth(depth) => write!(f, "call depth {} exceeded", depth),
        }
    }
}

impl std::error::Error for ExecError {}

#[derive(Clone, Debug)]
pub struct Region {
    pub space: u32,
    pub bytes: Vec<u8>,
}

enum Flow {
    Next,
    Return,
}

struct Frame<'m> {
    func: &'m Function,
    args: Vec<Value>,
    regs: HashMap<Reg, Value>,
}

pub struct Machine<'m> {
    module: &'m Module,
    ptr_bytes: u64,
    regions: Vec<Region>,
    events: Vec<Event>,
    local_id: [u64; 3],
    steps: u64,
    step_limit: u64,
    depth: usize,
}

impl<'m> Machine<'m> {
    pub fn new(module: &'m Module, cfg: &DeviceConfig) -> Self {
        Self {
            module,
            ptr_bytes: cfg.ptr_bytes(),
            regions: Vec::new(),
            events: Vec::new(),
            local_id: [0; 3],
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
            depth: 0,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Local id the SPMD intrinsic reports.
    pub fn set_local_id(&mut self, id: [u64; 3]) {
        self.local_id = id;
    }

    pub fn alloc(&mut self, space: u32, size: u64) -> Pointer {
        self.alloc_bytes(space, vec![0; size as usize])
    }

    pub fn alloc_bytes(&mut self, space: u32, bytes: Vec<u8>) -> Pointer {
        self.regions.push(Region { space, bytes });
        Pointer {
            region: self.regions.len() - 1,
            offset: 0,
        }
    }

    pub fn region(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn bytes(&self, ptr: Pointer, len: u64) -> Result<&[u8], ExecError> {
        let (region, start, end) = self.bounds(ptr, len)?;
        Ok(&self.regions[region].bytes[start..end])
    }

    pub fn write(&mut self, ptr: Pointer, data: &[u8]) -> Result<(), ExecError> {
        let (region, start, end) = self.bounds(ptr, data.len() as u64)?;
        self.regions[region].bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    pub fn read_uint(&self, ptr: Pointer, width: u64) -> Result<u64, ExecError> {
        Ok(read_uint(self.bytes(ptr, width)?))
    }

    fn bounds(&self, ptr: Pointer, len: u64) -> Result<(usize, usize, usize), ExecError> {
        let size = self
            .regions
            .get(ptr.region)
            .map(|r| r.bytes.len() as u64)
            .unwrap_or(0);
        match ptr.offset.checked_add(len) {
            Some(end) if ptr.region < self.regions.len() && end <= size => {
                Ok((ptr.region, ptr.offset as usize, end as usize))
            }
            _ => Err(ExecError::OutOfBounds {
                region: ptr.region,
                offset: ptr.offset,
                len,
                size,
            }),
        }
    }

    fn region_shift(&self) -> u32 {
        if self.ptr_bytes == 4 {
            24
        } else {
            40
        }
    }

    /// Integer form of a pointer as stored in memory.
    pub fn encode_ptr(&self, ptr: Pointer) -> u64 {
        ((ptr.region as u64 + 1) << self.region_shift()) | ptr.offset
    }

    /// Inverse of `encode_ptr`; zero decodes to `None`.
    pub fn decode_ptr(&self, raw: u64) -> Option<Pointer> {
        let shift = self.region_shift();
        let tag = raw >> shift;
        if tag == 0 {
            return None;
        }
        Some(Pointer {
            region: (tag - 1) as usize,
            offset: raw & ((1u64 << shift) - 1),
        })
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Argument lists of every recorded call to `callee`, in order.
    pub fn calls_to(&self, callee: &str) -> Vec<&[Value]> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Call { callee: c, args } if c == callee => Some(args.as_slice()),
                _ => None,
            })
            .collect()
    }

    /// Execute `name` with `args`. Returns the call's value, if any.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, ExecError> {
        self.events.push(Event::Call {
            callee: name.to_string(),
            args: args.to_vec(),
        });
        let module = self.module;
        let func = module
            .get(name)
            .ok_or_else(|| ExecError::UnknownFunction(name.to_string()))?;
        if func.params.len() != args.len() {
            return Err(ExecError::Arity {
                callee: name.to_string(),
                expected: func.params.len(),
                got: args.len(),
            });
        }
        let Some(body) = func.body.as_deref() else {
            return Ok(Some(self.external(name, args)));
        };
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ExecError::CallDepth(MAX_CALL_DEPTH));
        }
        self.depth += 1;
        let mut frame = Frame {
            func,
            args: args.to_vec(),
            regs: HashMap::new(),
        };
        let result = self.exec_block(&mut frame, body);
        self.depth -= 1;
        result.map(|_| None)
    }

    fn external(&self, name: &str, args: &[Value]) -> Value {
        if name == LOCAL_ID_INTRINSIC {
            let dim = args.first().and_then(|v| v.as_int()).unwrap_or(0) as usize;
            return Value::Int(self.local_id.get(dim).copied().unwrap_or(0));
        }
        Value::Int(0)
    }

    fn exec_block(&mut self, frame: &mut Frame<'m>, insts: &'m [Inst]) -> Result<Flow, ExecError> {
        for inst in insts {
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(ExecError::StepLimit(self.step_limit));
            }
            if let Flow::Return = self.exec_inst(frame, inst)? {
                return Ok(Flow::Return);
            }
        }
        Ok(Flow::Next)
    }

    fn exec_inst(&mut self, frame: &mut Frame<'m>, inst: &'m Inst) -> Result<Flow, ExecError> {
        match inst {
            Inst::Bin { dst, op, lhs, rhs } => {
                let lhs = self.eval(frame, lhs)?;
                let rhs = self.eval(frame, rhs)?;
                let value = self.bin(frame, *op, lhs, rhs)?;
                frame.regs.insert(*dst, value);
            }
            Inst::Load {
                dst,
                ty,
                ptr,
                offset,
                ..
            } => {
                let ptr = self.pointer(frame, ptr)?.add(*offset);
                let value = self.load(frame, ty, ptr)?;
                frame.regs.insert(*dst, value);
            }
            Inst::Store {
                ty,
                ptr,
                offset,
                value,
            } => {
                let ptr = self.pointer(frame, ptr)?.add(*offset);
                let value = self.eval(frame, value)?;
                self.store(frame, ty, ptr, value)?;
            }
            Inst::Alloca {
                dst, space, size, ..
            } => {
                let size = self.int(frame, size)?;
                let ptr = self.alloc(*space, size);
                frame.regs.insert(*dst, Value::Ptr(ptr));
            }
            Inst::Memcpy {
                dst,
                src,
                src_offset,
                len,
            } => {
                let dst = self.pointer(frame, dst)?;
                let src = self.pointer(frame, src)?.add(*src_offset);
                let data = self.bytes(src, *len)?.to_vec();
                self.write(dst, &data)?;
            }
            Inst::Call { dst, callee, args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval(frame, a))
                    .collect::<Result<Vec<_>, _>>()?;
                let result = self.call(callee, &values)?;
                if let Some(dst) = dst {
                    frame.regs.insert(*dst, result.unwrap_or(Value::Int(0)));
                }
            }
            Inst::Barrier => self.events.push(Event::Barrier),
            Inst::Printf {
                format,
                args,
                buffer,
            } => {
                let values = args
                    .iter()
                    .map(|a| self.eval(frame, a))
                    .collect::<Result<Vec<_>, _>>()?;
                if let Some([buf, pos, cap]) = buffer {
                    let buf = self.pointer(frame, buf)?;
                    let pos = self.pointer(frame, pos)?;
                    let cap = self.int(frame, cap)?;
                    self.append_output(buf, pos, cap, &values)?;
                }
                self.events.push(Event::Printf {
                    format: format.clone(),
                    args: values,
                });
            }
            Inst::Placeholder { dst, .. } => {
                return Err(ExecError::UndefinedRegister {
                    function: frame.func.name.clone(),
                    reg: *dst,
                })
            }
            Inst::Loop { var, bound, body } => {
                let bound = self.int(frame, bound)?;
                for i in 0..bound {
                    frame.regs.insert(*var, Value::Int(i));
                    if let Flow::Return = self.exec_block(frame, body)? {
                        return Ok(Flow::Return);
                    }
                }
            }
            Inst::Return => return Ok(Flow::Return),
        }
        Ok(Flow::Next)
    }

    /// Output record: u32 argument count, then one 8-byte word per
    /// argument. The position word counts bytes already used; a record
    /// that does not fit is dropped.
    fn append_output(
        &mut self,
        buf: Pointer,
        pos: Pointer,
        capacity: u64,
        values: &[Value],
    ) -> Result<(), ExecError> {
        let used = self.read_uint(pos, 4)?;
        let len = 4 + 8 * values.len() as u64;
        if used + len > capacity {
            return Ok(());
        }
        let mut record = vec![0u8; len as usize];
        write_uint(&mut record[..4], values.len() as u64);
        for (i, value) in values.iter().enumerate() {
            let raw = match value {
                Value::Int(v) => *v,
                Value::Ptr(p) => self.encode_ptr(*p),
            };
            let at = 4 + 8 * i;
            write_uint(&mut record[at..at + 8], raw);
        }
        self.write(buf.add(used), &record)?;
        let mut word = [0u8; 4];
        write_uint(&mut word, used + len);
        self.write(pos, &word)
    }

    fn eval(&self, frame: &Frame<'m>, op: &Operand) -> Result<Value, ExecError> {
        match op {
            Operand::Reg(reg) => frame.regs.get(reg).copied().ok_or_else(|| {
                ExecError::UndefinedRegister {
                    function: frame.func.name.clone(),
                    reg: *reg,
                }
            }),
            Operand::Param(i) => {
                frame
                    .args
                    .get(*i as usize)
                    .copied()
                    .ok_or_else(|| ExecError::MissingParam {
                        function: frame.func.name.clone(),
                        index: *i,
                    })
            }
            Operand::Imm(v) => Ok(Value::Int(*v)),
            Operand::Handle(h) => Err(ExecError::UnprivatizedHandle {
                function: frame.func.name.clone(),
                handle: h.kind.symbol().to_string(),
            }),
        }
    }

    fn int(&self, frame: &Frame<'m>, op: &Operand) -> Result<u64, ExecError> {
        match self.eval(frame, op)? {
            Value::Int(v) => Ok(v),
            other => Err(ExecError::TypeMismatch {
                function: frame.func.name.clone(),
                detail: format!("expected an integer, found {}", other),
            }),
        }
    }

    fn pointer(&self, frame: &Frame<'m>, op: &Operand) -> Result<Pointer, ExecError> {
        match self.eval(frame, op)? {
            Value::Ptr(p) => Ok(p),
            other => Err(ExecError::BadPointer {
                function: frame.func.name.clone(),
                value: other.to_string(),
            }),
        }
    }

    fn bin(&self, frame: &Frame<'m>, op: BinOp, lhs: Value, rhs: Value) -> Result<Value, ExecError> {
        let (l, r) = match (lhs, rhs) {
            (Value::Int(l), Value::Int(r)) => (l, r),
            (Value::Ptr(p), Value::Int(r)) if op == BinOp::Add => return Ok(Value::Ptr(p.add(r))),
            (Value::Ptr(p), Value::Int(r)) if op == BinOp::Sub => {
                return Ok(Value::Ptr(p.add(r.wrapping_neg())))
            }
            _ => {
                return Err(ExecError::TypeMismatch {
                    function: frame.func.name.clone(),
                    detail: format!("{} {}, {}", op, lhs, rhs),
                })
            }
        };
        let value = match op {
            BinOp::Add => l.wrapping_add(r),
            BinOp::Sub => l.wrapping_sub(r),
            BinOp::Mul => l.wrapping_mul(r),
            BinOp::UDiv | BinOp::URem if r == 0 => {
                return Err(ExecError::DivisionByZero {
                    function: frame.func.name.clone(),
                })
            }
            BinOp::UDiv => l / r,
            BinOp::URem => l % r,
            BinOp::And => l & r,
            BinOp::Or => l | r,
            BinOp::Xor => l ^ r,
            BinOp::Shl => l.wrapping_shl(r as u32),
            BinOp::LShr => l.wrapping_shr(r as u32),
        };
        Ok(Value::Int(value))
    }

    fn load(&self, frame: &Frame<'m>, ty: &Type, ptr: Pointer) -> Result<Value, ExecError> {
        if ty.is_aggregate() {
            return Err(ExecError::TypeMismatch {
                function: frame.func.name.clone(),
                detail: format!("load of aggregate {}", ty),
            });
        }
        let raw = self.read_uint(ptr, ty.size(self.ptr_bytes))?;
        Ok(match ty {
            Type::Ptr(_) => match self.decode_ptr(raw) {
                Some(p) => Value::Ptr(p),
                None => Value::Int(0),
            },
            _ => Value::Int(raw),
        })
    }

    fn store(&mut self, frame: &Frame<'m>, ty: &Type, ptr: Pointer, value: Value) -> Result<(), ExecError> {
        if ty.is_aggregate() {
            return Err(ExecError::TypeMismatch {
                function: frame.func.name.clone(),
                detail: format!("store of aggregate {}", ty),
            });
        }
        let raw = match value {
            Value::Int(v) => v,
            Value::Ptr(p) => self.encode_ptr(p),
        };
        let mut bytes = vec![0u8; ty.size(self.ptr_bytes) as usize];
        write_uint(&mut bytes, raw);
        self.write(ptr, &bytes)
    }
}
