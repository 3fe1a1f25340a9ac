//! Kernel IR: the module representation the work-group pass reads and
//! writes.
//!
//! Functions carry typed parameters tagged with numeric address-space ids,
//! a structured body (loops carry nested bodies, there is no flat CFG) and
//! a small attribute record. Implicit per-thread identity values
//! (`_local_id`, `_group_id`, ...) appear as `Operand::Handle` until the
//! privatizer replaces them with explicit values.
//!
//! Modules round-trip through JSON (`serde_json`) and pretty-print through
//! `Display`.

pub mod builder;
pub mod callgraph;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diagnostic::Diagnostic;
use crate::span::Span;

/// The private (per-invocation stack) address space.
pub const PRIVATE_AS: u32 = 0;

// ─── Types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    I8,
    I16,
    I32,
    I64,
    F16,
    F32,
    F64,
    /// Pointer into the given address space.
    Ptr(u32),
    Array(Box<Type>, u64),
    Struct(Vec<Type>),
}

impl Type {
    /// The integer type matching a `size_t` of `width` bits.
    pub fn size_t(width: u32) -> Type {
        if width == 32 {
            Type::I32
        } else {
            Type::I64
        }
    }

    /// Store size in bytes, C layout rules. Saturates at `u64::MAX` for
    /// types whose size does not fit; see `checked_size`.
    pub fn size(&self, ptr_bytes: u64) -> u64 {
        self.checked_size(ptr_bytes).unwrap_or(u64::MAX)
    }

    /// Store size in bytes, or `None` when it overflows `u64`.
    pub fn checked_size(&self, ptr_bytes: u64) -> Option<u64> {
        match self {
            Type::I8 => Some(1),
            Type::I16 | Type::F16 => Some(2),
            Type::I32 | Type::F32 => Some(4),
            Type::I64 | Type::F64 => Some(8),
            Type::Ptr(_) => Some(ptr_bytes),
            Type::Array(inner, n) => inner.checked_size(ptr_bytes)?.checked_mul(*n),
            Type::Struct(fields) => {
                let mut offset = 0u64;
                for field in fields {
                    offset = checked_align_to(offset, field.align(ptr_bytes))?
                        .checked_add(field.checked_size(ptr_bytes)?)?;
                }
                checked_align_to(offset, self.align(ptr_bytes))
            }
        }
    }

    /// Natural (ABI) alignment in bytes.
    pub fn align(&self, ptr_bytes: u64) -> u64 {
        match self {
            Type::Array(inner, _) => inner.align(ptr_bytes),
            Type::Struct(fields) => fields
                .iter()
                .map(|f| f.align(ptr_bytes))
                .max()
                .unwrap_or(1),
            other => other.size(ptr_bytes).max(1),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Array(..) | Type::Struct(_))
    }

    pub fn pointer_space(&self) -> Option<u32> {
        match self {
            Type::Ptr(space) => Some(*space),
            _ => None,
        }
    }
}

/// Round `offset` up to a multiple of `align` (`align` must be nonzero).
pub fn align_to(offset: u64, align: u64) -> u64 {
    offset.div_ceil(align).saturating_mul(align)
}

/// `align_to`, or `None` when the rounded offset overflows.
pub fn checked_align_to(offset: u64, align: u64) -> Option<u64> {
    offset.div_ceil(align).checked_mul(align)
}

// ─── Values ───────────────────────────────────────────────────────

/// A virtual register, defined exactly once per function.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Reg(pub u32);

/// Implicit per-thread identity values a kernel may reference without
/// receiving them as arguments.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Handle {
    LocalId,
    GroupId,
    LocalSize,
    NumGroups,
    GlobalOffset,
    WorkDim,
    PrintfBuffer,
    PrintfBufferPosition,
    PrintfBufferCapacity,
}

impl Handle {
    pub const ALL: [Handle; 9] = [
        Handle::LocalId,
        Handle::GroupId,
        Handle::LocalSize,
        Handle::NumGroups,
        Handle::GlobalOffset,
        Handle::WorkDim,
        Handle::PrintfBuffer,
        Handle::PrintfBufferPosition,
        Handle::PrintfBufferCapacity,
    ];

    /// Symbol name of the implicit global.
    pub fn symbol(self) -> &'static str {
        match self {
            Handle::LocalId => "_local_id",
            Handle::GroupId => "_group_id",
            Handle::LocalSize => "_local_size",
            Handle::NumGroups => "_num_groups",
            Handle::GlobalOffset => "_global_offset",
            Handle::WorkDim => "_work_dim",
            Handle::PrintfBuffer => "_printf_buffer",
            Handle::PrintfBufferPosition => "_printf_buffer_position",
            Handle::PrintfBufferCapacity => "_printf_buffer_capacity",
        }
    }

    /// Whether the handle is indexed by a work-item dimension.
    pub fn is_dimensional(self) -> bool {
        matches!(
            self,
            Handle::LocalId
                | Handle::GroupId
                | Handle::LocalSize
                | Handle::NumGroups
                | Handle::GlobalOffset
        )
    }

    pub fn is_printf(self) -> bool {
        matches!(
            self,
            Handle::PrintfBuffer | Handle::PrintfBufferPosition | Handle::PrintfBufferCapacity
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HandleRef {
    pub kind: Handle,
    #[serde(default)]
    pub dim: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Reg(Reg),
    /// The function's `n`-th parameter.
    Param(u32),
    Imm(u64),
    Handle(HandleRef),
}

impl Operand {
    pub fn handle(kind: Handle, dim: u32) -> Self {
        Operand::Handle(HandleRef { kind, dim })
    }
}

impl From<Reg> for Operand {
    fn from(reg: Reg) -> Self {
        Operand::Reg(reg)
    }
}

/// Half-open value range `[lo, hi)` known to hold for a loaded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub lo: u64,
    pub hi: u64,
}

// ─── Instructions ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inst {
    Bin {
        dst: Reg,
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    /// Typed load from `ptr + offset` bytes.
    Load {
        dst: Reg,
        ty: Type,
        ptr: Operand,
        #[serde(default)]
        offset: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<ValueRange>,
    },
    /// Typed store to `ptr + offset` bytes.
    Store {
        ty: Type,
        ptr: Operand,
        #[serde(default)]
        offset: u64,
        value: Operand,
    },
    /// Allocate `size` bytes in address space `space`.
    Alloca {
        dst: Reg,
        space: u32,
        size: Operand,
        align: u64,
    },
    /// Copy `len` bytes from `src + src_offset` to `dst`.
    Memcpy {
        dst: Operand,
        src: Operand,
        #[serde(default)]
        src_offset: u64,
        len: u64,
    },
    Call {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dst: Option<Reg>,
        callee: String,
        #[serde(default)]
        args: Vec<Operand>,
    },
    /// Work-group barrier.
    Barrier,
    /// Formatted output. `buffer` is the (buffer, position, capacity)
    /// triple once the output has been routed to a device-side buffer.
    Printf {
        format: String,
        #[serde(default)]
        args: Vec<Operand>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        buffer: Option<[Operand; 3]>,
    },
    /// Stand-in value, replaced before the function is published.
    Placeholder { dst: Reg, name: String },
    /// `for var in 0..bound { body }`
    Loop {
        var: Reg,
        bound: Operand,
        body: Vec<Inst>,
    },
    Return,
}

impl Inst {
    /// Register defined by this instruction (loop variables included).
    pub fn def(&self) -> Option<Reg> {
        match self {
            Inst::Bin { dst, .. }
            | Inst::Load { dst, .. }
            | Inst::Alloca { dst, .. }
            | Inst::Placeholder { dst, .. } => Some(*dst),
            Inst::Call { dst, .. } => *dst,
            Inst::Loop { var, .. } => Some(*var),
            _ => None,
        }
    }

    /// Operands read directly by this instruction (not by nested bodies).
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Inst::Bin { lhs, rhs, .. } => vec![lhs, rhs],
            Inst::Load { ptr, .. } => vec![ptr],
            Inst::Store { ptr, value, .. } => vec![ptr, value],
            Inst::Alloca { size, .. } => vec![size],
            Inst::Memcpy { dst, src, .. } => vec![dst, src],
            Inst::Call { args, .. } => args.iter().collect(),
            Inst::Printf { args, buffer, .. } => {
                let mut ops: Vec<&Operand> = args.iter().collect();
                if let Some(buffer) = buffer {
                    ops.extend(buffer.iter());
                }
                ops
            }
            Inst::Loop { bound, .. } => vec![bound],
            Inst::Barrier | Inst::Placeholder { .. } | Inst::Return => Vec::new(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Inst::Bin { lhs, rhs, .. } => vec![lhs, rhs],
            Inst::Load { ptr, .. } => vec![ptr],
            Inst::Store { ptr, value, .. } => vec![ptr, value],
            Inst::Alloca { size, .. } => vec![size],
            Inst::Memcpy { dst, src, .. } => vec![dst, src],
            Inst::Call { args, .. } => args.iter_mut().collect(),
            Inst::Printf { args, buffer, .. } => {
                let mut ops: Vec<&mut Operand> = args.iter_mut().collect();
                if let Some(buffer) = buffer {
                    ops.extend(buffer.iter_mut());
                }
                ops
            }
            Inst::Loop { bound, .. } => vec![bound],
            Inst::Barrier | Inst::Placeholder { .. } | Inst::Return => Vec::new(),
        }
    }
}

/// Visit every instruction, nested loop bodies included (pre-order).
pub fn walk<'a>(insts: &'a [Inst], f: &mut impl FnMut(&'a Inst)) {
    for inst in insts {
        f(inst);
        if let Inst::Loop { body, .. } = inst {
            walk(body, f);
        }
    }
}

/// Mutable pre-order visit. The callback runs before nested bodies are
/// visited, so it may rewrite a loop header.
pub fn walk_mut(insts: &mut [Inst], f: &mut impl FnMut(&mut Inst)) {
    for inst in insts.iter_mut() {
        f(inst);
        if let Inst::Loop { body, .. } = inst {
            walk_mut(body, f);
        }
    }
}

// ─── Functions & modules ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    /// Aggregate passed by value: the callee receives a pointer to a
    /// private copy of `ty`.
    #[serde(default)]
    pub by_value: bool,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            by_value: false,
        }
    }

    pub fn by_value(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            by_value: true,
        }
    }
}

/// Launcher flavours the pass emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherKind {
    Default,
    Fast,
    ArgBuffer,
    Grid,
}

impl LauncherKind {
    /// Deterministic launcher symbol for `kernel`.
    pub fn symbol(self, kernel: &str) -> String {
        match self {
            LauncherKind::Default => format!("_wl_{}_workgroup", kernel),
            LauncherKind::Fast => format!("_wl_{}_workgroup_fast", kernel),
            LauncherKind::ArgBuffer => format!("_wl_{}_workgroup_argbuffer", kernel),
            LauncherKind::Grid => format!("_wl_{}_grid", kernel),
        }
    }
}

impl fmt::Display for LauncherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LauncherKind::Default => "default",
            LauncherKind::Fast => "fast",
            LauncherKind::ArgBuffer => "argbuffer",
            LauncherKind::Grid => "grid",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FnAttrs {
    /// Kernel entry point.
    pub kernel: bool,
    /// The body already executes a whole work-group (barrier resolution
    /// has run on it).
    pub workgroup_body: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reqd_subgroup_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reqd_work_group_size: Option<[u64; 3]>,
    /// Set on generated launchers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launcher: Option<LauncherKind>,
    /// Subgroup size a launcher was compiled for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subgroup_size: Option<u32>,
    /// Kernel (or helper) this function was generated from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    /// `None` for external declarations (runtime library).
    #[serde(default)]
    pub body: Option<Vec<Inst>>,
    #[serde(default)]
    pub attrs: FnAttrs,
}

impl Function {
    pub fn new(name: impl Into<String>, params: Vec<Param>, body: Vec<Inst>) -> Self {
        Self {
            name: name.into(),
            params,
            body: Some(body),
            attrs: FnAttrs::default(),
        }
    }

    pub fn declaration(name: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            name: name.into(),
            params,
            body: None,
            attrs: FnAttrs::default(),
        }
    }

    pub fn kernel(name: impl Into<String>, params: Vec<Param>, body: Vec<Inst>) -> Self {
        let mut func = Self::new(name, params, body);
        func.attrs.kernel = true;
        func
    }

    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }

    pub fn insts(&self) -> &[Inst] {
        self.body.as_deref().unwrap_or(&[])
    }

    /// One past the highest register defined in the body.
    pub fn reg_count(&self) -> u32 {
        let mut next = 0;
        walk(self.insts(), &mut |inst| {
            if let Some(Reg(r)) = inst.def() {
                next = next.max(r + 1);
            }
        });
        next
    }

    /// Names of every function called from the body.
    pub fn callees(&self) -> BTreeSet<&str> {
        let mut callees = BTreeSet::new();
        walk(self.insts(), &mut |inst| {
            if let Inst::Call { callee, .. } = inst {
                callees.insert(callee.as_str());
            }
        });
        callees
    }

    /// Every handle referenced in the body.
    pub fn handle_refs(&self) -> BTreeSet<HandleRef> {
        let mut refs = BTreeSet::new();
        walk(self.insts(), &mut |inst| {
            for op in inst.operands() {
                if let Operand::Handle(h) = op {
                    refs.insert(*h);
                }
            }
        });
        refs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub functions: Vec<Function>,
    /// Declared implicit per-thread globals.
    #[serde(default)]
    pub handles: BTreeSet<Handle>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            handles: BTreeSet::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn add(&mut self, func: Function) {
        self.functions.push(func);
    }

    /// Parse a module from its JSON form. Errors carry a span into `source`.
    pub fn from_json(source: &str) -> Result<Self, Diagnostic> {
        serde_json::from_str(source).map_err(|e| {
            let offset = line_col_offset(source, e.line(), e.column());
            let end = (offset + 1).min(source.len());
            Diagnostic::error(
                format!("invalid module: {}", e),
                Span::new(0, offset as u32, end as u32),
            )
        })
    }

    pub fn to_json(&self) -> String {
        // Serializing plain data into a String cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Byte offset of a 1-based (line, column) position.
fn line_col_offset(source: &str, line: usize, column: usize) -> usize {
    let mut offset = 0;
    for (i, text) in source.split_inclusive('\n').enumerate() {
        if i + 1 == line {
            return (offset + column.saturating_sub(1)).min(source.len());
        }
        offset += text.len();
    }
    source.len()
}

// ─── Display ──────────────────────────────────────────────────────

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::F16 => write!(f, "f16"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Ptr(0) => write!(f, "ptr"),
            Type::Ptr(space) => write!(f, "ptr addrspace({})", space),
            Type::Array(inner, n) => write!(f, "[{} x {}]", n, inner),
            Type::Struct(fields) => {
                let parts: Vec<_> = fields.iter().map(|t| t.to_string()).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%r{}", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::Param(i) => write!(f, "%arg{}", i),
            Operand::Imm(v) => write!(f, "{}", v),
            Operand::Handle(h) if h.kind.is_dimensional() => {
                write!(f, "@{}[{}]", h.kind, h.dim)
            }
            Operand::Handle(h) => write!(f, "@{}", h.kind),
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::UDiv => "udiv",
            BinOp::URem => "urem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
        };
        write!(f, "{}", name)
    }
}

fn join_operands(ops: &[Operand]) -> String {
    ops.iter()
        .map(|o| o.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_insts(f: &mut fmt::Formatter<'_>, insts: &[Inst], depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    for inst in insts {
        match inst {
            Inst::Bin { dst, op, lhs, rhs } => {
                writeln!(f, "{}{} = {} {}, {}", pad, dst, op, lhs, rhs)?
            }
            Inst::Load {
                dst,
                ty,
                ptr,
                offset,
                range,
            } => {
                write!(f, "{}{} = load {}, {} + {}", pad, dst, ty, ptr, offset)?;
                if let Some(r) = range {
                    write!(f, " !range [{}, {})", r.lo, r.hi)?;
                }
                writeln!(f)?
            }
            Inst::Store {
                ty,
                ptr,
                offset,
                value,
            } => writeln!(f, "{}store {} {}, {} + {}", pad, ty, value, ptr, offset)?,
            Inst::Alloca {
                dst,
                space,
                size,
                align,
            } => writeln!(
                f,
                "{}{} = alloca {} bytes, align {}, addrspace({})",
                pad, dst, size, align, space
            )?,
            Inst::Memcpy {
                dst,
                src,
                src_offset,
                len,
            } => writeln!(
                f,
                "{}memcpy {}, {} + {}, {}",
                pad, dst, src, src_offset, len
            )?,
            Inst::Call { dst, callee, args } => match dst {
                Some(d) => writeln!(f, "{}{} = call @{}({})", pad, d, callee, join_operands(args))?,
                None => writeln!(f, "{}call @{}({})", pad, callee, join_operands(args))?,
            },
            Inst::Barrier => writeln!(f, "{}barrier", pad)?,
            Inst::Printf {
                format,
                args,
                buffer,
            } => {
                write!(f, "{}printf {:?}", pad, format)?;
                if !args.is_empty() {
                    write!(f, ", {}", join_operands(args))?;
                }
                if let Some(buffer) = buffer {
                    write!(f, " -> [{}]", join_operands(buffer))?;
                }
                writeln!(f)?
            }
            Inst::Placeholder { dst, name } => {
                writeln!(f, "{}{} = placeholder {:?}", pad, dst, name)?
            }
            Inst::Loop { var, bound, body } => {
                writeln!(f, "{}loop {} < {} {{", pad, var, bound)?;
                write_insts(f, body, depth + 1)?;
                writeln!(f, "{}}}", pad)?
            }
            Inst::Return => writeln!(f, "{}ret", pad)?,
        }
    }
    Ok(())
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                if p.by_value {
                    format!("byval {} %{}", p.ty, p.name)
                } else {
                    format!("{} %{}", p.ty, p.name)
                }
            })
            .collect();
        let head = if self.attrs.kernel {
            "kernel".to_string()
        } else if let Some(kind) = self.attrs.launcher {
            format!("launcher({})", kind)
        } else if self.is_declaration() {
            "declare".to_string()
        } else {
            "fn".to_string()
        };
        write!(f, "{} @{}({})", head, self.name, params.join(", "))?;
        if let Some(sg) = self.attrs.subgroup_size {
            write!(f, " subgroup({})", sg)?;
        }
        match &self.body {
            None => writeln!(f),
            Some(body) => {
                writeln!(f, " {{")?;
                write_insts(f, body, 1)?;
                writeln!(f, "}}")
            }
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for handle in &self.handles {
            writeln!(f, "global @{}", handle)?;
        }
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
