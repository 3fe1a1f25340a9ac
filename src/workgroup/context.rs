//! Execution-context record layout and field accessors.
//!
//! The context is a fixed-layout record the caller passes by pointer. Its
//! field widths depend on the device (`size_t` and pointer width), so the
//! layout is computed from the `DeviceConfig` rather than hardcoded.

use std::collections::HashMap;

use crate::config::device::DeviceConfig;
use crate::ir::builder::FnBuilder;
use crate::ir::{align_to, walk_mut, Handle, Inst, Operand, Reg, Type, ValueRange};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextField {
    WorkDim,
    NumGroups,
    GlobalOffset,
    LocalSize,
    GroupId,
    PrintfBuffer,
    PrintfBufferPosition,
    PrintfBufferCapacity,
}

impl ContextField {
    /// Record order.
    pub const ALL: [ContextField; 8] = [
        ContextField::WorkDim,
        ContextField::NumGroups,
        ContextField::GlobalOffset,
        ContextField::LocalSize,
        ContextField::GroupId,
        ContextField::PrintfBuffer,
        ContextField::PrintfBufferPosition,
        ContextField::PrintfBufferCapacity,
    ];

    /// Context field backing an implicit handle. `_local_id` has none: it
    /// is the work-item loop's induction variable.
    pub fn for_handle(handle: Handle) -> Option<ContextField> {
        match handle {
            Handle::LocalId => None,
            Handle::GroupId => Some(ContextField::GroupId),
            Handle::LocalSize => Some(ContextField::LocalSize),
            Handle::NumGroups => Some(ContextField::NumGroups),
            Handle::GlobalOffset => Some(ContextField::GlobalOffset),
            Handle::WorkDim => Some(ContextField::WorkDim),
            Handle::PrintfBuffer => Some(ContextField::PrintfBuffer),
            Handle::PrintfBufferPosition => Some(ContextField::PrintfBufferPosition),
            Handle::PrintfBufferCapacity => Some(ContextField::PrintfBufferCapacity),
        }
    }

    /// Number of elements (3 for per-dimension fields).
    pub fn len(self) -> u64 {
        match self {
            ContextField::NumGroups
            | ContextField::GlobalOffset
            | ContextField::LocalSize
            | ContextField::GroupId => 3,
            _ => 1,
        }
    }

    fn index(self) -> usize {
        ContextField::ALL
            .iter()
            .position(|f| *f == self)
            .unwrap_or_default()
    }

    /// Element type on `cfg`.
    pub fn ty(self, cfg: &DeviceConfig) -> Type {
        match self {
            ContextField::WorkDim | ContextField::PrintfBufferCapacity => Type::I32,
            ContextField::PrintfBuffer | ContextField::PrintfBufferPosition => cfg.global_ptr(),
            _ => cfg.size_t(),
        }
    }
}

/// Byte layout of the execution context on one device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextLayout {
    offsets: [u64; 8],
    types: [Type; 8],
    size: u64,
    align: u64,
    ptr_bytes: u64,
}

impl ContextLayout {
    pub fn new(cfg: &DeviceConfig) -> Self {
        let ptr_bytes = cfg.ptr_bytes();
        let types = ContextField::ALL.map(|f| f.ty(cfg));
        let mut offsets = [0u64; 8];
        let mut offset = 0u64;
        let mut max_align = 1u64;
        for (i, field) in ContextField::ALL.iter().enumerate() {
            let align = types[i].align(ptr_bytes);
            max_align = max_align.max(align);
            offset = align_to(offset, align);
            offsets[i] = offset;
            offset += types[i].size(ptr_bytes) * field.len();
        }
        Self {
            offsets,
            types,
            size: align_to(offset, max_align),
            align: max_align,
            ptr_bytes,
        }
    }

    /// Byte offset of element `dim` of `field`.
    pub fn offset(&self, field: ContextField, dim: u32) -> u64 {
        let i = field.index();
        self.offsets[i] + u64::from(dim) * self.types[i].size(self.ptr_bytes)
    }

    pub fn field_type(&self, field: ContextField) -> &Type {
        &self.types[field.index()]
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn align(&self) -> u64 {
        self.align
    }

    /// Serialize host-side values into the record's bytes.
    pub fn encode(&self, values: &ContextValues) -> Vec<u8> {
        let mut bytes = vec![0u8; self.size as usize];
        let mut put = |field: ContextField, dim: u32, value: u64| {
            let at = self.offset(field, dim) as usize;
            let width = self.field_type(field).size(self.ptr_bytes) as usize;
            write_uint(&mut bytes[at..at + width], value);
        };
        put(ContextField::WorkDim, 0, u64::from(values.work_dim));
        for dim in 0..3u32 {
            let d = dim as usize;
            put(ContextField::NumGroups, dim, values.num_groups[d]);
            put(ContextField::GlobalOffset, dim, values.global_offset[d]);
            put(ContextField::LocalSize, dim, values.local_size[d]);
            put(ContextField::GroupId, dim, values.group_id[d]);
        }
        put(ContextField::PrintfBuffer, 0, values.printf_buffer);
        put(ContextField::PrintfBufferPosition, 0, values.printf_buffer_position);
        put(
            ContextField::PrintfBufferCapacity,
            0,
            u64::from(values.printf_buffer_capacity),
        );
        bytes
    }

    /// Read one field element back out of encoded bytes.
    pub fn read(&self, bytes: &[u8], field: ContextField, dim: u32) -> u64 {
        let at = self.offset(field, dim) as usize;
        let width = self.field_type(field).size(self.ptr_bytes) as usize;
        read_uint(&bytes[at..at + width])
    }
}

/// Host-side view of the execution context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContextValues {
    pub work_dim: u32,
    pub num_groups: [u64; 3],
    pub global_offset: [u64; 3],
    pub local_size: [u64; 3],
    pub group_id: [u64; 3],
    /// Encoded device pointers (see `exec::Machine::encode_ptr`).
    pub printf_buffer: u64,
    pub printf_buffer_position: u64,
    pub printf_buffer_capacity: u32,
}

impl ContextValues {
    /// A launch over `num_groups` work-groups of `local_size` items.
    pub fn launch(local_size: [u64; 3], num_groups: [u64; 3]) -> Self {
        let work_dim = if local_size[2] > 1 || num_groups[2] > 1 {
            3
        } else if local_size[1] > 1 || num_groups[1] > 1 {
            2
        } else {
            1
        };
        Self {
            work_dim,
            num_groups,
            local_size,
            ..Self::default()
        }
    }
}

pub(crate) fn write_uint(dst: &mut [u8], value: u64) {
    match dst.len() {
        1 => dst.copy_from_slice(bytemuck::bytes_of(&(value as u8))),
        2 => dst.copy_from_slice(bytemuck::bytes_of(&(value as u16))),
        4 => dst.copy_from_slice(bytemuck::bytes_of(&(value as u32))),
        _ => dst[..8].copy_from_slice(bytemuck::bytes_of(&value)),
    }
}

pub(crate) fn read_uint(src: &[u8]) -> u64 {
    match src.len() {
        1 => u64::from(src[0]),
        2 => u64::from(bytemuck::pod_read_unaligned::<u16>(src)),
        4 => u64::from(bytemuck::pod_read_unaligned::<u32>(src)),
        _ => bytemuck::pod_read_unaligned::<u64>(&src[..8]),
    }
}

// ─── Accessors ────────────────────────────────────────────────────

/// Statically known range of a context field element, if any.
pub fn field_range(cfg: &DeviceConfig, field: ContextField, dim: u32) -> Option<ValueRange> {
    match field {
        ContextField::LocalSize => Some(ValueRange {
            lo: 1,
            hi: cfg.max_work_item_sizes.get(dim as usize).copied().unwrap_or(1) + 1,
        }),
        ContextField::GroupId => Some(ValueRange {
            lo: 0,
            hi: cfg.max_grid_dim_width,
        }),
        ContextField::NumGroups => Some(ValueRange {
            lo: 1,
            hi: cfg.max_grid_dim_width + 1,
        }),
        ContextField::WorkDim => Some(ValueRange {
            lo: 1,
            hi: u64::from(cfg.max_work_item_dims) + 1,
        }),
        _ => None,
    }
}

/// Emit a typed load of `field[dim]` from the context pointer `ctx`,
/// tagged with the field's static range.
pub fn create_load_from_context(
    b: &mut FnBuilder,
    cfg: &DeviceConfig,
    layout: &ContextLayout,
    ctx: Operand,
    field: ContextField,
    dim: u32,
) -> Reg {
    b.load(
        layout.field_type(field).clone(),
        ctx,
        layout.offset(field, dim),
        field_range(cfg, field, dim),
    )
}

pub fn store_to_context(
    b: &mut FnBuilder,
    layout: &ContextLayout,
    ctx: Operand,
    field: ContextField,
    dim: u32,
    value: Operand,
) {
    b.store(
        layout.field_type(field).clone(),
        ctx,
        layout.offset(field, dim),
        value,
    );
}

/// Emit a placeholder that `replace_placeholders` later swaps for a
/// loop induction variable.
pub fn add_placeholder(b: &mut FnBuilder, name: &str) -> Reg {
    b.placeholder(name)
}

/// Rewrite every use of a placeholder register to its replacement and
/// drop the placeholder definitions.
pub fn replace_placeholders(insts: &mut Vec<Inst>, map: &HashMap<Reg, Operand>) {
    insts.retain(|inst| !matches!(inst, Inst::Placeholder { dst, .. } if map.contains_key(dst)));
    walk_mut(insts, &mut |inst| {
        if let Inst::Loop { body, .. } = inst {
            body.retain(
                |inner| !matches!(inner, Inst::Placeholder { dst, .. } if map.contains_key(dst)),
            );
        }
        for op in inst.operands_mut() {
            if let Operand::Reg(reg) = op {
                if let Some(replacement) = map.get(reg) {
                    *op = replacement.clone();
                }
            }
        }
    });
}
