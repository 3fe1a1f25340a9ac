//! Launcher generation.
//!
//! Every launcher is built by one skeleton:
//!
//! 1. signature: kernel parameters or `(args*, ctx*)`, context last
//! 2. arguments: forwarded from the signature or unpacked from the buffer
//! 3. iteration: work-item loops, a single call, hardware-provided ids,
//!    or a loop over work-groups
//! 4. return
//!
//! A `Variant` selects the shape of each step; the four launcher flavours
//! are four `Variant` values.

use std::collections::HashMap;

use tracing::debug;

use crate::config::device::DeviceConfig;
use crate::diagnostic::Diagnostic;
use crate::ir::builder::FnBuilder;
use crate::ir::{Function, LauncherKind, Operand, Param, Reg, Type, PRIVATE_AS};
use crate::span::Span;

use super::context::{
    add_placeholder, create_load_from_context, replace_placeholders, store_to_context,
    ContextField, ContextLayout,
};
use super::layout::{ArgBufferLayout, SlotKind};
use super::privatize::LOCAL_ID_PARAMS;

/// Runtime intrinsic returning the invocation's local id on SPMD devices.
pub const LOCAL_ID_INTRINSIC: &str = "__wl_local_id";

/// Alignment of local-memory buffers the launcher allocates.
pub const LOCAL_BUFFER_ALIGN: u64 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signature {
    /// The kernel's parameters, then the context pointer.
    Direct,
    /// `(args*, ctx*)`.
    Buffer,
}

#[derive(Clone, Copy, Debug)]
pub enum ArgSource<'a> {
    /// Pass every non-context parameter through unchanged.
    Forward,
    Unpack(&'a ArgBufferLayout),
}

/// Where a per-work-item body gets its loop bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bounds {
    Context,
    Fixed([u64; 3]),
}

#[derive(Clone, Debug)]
pub enum Iteration {
    /// Call a per-work-item body for every local id.
    WorkItems { body: String, bounds: Bounds },
    /// Call a work-group-shaped body once.
    Once { body: String },
    /// Call a per-work-item body once with ids from the hardware.
    Hardware { body: String },
    /// Call another launcher once.
    Delegate { launcher: String },
    /// Call another launcher once per work-group of the grid.
    Groups { launcher: String },
}

#[derive(Clone, Debug)]
pub struct Variant<'a> {
    pub kind: LauncherKind,
    pub signature: Signature,
    pub args: ArgSource<'a>,
    pub iteration: Iteration,
}

pub struct LauncherGen<'a> {
    pub cfg: &'a DeviceConfig,
    pub context: &'a ContextLayout,
    pub kernel: &'a Function,
    pub subgroup_size: Option<u32>,
}

impl<'a> LauncherGen<'a> {
    /// The common skeleton.
    pub fn generate(&self, variant: &Variant<'_>) -> Function {
        let params = match variant.signature {
            Signature::Direct => {
                let mut params = self.kernel.params.clone();
                params.push(Param::new("_context", self.cfg.context_ptr()));
                params
            }
            Signature::Buffer => vec![
                Param::new("_args", self.cfg.args_ptr()),
                Param::new("_context", self.cfg.context_ptr()),
            ],
        };
        let ctx = Operand::Param(params.len() as u32 - 1);

        let mut b = FnBuilder::new();
        let args = match variant.args {
            ArgSource::Forward => (0..params.len() as u32 - 1).map(Operand::Param).collect(),
            ArgSource::Unpack(layout) => self.unpack(&mut b, layout),
        };

        match &variant.iteration {
            Iteration::WorkItems { body, bounds } => {
                self.emit_work_item_loops(&mut b, body, args, ctx, *bounds)
            }
            Iteration::Once { body } => {
                let mut call_args = args;
                call_args.push(ctx);
                b.call(body.as_str(), call_args);
            }
            Iteration::Hardware { body } => self.emit_hardware_ids(&mut b, body, args, ctx),
            Iteration::Delegate { launcher } => {
                let mut call_args = args;
                call_args.push(ctx);
                b.call(launcher.as_str(), call_args);
            }
            Iteration::Groups { launcher } => self.emit_group_loops(&mut b, launcher, args, ctx),
        }
        b.ret();

        let mut func = Function::new(variant.kind.symbol(&self.kernel.name), params, b.finish());
        func.attrs.launcher = Some(variant.kind);
        func.attrs.derived_from = Some(self.kernel.name.clone());
        func.attrs.subgroup_size = self.subgroup_size;
        func.attrs.reqd_work_group_size = self.kernel.attrs.reqd_work_group_size;
        debug!(launcher = %func.name, kind = %variant.kind, "emitted launcher");
        func
    }

    fn unpack(&self, b: &mut FnBuilder, layout: &ArgBufferLayout) -> Vec<Operand> {
        let buffer = Operand::Param(0);
        let mut args = Vec::with_capacity(layout.slots.len());
        for slot in &layout.slots {
            let param = &self.kernel.params[slot.index as usize];
            let value = match slot.kind {
                SlotKind::Scalar | SlotKind::Pointer => {
                    b.load(param.ty.clone(), buffer.clone(), slot.offset, None)
                }
                SlotKind::ByValue => {
                    let copy = b.alloca(PRIVATE_AS, Operand::Imm(slot.size), slot.align);
                    b.memcpy(Operand::Reg(copy), buffer.clone(), slot.offset, slot.size);
                    copy
                }
                SlotKind::Local {
                    launcher_allocates: true,
                } => {
                    let size_ty = Type::size_t(self.cfg.size_t_width);
                    let size = b.load(size_ty, buffer.clone(), slot.offset, None);
                    b.alloca(
                        self.cfg.address_spaces.local,
                        Operand::Reg(size),
                        LOCAL_BUFFER_ALIGN,
                    )
                }
                SlotKind::Local {
                    launcher_allocates: false,
                } => b.load(self.cfg.local_ptr(), buffer.clone(), slot.offset, None),
            };
            args.push(Operand::Reg(value));
        }
        args
    }

    /// Emit the body call with placeholder local ids; the caller resolves
    /// them once it knows where the ids come from.
    fn emit_body_call(
        &self,
        b: &mut FnBuilder,
        body: &str,
        mut args: Vec<Operand>,
        ctx: Operand,
    ) -> [Reg; 3] {
        let ids = LOCAL_ID_PARAMS.map(|name| add_placeholder(b, name));
        args.push(ctx);
        args.extend(ids.iter().map(|&r| Operand::Reg(r)));
        b.call(body, args);
        ids
    }

    fn local_bound(&self, b: &mut FnBuilder, ctx: &Operand, bounds: Bounds, dim: u32) -> Operand {
        if dim >= self.cfg.max_work_item_dims {
            return Operand::Imm(1);
        }
        match bounds {
            Bounds::Fixed(size) => Operand::Imm(size[dim as usize]),
            Bounds::Context => Operand::Reg(create_load_from_context(
                b,
                self.cfg,
                self.context,
                ctx.clone(),
                ContextField::LocalSize,
                dim,
            )),
        }
    }

    /// z outermost, x innermost. Dimensions with a bound of exactly one
    /// get no loop.
    fn emit_work_item_loops(
        &self,
        b: &mut FnBuilder,
        body: &str,
        args: Vec<Operand>,
        ctx: Operand,
        bounds: Bounds,
    ) {
        let extents: Vec<Operand> = (0..3)
            .map(|dim| self.local_bound(b, &ctx, bounds, dim))
            .collect();

        let mut ids = [Operand::Imm(0), Operand::Imm(0), Operand::Imm(0)];
        let mut opened = 0;
        for dim in (0..3).rev() {
            if extents[dim] != Operand::Imm(1) {
                ids[dim] = Operand::Reg(b.begin_loop(extents[dim].clone()));
                opened += 1;
            }
        }
        let placeholders = self.emit_body_call(b, body, args, ctx);
        for _ in 0..opened {
            b.end_loop();
        }
        self.resolve(b, placeholders, ids);
    }

    fn emit_hardware_ids(&self, b: &mut FnBuilder, body: &str, args: Vec<Operand>, ctx: Operand) {
        let mut ids = [Operand::Imm(0), Operand::Imm(0), Operand::Imm(0)];
        for dim in 0..self.cfg.max_work_item_dims.min(3) {
            ids[dim as usize] = Operand::Reg(
                b.call_value(LOCAL_ID_INTRINSIC, vec![Operand::Imm(u64::from(dim))]),
            );
        }
        let placeholders = self.emit_body_call(b, body, args, ctx);
        self.resolve(b, placeholders, ids);
    }

    /// Swap placeholder ids for their final values. Runs on the body
    /// built so far; every loop must already be closed.
    fn resolve(&self, b: &mut FnBuilder, placeholders: [Reg; 3], ids: [Operand; 3]) {
        let map: HashMap<Reg, Operand> = placeholders.into_iter().zip(ids).collect();
        let next = b.next_reg();
        let mut insts = std::mem::replace(b, FnBuilder::starting_at(next)).finish();
        replace_placeholders(&mut insts, &map);
        b.extend(insts);
    }

    /// Copy the context, then for every work-group store its id into the
    /// copy and call `launcher` with it.
    fn emit_group_loops(
        &self,
        b: &mut FnBuilder,
        launcher: &str,
        mut args: Vec<Operand>,
        ctx: Operand,
    ) {
        let groups: Vec<Operand> = (0..3)
            .map(|dim| {
                if dim < self.cfg.max_work_item_dims {
                    Operand::Reg(create_load_from_context(
                        b,
                        self.cfg,
                        self.context,
                        ctx.clone(),
                        ContextField::NumGroups,
                        dim,
                    ))
                } else {
                    Operand::Imm(1)
                }
            })
            .collect();

        let copy = Operand::Reg(b.alloca(
            self.cfg.address_spaces.context,
            Operand::Imm(self.context.size()),
            self.context.align(),
        ));
        b.memcpy(copy.clone(), ctx, 0, self.context.size());

        let mut opened = 0;
        for dim in (0..3).rev() {
            let id = if groups[dim] == Operand::Imm(1) {
                Operand::Imm(0)
            } else {
                opened += 1;
                Operand::Reg(b.begin_loop(groups[dim].clone()))
            };
            store_to_context(b, self.context, copy.clone(), ContextField::GroupId, dim as u32, id);
        }
        args.push(copy);
        b.call(launcher, args);
        for _ in 0..opened {
            b.end_loop();
        }
    }
}

/// Validate a kernel's required subgroup size against the device.
pub fn required_subgroup_size(kernel: &Function, cfg: &DeviceConfig) -> Result<Option<u32>, Diagnostic> {
    let Some(size) = kernel.attrs.reqd_subgroup_size else {
        return Ok(None);
    };
    if cfg.subgroup_sizes.contains(&size) {
        return Ok(Some(size));
    }
    let supported = if cfg.subgroup_sizes.is_empty() {
        "none".to_string()
    } else {
        cfg.subgroup_sizes
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    Err(Diagnostic::error(
        format!(
            "kernel '{}' requires subgroup size {} which device '{}' does not support",
            kernel.name, size, cfg.name
        ),
        Span::dummy(),
    )
    .with_note(format!("supported subgroup sizes: {}", supported)))
}

/// Local size the fast path is generated for: the kernel's required size
/// or the device's fixed size, checked against the device limits.
pub fn fixed_local_size(kernel: &Function, cfg: &DeviceConfig) -> Result<[u64; 3], Diagnostic> {
    let size = kernel.attrs.reqd_work_group_size.unwrap_or(cfg.local_size);
    for dim in 0..3 {
        let limit = if (dim as u32) < cfg.max_work_item_dims {
            cfg.max_work_item_sizes[dim]
        } else {
            1
        };
        if size[dim] == 0 || size[dim] > limit {
            return Err(Diagnostic::error(
                format!(
                    "work-group size {} in dimension {} of '{}' is outside [1, {}]",
                    size[dim], dim, kernel.name, limit
                ),
                Span::dummy(),
            ));
        }
    }
    Ok(size)
}
