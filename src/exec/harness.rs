//! Host-side driver for running generated launchers in the interpreter:
//! builds the context record and argument buffer the way a runtime
//! would, then enters the launchers one work-group (or one grid) at a
//! time.

use crate::config::device::DeviceConfig;
use crate::ir::Module;
use crate::workgroup::context::{write_uint, ContextLayout, ContextValues};
use crate::workgroup::layout::{ArgBufferLayout, SlotKind};
use crate::workgroup::LauncherSet;

use super::{ExecError, Machine, Pointer, Value};

pub struct Harness<'m> {
    pub machine: Machine<'m>,
    cfg: &'m DeviceConfig,
    context: ContextLayout,
}

impl<'m> Harness<'m> {
    pub fn new(module: &'m Module, cfg: &'m DeviceConfig) -> Self {
        Self {
            machine: Machine::new(module, cfg),
            cfg,
            context: ContextLayout::new(cfg),
        }
    }

    pub fn context_layout(&self) -> &ContextLayout {
        &self.context
    }

    /// Allocate a context record holding `values`.
    pub fn context(&mut self, values: &ContextValues) -> Pointer {
        let bytes = self.context.encode(values);
        self.machine
            .alloc_bytes(self.cfg.address_spaces.context, bytes)
    }

    /// Allocate a device-side output buffer of `capacity` bytes and point
    /// `values` at it. Returns (buffer, position).
    pub fn attach_output(&mut self, values: &mut ContextValues, capacity: u32) -> (Pointer, Pointer) {
        let global = self.cfg.address_spaces.global;
        let buffer = self.machine.alloc(global, u64::from(capacity));
        let position = self.machine.alloc(global, 4);
        values.printf_buffer = self.machine.encode_ptr(buffer);
        values.printf_buffer_position = self.machine.encode_ptr(position);
        values.printf_buffer_capacity = capacity;
        (buffer, position)
    }

    /// Pack `args` into an argument buffer laid out by `layout`. Local
    /// slots the launcher allocates take the byte size as an `Int`.
    pub fn arg_buffer(&mut self, layout: &ArgBufferLayout, args: &[Value]) -> Result<Pointer, ExecError> {
        if args.len() != layout.slots.len() {
            return Err(ExecError::Arity {
                callee: layout.kernel.clone(),
                expected: layout.slots.len(),
                got: args.len(),
            });
        }
        let mut bytes = vec![0u8; layout.size as usize];
        for (slot, arg) in layout.slots.iter().zip(args) {
            let at = slot.offset as usize;
            match (slot.kind, arg) {
                (SlotKind::ByValue, Value::Ptr(src)) => {
                    let data = self.machine.bytes(*src, slot.size)?;
                    bytes[at..at + data.len()].copy_from_slice(data);
                }
                (_, Value::Int(v)) => write_uint(&mut bytes[at..at + slot.size as usize], *v),
                (_, Value::Ptr(p)) => {
                    let raw = self.machine.encode_ptr(*p);
                    write_uint(&mut bytes[at..at + slot.size as usize], raw);
                }
            }
        }
        Ok(self.machine.alloc_bytes(self.cfg.address_spaces.args, bytes))
    }

    /// Arguments for the entry launcher of `set`: the packed buffer when
    /// there is an argument-buffer launcher, the values themselves
    /// otherwise.
    fn entry_args(&mut self, set: &LauncherSet, args: &[Value]) -> Result<Vec<Value>, ExecError> {
        match (&set.arg_buffer, &set.layout) {
            (Some(_), Some(layout)) => Ok(vec![Value::Ptr(self.arg_buffer(layout, args)?)]),
            _ => Ok(args.to_vec()),
        }
    }

    fn enter(&mut self, launcher: &str, args: &[Value], ctx: Pointer, local: [u64; 3]) -> Result<(), ExecError> {
        let mut call_args = args.to_vec();
        call_args.push(Value::Ptr(ctx));
        if !self.cfg.spmd {
            self.machine.call(launcher, &call_args)?;
            return Ok(());
        }
        // The hardware runs one invocation per work-item.
        for z in 0..local[2] {
            for y in 0..local[1] {
                for x in 0..local[0] {
                    self.machine.set_local_id([x, y, z]);
                    self.machine.call(launcher, &call_args)?;
                }
            }
        }
        Ok(())
    }

    /// Run one work-group through the entry launcher of `set`.
    pub fn run_workgroup(&mut self, set: &LauncherSet, args: &[Value], values: &ContextValues) -> Result<(), ExecError> {
        let entry_args = self.entry_args(set, args)?;
        let ctx = self.context(values);
        self.enter(set.entry(), &entry_args, ctx, values.local_size)
    }

    /// Run every work-group: through the grid launcher when there is one,
    /// otherwise one work-group at a time.
    pub fn run_grid(&mut self, set: &LauncherSet, args: &[Value], values: &ContextValues) -> Result<(), ExecError> {
        let entry_args = self.entry_args(set, args)?;
        if let Some(grid) = &set.grid {
            let ctx = self.context(values);
            return self.enter(grid, &entry_args, ctx, values.local_size);
        }
        let groups = values.num_groups;
        for z in 0..groups[2] {
            for y in 0..groups[1] {
                for x in 0..groups[0] {
                    let mut group = values.clone();
                    group.group_id = [x, y, z];
                    let ctx = self.context(&group);
                    self.enter(set.entry(), &entry_args, ctx, values.local_size)?;
                }
            }
        }
        Ok(())
    }
}
