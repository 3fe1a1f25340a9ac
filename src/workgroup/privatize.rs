//! Global-handle privatization.
//!
//! Kernels read their identity (`_local_id`, `_group_id`, ...) from
//! implicit shared globals. The privatizer derives a body function whose
//! identity arrives explicitly: local ids as trailing parameters, every
//! other handle as a load from the context pointer (or a constant when
//! the launch shape is fixed at generation time). The published kernel is
//! left untouched.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::device::DeviceConfig;
use crate::diagnostic::Diagnostic;
use crate::ir::builder::FnBuilder;
use crate::ir::callgraph::CallGraph;
use crate::ir::{
    walk_mut, Function, Handle, HandleRef, Inst, Module, Operand, Param, Type,
};
use crate::span::Span;

use super::classify::{contains, performs_output};
use super::context::{create_load_from_context, ContextField, ContextLayout};

pub const LOCAL_ID_PARAMS: [&str; 3] = ["_local_id_x", "_local_id_y", "_local_id_z"];
pub const CONTEXT_PARAM: &str = "_context";

/// Where the local work-group size comes from inside a derived body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyFlavor {
    /// Loaded from the context at run time.
    Dynamic,
    /// Folded to constants; the global offset is folded to zero.
    Fixed([u64; 3]),
}

impl BodyFlavor {
    pub fn body_symbol(self, kernel: &str) -> String {
        match self {
            BodyFlavor::Dynamic => format!("_wl_{}_body", kernel),
            BodyFlavor::Fixed(_) => format!("_wl_{}_body_fast", kernel),
        }
    }
}

/// Rewrite every use of each handle in `func` to its concrete value.
/// Returns the number of operands rewritten.
pub fn privatize_globals(func: &mut Function, values: &[(HandleRef, Operand)]) -> usize {
    let map: BTreeMap<HandleRef, Operand> = values.iter().cloned().collect();
    let mut rewritten = 0;
    if let Some(body) = func.body.as_mut() {
        walk_mut(body, &mut |inst| {
            for op in inst.operands_mut() {
                if let Operand::Handle(h) = op {
                    if let Some(value) = map.get(h) {
                        *op = value.clone();
                        rewritten += 1;
                    }
                }
            }
        });
    }
    rewritten
}

/// Check every handle reference of `func` against the device's dimension
/// count.
pub fn validate_handles(func: &Function, cfg: &DeviceConfig) -> Result<(), Diagnostic> {
    for h in func.handle_refs() {
        let limit = if h.kind.is_dimensional() {
            cfg.max_work_item_dims
        } else {
            1
        };
        if h.dim >= limit {
            return Err(Diagnostic::error(
                format!(
                    "handle {}[{}] in '{}' is outside dimensions [0, {})",
                    h.kind, h.dim, func.name, limit
                ),
                Span::dummy(),
            ));
        }
    }
    Ok(())
}

/// Drop handle declarations that nothing executable still reads: only
/// unprocessed kernels, generated functions and the helpers they reach
/// count as users.
pub fn remove_dead_handles(module: &mut Module, callgraph: &CallGraph) {
    let mut live = BTreeSet::new();
    for func in &module.functions {
        let is_root = func.attrs.derived_from.is_some()
            || super::classify::is_kernel_to_process(func, module);
        if !is_root {
            continue;
        }
        for name in callgraph.reachable_from(&func.name) {
            if let Some(reached) = module.get(&name) {
                live.extend(reached.handle_refs().into_iter().map(|h| h.kind));
            }
        }
    }
    let before = module.handles.len();
    module.handles.retain(|h| live.contains(h));
    if module.handles.len() != before {
        debug!(removed = before - module.handles.len(), "dropped dead handle declarations");
    }
}

/// Derive the privatized body of `kernel`.
///
/// Signature: the kernel's parameters, then the context pointer, then one
/// `size_t` local id per dimension for per-work-item kernels.
pub fn derive_body(
    kernel: &Function,
    cfg: &DeviceConfig,
    layout: &ContextLayout,
    flavor: BodyFlavor,
    workgroup_shaped: bool,
) -> Result<Function, Diagnostic> {
    validate_handles(kernel, cfg)?;

    let refs = kernel.handle_refs();
    if workgroup_shaped && refs.iter().any(|h| h.kind == Handle::LocalId) {
        return Err(Diagnostic::error(
            format!(
                "work-group body '{}' still reads {}",
                kernel.name,
                Handle::LocalId
            ),
            Span::dummy(),
        )
        .with_help("barrier resolution must materialize local ids as loop variables"));
    }

    let mut body = kernel.clone();
    body.name = flavor.body_symbol(&kernel.name);
    body.attrs.kernel = false;
    body.attrs.derived_from = Some(kernel.name.clone());
    body.attrs.workgroup_body = workgroup_shaped;

    let n = kernel.params.len() as u32;
    body.params.push(Param::new(CONTEXT_PARAM, cfg.context_ptr()));
    if !workgroup_shaped {
        for name in LOCAL_ID_PARAMS {
            body.params.push(Param::new(name, cfg.size_t()));
        }
    }
    let ctx = Operand::Param(n);

    let mut prelude = FnBuilder::starting_at(kernel.reg_count());
    let mut values = Vec::with_capacity(refs.len());
    for h in refs {
        let value = match (h.kind, flavor) {
            (Handle::LocalId, _) => Operand::Param(n + 1 + h.dim),
            (Handle::LocalSize, BodyFlavor::Fixed(size)) => Operand::Imm(size[h.dim as usize]),
            (Handle::GlobalOffset, BodyFlavor::Fixed(_)) => Operand::Imm(0),
            (kind, _) => match ContextField::for_handle(kind) {
                Some(field) => Operand::Reg(create_load_from_context(
                    &mut prelude,
                    cfg,
                    layout,
                    ctx.clone(),
                    field,
                    h.dim,
                )),
                None => continue,
            },
        };
        values.push((h, value));
    }

    let rewritten = privatize_globals(&mut body, &values);
    let mut insts = prelude.finish();
    insts.extend(body.body.take().unwrap_or_default());
    body.body = Some(insts);
    debug!(body = %body.name, rewritten, "privatized implicit handles");
    Ok(body)
}

// ─── Device-side output ───────────────────────────────────────────

/// Output clones shared by every kernel of a module: helper name → name
/// of its clone taking the output buffer triple.
#[derive(Clone, Debug, Default)]
pub struct PrintfCache {
    clones: BTreeMap<String, String>,
}

impl PrintfCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, helper: &str) -> Option<&str> {
        self.clones.get(helper).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.clones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clones.is_empty()
    }

    /// Route every output of `body` (a body derived from `root`) into the
    /// device-side buffer read through its context pointer `ctx`, cloning
    /// printing helpers that have no clone yet. Returns the newly created
    /// clones.
    #[allow(clippy::too_many_arguments)]
    pub fn thread(
        &mut self,
        module: &Module,
        callgraph: &CallGraph,
        root: &str,
        body: &mut Function,
        ctx: Operand,
        cfg: &DeviceConfig,
        layout: &ContextLayout,
    ) -> Vec<Function> {
        if !module
            .get(root)
            .is_some_and(|f| performs_output(f, module, callgraph))
        {
            return Vec::new();
        }
        let printing = callgraph.reaching(module, |f| {
            contains(f, |inst| matches!(inst, Inst::Printf { .. }))
        });

        let mut pending = Vec::new();
        for name in callgraph.reachable_from(root) {
            if name == root || !printing.contains(&name) || self.clones.contains_key(&name) {
                continue;
            }
            let clone_name = format!("{}.printf", name);
            // A clone left by an earlier run is reused as is.
            let existing = module
                .get(&clone_name)
                .is_some_and(|f| f.attrs.derived_from.as_deref() == Some(name.as_str()));
            if existing {
                self.clones.insert(name, clone_name);
            } else if module.get(&name).is_some_and(|f| !f.is_declaration()) {
                self.clones.insert(name.clone(), clone_name);
                pending.push(name);
            }
        }

        let mut created = Vec::with_capacity(pending.len());
        for name in pending {
            let Some(helper) = module.get(&name) else {
                continue;
            };
            let mut clone = helper.clone();
            clone.name = self.clones[&name].clone();
            clone.attrs.kernel = false;
            clone.attrs.derived_from = Some(name.clone());
            let n = clone.params.len() as u32;
            clone.params.extend(buffer_params(cfg));
            let buffer = [Operand::Param(n), Operand::Param(n + 1), Operand::Param(n + 2)];
            route_output(&mut clone, &printing, &self.clones, &buffer);
            created.push(clone);
        }

        // The body's own triple comes from the context.
        let mut prelude = FnBuilder::starting_at(body.reg_count());
        let buffer = [
            ContextField::PrintfBuffer,
            ContextField::PrintfBufferPosition,
            ContextField::PrintfBufferCapacity,
        ]
        .map(|field| {
            Operand::Reg(create_load_from_context(
                &mut prelude,
                cfg,
                layout,
                ctx.clone(),
                field,
                0,
            ))
        });
        route_output(body, &printing, &self.clones, &buffer);
        let mut insts = prelude.finish();
        insts.extend(body.body.take().unwrap_or_default());
        body.body = Some(insts);

        if !created.is_empty() {
            debug!(root, clones = created.len(), "cloned printing helpers");
        }
        created
    }
}

fn buffer_params(cfg: &DeviceConfig) -> [Param; 3] {
    [
        Param::new("_printf_buffer", cfg.global_ptr()),
        Param::new("_printf_buffer_position", cfg.global_ptr()),
        Param::new("_printf_buffer_capacity", Type::I32),
    ]
}

fn route_output(
    func: &mut Function,
    printing: &BTreeSet<String>,
    clones: &BTreeMap<String, String>,
    buffer: &[Operand; 3],
) {
    let Some(body) = func.body.as_mut() else {
        return;
    };
    walk_mut(body, &mut |inst| match inst {
        Inst::Printf { buffer: slot, .. } => *slot = Some(buffer.clone()),
        Inst::Call { callee, args, .. } if printing.contains(callee.as_str()) => {
            if let Some(clone) = clones.get(callee.as_str()) {
                *callee = clone.clone();
                args.extend(buffer.iter().cloned());
            }
        }
        _ => {}
    });
}
