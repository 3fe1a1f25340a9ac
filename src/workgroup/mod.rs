//! The work-group launcher pass.
//!
//! For every kernel in a module, emits launchers that execute the kernel
//! over a whole work-group (and optionally a whole grid) given only an
//! execution-context pointer and the kernel arguments:
//!
//! ```text
//! kernel @k(args)              published entry point, untouched
//! fn @_wl_k_body(args, ctx, lid_x, lid_y, lid_z)
//! launcher(default)   @_wl_k_workgroup(args, ctx)
//! launcher(fast)      @_wl_k_workgroup_fast(args, ctx)        fixed local size
//! launcher(argbuffer) @_wl_k_workgroup_argbuffer(args*, ctx)  packed arguments
//! launcher(grid)      @_wl_k_grid(..., ctx)                   every work-group
//! ```
//!
//! Kernels are processed one at a time. A kernel that cannot be processed
//! is reported in the `WorkgroupReport` and contributes nothing to the
//! module; the rest still get their launchers.

pub mod classify;
pub mod context;
pub mod launcher;
pub mod layout;
pub mod privatize;

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::config::device::DeviceConfig;
use crate::diagnostic::Diagnostic;
use crate::ir::callgraph::CallGraph;
use crate::ir::{Function, LauncherKind, Module, Operand, Param, Type};
use crate::span::Span;

use classify::{has_workgroup_barriers, is_kernel_to_process};
use context::ContextLayout;
use launcher::{
    fixed_local_size, required_subgroup_size, ArgSource, Bounds, Iteration, LauncherGen,
    Signature, Variant, LOCAL_ID_INTRINSIC,
};
use layout::{ArgBufferLayout, LayoutCache};
use privatize::{derive_body, remove_dead_handles, BodyFlavor, PrintfCache};

// ─── Results ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The kernel violates an input precondition.
    MalformedKernel,
    /// The kernel asks for something the device cannot provide.
    UnsatisfiableRequirement,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MalformedKernel => write!(f, "malformed kernel"),
            SkipReason::UnsatisfiableRequirement => write!(f, "unsatisfiable requirement"),
        }
    }
}

/// A kernel the pass left without launchers.
#[derive(Clone, Debug)]
pub struct KernelSkip {
    pub kernel: String,
    pub reason: SkipReason,
    pub diagnostic: Diagnostic,
}

impl KernelSkip {
    fn malformed(kernel: &str, diagnostic: Diagnostic) -> Self {
        Self {
            kernel: kernel.to_string(),
            reason: SkipReason::MalformedKernel,
            diagnostic,
        }
    }

    fn unsatisfiable(kernel: &str, diagnostic: Diagnostic) -> Self {
        Self {
            kernel: kernel.to_string(),
            reason: SkipReason::UnsatisfiableRequirement,
            diagnostic,
        }
    }
}

impl fmt::Display for KernelSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "skipped '{}' ({}): {}",
            self.kernel, self.reason, self.diagnostic.message
        )
    }
}

/// Symbols generated for one kernel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LauncherSet {
    pub kernel: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fast_body: Option<String>,
    pub default: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fast: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg_buffer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid: Option<String>,
    /// One body call executes the whole work-group.
    pub workgroup_body: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subgroup_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<ArgBufferLayout>,
}

impl LauncherSet {
    pub fn fast_eligible(&self) -> bool {
        self.fast.is_some()
    }

    /// The launcher a runtime should enter one work-group through.
    pub fn entry(&self) -> &str {
        self.arg_buffer
            .as_deref()
            .or(self.fast.as_deref())
            .unwrap_or(&self.default)
    }

    pub fn launchers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.default.as_str())
            .chain(self.fast.as_deref())
            .chain(self.arg_buffer.as_deref())
            .chain(self.grid.as_deref())
    }
}

#[derive(Clone, Debug, Default)]
pub struct WorkgroupReport {
    pub launchers: Vec<LauncherSet>,
    pub skipped: Vec<KernelSkip>,
}

impl WorkgroupReport {
    /// Whether the module changed.
    pub fn changed(&self) -> bool {
        !self.launchers.is_empty()
    }

    pub fn get(&self, kernel: &str) -> Option<&LauncherSet> {
        self.launchers.iter().find(|set| set.kernel == kernel)
    }

    pub fn skipped(&self, kernel: &str) -> Option<&KernelSkip> {
        self.skipped.iter().find(|skip| skip.kernel == kernel)
    }
}

// ─── Driver ────────────────────────────────────────────────────────

/// Everything generated for one kernel, committed all at once.
struct Emission {
    functions: Vec<Function>,
    set: LauncherSet,
    printf: PrintfCache,
}

pub struct Workgroup<'c> {
    cfg: &'c DeviceConfig,
    context: ContextLayout,
    printf: PrintfCache,
    layouts: LayoutCache,
}

impl<'c> Workgroup<'c> {
    pub fn new(cfg: &'c DeviceConfig) -> Self {
        Self {
            cfg,
            context: ContextLayout::new(cfg),
            printf: PrintfCache::new(),
            layouts: LayoutCache::new(),
        }
    }

    /// Check argument-buffer layouts against previously recorded ones.
    pub fn with_layout_cache(mut self, layouts: LayoutCache) -> Self {
        self.layouts = layouts;
        self
    }

    pub fn layout_cache(&self) -> &LayoutCache {
        &self.layouts
    }

    pub fn into_layout_cache(self) -> LayoutCache {
        self.layouts
    }

    pub fn context_layout(&self) -> &ContextLayout {
        &self.context
    }

    /// Run the pass over `module`.
    pub fn run_on_module(&mut self, module: &mut Module) -> WorkgroupReport {
        let mut report = WorkgroupReport::default();
        // Output clones are shared by the kernels of one module only.
        self.printf = PrintfCache::new();

        let kernels: Vec<String> = module
            .functions
            .iter()
            .filter(|f| is_kernel_to_process(f, module))
            .map(|f| f.name.clone())
            .collect();
        info!(module = %module.name, device = %self.cfg.name, kernels = kernels.len(), "work-group pass");

        for name in kernels {
            let span = info_span!("kernel", name = %name);
            let _enter = span.enter();

            // Earlier kernels may have added functions.
            let callgraph = CallGraph::build(module);
            match self.process_kernel(module, &callgraph, &name) {
                Ok(emission) => self.commit(module, emission, &mut report),
                Err(skip) => {
                    warn!(reason = %skip.reason, "{}", skip.diagnostic.message);
                    report.skipped.push(skip);
                }
            }
        }

        if report.changed() {
            let callgraph = CallGraph::build(module);
            remove_dead_handles(module, &callgraph);
        }
        report
    }

    fn commit(&mut self, module: &mut Module, emission: Emission, report: &mut WorkgroupReport) {
        if let Some(layout) = &emission.set.layout {
            // Checked before emission; recording cannot disagree now.
            if let Err(diag) = self.layouts.record(layout.clone()) {
                warn!("{}", diag.message);
            }
        }
        if self.cfg.spmd && !module.contains(LOCAL_ID_INTRINSIC) {
            module.add(Function::declaration(
                LOCAL_ID_INTRINSIC,
                vec![Param::new("dim", Type::I32)],
            ));
        }
        debug!(functions = emission.functions.len(), "committed");
        module.functions.extend(emission.functions);
        self.printf = emission.printf;
        report.launchers.push(emission.set);
    }

    fn process_kernel(
        &self,
        module: &Module,
        callgraph: &CallGraph,
        name: &str,
    ) -> Result<Emission, KernelSkip> {
        let kernel = module.get(name).ok_or_else(|| {
            KernelSkip::malformed(
                name,
                Diagnostic::error(format!("kernel '{}' not found", name), Span::dummy()),
            )
        })?;
        let cfg = self.cfg;

        self.check_params(kernel)?;
        let subgroup_size = required_subgroup_size(kernel, cfg)
            .map_err(|d| KernelSkip::unsatisfiable(name, d))?;
        self.check_helpers(kernel, module, callgraph)?;

        let workgroup_shaped = has_workgroup_barriers(kernel, module, callgraph);
        let fast_size = if kernel.attrs.reqd_work_group_size.is_some() || cfg.fast_path_eligible() {
            Some(fixed_local_size(kernel, cfg).map_err(|d| KernelSkip::malformed(name, d))?)
        } else {
            None
        };
        let fast_size = fast_size.filter(|_| cfg.fast_path_eligible());

        let layout = if cfg.arg_buffer_launcher {
            let layout =
                ArgBufferLayout::compute(kernel, cfg).map_err(|d| KernelSkip::malformed(name, d))?;
            self.layouts
                .check(&layout)
                .map_err(|d| KernelSkip::unsatisfiable(name, d))?;
            Some(layout)
        } else {
            None
        };

        // Bodies.
        let mut printf = self.printf.clone();
        let mut functions = Vec::new();
        let mut bodies = vec![BodyFlavor::Dynamic];
        if let Some(size) = fast_size {
            bodies.push(BodyFlavor::Fixed(size));
        }
        for flavor in &bodies {
            let mut body = derive_body(kernel, cfg, &self.context, *flavor, workgroup_shaped)
                .map_err(|d| KernelSkip::malformed(name, d))?;
            body.attrs.subgroup_size = subgroup_size;
            if cfg.device_side_printf {
                let ctx = Operand::Param(kernel.params.len() as u32);
                functions.extend(printf.thread(
                    module, callgraph, name, &mut body, ctx, cfg, &self.context,
                ));
            }
            functions.push(body);
        }

        // Launchers.
        let gen = LauncherGen {
            cfg,
            context: &self.context,
            kernel,
            subgroup_size,
        };
        let per_group = |body: String, bounds: Bounds| {
            if workgroup_shaped {
                Iteration::Once { body }
            } else if cfg.spmd {
                Iteration::Hardware { body }
            } else {
                Iteration::WorkItems { body, bounds }
            }
        };

        let default = LauncherKind::Default.symbol(name);
        functions.push(gen.generate(&Variant {
            kind: LauncherKind::Default,
            signature: Signature::Direct,
            args: ArgSource::Forward,
            iteration: per_group(BodyFlavor::Dynamic.body_symbol(name), Bounds::Context),
        }));

        let fast = fast_size.map(|size| {
            functions.push(gen.generate(&Variant {
                kind: LauncherKind::Fast,
                signature: Signature::Direct,
                args: ArgSource::Forward,
                iteration: per_group(BodyFlavor::Fixed(size).body_symbol(name), Bounds::Fixed(size)),
            }));
            LauncherKind::Fast.symbol(name)
        });

        let arg_buffer = layout.as_ref().map(|layout| {
            functions.push(gen.generate(&Variant {
                kind: LauncherKind::ArgBuffer,
                signature: Signature::Buffer,
                args: ArgSource::Unpack(layout),
                iteration: Iteration::Delegate {
                    launcher: fast.clone().unwrap_or_else(|| default.clone()),
                },
            }));
            LauncherKind::ArgBuffer.symbol(name)
        });

        let grid = cfg.grid_launcher.then(|| {
            let (inner, signature) = match &arg_buffer {
                Some(symbol) => (symbol.clone(), Signature::Buffer),
                None => (fast.clone().unwrap_or_else(|| default.clone()), Signature::Direct),
            };
            functions.push(gen.generate(&Variant {
                kind: LauncherKind::Grid,
                signature,
                args: ArgSource::Forward,
                iteration: Iteration::Groups { launcher: inner },
            }));
            LauncherKind::Grid.symbol(name)
        });

        if let Some(taken) = functions.iter().find(|f| module.contains(&f.name)) {
            return Err(KernelSkip::malformed(
                name,
                Diagnostic::error(
                    format!(
                        "generated function '{}' for '{}' collides with an existing function",
                        taken.name, name
                    ),
                    Span::dummy(),
                )
                .with_help("rename the existing function"),
            ));
        }

        let set = LauncherSet {
            kernel: name.to_string(),
            body: BodyFlavor::Dynamic.body_symbol(name),
            fast_body: fast_size.map(|size| BodyFlavor::Fixed(size).body_symbol(name)),
            default,
            fast,
            arg_buffer,
            grid,
            workgroup_body: workgroup_shaped,
            subgroup_size,
            layout,
        };
        debug!(launchers = set.launchers().count(), workgroup_body = workgroup_shaped, "generated");
        Ok(Emission {
            functions,
            set,
            printf,
        })
    }

    /// Every parameter must be expressible in the launcher calling
    /// convention.
    fn check_params(&self, kernel: &Function) -> Result<(), KernelSkip> {
        for param in &kernel.params {
            let problem = match &param.ty {
                Type::Ptr(space) if !self.cfg.is_kernel_arg_space(*space) => Some(format!(
                    "points into address space {} which kernels cannot receive",
                    space
                )),
                ty if ty.is_aggregate() && !param.by_value => {
                    Some("is an aggregate not passed by value".to_string())
                }
                ty if param.by_value && !ty.is_aggregate() => {
                    Some("is passed by value but is not an aggregate".to_string())
                }
                ty if ty.checked_size(self.cfg.ptr_bytes()).is_none() => {
                    Some(format!("has type {} whose size does not fit in 64 bits", ty))
                }
                _ => None,
            };
            if let Some(problem) = problem {
                return Err(KernelSkip::malformed(
                    &kernel.name,
                    Diagnostic::error(
                        format!("parameter '{}' of '{}' {}", param.name, kernel.name, problem),
                        Span::dummy(),
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Implicit handles may only be read by the kernel itself: helpers
    /// receive no context.
    fn check_helpers(
        &self,
        kernel: &Function,
        module: &Module,
        callgraph: &CallGraph,
    ) -> Result<(), KernelSkip> {
        for name in callgraph.reachable_from(&kernel.name) {
            if name == kernel.name {
                continue;
            }
            let Some(helper) = module.get(&name) else {
                continue;
            };
            if let Some(h) = helper.handle_refs().into_iter().next() {
                return Err(KernelSkip::malformed(
                    &kernel.name,
                    Diagnostic::error(
                        format!(
                            "helper '{}' called from '{}' reads {}",
                            name, kernel.name, h.kind
                        ),
                        Span::dummy(),
                    )
                    .with_help("pass the value to the helper as an argument"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
