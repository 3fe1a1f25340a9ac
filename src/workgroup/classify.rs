//! Kernel classification: which functions the pass still has to process,
//! and whether a kernel's body already spans a whole work-group.

use crate::ir::callgraph::CallGraph;
use crate::ir::{walk, Function, Inst, LauncherKind, Module};

/// True for kernel entry points that have no launcher in `module` yet.
///
/// Generated functions (launchers, derived bodies, output clones) are
/// never kernels to process, which makes a second run over an already
/// processed module a no-op.
pub fn is_kernel_to_process(func: &Function, module: &Module) -> bool {
    func.attrs.kernel
        && !func.is_declaration()
        && func.attrs.launcher.is_none()
        && func.attrs.derived_from.is_none()
        && !module.contains(&LauncherKind::Default.symbol(&func.name))
}

/// True when `func` (or anything it transitively calls) synchronizes the
/// work-group, or when barrier resolution already shaped it as a whole
/// work-group body. External declarations (the runtime library) are not
/// looked into.
pub fn has_workgroup_barriers(func: &Function, module: &Module, callgraph: &CallGraph) -> bool {
    if func.attrs.workgroup_body {
        return true;
    }
    callgraph
        .reachable_from(&func.name)
        .iter()
        .filter_map(|name| module.get(name))
        .any(|f| contains(f, |inst| matches!(inst, Inst::Barrier)))
}

/// True when `func` performs formatted output, directly or through a
/// helper it calls.
pub fn performs_output(func: &Function, module: &Module, callgraph: &CallGraph) -> bool {
    callgraph
        .reachable_from(&func.name)
        .iter()
        .filter_map(|name| module.get(name))
        .any(|f| contains(f, |inst| matches!(inst, Inst::Printf { .. })))
}

pub(crate) fn contains(func: &Function, pred: impl Fn(&Inst) -> bool) -> bool {
    let mut found = false;
    walk(func.insts(), &mut |inst| found |= pred(inst));
    found
}
