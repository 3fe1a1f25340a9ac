pub mod config;
pub mod diagnostic;
pub mod exec;
pub mod ir;
pub mod span;
pub mod workgroup;

pub use config::device::DeviceConfig;
pub use diagnostic::Diagnostic;
pub use ir::{Function, Module};
pub use workgroup::{KernelSkip, LauncherSet, SkipReason, Workgroup, WorkgroupReport};

/// Run the work-group pass over `module` for `device`.
pub fn generate_launchers(module: &mut Module, device: &DeviceConfig) -> WorkgroupReport {
    Workgroup::new(device).run_on_module(module)
}
